use crate::{TaskClass, WorkerJoinSet, join_error_panic_message};

#[tokio::test]
async fn join_set_surfaces_panicking_member() {
	let mut set = WorkerJoinSet::new(TaskClass::Background);
	set.spawn(async { 1usize });
	set.spawn(async { panic!("profile fetch exploded") });

	let mut values = Vec::new();
	let mut panics = Vec::new();
	while let Some(joined) = set.join_next().await {
		match joined {
			Ok(v) => values.push(v),
			Err(err) => panics.extend(join_error_panic_message(err)),
		}
	}

	assert_eq!(values, vec![1]);
	assert_eq!(panics.len(), 1);
	assert!(panics[0].contains("exploded"), "got: {}", panics[0]);
}

#[tokio::test]
async fn formatted_payload_is_recovered() {
	let id = "p-7";
	let handle = tokio::spawn(async move { panic!("scope {id} vanished") });
	let msg = join_error_panic_message(handle.await.unwrap_err()).expect("should be a panic");
	assert_eq!(msg, "scope p-7 vanished");
}

#[tokio::test]
async fn aborted_task_is_not_a_panic() {
	let mut set: WorkerJoinSet<()> = WorkerJoinSet::new(TaskClass::Interactive);
	set.spawn(async {
		tokio::time::sleep(std::time::Duration::from_secs(60)).await;
	});
	set.abort_all();
	let err = set.join_next().await.expect("one member").unwrap_err();
	assert!(join_error_panic_message(err).is_none());
}
