//! Integration tests for the CRUD modal controller over the in-memory
//! account store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;
use purse_query::QueryClient;
use purse_sync::entities::{Account, AccountPatch, NewAccount};
use purse_sync::memory::MemoryEntities;
use purse_sync::{AlwaysConfirm, ConfirmDelete, ConfirmError, ConfirmWith, CrudController, DeleteOutcome, GatewayError, MutationError};

type Accounts = CrudController<Account, NewAccount, AccountPatch>;

fn account(id: &str) -> Account {
	Account {
		id: id.to_string(),
		profile_id: "p1".to_string(),
		name: format!("Account {id}"),
		currency: "EUR".to_string(),
		balance: 500,
	}
}

fn new_account(name: &str) -> NewAccount {
	NewAccount {
		profile_id: "p1".to_string(),
		name: name.to_string(),
		currency: "EUR".to_string(),
		balance: 0,
	}
}

fn controller(store: &Arc<MemoryEntities<Account>>, confirm: Arc<dyn ConfirmDelete<Account>>) -> Accounts {
	CrudController::for_gateway(QueryClient::default(), Arc::clone(store), confirm)
}

#[tokio::test]
async fn test_create_success_closes_modal() {
	let store = Arc::new(MemoryEntities::<Account>::new());
	let crud = controller(&store, Arc::new(AlwaysConfirm));

	crud.open_create_modal();
	let created = crud.handle_create(new_account("Checking")).await.unwrap();

	assert!(!crud.show_create_modal(), "modal should close after a successful create");
	assert!(crud.create_mutation().is_idle());
	assert_eq!(store.records(), vec![created]);
}

#[tokio::test]
async fn test_create_failure_keeps_modal_open() {
	let store = Arc::new(MemoryEntities::<Account>::new());
	let crud = controller(&store, Arc::new(AlwaysConfirm));

	crud.open_create_modal();
	let err = crud.handle_create(new_account("  ")).await.unwrap_err();

	assert!(matches!(err.gateway_error(), Some(GatewayError::Validation(_))));
	assert!(crud.show_create_modal(), "modal must stay open on failure");
	assert!(crud.create_mutation().is_error());
	assert!(crud.create_mutation().error().is_some());

	crud.close_create_modal();
	assert!(!crud.show_create_modal());
	assert!(crud.create_mutation().error().is_none(), "closing the modal clears the error");
}

#[tokio::test]
async fn test_update_without_selection_is_rejected() {
	let store = Arc::new(MemoryEntities::with_records([account("a")]));
	let crud = controller(&store, Arc::new(AlwaysConfirm));

	let err = crud.handle_update(AccountPatch::default()).await.unwrap_err();
	assert!(matches!(err, MutationError::NothingSelected));
	assert_eq!(store.calls().update, 0);
}

#[tokio::test]
async fn test_update_clears_editing_on_success() {
	let store = Arc::new(MemoryEntities::with_records([account("a")]));
	let crud = controller(&store, Arc::new(AlwaysConfirm));

	crud.start_editing(account("a"));
	let patch = AccountPatch {
		name: Some("Renamed".to_string()),
		..AccountPatch::default()
	};
	let updated = crud.handle_update(patch).await.unwrap();

	assert_eq!(updated.name, "Renamed");
	assert_eq!(crud.editing_entity(), None);
	assert_eq!(store.records()[0].name, "Renamed");
}

#[tokio::test]
async fn test_update_failure_keeps_editing() {
	let store = Arc::new(MemoryEntities::with_records([account("a")]));
	let crud = controller(&store, Arc::new(AlwaysConfirm));

	crud.start_editing(account("a"));
	store.fail_next_write(GatewayError::Transport("offline".to_string()));
	assert!(crud.handle_update(AccountPatch::default()).await.is_err());

	assert_eq!(crud.editing_entity().map(|a| a.id), Some("a".to_string()));
	assert!(crud.update_mutation().is_error());
}

#[tokio::test]
async fn test_declined_delete_sends_nothing() {
	let store = Arc::new(MemoryEntities::with_records([account("a")]));
	let asked = Arc::new(AtomicUsize::new(0));
	let asked_in_prompt = Arc::clone(&asked);
	let confirm = ConfirmWith(move |_: &Account| {
		asked_in_prompt.fetch_add(1, Ordering::SeqCst);
		async { Ok::<_, ConfirmError>(false) }
	});
	let crud = controller(&store, Arc::new(confirm));

	let outcome = crud.handle_delete(&account("a")).await.unwrap();

	assert_eq!(outcome, DeleteOutcome::Declined);
	assert_eq!(asked.load(Ordering::SeqCst), 1);
	assert_eq!(store.calls().delete, 0);
	assert_eq!(store.records().len(), 1);
	assert!(crud.delete_mutation().is_idle());
}

#[tokio::test]
async fn test_failed_confirmation_counts_as_declined() {
	let store = Arc::new(MemoryEntities::with_records([account("a")]));
	let confirm = ConfirmWith(|_: &Account| async { Err::<bool, _>(ConfirmError("prompt closed".to_string())) });
	let crud = controller(&store, Arc::new(confirm));

	let outcome = crud.handle_delete(&account("a")).await.unwrap();
	assert_eq!(outcome, DeleteOutcome::Declined);
	assert_eq!(store.calls().delete, 0);
}

#[tokio::test]
async fn test_confirmed_delete_clears_matching_edit() {
	let store = Arc::new(MemoryEntities::with_records([account("a"), account("b")]));
	let crud = controller(&store, Arc::new(AlwaysConfirm));

	crud.start_editing(account("a"));
	assert_eq!(crud.handle_delete(&account("b")).await.unwrap(), DeleteOutcome::Deleted);
	assert_eq!(crud.editing_entity().map(|a| a.id), Some("a".to_string()), "unrelated delete keeps the edit");

	assert_eq!(crud.handle_delete(&account("a")).await.unwrap(), DeleteOutcome::Deleted);
	assert_eq!(crud.editing_entity(), None);
	assert!(store.records().is_empty());
	assert_eq!(store.calls().delete, 2);
}

#[tokio::test]
async fn test_delete_of_missing_record_reports_error() {
	let store = Arc::new(MemoryEntities::<Account>::new());
	let crud = controller(&store, Arc::new(AlwaysConfirm));

	let err = crud.handle_delete(&account("ghost")).await.unwrap_err();
	assert!(matches!(err.gateway_error(), Some(GatewayError::NotFound { .. })));
	assert!(crud.delete_mutation().is_error());
}
