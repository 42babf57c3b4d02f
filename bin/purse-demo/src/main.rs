//! Purse demo binary.
//!
//! Runs one dashboard session against the in-memory gateways:
//! - bootstraps the profile scope (or creates a first profile)
//! - aggregates accounts over every selected profile
//! - creates, renames and deletes an account through the CRUD controller

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use purse_query::QueryClient;
use purse_sync::entities::{Account, AccountPatch, NewAccount};
use purse_sync::memory::{MemoryEntities, MemoryProfiles};
use purse_sync::model::{NewProfile, ProfileType};
use purse_sync::{AlwaysConfirm, CrudController, FanOutConfig, ListParams, Profile, ScopeController, ScopedQuery, SyncConfig};
use tracing::info;

/// Demo command line arguments.
#[derive(Parser, Debug)]
#[command(name = "purse-demo")]
#[command(about = "Exercise profile-scoped synchronization against in-memory gateways")]
struct Args {
	/// Configuration file (defaults to the platform config dir)
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,

	/// Number of seeded profiles
	#[arg(short, long, default_value_t = 2)]
	profiles: usize,

	/// Start without profiles to go through first-profile creation
	#[arg(long)]
	empty: bool,
}

fn seed_profiles(count: usize) -> Vec<Profile> {
	(1..=count)
		.map(|n| Profile {
			id: format!("prof-seed-{n}"),
			name: format!("Household {n}"),
			profile_type: if n == 1 { ProfileType::Personal } else { ProfileType::Family },
			default_currency: "EUR".to_string(),
			is_active: true,
		})
		.collect()
}

fn seed_accounts(profiles: &[Profile]) -> Vec<Account> {
	profiles
		.iter()
		.enumerate()
		.flat_map(|(n, profile)| {
			(1..=n + 1).map(move |m| Account {
				id: format!("acc-seed-{}-{m}", n + 1),
				profile_id: profile.id.clone(),
				name: format!("{} account {m}", profile.name),
				currency: profile.default_currency.clone(),
				balance: 10_000 * m as i64,
			})
		})
		.collect()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let config = match args.config.or_else(SyncConfig::default_path) {
		Some(path) => SyncConfig::load(&path).with_context(|| format!("loading {}", path.display()))?,
		None => SyncConfig::default(),
	};
	info!(page_size = config.page_size, "Starting purse-demo");

	let profiles = if args.empty { Vec::new() } else { seed_profiles(args.profiles) };
	let client = QueryClient::new(config.cache.clone());
	let profile_gateway = Arc::new(MemoryProfiles::new(profiles.clone(), None));
	let scope = ScopeController::new(profile_gateway, client.clone(), config.scope.clone());

	let snapshot = scope.bootstrap().await?;
	info!(phase = ?snapshot.phase, profiles = snapshot.profiles.len(), "scope bootstrapped");
	if scope.requires_creation() {
		let created = scope
			.create_first_profile(NewProfile {
				name: "My finances".to_string(),
				profile_type: ProfileType::Personal,
				default_currency: "EUR".to_string(),
			})
			.await?;
		info!(profile_id = %created.id, "created first profile");
	}
	scope.set_active_profiles(scope.profiles().into_iter().map(|p| p.id));
	scope.settle().await;
	info!(main = ?scope.main_profile_id(), selected = ?scope.active_profile_list(), "scope ready");

	let accounts = Arc::new(MemoryEntities::with_records(seed_accounts(&scope.profiles())));
	let list = ScopedQuery::new(
		client.clone(),
		FanOutConfig::for_gateway(Arc::clone(&accounts)),
		ListParams::default().with_page_size(config.page_size),
	);
	let merged = list.load(&scope.active_profile_list()).await;
	info!(items = merged.items.len(), total = merged.total, "accounts loaded");

	let crud = CrudController::for_gateway(client.clone(), Arc::clone(&accounts), Arc::new(AlwaysConfirm));
	let main = scope.require_main_profile()?;
	crud.open_create_modal();
	let created = crud
		.handle_create(NewAccount {
			profile_id: main,
			name: "Emergency fund".to_string(),
			currency: "EUR".to_string(),
			balance: 0,
		})
		.await?;
	info!(id = %created.id, "account created");

	crud.start_editing(created.clone());
	let renamed = crud
		.handle_update(AccountPatch {
			name: Some("Rainy day fund".to_string()),
			..AccountPatch::default()
		})
		.await?;
	info!(id = %renamed.id, name = %renamed.name, "account renamed");

	let merged = list.result(&scope.active_profile_list());
	info!(items = merged.items.len(), total = merged.total, "accounts after create");
	for account in &merged.items {
		info!(profile = %account.profile_id, name = %account.name, balance = account.balance, "account");
	}

	let outcome = crud.handle_delete(&renamed).await?;
	let merged = list.result(&scope.active_profile_list());
	info!(?outcome, items = merged.items.len(), total = merged.total, "accounts after delete");

	list.release();
	scope.sign_out();
	Ok(())
}
