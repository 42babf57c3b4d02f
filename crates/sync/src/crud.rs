//! Modal state for create/edit/delete flows over one entity kind.
//!
//! Composes a create, an update and a delete [`Mutation`] with the two bits
//! of UI state a CRUD screen needs: whether the create modal is open and
//! which record is being edited.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use purse_query::QueryClient;
use tracing::{debug, warn};

use crate::error::MutationError;
use crate::gateway::EntityGateway;
use crate::model::Entity;
use crate::mutation::{Mutation, MutationDescriptor, UpdateArgs, create_mutation, delete_mutation, update_mutation};

/// Failure of a confirmation prompt; treated as a declined delete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("confirmation failed: {0}")]
pub struct ConfirmError(pub String);

/// Asks the user whether `entity` should really be deleted.
#[async_trait]
pub trait ConfirmDelete<E>: Send + Sync {
	async fn confirm(&self, entity: &E) -> Result<bool, ConfirmError>;
}

/// Confirms every delete.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

#[async_trait]
impl<E: Sync> ConfirmDelete<E> for AlwaysConfirm {
	async fn confirm(&self, _entity: &E) -> Result<bool, ConfirmError> {
		Ok(true)
	}
}

/// Adapts an async closure into a [`ConfirmDelete`].
pub struct ConfirmWith<F>(pub F);

#[async_trait]
impl<E, F, Fut> ConfirmDelete<E> for ConfirmWith<F>
where
	E: Sync,
	F: Fn(&E) -> Fut + Send + Sync,
	Fut: Future<Output = Result<bool, ConfirmError>> + Send,
{
	async fn confirm(&self, entity: &E) -> Result<bool, ConfirmError> {
		(self.0)(entity).await
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
	Deleted,
	/// The confirmation said no or failed. Nothing was sent.
	Declined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrudUiState<E> {
	pub show_create_modal: bool,
	pub editing_entity: Option<E>,
}

impl<E> Default for CrudUiState<E> {
	fn default() -> Self {
		Self {
			show_create_modal: false,
			editing_entity: None,
		}
	}
}

/// Create/edit/delete controller for records of `E`.
pub struct CrudController<E, C, P> {
	create: Mutation<C, E>,
	update: Mutation<UpdateArgs<P>, E>,
	delete: Mutation<String, ()>,
	confirm: Arc<dyn ConfirmDelete<E>>,
	ui: Mutex<CrudUiState<E>>,
}

impl<E, C, P> std::fmt::Debug for CrudController<E, C, P>
where
	E: std::fmt::Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CrudController").field("ui", &*self.ui.lock()).finish_non_exhaustive()
	}
}

impl<E, C, P> CrudController<E, C, P>
where
	E: Entity,
	C: Clone + Send + Sync + 'static,
	P: Clone + Send + Sync + 'static,
{
	pub fn new(
		create: Mutation<C, E>,
		update: Mutation<UpdateArgs<P>, E>,
		delete: Mutation<String, ()>,
		confirm: Arc<dyn ConfirmDelete<E>>,
	) -> Self {
		Self {
			create,
			update,
			delete,
			confirm,
			ui: Mutex::new(CrudUiState::default()),
		}
	}

	/// Controller over `gateway` with the default descriptors.
	pub fn for_gateway<G>(client: QueryClient, gateway: Arc<G>, confirm: Arc<dyn ConfirmDelete<E>>) -> Self
	where
		G: EntityGateway<E, Create = C, Patch = P>,
	{
		Self::new(
			create_mutation(client.clone(), Arc::clone(&gateway), MutationDescriptor::create_defaults()),
			update_mutation(client.clone(), Arc::clone(&gateway), MutationDescriptor::update_defaults()),
			delete_mutation::<E, G>(client, gateway, MutationDescriptor::delete_defaults::<E>()),
			confirm,
		)
	}

	pub fn create_mutation(&self) -> &Mutation<C, E> {
		&self.create
	}

	pub fn update_mutation(&self) -> &Mutation<UpdateArgs<P>, E> {
		&self.update
	}

	pub fn delete_mutation(&self) -> &Mutation<String, ()> {
		&self.delete
	}

	pub fn ui_state(&self) -> CrudUiState<E> {
		self.ui.lock().clone()
	}

	pub fn show_create_modal(&self) -> bool {
		self.ui.lock().show_create_modal
	}

	pub fn editing_entity(&self) -> Option<E> {
		self.ui.lock().editing_entity.clone()
	}

	pub fn open_create_modal(&self) {
		self.ui.lock().show_create_modal = true;
	}

	/// Closes the create modal and forgets its last error.
	pub fn close_create_modal(&self) {
		self.ui.lock().show_create_modal = false;
		self.create.reset();
	}

	pub fn start_editing(&self, entity: E) {
		self.ui.lock().editing_entity = Some(entity);
	}

	/// Closes the edit modal and forgets its last error.
	pub fn stop_editing(&self) {
		self.ui.lock().editing_entity = None;
		self.update.reset();
	}

	/// Creates a record. Closes the create modal only on success.
	///
	/// On failure the modal stays open, the error stays readable through
	/// [`CrudController::create_mutation`] and is returned as well.
	pub async fn handle_create(&self, input: C) -> Result<E, MutationError> {
		match self.create.mutate_async(input).await {
			Ok(created) => {
				self.ui.lock().show_create_modal = false;
				self.create.reset();
				Ok(created)
			}
			Err(error) => {
				warn!(kind = %E::KIND, %error, "crud.create.failed");
				Err(error)
			}
		}
	}

	/// Updates the record being edited. Closes the edit modal only on success.
	pub async fn handle_update(&self, patch: P) -> Result<E, MutationError> {
		let Some(editing) = self.editing_entity() else {
			return Err(MutationError::NothingSelected);
		};
		match self.update.mutate_async(UpdateArgs::new(editing.id(), patch)).await {
			Ok(updated) => {
				let mut ui = self.ui.lock();
				if ui.editing_entity.as_ref().is_some_and(|e| e.id() == updated.id()) {
					ui.editing_entity = None;
				}
				drop(ui);
				self.update.reset();
				Ok(updated)
			}
			Err(error) => {
				warn!(kind = %E::KIND, id = editing.id(), %error, "crud.update.failed");
				Err(error)
			}
		}
	}

	/// Deletes `entity` once the confirmation agrees.
	///
	/// A declined or failed confirmation sends nothing and is not an error.
	pub async fn handle_delete(&self, entity: &E) -> Result<DeleteOutcome, MutationError> {
		match self.confirm.confirm(entity).await {
			Ok(true) => {}
			Ok(false) => {
				debug!(kind = %E::KIND, id = entity.id(), "crud.delete.declined");
				return Ok(DeleteOutcome::Declined);
			}
			Err(error) => {
				debug!(kind = %E::KIND, id = entity.id(), %error, "crud.delete.confirm_failed");
				return Ok(DeleteOutcome::Declined);
			}
		}

		self.delete.mutate_async(entity.id().to_string()).await?;
		let mut ui = self.ui.lock();
		if ui.editing_entity.as_ref().is_some_and(|e| e.id() == entity.id()) {
			ui.editing_entity = None;
		}
		Ok(DeleteOutcome::Deleted)
	}
}
