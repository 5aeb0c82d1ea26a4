//! The cache-control ("utils") tree: a second lazy tree-walker whose
//! terminal operations manipulate the cache at the accumulated path instead
//! of resolving procedures.
//!
//! Key types per operation: `fetch`/`ensure_data`/`prefetch`/`get_data`/
//! `set_data` derive query-typed keys; the `*_infinite` variants derive
//! infinite-typed keys; `invalidate`/`refetch`/`reset`/`cancel` and the
//! mutation operations derive `Any`-typed keys so they match every entry
//! under the path regardless of input or shape.

use std::sync::Arc;

use serde_json::Value;

use crate::binder::query::{build_descriptor, QueryOptions};
use crate::cache::{MutationDefaults, QueryDescriptor, QueryMode};
use crate::client::ProcedureClient;
use crate::error::RpcError;
use crate::key::{derive_mutation_key, derive_query_key, OperationType, QueryInput, QueryKey};
use crate::path::ProcedurePath;
use crate::resolver::DispatchContext;

/// A node of the cache-control tree.
#[derive(Clone)]
pub struct UtilsProxy {
	ctx: Arc<DispatchContext>,
	path: ProcedurePath,
}

impl UtilsProxy {
	pub(crate) fn new(ctx: Arc<DispatchContext>) -> Self {
		Self {
			ctx,
			path: ProcedurePath::root(),
		}
	}

	pub fn get(&self, segment: &str) -> Self {
		Self {
			ctx: Arc::clone(&self.ctx),
			path: self.path.child(segment),
		}
	}

	pub fn path(&self) -> &ProcedurePath {
		&self.path
	}

	/// Bare root access: the underlying remote-procedure client handle.
	pub fn client(&self) -> Arc<dyn ProcedureClient> {
		Arc::clone(&self.ctx.client)
	}

	/// `Any`-typed filter over this path; matches every cached entry below
	/// it when the input is absent.
	fn filter(&self, input: &QueryInput) -> QueryKey {
		derive_query_key(&self.path, input, OperationType::Any)
	}

	fn descriptor(
		&self,
		input: &QueryInput,
		mode: QueryMode,
		initial_cursor: Option<Value>,
	) -> QueryDescriptor {
		let options = QueryOptions {
			initial_cursor,
			..QueryOptions::default()
		};
		build_descriptor(&self.ctx, &self.path, input, &options, None, None, None, mode)
	}

	pub async fn fetch(&self, input: QueryInput) -> Result<Value, RpcError> {
		let descriptor = self.descriptor(&input, QueryMode::Single, None);
		self.ctx.cache.fetch_query(descriptor).await
	}

	pub async fn prefetch(&self, input: QueryInput) {
		let descriptor = self.descriptor(&input, QueryMode::Single, None);
		self.ctx.cache.prefetch_query(descriptor).await;
	}

	pub async fn ensure_data(&self, input: QueryInput) -> Result<Value, RpcError> {
		let descriptor = self.descriptor(&input, QueryMode::Single, None);
		self.ctx.cache.ensure_query_data(descriptor).await
	}

	pub async fn fetch_infinite(
		&self,
		input: QueryInput,
		initial_cursor: Option<Value>,
	) -> Result<Value, RpcError> {
		let descriptor = self.descriptor(&input, QueryMode::Infinite, initial_cursor);
		self.ctx.cache.fetch_infinite_query(descriptor).await
	}

	pub async fn prefetch_infinite(&self, input: QueryInput, initial_cursor: Option<Value>) {
		let descriptor = self.descriptor(&input, QueryMode::Infinite, initial_cursor);
		self.ctx.cache.prefetch_infinite_query(descriptor).await;
	}

	pub fn invalidate(&self, input: &QueryInput) {
		let filter = self.filter(input);
		tracing::trace!(
			target: "querybind::invalidate",
			path = %self.path,
			key = %filter.to_value(),
			"invalidating queries"
		);
		if let Some(log) = &self.ctx.defaults.invalidation_log {
			log(&filter);
		}
		self.ctx.cache.invalidate_queries(&filter);
	}

	pub async fn refetch(&self, input: &QueryInput) {
		self.ctx.cache.refetch_queries(&self.filter(input)).await;
	}

	pub fn reset(&self, input: &QueryInput) {
		self.ctx.cache.reset_queries(&self.filter(input));
	}

	pub async fn cancel(&self, input: &QueryInput) {
		self.ctx.cache.cancel_queries(&self.filter(input)).await;
	}

	pub fn set_data(&self, input: &QueryInput, data: Value) {
		let key = derive_query_key(&self.path, input, OperationType::Query);
		self.ctx.cache.set_query_data(&key, data);
	}

	pub fn get_data(&self, input: &QueryInput) -> Option<Value> {
		let key = derive_query_key(&self.path, input, OperationType::Query);
		self.ctx.cache.get_query_data(&key)
	}

	pub fn set_infinite_data(&self, input: &QueryInput, data: Value) {
		let key = derive_query_key(&self.path, input, OperationType::Infinite);
		self.ctx.cache.set_query_data(&key, data);
	}

	pub fn get_infinite_data(&self, input: &QueryInput) -> Option<Value> {
		let key = derive_query_key(&self.path, input, OperationType::Infinite);
		self.ctx.cache.get_query_data(&key)
	}

	pub fn set_mutation_defaults(&self, defaults: MutationDefaults) {
		let key = derive_mutation_key(&self.path);
		self.ctx.cache.set_mutation_defaults(&key, defaults);
	}

	/// The underlying cache API cannot faithfully serve this read; callers
	/// get an explicit empty default instead of an error.
	pub fn get_mutation_defaults(&self) -> MutationDefaults {
		tracing::warn!(
			path = %self.path,
			"get_mutation_defaults is not served by the cache API; returning empty defaults"
		);
		MutationDefaults::default()
	}

	pub fn is_mutating(&self) -> usize {
		self.ctx.cache.is_mutating(&derive_mutation_key(&self.path))
	}
}
