//! The consumed reactive query-cache interface.
//!
//! The engine synthesizes [`QueryDescriptor`]s and hands them to the cache;
//! the cache owns all fetch scheduling, deduplication, staleness and error
//! state. Observer primitives accept either a static descriptor or a
//! derived-reactive one (a descriptor store that re-emits when upstream
//! inputs change); a rebuilt descriptor is always observed before any new
//! fetch is triggered from it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::key::QueryKey;
use crate::reactive::{Listener, Source, Unsubscribe};

/// Page-advance direction for infinite queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchDirection {
	Forward,
	Backward,
}

impl FetchDirection {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Forward => "forward",
			Self::Backward => "backward",
		}
	}
}

/// Context the cache supplies to a fetch closure when it runs it.
#[derive(Clone, Debug, Default)]
pub struct FetchContext {
	/// Cursor for the page being requested (infinite queries only).
	pub page_param: Option<Value>,
	pub direction: Option<FetchDirection>,
	/// Abort signal owned by the cache's observer machinery.
	pub abort: Option<CancellationToken>,
}

/// Staleness policy carried on a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StaleTime {
	/// Data is stale immediately; every observer mount refetches.
	Always,
	Millis(u64),
	/// Data never goes stale on its own.
	Infinite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryMode {
	Single,
	Infinite,
}

pub type FetchFn =
	Arc<dyn Fn(FetchContext) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Everything the cache needs to run and identify one query.
#[derive(Clone)]
pub struct QueryDescriptor {
	pub key: QueryKey,
	pub fetch: FetchFn,
	pub enabled: bool,
	pub mode: QueryMode,
	/// Starting cursor for infinite queries.
	pub initial_page_param: Option<Value>,
	pub stale_time: Option<StaleTime>,
}

impl fmt::Debug for QueryDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("QueryDescriptor")
			.field("key", &self.key)
			.field("enabled", &self.enabled)
			.field("mode", &self.mode)
			.field("initial_page_param", &self.initial_page_param)
			.field("stale_time", &self.stale_time)
			.finish_non_exhaustive()
	}
}

pub type MutateFn =
	Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Everything the cache needs to register one mutation.
#[derive(Clone)]
pub struct MutationDescriptor {
	pub key: QueryKey,
	pub mutate: MutateFn,
	/// Invoked by the cache after a successful mutation. The engine always
	/// installs its own wrapper here, never a caller callback directly.
	pub on_success: Option<Arc<dyn Fn(&Value) + Send + Sync>>,
}

impl fmt::Debug for MutationDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MutationDescriptor")
			.field("key", &self.key)
			.finish_non_exhaustive()
	}
}

/// Defaults registered against a mutation key.
#[derive(Clone, Default)]
pub struct MutationDefaults {
	pub mutate: Option<MutateFn>,
	pub meta: Option<Value>,
}

impl MutationDefaults {
	pub fn is_empty(&self) -> bool {
		self.mutate.is_none() && self.meta.is_none()
	}
}

/// A cache entry as seen through `find`.
#[derive(Clone, Debug, Default)]
pub struct CacheEntry {
	pub data: Option<Value>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueryStatus {
	#[default]
	Pending,
	Success,
	Error,
}

/// Live state reported by a query observer.
#[derive(Clone, Debug, Default)]
pub struct QueryObserverState {
	pub status: QueryStatus,
	pub data: Option<Value>,
	pub error: Option<RpcError>,
	/// Key of the descriptor this state belongs to.
	pub key: Option<QueryKey>,
}

/// The cache's live query primitive, bound to one (possibly re-deriving)
/// descriptor.
pub trait QueryObserver: Send + Sync {
	fn state(&self) -> QueryObserverState;
	fn subscribe(&self, listener: Listener<QueryObserverState>) -> Unsubscribe;
	/// Key of the currently observed descriptor.
	fn key(&self) -> QueryKey;
}

/// The cache's mutation primitive.
pub trait MutationObserver: Send + Sync {
	fn key(&self) -> QueryKey;
	fn mutate(&self, input: Option<Value>) -> BoxFuture<'static, Result<Value, RpcError>>;
}

/// The reactive query-cache store, as consumed by the binding engine.
#[async_trait]
pub trait QueryCache: Send + Sync {
	async fn fetch_query(&self, descriptor: QueryDescriptor) -> Result<Value, RpcError>;

	/// Like `fetch_query` but errors are swallowed into cache state.
	async fn prefetch_query(&self, descriptor: QueryDescriptor);

	/// Return cached data if present, otherwise fetch and populate.
	async fn ensure_query_data(&self, descriptor: QueryDescriptor) -> Result<Value, RpcError>;

	async fn fetch_infinite_query(&self, descriptor: QueryDescriptor) -> Result<Value, RpcError>;

	async fn prefetch_infinite_query(&self, descriptor: QueryDescriptor);

	fn invalidate_queries(&self, filter: &QueryKey);

	async fn refetch_queries(&self, filter: &QueryKey);

	fn reset_queries(&self, filter: &QueryKey);

	async fn cancel_queries(&self, filter: &QueryKey);

	fn set_query_data(&self, key: &QueryKey, data: Value);

	fn get_query_data(&self, key: &QueryKey) -> Option<Value>;

	fn set_mutation_defaults(&self, key: &QueryKey, defaults: MutationDefaults);

	/// Number of in-flight mutations matching `filter`.
	fn is_mutating(&self, filter: &QueryKey) -> usize;

	/// Direct cache lookup, bypassing observers.
	fn find(&self, key: &QueryKey) -> Option<CacheEntry>;

	/// Observe a query. The descriptor source may be static or a
	/// derived-reactive store; the observer must re-evaluate on each
	/// emission.
	fn observe_query(&self, descriptor: Source<QueryDescriptor>) -> Arc<dyn QueryObserver>;

	fn observe_mutation(&self, descriptor: MutationDescriptor) -> Arc<dyn MutationObserver>;
}
