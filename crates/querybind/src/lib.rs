//! querybind binds a tree-shaped remote-procedure client to a reactive
//! query-cache layer without per-operation hand-written bindings.
//!
//! The core is the path resolver: a lazy tree-walker that accumulates path
//! segments on property access and, on invocation, classifies the final
//! segment as a meta-operation (fetch, subscribe, mutate, derive-cache-key,
//! cache-control utility, batch query) and synthesizes the matching
//! cache-query descriptor, including reactive re-derivation when inputs or
//! options are observable, lazy activation gating, infinite-pagination
//! cursor merging and abort-signal propagation.
//!
//! The transport client, the query cache and the host reactivity runtime
//! are external collaborators consumed through the traits in [`client`],
//! [`cache`] and [`reactive`].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use querybind::{BindingDefaults, CallArgs, QueryBinding};
//! # use serde_json::json;
//! # fn demo(client: Arc<dyn querybind::ProcedureClient>, cache: Arc<dyn querybind::QueryCache>) {
//! let binding = QueryBinding::new(client, cache, BindingDefaults::default());
//! let handle = binding
//! 	.root()
//! 	.get("todos")
//! 	.get("get")
//! 	.get("create_query")
//! 	.call(CallArgs::new().with_input(json!({ "id": 1 })))
//! 	.into_query()
//! 	.expect("create_query dispatches a query handle");
//! # drop(handle);
//! # }
//! ```

pub mod batch;
pub mod binder;
pub mod cache;
pub mod client;
pub mod error;
pub mod key;
pub mod path;
pub mod reactive;
pub mod registry;
pub mod resolver;
pub mod utils;

use std::sync::Arc;

pub use crate::batch::{BatchHandle, BatchProxy, FoldFn};
pub use crate::binder::mutation::MutationHandle;
pub use crate::binder::query::{LazyActivator, QueryHandle, QueryOptions};
pub use crate::binder::server::ServerQueryStage;
pub use crate::binder::subscription::SubscriptionHandle;
pub use crate::cache::{
	CacheEntry, FetchContext, FetchDirection, MutationDefaults, MutationDescriptor,
	MutationObserver, QueryCache, QueryDescriptor, QueryMode, QueryObserver, QueryObserverState,
	QueryStatus, StaleTime,
};
pub use crate::client::{CallOptions, ProcedureClient, SubscriptionGuard, SubscriptionHandlers};
pub use crate::error::RpcError;
pub use crate::key::{
	derive_mutation_key, derive_query_key, OperationType, QueryInput, QueryKey,
};
pub use crate::path::ProcedurePath;
pub use crate::reactive::{
	derived, Lifecycle, Listener, Observable, Slot, Source, Store, Unsubscribe,
};
pub use crate::resolver::{BindingDefaults, CallArgs, DispatchResult, ProcedureProxy};
pub use crate::utils::UtilsProxy;

use crate::resolver::DispatchContext;

/// The adapter entry point: one per remote-procedure client, reused for the
/// client's lifetime. All handles are caller-owned; there is no ambient
/// singleton.
#[derive(Clone)]
pub struct QueryBinding {
	ctx: Arc<DispatchContext>,
}

impl QueryBinding {
	pub fn new(
		client: Arc<dyn ProcedureClient>,
		cache: Arc<dyn QueryCache>,
		defaults: BindingDefaults,
	) -> Self {
		Self {
			ctx: Arc::new(DispatchContext {
				client,
				cache,
				defaults,
			}),
		}
	}

	/// The root of the virtual procedure tree.
	pub fn root(&self) -> ProcedureProxy {
		ProcedureProxy::new(Arc::clone(&self.ctx))
	}

	/// The root of the cache-control tree.
	pub fn utils(&self) -> UtilsProxy {
		UtilsProxy::new(Arc::clone(&self.ctx))
	}

	/// Build a batch of query descriptors and observe them together,
	/// optionally folding their results into one combined value.
	pub fn create_queries(
		&self,
		build: impl FnOnce(&BatchProxy) -> Vec<QueryDescriptor>,
		fold: Option<FoldFn>,
	) -> BatchHandle {
		let proxy = BatchProxy::new(Arc::clone(&self.ctx));
		let descriptors = build(&proxy);
		batch::bind_queries(&self.ctx, descriptors, fold)
	}
}

/// Standalone key-lookup utility: recover the leaf's path through the
/// resolver's escape hatch and derive its canonical key.
pub fn get_query_key(leaf: &ProcedureProxy, input: &QueryInput, ty: OperationType) -> QueryKey {
	derive_query_key(leaf.path(), input, ty)
}
