//! The batch-query tree: a query-only tree-walker whose leaf invocations
//! build descriptors without executing anything, plus the combinator that
//! issues them together.

use std::sync::Arc;

use serde_json::Value;

use crate::binder::query::{build_descriptor, QueryOptions};
use crate::cache::{QueryDescriptor, QueryMode, QueryObserver, QueryObserverState};
use crate::key::QueryInput;
use crate::path::ProcedurePath;
use crate::reactive::Source;
use crate::resolver::DispatchContext;

/// A node of the batch-query tree. Leaves expose only [`query`](Self::query).
#[derive(Clone)]
pub struct BatchProxy {
	ctx: Arc<DispatchContext>,
	path: ProcedurePath,
}

impl BatchProxy {
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

	/// Leaf invocation: build the cache-query descriptor for later
	/// aggregation. Executes nothing.
	pub fn query(&self, input: QueryInput, options: QueryOptions) -> QueryDescriptor {
		build_descriptor(
			&self.ctx,
			&self.path,
			&input,
			&options,
			None,
			None,
			None,
			QueryMode::Single,
		)
	}
}

pub type FoldFn = Arc<dyn Fn(&[QueryObserverState]) -> Value + Send + Sync>;

/// Observers for a batch of query descriptors, with an optional fold over
/// their combined results.
pub struct BatchHandle {
	observers: Vec<Arc<dyn QueryObserver>>,
	fold: Option<FoldFn>,
}

impl BatchHandle {
	pub fn len(&self) -> usize {
		self.observers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.observers.is_empty()
	}

	pub fn observers(&self) -> &[Arc<dyn QueryObserver>] {
		&self.observers
	}

	/// Per-descriptor states, in the order the descriptors were built.
	pub fn states(&self) -> Vec<QueryObserverState> {
		self.observers.iter().map(|observer| observer.state()).collect()
	}

	/// Folded result, when a fold was supplied.
	pub fn combined(&self) -> Option<Value> {
		self.fold.as_ref().map(|fold| fold(&self.states()))
	}
}

pub(crate) fn bind_queries(
	ctx: &Arc<DispatchContext>,
	descriptors: Vec<QueryDescriptor>,
	fold: Option<FoldFn>,
) -> BatchHandle {
	let observers = descriptors
		.into_iter()
		.map(|descriptor| ctx.cache.observe_query(Source::Value(descriptor)))
		.collect();
	BatchHandle { observers, fold }
}
