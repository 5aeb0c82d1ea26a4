//! The path resolver: a lazy tree-walker over the virtual procedure tree.
//!
//! Property access accumulates path segments without doing any work; an
//! invocation pops the final segment and checks it against the
//! meta-operation registry. Matched segments dispatch into a binder with
//! the remaining path; unmatched `query`/`mutate`/`subscribe` segments
//! forward the call verbatim to the underlying client at the accumulated
//! path. Genuinely unhandled combinations log and resolve to
//! [`DispatchResult::Unsupported`], never a panic, since a well-typed
//! caller is expected to never reach that branch.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::batch::BatchProxy;
use crate::binder::mutation::MutationHandle;
use crate::binder::query::{QueryHandle, QueryOptions};
use crate::binder::server::ServerQueryStage;
use crate::binder::subscription::SubscriptionHandle;
use crate::cache::QueryCache;
use crate::client::{CallOptions, ProcedureClient, SubscriptionGuard, SubscriptionHandlers};
use crate::error::RpcError;
use crate::key::{OperationType, QueryInput, QueryKey};
use crate::path::ProcedurePath;
use crate::reactive::{Observable, Source};
use crate::registry::{self, MetaOp};
use crate::utils::UtilsProxy;

/// Adapter-wide defaults, owned by the caller and threaded through every
/// dispatch.
#[derive(Clone, Default)]
pub struct BindingDefaults {
	/// Forward abort signals into fetches unless overridden per call.
	pub abort_on_unmount: bool,
	/// Optional diagnostic hook fired for every cache invalidation issued
	/// through the cache-control tree.
	pub invalidation_log: Option<Arc<dyn Fn(&QueryKey) + Send + Sync>>,
}

impl fmt::Debug for BindingDefaults {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BindingDefaults")
			.field("abort_on_unmount", &self.abort_on_unmount)
			.field("invalidation_log", &self.invalidation_log.is_some())
			.finish()
	}
}

/// State threaded through one leaf resolution.
pub(crate) struct DispatchContext {
	pub client: Arc<dyn ProcedureClient>,
	pub cache: Arc<dyn QueryCache>,
	pub defaults: BindingDefaults,
}

/// Arguments of one dispatcher invocation. Each binder reads the fields it
/// needs; the rest are ignored.
#[derive(Clone, Default)]
pub struct CallArgs {
	pub input: Option<Source<QueryInput>>,
	pub options: Option<Source<QueryOptions>>,
	pub handlers: Option<SubscriptionHandlers>,
	pub on_success: Option<Arc<dyn Fn(&Value) + Send + Sync>>,
	pub call_options: Option<CallOptions>,
	/// Requested key type for `get_query_key`.
	pub key_type: Option<OperationType>,
}

impl CallArgs {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_input(mut self, input: impl Into<QueryInput>) -> Self {
		self.input = Some(Source::Value(input.into()));
		self
	}

	pub fn with_input_source(mut self, input: Arc<dyn Observable<QueryInput>>) -> Self {
		self.input = Some(Source::observable(input));
		self
	}

	pub fn with_options(mut self, options: QueryOptions) -> Self {
		self.options = Some(Source::Value(options));
		self
	}

	pub fn with_options_source(mut self, options: Arc<dyn Observable<QueryOptions>>) -> Self {
		self.options = Some(Source::observable(options));
		self
	}

	pub fn with_handlers(mut self, handlers: SubscriptionHandlers) -> Self {
		self.handlers = Some(handlers);
		self
	}

	pub fn with_on_success(mut self, on_success: impl Fn(&Value) + Send + Sync + 'static) -> Self {
		self.on_success = Some(Arc::new(on_success));
		self
	}

	pub fn with_call_options(mut self, call_options: CallOptions) -> Self {
		self.call_options = Some(call_options);
		self
	}

	pub fn with_key_type(mut self, key_type: OperationType) -> Self {
		self.key_type = Some(key_type);
		self
	}
}

/// The outcome of one dispatcher invocation.
pub enum DispatchResult {
	Query(QueryHandle),
	ServerQuery(BoxFuture<'static, ServerQueryStage>),
	Mutation(MutationHandle),
	Subscription(SubscriptionHandle),
	Utils(UtilsProxy),
	Queries(BatchProxy),
	Key(QueryKey),
	/// A plain remote-procedure invocation, forwarded verbatim.
	Forward(BoxFuture<'static, Result<Value, RpcError>>),
	/// A raw subscription, forwarded verbatim.
	ForwardSubscription(SubscriptionGuard),
	/// The meta-operation cannot apply at this path; logged, never thrown.
	Unsupported,
}

impl DispatchResult {
	pub fn into_query(self) -> Option<QueryHandle> {
		match self {
			Self::Query(handle) => Some(handle),
			_ => None,
		}
	}

	pub fn into_server_query(self) -> Option<BoxFuture<'static, ServerQueryStage>> {
		match self {
			Self::ServerQuery(stage) => Some(stage),
			_ => None,
		}
	}

	pub fn into_mutation(self) -> Option<MutationHandle> {
		match self {
			Self::Mutation(handle) => Some(handle),
			_ => None,
		}
	}

	pub fn into_subscription(self) -> Option<SubscriptionHandle> {
		match self {
			Self::Subscription(handle) => Some(handle),
			_ => None,
		}
	}

	pub fn into_utils(self) -> Option<UtilsProxy> {
		match self {
			Self::Utils(utils) => Some(utils),
			_ => None,
		}
	}

	pub fn into_key(self) -> Option<QueryKey> {
		match self {
			Self::Key(key) => Some(key),
			_ => None,
		}
	}

	pub fn into_forward(self) -> Option<BoxFuture<'static, Result<Value, RpcError>>> {
		match self {
			Self::Forward(future) => Some(future),
			_ => None,
		}
	}

	pub fn is_unsupported(&self) -> bool {
		matches!(self, Self::Unsupported)
	}
}

/// A node of the virtual procedure tree. Cheap to create; no work happens
/// until [`call`](Self::call).
#[derive(Clone)]
pub struct ProcedureProxy {
	ctx: Arc<DispatchContext>,
	path: ProcedurePath,
}

impl ProcedureProxy {
	pub(crate) fn new(ctx: Arc<DispatchContext>) -> Self {
		Self {
			ctx,
			path: ProcedurePath::root(),
		}
	}

	/// Property access: extend the accumulated path.
	pub fn get(&self, segment: &str) -> Self {
		Self {
			ctx: Arc::clone(&self.ctx),
			path: self.path.child(segment),
		}
	}

	/// The `_def` escape hatch: the accumulated path of this node, used by
	/// the standalone key-lookup utility to recover a path from a leaf
	/// reference.
	pub fn path(&self) -> &ProcedurePath {
		&self.path
	}

	/// Invocation: resolve the final segment against the meta-operation
	/// registry, or forward the call as a plain procedure invocation.
	pub fn call(&self, args: CallArgs) -> DispatchResult {
		let mut path = self.path.clone();
		let Some(segment) = path.pop() else {
			tracing::warn!(
				target: "querybind::dispatch",
				"invocation on the bare root has no segment to resolve"
			);
			return DispatchResult::Unsupported;
		};

		if let Some(op) = MetaOp::parse(&segment) {
			return registry::dispatch(&self.ctx, op, path, args);
		}

		// Not a meta-operation: the popped segment is part of the live
		// procedure path and selects the transport method.
		let input = args
			.input
			.as_ref()
			.map_or(QueryInput::None, Source::current);
		let call_options = args.call_options.clone().unwrap_or_default();
		match segment.as_str() {
			"query" => {
				let client = Arc::clone(&self.ctx.client);
				let forwarded = input.as_value().cloned();
				DispatchResult::Forward(Box::pin(async move {
					client.query(&path, forwarded, call_options).await
				}))
			}
			"mutate" => {
				let client = Arc::clone(&self.ctx.client);
				let forwarded = input.as_value().cloned();
				DispatchResult::Forward(Box::pin(async move {
					client.mutate(&path, forwarded, call_options).await
				}))
			}
			"subscribe" => {
				let handlers = args
					.handlers
					.unwrap_or_else(|| SubscriptionHandlers::on_data(|_| {}));
				DispatchResult::ForwardSubscription(self.ctx.client.subscribe(
					&path,
					input.as_value().cloned(),
					handlers,
				))
			}
			other => {
				tracing::warn!(
					target: "querybind::dispatch",
					segment = other,
					path = %self.path,
					"unhandled invocation; resolving to unsupported"
				);
				DispatchResult::Unsupported
			}
		}
	}
}
