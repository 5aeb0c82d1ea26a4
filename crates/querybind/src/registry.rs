//! The meta-operation registry: the closed set of names the path resolver
//! recognizes as terminal, and the dispatch table from each name to its
//! binder factory.

use std::sync::Arc;

use crate::batch::BatchProxy;
use crate::binder::mutation::bind_mutation;
use crate::binder::query::bind_query;
use crate::binder::server::preload_query;
use crate::binder::subscription::bind_subscription;
use crate::cache::QueryMode;
use crate::key::{derive_query_key, OperationType, QueryInput};
use crate::path::ProcedurePath;
use crate::reactive::Source;
use crate::resolver::{CallArgs, DispatchContext, DispatchResult};
use crate::utils::UtilsProxy;

/// A recognized meta-operation name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaOp {
	CreateQuery,
	CreateInfiniteQuery,
	CreateMutation,
	CreateSubscription,
	CreateServerQuery,
	CreateServerInfiniteQuery,
	CreateQueries,
	CreateUtils,
	GetQueryKey,
}

impl MetaOp {
	pub fn parse(segment: &str) -> Option<Self> {
		Some(match segment {
			"create_query" => Self::CreateQuery,
			"create_infinite_query" => Self::CreateInfiniteQuery,
			"create_mutation" => Self::CreateMutation,
			"create_subscription" => Self::CreateSubscription,
			"create_server_query" => Self::CreateServerQuery,
			"create_server_infinite_query" => Self::CreateServerInfiniteQuery,
			"create_queries" => Self::CreateQueries,
			"create_utils" => Self::CreateUtils,
			"get_query_key" => Self::GetQueryKey,
			_ => return None,
		})
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::CreateQuery => "create_query",
			Self::CreateInfiniteQuery => "create_infinite_query",
			Self::CreateMutation => "create_mutation",
			Self::CreateSubscription => "create_subscription",
			Self::CreateServerQuery => "create_server_query",
			Self::CreateServerInfiniteQuery => "create_server_infinite_query",
			Self::CreateQueries => "create_queries",
			Self::CreateUtils => "create_utils",
			Self::GetQueryKey => "get_query_key",
		}
	}

	/// Whether this operation is only valid at the tree root.
	pub fn root_only(self) -> bool {
		matches!(self, Self::CreateQueries | Self::CreateUtils)
	}
}

/// Invoke the factory registered for `op` with the remaining path and the
/// original call arguments.
pub(crate) fn dispatch(
	ctx: &Arc<DispatchContext>,
	op: MetaOp,
	path: ProcedurePath,
	args: CallArgs,
) -> DispatchResult {
	if op.root_only() && !path.is_empty() {
		tracing::warn!(
			target: "querybind::dispatch",
			op = op.as_str(),
			path = %path,
			"meta-operation is only valid at the tree root"
		);
		return DispatchResult::Unsupported;
	}

	match op {
		MetaOp::CreateQuery => {
			DispatchResult::Query(bind_query(ctx, path, args, QueryMode::Single))
		}
		MetaOp::CreateInfiniteQuery => {
			DispatchResult::Query(bind_query(ctx, path, args, QueryMode::Infinite))
		}
		MetaOp::CreateMutation => DispatchResult::Mutation(bind_mutation(ctx, path, args)),
		MetaOp::CreateSubscription => {
			DispatchResult::Subscription(bind_subscription(ctx, path, args))
		}
		MetaOp::CreateServerQuery => {
			DispatchResult::ServerQuery(preload_query(ctx, path, args, QueryMode::Single))
		}
		MetaOp::CreateServerInfiniteQuery => {
			DispatchResult::ServerQuery(preload_query(ctx, path, args, QueryMode::Infinite))
		}
		MetaOp::CreateQueries => DispatchResult::Queries(BatchProxy::new(Arc::clone(ctx))),
		MetaOp::CreateUtils => DispatchResult::Utils(UtilsProxy::new(Arc::clone(ctx))),
		MetaOp::GetQueryKey => {
			let input = args
				.input
				.as_ref()
				.map_or(QueryInput::None, Source::current);
			let ty = args.key_type.unwrap_or(OperationType::Any);
			DispatchResult::Key(derive_query_key(&path, &input, ty))
		}
	}
}
