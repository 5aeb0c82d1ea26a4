//! Server-preload query variant.
//!
//! Stage one performs an eager cache read-or-populate: skipped when the
//! cache already holds data for the derived key, when the input is the
//! skip sentinel, or when the caller disabled the query. Stage two produces
//! the same live binding as the plain binder, except staleness-based
//! refetching is suppressed (infinite stale time) until the host reports
//! the first mount, since preloaded data would otherwise be refetched
//! immediately.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::binder::query::{bind_query_with, build_descriptor, op_type, QueryHandle, QueryOptions};
use crate::cache::{QueryMode, StaleTime};
use crate::key::{derive_query_key, QueryInput};
use crate::path::ProcedurePath;
use crate::reactive::{Lifecycle, Source, Store};
use crate::resolver::{CallArgs, DispatchContext};

/// The second stage of a server-preloaded query: call [`bind`] inside the
/// reactive runtime to get the live handle.
///
/// [`bind`]: ServerQueryStage::bind
pub struct ServerQueryStage {
	ctx: Arc<DispatchContext>,
	path: ProcedurePath,
	args: CallArgs,
	mode: QueryMode,
}

impl ServerQueryStage {
	pub fn bind(self, lifecycle: &Lifecycle) -> QueryHandle {
		let stale = Store::new(StaleTime::Infinite);
		let reset = {
			let stale = Arc::clone(&stale);
			// First mount completed: preloaded data may go stale normally.
			lifecycle.on_mount(move || stale.set(StaleTime::Always))
		};
		let handle = bind_query_with(&self.ctx, self.path, self.args, self.mode, Some(stale));
		handle.push_teardown(reset);
		handle
	}
}

pub(crate) fn preload_query(
	ctx: &Arc<DispatchContext>,
	path: ProcedurePath,
	args: CallArgs,
	mode: QueryMode,
) -> BoxFuture<'static, ServerQueryStage> {
	let ctx = Arc::clone(ctx);
	Box::pin(async move {
		let input = args
			.input
			.as_ref()
			.map_or(QueryInput::None, Source::current);
		let options = args
			.options
			.as_ref()
			.map_or_else(QueryOptions::default, Source::current);

		let enabled = !input.is_skip()
			&& !options.lazy
			&& options.enabled.as_ref().map_or(true, Source::current);

		if enabled {
			let key = derive_query_key(&path, &input, op_type(mode));
			let already_cached = ctx
				.cache
				.find(&key)
				.map_or(false, |entry| entry.data.is_some());
			if !already_cached {
				let descriptor =
					build_descriptor(&ctx, &path, &input, &options, None, None, None, mode);
				match mode {
					QueryMode::Single => ctx.cache.prefetch_query(descriptor).await,
					QueryMode::Infinite => ctx.cache.prefetch_infinite_query(descriptor).await,
				}
			}
		}

		ServerQueryStage {
			ctx,
			path,
			args,
			mode,
		}
	})
}
