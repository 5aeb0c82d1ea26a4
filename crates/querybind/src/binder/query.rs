//! Query and infinite-query binding.
//!
//! The static branch derives one key and one descriptor up front. The
//! reactive branch combines `[input, options, enabled, gate, stale]` slots
//! into a derived descriptor store: every upstream emission re-derives the
//! key and rebuilds the descriptor (re-wiring the fetch closure), and the
//! cache's observer primitive re-evaluates from the store. Blank slots fall
//! back to the value captured at bind time, not to "absent".

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::cache::{
	FetchContext, FetchFn, QueryCache, QueryDescriptor, QueryMode, QueryObserver,
	QueryObserverState, StaleTime,
};
use crate::client::CallOptions;
use crate::key::{derive_query_key, OperationType, QueryInput, QueryKey};
use crate::path::ProcedurePath;
use crate::reactive::{derived, Observable, Slot, Source, Store, Unsubscribe};
use crate::resolver::{CallArgs, DispatchContext};

/// Caller-supplied options for a query binding.
#[derive(Clone, Default)]
pub struct QueryOptions {
	/// Suppress execution until the handle's activator is invoked.
	pub lazy: bool,
	/// Caller-controlled enable gate; may itself be reactive.
	pub enabled: Option<Source<bool>>,
	/// Per-call override of the adapter-wide abort-on-teardown default.
	pub abort_on_unmount: Option<bool>,
	/// Starting cursor for infinite queries. Defaults to JSON null.
	pub initial_cursor: Option<Value>,
	pub stale_time: Option<StaleTime>,
}

impl QueryOptions {
	pub fn lazy() -> Self {
		Self {
			lazy: true,
			..Self::default()
		}
	}

	pub fn with_enabled(mut self, enabled: Source<bool>) -> Self {
		self.enabled = Some(enabled);
		self
	}

	pub fn with_abort_on_unmount(mut self, abort: bool) -> Self {
		self.abort_on_unmount = Some(abort);
		self
	}

	pub fn with_initial_cursor(mut self, cursor: Value) -> Self {
		self.initial_cursor = Some(cursor);
		self
	}

	pub fn with_stale_time(mut self, stale_time: StaleTime) -> Self {
		self.stale_time = Some(stale_time);
		self
	}
}

pub(crate) fn op_type(mode: QueryMode) -> OperationType {
	match mode {
		QueryMode::Single => OperationType::Query,
		QueryMode::Infinite => OperationType::Infinite,
	}
}

/// Build one cache-query descriptor for `(path, input, options)`.
///
/// The fetch closure re-resolves the live leaf on the underlying client at
/// every run and, for infinite queries, merges the page cursor/direction
/// supplied by the cache into the forwarded input.
#[allow(clippy::too_many_arguments)]
pub(crate) fn build_descriptor(
	ctx: &Arc<DispatchContext>,
	path: &ProcedurePath,
	input: &QueryInput,
	options: &QueryOptions,
	enabled_override: Option<bool>,
	gate: Option<bool>,
	stale_override: Option<StaleTime>,
	mode: QueryMode,
) -> QueryDescriptor {
	let key = derive_query_key(path, input, op_type(mode));

	let enabled = !input.is_skip()
		&& enabled_override
			.unwrap_or_else(|| options.enabled.as_ref().map_or(true, Source::current))
		&& gate.unwrap_or(true);

	let forward_abort = options
		.abort_on_unmount
		.unwrap_or(ctx.defaults.abort_on_unmount);

	let client = Arc::clone(&ctx.client);
	let fetch_path = path.clone();
	let fetch_input = input.as_value().cloned();
	let fetch: FetchFn = Arc::new(move |fetch_ctx: FetchContext| {
		let client = Arc::clone(&client);
		let path = fetch_path.clone();

		let forwarded = if mode == QueryMode::Infinite {
			let mut object = match fetch_input.clone() {
				Some(Value::Object(map)) => map,
				_ => Map::new(),
			};
			if let Some(cursor) = fetch_ctx.page_param.clone() {
				object.insert("cursor".to_owned(), cursor);
			}
			if let Some(direction) = fetch_ctx.direction {
				object.insert(
					"direction".to_owned(),
					Value::String(direction.as_str().to_owned()),
				);
			}
			if object.is_empty() && fetch_input.is_none() {
				None
			} else {
				Some(Value::Object(object))
			}
		} else {
			fetch_input.clone()
		};

		let options = CallOptions {
			abort: forward_abort.then(|| fetch_ctx.abort.clone()).flatten(),
		};
		Box::pin(async move { client.query(&path, forwarded, options).await })
	});

	QueryDescriptor {
		key,
		fetch,
		enabled,
		mode,
		initial_page_param: (mode == QueryMode::Infinite)
			.then(|| options.initial_cursor.clone().unwrap_or(Value::Null)),
		stale_time: stale_override.or(options.stale_time),
	}
}

/// Activates a lazily bound query, optionally seeding the cache first.
#[derive(Clone)]
pub struct LazyActivator {
	cache: Arc<dyn QueryCache>,
	gate: Arc<Store<bool>>,
	base_key: QueryKey,
}

impl LazyActivator {
	/// Await `seed` (if supplied), write it at the pre-activation base key,
	/// then flip the enable gate. The query stays disabled until the seed
	/// has resolved.
	pub async fn activate(&self, seed: Option<BoxFuture<'static, Value>>) {
		if let Some(seed) = seed {
			let value = seed.await;
			self.cache.set_query_data(&self.base_key, value);
		}
		self.gate.set(true);
	}

	/// Flip the gate without seeding.
	pub fn activate_now(&self) {
		self.gate.set(true);
	}
}

/// A cache-bound reactive query handle.
pub struct QueryHandle {
	observer: Arc<dyn QueryObserver>,
	key: QueryKey,
	activator: Option<LazyActivator>,
	teardown: Mutex<Vec<Unsubscribe>>,
}

impl QueryHandle {
	pub fn observer(&self) -> &Arc<dyn QueryObserver> {
		&self.observer
	}

	pub fn state(&self) -> QueryObserverState {
		self.observer.state()
	}

	/// Key derived at bind time, before any reactive override applied.
	pub fn key(&self) -> &QueryKey {
		&self.key
	}

	/// Key of the descriptor currently observed by the cache.
	pub fn current_key(&self) -> QueryKey {
		self.observer.key()
	}

	/// Present only for lazy bindings.
	pub fn activator(&self) -> Option<LazyActivator> {
		self.activator.clone()
	}

	pub(crate) fn push_teardown(&self, unsubscribe: Unsubscribe) {
		self.teardown.lock().push(unsubscribe);
	}

	/// Detach from all upstream reactive sources.
	pub fn teardown(&self) {
		for unsubscribe in self.teardown.lock().drain(..) {
			unsubscribe();
		}
	}
}

impl Drop for QueryHandle {
	fn drop(&mut self) {
		for unsubscribe in self.teardown.get_mut().drain(..) {
			unsubscribe();
		}
	}
}

#[derive(Clone)]
enum BindSignal {
	Input(QueryInput),
	Options(QueryOptions),
	Enabled(bool),
	Gate(bool),
	Stale(StaleTime),
}

pub(crate) fn bind_query(
	ctx: &Arc<DispatchContext>,
	path: ProcedurePath,
	args: CallArgs,
	mode: QueryMode,
) -> QueryHandle {
	bind_query_with(ctx, path, args, mode, None)
}

/// Full binding entry point. `stale` is an internal override store used by
/// the server-preload variant to suppress refetches until first mount.
pub(crate) fn bind_query_with(
	ctx: &Arc<DispatchContext>,
	path: ProcedurePath,
	args: CallArgs,
	mode: QueryMode,
	stale: Option<Arc<Store<StaleTime>>>,
) -> QueryHandle {
	let input_source = args
		.input
		.unwrap_or_else(|| Source::Value(QueryInput::None));
	let options_source = args
		.options
		.unwrap_or_else(|| Source::Value(QueryOptions::default()));
	let initial_input = input_source.current();
	let initial_options = options_source.current();

	// Lazy seeding writes here: the key of the pre-activation input,
	// ignoring any reactive override that has not applied yet.
	let base_key = derive_query_key(&path, &initial_input, op_type(mode));

	let gate = initial_options.lazy.then(|| Store::new(false));
	let enabled_source = initial_options.enabled.clone();

	let reactive = input_source.is_reactive()
		|| options_source.is_reactive()
		|| enabled_source.as_ref().map_or(false, Source::is_reactive)
		|| gate.is_some()
		|| stale.is_some();

	if !reactive {
		let descriptor = build_descriptor(
			ctx,
			&path,
			&initial_input,
			&initial_options,
			None,
			None,
			None,
			mode,
		);
		let observer = ctx.cache.observe_query(Source::Value(descriptor));
		return QueryHandle {
			observer,
			key: base_key,
			activator: None,
			teardown: Mutex::new(Vec::new()),
		};
	}

	let sources: Vec<Option<Source<BindSignal>>> = vec![
		Some(input_source.map(|input| BindSignal::Input(input.clone()))),
		Some(options_source.map(|options| BindSignal::Options(options.clone()))),
		enabled_source
			.as_ref()
			.map(|source| source.map(|enabled| BindSignal::Enabled(*enabled))),
		gate.as_ref().map(|store| {
			Source::observable(Arc::clone(store) as Arc<dyn Observable<bool>>)
				.map(|gate| BindSignal::Gate(*gate))
		}),
		stale.as_ref().map(|store| {
			Source::observable(Arc::clone(store) as Arc<dyn Observable<StaleTime>>)
				.map(|stale| BindSignal::Stale(*stale))
		}),
	];

	let combine_ctx = Arc::clone(ctx);
	let combine_path = path.clone();
	let fallback_input = initial_input.clone();
	let fallback_options = initial_options.clone();
	let (descriptors, teardown) = derived(sources, move |slots: &[Slot<BindSignal>]| {
		let mut input = fallback_input.clone();
		let mut options = fallback_options.clone();
		let mut enabled_override = None;
		let mut gate = None;
		let mut stale = None;
		for slot in slots {
			match slot {
				Slot::Blank => {}
				Slot::Filled(BindSignal::Input(value)) => input = value.clone(),
				Slot::Filled(BindSignal::Options(value)) => options = value.clone(),
				Slot::Filled(BindSignal::Enabled(value)) => enabled_override = Some(*value),
				Slot::Filled(BindSignal::Gate(value)) => gate = Some(*value),
				Slot::Filled(BindSignal::Stale(value)) => stale = Some(*value),
			}
		}
		build_descriptor(
			&combine_ctx,
			&combine_path,
			&input,
			&options,
			enabled_override,
			gate,
			stale,
			mode,
		)
	});

	let observer = ctx
		.cache
		.observe_query(Source::observable(descriptors as Arc<dyn Observable<QueryDescriptor>>));

	let activator = gate.map(|gate| LazyActivator {
		cache: Arc::clone(&ctx.cache),
		gate,
		base_key: base_key.clone(),
	});

	QueryHandle {
		observer,
		key: base_key,
		activator,
		teardown: Mutex::new(vec![teardown]),
	}
}
