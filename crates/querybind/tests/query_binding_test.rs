mod helpers;

use helpers::{MemoryCache, MockClient};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use querybind::{
	derive_query_key, BindingDefaults, CallArgs, FetchContext, FetchDirection, Observable,
	OperationType, ProcedurePath, QueryBinding, QueryCache, QueryInput, QueryMode, QueryOptions,
	Source, Store,
};

fn binding(client: Arc<MockClient>, cache: Arc<MemoryCache>) -> QueryBinding {
	QueryBinding::new(client, cache, BindingDefaults::default())
}

fn todos_get_key(input: Value) -> querybind::QueryKey {
	derive_query_key(
		&ProcedurePath::from_segments(&["todos", "get"]),
		&QueryInput::from(input),
		OperationType::Query,
	)
}

#[tokio::test]
async fn static_binding_derives_the_canonical_key_and_defers_fetching() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(Arc::clone(&client), Arc::clone(&cache));

	let handle = binding
		.root()
		.get("todos")
		.get("get")
		.get("create_query")
		.call(CallArgs::new().with_input(json!({ "id": 1 })))
		.into_query()
		.expect("create_query yields a query handle");

	let expected = todos_get_key(json!({ "id": 1 }));
	assert_eq!(handle.key(), &expected);
	assert_eq!(handle.current_key(), expected);
	assert!(handle.activator().is_none());

	let observed = cache.observed_descriptors();
	assert_eq!(observed.len(), 1);
	assert!(observed[0].enabled);
	assert_eq!(observed[0].mode, QueryMode::Single);
	assert!(observed[0].initial_page_param.is_none());

	// Binding observes; only the cache triggers fetches.
	assert!(client.calls().is_empty());

	let data = cache
		.fetch_query(observed[0].clone())
		.await
		.expect("mock answers");
	assert_eq!(data, json!({ "path": "todos.get", "input": { "id": 1 } }));
	let calls = client.calls_for("todos.get");
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].method, "query");
	assert!(!calls[0].has_abort);
	assert_eq!(cache.get_query_data(&expected), Some(data));
}

#[test]
fn skip_input_disables_the_query_and_reads_as_absent() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(client, Arc::clone(&cache));

	let handle = binding
		.root()
		.get("todos")
		.get("get")
		.get("create_query")
		.call(CallArgs::new().with_input(QueryInput::Skip))
		.into_query()
		.expect("query handle");

	let observed = cache.observed_descriptors();
	assert!(!observed[0].enabled);
	assert_eq!(
		handle.key(),
		&derive_query_key(
			&ProcedurePath::from_segments(&["todos", "get"]),
			&QueryInput::None,
			OperationType::Query,
		)
	);
}

#[test]
fn reactive_input_rederives_the_key_before_any_fetch() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(Arc::clone(&client), Arc::clone(&cache));

	let input = Store::new(QueryInput::from(json!({ "id": 1 })));
	let handle = binding
		.root()
		.get("todos")
		.get("get")
		.get("create_query")
		.call(CallArgs::new().with_input_source(
			input.clone() as Arc<dyn Observable<QueryInput>>
		))
		.into_query()
		.expect("query handle");

	assert_eq!(handle.current_key(), todos_get_key(json!({ "id": 1 })));

	input.set(QueryInput::from(json!({ "id": 2 })));
	assert_eq!(handle.current_key(), todos_get_key(json!({ "id": 2 })));
	assert_eq!(cache.observed_descriptors().len(), 2);
	// Rebuilt descriptors are observed without the binding fetching.
	assert!(client.calls().is_empty());

	handle.teardown();
	input.set(QueryInput::from(json!({ "id": 3 })));
	assert_eq!(handle.current_key(), todos_get_key(json!({ "id": 2 })));
}

#[test]
fn reactive_enabled_flag_toggles_the_descriptor() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(client, Arc::clone(&cache));

	let enabled = Store::new(false);
	let options = QueryOptions::default()
		.with_enabled(Source::observable(enabled.clone() as Arc<dyn Observable<bool>>));
	let handle = binding
		.root()
		.get("todos")
		.get("get")
		.get("create_query")
		.call(
			CallArgs::new()
				.with_input(json!({ "id": 1 }))
				.with_options(options),
		)
		.into_query()
		.expect("query handle");

	assert!(!cache.observed_descriptors()[0].enabled);

	enabled.set(true);
	let observed = cache.observed_descriptors();
	assert!(observed.last().expect("rebuilt descriptor").enabled);
	assert_eq!(handle.current_key(), todos_get_key(json!({ "id": 1 })));
}

#[tokio::test]
async fn abort_on_unmount_forwards_the_cache_abort_signal() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(Arc::clone(&client), Arc::clone(&cache));

	let _handle = binding
		.root()
		.get("todos")
		.get("get")
		.get("create_query")
		.call(
			CallArgs::new()
				.with_input(json!({ "id": 1 }))
				.with_options(QueryOptions::default().with_abort_on_unmount(true)),
		)
		.into_query()
		.expect("query handle");

	let descriptor = cache.observed_descriptors()[0].clone();
	cache.fetch_query(descriptor).await.expect("mock answers");
	assert!(client.calls_for("todos.get")[0].has_abort);
}

#[tokio::test]
async fn lazy_binding_stays_disabled_until_the_seed_resolves() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(client, Arc::clone(&cache));

	let handle = binding
		.root()
		.get("todos")
		.get("get")
		.get("create_query")
		.call(
			CallArgs::new()
				.with_input(json!({ "id": 1 }))
				.with_options(QueryOptions::lazy()),
		)
		.into_query()
		.expect("query handle");

	assert!(!cache.observed_descriptors()[0].enabled);
	let activator = handle.activator().expect("lazy bindings carry an activator");

	// When the gate flips, the seeded data must already be in the cache.
	let base_key = handle.key().clone();
	let seeded_at_enable = Arc::new(AtomicBool::new(false));
	let flag = Arc::clone(&seeded_at_enable);
	let probe = Arc::clone(&cache);
	let probe_key = base_key.clone();
	let _unsub = handle.observer().subscribe(Arc::new(move |_| {
		flag.store(probe.get_query_data(&probe_key).is_some(), Ordering::SeqCst);
	}));

	let seed: BoxFuture<'static, Value> = Box::pin(async { json!({ "seeded": true }) });
	activator.activate(Some(seed)).await;

	assert_eq!(
		cache.get_query_data(&base_key),
		Some(json!({ "seeded": true }))
	);
	assert!(cache.observed_descriptors().last().expect("rebuilt").enabled);
	assert!(seeded_at_enable.load(Ordering::SeqCst));
}

#[tokio::test]
async fn infinite_binding_merges_the_cursor_into_the_forwarded_input() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(Arc::clone(&client), Arc::clone(&cache));

	let _handle = binding
		.root()
		.get("todos")
		.get("list")
		.get("create_infinite_query")
		.call(
			CallArgs::new()
				.with_input(json!({ "filter": "open" }))
				.with_options(QueryOptions::default().with_initial_cursor(json!(0))),
		)
		.into_query()
		.expect("query handle");

	let descriptor = cache.observed_descriptors()[0].clone();
	assert_eq!(descriptor.mode, QueryMode::Infinite);
	assert_eq!(descriptor.initial_page_param, Some(json!(0)));
	assert_eq!(
		descriptor.key,
		derive_query_key(
			&ProcedurePath::from_segments(&["todos", "list"]),
			&QueryInput::from(json!({ "filter": "open" })),
			OperationType::Infinite,
		)
	);

	cache
		.fetch_infinite_query(descriptor)
		.await
		.expect("mock answers");
	let calls = client.calls_for("todos.list");
	assert_eq!(calls.len(), 1);
	assert_eq!(
		calls[0].input,
		Some(json!({ "filter": "open", "cursor": 0 }))
	);
}

#[tokio::test]
async fn infinite_fetch_forwards_the_direction_without_keying_it() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(Arc::clone(&client), Arc::clone(&cache));

	let _handle = binding
		.root()
		.get("todos")
		.get("list")
		.get("create_infinite_query")
		.call(CallArgs::new().with_input(json!({ "filter": "open" })))
		.into_query()
		.expect("query handle");

	let descriptor = cache.observed_descriptors()[0].clone();
	(descriptor.fetch)(FetchContext {
		page_param: Some(json!(7)),
		direction: Some(FetchDirection::Backward),
		abort: None,
	})
	.await
	.expect("mock answers");

	assert_eq!(
		client.calls_for("todos.list")[0].input,
		Some(json!({ "filter": "open", "cursor": 7, "direction": "backward" }))
	);
	// Pagination state never reaches the cache identity.
	assert_eq!(
		descriptor.key,
		derive_query_key(
			&ProcedurePath::from_segments(&["todos", "list"]),
			&QueryInput::from(json!({ "filter": "open" })),
			OperationType::Infinite,
		)
	);
}

#[test]
fn infinite_binding_defaults_the_initial_cursor_to_null() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(client, Arc::clone(&cache));

	let _handle = binding
		.root()
		.get("todos")
		.get("list")
		.get("create_infinite_query")
		.call(CallArgs::new())
		.into_query()
		.expect("query handle");

	assert_eq!(
		cache.observed_descriptors()[0].initial_page_param,
		Some(Value::Null)
	);
}

#[test]
fn identical_bindings_share_one_canonical_key() {
	let client = MockClient::new();
	let cache = MemoryCache::new();
	let binding = binding(client, cache);

	// Object key order must not fragment cache identity.
	let a = binding
		.root()
		.get("todos")
		.get("get")
		.get("create_query")
		.call(CallArgs::new().with_input(json!({ "a": 1, "b": 2 })))
		.into_query()
		.expect("query handle");
	let b = binding
		.root()
		.get("todos")
		.get("get")
		.get("create_query")
		.call(CallArgs::new().with_input(json!({ "b": 2, "a": 1 })))
		.into_query()
		.expect("query handle");

	assert_eq!(a.key().canonical(), b.key().canonical());
}
