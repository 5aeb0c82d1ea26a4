//! Shared test harness: a recording mock transport and an in-memory
//! implementation of the consumed cache interface.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use querybind::key::CanonicalKey;
use querybind::{
	CacheEntry, CallOptions, Listener, MutationDefaults, MutationDescriptor, MutationObserver,
	ProcedureClient, ProcedurePath, QueryCache, QueryDescriptor, QueryKey, QueryObserver,
	QueryObserverState, QueryStatus, RpcError, Source, Store, SubscriptionGuard,
	SubscriptionHandlers, Unsubscribe,
};

// ============================================================================
// Mock transport
// ============================================================================

#[derive(Clone, Debug)]
pub struct RecordedCall {
	pub method: &'static str,
	pub path: String,
	pub input: Option<Value>,
	pub has_abort: bool,
}

pub struct MockSubscription {
	pub path: String,
	pub input: Option<Value>,
	handlers: SubscriptionHandlers,
	unsubscribed: Arc<AtomicBool>,
}

impl MockSubscription {
	/// Simulate the transport confirming the subscription started, possibly
	/// after the binder already tore it down.
	pub fn confirm_started(&self) {
		if let Some(on_started) = &self.handlers.on_started {
			on_started();
		}
	}

	pub fn emit(&self, value: Value) {
		(self.handlers.on_data)(value);
	}

	pub fn emit_error(&self, error: RpcError) {
		if let Some(on_error) = &self.handlers.on_error {
			on_error(error);
		}
	}

	pub fn is_unsubscribed(&self) -> bool {
		self.unsubscribed.load(Ordering::SeqCst)
	}
}

/// Records every call and answers with scripted responses, or echoes
/// `{ "path": .., "input": .. }` when nothing is scripted.
pub struct MockClient {
	calls: Mutex<Vec<RecordedCall>>,
	responses: Mutex<HashMap<String, Result<Value, RpcError>>>,
	hanging: Mutex<Vec<String>>,
	subscriptions: Mutex<Vec<Arc<MockSubscription>>>,
}

impl MockClient {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			calls: Mutex::new(Vec::new()),
			responses: Mutex::new(HashMap::new()),
			hanging: Mutex::new(Vec::new()),
			subscriptions: Mutex::new(Vec::new()),
		})
	}

	pub fn respond(&self, path: &str, value: Value) {
		self.responses.lock().insert(path.to_owned(), Ok(value));
	}

	pub fn fail(&self, path: &str, error: RpcError) {
		self.responses.lock().insert(path.to_owned(), Err(error));
	}

	/// Calls at `path` never complete.
	pub fn hang(&self, path: &str) {
		self.hanging.lock().push(path.to_owned());
	}

	pub fn calls(&self) -> Vec<RecordedCall> {
		self.calls.lock().clone()
	}

	pub fn calls_for(&self, path: &str) -> Vec<RecordedCall> {
		self.calls
			.lock()
			.iter()
			.filter(|call| call.path == path)
			.cloned()
			.collect()
	}

	pub fn subscriptions(&self) -> Vec<Arc<MockSubscription>> {
		self.subscriptions.lock().clone()
	}

	fn record(
		&self,
		method: &'static str,
		path: &ProcedurePath,
		input: &Option<Value>,
		options: &CallOptions,
	) {
		self.calls.lock().push(RecordedCall {
			method,
			path: path.to_string(),
			input: input.clone(),
			has_abort: options.abort.is_some(),
		});
	}

	async fn answer(&self, path: &ProcedurePath, input: Option<Value>) -> Result<Value, RpcError> {
		let key = path.to_string();
		if self.hanging.lock().contains(&key) {
			futures::future::pending::<()>().await;
		}
		if let Some(response) = self.responses.lock().get(&key) {
			return response.clone();
		}
		Ok(json!({ "path": key, "input": input }))
	}
}

#[async_trait]
impl ProcedureClient for MockClient {
	async fn query(
		&self,
		path: &ProcedurePath,
		input: Option<Value>,
		options: CallOptions,
	) -> Result<Value, RpcError> {
		self.record("query", path, &input, &options);
		self.answer(path, input).await
	}

	async fn mutate(
		&self,
		path: &ProcedurePath,
		input: Option<Value>,
		options: CallOptions,
	) -> Result<Value, RpcError> {
		self.record("mutate", path, &input, &options);
		self.answer(path, input).await
	}

	fn subscribe(
		&self,
		path: &ProcedurePath,
		input: Option<Value>,
		handlers: SubscriptionHandlers,
	) -> SubscriptionGuard {
		let unsubscribed = Arc::new(AtomicBool::new(false));
		let subscription = Arc::new(MockSubscription {
			path: path.to_string(),
			input,
			handlers,
			unsubscribed: Arc::clone(&unsubscribed),
		});
		self.subscriptions.lock().push(subscription);
		SubscriptionGuard::new(move || unsubscribed.store(true, Ordering::SeqCst))
	}
}

// ============================================================================
// In-memory cache
// ============================================================================

struct Entry {
	key: QueryKey,
	data: Value,
}

struct MemoryQueryObserver {
	descriptor: Mutex<QueryDescriptor>,
	state: Arc<Store<QueryObserverState>>,
	teardown: Mutex<Option<Unsubscribe>>,
}

impl QueryObserver for MemoryQueryObserver {
	fn state(&self) -> QueryObserverState {
		self.state.get()
	}

	fn subscribe(&self, listener: Listener<QueryObserverState>) -> Unsubscribe {
		querybind::Observable::subscribe(&*self.state, listener)
	}

	fn key(&self) -> QueryKey {
		self.descriptor.lock().key.clone()
	}
}

impl Drop for MemoryQueryObserver {
	fn drop(&mut self) {
		if let Some(teardown) = self.teardown.get_mut().take() {
			teardown();
		}
	}
}

struct MemoryMutationObserver {
	descriptor: MutationDescriptor,
	mutating: Arc<Mutex<Vec<QueryKey>>>,
}

impl MutationObserver for MemoryMutationObserver {
	fn key(&self) -> QueryKey {
		self.descriptor.key.clone()
	}

	fn mutate(&self, input: Option<Value>) -> BoxFuture<'static, Result<Value, RpcError>> {
		let descriptor = self.descriptor.clone();
		let mutating = Arc::clone(&self.mutating);
		Box::pin(async move {
			mutating.lock().push(descriptor.key.clone());
			let result = (descriptor.mutate)(input).await;
			let canonical = descriptor.key.canonical();
			{
				let mut guard = mutating.lock();
				if let Some(index) = guard.iter().position(|k| k.canonical() == canonical) {
					guard.remove(index);
				}
			}
			if let Ok(value) = &result {
				if let Some(on_success) = &descriptor.on_success {
					on_success(value);
				}
			}
			result
		})
	}
}

/// Deterministic in-memory cache: observers track descriptors without
/// fetching on their own; fetches only happen through the explicit
/// `fetch_*`/`prefetch_*`/`ensure_*` entry points.
pub struct MemoryCache {
	entries: Mutex<HashMap<CanonicalKey, Entry>>,
	pub invalidations: Mutex<Vec<QueryKey>>,
	pub refetches: Mutex<Vec<QueryKey>>,
	pub resets: Mutex<Vec<QueryKey>>,
	pub cancels: Mutex<Vec<QueryKey>>,
	mutation_defaults: Mutex<Vec<(QueryKey, MutationDefaults)>>,
	mutating: Arc<Mutex<Vec<QueryKey>>>,
	/// Every descriptor seen by `observe_query`, in observation order.
	observed: Arc<Mutex<Vec<QueryDescriptor>>>,
}

impl MemoryCache {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			entries: Mutex::new(HashMap::new()),
			invalidations: Mutex::new(Vec::new()),
			refetches: Mutex::new(Vec::new()),
			resets: Mutex::new(Vec::new()),
			cancels: Mutex::new(Vec::new()),
			mutation_defaults: Mutex::new(Vec::new()),
			mutating: Arc::new(Mutex::new(Vec::new())),
			observed: Arc::new(Mutex::new(Vec::new())),
		})
	}

	pub fn entry_keys(&self) -> Vec<QueryKey> {
		self.entries
			.lock()
			.values()
			.map(|entry| entry.key.clone())
			.collect()
	}

	pub fn observed_descriptors(&self) -> Vec<QueryDescriptor> {
		self.observed.lock().clone()
	}

	pub fn mutation_defaults_for(&self, key: &QueryKey) -> Option<MutationDefaults> {
		self.mutation_defaults
			.lock()
			.iter()
			.find(|(k, _)| k.canonical() == key.canonical())
			.map(|(_, defaults)| defaults.clone())
	}

	fn store(&self, key: &QueryKey, data: Value) {
		self.entries.lock().insert(
			key.canonical(),
			Entry {
				key: key.clone(),
				data,
			},
		);
	}

	async fn run_fetch(
		&self,
		descriptor: &QueryDescriptor,
		page_param: Option<Value>,
	) -> Result<Value, RpcError> {
		let context = querybind::FetchContext {
			page_param,
			direction: None,
			abort: Some(CancellationToken::new()),
		};
		let result = (descriptor.fetch)(context).await;
		if let Ok(value) = &result {
			self.store(&descriptor.key, value.clone());
		}
		result
	}
}

#[async_trait]
impl QueryCache for MemoryCache {
	async fn fetch_query(&self, descriptor: QueryDescriptor) -> Result<Value, RpcError> {
		self.run_fetch(&descriptor, None).await
	}

	async fn prefetch_query(&self, descriptor: QueryDescriptor) {
		let _ = self.run_fetch(&descriptor, None).await;
	}

	async fn ensure_query_data(&self, descriptor: QueryDescriptor) -> Result<Value, RpcError> {
		if let Some(entry) = self.entries.lock().get(&descriptor.key.canonical()) {
			return Ok(entry.data.clone());
		}
		self.run_fetch(&descriptor, None).await
	}

	async fn fetch_infinite_query(&self, descriptor: QueryDescriptor) -> Result<Value, RpcError> {
		let page_param = descriptor.initial_page_param.clone();
		self.run_fetch(&descriptor, page_param).await
	}

	async fn prefetch_infinite_query(&self, descriptor: QueryDescriptor) {
		let page_param = descriptor.initial_page_param.clone();
		let _ = self.run_fetch(&descriptor, page_param).await;
	}

	fn invalidate_queries(&self, filter: &QueryKey) {
		self.invalidations.lock().push(filter.clone());
	}

	async fn refetch_queries(&self, filter: &QueryKey) {
		self.refetches.lock().push(filter.clone());
	}

	fn reset_queries(&self, filter: &QueryKey) {
		self.resets.lock().push(filter.clone());
		self.entries
			.lock()
			.retain(|_, entry| !filter.covers(&entry.key));
	}

	async fn cancel_queries(&self, filter: &QueryKey) {
		self.cancels.lock().push(filter.clone());
	}

	fn set_query_data(&self, key: &QueryKey, data: Value) {
		self.store(key, data);
	}

	fn get_query_data(&self, key: &QueryKey) -> Option<Value> {
		self.entries
			.lock()
			.get(&key.canonical())
			.map(|entry| entry.data.clone())
	}

	fn set_mutation_defaults(&self, key: &QueryKey, defaults: MutationDefaults) {
		self.mutation_defaults.lock().push((key.clone(), defaults));
	}

	fn is_mutating(&self, filter: &QueryKey) -> usize {
		self.mutating
			.lock()
			.iter()
			.filter(|key| filter.covers(key))
			.count()
	}

	fn find(&self, key: &QueryKey) -> Option<CacheEntry> {
		self.entries
			.lock()
			.get(&key.canonical())
			.map(|entry| CacheEntry {
				data: Some(entry.data.clone()),
			})
	}

	fn observe_query(&self, descriptor: Source<QueryDescriptor>) -> Arc<dyn QueryObserver> {
		let current = descriptor.current();
		self.observed.lock().push(current.clone());

		let state = Store::new(QueryObserverState {
			status: QueryStatus::Pending,
			data: self.get_query_data(&current.key),
			error: None,
			key: Some(current.key.clone()),
		});

		let observer = Arc::new(MemoryQueryObserver {
			descriptor: Mutex::new(current),
			state,
			teardown: Mutex::new(None),
		});

		if descriptor.is_reactive() {
			let relay = Arc::clone(&observer);
			let log = Arc::clone(&self.observed);
			let teardown = descriptor
				.subscribe(Arc::new(move |next: &QueryDescriptor| {
					log.lock().push(next.clone());
					*relay.descriptor.lock() = next.clone();
					let mut state = relay.state.get();
					state.key = Some(next.key.clone());
					relay.state.set(state);
				}))
				.expect("reactive descriptor sources are subscribable");
			*observer.teardown.lock() = Some(teardown);
		}

		observer
	}

	fn observe_mutation(&self, descriptor: MutationDescriptor) -> Arc<dyn MutationObserver> {
		Arc::new(MemoryMutationObserver {
			descriptor,
			mutating: Arc::clone(&self.mutating),
		})
	}
}
