//! Reactive primitives: observable containers, the value-or-observable
//! `Source` union and the derived-recomputation combinator.
//!
//! Snapshot-on-emit semantics throughout: the listener list is copied under
//! the lock and the lock is released before any callback runs, so listeners
//! may subscribe/unsubscribe reentrantly without deadlocking. Emission is
//! synchronous: a `set` returns only after every listener has observed the
//! new value.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// An owned one-shot closure that removes a subscription when called.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

/// Closure type for change listeners.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
	entries: Mutex<Vec<(u64, Listener<T>)>>,
	next_id: AtomicU64,
}

impl<T> Listeners<T> {
	fn new() -> Self {
		Self {
			entries: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(1),
		}
	}

	fn add(&self, listener: Listener<T>) -> u64 {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.entries.lock().push((id, listener));
		id
	}

	fn remove(&self, id: u64) {
		self.entries.lock().retain(|(lid, _)| *lid != id);
	}

	fn snapshot(&self) -> Vec<Listener<T>> {
		self.entries.lock().iter().map(|(_, l)| Arc::clone(l)).collect()
	}
}

/// The observable-container capability: a current value plus change
/// notifications. This is the duck-typed `subscribe` test of the source
/// classifier, expressed as a trait.
pub trait Observable<T>: Send + Sync {
	fn current(&self) -> T;

	/// Register a change listener. Listeners are NOT called with the
	/// current value on subscription, only on subsequent changes.
	fn subscribe(&self, listener: Listener<T>) -> Unsubscribe;
}

/// A writable observable container.
pub struct Store<T> {
	value: Mutex<T>,
	listeners: Arc<Listeners<T>>,
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
	pub fn new(value: T) -> Arc<Self> {
		Arc::new(Self {
			value: Mutex::new(value),
			listeners: Arc::new(Listeners::new()),
		})
	}

	pub fn get(&self) -> T {
		self.value.lock().clone()
	}

	/// Replace the value and notify all listeners synchronously.
	pub fn set(&self, value: T) {
		*self.value.lock() = value.clone();
		// Lock released before callbacks run.
		for listener in self.listeners.snapshot() {
			listener(&value);
		}
	}
}

impl<T: Clone + Send + Sync + 'static> Observable<T> for Store<T> {
	fn current(&self) -> T {
		self.get()
	}

	fn subscribe(&self, listener: Listener<T>) -> Unsubscribe {
		let id = self.listeners.add(listener);
		let listeners = Arc::clone(&self.listeners);
		Box::new(move || listeners.remove(id))
	}
}

struct Mapped<T, U> {
	inner: Arc<dyn Observable<T>>,
	map: Arc<dyn Fn(&T) -> U + Send + Sync>,
}

impl<T, U> Observable<U> for Mapped<T, U>
where
	T: Send + Sync + 'static,
	U: Send + Sync + 'static,
{
	fn current(&self) -> U {
		(self.map)(&self.inner.current())
	}

	fn subscribe(&self, listener: Listener<U>) -> Unsubscribe {
		let map = Arc::clone(&self.map);
		self.inner.subscribe(Arc::new(move |value| listener(&map(value))))
	}
}

/// Either a plain value or an observable producing values: the tagged
/// union the binders use for every input and options argument.
#[derive(Clone)]
pub enum Source<T> {
	Value(T),
	Observable(Arc<dyn Observable<T>>),
}

impl<T: Clone + Send + Sync + 'static> Source<T> {
	pub fn value(value: T) -> Self {
		Self::Value(value)
	}

	pub fn observable(observable: Arc<dyn Observable<T>>) -> Self {
		Self::Observable(observable)
	}

	/// The reactive source classifier: does this slot require live
	/// re-derivation?
	pub fn is_reactive(&self) -> bool {
		matches!(self, Self::Observable(_))
	}

	pub fn current(&self) -> T {
		match self {
			Self::Value(value) => value.clone(),
			Self::Observable(observable) => observable.current(),
		}
	}

	/// Subscribe if reactive; plain values never emit.
	pub fn subscribe(&self, listener: Listener<T>) -> Option<Unsubscribe> {
		match self {
			Self::Value(_) => None,
			Self::Observable(observable) => Some(observable.subscribe(listener)),
		}
	}

	pub fn map<U>(&self, map: impl Fn(&T) -> U + Send + Sync + 'static) -> Source<U>
	where
		U: Clone + Send + Sync + 'static,
	{
		match self {
			Self::Value(value) => Source::Value(map(value)),
			Self::Observable(observable) => Source::Observable(Arc::new(Mapped {
				inner: Arc::clone(observable),
				map: Arc::new(map),
			})),
		}
	}
}

/// A combined-computation slot that distinguishes "this source has not
/// produced a value" from a legitimately absent payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot<T> {
	Blank,
	Filled(T),
}

impl<T> Slot<T> {
	pub fn filled(self) -> Option<T> {
		match self {
			Self::Filled(value) => Some(value),
			Self::Blank => None,
		}
	}

	pub fn is_blank(&self) -> bool {
		matches!(self, Self::Blank)
	}
}

/// Derived computation over N optional sources.
///
/// Absent sources stay `Blank` forever; present ones start `Filled` with
/// their current value and refill on every emission, after which `combine`
/// re-runs and the output store updates synchronously. The returned
/// teardown closure detaches from every upstream source.
pub fn derived<T, U>(
	sources: Vec<Option<Source<T>>>,
	combine: impl Fn(&[Slot<T>]) -> U + Send + Sync + 'static,
) -> (Arc<Store<U>>, Unsubscribe)
where
	T: Clone + Send + Sync + 'static,
	U: Clone + Send + Sync + 'static,
{
	let combine = Arc::new(combine);
	let slots: Vec<Slot<T>> = sources
		.iter()
		.map(|source| match source {
			Some(source) => Slot::Filled(source.current()),
			None => Slot::Blank,
		})
		.collect();
	let slots = Arc::new(Mutex::new(slots));
	let out = Store::new(combine(&slots.lock()));

	let mut unsubs = Vec::new();
	for (index, source) in sources.iter().enumerate() {
		let Some(source) = source else { continue };
		let slots = Arc::clone(&slots);
		let out = Arc::clone(&out);
		let combine = Arc::clone(&combine);
		if let Some(unsub) = source.subscribe(Arc::new(move |value: &T| {
			let next = {
				let mut guard = slots.lock();
				guard[index] = Slot::Filled(value.clone());
				guard.clone()
			};
			out.set(combine(&next));
		})) {
			unsubs.push(unsub);
		}
	}

	let teardown: Unsubscribe = Box::new(move || {
		for unsub in unsubs {
			unsub();
		}
	});
	(out, teardown)
}

/// Host-lifecycle mount signal, used by the server-preload binders to gate
/// staleness until the first mount has completed.
#[derive(Clone)]
pub struct Lifecycle {
	mounted: Arc<Store<bool>>,
}

impl Lifecycle {
	pub fn new() -> Self {
		Self {
			mounted: Store::new(false),
		}
	}

	pub fn is_mounted(&self) -> bool {
		self.mounted.get()
	}

	/// Fired by the host after the first mount completes. Idempotent.
	pub fn mark_mounted(&self) {
		if !self.mounted.get() {
			self.mounted.set(true);
		}
	}

	/// Run `callback` once mounted; immediately if mounting already
	/// happened.
	pub fn on_mount(&self, callback: impl Fn() + Send + Sync + 'static) -> Unsubscribe {
		if self.mounted.get() {
			callback();
			return Box::new(|| {});
		}
		self.mounted.subscribe(Arc::new(move |mounted| {
			if *mounted {
				callback();
			}
		}))
	}
}

impl Default for Lifecycle {
	fn default() -> Self {
		Self::new()
	}
}
