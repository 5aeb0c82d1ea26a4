//! Subscription binding: a scoped, restartable side-effect rather than a
//! cache-bound query.
//!
//! The subscription is re-established whenever the hashed identity of
//! `(path, input)` or the enabled flag changes. Each establishment gets an
//! epoch; handlers forward events only while their epoch is current and the
//! binding has not been stopped, so late-arriving events from a superseded
//! transport subscription are discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::{ProcedureClient, SubscriptionGuard, SubscriptionHandlers};
use crate::key::{CanonicalKey, QueryInput};
use crate::path::ProcedurePath;
use crate::reactive::{derived, Observable, Slot, Source, Unsubscribe};
use crate::resolver::{CallArgs, DispatchContext};

struct SubscriptionState {
	client: Arc<dyn ProcedureClient>,
	path: ProcedurePath,
	handlers: SubscriptionHandlers,
	epoch: AtomicU64,
	guard: Mutex<Option<SubscriptionGuard>>,
	stopped: Arc<AtomicBool>,
}

impl SubscriptionState {
	fn restart(self: &Arc<Self>, input: &QueryInput, enabled: bool) {
		let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

		// Tear the superseded subscription down before starting the
		// replacement. The guard lock must be released before the transport
		// callback runs; teardown may re-enter this handle.
		let previous = self.guard.lock().take();
		if let Some(previous) = previous {
			previous.unsubscribe();
		}

		if self.stopped.load(Ordering::SeqCst) || !enabled || input.is_skip() {
			return;
		}

		tracing::trace!(
			target: "querybind::subscription",
			path = %self.path,
			epoch,
			"starting subscription"
		);

		let handlers = self.wrap_handlers(epoch);
		let guard = self
			.client
			.subscribe(&self.path, input.as_value().cloned(), handlers);

		// A stop or restart may have landed while the transport was wiring
		// up; if so the fresh guard is already superseded.
		if self.stopped.load(Ordering::SeqCst) || self.epoch.load(Ordering::SeqCst) != epoch {
			guard.unsubscribe();
		} else {
			*self.guard.lock() = Some(guard);
		}
	}

	/// Forward handlers only while `epoch` is current and not stopped.
	fn wrap_handlers(self: &Arc<Self>, epoch: u64) -> SubscriptionHandlers {
		let live = {
			let state = Arc::clone(self);
			move || {
				!state.stopped.load(Ordering::SeqCst)
					&& state.epoch.load(Ordering::SeqCst) == epoch
			}
		};

		let handlers = self.handlers.clone();
		let mut wrapped = SubscriptionHandlers::on_data({
			let live = live.clone();
			let on_data = Arc::clone(&handlers.on_data);
			move |value| {
				if live() {
					on_data(value);
				}
			}
		});
		if let Some(on_started) = handlers.on_started {
			let live = live.clone();
			wrapped = wrapped.with_started(move || {
				if live() {
					on_started();
				}
			});
		}
		if let Some(on_error) = handlers.on_error {
			wrapped = wrapped.with_error(move |error| {
				if live() {
					on_error(error);
				}
			});
		}
		wrapped
	}

	fn stop(&self) {
		if self.stopped.swap(true, Ordering::SeqCst) {
			return;
		}
		tracing::trace!(
			target: "querybind::subscription",
			path = %self.path,
			"stopping subscription"
		);
		// Same as restart: drop the lock before the transport callback.
		let guard = self.guard.lock().take();
		if let Some(guard) = guard {
			guard.unsubscribe();
		}
	}
}

/// Handle to a live, restartable subscription. Stops on drop.
pub struct SubscriptionHandle {
	state: Arc<SubscriptionState>,
	teardown: Mutex<Vec<Unsubscribe>>,
}

impl SubscriptionHandle {
	pub fn is_stopped(&self) -> bool {
		self.state.stopped.load(Ordering::SeqCst)
	}

	/// Stop for good: unsubscribe and discard any late-arriving events.
	pub fn stop(&self) {
		self.state.stop();
		for unsubscribe in self.teardown.lock().drain(..) {
			unsubscribe();
		}
	}
}

impl Drop for SubscriptionHandle {
	fn drop(&mut self) {
		self.state.stop();
		for unsubscribe in self.teardown.get_mut().drain(..) {
			unsubscribe();
		}
	}
}

#[derive(Clone)]
enum SubSignal {
	Input(QueryInput),
	Enabled(bool),
}

fn identity(path: &ProcedurePath, input: &QueryInput) -> CanonicalKey {
	serde_hashkey::to_key_with_ordered_float(&(path, input.as_value()))
		.expect("subscription identities are plain JSON and always hashable")
}

pub(crate) fn bind_subscription(
	ctx: &Arc<DispatchContext>,
	path: ProcedurePath,
	args: CallArgs,
) -> SubscriptionHandle {
	let handlers = args
		.handlers
		.unwrap_or_else(|| SubscriptionHandlers::on_data(|_| {}));
	let input_source = args
		.input
		.unwrap_or_else(|| Source::Value(QueryInput::None));
	let enabled_source = args
		.options
		.as_ref()
		.and_then(|options| options.current().enabled);

	let state = Arc::new(SubscriptionState {
		client: Arc::clone(&ctx.client),
		path: path.clone(),
		handlers,
		epoch: AtomicU64::new(0),
		guard: Mutex::new(None),
		stopped: Arc::new(AtomicBool::new(false)),
	});

	let sources: Vec<Option<Source<SubSignal>>> = vec![
		Some(input_source.map(|input| SubSignal::Input(input.clone()))),
		enabled_source
			.as_ref()
			.map(|source| source.map(|enabled| SubSignal::Enabled(*enabled))),
	];
	let fallback_input = input_source.current();
	let (signals, teardown) = derived(sources, move |slots: &[Slot<SubSignal>]| {
		let mut input = fallback_input.clone();
		let mut enabled = true;
		for slot in slots {
			match slot {
				Slot::Blank => {}
				Slot::Filled(SubSignal::Input(value)) => input = value.clone(),
				Slot::Filled(SubSignal::Enabled(value)) => enabled = *value,
			}
		}
		(input, enabled)
	});

	let (initial_input, initial_enabled) = signals.get();
	state.restart(&initial_input, initial_enabled);

	let last = Mutex::new((identity(&path, &initial_input), initial_enabled));
	let relay = Arc::clone(&state);
	let relay_path = path;
	let resubscribe = signals.subscribe(Arc::new(move |(input, enabled): &(QueryInput, bool)| {
		let next = (identity(&relay_path, input), *enabled);
		let changed = {
			let mut guard = last.lock();
			let changed = *guard != next;
			*guard = next;
			changed
		};
		if changed {
			relay.restart(input, *enabled);
		}
	}));

	SubscriptionHandle {
		state,
		teardown: Mutex::new(vec![teardown, resubscribe]),
	}
}
