//! The consumed remote-procedure client interface.
//!
//! The engine never talks to a transport directly. It re-resolves the live
//! leaf through this trait at every fetch, so a swapped-out client is picked
//! up by the next call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::path::ProcedurePath;

/// Per-call transport options.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
	/// Cooperative abort signal, forwarded opportunistically when
	/// abort-on-teardown is enabled.
	pub abort: Option<CancellationToken>,
}

/// Callbacks for a live subscription.
#[derive(Clone)]
pub struct SubscriptionHandlers {
	pub on_started: Option<Arc<dyn Fn() + Send + Sync>>,
	pub on_data: Arc<dyn Fn(Value) + Send + Sync>,
	pub on_error: Option<Arc<dyn Fn(RpcError) + Send + Sync>>,
}

impl SubscriptionHandlers {
	pub fn on_data(on_data: impl Fn(Value) + Send + Sync + 'static) -> Self {
		Self {
			on_started: None,
			on_data: Arc::new(on_data),
			on_error: None,
		}
	}

	pub fn with_started(mut self, on_started: impl Fn() + Send + Sync + 'static) -> Self {
		self.on_started = Some(Arc::new(on_started));
		self
	}

	pub fn with_error(mut self, on_error: impl Fn(RpcError) + Send + Sync + 'static) -> Self {
		self.on_error = Some(Arc::new(on_error));
		self
	}
}

/// Handle to an established subscription. Unsubscribes on drop.
pub struct SubscriptionGuard {
	unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
	pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
		Self {
			unsubscribe: Some(Box::new(unsubscribe)),
		}
	}

	/// A guard for a subscription that never started.
	pub fn noop() -> Self {
		Self { unsubscribe: None }
	}

	pub fn unsubscribe(mut self) {
		if let Some(unsubscribe) = self.unsubscribe.take() {
			unsubscribe();
		}
	}
}

impl Drop for SubscriptionGuard {
	fn drop(&mut self) {
		if let Some(unsubscribe) = self.unsubscribe.take() {
			unsubscribe();
		}
	}
}

/// A procedure-tree RPC client, addressable at any resolved path.
#[async_trait]
pub trait ProcedureClient: Send + Sync {
	async fn query(
		&self,
		path: &ProcedurePath,
		input: Option<Value>,
		options: CallOptions,
	) -> Result<Value, RpcError>;

	async fn mutate(
		&self,
		path: &ProcedurePath,
		input: Option<Value>,
		options: CallOptions,
	) -> Result<Value, RpcError>;

	fn subscribe(
		&self,
		path: &ProcedurePath,
		input: Option<Value>,
		handlers: SubscriptionHandlers,
	) -> SubscriptionGuard;
}
