//! Mutation binding.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::{MutateFn, MutationDescriptor, MutationObserver};
use crate::client::CallOptions;
use crate::error::RpcError;
use crate::key::{derive_mutation_key, QueryInput, QueryKey};
use crate::path::ProcedurePath;
use crate::resolver::{CallArgs, DispatchContext};

/// A cache-registered mutation handle.
pub struct MutationHandle {
	observer: Arc<dyn MutationObserver>,
	key: QueryKey,
}

impl MutationHandle {
	pub fn key(&self) -> &QueryKey {
		&self.key
	}

	pub fn observer(&self) -> &Arc<dyn MutationObserver> {
		&self.observer
	}

	pub async fn mutate(&self, input: QueryInput) -> Result<Value, RpcError> {
		self.observer.mutate(input.as_value().cloned()).await
	}
}

pub(crate) fn bind_mutation(
	ctx: &Arc<DispatchContext>,
	path: ProcedurePath,
	args: CallArgs,
) -> MutationHandle {
	let key = derive_mutation_key(&path);

	// The cache layer only ever sees this wrapper, never the raw caller
	// callback. Centralized post-success behavior (coordinated cache
	// edits) hooks in here without changing per-call contracts.
	let user_on_success = args.on_success.clone();
	let wrapped: Arc<dyn Fn(&Value) + Send + Sync> = Arc::new(move |value| {
		if let Some(on_success) = &user_on_success {
			on_success(value);
		}
	});

	let client = Arc::clone(&ctx.client);
	let mutate_path = path.clone();
	let mutate: MutateFn = Arc::new(move |input| {
		let client = Arc::clone(&client);
		let path = mutate_path.clone();
		Box::pin(async move { client.mutate(&path, input, CallOptions::default()).await })
	});

	let observer = ctx.cache.observe_mutation(MutationDescriptor {
		key: key.clone(),
		mutate,
		on_success: Some(wrapped),
	});

	MutationHandle { observer, key }
}
