//! Canonical query/mutation key derivation.
//!
//! A query key is the identity the cache uses to group and distinguish
//! results. Two logically identical requests must always derive the same
//! key and two different ones must never collide, so the canonical form
//! here is load-bearing: every binder, the cache-control tree and the
//! batch tree all derive keys through [`derive_query_key`].

use serde_json::{Map, Value};

use crate::path::ProcedurePath;

/// Structural, object-key-order-insensitive key identity.
pub type CanonicalKey = serde_hashkey::Key<serde_hashkey::OrderedFloatPolicy>;

/// Which cache shape a key addresses.
///
/// `Any` matches both plain and infinite queries and is used for mutation
/// keys and cache-wide operations such as invalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
	Query,
	Infinite,
	Any,
}

impl OperationType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Query => "query",
			Self::Infinite => "infinite",
			Self::Any => "any",
		}
	}
}

/// An input payload for a procedure call.
///
/// `Skip` is a sentinel meaning "do not execute": it is treated as "no
/// input" for key purposes and disables the query in the binders.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum QueryInput {
	#[default]
	None,
	Skip,
	Value(Value),
}

impl QueryInput {
	/// The payload to forward, if any. `Skip` reads as absent.
	pub fn as_value(&self) -> Option<&Value> {
		match self {
			Self::Value(value) => Some(value),
			Self::None | Self::Skip => None,
		}
	}

	pub fn is_skip(&self) -> bool {
		matches!(self, Self::Skip)
	}
}

impl From<Value> for QueryInput {
	fn from(value: Value) -> Self {
		Self::Value(value)
	}
}

/// A canonical cache key: a 0-, 1- or 2-element sequence of
/// `[segments]` / `[segments, {input?, type?}]`.
///
/// The empty key (empty path, no input, type `Any`) is the empty sequence,
/// not a singleton holding an empty sequence. That form is what lets a
/// whole-cache operation match everything, including entries created
/// through the raw cache API.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryKey {
	parts: Vec<Value>,
}

impl QueryKey {
	pub fn parts(&self) -> &[Value] {
		&self.parts
	}

	/// The key as a plain JSON array, for logging and wire use.
	pub fn to_value(&self) -> Value {
		Value::Array(self.parts.clone())
	}

	/// Structural identity, insensitive to object key order.
	pub fn canonical(&self) -> CanonicalKey {
		serde_hashkey::to_key_with_ordered_float(&self.parts)
			.expect("query keys are plain JSON and always hashable")
	}

	fn key_segments(&self) -> &[Value] {
		self.parts
			.first()
			.and_then(Value::as_array)
			.map(Vec::as_slice)
			.unwrap_or(&[])
	}

	fn options(&self) -> Option<&Map<String, Value>> {
		self.parts.get(1).and_then(Value::as_object)
	}

	/// Hierarchical filter matching: whether this key, used as a filter,
	/// matches the concrete key `other`.
	///
	/// A filter matches when its segments are a prefix of the target's and
	/// any input/type it carries agrees with the target's. The empty key
	/// matches every key.
	pub fn covers(&self, other: &QueryKey) -> bool {
		let mine = self.key_segments();
		let theirs = other.key_segments();
		if theirs.len() < mine.len() || theirs[..mine.len()] != mine[..] {
			return false;
		}

		let Some(options) = self.options() else {
			return true;
		};
		if let Some(input) = options.get("input") {
			if other.options().and_then(|o| o.get("input")) != Some(input) {
				return false;
			}
		}
		if let Some(ty) = options.get("type") {
			if other.options().and_then(|o| o.get("type")) != Some(ty) {
				return false;
			}
		}
		true
	}
}

/// Derive the canonical key for `(path, input, type)`.
///
/// Pure and exception-free: malformed input (e.g. a non-object input under
/// `Infinite`) is passed through unmodified rather than rejected.
pub fn derive_query_key(path: &ProcedurePath, input: &QueryInput, ty: OperationType) -> QueryKey {
	// Pagination state must not fragment cache identity.
	let input = match (ty, input.as_value()) {
		(OperationType::Infinite, Some(Value::Object(map))) => {
			let stripped: Map<String, Value> = map
				.iter()
				.filter(|(k, _)| k.as_str() != "cursor" && k.as_str() != "direction")
				.map(|(k, v)| (k.clone(), v.clone()))
				.collect();
			Some(Value::Object(stripped))
		}
		(_, value) => value.cloned(),
	};

	let mut options = Map::new();
	if let Some(input) = input {
		options.insert("input".to_owned(), input);
	}
	if ty != OperationType::Any {
		options.insert("type".to_owned(), Value::String(ty.as_str().to_owned()));
	}

	let segments = Value::Array(
		path.segments()
			.iter()
			.map(|s| Value::String(s.clone()))
			.collect(),
	);

	if options.is_empty() {
		if path.is_empty() {
			QueryKey { parts: Vec::new() }
		} else {
			QueryKey {
				parts: vec![segments],
			}
		}
	} else {
		QueryKey {
			parts: vec![segments, Value::Object(options)],
		}
	}
}

/// Mutation keys are degenerate query keys: no input, type `Any`, no
/// options element.
pub fn derive_mutation_key(path: &ProcedurePath) -> QueryKey {
	derive_query_key(path, &QueryInput::None, OperationType::Any)
}
