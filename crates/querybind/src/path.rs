use std::fmt;

use serde::Serialize;

/// The location of a leaf operation in the remote-procedure tree.
///
/// Paths are stored as atomic segments: any segment containing `.` is split
/// on construction, so `["todos.get"]` and `["todos", "get"]` are the same
/// path. Two paths are equal iff their atomic-segment sequences are equal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ProcedurePath(Vec<String>);

impl ProcedurePath {
	/// The empty path, addressing the root of the procedure tree.
	pub fn root() -> Self {
		Self(Vec::new())
	}

	/// Build a path from segments, splitting compound segments into atomic
	/// ones.
	pub fn from_segments<I, S>(segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut path = Self::root();
		for segment in segments {
			path.push(segment.as_ref());
		}
		path
	}

	/// Append a segment in place, splitting on `.`.
	pub fn push(&mut self, segment: &str) {
		for atom in segment.split('.').filter(|s| !s.is_empty()) {
			self.0.push(atom.to_owned());
		}
	}

	/// A new path with `segment` appended.
	pub fn child(&self, segment: &str) -> Self {
		let mut next = self.clone();
		next.push(segment);
		next
	}

	/// Remove and return the final segment.
	pub fn pop(&mut self) -> Option<String> {
		self.0.pop()
	}

	pub fn segments(&self) -> &[String] {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Whether `prefix` is a (non-strict) prefix of this path.
	pub fn starts_with(&self, prefix: &Self) -> bool {
		self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
	}
}

impl fmt::Display for ProcedurePath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.join("."))
	}
}
