use thiserror::Error;

/// Failures surfaced by the underlying procedure client.
///
/// The binding engine never intercepts these; they propagate verbatim into
/// the cache layer's error state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
	/// The transport could not complete the call.
	#[error("transport failure: {0}")]
	Transport(String),

	/// The remote procedure itself reported an error.
	#[error("procedure error `{code}`: {message}")]
	Procedure { code: String, message: String },

	/// The input or output payload could not be (de)serialized.
	#[error("serialization failure: {0}")]
	Serialization(String),

	/// The call was cancelled via its abort token.
	#[error("call aborted")]
	Aborted,
}

impl From<serde_json::Error> for RpcError {
	fn from(err: serde_json::Error) -> Self {
		Self::Serialization(err.to_string())
	}
}
