//! Binders turn a resolved leaf path plus call arguments into cache-bound
//! reactive handles.

pub mod mutation;
pub mod query;
pub mod server;
pub mod subscription;
