//! Object storage seam for archived segments.

mod local;
mod object_store;

pub use local::LocalObjectStore;
pub use object_store::{MemoryObjectStore, ObjectStore};
