pub mod error;
pub mod memory;
pub mod oid;
pub mod refs;
pub mod storage;

pub use error::{Error, Result};
pub use memory::MemoryStorage;
pub use oid::Oid;
pub use refs::{RefName, RefTarget, Reference};
pub use storage::{resolve_reference, ObjectStore, RefStore, ShallowStore, MAX_SYMREF_DEPTH};
