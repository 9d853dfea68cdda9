//! Object and config storage.
//!
//! The traits abstract the storage backend so the controller works against
//! domain objects. [`MemoryStore`] implements all of them in-process.

mod error;
mod event;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use event::Event;
pub use memory::MemoryStore;
pub use traits::{ConfigStore, ConnectionDetails, ConnectionPublisher, ObjectStore, Store};
