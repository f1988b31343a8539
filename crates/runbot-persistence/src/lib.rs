//! Session persistence for runbot.
//!
//! - `SessionStore`: string-keyed store with typed access via `SessionStoreExt`
//! - `MemoryStore` / `JsonFileStore`: in-process and on-disk backends
//! - `keys`: the persisted key names
//! - `JournalWriter`: daily JSON Lines journal files

pub mod error;
pub mod journal;
pub mod keys;
pub mod store;

pub use error::{PersistenceError, PersistenceResult};
pub use journal::JournalWriter;
pub use store::{JsonFileStore, MemoryStore, SessionStore, SessionStoreExt};
