pub use chrono;
pub use serde;
pub use serde_json;

mod memory_store;
mod message;
mod store;
mod types;

pub use memory_store::MemoryStore;
pub use message::*;
pub use store::*;
pub use types::*;
