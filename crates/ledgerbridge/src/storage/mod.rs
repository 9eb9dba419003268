pub mod cursor;
pub mod memory;
pub mod snapshot;

pub use cursor::{FileCursorStore, MemoryCursorStore};
pub use memory::{MemoryLocalStore, MemoryState};
