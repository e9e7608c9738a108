// # State Store Implementations
//
// This module provides implementations of the StateStore and ArtifactStore
// traits for different persistence strategies, plus the lock that keeps two
// passes from running at once.

pub mod file;
pub mod lock;
pub mod memory;

pub use file::{FileArtifactStore, FileStateStore};
pub use lock::PassLock;
pub use memory::{MemoryArtifactStore, MemoryStateStore};
