// # State Store Trait
//
// Defines the interface for the small amount of state that outlives a pass.
//
// ## Purpose
//
// Two values are persisted between passes:
// - The client identity sent with every provider request
// - The last observed provider version stamp
//
// Each value is a single line of text. Validation of that text (UUID
// grammar, 10-digit stamp) is done by the identity store and version
// tracker, not here.
//
// ## Implementations
//
// - File-based: one file per key inside the work directory
// - Memory: tests only

use std::fmt;

use async_trait::async_trait;

/// Key of a persisted value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    /// Stable client request identifier
    ClientIdentity,
    /// Last observed provider version stamp
    LastVersion,
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::ClientIdentity => f.write_str("client identity"),
            StateKey::LastVersion => f.write_str("last version"),
        }
    }
}

/// Trait for state store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// State stores perform I/O for persistence only. They never decide what a
/// value means or whether it is valid.
///
/// # Failure semantics
///
/// A missing value is `Ok(None)`. An unreadable or unwritable backend is a
/// [`crate::Error::Persistence`], which is fatal to the pass.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the raw value for a key
    ///
    /// # Returns
    ///
    /// - `Ok(Some(String))`: First line of the stored value, trimmed
    /// - `Ok(None)`: Nothing stored
    /// - `Err(Error)`: Storage error
    async fn load(&self, key: StateKey) -> Result<Option<String>, crate::Error>;

    /// Replace the value for a key
    ///
    /// Must be durable when it returns.
    async fn store(&self, key: StateKey, value: &str) -> Result<(), crate::Error>;
}
