//! Client identity management
//!
//! The provider asks every caller to send a stable client request id. It is
//! generated once, persisted, and reused verbatim on every later pass.

use std::fmt;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::traits::{StateKey, StateStore};

/// Stable client request identifier
///
/// Always a lower-case, hyphenated UUID
/// (`[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Parse an identity, accepting only the canonical UUID grammar
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let canonical = s.len() == 36
            && s.char_indices().all(|(i, c)| match i {
                8 | 13 | 18 | 23 => c == '-',
                _ => matches!(c, '0'..='9' | 'a'..='f'),
            });

        if !canonical {
            return Err(Error::invalid_input(format!(
                "'{s}' is not a canonical lower-case UUID"
            )));
        }

        Ok(Self(s.to_string()))
    }

    /// Generate a fresh random (version 4) identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Loads the persisted identity, creating one when absent or malformed
pub struct IdentityStore<'a> {
    store: &'a dyn StateStore,
}

impl<'a> IdentityStore<'a> {
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self { store }
    }

    /// Return the persisted identity, generating and persisting a new one
    /// if nothing valid is stored
    ///
    /// # Errors
    ///
    /// Only storage failures, which are fatal to the pass.
    pub async fn load_or_create(&self) -> Result<ClientIdentity> {
        match self.store.load(StateKey::ClientIdentity).await? {
            Some(raw) => match ClientIdentity::parse(&raw) {
                Ok(identity) => {
                    debug!("Loaded client identity {}", identity);
                    return Ok(identity);
                }
                Err(e) => warn!("Stored client identity is malformed ({}), regenerating", e),
            },
            None => debug!("No client identity stored"),
        }

        let identity = ClientIdentity::generate();
        self.store
            .store(StateKey::ClientIdentity, identity.as_str())
            .await?;
        info!("Generated new client identity");
        Ok(identity)
    }
}
