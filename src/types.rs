//! Basic type definitions for the relay
//!
//! Provides newtype wrappers for type safety:
//! - `ClientId`: opaque per-connection identifier
//! - `ClientDescriptor`: domain-level view of a room member (no transport handle)

use uuid::Uuid;

/// Unique client identifier (newtype pattern)
///
/// Opaque string. Generated connections get a UUID v4, but any string
/// is accepted so collaborators and tests can pick their own ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub String);

impl ClientId {
    /// Create a new random client ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A room member as the chat domain sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDescriptor {
    pub id: ClientId,
    pub name: String,
}

impl ClientDescriptor {
    pub fn new(id: impl Into<ClientId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}
