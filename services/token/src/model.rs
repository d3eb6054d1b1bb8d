//! Account record as seen by the token service.

use serde::{Deserialize, Serialize};

/// The user a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable unique ID, used as `sub`
    pub id: String,
    /// Whether access tokens carry `isAdmin`
    #[serde(default)]
    pub is_admin: bool,
}

impl User {
    /// Non-admin user with `id`.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_admin: false,
        }
    }

    /// Set the admin flag.
    #[must_use]
    pub const fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }
}
