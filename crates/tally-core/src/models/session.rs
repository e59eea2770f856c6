//! Signed-in user session as seen by the sync core

use serde::{Deserialize, Serialize};

/// The authenticated user supplied by the auth layer.
///
/// The sync core only uses it as a gate: no session, no sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub username: String,
    pub role: String,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            role: role.into(),
        }
    }
}
