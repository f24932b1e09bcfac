//! Identity Port - Authenticated Caller and User Lookup
//!
//! Token decoding and role checks happen upstream. The core receives the
//! resolved identity as an explicit argument and looks the user up
//! through `UserDirectory`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::User;

/// Claims of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  pub email: String,
  pub role: String,
}

impl Identity {
  pub fn new(email: impl Into<String>, role: impl Into<String>) -> Self {
    Self {
      email: email.into(),
      role: role.into(),
    }
  }
}

/// Trait for user directory providers.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
  /// Find a user by email.
  async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
}
