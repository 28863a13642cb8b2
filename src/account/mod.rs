//! Account entity and role scoping.

mod registry;
mod store;

pub use registry::*;
pub use store::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role an account registered under.
///
/// Federated-only accounts carry no role until they go through
/// registration (see [`AccountRegistry::register`]).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "account_role", rename_all = "lowercase")]
pub enum Role {
    Director,
    Artist,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Role::Director => write!(f, "director"),
            Role::Artist => write!(f, "artist"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "director" => Ok(Role::Director),
            "artist" => Ok(Role::Artist),
            _ => Err(format!(
                "invalid role '{value}', choose either 'director' or 'artist'"
            )),
        }
    }
}

/// Account as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "snake_case")]
pub struct Account {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub mobile_number: Option<String>,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub is_verified: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Account {
    /// Full name for greeting messages.
    pub fn display_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::from_str("director").unwrap(), Role::Director);
        assert_eq!(Role::from_str("artist").unwrap(), Role::Artist);
        assert!(Role::from_str("producer").is_err());
        assert_eq!(Role::Artist.to_string(), "artist");
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let account = Account {
            id: Uuid::new_v4(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            mobile_number: Some("+3361234".into()),
            password_hash: Some("$argon2id$secret".into()),
            role: Some(Role::Director),
            is_verified: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("password_hash"));
        assert!(json.contains("\"role\":\"director\""));
    }

    #[test]
    fn test_display_name_without_last_name() {
        let account = Account {
            id: Uuid::new_v4(),
            first_name: "Prince".into(),
            last_name: String::new(),
            email: "prince@example.com".into(),
            mobile_number: None,
            password_hash: None,
            role: None,
            is_verified: true,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        assert_eq!(account.display_name(), "Prince");
    }
}
