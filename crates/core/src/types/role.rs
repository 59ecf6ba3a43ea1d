//! Marketplace roles.

use core::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Marketplace role of a signed-in user.
///
/// Roles are a closed set: every route gate matches exhaustively, so adding a
/// role is a compile error until every gate handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Marketplace operator with access to every collection.
    Admin,
    /// Seller of textile waste.
    Factory,
    /// Purchaser of textile waste.
    Buyer,
}

impl Role {
    /// Every role, in display order.
    pub const ALL: [Self; 3] = [Self::Admin, Self::Factory, Self::Buyer];

    /// Landing path for a user holding this role.
    #[must_use]
    pub const fn home_path(self) -> &'static str {
        match self {
            Self::Admin => "/admin",
            Self::Factory => "/factory",
            Self::Buyer => "/buyer",
        }
    }

    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Factory => "factory",
            Self::Buyer => "buyer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "factory" => Ok(Self::Factory),
            "buyer" => Ok(Self::Buyer),
            _ => Err(format!("invalid role: {s}")),
        }
    }
}

/// Deserialize an optional role, mapping unknown role names to `None`.
///
/// Profile rows are written by other tools too; a role this build does not know
/// must not make a whole collection undecodable.
///
/// # Errors
///
/// Returns an error only if the value is neither a string nor null.
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}
