//! User profiles (the `users` collection).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Entity, EntityKind, Validate, ValidationError, check_optional, require_text};
use crate::types::role::deserialize_lenient;
use crate::{Role, UserId};

/// Public profile of a marketplace user.
///
/// The id is the identity provider's user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    /// `None` when the row holds a role this build does not recognize.
    #[serde(default, deserialize_with = "deserialize_lenient")]
    pub role: Option<Role>,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Profile row created right after sign-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileDraft {
    pub id: UserId,
    pub role: Role,
    pub display_name: String,
    pub email: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
}

/// Editable profile fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Entity for Profile {
    type Id = UserId;
    type Draft = ProfileDraft;
    type Patch = ProfilePatch;

    const KIND: EntityKind = EntityKind::Users;

    fn id(&self) -> UserId {
        self.id
    }
}

impl Validate for ProfileDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        require_text("display_name", &self.display_name)
    }
}

impl Validate for ProfilePatch {
    fn validate(&self) -> Result<(), ValidationError> {
        check_optional(self.display_name.as_ref(), |name| {
            require_text("display_name", name)
        })
    }
}
