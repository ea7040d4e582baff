//! User model

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub organization: String,
    #[serde(default)]
    pub profile_image: Option<String>,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
}

impl User {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

impl Entity for User {
    const KIND: EntityKind = EntityKind::User;
}
