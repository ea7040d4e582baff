//! Audit template model

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind};

/// Checklist definition audits are performed against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    pub sections: serde_json::Value,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}

impl Entity for Template {
    const KIND: EntityKind = EntityKind::Template;
}

impl Template {
    pub fn new(
        title: impl Into<String>,
        category: impl Into<String>,
        sections: serde_json::Value,
    ) -> Self {
        Self {
            title: title.into(),
            description: None,
            category: category.into(),
            sections,
            is_active: true,
        }
    }
}
