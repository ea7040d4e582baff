//! Corrective action model

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind};

/// A follow-up task raised from an audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Audit id
    pub audit: String,
    pub assignee: String,
    pub assigned_by: String,
    pub due_date: String,
    pub status: String,
    /// Percent complete
    #[serde(default)]
    pub progress: i64,
    pub priority: String,
    #[serde(default)]
    pub completed_date: Option<String>,
    #[serde(default)]
    pub attachments: Option<serde_json::Value>,
    #[serde(default)]
    pub comments: Option<serde_json::Value>,
}

impl Entity for Action {
    const KIND: EntityKind = EntityKind::Action;
}
