//! Finding model

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    #[default]
    Open,
    InProgress,
    Resolved,
}

/// An issue recorded during an audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub audit_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub status: FindingStatus,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    /// Photo file ids
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Finding {
    pub fn new(audit_id: impl Into<String>, title: impl Into<String>, severity: Severity) -> Self {
        Self {
            audit_id: audit_id.into(),
            title: title.into(),
            description: None,
            severity,
            status: FindingStatus::Open,
            location: None,
            assigned_to: None,
            due_date: None,
            photos: Vec::new(),
            notes: None,
        }
    }
}

impl Entity for Finding {
    const KIND: EntityKind = EntityKind::Finding;
}
