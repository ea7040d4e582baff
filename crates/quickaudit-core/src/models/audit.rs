//! Audit model

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind};

/// Lifecycle of an audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    #[default]
    Draft,
    InProgress,
    Completed,
    Approved,
    Rejected,
}

impl AuditStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for AuditStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown audit status: {other}"
            ))),
        }
    }
}

/// An inspection performed against a template at a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub title: String,
    /// Template id
    pub template: String,
    pub location: String,
    /// Auditor user id
    pub auditor: String,
    #[serde(default)]
    pub supervisor: Option<String>,
    #[serde(default)]
    pub status: AuditStatus,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// Filled-in template sections
    #[serde(default)]
    pub sections: Option<serde_json::Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Audit {
    /// A draft audit with only the required fields set.
    pub fn new(
        title: impl Into<String>,
        template: impl Into<String>,
        location: impl Into<String>,
        auditor: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            template: template.into(),
            location: location.into(),
            auditor: auditor.into(),
            supervisor: None,
            status: AuditStatus::Draft,
            score: None,
            start_time: None,
            end_time: None,
            sections: None,
            notes: None,
        }
    }
}

impl Entity for Audit {
    const KIND: EntityKind = EntityKind::Audit;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_status_parse() {
        assert_eq!("in_progress".parse::<AuditStatus>().unwrap(), AuditStatus::InProgress);
        assert!("archived".parse::<AuditStatus>().is_err());
    }

    #[test]
    fn audit_new_is_draft() {
        let audit = Audit::new("Fire exits", "tpl", "Warehouse", "user-1");
        assert_eq!(audit.status, AuditStatus::Draft);
        assert!(audit.score.is_none());
    }
}
