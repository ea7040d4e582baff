//! Generic entity record and sync metadata

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::now_iso8601;

/// The kinds of entity persisted locally and remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Template,
    Audit,
    Finding,
    Action,
    File,
}

impl EntityKind {
    pub const ALL: [Self; 6] = [
        Self::User,
        Self::Template,
        Self::Audit,
        Self::Finding,
        Self::Action,
        Self::File,
    ];

    /// Local table name
    pub const fn table(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Template => "templates",
            Self::Audit => "audits",
            Self::Finding => "findings",
            Self::Action => "actions",
            Self::File => "files",
        }
    }

    /// Remote collection endpoint
    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::User => "/users",
            Self::Template => "/templates",
            Self::Audit => "/audits",
            Self::Finding => "/findings",
            Self::Action => "/actions",
            Self::File => "/files",
        }
    }

    /// Prefix used by realtime event names, e.g. `audit` in `audit.updated`
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Template => "template",
            Self::Audit => "audit",
            Self::Finding => "finding",
            Self::Action => "action",
            Self::File => "file",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.event_name() == name)
    }

    /// Remote endpoint for a single record, with the id percent-encoded.
    pub fn item_endpoint(self, id: &str) -> String {
        format!("{}/{}", self.endpoint(), urlencoding::encode(id))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Whether every mutation of a record has been confirmed by the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Synced,
    PendingSync,
}

impl SyncStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::PendingSync => "pending_sync",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "synced" => Ok(Self::Synced),
            "pending_sync" => Ok(Self::PendingSync),
            other => Err(Error::InvalidInput(format!("unknown sync status: {other}"))),
        }
    }
}

/// What happened to a record, shared by local notifications and realtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::InvalidInput(format!("unknown change kind: {other}"))),
        }
    }
}

/// Domain fields of an entity kind.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;
}

/// A stored entity: domain fields plus identity and sync metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    pub id: String,
    #[serde(flatten)]
    pub fields: T,
    pub sync_status: SyncStatus,
    pub sync_id: String,
    pub created_at: String,
    pub updated_at: String,
}

impl<T: Entity> Record<T> {
    /// Decode a record from its JSON object form.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|error| {
            Error::InvalidInput(format!("invalid {} record: {error}", T::KIND))
        })
    }

    /// Decode a stored row. Null columns are treated as absent so that
    /// defaulted fields fall back to their defaults.
    pub fn from_row(mut row: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        row.retain(|_, value| !value.is_null());
        Self::from_value(serde_json::Value::Object(row))
    }

    /// JSON object form including local sync metadata.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Wire form sent to the remote: everything except the local sync status.
    pub fn to_wire(&self) -> Result<serde_json::Value> {
        let mut value = self.to_value()?;
        if let Some(object) = value.as_object_mut() {
            object.remove("sync_status");
        }
        Ok(value)
    }

    pub fn is_pending(&self) -> bool {
        self.sync_status == SyncStatus::PendingSync
    }
}

/// Input for `Repository::create`: optional caller ids plus domain fields.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord<T> {
    pub id: Option<String>,
    pub sync_id: Option<String>,
    pub fields: T,
}

impl<T: Entity> NewRecord<T> {
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_sync_id(mut self, sync_id: impl Into<String>) -> Self {
        self.sync_id = Some(sync_id.into());
        self
    }

    /// Fill in generated ids and writer timestamps; the record starts pending.
    pub fn into_record(self) -> Record<T> {
        let now = now_iso8601();
        Record {
            id: self
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            fields: self.fields,
            sync_status: SyncStatus::PendingSync,
            sync_id: self
                .sync_id
                .filter(|sync_id| !sync_id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

impl<T: Entity> From<T> for NewRecord<T> {
    fn from(fields: T) -> Self {
        Self {
            id: None,
            sync_id: None,
            fields,
        }
    }
}
