//! File metadata model

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind};

/// Metadata for a locally captured file (photo, attachment) and its upload state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    /// Local filesystem path
    pub path: String,
    /// Size in bytes
    pub size: i64,
    pub mime_type: String,
    /// Owning entity kind, e.g. `finding`
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    pub is_uploaded: bool,
}

impl Entity for FileMeta {
    const KIND: EntityKind = EntityKind::File;
}
