//! Column layout of the entity tables.
//!
//! Mirrors the DDL in `migrations.rs`. The store uses it to validate column
//! names before they reach SQL and to narrow stored values back to their
//! logical JSON types on read.

use crate::models::EntityKind;

use super::store::Row;

/// Logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    /// Stored as 0/1, read back as a JSON boolean
    Bool,
    /// Stored as JSON text, read back as structured JSON
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: ColumnKind) -> Column {
    Column {
        name,
        kind,
        required: false,
    }
}

use ColumnKind::{Bool, Integer, Json, Text};

/// Columns shared by every entity table, in DDL order after the domain columns.
const ID: Column = required("id", Text);
const SYNC_STATUS: Column = optional("sync_status", Text);
const SYNC_ID: Column = required("sync_id", Text);
const CREATED_AT: Column = required("created_at", Text);
const UPDATED_AT: Column = required("updated_at", Text);

const USERS: &[Column] = &[
    ID,
    required("email", Text),
    required("first_name", Text),
    required("last_name", Text),
    required("role", Text),
    required("organization", Text),
    optional("profile_image", Text),
    optional("settings", Json),
    SYNC_STATUS,
    SYNC_ID,
    CREATED_AT,
    UPDATED_AT,
];

const TEMPLATES: &[Column] = &[
    ID,
    required("title", Text),
    optional("description", Text),
    required("category", Text),
    required("sections", Json),
    optional("is_active", Bool),
    SYNC_STATUS,
    SYNC_ID,
    CREATED_AT,
    UPDATED_AT,
];

const AUDITS: &[Column] = &[
    ID,
    required("title", Text),
    required("template", Text),
    required("location", Text),
    required("auditor", Text),
    optional("supervisor", Text),
    required("status", Text),
    optional("score", Integer),
    optional("start_time", Text),
    optional("end_time", Text),
    optional("sections", Json),
    optional("notes", Text),
    SYNC_STATUS,
    SYNC_ID,
    CREATED_AT,
    UPDATED_AT,
];

const FINDINGS: &[Column] = &[
    ID,
    required("audit_id", Text),
    required("title", Text),
    optional("description", Text),
    required("severity", Text),
    required("status", Text),
    optional("location", Text),
    optional("assigned_to", Text),
    optional("due_date", Text),
    optional("photos", Json),
    optional("notes", Text),
    SYNC_STATUS,
    SYNC_ID,
    CREATED_AT,
    UPDATED_AT,
];

const ACTIONS: &[Column] = &[
    ID,
    required("title", Text),
    optional("description", Text),
    required("audit", Text),
    required("assignee", Text),
    required("assigned_by", Text),
    required("due_date", Text),
    required("status", Text),
    optional("progress", Integer),
    required("priority", Text),
    optional("completed_date", Text),
    optional("attachments", Json),
    optional("comments", Json),
    SYNC_STATUS,
    SYNC_ID,
    CREATED_AT,
    UPDATED_AT,
];

const FILES: &[Column] = &[
    ID,
    required("name", Text),
    required("path", Text),
    required("size", Integer),
    required("mime_type", Text),
    required("entity_type", Text),
    required("entity_id", Text),
    optional("is_uploaded", Bool),
    SYNC_STATUS,
    SYNC_ID,
    CREATED_AT,
    UPDATED_AT,
];

/// Columns of the table backing `kind`.
pub const fn columns(kind: EntityKind) -> &'static [Column] {
    match kind {
        EntityKind::User => USERS,
        EntityKind::Template => TEMPLATES,
        EntityKind::Audit => AUDITS,
        EntityKind::Finding => FINDINGS,
        EntityKind::Action => ACTIONS,
        EntityKind::File => FILES,
    }
}

pub fn column(kind: EntityKind, name: &str) -> Option<&'static Column> {
    columns(kind).iter().find(|column| column.name == name)
}

/// Drop keys that are not columns of `kind`, returning the dropped names.
pub fn retain_known_columns(kind: EntityKind, row: &mut Row) -> Vec<String> {
    let unknown: Vec<String> = row
        .keys()
        .filter(|key| column(kind, key).is_none())
        .cloned()
        .collect();
    for key in &unknown {
        row.remove(key);
    }
    unknown
}
