//! Data models for QuickAudit

mod action;
mod audit;
mod entity;
mod file;
mod finding;
mod template;
mod user;

pub use action::Action;
pub use audit::{Audit, AuditStatus};
pub use entity::{ChangeKind, Entity, EntityKind, NewRecord, Record, SyncStatus};
pub use file::FileMeta;
pub use finding::{Finding, FindingStatus, Severity};
pub use template::Template;
pub use user::User;
