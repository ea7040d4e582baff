//! Local persistence for QuickAudit

mod migrations;
mod repository;
mod schema;
mod store;

pub use migrations::CURRENT_VERSION as SCHEMA_VERSION;
pub use repository::Repository;
pub use store::{Filters, LocalStore, Row};
pub(crate) use schema::retain_known_columns;
pub(crate) use store::stored_form;
