use std::path::Path;

use quickaudit_core::db::Filters;
use quickaudit_core::models::{Audit, AuditStatus, Record};
use serde_json::json;

use crate::cli::AuditCommands;
use crate::commands::common::{normalize_id, short_id, LocalContext};
use crate::error::CliError;

pub async fn run_audit(command: AuditCommands, data_dir: &Path) -> Result<(), CliError> {
    let context = LocalContext::open(data_dir).await?;
    let result = dispatch(command, &context).await;
    context.close().await?;
    result
}

async fn dispatch(command: AuditCommands, context: &LocalContext) -> Result<(), CliError> {
    match command {
        AuditCommands::Add {
            title,
            template,
            location,
            auditor,
            status,
        } => {
            let mut audit = Audit::new(title, template, location, auditor);
            if let Some(status) = status {
                audit.status = status.parse()?;
            }
            let record = add_audit(context, audit).await?;
            println!("{}", record.id);
        }
        AuditCommands::List { status, json } => {
            let status = status.map(|status| status.parse::<AuditStatus>()).transpose()?;
            let audits = list_audits(context, status).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&audits)?);
            } else if audits.is_empty() {
                println!("No audits.");
            } else {
                for audit in &audits {
                    println!("{}", format_audit_line(audit));
                }
            }
        }
        AuditCommands::Show { id } => {
            let audit = find_audit(context, &id).await?;
            println!("{}", serde_json::to_string_pretty(&audit)?);
        }
        AuditCommands::SetStatus { id, status } => {
            let status = status.parse::<AuditStatus>()?;
            let audit = set_status(context, &id, status).await?;
            println!("{} -> {}", audit.id, audit.fields.status.as_str());
        }
        AuditCommands::Delete { id } => {
            let id = delete_audit(context, &id).await?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}

pub async fn add_audit(context: &LocalContext, audit: Audit) -> Result<Record<Audit>, CliError> {
    Ok(context.repository::<Audit>().create(audit).await?)
}

pub async fn list_audits(
    context: &LocalContext,
    status: Option<AuditStatus>,
) -> Result<Vec<Record<Audit>>, CliError> {
    let mut filters = Filters::new();
    if let Some(status) = status {
        filters.insert("status".to_string(), json!(status.as_str()));
    }
    Ok(context.repository::<Audit>().list(&filters).await?)
}

pub async fn find_audit(context: &LocalContext, raw_id: &str) -> Result<Record<Audit>, CliError> {
    let id = normalize_id(raw_id)?;
    context
        .repository::<Audit>()
        .get(&id)
        .await?
        .ok_or(CliError::AuditNotFound(id))
}

pub async fn set_status(
    context: &LocalContext,
    raw_id: &str,
    status: AuditStatus,
) -> Result<Record<Audit>, CliError> {
    let id = normalize_id(raw_id)?;
    match context
        .repository::<Audit>()
        .update(&id, json!({ "status": status.as_str() }))
        .await
    {
        Ok(audit) => Ok(audit),
        Err(error) if error.is_not_found() => Err(CliError::AuditNotFound(id)),
        Err(error) => Err(error.into()),
    }
}

pub async fn delete_audit(context: &LocalContext, raw_id: &str) -> Result<String, CliError> {
    let id = normalize_id(raw_id)?;
    match context.repository::<Audit>().delete(&id).await {
        Ok(()) => Ok(id),
        Err(error) if error.is_not_found() => Err(CliError::AuditNotFound(id)),
        Err(error) => Err(error.into()),
    }
}

pub fn format_audit_line(audit: &Record<Audit>) -> String {
    let marker = if audit.is_pending() { "*" } else { " " };
    format!(
        "{}{} {:<11} {} @ {}",
        short_id(&audit.id),
        marker,
        audit.fields.status.as_str(),
        audit.fields.title,
        audit.fields.location
    )
}
