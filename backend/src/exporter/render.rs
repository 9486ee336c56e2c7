//! Serialization of tasks and task runs into export file contents.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{AppError, Result};
use crate::exporter::ExportFormat;
use crate::models::task::Task;
use crate::models::task_run::TaskRun;

/// A flat record: fixed columns followed by the free-form `info` payload.
pub trait ExportRecord: serde::Serialize {
    fn fixed_headers() -> &'static [&'static str];
    fn fixed_values(&self) -> Vec<String>;
    fn info(&self) -> &Value;
}

impl ExportRecord for Task {
    fn fixed_headers() -> &'static [&'static str] {
        &["id", "project_id", "created", "state", "n_answers"]
    }

    fn fixed_values(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.project_id.to_string(),
            self.created.clone(),
            self.state.clone(),
            self.n_answers.to_string(),
        ]
    }

    fn info(&self) -> &Value {
        &self.info
    }
}

impl ExportRecord for TaskRun {
    fn fixed_headers() -> &'static [&'static str] {
        &[
            "id",
            "project_id",
            "task_id",
            "user_id",
            "user_ip",
            "created",
            "finish_time",
        ]
    }

    fn fixed_values(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.project_id.to_string(),
            self.task_id.to_string(),
            self.user_id.map(|id| id.to_string()).unwrap_or_default(),
            self.user_ip.clone().unwrap_or_default(),
            self.created.clone().unwrap_or_default(),
            self.finish_time.clone(),
        ]
    }

    fn info(&self) -> &Value {
        &self.info
    }
}

pub fn render<R: ExportRecord>(records: &[R], format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_vec(records)?),
        ExportFormat::Csv => render_csv(records),
    }
}

/// Scalars render bare; nested values render as compact JSON.
fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// CSV with one `info_<key>` column per key found in any object `info`.
/// When no record carries an object `info`, a single `info` column is used.
fn render_csv<R: ExportRecord>(records: &[R]) -> Result<Vec<u8>> {
    let info_keys: BTreeSet<String> = records
        .iter()
        .filter_map(|r| r.info().as_object())
        .flat_map(|obj| obj.keys().cloned())
        .collect();
    let flatten = !info_keys.is_empty();

    let mut writer = csv::Writer::from_writer(vec![]);

    let mut headers: Vec<String> = R::fixed_headers().iter().map(|h| h.to_string()).collect();
    if flatten {
        headers.extend(info_keys.iter().map(|k| format!("info_{}", k)));
    } else {
        headers.push("info".to_string());
    }
    writer.write_record(&headers)?;

    for record in records {
        let mut row = record.fixed_values();
        match (flatten, record.info()) {
            (true, Value::Object(obj)) => {
                row.extend(info_keys.iter().map(|k| obj.get(k).map(cell).unwrap_or_default()));
            }
            // Non-object info in a flattened export lands in no column
            (true, _) => row.extend(info_keys.iter().map(|_| String::new())),
            (false, info) => row.push(cell(info)),
        }
        writer.write_record(&row)?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to flush CSV writer: {}", e)))
}
