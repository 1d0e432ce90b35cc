use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use tracing::info;

use crate::storage::write_atomic;
use crate::task::Task;

pub const CSV_HEADER: &str = "ID,Title,Description,Status";

/// Renders tasks as CSV. Title and description are always quoted; the id and
/// status never contain separators and are written bare.
pub fn tasks_to_csv(tasks: &[Task]) -> String {
    let mut out = String::from(CSV_HEADER);
    for task in tasks {
        out.push('\n');
        out.push_str(&format!(
            "{},{},{},{}",
            task.id,
            quote(&task.title),
            quote(task.description_text()),
            task.status
        ));
    }
    out
}

pub fn export_file_name(date: NaiveDate) -> String {
    format!("tasks_{}.csv", date.format("%Y-%m-%d"))
}

/// Writes the CSV for `tasks` into `dir`, returning the file path.
#[tracing::instrument(skip(tasks), fields(count = tasks.len()))]
pub fn write_csv(dir: &Path, tasks: &[Task], date: NaiveDate) -> anyhow::Result<PathBuf> {
    let path = dir.join(export_file_name(date));
    write_atomic(&path, &tasks_to_csv(tasks))
        .with_context(|| format!("failed to export tasks to {}", path.display()))?;
    info!(file = %path.display(), "exported tasks");
    Ok(path)
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
