//! Report serialization.

use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::models::ResearchReport;

/// Write the report as pretty-printed JSON, replacing any previous file.
pub fn write_report(path: &Path, report: &ResearchReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("serializing report")?;
    fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
    Ok(())
}
