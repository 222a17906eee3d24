use serde::Serialize;
use std::io::Write;

/// Write a final report as pretty-printed JSON
pub fn export_json<T: Serialize, W: Write>(report: &T, mut writer: W) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut writer, report)?;
    writeln!(writer)?;
    Ok(())
}
