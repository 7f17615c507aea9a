//! Telemetry log persistence.
//!
//! One headerless CSV line per captured frame: `<frame_ref>,<speed>,<angle>`.
//! The log is written to a sibling temp file, synced, then renamed into
//! place, so readers only ever see a complete log.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// One captured frame and the command in effect when it was taken.
#[derive(Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub frame_ref: String,
    pub speed: f32,
    pub angle: f32,
}

/// Write `records` as the complete log at `path`.
pub fn write_log(path: &Path, records: &[TelemetryRecord]) -> Result<()> {
    let tmp = temp_path(path)?;
    let result = write_records(&tmp, records).and_then(|_| {
        fs::rename(&tmp, path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_records(tmp: &Path, records: &[TelemetryRecord]) -> Result<()> {
    let file = File::create(tmp).with_context(|| format!("create {}", tmp.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(BufWriter::new(file));
    for record in records {
        if record.frame_ref.contains(',') {
            return Err(anyhow!("frame reference {:?} contains a comma", record.frame_ref));
        }
        let speed = record.speed.to_string();
        let angle = record.angle.to_string();
        writer.write_record([record.frame_ref.as_str(), speed.as_str(), angle.as_str()])?;
    }
    let buffered = writer
        .into_inner()
        .map_err(|err| anyhow!("flush telemetry log {}: {}", tmp.display(), err.error()))?;
    let file = buffered
        .into_inner()
        .map_err(|err| anyhow!("flush telemetry log {}: {}", tmp.display(), err.error()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", tmp.display()))?;
    Ok(())
}

/// Read a telemetry log back.
pub fn read_log(path: &Path) -> Result<Vec<TelemetryRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("open telemetry log {}", path.display()))?;
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.len() != 3 {
            return Err(anyhow!(
                "telemetry line {} has {} fields",
                records.len() + 1,
                row.len()
            ));
        }
        records.push(TelemetryRecord {
            frame_ref: row[0].to_string(),
            speed: row[1]
                .parse()
                .with_context(|| format!("bad speed {:?}", &row[1]))?,
            angle: row[2]
                .parse()
                .with_context(|| format!("bad angle {:?}", &row[2]))?,
        });
    }
    Ok(records)
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("telemetry log path {} has no file name", path.display()))?;
    let mut tmp_name = name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}
