use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

/// Prefix of numbered session directories under the data root.
pub const SESSION_DIR_PREFIX: &str = "img";

/// Upper bound on the directory scan.
const MAX_SESSION_INDEX: u32 = 1_000_000;

/// A freshly created session directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionDir {
    pub index: u32,
    pub path: PathBuf,
}

impl SessionDir {
    /// Directory name relative to the data root (`img<N>`).
    pub fn name(&self) -> String {
        session_dir_name(self.index)
    }

    /// Telemetry log path for this session (`img<N>/log_<N>.csv`).
    pub fn log_path(&self) -> PathBuf {
        self.path.join(format!("log_{}.csv", self.index))
    }
}

pub fn session_dir_name(index: u32) -> String {
    format!("{}{}", SESSION_DIR_PREFIX, index)
}

/// Create the first unused `img<N>` directory with `N >= start`.
///
/// Indices are tried in increasing order. Creation uses `create_dir`, so a
/// directory that appears between the check and the create is skipped rather
/// than reused.
pub fn allocate_session_dir(data_root: &Path, start: u32) -> Result<SessionDir> {
    fs::create_dir_all(data_root)
        .with_context(|| format!("create data root {}", data_root.display()))?;

    let mut index = start;
    while index < MAX_SESSION_INDEX {
        let path = data_root.join(session_dir_name(index));
        if !path.exists() {
            match fs::create_dir(&path) {
                Ok(()) => return Ok(SessionDir { index, path }),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create session directory {}", path.display()))
                }
            }
        }
        index += 1;
    }
    Err(anyhow!(
        "no free session directory under {} (scanned from {})",
        data_root.display(),
        start
    ))
}
