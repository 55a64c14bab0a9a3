//! Locating the mysqldump and mysql executables.

use crate::error::{CloneError, Result};
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const DUMP_TOOL: &str = "mysqldump";
pub const CLIENT_TOOL: &str = "mysql";

/// Resolved paths of both external tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub mysqldump: PathBuf,
    pub mysql: PathBuf,
}

impl ToolPaths {
    /// Search `bin_dir`, then `$MYSQL_BIN`, then `$PATH`, then (on Windows)
    /// the default MySQL Server install locations.
    pub fn discover(bin_dir: Option<&Path>) -> Result<Self> {
        let dirs = search_dirs(
            bin_dir,
            env::var_os("MYSQL_BIN"),
            env::var_os("PATH"),
        );
        Self::find_in(&dirs)
    }

    /// Look for both tools in the given directories, first hit wins.
    pub fn find_in(dirs: &[PathBuf]) -> Result<Self> {
        let mysqldump = find_executable(DUMP_TOOL, dirs);
        let mysql = find_executable(CLIENT_TOOL, dirs);
        match (mysqldump, mysql) {
            (Some(mysqldump), Some(mysql)) => {
                tracing::info!(mysqldump = %mysqldump.display(), mysql = %mysql.display(), "located tools");
                Ok(Self { mysqldump, mysql })
            }
            (mysqldump, mysql) => {
                let mut missing = Vec::new();
                if mysqldump.is_none() {
                    missing.push(DUMP_TOOL.to_string());
                }
                if mysql.is_none() {
                    missing.push(CLIENT_TOOL.to_string());
                }
                Err(CloneError::ToolNotFound { missing })
            }
        }
    }
}

fn search_dirs(
    bin_dir: Option<&Path>,
    mysql_bin: Option<OsString>,
    path: Option<OsString>,
) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    dirs.extend(bin_dir.map(Path::to_path_buf));
    dirs.extend(
        mysql_bin
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from),
    );
    if let Some(path) = path {
        dirs.extend(env::split_paths(&path).filter(|dir| !dir.as_os_str().is_empty()));
    }
    dirs.extend(default_install_dir());
    dirs
}

fn find_executable(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    let file_name = format!("{}{}", name, env::consts::EXE_SUFFIX);
    dirs.iter().map(|dir| dir.join(&file_name)).find(|candidate| {
        tracing::debug!(path = %candidate.display(), "search");
        candidate.is_file()
    })
}

#[cfg(windows)]
fn default_install_dir() -> Option<PathBuf> {
    ["ProgramFiles", "ProgramFiles(x86)"]
        .iter()
        .filter_map(env::var_os)
        .map(|base| PathBuf::from(base).join("MySQL"))
        .filter(|base| base.is_dir())
        .find_map(|base| {
            std::fs::read_dir(&base).ok()?.flatten().find_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_lowercase();
                name.starts_with("mysql server")
                    .then(|| entry.path().join("bin"))
            })
        })
}

#[cfg(not(windows))]
fn default_install_dir() -> Option<PathBuf> {
    None
}
