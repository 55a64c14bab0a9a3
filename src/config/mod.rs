//! Run configuration: a YAML file and command-line flags produce a
//! [`CloneSettings`] full of optional values, and [`CloneSettings::resolve`]
//! turns that into a fully populated [`CloneConfig`].
//!
//! Resolution is a pure function. It never prompts, never touches the
//! network and never looks at the file system beyond what it is given.
//!
//! ```yaml
//! source:
//!   host: db1.internal
//!   database: shop
//!   password: s3cret
//! target:
//!   host: localhost
//!   database: shop_copy
//! after_restore:
//!   - scripts/anonymize.sql
//!   - "update settings set value = 'dev' where name = 'env';"
//! rewrites:
//!   - find: "DEFINER=`admin`@`%`"
//!     replace: "                   "
//! ```

use crate::copier::DEFAULT_CHUNK_SIZE;
use crate::error::{CloneError, Result};
use crate::process::DEFAULT_MAX_OUTPUT_LINES;
use crate::rewrite::{RewriteRule, RewriteRuleConfig, RewriteSet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_PORT: u16 = 3306;

/// Charset/collation used for the target when nothing is configured and the
/// dump is rewritten to `utf8`.
pub const FALLBACK_CHARSET: &str = "utf8";
pub const FALLBACK_COLLATION: &str = "utf8_general_ci";
/// Fallback pair when original encodings are retained.
pub const FALLBACK_CHARSET_RETAINED: &str = "utf8mb4";
pub const FALLBACK_COLLATION_RETAINED: &str = "utf8mb4_0900_ai_ci";

/// Connection parameters for one side of the clone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
}

impl Endpoint {
    pub fn describe(&self) -> String {
        format!("{} on {}", self.database, self.host)
    }
}

/// Partially specified endpoint, as read from YAML or flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl EndpointSettings {
    fn merge(self, other: EndpointSettings) -> EndpointSettings {
        EndpointSettings {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            user: other.user.or(self.user),
            password: other.password.or(self.password),
            database: other.database.or(self.database),
        }
    }
}

/// mysqldump switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpFlags {
    pub routines: Option<bool>,
    pub hex_blob: Option<bool>,
    pub skip_lock_tables: Option<bool>,
    pub complete_insert: Option<bool>,
    pub single_transaction: Option<bool>,
}

impl DumpFlags {
    fn merge(self, other: DumpFlags) -> DumpFlags {
        DumpFlags {
            routines: other.routines.or(self.routines),
            hex_blob: other.hex_blob.or(self.hex_blob),
            skip_lock_tables: other.skip_lock_tables.or(self.skip_lock_tables),
            complete_insert: other.complete_insert.or(self.complete_insert),
            single_transaction: other.single_transaction.or(self.single_transaction),
        }
    }
}

/// Resolved mysqldump switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DumpOptions {
    pub routines: bool,
    pub hex_blob: bool,
    pub skip_lock_tables: bool,
    pub complete_insert: bool,
    pub single_transaction: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            routines: true,
            hex_blob: true,
            skip_lock_tables: false,
            complete_insert: false,
            single_transaction: false,
        }
    }
}

/// Which stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    RestoreOnly,
    DumpOnly,
}

/// Character set clause for `create database`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetCharset {
    pub charset: Option<String>,
    pub collation: Option<String>,
}

/// Everything a run can be configured with; all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneSettings {
    pub source: EndpointSettings,
    pub target: EndpointSettings,
    /// Host for source and target when not given per side.
    pub host: Option<String>,
    /// User for source and target when not given per side.
    pub user: Option<String>,
    /// Password for source and target when not given per side.
    pub password: Option<String>,
    pub dump_file: Option<PathBuf>,
    pub restore_only: bool,
    pub dump_only: bool,
    pub retain_original_encodings: bool,
    pub dump: DumpFlags,
    pub charset: Option<String>,
    pub collation: Option<String>,
    /// SQL files or literal statements run against the target afterwards.
    pub after_restore: Vec<String>,
    pub chunk_size: Option<usize>,
    pub max_output_lines: Option<usize>,
    pub rewrites: Vec<RewriteRuleConfig>,
    /// Directory searched first for mysqldump and mysql.
    pub bin_dir: Option<PathBuf>,
}

/// A fully resolved run.
#[derive(Debug, Clone)]
pub struct CloneConfig {
    pub source: Endpoint,
    pub target: Endpoint,
    pub dump_file: Option<PathBuf>,
    pub mode: RunMode,
    pub dump: DumpOptions,
    pub target_charset: TargetCharset,
    pub rewrites: RewriteSet,
    pub after_restore: Vec<String>,
    pub chunk_size: usize,
    pub max_output_lines: usize,
    pub bin_dir: Option<PathBuf>,
}

impl CloneSettings {
    /// Load settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CloneError::io(format!("reading {}", path.display()), e))?;
        serde_yaml_ng::from_str(&content).map_err(|e| CloneError::Config {
            problems: vec![format!("{}: {}", path.display(), e)],
        })
    }

    /// Layer `other` on top of `self`; anything set in `other` wins.
    pub fn merge(self, other: CloneSettings) -> CloneSettings {
        CloneSettings {
            source: self.source.merge(other.source),
            target: self.target.merge(other.target),
            host: other.host.or(self.host),
            user: other.user.or(self.user),
            password: other.password.or(self.password),
            dump_file: other.dump_file.or(self.dump_file),
            restore_only: self.restore_only || other.restore_only,
            dump_only: self.dump_only || other.dump_only,
            retain_original_encodings: self.retain_original_encodings
                || other.retain_original_encodings,
            dump: self.dump.merge(other.dump),
            charset: other.charset.or(self.charset),
            collation: other.collation.or(self.collation),
            after_restore: if other.after_restore.is_empty() {
                self.after_restore
            } else {
                other.after_restore
            },
            chunk_size: other.chunk_size.or(self.chunk_size),
            max_output_lines: other.max_output_lines.or(self.max_output_lines),
            rewrites: if other.rewrites.is_empty() {
                self.rewrites
            } else {
                other.rewrites
            },
            bin_dir: other.bin_dir.or(self.bin_dir),
        }
    }

    /// Fill in defaults and implied values, then validate.
    pub fn resolve(self) -> Result<CloneConfig> {
        let mode = match (self.restore_only, self.dump_only) {
            (true, true) => {
                return Err(CloneError::Config {
                    problems: vec!["--restore-only and --dump-only cannot be combined".into()],
                })
            }
            (true, false) => RunMode::RestoreOnly,
            (false, true) => RunMode::DumpOnly,
            (false, false) => RunMode::Full,
        };

        let shared_host = non_blank(self.host);
        let shared_user = non_blank(self.user);
        let shared_password = non_blank(self.password).map(dequote);

        let source_password = non_blank(self.source.password).map(dequote);
        let target_password = non_blank(self.target.password).map(dequote);
        let source_database = non_blank(self.source.database);
        let target_database = non_blank(self.target.database).or_else(|| source_database.clone());

        let source_host = non_blank(self.source.host)
            .or_else(|| shared_host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let target_host = non_blank(self.target.host)
            .or(shared_host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let source_user = non_blank(self.source.user)
            .or_else(|| shared_user.clone())
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        let target_user = non_blank(self.target.user)
            .or(shared_user)
            .unwrap_or_else(|| DEFAULT_USER.to_string());

        let (source_password, target_password) =
            if source_host == target_host && source_user == target_user {
                let password = shared_password
                    .or(source_password)
                    .or(target_password);
                (password.clone(), password)
            } else {
                (
                    source_password.or_else(|| shared_password.clone()),
                    target_password.or(shared_password),
                )
            };

        let mut problems = Vec::new();
        if mode != RunMode::RestoreOnly {
            if source_password.is_none() {
                problems.push("source password is required".to_string());
            }
            if source_database.is_none() {
                problems.push("source database is required".to_string());
            }
        }
        if mode != RunMode::DumpOnly {
            if target_password.is_none() {
                problems.push("target password is required".to_string());
            }
            if target_database.is_none() {
                problems.push("target database is required".to_string());
            }
        }
        if mode == RunMode::DumpOnly && self.dump_file.is_none() {
            problems.push("--dump-only needs --dump-file, otherwise the dump is discarded".into());
        }
        if mode == RunMode::RestoreOnly && self.dump_file.is_none() {
            problems.push("--restore-only needs --dump-file to restore from".into());
        }
        if self.chunk_size == Some(0) {
            problems.push("chunk size must be positive".to_string());
        }
        if !problems.is_empty() {
            return Err(CloneError::Config { problems });
        }

        let rewrites = if self.retain_original_encodings {
            RewriteSet::disabled()
        } else {
            let mut set = RewriteSet::charset_normalization();
            for rule in &self.rewrites {
                set = set.with_rule(RewriteRule::try_from(rule)?);
            }
            set
        };

        let target_charset = match (non_blank(self.charset), non_blank(self.collation)) {
            (None, None) if self.retain_original_encodings => TargetCharset {
                charset: Some(FALLBACK_CHARSET_RETAINED.to_string()),
                collation: Some(FALLBACK_COLLATION_RETAINED.to_string()),
            },
            (None, None) => TargetCharset {
                charset: Some(FALLBACK_CHARSET.to_string()),
                collation: Some(FALLBACK_COLLATION.to_string()),
            },
            (charset, collation) => TargetCharset { charset, collation },
        };

        let defaults = DumpOptions::default();
        let dump = DumpOptions {
            routines: self.dump.routines.unwrap_or(defaults.routines),
            hex_blob: self.dump.hex_blob.unwrap_or(defaults.hex_blob),
            skip_lock_tables: self.dump.skip_lock_tables.unwrap_or(defaults.skip_lock_tables),
            complete_insert: self.dump.complete_insert.unwrap_or(defaults.complete_insert),
            single_transaction: self
                .dump
                .single_transaction
                .unwrap_or(defaults.single_transaction),
        };

        Ok(CloneConfig {
            source: Endpoint {
                host: source_host,
                port: self.source.port.unwrap_or(DEFAULT_PORT),
                user: source_user,
                password: source_password.unwrap_or_default(),
                database: source_database.unwrap_or_default(),
            },
            target: Endpoint {
                host: target_host,
                port: self.target.port.unwrap_or(DEFAULT_PORT),
                user: target_user,
                password: target_password.unwrap_or_default(),
                database: target_database.unwrap_or_default(),
            },
            dump_file: self.dump_file,
            mode,
            dump,
            target_charset,
            rewrites,
            after_restore: self
                .after_restore
                .into_iter()
                .filter(|item| !item.trim().is_empty())
                .collect(),
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            max_output_lines: self.max_output_lines.unwrap_or(DEFAULT_MAX_OUTPUT_LINES),
            bin_dir: self.bin_dir,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Shells on some platforms hand passwords through with their quotes.
fn dequote(value: String) -> String {
    value.trim_matches('\'').to_string()
}
