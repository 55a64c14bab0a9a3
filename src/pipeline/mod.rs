//! The clone pipeline: dump, create target, restore, after-restore commands.
//!
//! Stages run strictly one after another on the calling thread. The first
//! error moves the pipeline to [`Stage::Failed`] and is returned as is, so a
//! failing tool's exit code reaches `main` untouched. Nothing is rolled back:
//! `drop database if exists` at the start of target creation is what makes a
//! rerun safe.

use crate::config::{CloneConfig, DumpOptions, Endpoint, RunMode, TargetCharset};
use crate::copier::{ChunkedCopier, SizedReader, TransferSource};
use crate::dumpfile::{DumpFile, DumpReader};
use crate::error::{CloneError, Result};
use crate::process::{CommandSpec, ManagedProcess, OutputMode};
use crate::progress::ProgressContext;
use crate::tools::ToolPaths;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Dumping,
    CreatingTarget,
    Restoring,
    RunningAfterCommands,
    Done,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Idle => write!(f, "idle"),
            Stage::Dumping => write!(f, "dumping"),
            Stage::CreatingTarget => write!(f, "creating target"),
            Stage::Restoring => write!(f, "restoring"),
            Stage::RunningAfterCommands => write!(f, "running after-restore commands"),
            Stage::Done => write!(f, "done"),
            Stage::Failed => write!(f, "failed"),
        }
    }
}

/// Timing and volume for one completed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub elapsed_secs: f64,
    pub bytes: u64,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct CloneReport {
    pub mode: RunMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Endpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Endpoint>,
    /// Only set when the dump was kept on disk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_file: Option<String>,
    pub charset_rewritten: bool,
    pub stages: Vec<StageReport>,
    pub elapsed_secs: f64,
}

/// mysqldump invocation for the source endpoint.
pub fn dump_command(tool: &Path, source: &Endpoint, options: &DumpOptions) -> CommandSpec {
    let mut command = CommandSpec::new(tool)
        .args(["-h", source.host.as_str(), "-P"])
        .arg(source.port.to_string())
        .args(["-u", source.user.as_str()])
        .arg(format!("-p{}", source.password));
    if options.routines {
        command = command.arg("--routines");
    }
    if options.hex_blob {
        command = command.arg("--hex-blob");
    }
    if options.skip_lock_tables {
        command = command.arg("--skip-lock-tables");
    }
    if options.complete_insert {
        command = command.arg("--complete-insert");
    }
    if options.single_transaction {
        command = command.arg("--single-transaction");
    }
    command.arg(source.database.as_str())
}

/// mysql client invocation, optionally bound to the target database.
pub fn client_command(tool: &Path, target: &Endpoint, select_database: bool) -> CommandSpec {
    let mut command = CommandSpec::new(tool)
        .args(["-h", target.host.as_str(), "-P"])
        .arg(target.port.to_string());
    if select_database {
        command = command.args(["-D", target.database.as_str()]);
    }
    command
        .args(["-u", target.user.as_str()])
        .arg(format!("-p{}", target.password))
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Statements that (re)create the target database.
pub fn creation_script(database: &str, charset: &TargetCharset) -> Vec<String> {
    let name = quote_identifier(database);
    let mut create = format!("create database {name}");
    if let Some(charset) = &charset.charset {
        create.push_str(&format!(" character set {charset}"));
    }
    if let Some(collation) = &charset.collation {
        create.push_str(&format!(" collate {collation}"));
    }
    create.push(';');
    vec![format!("drop database if exists {name};"), create]
}

/// Drives one clone run.
pub struct Pipeline<'a> {
    config: &'a CloneConfig,
    tools: &'a ToolPaths,
    dump_file: &'a DumpFile,
    copier: ChunkedCopier,
    stage: Stage,
    stages: Vec<StageReport>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a CloneConfig, tools: &'a ToolPaths, dump_file: &'a DumpFile) -> Self {
        Self {
            config,
            tools,
            dump_file,
            copier: ChunkedCopier::new(config.chunk_size),
            stage: Stage::Idle,
            stages: Vec::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn completed_stages(&self) -> &[StageReport] {
        &self.stages
    }

    pub fn run(&mut self, progress: &mut ProgressContext) -> Result<CloneReport> {
        let started = Instant::now();
        if let Err(e) = self.run_stages(progress) {
            if self.stage != Stage::Idle {
                progress.fail();
            }
            tracing::error!(stage = %self.stage, "clone failed");
            self.stage = Stage::Failed;
            return Err(e);
        }
        self.stage = Stage::Done;

        let mode = self.config.mode;
        Ok(CloneReport {
            mode,
            source: (mode != RunMode::RestoreOnly).then(|| self.config.source.clone()),
            target: (mode != RunMode::DumpOnly).then(|| self.config.target.clone()),
            dump_file: (!self.dump_file.is_ephemeral())
                .then(|| self.dump_file.path().display().to_string()),
            charset_rewritten: !self.config.rewrites.is_empty() && mode != RunMode::DumpOnly,
            stages: self.stages.clone(),
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }

    fn run_stages(&mut self, progress: &mut ProgressContext) -> Result<()> {
        let mode = self.config.mode;
        if mode == RunMode::RestoreOnly && !self.dump_file.exists() {
            return Err(CloneError::MissingDumpFile {
                path: self.dump_file.path().to_path_buf(),
            });
        }

        if mode != RunMode::RestoreOnly {
            let label = format!(
                "Dumping source database {} to {}",
                self.config.source.describe(),
                self.dump_file.path().display()
            );
            self.run_stage(Stage::Dumping, label, progress, Self::dump)?;
        }
        if mode == RunMode::DumpOnly {
            return Ok(());
        }

        let label = format!("Create target: {}", self.config.target.describe());
        self.run_stage(Stage::CreatingTarget, label, progress, Self::create_target)?;

        let label = format!(
            "Restore target {} from {}",
            self.config.target.describe(),
            self.dump_file.path().display()
        );
        self.run_stage(Stage::Restoring, label, progress, Self::restore)?;

        if !self.config.after_restore.is_empty() {
            let label = "Run after-restore commands".to_string();
            self.run_stage(
                Stage::RunningAfterCommands,
                label,
                progress,
                Self::run_after_commands,
            )?;
        }
        Ok(())
    }

    fn run_stage<F>(
        &mut self,
        stage: Stage,
        label: String,
        progress: &mut ProgressContext,
        body: F,
    ) -> Result<()>
    where
        F: FnOnce(&Self, &mut ProgressContext) -> Result<u64>,
    {
        self.stage = stage;
        tracing::info!(%stage, "{}", label);
        progress.start(label);
        let bytes = body(self, progress)?;
        progress.ok();
        self.stages.push(StageReport {
            stage,
            elapsed_secs: progress.elapsed().as_secs_f64(),
            bytes,
        });
        Ok(())
    }

    fn start_client(&self, select_database: bool) -> Result<ManagedProcess> {
        let command = client_command(&self.tools.mysql, &self.config.target, select_database);
        let mut process = ManagedProcess::start(
            command,
            OutputMode::Capture {
                max_lines: self.config.max_output_lines,
            },
        )?;
        process.check()?;
        Ok(process)
    }

    /// Stream mysqldump's stdout into the dump file, unmodified.
    fn dump(&self, progress: &mut ProgressContext) -> Result<u64> {
        let command = dump_command(&self.tools.mysqldump, &self.config.source, &self.config.dump);
        let mut process = ManagedProcess::start(command, OutputMode::Stream)?;
        let stdout = process.take_stdout().ok_or_else(|| {
            CloneError::io(
                "capturing mysqldump output",
                io::Error::other("stdout was not piped"),
            )
        })?;
        let mut source = SizedReader::new(stdout, None);
        let mut writer = self.dump_file.create_writer()?;

        let copied = self.copier.copy(
            &mut source,
            &mut writer,
            |_| {},
            |state| progress.update(&state.render()),
        );
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(e) if writer.has_failed() => {
                drop(source);
                process.kill();
                return Err(e);
            }
            Err(e) => {
                // A broken read of mysqldump's output usually means it died; report that instead.
                drop(source);
                process.wait_success()?;
                return Err(e);
            }
        };
        drop(source);

        writer
            .finish()
            .map_err(|e| CloneError::io("finishing dump file", e))?;
        process.wait_success()?;
        Ok(bytes)
    }

    fn create_target(&self, _progress: &mut ProgressContext) -> Result<u64> {
        let mut process = self.start_client(false)?;
        let mut bytes = 0;
        for line in creation_script(&self.config.target.database, &self.config.target_charset) {
            tracing::debug!(statement = %line, "create target");
            process.write_line(&line)?;
            bytes += line.len() as u64 + 1;
        }
        process.write_line("exit")?;
        process.wait_success()?;
        Ok(bytes)
    }

    /// Stream the dump into a client bound to the target, rewriting charsets.
    fn restore(&self, progress: &mut ProgressContext) -> Result<u64> {
        let mut process = self.start_client(true)?;
        let mut reader = self.dump_file.open_reader()?;
        let bytes = self.stream_into(&mut reader, &mut process, progress)?;
        process.wait_success()?;
        Ok(bytes)
    }

    fn run_after_commands(&self, progress: &mut ProgressContext) -> Result<u64> {
        let mut process = self.start_client(true)?;
        let mut bytes = 0;
        for item in &self.config.after_restore {
            let path = Path::new(item);
            if path.is_file() {
                tracing::info!(file = %path.display(), "streaming after-restore file");
                let mut reader = DumpReader::open(path)?;
                bytes += self.stream_into(&mut reader, &mut process, progress)?;
                process.write_line("")?;
            } else {
                tracing::info!("running after-restore statement");
                let statement = item.trim_end_matches(['\r', '\n']);
                process.write_line(statement)?;
                bytes += statement.len() as u64 + 1;
            }
        }
        process.wait_success()?;
        Ok(bytes)
    }

    fn stream_into<S: TransferSource>(
        &self,
        source: &mut S,
        process: &mut ManagedProcess,
        progress: &ProgressContext,
    ) -> Result<u64> {
        let rewrites = &self.config.rewrites;
        let mut replaced = 0usize;
        let mut sink = process.stdin();
        let bytes = self.copier.copy(
            source,
            &mut sink,
            |chunk| replaced += rewrites.apply(chunk),
            |state| progress.update(&state.render()),
        )?;
        tracing::info!(bytes, replaced, "streamed into {}", process.command().program.display());
        Ok(bytes)
    }
}
