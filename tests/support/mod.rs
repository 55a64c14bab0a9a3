//! Fake `mysqldump` and `mysql` executables for pipeline and CLI tests.
//!
//! The fake dump tool prints a fixture and records its arguments. The fake
//! client records its arguments and everything it receives on stdin, one
//! numbered pair of files per invocation.

#![allow(dead_code)]

use mysql_clone::tools::ToolPaths;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::TempDir;

pub const FIXTURE_DUMP: &str = "\
-- MySQL dump 10.13
DROP TABLE IF EXISTS `users`;
CREATE TABLE `users` (
  `id` int NOT NULL AUTO_INCREMENT,
  `name` varchar(255) COLLATE utf8mb4_0900_ai_ci DEFAULT NULL,
  PRIMARY KEY (`id`)
) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_0900_ai_ci;
INSERT INTO `users` VALUES (1,'Alice'),(2,'Bob');
";

static SERIAL: Mutex<()> = Mutex::new(());

/// Tests that write scripts and spawn processes run one at a time, so no
/// forked child can hold a script open for writing while another test execs it.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

/// The fixture as it should arrive at the target after charset rewriting.
pub fn rewritten(sql: &str) -> String {
    sql.replace("utf8mb4_0900_ai_ci", "utf8_general_ci   ")
        .replace("CHARSET=utf8mb4", "CHARSET=utf8   ")
}

pub struct Invocation {
    pub args: Vec<String>,
    pub stdin: String,
}

pub struct FakeTools {
    dir: TempDir,
    dump_failure: Option<(i32, String)>,
    restore_failure: Option<(i32, String)>,
    dump_content: String,
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            dump_failure: None,
            restore_failure: None,
            dump_content: FIXTURE_DUMP.to_string(),
        }
    }

    pub fn with_dump_content(mut self, content: &str) -> Self {
        self.dump_content = content.to_string();
        self
    }

    pub fn with_failing_dump(mut self, code: i32, stderr: &str) -> Self {
        self.dump_failure = Some((code, stderr.to_string()));
        self
    }

    pub fn with_failing_restore(mut self, code: i32, stderr: &str) -> Self {
        self.restore_failure = Some((code, stderr.to_string()));
        self
    }

    /// Write both scripts and return the directory holding them.
    pub fn install(self) -> InstalledTools {
        let bin = self.dir.path().join("bin");
        let log = self.dir.path().join("log");
        fs::create_dir_all(&bin).unwrap();
        fs::create_dir_all(&log).unwrap();

        let fixture = self.dir.path().join("fixture.sql");
        fs::write(&fixture, &self.dump_content).unwrap();

        let dump_tail = match &self.dump_failure {
            Some((code, message)) => format!("echo '{message}' >&2\nexit {code}\n"),
            None => format!("cat '{}'\n", fixture.display()),
        };
        let dump_script = format!(
            "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{log}/mysqldump.args'\n{dump_tail}",
            log = log.display(),
        );
        write_script(&bin.join("mysqldump"), &dump_script);

        let restore_tail = match &self.restore_failure {
            Some((code, message)) => format!(
                "case \" $* \" in *\" -D \"*) echo '{message}' >&2; exit {code};; esac\n"
            ),
            None => String::new(),
        };
        let client_script = format!(
            "#!/bin/sh\n\
             n=$(ls '{log}' | grep -c '^mysql-.*\\.args$')\n\
             printf '%s\\n' \"$@\" > '{log}'/mysql-$n.args\n\
             cat > '{log}'/mysql-$n.stdin\n\
             {restore_tail}",
            log = log.display(),
        );
        write_script(&bin.join("mysql"), &client_script);

        InstalledTools {
            _dir: self.dir,
            bin,
            log,
        }
    }
}

impl Default for FakeTools {
    fn default() -> Self {
        Self::new()
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

pub struct InstalledTools {
    _dir: TempDir,
    pub bin: PathBuf,
    log: PathBuf,
}

impl InstalledTools {
    pub fn paths(&self) -> ToolPaths {
        ToolPaths::find_in(&[self.bin.clone()]).unwrap()
    }

    /// Arguments mysqldump was called with, if it ran.
    pub fn dump_args(&self) -> Option<Vec<String>> {
        fs::read_to_string(self.log.join("mysqldump.args"))
            .ok()
            .map(|s| s.lines().map(String::from).collect())
    }

    /// Every mysql invocation, in order.
    pub fn client_invocations(&self) -> Vec<Invocation> {
        let mut invocations = Vec::new();
        for n in 0.. {
            let args = self.log.join(format!("mysql-{n}.args"));
            let Ok(args) = fs::read_to_string(args) else {
                break;
            };
            let stdin =
                fs::read_to_string(self.log.join(format!("mysql-{n}.stdin"))).unwrap_or_default();
            invocations.push(Invocation {
                args: args.lines().map(String::from).collect(),
                stdin,
            });
        }
        invocations
    }
}
