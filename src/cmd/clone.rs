use clap::Args;
use mysql_clone::config::{CloneSettings, DumpFlags, EndpointSettings, RunMode};
use mysql_clone::dumpfile::DumpFile;
use mysql_clone::pipeline::{CloneReport, Pipeline};
use mysql_clone::progress::ProgressContext;
use mysql_clone::tools::ToolPaths;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Source server host [default: localhost]
    #[arg(long)]
    source_host: Option<String>,

    /// Source server port [default: 3306]
    #[arg(long)]
    source_port: Option<u16>,

    /// Source user [default: root]
    #[arg(short = 'u', long)]
    source_user: Option<String>,

    /// Source password
    #[arg(short = 'p', long)]
    source_password: Option<String>,

    /// Source database
    #[arg(short = 'd', long)]
    source_database: Option<String>,

    /// Target server host [default: localhost]
    #[arg(short = 'H', long)]
    target_host: Option<String>,

    /// Target server port [default: 3306]
    #[arg(long)]
    target_port: Option<u16>,

    /// Target user [default: root]
    #[arg(short = 'U', long)]
    target_user: Option<String>,

    /// Target password
    #[arg(short = 'P', long)]
    target_password: Option<String>,

    /// Target database [default: the source database]
    #[arg(short = 'D', long)]
    target_database: Option<String>,

    /// Host to use for target AND source
    #[arg(long)]
    host: Option<String>,

    /// User to use for target AND source
    #[arg(long)]
    user: Option<String>,

    /// Password to use for target AND source
    #[arg(long)]
    password: Option<String>,

    /// Path for the intermediate SQL dump (kept after the run; .gz/.bz2/.xz/.zst compress it)
    #[arg(long)]
    dump_file: Option<PathBuf>,

    /// Restore from the existing --dump-file, don't dump again
    #[arg(long, conflicts_with = "dump_only")]
    restore_only: bool,

    /// Only dump to --dump-file, don't restore
    #[arg(long, conflicts_with = "restore_only")]
    dump_only: bool,

    /// Restore with the original utf8mb4 charset declarations instead of rewriting them to utf8
    #[arg(long)]
    retain_original_encodings: bool,

    /// Ask mysqldump for a single transaction (works around issues like 'definer does not exist')
    #[arg(long)]
    single_transaction: bool,

    /// Ask mysqldump for complete INSERT statements including column names
    #[arg(long)]
    complete_insert: bool,

    /// Don't lock tables while dumping
    #[arg(long)]
    skip_lock_tables: bool,

    /// Don't dump stored routines
    #[arg(long)]
    no_routines: bool,

    /// Don't dump binary columns as hex
    #[arg(long)]
    no_hex_blob: bool,

    /// Character set for the created target database
    #[arg(long)]
    charset: Option<String>,

    /// Collation for the created target database
    #[arg(long)]
    collation: Option<String>,

    /// SQL file or statement to run on the target after restoring (repeatable)
    #[arg(short = 'a', long = "after-restore")]
    after_restore: Vec<String>,

    /// Bytes per streamed chunk [default: 8388608]
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Client output lines kept for error reports [default: 1024]
    #[arg(long)]
    max_output_lines: Option<usize>,

    /// Directory containing mysqldump and mysql (searched before MYSQL_BIN and PATH)
    #[arg(long)]
    bin_dir: Option<PathBuf>,

    /// YAML config file; command-line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a JSON report instead of status lines
    #[arg(long)]
    json: bool,

    /// No status lines
    #[arg(short, long)]
    quiet: bool,

    /// Log what is being run
    #[arg(short, long)]
    verbose: bool,

    /// Log tool discovery and every statement sent while creating the target
    #[arg(long)]
    debug: bool,
}

impl CloneArgs {
    fn into_settings(self) -> CloneSettings {
        CloneSettings {
            source: EndpointSettings {
                host: self.source_host,
                port: self.source_port,
                user: self.source_user,
                password: self.source_password,
                database: self.source_database,
            },
            target: EndpointSettings {
                host: self.target_host,
                port: self.target_port,
                user: self.target_user,
                password: self.target_password,
                database: self.target_database,
            },
            host: self.host,
            user: self.user,
            password: self.password,
            dump_file: self.dump_file,
            restore_only: self.restore_only,
            dump_only: self.dump_only,
            retain_original_encodings: self.retain_original_encodings,
            dump: DumpFlags {
                routines: self.no_routines.then_some(false),
                hex_blob: self.no_hex_blob.then_some(false),
                skip_lock_tables: self.skip_lock_tables.then_some(true),
                complete_insert: self.complete_insert.then_some(true),
                single_transaction: self.single_transaction.then_some(true),
            },
            charset: self.charset,
            collation: self.collation,
            after_restore: self.after_restore,
            chunk_size: self.chunk_size,
            max_output_lines: self.max_output_lines,
            rewrites: Vec::new(),
            bin_dir: self.bin_dir,
        }
    }
}

pub fn run(args: CloneArgs) -> anyhow::Result<()> {
    super::init_logging(args.verbose, args.debug);

    let json = args.json;
    let quiet = args.quiet || json;
    let file_settings = match &args.config {
        Some(path) => CloneSettings::load(path)?,
        None => CloneSettings::default(),
    };
    let config = file_settings.merge(args.into_settings()).resolve()?;

    let tools = ToolPaths::discover(config.bin_dir.as_deref())?;
    let dump_file = DumpFile::resolve(config.dump_file.as_deref())?;

    let mut progress = if quiet {
        ProgressContext::hidden()
    } else {
        ProgressContext::new()
    };
    let report = Pipeline::new(&config, &tools, &dump_file).run(&mut progress)?;
    drop(progress);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &CloneReport) {
    match (&report.mode, &report.target) {
        (RunMode::DumpOnly, _) | (_, None) => println!("Dump complete"),
        (_, Some(target)) => println!("Cloned into {}", target.describe()),
    }
    if let Some(path) = &report.dump_file {
        println!("Dump file kept at {}", path);
    }
    println!("Elapsed: {:.3}s", report.elapsed_secs);
}
