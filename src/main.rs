//! CLI entry point for `maildedup`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use maildedup::action::{perform_action, Action};
use maildedup::config::{self, BodyHash, Config, FileConfig, TimeSource};
use maildedup::dedupe::engine::Deduplicate;
use maildedup::dedupe::strategy::Strategy;
use maildedup::error::DedupError;
use maildedup::mailbox::BoxFormat;
use maildedup::model::message::Message;

#[derive(Parser)]
#[command(
    name = "maildedup",
    version,
    about = "Deduplicate mail across mbox files and maildir folders"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Deduplicate the content of mbox files and/or maildir folders
    Dedup(DedupArgs),
    /// Hash a single mail and show its canonical form
    Hash {
        /// Mail file to inspect (one message, maildir-style)
        message: PathBuf,
        /// Headers to hash, in order (defaults to the built-in list)
        #[arg(short = 'H', long = "hash-header", value_name = "NAME")]
        hash_headers: Vec<String>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

#[derive(clap::Args)]
struct DedupArgs {
    /// Mail sources: mbox files or maildir folders
    #[arg(value_name = "MBOX/MAILDIR", required = true)]
    sources: Vec<PathBuf>,

    /// Selection strategy applied within each duplicate set
    #[arg(short, long, value_enum)]
    strategy: Option<Strategy>,

    /// Source of a mail's reference time, for time-based strategies
    #[arg(short, long, value_enum)]
    time_source: Option<TimeSource>,

    /// Regular expression against mail file paths, for path-based strategies
    #[arg(short, long, value_name = "REGEXP")]
    regexp: Option<String>,

    /// Headers to hash, in order (defaults to the built-in list)
    #[arg(short = 'H', long = "hash-header", value_name = "NAME")]
    hash_headers: Vec<String>,

    /// Body participation in the identity hash
    #[arg(long, value_enum)]
    hash_body: Option<BodyHash>,

    /// Maximum allowed size difference between mails of a set, in bytes
    /// (-1 = unlimited)
    #[arg(short = 'S', long, value_name = "BYTES", allow_hyphen_values = true)]
    size_threshold: Option<i64>,

    /// Maximum allowed content difference between mails of a set, in bytes
    /// (-1 = unlimited)
    #[arg(short = 'C', long, value_name = "BYTES", allow_hyphen_values = true)]
    content_threshold: Option<i64>,

    /// Show the unified diff of mails exceeding the content threshold
    #[arg(short = 'd', long)]
    show_diff: bool,

    /// Action to perform on the final selection
    #[arg(short, long, value_enum)]
    action: Option<Action>,

    /// Destination container for copy/move actions
    #[arg(short = 'E', long, value_name = "PATH")]
    export: Option<PathBuf>,

    /// Format of the destination container
    #[arg(short = 'e', long, value_enum, default_value_t = BoxFormat::Mbox)]
    export_format: BoxFormat,

    /// Append to an existing destination instead of refusing to overwrite
    #[arg(long)]
    export_append: bool,

    /// Force the format of input sources instead of autodetecting
    #[arg(short = 'f', long, value_enum)]
    input_format: Option<BoxFormat>,

    /// Account for everything but mutate nothing
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Seed for the pseudo-random strategies (defaults to a clock-derived
    /// value, making select-one/discard-one runs non-reproducible)
    #[arg(long)]
    seed: Option<u64>,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_conf = config::load_file_config().context("loading config file")?;
    setup_logging(cli.verbose, &file_conf);

    match cli.command {
        Commands::Dedup(args) => cmd_dedup(args, file_conf),
        Commands::Hash {
            message,
            hash_headers,
        } => cmd_hash(&message, &hash_headers),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(verbose: u8, file_conf: &FileConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let level = match verbose {
        0 => file_conf.log_level.as_deref().unwrap_or("warn"),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::cache_dir(file_conf);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "maildedup.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Build the validated run configuration from file defaults and CLI flags.
fn build_config(args: &DedupArgs, file_conf: &FileConfig) -> anyhow::Result<Config> {
    let mut conf = Config::default();

    if let Some(ref headers) = file_conf.hash_headers {
        conf.hash_headers = config::normalize_hash_headers(headers)?;
    }
    if !args.hash_headers.is_empty() {
        conf.hash_headers = config::normalize_hash_headers(&args.hash_headers)?;
    }

    if let Some(mode) = args.hash_body.or(file_conf.hash_body) {
        conf.hash_body = mode;
    }
    if let Some(threshold) = args.size_threshold.or(file_conf.size_threshold) {
        conf.size_threshold = threshold;
    }
    if let Some(threshold) = args.content_threshold.or(file_conf.content_threshold) {
        conf.content_threshold = threshold;
    }

    conf.time_source = args.time_source;
    conf.strategy = args.strategy;
    conf.regexp = args
        .regexp
        .as_deref()
        .map(regex::Regex::new)
        .transpose()
        .context("invalid regular expression")?;
    conf.action = args.action;
    conf.export = args.export.clone();
    conf.export_format = args.export_format;
    conf.export_append = args.export_append;
    conf.input_format = args.input_format;
    conf.dry_run = args.dry_run;
    conf.show_diff = args.show_diff;
    conf.seed = args.seed.unwrap_or_else(clock_seed);

    conf.validate()?;
    Ok(conf)
}

/// Clock-derived seed for the pseudo-random strategies.
fn clock_seed() -> u64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs() ^ u64::from(now.subsec_nanos()) ^ u64::from(std::process::id())
}

/// Run the deduplication pipeline.
fn cmd_dedup(args: DedupArgs, file_conf: FileConfig) -> anyhow::Result<()> {
    let conf = build_config(&args, &file_conf)?;
    let json = args.json;

    let mut dedup = Deduplicate::new(conf);

    tracing::info!("=== Phase #1: register mail sources");
    for source in &args.sources {
        dedup.add_source(source)?;
    }

    tracing::info!("=== Phase #2: compute hashes and group mails");
    let pb = ProgressBar::new(dedup.stats.mail_found);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Hashing [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );
    let progress = |current: u64, total: u64| {
        pb.set_length(total);
        pb.set_position(current);
    };
    dedup.hash_all(Some(&progress))?;
    pb.finish_and_clear();

    tracing::info!("=== Phase #3: categorize duplicate sets");
    dedup.build_sets();

    perform_action(&mut dedup)?;
    dedup.close_all()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&dedup.stats)?);
    } else {
        println!("{}", dedup.report());
    }

    dedup.check_stats()?;
    Ok(())
}

/// Show the canonical headers and identity hash of a single mail file.
fn cmd_hash(message: &Path, hash_headers: &[String]) -> anyhow::Result<()> {
    let mut conf = Config::default();
    if !hash_headers.is_empty() {
        conf.hash_headers = config::normalize_hash_headers(hash_headers)?;
    }

    let raw = std::fs::read(message)
        .with_context(|| format!("reading {}", message.display()))?;
    let mail = Message::from_raw(
        message.parent().unwrap_or_else(|| Path::new(".")),
        message
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        message,
        raw,
        &conf,
    );

    println!("{}", mail.pretty_canonical_headers());
    match maildedup::hash::identity_hash(&mail, &conf) {
        Ok(key) => println!("Hash: {key}"),
        Err(DedupError::TooFewHeaders { found }) => {
            anyhow::bail!(
                "only {found} canonical headers found, mail would be rejected"
            );
        }
        Err(other) => return Err(other.into()),
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "maildedup", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
