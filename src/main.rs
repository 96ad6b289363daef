//! nodecompat - command-line driver for the node-compat runtime
//!
//! Converts text between Buffer encodings and exercises the file-system
//! bridge (stat, async reads, watchers) from a shell.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use node_compat::buffer::{Buffer, StringEncoding};
use node_compat::config::RuntimeConfig;
use node_compat::fs::{self, StatOptions, WatchFileOptions, WatchOptions};
use node_compat::runtime::{self, CallerContext};

#[derive(Parser)]
#[command(name = "nodecompat")]
#[command(version)]
#[command(about = "Node-compatible Buffer and fs bridge", long_about = None)]
struct Cli {
    /// Configuration file (default: node-compat.toml found upward from the cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a file through the async bridge
    Cat {
        path: PathBuf,

        /// Encoding used to render the contents
        #[arg(short, long, default_value = "utf8")]
        encoding: StringEncoding,
    },

    /// Convert text from one encoding to another
    Encode {
        text: String,

        /// Encoding of the input text
        #[arg(long, default_value = "utf8")]
        from: StringEncoding,

        /// Encoding of the output
        #[arg(long, default_value = "hex")]
        to: StringEncoding,
    },

    /// Print file stats as JSON
    Stat {
        path: PathBuf,

        /// 64-bit integer fields and nanosecond timestamps
        #[arg(long)]
        bigint: bool,
    },

    /// Stream change events until interrupted
    Watch {
        path: PathBuf,

        /// Poll with stat instead of OS notifications
        #[arg(long)]
        poll: bool,

        /// Poll interval in milliseconds (with --poll)
        #[arg(long)]
        interval: Option<u64>,

        /// Watch subdirectories too
        #[arg(short, long)]
        recursive: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RuntimeConfig::load_from_cwd().unwrap_or_default(),
    };
    runtime::init(config).context("failed to start runtime")?;

    match cli.command {
        Commands::Cat { path, encoding } => cmd_cat(path, encoding),
        Commands::Encode { text, from, to } => cmd_encode(&text, from, to),
        Commands::Stat { path, bigint } => cmd_stat(path, bigint),
        Commands::Watch {
            path,
            poll,
            interval,
            recursive,
        } => cmd_watch(path, poll, interval, recursive),
    }
}

fn cmd_cat(path: PathBuf, encoding: StringEncoding) -> Result<()> {
    let text = fs::promises::read_file_to_string(&path, encoding)
        .with_context(|| format!("invalid path {}", path.display()))?
        .wait()
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    if encoding != StringEncoding::Utf8 {
        writeln!(stdout)?;
    }
    Ok(())
}

fn cmd_encode(text: &str, from: StringEncoding, to: StringEncoding) -> Result<()> {
    let buffer = Buffer::from_string(text, from)
        .with_context(|| format!("input is not valid {}", from))?;
    println!("{}", buffer.to_string_with(to));
    Ok(())
}

fn cmd_stat(path: PathBuf, bigint: bool) -> Result<()> {
    let stats = fs::stat(&path, StatOptions { bigint })
        .with_context(|| format!("failed to stat {}", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn cmd_watch(path: PathBuf, poll: bool, interval: Option<u64>, recursive: bool) -> Result<()> {
    let context = CallerContext::new();

    // Keep the watcher alive for the life of the loop below
    let _watcher: Box<dyn std::any::Any> = if poll {
        let options = WatchFileOptions {
            interval: interval.map(Duration::from_millis),
            context: Some(context.clone()),
            ..WatchFileOptions::default()
        };
        Box::new(fs::watch_file(&path, options, |current, previous| {
            let line = serde_json::json!({ "current": current, "previous": previous });
            println!("{}", line);
        })?)
    } else {
        let options = WatchOptions {
            recursive,
            context: Some(context.clone()),
            ..WatchOptions::default()
        };
        Box::new(fs::watch(&path, options, |event| {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        })?)
    };

    eprintln!("watching {} (Ctrl-C to stop)", path.display());
    while runtime::has_refs() {
        context.run_until_idle(Duration::from_secs(1));
    }
    Ok(())
}
