//! CloudRAID-FS operator CLI
//!
//! Drives the filesystem surface directly against a configured store: copy
//! files in and out, inspect the namespace, drain the upload spool. Every
//! invocation bootstraps the stack (spool recovery + metadata load), runs
//! one operation and shuts down cleanly (flush + metadata save).

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cloudraidfs::{CloudRaidFs, Config, LookupResult};

// =============================================================================
// CLI Arguments
// =============================================================================

/// CloudRAID-FS - erasure-coded filesystem over blob backends
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CLOUDRAIDFS_CONFIG", default_value = "cloudraidfs.yml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the children of a directory
    Ls { path: String },

    /// Print lookup information for a path
    Stat { path: String },

    /// Copy a file out of the store to a local path (or stdout with "-")
    Get { path: String, local: PathBuf },

    /// Copy a local file into the store
    Put { local: PathBuf, path: String },

    /// Remove a file
    Rm { path: String },

    /// Create a directory
    Mkdir { path: String },

    /// Remove an empty directory
    Rmdir { path: String },

    /// Rename a file or directory tree
    Mv { from: String, to: String },

    /// Truncate a file to a size
    Truncate { path: String, size: u64 },

    /// Drain the upload spool and persist metadata
    Flush,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> cloudraidfs::Result<()> {
    let config = Config::load(&args.config)?;
    let fs = CloudRaidFs::bootstrap(&config)?;

    let result = dispatch(fs.as_ref(), &args.command);

    // Shut down regardless: drain the spool and persist the namespace.
    let shutdown = fs.shutdown();
    result.and(shutdown)
}

fn dispatch(fs: &CloudRaidFs, command: &Command) -> cloudraidfs::Result<()> {
    match command {
        Command::Ls { path } => {
            let mut names = fs.list(path)?;
            names.sort();
            let mut out = std::io::stdout().lock();
            for name in names {
                let _ = writeln!(out, "{}", name);
            }
            Ok(())
        }

        Command::Stat { path } => {
            match fs.lookup(path)? {
                LookupResult::Missing => println!("{}: missing", path),
                LookupResult::File { size } => println!("{}: file, {} bytes", path, size),
                LookupResult::Directory => println!("{}: directory", path),
            }
            Ok(())
        }

        Command::Get { path, local } => {
            let size = match fs.lookup(path)? {
                LookupResult::File { size } => size,
                LookupResult::Missing => return Err(cloudraidfs::Error::NotFound),
                LookupResult::Directory => {
                    return Err(cloudraidfs::Error::IsADirectory(path.clone()))
                }
            };
            let data = fs.read(path, 0, size as usize)?;
            if local.to_str() == Some("-") {
                std::io::stdout().lock().write_all(&data)?;
            } else {
                std::fs::write(local, &data)?;
            }
            Ok(())
        }

        Command::Put { local, path } => {
            let data = std::fs::read(local)?;
            if let LookupResult::File { .. } = fs.lookup(path)? {
                // Replacing: clip away any longer previous contents.
                fs.truncate(path, 0)?;
            }
            fs.write(path, 0, &data)
        }

        Command::Rm { path } => fs.unlink(path),
        Command::Mkdir { path } => fs.create_dir(path),
        Command::Rmdir { path } => fs.rmdir(path),
        Command::Mv { from, to } => fs.rename(from, to),
        Command::Truncate { path, size } => fs.truncate(path, *size),
        Command::Flush => fs.sync(),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
