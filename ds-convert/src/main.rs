//! ds-convert converts an existing IPFS datastore setup to another, based
//! on the repo configuration and the datastore_spec file.
//!
//! It must be given a subcommand:
//! * convert - run the conversion the repo config asks for
//! * revert  - undo an interrupted or kept conversion using the journal
//! * cleanup - drop the backup data a kept conversion left behind
//!
//! The repository is resolved from IPFS_PATH, defaulting to ~/.ipfs.

use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use ds_convert::error::Result;
use ds_convert::{convert, repo, revert};

const DEFAULT_PATH_NAME: &str = ".ipfs";
const ENV_DIR: &str = "IPFS_PATH";

/// Informs the user about proper usage of the program and exits.
fn usage() -> ! {
    let program_name = env::args().next().unwrap_or_else(|| "program".to_string());
    eprintln!(
        r"Usage: {} <subcommand> [options]

Subcommands:
    convert     Convert the repo datastore to the spec in the repo config
                    [ --keep ]        keep backup data and the conversion
                                      journal for later revert/cleanup
    revert      Undo a conversion using the conversion journal
                    [ --force ]       revert past 'done' and manual steps
                    [ --fix-config ]  also restore Datastore.Spec in the
                                      repo config from datastore_spec
    cleanup     Remove backup data left by 'convert --keep'

Global options:
    [ --log-level trace|debug|info|warn|error ]  (default info)

The repository is taken from IPFS_PATH (default ~/{})",
        program_name, DEFAULT_PATH_NAME,
    );
    process::exit(2);
}

/// Prints a more specific message before exiting through usage().
fn usage_msg<S: AsRef<str>>(msg: S) -> ! {
    eprintln!("{}\n", msg.as_ref());
    usage();
}

enum Command {
    Convert { keep: bool },
    Revert { force: bool, fix_config: bool },
    Cleanup,
}

/// Stores user-supplied arguments.
struct Args {
    command: Command,
    log_level: LevelFilter,
}

impl Args {
    /// Parses user arguments into an Args structure.
    fn from_env(args: env::Args) -> Self {
        let mut subcommand = None;
        let mut log_level = None;
        let mut keep = false;
        let mut force = false;
        let mut fix_config = false;

        let mut iter = args.skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_ref() {
                "--log-level" => {
                    let log_level_str = iter
                        .next()
                        .unwrap_or_else(|| usage_msg("Did not give argument to --log-level"));
                    log_level = Some(LevelFilter::from_str(&log_level_str).unwrap_or_else(|_| {
                        usage_msg(format!("Invalid log level '{}'", log_level_str))
                    }));
                }

                "--keep" => keep = true,
                "--force" => force = true,
                "--fix-config" => fix_config = true,

                s if !s.starts_with('-') => {
                    if subcommand.is_some() {
                        usage_msg(format!("Unexpected extra subcommand '{}'", s));
                    }
                    subcommand = Some(s.to_string());
                }

                _ => usage_msg(format!("Unable to parse input '{}'", arg)),
            }
        }

        let command = match subcommand.as_deref() {
            Some("convert") => {
                if force || fix_config {
                    usage_msg("--force and --fix-config only apply to revert");
                }
                Command::Convert { keep }
            }
            Some("revert") => {
                if keep {
                    usage_msg("--keep only applies to convert");
                }
                Command::Revert { force, fix_config }
            }
            Some("cleanup") => {
                if keep || force || fix_config {
                    usage_msg("cleanup takes no options");
                }
                Command::Cleanup
            }
            Some(other) => usage_msg(format!("Unknown subcommand '{}'", other)),
            None => usage_msg("A subcommand must be specified"),
        };

        Self {
            command,
            log_level: log_level.unwrap_or(LevelFilter::Info),
        }
    }
}

/// Resolves the repository directory: IPFS_PATH, or ~/.ipfs.  The repo's
/// config file has to exist for the directory to count as a repo.
fn base_dir() -> PathBuf {
    let dir = match env::var_os(ENV_DIR) {
        Some(dir) => PathBuf::from(dir),
        None => {
            let home = env::var_os("HOME")
                .unwrap_or_else(|| usage_msg("IPFS_PATH is not set and HOME is unknown"));
            Path::new(&home).join(DEFAULT_PATH_NAME)
        }
    };

    if !dir.join(repo::CONFIG_FILE).exists() {
        usage_msg(format!(
            "No IPFS repo found at {} (no config file)",
            dir.display()
        ));
    }

    dir
}

fn run(args: &Args) -> Result<()> {
    let repo_dir = base_dir();

    match args.command {
        Command::Convert { keep } => convert::convert(&repo_dir, keep),
        Command::Revert { force, fix_config } => revert::revert(&repo_dir, force, fix_config, false),
        Command::Cleanup => revert::revert(&repo_dir, false, false, true),
    }
}

// Returning a Result from main makes it print a Debug representation of the
// error, but with Snafu we have nice Display representations of the error,
// so we wrap "main" (run) and print any error.
fn main() {
    let args = Args::from_env(env::args());

    if let Err(e) = TermLogger::init(
        args.log_level,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("{}", e);
        process::exit(1);
    }

    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        process::exit(1);
    }
}
