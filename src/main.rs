#![deny(clippy::mod_module_files)]
use std::{
    env,
    path::{Path, PathBuf},
    process::ExitCode,
    rc::Rc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod error;
mod merge;
mod printer;
mod storage;
mod text;
mod vcs;

use commands::{offline::OfflineOptions, switch::SwitchOptions, update::UpdateOptions};
use config::SosConfig;
use merge::{ConflictResolution, MergeOperation};
use printer::ConsolePrinter;
use storage::{Metadata, METADATA_FOLDER};

/// Offline version control on top of any VCS checkout
#[derive(Parser, Debug)]
#[command(name = "sos", version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable logging
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start working offline: create the repository and branch 0
    Offline {
        /// Name of the first branch
        name: Option<String>,
        /// Only version files matching tracked patterns
        #[arg(long)]
        track: bool,
        /// Like --track, clearing patterns after every commit
        #[arg(long)]
        picky: bool,
        /// Always compare file contents
        #[arg(long)]
        strict: bool,
        /// Compress stored blobs
        #[arg(long)]
        compress: bool,
    },
    /// Finish offline work and remove the repository
    Online {
        /// Go online even with unsynchronized branches
        #[arg(long)]
        force: bool,
    },
    /// Create a branch
    Branch {
        name: Option<String>,
        /// Branch from the last commit instead of the working tree
        #[arg(long)]
        last: bool,
        /// Stay on the current branch
        #[arg(long)]
        stay: bool,
    },
    /// Commit the working tree as a new revision
    Commit { message: Option<String> },
    /// List changes against a revision
    Changes {
        /// [branch][/revision]
        revision: Option<String>,
    },
    /// Show changes against a revision with line diffs
    Diff {
        /// [branch][/revision]
        revision: Option<String>,
    },
    /// Switch the working tree to another branch or revision
    Switch {
        /// [branch][/revision]
        revision: Option<String>,
        /// Discard uncommitted changes
        #[arg(long)]
        force: bool,
        /// Only take over the tracking patterns
        #[arg(long)]
        meta: bool,
    },
    /// Merge another branch or revision into the working tree
    Update {
        /// [branch][/revision]
        revision: Option<String>,
        /// Only add files the other side has in addition
        #[arg(long, conflicts_with = "rm")]
        add: bool,
        /// Only remove files the other side no longer has
        #[arg(long)]
        rm: bool,
        /// Only insert lines the other side has in addition
        #[arg(long, conflicts_with = "rm_lines")]
        add_lines: bool,
        /// Only remove lines the other side no longer has
        #[arg(long)]
        rm_lines: bool,
        /// Resolve conflicts with the other side's version
        #[arg(long, conflicts_with = "mine")]
        theirs: bool,
        /// Resolve conflicts with the local version
        #[arg(long)]
        mine: bool,
    },
    /// Remove a branch
    Delete { branch: String },
    /// Track files matching a glob (track and picky modes)
    Add { pattern: String },
    /// Stop tracking a glob (track and picky modes)
    Rm { pattern: String },
    /// Show branches and working tree state
    Status,
    /// List the commits of the current branch
    Log {
        /// Show change counts per revision
        #[arg(long)]
        changes: bool,
    },
    /// List files of the current folder with their state
    Ls,
    #[command(external_subcommand)]
    External(Vec<String>),
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Closest ancestor of `cwd` holding the metadata folder, else `cwd`
fn find_root(cwd: &Path) -> PathBuf {
    cwd.ancestors()
        .find(|dir| dir.join(METADATA_FOLDER).is_dir())
        .unwrap_or(cwd)
        .to_path_buf()
}

fn merge_operation(add: bool, rm: bool) -> MergeOperation {
    match (add, rm) {
        (true, false) => MergeOperation::Insert,
        (false, true) => MergeOperation::Remove,
        _ => MergeOperation::Both,
    }
}

fn run(command: Commands, cwd: &Path) -> Result<i32> {
    let root = find_root(cwd);
    let config = SosConfig::load()?;
    let mut m = Metadata::new(&root, config, Rc::new(ConsolePrinter));

    match &command {
        Commands::Offline { .. } => {}
        Commands::External(args) => return vcs::forward(cwd, args),
        _ if !m.is_offline() => {
            let args: Vec<String> = env::args().skip(1).collect();
            return vcs::forward(cwd, &args);
        }
        _ => {}
    }

    match command {
        Commands::Offline {
            name,
            track,
            picky,
            strict,
            compress,
        } => commands::offline::handle(
            &mut m,
            OfflineOptions {
                name,
                track,
                picky,
                strict,
                compress,
            },
        )?,
        Commands::Online { force } => commands::online::handle(&mut m, force)?,
        Commands::Branch { name, last, stay } => {
            commands::branch::handle(&mut m, name, last, stay)?;
        }
        Commands::Commit { message } => {
            commands::commit::handle(&mut m, message)?;
        }
        Commands::Changes { revision } => {
            commands::changes::handle(&mut m, revision.as_deref())?;
        }
        Commands::Diff { revision } => commands::diff::handle(&mut m, revision.as_deref())?,
        Commands::Switch {
            revision,
            force,
            meta,
        } => commands::switch::handle(&mut m, revision.as_deref(), SwitchOptions { force, meta })?,
        Commands::Update {
            revision,
            add,
            rm,
            add_lines,
            rm_lines,
            theirs,
            mine,
        } => {
            let resolution = if theirs {
                ConflictResolution::Theirs
            } else if mine {
                ConflictResolution::Mine
            } else {
                ConflictResolution::Ask
            };
            let options = UpdateOptions {
                files: merge_operation(add, rm),
                lines: merge_operation(add_lines, rm_lines),
                resolution,
            };
            commands::update::handle(&mut m, revision.as_deref(), options)?;
        }
        Commands::Delete { branch } => commands::delete::handle(&mut m, &branch)?,
        Commands::Add { pattern } => commands::track::add(&mut m, cwd, &pattern)?,
        Commands::Rm { pattern } => commands::track::rm(&mut m, cwd, &pattern)?,
        Commands::Status => {
            commands::status::handle(&mut m)?;
        }
        Commands::Log { changes } => {
            commands::log::handle(&mut m, changes)?;
        }
        Commands::Ls => {
            commands::ls::handle(&mut m, cwd)?;
        }
        Commands::External(_) => {}
    }
    Ok(0)
}

/// Verbs reaching the real VCS untouched while no offline repository exists
fn forwarded_verb(args: &[String], cwd: &Path) -> bool {
    match args.get(1) {
        Some(verb) => {
            !verb.starts_with('-')
                && verb != "offline"
                && verb != "help"
                && !find_root(cwd).join(METADATA_FOLDER).is_dir()
        }
        None => false,
    }
}

fn exit_code(result: Result<i32>) -> ExitCode {
    match result {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            match e.downcast_ref::<error::Error>() {
                Some(error::Error::Usage(msg)) => eprintln!("{}", msg),
                _ => eprintln!("Error: {:#}", e),
            }
            ExitCode::from(1)
        }
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let cwd = match env::current_dir().context("Failed to determine the working directory") {
        Ok(cwd) => cwd,
        Err(e) => return exit_code(Err(e)),
    };

    // online: arguments are meant for the real VCS, not for clap
    if forwarded_verb(&args, &cwd) {
        return exit_code(vcs::forward(&cwd, &args[1..]));
    }

    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // help and version requests are not errors
            return if e.exit_code() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            };
        }
    };
    init_tracing(cli.verbose, cli.quiet);
    exit_code(run(cli.command, &cwd))
}
