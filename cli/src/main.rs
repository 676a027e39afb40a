use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{Level, subscriber::set_global_default};
use tracing_subscriber::EnvFilter;

use sweep::{
    Coordinator, CoordinatorEvent, FileFilter, PatternKind, RunCriteria, RunOutcome, SearchFlags,
    SweepSettings,
};

fn init_tracing(verbosity: u8) {
    // Map -q/-v to tracing levels; default WARN so results stay readable
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr) // logs to stderr
        .with_target(false)
        .with_level(true)
        .compact()
        .finish();

    // Ignore error if already set in tests or env
    let _ = set_global_default(subscriber);
}

fn main() {
    let opts = Opts::parse();
    init_tracing(opts.verbose.saturating_sub(opts.quiet));
    if let Err(e) = run(opts) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(opts: Opts) -> anyhow::Result<()> {
    match opts.command {
        Command::Search { path, pattern, matching } => {
            let coordinator = Coordinator::with_defaults(SweepSettings::default());
            coordinator.start_search(build_criteria(&path, &pattern, None, &matching))?;
            let outcome = drain_events(&coordinator, true)?;
            report_search(&outcome);
        }
        Command::Replace {
            path,
            pattern,
            replacement,
            matching,
            dry_run,
        } => {
            let settings = SweepSettings::default();
            let undo_dir = settings.undo_dir.clone();
            let coordinator = Coordinator::with_defaults(settings);

            coordinator.start_search(build_criteria(&path, &pattern, None, &matching))?;
            let outcome = drain_events(&coordinator, false)?;
            report_search(&outcome);
            if !matches!(outcome, RunOutcome::Completed { .. }) {
                anyhow::bail!("search did not complete; nothing was replaced");
            }
            if dry_run {
                for result in coordinator.results() {
                    if result.is_success() {
                        println!("would replace {} matches in {}", result.matches.len(), result.path.display());
                    }
                }
                return Ok(());
            }

            let criteria = build_criteria(&path, &pattern, Some(replacement), &matching)
                // Non-interactive invocation: confirmable conditions are pre-approved
                .scripted(true);
            coordinator.start_replace(criteria)?;
            match drain_events(&coordinator, false)? {
                RunOutcome::Completed {
                    successful_files, ..
                } => {
                    println!("Replaced in {successful_files} files.");
                    println!("Backups kept in {}", undo_dir.display());
                }
                RunOutcome::Canceled {
                    successful_files, ..
                } => {
                    println!("Canceled after replacing in {successful_files} files.");
                    println!("Backups kept in {}", undo_dir.display());
                }
                RunOutcome::Failed { reason } => anyhow::bail!("replace failed: {reason}"),
            }
        }
    }
    Ok(())
}

/// Stream events until the run completes, printing matches as they land.
fn drain_events(coordinator: &Coordinator, print_matches: bool) -> anyhow::Result<RunOutcome> {
    let events = coordinator.events();
    while let Ok(event) = events.recv_blocking() {
        match event {
            CoordinatorEvent::ResultsAdded(results) if print_matches => {
                for result in &results {
                    for mat in &result.matches {
                        println!("{}:{}: {}", result.path.display(), mat.start, mat.text);
                    }
                }
            }
            CoordinatorEvent::Completed { outcome, .. } => return Ok(outcome),
            _ => {}
        }
    }
    anyhow::bail!("coordinator shut down before the run completed")
}

fn report_search(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed {
            processed_files,
            successful_files,
            total_matches,
            ..
        } => eprintln!(
            "Searched {processed_files} files. Found {total_matches} matches in {successful_files} files."
        ),
        RunOutcome::Canceled {
            processed_files, ..
        } => eprintln!("Canceled after {processed_files} files."),
        RunOutcome::Failed { reason } => eprintln!("Search failed: {reason}"),
    }
}

fn build_criteria(
    path: &PathBuf,
    pattern: &str,
    replacement: Option<String>,
    matching: &MatchOpts,
) -> RunCriteria {
    let mut criteria = match replacement {
        Some(replacement) => RunCriteria::replace(path, pattern, replacement),
        None => RunCriteria::search(path, pattern),
    };
    if matching.regex {
        criteria = criteria.with_pattern_kind(PatternKind::Regex);
    }
    criteria
        .with_flags(SearchFlags {
            case_sensitive: matching.case_sensitive,
            whole_word: matching.whole_word,
            global: true,
            stop_after_matches: matching.stop_after,
            ..SearchFlags::default()
        })
        .with_filter(FileFilter {
            include: matching.include.clone(),
            exclude: matching.exclude.clone(),
            include_hidden: matching.hidden,
            ..FileFilter::default()
        })
        .with_parallel(matching.parallel)
}

#[derive(Parser)]
#[command(version, about = "Bulk search and replace over a file tree")]
pub struct Opts {
    /// Increase verbosity (-v, -vv). Default WARN.
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Decrease verbosity (-q). Each -q reduces level by one step.
    #[arg(short = 'q', action = clap::ArgAction::Count, global = true)]
    pub quiet: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Search a directory tree and print every match
    Search {
        /// Directory to search
        path: PathBuf,
        /// Pattern to search for
        pattern: String,
        #[command(flatten)]
        matching: MatchOpts,
    },
    /// Search, then rewrite every match with the replacement text
    Replace {
        /// Directory to search
        path: PathBuf,
        /// Pattern to search for
        pattern: String,
        /// Replacement text (may be empty to delete matches)
        replacement: String,
        /// List what would change without touching any file
        #[arg(long)]
        dry_run: bool,
        #[command(flatten)]
        matching: MatchOpts,
    },
}

#[derive(Args)]
pub struct MatchOpts {
    /// Treat the pattern as a regular expression
    #[arg(long)]
    pub regex: bool,
    /// Match case exactly
    #[arg(long)]
    pub case_sensitive: bool,
    /// Match whole words only
    #[arg(long)]
    pub whole_word: bool,
    /// Glob of files to include (repeatable)
    #[arg(long = "include", value_name = "GLOB")]
    pub include: Vec<String>,
    /// Glob of files to exclude (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    pub exclude: Vec<String>,
    /// Include hidden files
    #[arg(long)]
    pub hidden: bool,
    /// Search files on multiple threads
    #[arg(long)]
    pub parallel: bool,
    /// Stop automatically once this many files have matched
    #[arg(long, value_name = "N")]
    pub stop_after: Option<usize>,
}
