//! CLI definitions and entry point.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

/// Ranked issue search over a `SQLite` database
#[derive(Parser, Debug)]
#[command(name = "isearch", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (defaults to ./isearch.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// `SQLite` busy timeout in ms
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Project config file (defaults to ./.isearch.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Also append JSON log lines to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or upgrade the search database
    Init,

    /// Search issues in a project
    Search(SearchArgs),
}

#[derive(Args, Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct SearchArgs {
    /// Project id to search in
    #[arg(long)]
    pub project: i64,

    /// Case-insensitive substring over message and culprit
    #[arg(long, short = 'q')]
    pub query: Option<String>,

    /// Issue status (unresolved, resolved, ignored, ...)
    #[arg(long, short = 's')]
    pub status: Option<String>,

    /// Tag filter, key=value or key:* (can be repeated)
    #[arg(long = "tag", short = 't')]
    pub tags: Vec<String>,

    /// Issues bookmarked by this user id
    #[arg(long)]
    pub bookmarked_by: Option<i64>,

    /// Issues assigned to this user id
    #[arg(long)]
    pub assigned_to: Option<i64>,

    /// true: only unassigned issues; false: only assigned issues
    #[arg(long)]
    pub unassigned: Option<String>,

    /// Issues this user id is actively subscribed to
    #[arg(long)]
    pub subscribed_by: Option<i64>,

    /// Release version the issue was first seen in ("none" matches nothing)
    #[arg(long)]
    pub first_release: Option<String>,

    /// Restrict the search to one environment
    #[arg(long)]
    pub environment_id: Option<i64>,

    #[command(flatten)]
    pub ranges: RangeArgs,

    /// Sort order: date, priority, new, freq
    #[arg(long, default_value = "date")]
    pub sort: String,

    /// Page size
    #[arg(long)]
    pub limit: Option<usize>,

    /// Cursor from a previous page
    #[arg(long)]
    pub cursor: Option<String>,

    /// Also count matching issues (capped)
    #[arg(long)]
    pub count_hits: bool,
}

/// Range bounds. Inclusive unless the matching `--*-exclusive` switch is set.
#[derive(Args, Debug, Clone, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct RangeArgs {
    /// First seen at or after (RFC3339, YYYY-MM-DD, -2h, -7d)
    #[arg(long)]
    pub age_from: Option<String>,
    #[arg(long)]
    pub age_from_exclusive: bool,

    /// First seen at or before
    #[arg(long)]
    pub age_to: Option<String>,
    #[arg(long)]
    pub age_to_exclusive: bool,

    /// Last seen at or after
    #[arg(long)]
    pub last_seen_from: Option<String>,
    #[arg(long)]
    pub last_seen_from_exclusive: bool,

    /// Last seen at or before
    #[arg(long)]
    pub last_seen_to: Option<String>,
    #[arg(long)]
    pub last_seen_to_exclusive: bool,

    /// Active at or after
    #[arg(long)]
    pub active_at_from: Option<String>,
    #[arg(long)]
    pub active_at_from_exclusive: bool,

    /// Active at or before
    #[arg(long)]
    pub active_at_to: Option<String>,
    #[arg(long)]
    pub active_at_to_exclusive: bool,

    /// Has an event at or after
    #[arg(long)]
    pub date_from: Option<String>,
    #[arg(long)]
    pub date_from_exclusive: bool,

    /// Has an event at or before
    #[arg(long)]
    pub date_to: Option<String>,
    #[arg(long)]
    pub date_to_exclusive: bool,

    /// Seen exactly this many times
    #[arg(long)]
    pub times_seen: Option<i64>,

    /// Seen at least this many times
    #[arg(long)]
    pub times_seen_lower: Option<i64>,
    #[arg(long)]
    pub times_seen_lower_exclusive: bool,

    /// Seen at most this many times
    #[arg(long)]
    pub times_seen_upper: Option<i64>,
    #[arg(long)]
    pub times_seen_upper_exclusive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search_flags() {
        let cli = Cli::try_parse_from([
            "isearch",
            "--json",
            "search",
            "--project",
            "7",
            "--tag",
            "browser=firefox",
            "--tag",
            "server:*",
            "--age-from",
            "2025-01-01",
            "--age-from-exclusive",
            "--unassigned",
            "false",
            "--limit",
            "5",
        ])
        .unwrap();

        assert!(cli.json);
        let Commands::Search(args) = cli.command else {
            panic!("expected search");
        };
        assert_eq!(args.project, 7);
        assert_eq!(args.tags, vec!["browser=firefox", "server:*"]);
        assert_eq!(args.ranges.age_from.as_deref(), Some("2025-01-01"));
        assert!(args.ranges.age_from_exclusive);
        assert!(!args.ranges.age_to_exclusive);
        assert_eq!(args.unassigned.as_deref(), Some("false"));
        assert_eq!(args.limit, Some(5));
        assert_eq!(args.sort, "date");
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::try_parse_from(["isearch", "-vv", "init"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Init));
    }
}
