use clap::Parser;
use issue_search::cli::commands;
use issue_search::cli::{Cli, Commands};
use issue_search::config;
use issue_search::logging::init_logging;
use issue_search::{SearchError, StructuredError};
use std::io::{self, IsTerminal};

fn main() {
    let cli = Cli::parse();
    let overrides = build_cli_overrides(&cli);

    // A config file may name the log file; a broken config is reported by the
    // command itself, so it is not fatal here.
    let log_file = cli.log_file.clone().or_else(|| {
        config::load_search_config(&overrides)
            .ok()
            .and_then(|config| config.log_file)
    });
    if let Err(e) = init_logging(cli.verbose, cli.quiet, log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let result = match &cli.command {
        Commands::Init => commands::init::execute(cli.json, &overrides),
        Commands::Search(args) => commands::search::execute(args, cli.json, &overrides),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json);
    }
}

/// Handle errors with structured output support.
///
/// When --json is set or stdout is not a TTY, outputs structured JSON to stderr.
/// Otherwise, outputs a human-readable error.
fn handle_error(err: &SearchError, json_mode: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = structured.code.exit_code();

    let use_json = json_mode || !io::stdout().is_terminal();

    if use_json {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        let use_color = io::stderr().is_terminal();
        eprintln!("{}", structured.to_human(use_color));
    }

    std::process::exit(exit_code);
}

fn build_cli_overrides(cli: &Cli) -> config::CliOverrides {
    config::CliOverrides {
        db: cli.db.clone(),
        lock_timeout: cli.lock_timeout,
        config: cli.config.clone(),
        log_file: cli.log_file.clone(),
    }
}
