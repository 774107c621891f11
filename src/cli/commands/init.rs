use crate::config::{self, CliOverrides};
use crate::error::Result;
use crate::storage::SqliteStorage;
use tracing::info;

/// Execute the init command.
///
/// Opening the database applies the schema, so this both creates a new file
/// and upgrades an existing one in place.
///
/// # Errors
///
/// Returns an error if config loading fails or the database cannot be
/// created.
pub fn execute(json: bool, cli: &CliOverrides) -> Result<()> {
    let config = config::load_search_config(cli)?;
    let existed = config.db_path.exists();

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    SqliteStorage::open_with_timeout(&config.db_path, config.lock_timeout_ms)?;
    info!(path = %config.db_path.display(), existed, "database ready");

    if json {
        let output = serde_json::json!({
            "database": config.db_path.display().to_string(),
            "created": !existed,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if existed {
        println!("Schema up to date in {}", config.db_path.display());
    } else {
        println!("Initialized search database at {}", config.db_path.display());
    }
    Ok(())
}
