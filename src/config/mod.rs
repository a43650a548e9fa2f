pub mod settings;

pub use settings::{Config, FeedConfig};

use crate::error::CoreError;
use std::sync::Arc;

/// Loads and validates the application configuration as an `Arc<Config>`.
/// A `.env` file in the working directory is applied first when present.
pub fn load_config() -> Result<Arc<Config>, CoreError> {
    dotenv::dotenv().ok(); // Load .env file if present, ignore errors

    let config = Config::from_env();
    config.validate()?;
    config.validate_and_log();

    Ok(Arc::new(config))
}
