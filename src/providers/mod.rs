mod openai;


pub use openai::OpenAiProvider;

use crate::core::config::AppConfig;
use crate::core::error::ConfigError;
use crate::core::provider::Provider;
use std::sync::Arc;

/// Create the completion provider described by `config`.
///
/// Fails before any HTTP client exists when no usable credential is configured.
pub fn create_provider(config: &AppConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    let api_key = config.require_api_key()?;
    if config.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("base_url must not be empty".into()));
    }

    Ok(Arc::new(OpenAiProvider::new(
        api_key.clone(),
        config.model.clone(),
        config.base_url.clone(),
        config.max_tokens,
    )))
}
