//! Text-generation backends.
//!
//! The server only sees the [`Generator`] trait: an opaque, possibly slow,
//! possibly failing `prompt -> text` operation reached by the `generate`
//! mode handler.

pub mod openai;

use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::{Result, WireError};

pub use openai::OpenAiGenerator;

/// A text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a completion for `prompt`.
    ///
    /// Failures must be reported as [`WireError::Backend`].
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Short identifier for logs.
    fn name(&self) -> &str;
}

/// Backend used when no credentials are configured. Every call fails, which
/// leaves `calc` fully functional.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredGenerator;

#[async_trait]
impl Generator for UnconfiguredGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(WireError::Backend(
            "no generation backend configured (set OPENAI_API_KEY)".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "unconfigured"
    }
}

/// Build the generator described by `config`.
pub fn from_config(config: &GenerationConfig) -> Box<dyn Generator> {
    match config.api_key.as_deref().filter(|k| !k.is_empty()) {
        Some(key) => Box::new(OpenAiGenerator::new(key, config)),
        None => Box::new(UnconfiguredGenerator),
    }
}
