//! Embedding client abstraction and provider adapters.
//!
//! The service treats embedding generation as a synchronous capability: `Embedder::embed`
//! blocks until the provider returns vectors, and the HTTP layer offloads calls to the
//! blocking pool. Providers are a closed set of variants rather than a trait object so the
//! orchestrator can match on capabilities (the `None` variant produces no vectors and defers
//! to a collection-side embedding function).

mod gemini;
mod local;
mod openai;

pub use gemini::GeminiEmbedder;
pub use local::LocalEmbedder;
pub use openai::OpenAiEmbedder;

use crate::config::{EmbeddingProvider, Settings};
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The provider requires an API key that was not configured.
    #[error("{0} is required for {1} embeddings")]
    MissingApiKey(&'static str, &'static str),
    /// HTTP layer failed before receiving a response.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider responded with a non-success status.
    #[error("Embedding provider returned {status}: {body}")]
    UnexpectedStatus {
        /// Status code reported by the provider.
        status: reqwest::StatusCode,
        /// Response body associated with the failure.
        body: String,
    },
    /// Local model or tokenizer could not be loaded or executed.
    #[error("Local embedding model failed: {0}")]
    Model(String),
    /// Provider returned a payload that could not be interpreted as vectors.
    #[error("Unable to extract embeddings from provider response: {0}")]
    MalformedResponse(String),
    /// Provider returned a different number of vectors than texts submitted.
    #[error("Expected {expected} embeddings, but got {actual}")]
    CountMismatch {
        /// Number of input texts.
        expected: usize,
        /// Number of vectors present in the response.
        actual: usize,
    },
    /// The `none` provider cannot generate vectors.
    #[error("No embedding provider is configured; the collection must own an embedding function")]
    ProviderIsNone,
}

/// Provider-agnostic embedder used by both the search path and the export pipeline.
pub enum Embedder {
    /// Hosted OpenAI embeddings API.
    OpenAi(OpenAiEmbedder),
    /// Local transformer executed in-process.
    Local(Box<LocalEmbedder>),
    /// Hosted Gemini embeddings API.
    Gemini(GeminiEmbedder),
    /// No embedder; queries go through the store's text path.
    None,
}

impl Embedder {
    /// Build the process-default embedder from the loaded settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, EmbeddingError> {
        create_embedder_for_model(
            settings.embedding_provider,
            &settings.embedding_model,
            settings,
        )
    }

    /// Provider this embedder was built for.
    pub fn provider(&self) -> EmbeddingProvider {
        match self {
            Self::OpenAi(_) => EmbeddingProvider::OpenAI,
            Self::Local(_) => EmbeddingProvider::HuggingFace,
            Self::Gemini(_) => EmbeddingProvider::Gemini,
            Self::None => EmbeddingProvider::None,
        }
    }

    /// Whether this embedder can produce vectors at all.
    pub fn produces_vectors(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Produce one vector per supplied text.
    ///
    /// Blocking call; offload to a worker thread from async contexts.
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = match self {
            Self::OpenAi(client) => client.embed(texts)?,
            Self::Local(model) => model.embed(texts)?,
            Self::Gemini(client) => client.embed(texts)?,
            Self::None => return Err(EmbeddingError::ProviderIsNone),
        };
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            });
        }
        tracing::debug!(texts = texts.len(), "Generated embeddings");
        Ok(embeddings)
    }
}

/// Build an embedder for a specific provider/model pair.
///
/// Used by multi-model search where each model routes to its own collection and may need
/// its own provider credentials; keys fall back to the process settings.
pub fn create_embedder_for_model(
    provider: EmbeddingProvider,
    model: &str,
    settings: &Settings,
) -> Result<Embedder, EmbeddingError> {
    match provider {
        EmbeddingProvider::OpenAI => {
            let api_key = settings
                .openai_api_key
                .clone()
                .ok_or(EmbeddingError::MissingApiKey("OPENAI_API_KEY", "OpenAI"))?;
            Ok(Embedder::OpenAi(OpenAiEmbedder::new(api_key, model)?))
        }
        EmbeddingProvider::HuggingFace => {
            let embedder = LocalEmbedder::load(model, settings.embedding_device.as_deref())?;
            Ok(Embedder::Local(Box::new(embedder)))
        }
        EmbeddingProvider::Gemini => {
            let api_key = settings
                .gemini_api_key
                .clone()
                .ok_or(EmbeddingError::MissingApiKey("GEMINI_API_KEY", "Gemini"))?;
            Ok(Embedder::Gemini(GeminiEmbedder::new(api_key, model)?))
        }
        EmbeddingProvider::None => Ok(Embedder::None),
    }
}

/// Verify that the configured provider has the credentials it needs, without constructing
/// a client. Part of the startup prechecks.
pub fn validate_embedder_config(settings: &Settings) -> Result<(), EmbeddingError> {
    match settings.embedding_provider {
        EmbeddingProvider::OpenAI if settings.openai_api_key.is_none() => {
            Err(EmbeddingError::MissingApiKey("OPENAI_API_KEY", "OpenAI"))
        }
        EmbeddingProvider::Gemini if settings.gemini_api_key.is_none() => {
            Err(EmbeddingError::MissingApiKey("GEMINI_API_KEY", "Gemini"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_provider_refuses_to_embed() {
        let error = Embedder::None.embed(&["متن".into()]).unwrap_err();
        assert!(matches!(error, EmbeddingError::ProviderIsNone));
    }

    #[test]
    fn empty_input_short_circuits() {
        let vectors = Embedder::None.embed(&[]).expect("empty input");
        assert!(vectors.is_empty());
    }

    #[test]
    fn validation_flags_missing_openai_key() {
        let mut settings = crate::config::test_support::base_settings();
        settings.openai_api_key = None;
        let error = validate_embedder_config(&settings).unwrap_err();
        assert!(matches!(
            error,
            EmbeddingError::MissingApiKey("OPENAI_API_KEY", _)
        ));
    }

    #[test]
    fn validation_accepts_none_provider() {
        let mut settings = crate::config::test_support::base_settings();
        settings.embedding_provider = crate::config::EmbeddingProvider::None;
        settings.openai_api_key = None;
        assert!(validate_embedder_config(&settings).is_ok());
    }
}
