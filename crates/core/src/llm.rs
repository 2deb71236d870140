use crate::error::RagError;
use crate::traits::AnswerComposer;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

pub const DEFAULT_LLM_URL: &str = "http://localhost:11434";
pub const DEFAULT_LLM_MODEL: &str = "llama3.2";

pub const ASSISTANT_INSTRUCTION: &str = "You are a knowledgeable assistant. Based on the context below, answer the question concisely in plain language. If the context does not contain the answer, respond with 'Not found'.";

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const GENERATE_TIMEOUT: Duration = Duration::from_secs(300);

pub fn build_prompt(query: &str, context: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {query}\nAnswer:")
}

/// Prompt used by the interactive loop: instruction, blank line, then the
/// plain prompt.
pub fn build_instructed_prompt(query: &str, context: &str) -> String {
    format!("{ASSISTANT_INSTRUCTION}\n\n{}", build_prompt(query, context))
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Answer composer backed by an Ollama-compatible `/api/generate` endpoint.
pub struct HttpAnswerComposer {
    client: Client,
    base: Url,
    model: String,
    instructed: bool,
}

impl HttpAnswerComposer {
    /// Connects and checks that the endpoint answers `GET /api/tags`.
    pub fn connect(endpoint: &str, model: impl Into<String>) -> Result<Self, RagError> {
        let composer = Self::new(endpoint, model)?;
        composer.ping()?;
        Ok(composer)
    }

    /// Builds the composer without touching the network.
    pub fn new(endpoint: &str, model: impl Into<String>) -> Result<Self, RagError> {
        let mut base = Url::parse(endpoint)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(GENERATE_TIMEOUT)
            .build()
            .map_err(|error| RagError::ModelUnavailable(error.to_string()))?;

        Ok(Self {
            client,
            base,
            model: model.into(),
            instructed: false,
        })
    }

    /// Prefix every prompt with [`ASSISTANT_INSTRUCTION`].
    pub fn with_instruction(mut self, instructed: bool) -> Self {
        self.instructed = instructed;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, RagError> {
        Ok(self.base.join(path)?)
    }

    fn ping(&self) -> Result<(), RagError> {
        let url = self.endpoint("api/tags")?;
        let response = self
            .client
            .get(url.clone())
            .timeout(PING_TIMEOUT)
            .send()
            .map_err(|error| RagError::ModelUnavailable(format!("{url}: {error}")))?;

        if !response.status().is_success() {
            return Err(RagError::ModelUnavailable(format!(
                "{url} answered {}",
                response.status()
            )));
        }

        tracing::info!(endpoint = %self.base, model = %self.model, "language model reachable");
        Ok(())
    }

    fn prompt(&self, query: &str, context: &str) -> String {
        if self.instructed {
            build_instructed_prompt(query, context)
        } else {
            build_prompt(query, context)
        }
    }
}

impl AnswerComposer for HttpAnswerComposer {
    fn generate(&self, query: &str, context: &str, max_length: usize) -> Result<String, RagError> {
        let url = self.endpoint("api/generate")?;
        let body = json!({
            "model": self.model,
            "prompt": self.prompt(query, context),
            "stream": false,
            "options": {"num_predict": max_length},
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .map_err(|error| RagError::GenerationFailed(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().unwrap_or_default();
            return Err(RagError::GenerationFailed(format!(
                "generate returned {status}: {details}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|error| RagError::GenerationFailed(error.to_string()))?;
        Ok(parsed.response.trim().to_string())
    }
}
