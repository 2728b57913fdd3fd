use std::env;
use std::sync::Arc;

use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, Stop,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use tracing::instrument;

use crate::error::{RelayError, RelayResult};

pub type SharedLlmClient = Arc<dyn LlmClient>;

/// Knobs recognized by every completion backend.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
}

impl CompletionOptions {
    /// Settings for rewrites that should not improvise (contextualization).
    pub fn deterministic() -> Self {
        Self {
            temperature: Some(0.0),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> RelayResult<String>;
}

/// Deterministic stand-in for tests and offline runs: echoes the prompt back.
#[derive(Debug, Default, Clone)]
pub struct EchoLlmClient;

#[async_trait]
impl LlmClient for EchoLlmClient {
    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> RelayResult<String> {
        Ok(format!(
            "[offline echo]\n{prompt}\nConfigure an LLM backend for real answers."
        ))
    }
}

impl EchoLlmClient {
    pub fn shared() -> SharedLlmClient {
        Arc::new(Self)
    }
}

/// OpenAI-compatible client that can point at OpenAI, OpenRouter, or any
/// local gateway speaking the same HTTP surface.
pub struct OpenAiLlmClient {
    client: AsyncOpenAiClient<OpenAIConfig>,
    model: String,
    system_prompt: String,
}

impl OpenAiLlmClient {
    const DEFAULT_MODEL: &'static str = "gpt-3.5-turbo";
    const DEFAULT_SYSTEM_PROMPT: &'static str =
        "You are a knowledge-transfer assistant for software project teams. Respond with crisp, grounded output.";

    pub fn shared_from_env() -> RelayResult<SharedLlmClient> {
        let client = Self::from_env()?;
        Ok(Arc::new(client))
    }

    fn from_env() -> RelayResult<Self> {
        let config = Self::build_config_from_env()?;
        let model =
            env::var("RELAY_LLM_MODEL").unwrap_or_else(|_| Self::DEFAULT_MODEL.to_string());
        let system_prompt = env::var("RELAY_SYSTEM_PROMPT")
            .unwrap_or_else(|_| Self::DEFAULT_SYSTEM_PROMPT.to_string());

        Ok(Self {
            client: AsyncOpenAiClient::with_config(config),
            model,
            system_prompt,
        })
    }

    fn build_config_from_env() -> RelayResult<OpenAIConfig> {
        let api_key = env::var("OPENAI_API_KEY")
            .or_else(|_| env::var("RELAY_LLM_API_KEY"))
            .map_err(|_| {
                RelayError::generation(
                    "Set OPENAI_API_KEY (or RELAY_LLM_API_KEY) to use the OpenAI client",
                )
            })?;

        let mut config = OpenAIConfig::new().with_api_key(api_key);

        if let Ok(base_url) = env::var("OPENAI_BASE_URL").or_else(|_| env::var("RELAY_LLM_BASE_URL"))
        {
            config = config.with_api_base(base_url);
        }

        Ok(config)
    }

    #[instrument(level = "debug", skip_all)]
    async fn chat(&self, prompt: &str, options: &CompletionOptions) -> RelayResult<String> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(self.system_prompt.as_str())
            .build()
            .map_err(|err| RelayError::generation(format!("system message build failed: {err}")))?;
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|err| RelayError::generation(format!("user message build failed: {err}")))?;

        let mut request = CreateChatCompletionRequestArgs::default();
        request
            .model(&self.model)
            .temperature(options.temperature.unwrap_or(0.7))
            .messages(vec![system_message.into(), user_message.into()]);

        if let Some(max_tokens) = options.max_tokens {
            request.max_tokens(max_tokens);
        }
        if let Some(stop) = &options.stop {
            request.stop(Stop::StringArray(stop.clone()));
        }

        let request = request
            .build()
            .map_err(|err| RelayError::generation(format!("request build failed: {err}")))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|err| RelayError::generation(format!("chat completion failed: {err}")))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| RelayError::generation("LLM response did not contain any choices"))?;

        let output = choice
            .message
            .content
            .clone()
            .ok_or_else(|| RelayError::generation("LLM response contained no text content"))?;

        Ok(output)
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> RelayResult<String> {
        self.chat(prompt, options).await
    }
}

/// Attempt to build an OpenAI-compatible client, optionally falling back to the echo client.
pub fn build_llm_client_from_env(default_to_echo: bool) -> RelayResult<SharedLlmClient> {
    match OpenAiLlmClient::shared_from_env() {
        Ok(client) => Ok(client),
        Err(err) if default_to_echo => {
            tracing::warn!(?err, "Falling back to EchoLlmClient");
            Ok(EchoLlmClient::shared())
        }
        Err(err) => Err(err),
    }
}
