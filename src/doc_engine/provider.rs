//! AI providers that turn a library's export list into documentation

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, instrument};

use super::types::{AiResponse, LibraryDocumentation, StudyRequest};
use crate::config::StudyConfig;
use crate::error::{StudyError, StudyResult};

/// Produces documentation for a library, or fails
#[async_trait]
pub trait DocumentationGenerator: Send + Sync {
    async fn generate(&self, request: &StudyRequest) -> StudyResult<AiResponse>;
}

/// Build the generator configured by `config.ai_tool`
pub fn create_generator(config: &StudyConfig) -> StudyResult<Box<dyn DocumentationGenerator>> {
    match config.ai_tool.as_str() {
        "openai" => Ok(Box::new(OpenAiGenerator::from_config(config)?)),
        other => Err(StudyError::config(format!("Unsupported AI tool '{other}'"))
            .with_details(json!({ "supported": ["openai"] }))),
    }
}

/// Client for OpenAI-compatible chat completion endpoints
pub struct OpenAiGenerator {
    http_client: Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn from_config(config: &StudyConfig) -> StudyResult<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            StudyError::config(format!(
                "No API key configured. Set {} to generate documentation.",
                crate::config::API_KEY_ENV
            ))
        })?;
        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .gzip(true)
            .build()
            .map_err(|e| {
                StudyError::config("Failed to create HTTP client").with_details(e.to_string())
            })?;
        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl DocumentationGenerator for OpenAiGenerator {
    #[instrument(skip(self, request), fields(library = %request.library_name))]
    async fn generate(&self, request: &StudyRequest) -> StudyResult<AiResponse> {
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_prompt(request) },
            ],
        });

        let url = format!("{}/chat/completions", self.api_base);
        debug!("Requesting documentation from {}", url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StudyError::api("AI provider request failed").with_details(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StudyError::api(format!("AI provider returned HTTP {status}"))
                .with_details(json!({ "status": status.as_u16(), "body": text })));
        }

        let completion: ChatCompletion = response.json().await.map_err(|e| {
            StudyError::parsing("AI provider returned malformed JSON").with_details(e.to_string())
        })?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| StudyError::documentation("AI provider returned no content"))?;

        parse_documentation(&content)
    }
}

const SYSTEM_PROMPT: &str = "You write concise API reference documentation for JavaScript libraries. \
Reply with a JSON array only. Each element has the shape \
{\"methodData\": {\"name\": string, \"parameters\": [string], \"returnType\": string, \"async\": boolean}, \
\"documentation\": string}.";

/// User prompt listing every export to document
pub fn build_prompt(request: &StudyRequest) -> String {
    let mut prompt = format!(
        "Document the library '{}' version {}.\n",
        request.library_name, request.library_version
    );
    if let Some(description) = &request.description {
        prompt.push_str(&format!("Description: {description}\n"));
    }
    if request.has_default_export {
        prompt.push_str("The module has a default export, listed as 'default'.\n");
    }
    prompt.push_str("Exports:\n");
    for method in &request.methods {
        prompt.push_str(&format!(
            "- {}{}({})\n",
            if method.is_async { "async " } else { "" },
            method.name,
            method.parameters.join(", ")
        ));
    }
    prompt.push_str(
        "For each export give the parameters, the return type, and a short usage example.",
    );
    prompt
}

/// Parse the model's reply: a JSON array (optionally fenced) or `{"docs": [...]}`
pub fn parse_documentation(content: &str) -> StudyResult<AiResponse> {
    let trimmed = strip_code_fence(content.trim());
    let value: Value = serde_json::from_str(trimmed).map_err(|e| {
        StudyError::parsing("AI response is not valid JSON").with_details(e.to_string())
    })?;
    let items = match value {
        Value::Array(items) => Value::Array(items),
        Value::Object(mut object) => object
            .remove("docs")
            .ok_or_else(|| StudyError::parsing("AI response object has no 'docs' field"))?,
        _ => return Err(StudyError::parsing("AI response must be a JSON array")),
    };
    let docs: Vec<LibraryDocumentation> = serde_json::from_value(items).map_err(|e| {
        StudyError::parsing("AI response entries have an unexpected shape")
            .with_details(e.to_string())
    })?;
    if docs.is_empty() {
        return Err(StudyError::documentation("AI provider returned no documentation"));
    }
    Ok(AiResponse { docs })
}

fn strip_code_fence(content: &str) -> &str {
    let Some(rest) = content.strip_prefix("```") else {
        return content;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
