/// LLM Client: the single point of entry for all model provider calls.
///
/// ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
/// All generation goes through `generation::generator`, which goes through here.
///
/// Model: claude-sonnet-4-5 (hardcoded, one fixed backend model)
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
pub const MODEL: &str = "claude-sonnet-4-5";
/// The interview pack (10 questions with answer guides) is the largest output.
const MAX_TOKENS: u32 = 8192;
const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned no structured output for tool '{0}'")]
    MissingToolOutput(String),
}

/// A tool declaration whose `input_schema` constrains the model output.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ToolSpec<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub input_schema: &'a Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
    pub name: Option<String>,
    pub input: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }

    /// Returns the input the model supplied to the named tool.
    pub fn tool_input(&self, tool_name: &str) -> Option<&Value> {
        self.content
            .iter()
            .find(|b| b.block_type == "tool_use" && b.name.as_deref() == Some(tool_name))
            .and_then(|b| b.input.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

/// The single LLM client used by the generator.
/// Wraps the Anthropic Messages API with structured output helpers.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()?,
            api_key,
        })
    }

    /// Makes a single call to the Claude API, returning the full response object.
    /// No retry: a failure surfaces to the caller immediately.
    pub async fn call(
        &self,
        prompt: &str,
        system: &str,
        tool: Option<ToolSpec<'_>>,
    ) -> Result<LlmResponse, LlmError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
            tools: tool.into_iter().collect(),
            tool_choice: tool.map(|t| ToolChoice {
                kind: "tool",
                name: t.name,
            }),
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // Try to parse error message
            let message = serde_json::from_str::<AnthropicError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            warn!("LLM API returned {}: {}", status, message);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let llm_response: LlmResponse = response.json().await?;

        debug!(
            "LLM call succeeded: input_tokens={}, output_tokens={}, stop_reason={:?}",
            llm_response.usage.input_tokens,
            llm_response.usage.output_tokens,
            llm_response.stop_reason
        );

        Ok(llm_response)
    }

    /// Calls the LLM with `tool` forced and returns the tool input as raw JSON.
    /// Falls back to parsing a text block as JSON when the model answers in text.
    pub async fn call_structured(
        &self,
        prompt: &str,
        system: &str,
        tool: ToolSpec<'_>,
    ) -> Result<Value, LlmError> {
        let response = self.call(prompt, system, Some(tool)).await?;
        structured_output(&response, tool.name)
    }
}

fn structured_output(response: &LlmResponse, tool_name: &str) -> Result<Value, LlmError> {
    if let Some(input) = response.tool_input(tool_name) {
        return Ok(input.clone());
    }

    let text = response
        .text()
        .ok_or_else(|| LlmError::MissingToolOutput(tool_name.to_string()))?;

    // Strip markdown code fences if the model wraps JSON in them
    let text = strip_json_fences(text);

    serde_json::from_str(text).map_err(LlmError::Parse)
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response_from(value: Value) -> LlmResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_structured_output_prefers_tool_use_block() {
        let response = response_from(json!({
            "content": [
                {"type": "text", "text": "Here you go"},
                {"type": "tool_use", "id": "toolu_1", "name": "record_summary", "input": {"options": ["a", "b", "c"]}}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 20},
            "stop_reason": "tool_use"
        }));
        let value = structured_output(&response, "record_summary").unwrap();
        assert_eq!(value["options"][2], "c");
    }

    #[test]
    fn test_structured_output_falls_back_to_fenced_text() {
        let response = response_from(json!({
            "content": [{"type": "text", "text": "```json\n{\"options\": []}\n```"}],
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }));
        let value = structured_output(&response, "record_summary").unwrap();
        assert!(value["options"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_structured_output_without_any_content_is_an_error() {
        let response = response_from(json!({
            "content": [],
            "usage": {"input_tokens": 1, "output_tokens": 0}
        }));
        let err = structured_output(&response, "record_summary").unwrap_err();
        assert!(matches!(err, LlmError::MissingToolOutput(_)));
    }

    #[test]
    fn test_request_forces_declared_tool() {
        let schema = json!({"type": "object"});
        let tool = ToolSpec {
            name: "record_analysis",
            description: "Record the analysis",
            input_schema: &schema,
        };
        let request = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system: "sys",
            messages: vec![AnthropicMessage {
                role: "user",
                content: "hi",
            }],
            tools: vec![tool],
            tool_choice: Some(ToolChoice {
                kind: "tool",
                name: tool.name,
            }),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["tool_choice"]["type"], "tool");
        assert_eq!(body["tool_choice"]["name"], "record_analysis");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }
}
