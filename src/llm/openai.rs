//! OpenAI Chat Completions implementation of the reasoning capability.
//!
//! Every registered capability is offered to the model as a function tool
//! whose parameters are the capability's input schema. A tool call becomes
//! a delegation; plain content becomes the final answer.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::LlmConfig;
use crate::error::{DispatchError, DispatchResult, HandlerError};
use crate::session::{Message, Role};
use crate::specialists::SELECTED_TRIANGLE_KEY;
use crate::supervisor::{ReasoningCapability, ReasoningRequest, ReasoningResponse};

const SUPERVISOR_PROMPT: &str = "You are an actuarial analysis supervisor managing a team of specialized agents.

Your team consists of:

1. DATA AGENT: Specialized in loss triangle data
   - Use for listing, loading, summarising and validating sample triangles
   - Converts between cumulative and incremental formats and changes the grain

2. ANALYSIS AGENT: Specialized in actuarial analysis methods
   - Use for development factor calculations, tail methods, and IBNR calculations
   - Handles methods like Chain Ladder, Bornhuetter-Ferguson, and stochastic approaches

3. VISUALIZATION AGENT: Specialized in creating visualizations
   - Use for creating triangle plots, development charts, and diagnostic visualizations

4. EXPLANATION AGENT: Specialized in explaining results and generating reports
   - Use for explaining actuarial concepts in plain language
   - Generates structured reports summarizing the analysis
   - Interprets the business implications of results

Your job is to:
- Understand the user's request and break it down into steps
- Delegate tasks to the appropriate specialized agent based on their expertise
- Maintain context across the conversation and analysis workflow
- Synthesize results from multiple agents when needed
- Ensure the user gets a complete and coherent response

When working on a new analysis:
1. First use the data agent to load and check the triangle
2. Then use the analysis agent to perform the requested actuarial analyses
3. Use the visualization agent to create relevant plots
4. Finally use the explanation agent to generate reports or explain results

Delegate by calling exactly one tool at a time. When the results so far answer the
user's question, reply directly without calling a tool.

Always be goal-oriented and efficient in your delegation.";

/// Upper bound for the delay between retries.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Doubled retry delay, capped at [`MAX_RETRY_DELAY`].
fn next_retry_delay(delay: Duration) -> Duration {
    delay.saturating_mul(2).min(MAX_RETRY_DELAY)
}

/// Reasoning capability backed by the OpenAI Chat Completions API.
#[derive(Debug, Clone)]
pub struct OpenAiReasoner {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiReasoner {
    /// Build from configuration; fails if no API key is configured.
    pub fn new(config: LlmConfig) -> DispatchResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| DispatchError::Config("OpenAI API key not set".to_string()))?;
        Self::with_api_key(config, api_key)
    }

    /// Build with an explicit key, e.g. one supplied with a request.
    pub fn with_api_key(config: LlmConfig, api_key: impl Into<String>) -> DispatchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DispatchError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            api_key: api_key.into(),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn system_prompt(request: &ReasoningRequest) -> String {
        match request.context.get(SELECTED_TRIANGLE_KEY) {
            Some(triangle) => format!(
                "{}\n\nThe user has selected the '{}' triangle. Use it unless they name another one.",
                SUPERVISOR_PROMPT, triangle
            ),
            None => SUPERVISOR_PROMPT.to_string(),
        }
    }

    fn chat_message(message: &Message) -> Option<Value> {
        if message.content.trim().is_empty() {
            return None;
        }
        let value = match (message.role, message.capability()) {
            (Role::User, _) => json!({"role": "user", "content": message.content}),
            (_, Some(capability)) => json!({
                "role": "assistant",
                "content": format!("[{}] {}", capability, message.content),
            }),
            (Role::ToolResult, None) => json!({
                "role": "assistant",
                "content": format!("[tool result] {}", message.content),
            }),
            (Role::Assistant, None) => json!({"role": "assistant", "content": message.content}),
        };
        Some(value)
    }

    /// Chat Completions request body.
    pub fn build_request_body(&self, request: &ReasoningRequest) -> Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": Self::system_prompt(request),
        })];
        messages.extend(request.message_history.iter().filter_map(Self::chat_message));

        let tools: Vec<Value> = request
            .available_capabilities
            .iter()
            .map(|cap| {
                json!({
                    "type": "function",
                    "function": {
                        "name": cap.name,
                        "description": cap.description,
                        "parameters": cap.input_schema.to_json_schema(),
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    /// Turn a Chat Completions response into a routing answer.
    pub fn parse_completion(response: &Value) -> Result<ReasoningResponse, HandlerError> {
        let message = response
            .pointer("/choices/0/message")
            .ok_or("OpenAI response has no choices")?;

        if let Some(call) = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .and_then(|calls| calls.first())
        {
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .ok_or("tool call without a function name")?;
            let raw = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            let arguments = match serde_json::from_str::<Value>(raw)? {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    return Err(format!("tool arguments must be an object, got {}", other).into())
                }
            };
            return Ok(ReasoningResponse::delegate(name, arguments));
        }

        let text = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(ReasoningResponse::final_text(text))
    }
}

#[async_trait]
impl ReasoningCapability for OpenAiReasoner {
    async fn decide(&self, request: &ReasoningRequest) -> Result<ReasoningResponse, HandlerError> {
        log::debug!(
            "OpenAiReasoner.decide: model={}, messages={}, tools={}",
            self.config.model,
            request.message_history.len(),
            request.available_capabilities.len()
        );

        let endpoint = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = self.build_request_body(request);

        let mut last_error: Option<HandlerError> = None;
        let mut retry_delay = Duration::from_secs(1);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                log::warn!("OpenAI API retry attempt {} after {:?}", attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay = next_retry_delay(retry_delay);
            }

            let response = match self
                .client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(Box::new(e));
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                last_error = Some("Rate limited by OpenAI API (429)".into());
                continue;
            }
            if status.is_server_error() {
                last_error = Some(format!("OpenAI API server error: {}", status).into());
                continue;
            }

            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    last_error = Some(Box::new(e));
                    continue;
                }
            };

            if status.is_client_error() {
                return Err(format!("OpenAI API error ({}): {}", status, text).into());
            }

            let json: Value = serde_json::from_str(&text).map_err(|e| {
                format!(
                    "Failed to parse OpenAI response: {} - Body: {}",
                    e,
                    text.chars().take(500).collect::<String>()
                )
            })?;
            return Self::parse_completion(&json);
        }

        Err(last_error.unwrap_or_else(|| "OpenAI API call failed after all retries".into()))
    }
}
