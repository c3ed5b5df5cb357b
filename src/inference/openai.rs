use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::InferenceProvider;
use crate::error::InferenceError;
use crate::types::{ContentBlock, InferenceRequest, InferenceResponse, Message, Role, StopReason, Usage};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// OpenAI-compatible provider. Works with OpenRouter, Ollama, vLLM, LM Studio,
/// or any server that implements the `/v1/chat/completions` endpoint.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new(OPENROUTER_BASE_URL).with_api_key(api_key)
    }

    pub fn ollama(base_url: Option<String>) -> Self {
        Self::new(base_url.unwrap_or_else(|| OLLAMA_BASE_URL.to_string()))
    }

    /// Set an API key (required for OpenAI, OpenRouter, etc.).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Tool schemas (`name`, `description`, `input_schema`) to the
    /// function-calling format.
    fn convert_tools(tools: &[Value]) -> Vec<Value> {
        tools
            .iter()
            .filter_map(|tool| {
                let name = tool["name"].as_str()?;
                let description = tool.get("description").cloned().unwrap_or(Value::Null);
                let parameters = tool
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));

                Some(json!({
                    "type": "function",
                    "function": {
                        "name": name,
                        "description": description,
                        "parameters": parameters,
                    }
                }))
            })
            .collect()
    }

    /// History to chat messages. Tool messages fan out into one `tool`
    /// message per result.
    fn convert_messages(system: Option<&str>, messages: &[Message]) -> Vec<Value> {
        let mut out = Vec::new();

        if let Some(sys) = system {
            out.push(json!({ "role": "system", "content": sys }));
        }

        for msg in messages {
            match msg.role {
                Role::User => out.push(json!({ "role": "user", "content": msg.text() })),
                Role::Assistant => {
                    let tool_calls: Vec<Value> = msg
                        .content
                        .iter()
                        .filter_map(|block| match block {
                            ContentBlock::ToolUse { id, name, input } => Some(json!({
                                "id": id,
                                "type": "function",
                                "function": {
                                    "name": name,
                                    "arguments": input.to_string(),
                                }
                            })),
                            _ => None,
                        })
                        .collect();

                    let mut assistant_msg = json!({ "role": "assistant", "content": msg.text() });
                    if !tool_calls.is_empty() {
                        assistant_msg["tool_calls"] = Value::Array(tool_calls);
                    }
                    out.push(assistant_msg);
                }
                Role::Tool => {
                    for block in &msg.content {
                        if let ContentBlock::ToolResult { call_id, output, .. } = block {
                            let content = match output {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            out.push(json!({
                                "role": "tool",
                                "tool_call_id": call_id,
                                "content": content,
                            }));
                        }
                    }
                }
            }
        }

        out
    }

    fn parse_response(parsed: &Value) -> InferenceResponse {
        let choice = &parsed["choices"][0];

        let mut stop_reason = match choice["finish_reason"].as_str().unwrap_or("stop") {
            "stop" => StopReason::EndTurn,
            "tool_calls" => StopReason::ToolUse,
            "length" => StopReason::MaxTokens,
            "content_filter" => StopReason::ContentFilter,
            other => {
                debug!(finish_reason = %other, "unknown finish_reason, treating as EndTurn");
                StopReason::EndTurn
            }
        };

        let message = &choice["message"];
        let mut content = Vec::new();

        if let Some(text) = message["content"].as_str() {
            if !text.is_empty() {
                content.push(ContentBlock::Text {
                    text: text.to_string(),
                });
            }
        }

        if let Some(tool_calls) = message["tool_calls"].as_array() {
            for tc in tool_calls {
                let id = tc["id"].as_str().unwrap_or("").to_string();
                let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
                // Ollama sends arguments as an object, OpenAI as a JSON string.
                let input = match &tc["function"]["arguments"] {
                    Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| json!({})),
                    Value::Null => json!({}),
                    other => other.clone(),
                };
                content.push(ContentBlock::ToolUse { id, name, input });
            }
        }

        // Some local servers report "stop" alongside tool calls.
        let has_tool_calls = content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }));
        if has_tool_calls && stop_reason != StopReason::ToolUse {
            debug!(?stop_reason, "tool calls present, treating as ToolUse");
            stop_reason = StopReason::ToolUse;
        }

        let usage = Usage {
            input_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        InferenceResponse {
            stop_reason,
            content,
            usage,
        }
    }
}

#[async_trait]
impl InferenceProvider for OpenAiProvider {
    async fn infer(&self, request: InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let messages = Self::convert_messages(request.system.as_deref(), &request.messages);

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(Self::convert_tools(&request.tools));
        }

        debug!(
            model = %request.model,
            messages = messages.len(),
            "chat completion request"
        );

        let mut req = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("authorization", format!("Bearer {key}"));
        }

        let resp = req
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        if status != 200 {
            return Err(InferenceError::ApiError { status, body: text });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| InferenceError::Parse(e.to_string()))?;
        if parsed["choices"].as_array().map_or(true, |c| c.is_empty()) {
            return Err(InferenceError::Parse("response has no choices".into()));
        }

        Ok(Self::parse_response(&parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tools_become_functions() {
        let tools = vec![json!({
            "name": "bash",
            "description": "run",
            "input_schema": {"type": "object", "properties": {"command": {"type": "string"}}}
        })];
        let converted = OpenAiProvider::convert_tools(&tools);
        assert_eq!(converted[0]["type"], "function");
        assert_eq!(converted[0]["function"]["name"], "bash");
        assert_eq!(
            converted[0]["function"]["parameters"]["properties"]["command"]["type"],
            "string"
        );
    }

    #[test]
    fn history_converts_to_chat_messages() {
        let history = vec![
            Message::user("list files"),
            Message::assistant(vec![
                ContentBlock::Text {
                    text: "sure".into(),
                },
                ContentBlock::ToolUse {
                    id: "call_1".into(),
                    name: "bash".into(),
                    input: json!({"command": "ls"}),
                },
            ]),
            Message::tool(vec![
                ContentBlock::ToolResult {
                    call_id: "call_1".into(),
                    name: "bash".into(),
                    output: json!({"exitCode": 0}),
                    is_error: false,
                },
                ContentBlock::ToolResult {
                    call_id: "call_2".into(),
                    name: "bash".into(),
                    output: json!("plain"),
                    is_error: true,
                },
            ]),
        ];

        let out = OpenAiProvider::convert_messages(Some("be brief"), &history);
        assert_eq!(out.len(), 5);
        assert_eq!(out[0]["role"], "system");
        assert_eq!(out[1]["content"], "list files");
        assert_eq!(out[2]["tool_calls"][0]["function"]["arguments"], r#"{"command":"ls"}"#);
        assert_eq!(out[3]["role"], "tool");
        assert_eq!(out[3]["tool_call_id"], "call_1");
        assert_eq!(out[3]["content"], r#"{"exitCode":0}"#);
        assert_eq!(out[4]["content"], "plain");
    }

    #[test]
    fn parses_tool_calls_and_usage() {
        let parsed = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": "",
                    "tool_calls": [
                        {"id": "a", "function": {"name": "read_file", "arguments": "{\"file_path\":\"x\"}"}},
                        {"id": "b", "function": {"name": "glob", "arguments": {"pattern": "*.rs"}}}
                    ]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let resp = OpenAiProvider::parse_response(&parsed);
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.content.len(), 2);
        assert!(matches!(
            &resp.content[0],
            ContentBlock::ToolUse { input, .. } if input["file_path"] == "x"
        ));
        assert!(matches!(
            &resp.content[1],
            ContentBlock::ToolUse { input, .. } if input["pattern"] == "*.rs"
        ));
        assert_eq!(resp.usage.input_tokens, 12);
        assert_eq!(resp.usage.output_tokens, 3);
    }

    #[test]
    fn tool_calls_win_over_stop() {
        let parsed = json!({
            "choices": [{
                "finish_reason": "stop",
                "message": {
                    "content": null,
                    "tool_calls": [{"id": "a", "function": {"name": "tree", "arguments": "{}"}}]
                }
            }]
        });
        let resp = OpenAiProvider::parse_response(&parsed);
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn large_token_counts_are_kept() {
        let parsed = json!({
            "choices": [{"finish_reason": "stop", "message": {"content": "hi"}}],
            "usage": {"prompt_tokens": 5_000_000_000u64, "completion_tokens": 1}
        });
        let resp = OpenAiProvider::parse_response(&parsed);
        assert_eq!(resp.usage.input_tokens, 5_000_000_000);
    }

    #[test]
    fn unknown_finish_reason_ends_turn() {
        let parsed = json!({"choices": [{"finish_reason": "weird", "message": {"content": "hi"}}]});
        let resp = OpenAiProvider::parse_response(&parsed);
        assert_eq!(resp.stop_reason, StopReason::EndTurn);
        assert_eq!(resp.usage.input_tokens, 0);
    }
}
