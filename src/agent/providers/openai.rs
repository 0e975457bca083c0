//! `OpenAI`-compatible provider over `async-openai`.
//!
//! Serves both hosted `OpenAI` and local `OpenAI`-compatible servers such as
//! Ollama; only the name, key, and base URL differ.

use std::collections::BTreeMap;
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCallChunk,
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestToolMessage,
    ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequest, CreateChatCompletionStreamResponse, FunctionCall,
    FunctionObject, ResponseFormat,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::{ChunkStream, LlmProvider, ProviderChunk, with_timeout};
use crate::agent::tool::ToolCall;
use crate::error::AgentError;

/// Key sent to endpoints that do not check one.
const PLACEHOLDER_KEY: &str = "unused";
const STREAM_BUFFER: usize = 64;

/// `OpenAI`-compatible chat provider.
pub struct OpenAiProvider {
    name: String,
    client: Client<OpenAIConfig>,
    timeout: Duration,
}

impl OpenAiProvider {
    /// Creates a provider named `name` against `base_url` (or the `OpenAI` default).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        api_key: Option<&str>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key.unwrap_or(PLACEHOLDER_KEY));
        if let Some(url) = base_url {
            config = config.with_api_base(url);
        }
        Self {
            name: name.into(),
            client: Client::with_config(config),
            timeout,
        }
    }

    fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                name: None,
            }),
            Role::Assistant => {
                let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
                    msg.tool_calls
                        .iter()
                        .map(|tc| ChatCompletionMessageToolCall {
                            id: tc.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect()
                });
                let content = (!msg.content.is_empty()).then(|| {
                    ChatCompletionRequestAssistantMessageContent::Text(msg.content.clone())
                });

                #[allow(deprecated)]
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content,
                    name: None,
                    tool_calls,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
            Role::Tool => ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                content: ChatCompletionRequestToolMessageContent::Text(msg.content.clone()),
                tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
            }),
        }
    }

    fn build_request(request: &ChatRequest) -> CreateChatCompletionRequest {
        let tools = (!request.tools.is_empty()).then(|| {
            request
                .tools
                .iter()
                .map(|td| ChatCompletionTool {
                    r#type: ChatCompletionToolType::Function,
                    function: FunctionObject {
                        name: td.name.clone(),
                        description: Some(td.description.clone()),
                        parameters: Some(td.parameters.clone()),
                        strict: None,
                    },
                })
                .collect()
        });

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            temperature: request.temperature,
            max_completion_tokens: request.max_tokens,
            stream: request.stream.then_some(true),
            response_format: request.json_mode.then_some(ResponseFormat::JsonObject),
            tools,
            ..Default::default()
        }
    }

    fn map_error(&self, error: OpenAIError) -> AgentError {
        match error {
            OpenAIError::Reqwest(e) if e.is_timeout() => AgentError::Timeout {
                provider: self.name.clone(),
                secs: self.timeout.as_secs(),
            },
            OpenAIError::Reqwest(e) if e.is_connect() => AgentError::Connection {
                message: e.to_string(),
            },
            OpenAIError::Reqwest(e) => AgentError::ApiRequest {
                status: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            },
            other => AgentError::ApiRequest {
                message: other.to_string(),
                status: None,
            },
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Tool call fragments collected across stream chunks.
#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
struct ToolCallAssembler {
    calls: BTreeMap<u32, PartialCall>,
}

impl ToolCallAssembler {
    fn absorb(&mut self, fragments: &[ChatCompletionMessageToolCallChunk]) {
        for fragment in fragments {
            let call = self.calls.entry(fragment.index).or_default();
            if let Some(id) = &fragment.id {
                call.id.clone_from(id);
            }
            if let Some(function) = &fragment.function {
                if let Some(name) = &function.name {
                    call.name.push_str(name);
                }
                if let Some(args) = &function.arguments {
                    call.arguments.push_str(args);
                }
            }
        }
    }

    fn drain(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.calls)
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| ToolCall {
                id: c.id,
                name: c.name,
                arguments: if c.arguments.is_empty() {
                    "{}".to_string()
                } else {
                    c.arguments
                },
            })
            .collect()
    }
}

/// Decodes one wire chunk, buffering tool-call fragments in `assembler`.
fn decode_chunk(
    response: &CreateChatCompletionStreamResponse,
    assembler: &mut ToolCallAssembler,
) -> Vec<ProviderChunk> {
    let Some(choice) = response.choices.first() else {
        return vec![ProviderChunk::Unknown];
    };

    let mut out = Vec::new();
    if let Some(text) = choice.delta.content.as_ref().filter(|t| !t.is_empty()) {
        out.push(ProviderChunk::Delta(text.clone()));
    }
    if let Some(fragments) = &choice.delta.tool_calls {
        assembler.absorb(fragments);
    }
    if choice.finish_reason.is_some() {
        out.extend(assembler.drain().into_iter().map(ProviderChunk::ToolCall));
    }
    out
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let openai_request = Self::build_request(request);
        let response = with_timeout(&self.name, self.timeout, async {
            self.client
                .chat()
                .create(openai_request)
                .await
                .map_err(|e| self.map_error(e))
        })
        .await?;

        let choice = response.choices.first();
        let content = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        let tool_calls = choice
            .and_then(|c| c.message.tool_calls.as_ref())
            .map(|tcs| {
                tcs.iter()
                    .map(|tc| ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let finish_reason = choice.and_then(|c| {
            c.finish_reason
                .as_ref()
                .map(|fr| format!("{fr:?}").to_lowercase())
        });
        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(ChatResponse {
            content,
            usage,
            tool_calls,
            finish_reason,
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, AgentError> {
        let mut stream_request = request.clone();
        stream_request.stream = true;
        let openai_request = Self::build_request(&stream_request);

        let mut upstream = with_timeout(&self.name, self.timeout, async {
            self.client
                .chat()
                .create_stream(openai_request)
                .await
                .map_err(|e| self.map_error(e))
        })
        .await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let provider = self.name.clone();
        let idle = self.timeout;
        tokio::spawn(async move {
            let mut assembler = ToolCallAssembler::default();
            loop {
                let next = match tokio::time::timeout(idle, upstream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let _ = tx
                            .send(Err(AgentError::Timeout {
                                provider: provider.clone(),
                                secs: idle.as_secs(),
                            }))
                            .await;
                        return;
                    }
                };
                let items = match next {
                    Some(Ok(response)) => decode_chunk(&response, &mut assembler)
                        .into_iter()
                        .map(Ok)
                        .collect(),
                    Some(Err(e)) => {
                        warn!(provider = %provider, error = %e, "stream chunk failed");
                        vec![Err(AgentError::Stream {
                            message: e.to_string(),
                        })]
                    }
                    None => {
                        for call in assembler.drain() {
                            let _ = tx.send(Ok(ProviderChunk::ToolCall(call))).await;
                        }
                        debug!(provider = %provider, "stream finished");
                        return;
                    }
                };
                for item in items {
                    if tx.send(item).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn health_check(&self) -> Result<(), AgentError> {
        with_timeout(&self.name, self.timeout, async {
            self.client
                .models()
                .list()
                .await
                .map(|_| ())
                .map_err(|e| self.map_error(e))
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use async_openai::types::{FinishReason, FunctionCallStream};

    use super::*;
    use crate::agent::message;
    use crate::agent::tool::ToolSet;

    fn stream_response(
        content: Option<&str>,
        fragments: Option<Vec<ChatCompletionMessageToolCallChunk>>,
        finish: Option<FinishReason>,
    ) -> CreateChatCompletionStreamResponse {
        let payload = serde_json::json!({
            "id": "chunk",
            "object": "chat.completion.chunk",
            "created": 0,
            "model": "test",
            "choices": [{
                "index": 0,
                "delta": {"content": content},
            }]
        });
        let mut response: CreateChatCompletionStreamResponse = serde_json::from_value(payload)
            .unwrap_or_else(|e| panic!("stream response should deserialize: {e}"));
        if let Some(choice) = response.choices.first_mut() {
            choice.delta.tool_calls = fragments;
            choice.finish_reason = finish;
        }
        response
    }

    fn fragment(
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        args: &str,
    ) -> ChatCompletionMessageToolCallChunk {
        ChatCompletionMessageToolCallChunk {
            index,
            id: id.map(ToString::to_string),
            r#type: Some(ChatCompletionToolType::Function),
            function: Some(FunctionCallStream {
                name: name.map(ToString::to_string),
                arguments: Some(args.to_string()),
            }),
        }
    }

    #[test]
    fn test_convert_messages() {
        assert!(matches!(
            OpenAiProvider::convert_message(&message::system_message("s")),
            ChatCompletionRequestMessage::System(_)
        ));
        assert!(matches!(
            OpenAiProvider::convert_message(&message::tool_message("c", "r")),
            ChatCompletionRequestMessage::Tool(_)
        ));
        let assistant = message::assistant_tool_calls_message(
            "",
            vec![ToolCall {
                id: "call_1".to_string(),
                name: "search_knowledge_base".to_string(),
                arguments: "{}".to_string(),
            }],
        );
        match OpenAiProvider::convert_message(&assistant) {
            ChatCompletionRequestMessage::Assistant(a) => {
                assert!(a.content.is_none());
                assert_eq!(a.tool_calls.map_or(0, |t| t.len()), 1);
            }
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    #[test]
    fn test_build_request_with_tools_and_stream() {
        let request = ChatRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![message::user_message("hi")],
            temperature: Some(0.3),
            max_tokens: Some(256),
            json_mode: false,
            stream: true,
            tools: ToolSet::knowledge_tools().into_definitions(),
        };
        let built = OpenAiProvider::build_request(&request);
        assert_eq!(built.stream, Some(true));
        assert_eq!(built.tools.map_or(0, |t| t.len()), 2);
        assert!(built.response_format.is_none());
    }

    #[test]
    fn test_decode_assembles_tool_call_fragments() {
        let mut assembler = ToolCallAssembler::default();

        let first = stream_response(
            None,
            Some(vec![fragment(
                0,
                Some("call_1"),
                Some("search_knowledge_base"),
                "{\"que",
            )]),
            None,
        );
        assert!(decode_chunk(&first, &mut assembler).is_empty());

        let second = stream_response(
            None,
            Some(vec![fragment(0, None, None, "ry\":\"*\"}")]),
            None,
        );
        assert!(decode_chunk(&second, &mut assembler).is_empty());

        let last = stream_response(None, None, Some(FinishReason::ToolCalls));
        let chunks = decode_chunk(&last, &mut assembler);
        assert_eq!(
            chunks,
            vec![ProviderChunk::ToolCall(ToolCall {
                id: "call_1".to_string(),
                name: "search_knowledge_base".to_string(),
                arguments: "{\"query\":\"*\"}".to_string(),
            })]
        );
    }

    #[test]
    fn test_decode_text_delta() {
        let mut assembler = ToolCallAssembler::default();
        let chunk = stream_response(Some("Hel"), None, None);
        assert_eq!(
            decode_chunk(&chunk, &mut assembler),
            vec![ProviderChunk::Delta("Hel".to_string())]
        );
    }

    #[test]
    fn test_provider_name_is_configurable() {
        let provider = OpenAiProvider::new(
            "ollama",
            None,
            Some("http://localhost:11434/v1"),
            Duration::from_secs(5),
        );
        assert_eq!(provider.name(), "ollama");
    }
}
