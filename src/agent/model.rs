//! Chat model abstraction used by the agent runner.

use crate::config::RetrySettings;
use crate::error::{Result, TollgateError};
use crate::openai::{create_single_attempt_client, is_retryable};
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
    FunctionObject,
};
use async_openai::error::OpenAIError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

/// One entry in the conversation sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(default)]
        tool_calls: Vec<ModelToolCall>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: &str) -> Self {
        Message::System {
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Message::User {
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Message::Assistant {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool(call_id: &str, content: String) -> Self {
        Message::Tool {
            call_id: call_id.to_string(),
            content,
        }
    }
}

/// Description of a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    pub parameters: serde_json::Value,
}

/// What the model answered: text, tool calls, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ModelToolCall>,
}

impl ModelTurn {
    pub fn text(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> Self {
        Self {
            content: None,
            tool_calls: vec![ModelToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        }
    }

    /// Add another tool call to the same turn.
    pub fn and_call(mut self, id: &str, name: &str, arguments: serde_json::Value) -> Self {
        self.tool_calls.push(ModelToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        });
        self
    }
}

/// Trait for chat models that support tool calling.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelTurn>;

    /// Model identifier, for logs.
    fn name(&self) -> &str;
}

/// OpenAI chat completions with retries on transient failures.
pub struct OpenAIChatModel {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    retry: RetrySettings,
}

impl OpenAIChatModel {
    pub fn new(model: &str) -> Self {
        Self::with_retry(model, RetrySettings::default())
    }

    pub fn with_retry(model: &str, retry: RetrySettings) -> Self {
        Self {
            client: create_single_attempt_client(),
            model: model.to_string(),
            retry,
        }
    }

    fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage> {
        let build_err = |e: OpenAIError| TollgateError::Agent(e.to_string());

        Ok(match message {
            Message::System { content } => ChatCompletionRequestSystemMessageArgs::default()
                .content(content.clone())
                .build()
                .map_err(build_err)?
                .into(),
            Message::User { content } => ChatCompletionRequestUserMessageArgs::default()
                .content(content.clone())
                .build()
                .map_err(build_err)?
                .into(),
            Message::Assistant { content, tool_calls } => {
                let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                if let Some(text) = content {
                    args.content(text.clone());
                }
                if !tool_calls.is_empty() {
                    let calls: Vec<ChatCompletionMessageToolCall> = tool_calls
                        .iter()
                        .map(|c| ChatCompletionMessageToolCall {
                            id: c.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: c.name.clone(),
                                arguments: c.arguments.clone(),
                            },
                        })
                        .collect();
                    args.tool_calls(calls);
                }
                args.build().map_err(build_err)?.into()
            }
            Message::Tool { call_id, content } => ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(call_id.clone())
                .content(content.clone())
                .build()
                .map_err(build_err)?
                .into(),
        })
    }

    fn to_tool(spec: &ToolSpec) -> ChatCompletionTool {
        ChatCompletionTool {
            r#type: ChatCompletionToolType::Function,
            function: FunctionObject {
                name: spec.name.clone(),
                description: Some(spec.description.clone()),
                parameters: Some(spec.parameters.clone()),
                strict: None,
            },
        }
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelTurn> {
        let messages = messages
            .iter()
            .map(Self::to_request_message)
            .collect::<Result<Vec<_>>>()?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(messages);
        if !tools.is_empty() {
            args.tools(tools.iter().map(Self::to_tool).collect::<Vec<_>>());
        }
        let request = args.build().map_err(|e| TollgateError::Agent(e.to_string()))?;

        let attempts = &AtomicU32::new(0);
        let (client, retry, request) = (&self.client, &self.retry, &request);

        let response = backoff::future::retry_notify(
            retry.backoff(),
            move || async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                client.chat().create(request.clone()).await.map_err(|e| {
                    if attempt < retry.attempts && is_retryable(&e, retry) {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            },
            |e: OpenAIError, delay: Duration| {
                warn!(
                    "Model request failed (attempt {}/{}), retrying in {:?}: {}",
                    attempts.load(Ordering::SeqCst),
                    retry.attempts,
                    delay,
                    e
                );
            },
        )
        .await
        .map_err(|e| TollgateError::OpenAI(format!("Chat API error: {}", e)))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TollgateError::Agent("No response from model".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ModelToolCall {
                id: c.id,
                name: c.function.name,
                arguments: c.function.arguments,
            })
            .collect::<Vec<_>>();

        debug!("Model returned {} tool call(s)", tool_calls.len());

        Ok(ModelTurn {
            content: choice.message.content,
            tool_calls,
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Replays a fixed sequence of turns. Used for tests and offline runs.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Conversations the model was called with, in call order.
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<ModelTurn> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        self.turns
            .lock()
            .map_err(|e| TollgateError::Agent(e.to_string()))?
            .pop_front()
            .ok_or_else(|| TollgateError::Agent("Scripted model has no turns left".to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
