use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message in a Langbase conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Speaker.
    pub role: MessageRole,
    /// Text.
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User input.
    User,
    /// Model output.
    Assistant,
}

/// Request to run a Langbase pipe
#[derive(Debug, Clone, Serialize)]
pub struct PipeRequest {
    /// Pipe name (required by Langbase API)
    pub name: String,
    /// Conversation to send.
    pub messages: Vec<Message>,
    /// Stream the response.
    #[serde(default)]
    pub stream: bool,
    /// Prompt variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, String>>,
}

/// Response from a Langbase pipe
#[derive(Debug, Clone, Deserialize)]
pub struct PipeResponse {
    /// Whether the run succeeded.
    pub success: bool,
    /// Generated text.
    pub completion: String,
    /// Conversation thread.
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    /// Model details.
    pub raw: Option<RawResponse>,
}

/// Raw model response details
#[derive(Debug, Clone, Deserialize)]
pub struct RawResponse {
    /// Model used.
    pub model: Option<String>,
    /// Token usage.
    pub usage: Option<Usage>,
}

/// Token usage information
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    /// Input tokens.
    pub prompt_tokens: Option<u32>,
    /// Output tokens.
    pub completion_tokens: Option<u32>,
    /// Sum of both.
    pub total_tokens: Option<u32>,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

impl PipeRequest {
    /// Create a new pipe request with name and messages
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
            stream: false,
            variables: None,
        }
    }

    /// Add a single variable
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Request to create (or upsert) a Langbase pipe
#[derive(Debug, Clone, Serialize)]
pub struct CreatePipeRequest {
    /// Pipe name.
    pub name: String,
    /// Pipe description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Model identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Update the pipe when it exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,
    /// Force JSON output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Output token limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// System prompt and seed messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
}

/// Response from creating a pipe
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePipeResponse {
    /// Pipe name.
    pub name: String,
    /// Pipe description.
    pub description: Option<String>,
    /// Visibility.
    pub status: String,
    /// Pipe URL.
    pub url: String,
}

impl CreatePipeRequest {
    /// Create a new pipe request with just a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            model: None,
            upsert: None,
            json: None,
            temperature: None,
            max_tokens: None,
            messages: None,
        }
    }

    /// Set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set model (e.g., "openai:gpt-4o-mini")
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Enable upsert (update if exists)
    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }

    /// Enable JSON output mode
    pub fn with_json_output(mut self, json: bool) -> Self {
        self.json = Some(json);
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set system/user messages
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }
}
