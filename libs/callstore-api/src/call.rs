use serde::{Deserialize, Serialize};

use crate::now_ms;
use crate::record::Record;

/// Who produced a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    Assistant,
    Human,
    Tool,
}

/// One transcript line of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMessage {
    pub persona: Persona,
    pub content: String,
    pub created_at: i64,
}

/// How the call was initiated. `phone_number` is the secondary index key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInitiate {
    pub phone_number: String,
    #[serde(default)]
    pub bot_company: String,
    #[serde(default)]
    pub bot_name: String,
    #[serde(default = "default_lang")]
    pub lang: String,
}

fn default_lang() -> String {
    "en-US".into()
}

/// Session state of one voice-bot call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallState {
    pub call_id: String,
    /// Unix milliseconds.
    pub created_at: i64,
    pub initiate: CallInitiate,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub recognition_retry: u32,
    /// Caller-defined attributes collected during the call.
    #[serde(default)]
    pub claim: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub messages: Vec<CallMessage>,
}

impl CallState {
    /// Fresh call with a random UUID id, not yet persisted.
    pub fn new(phone_number: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), phone_number)
    }

    pub fn with_id(call_id: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            created_at: now_ms(),
            initiate: CallInitiate {
                phone_number: phone_number.into(),
                bot_company: String::new(),
                bot_name: String::new(),
                lang: default_lang(),
            },
            in_progress: false,
            voice_id: None,
            recognition_retry: 0,
            claim: serde_json::Map::new(),
            messages: Vec::new(),
        }
    }

    pub fn push_message(&mut self, persona: Persona, content: impl Into<String>) {
        self.messages.push(CallMessage {
            persona,
            content: content.into(),
            created_at: now_ms(),
        });
    }
}

impl Record for CallState {
    fn id(&self) -> &str {
        &self.call_id
    }

    fn index_key(&self) -> &str {
        &self.initiate.phone_number
    }
}
