use serde::{Deserialize, Serialize};

/// One content fragment inside a turn.
///
/// Exactly one variant per part, matching the model API wire shape:
/// `{"text": ...}` or `{"inlineData": {"mimeType": ..., "data": ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }

    /// The text payload, when this part is a text fragment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::InlineData { .. } => None,
        }
    }
}

/// Base64-encoded binary attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One message exchange unit. Immutable once appended; array order within a
/// session is the sole conversational ordering (the timestamp is advisory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default)]
    pub timestamp: u64,
}

impl Turn {
    pub fn user_text(text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
            timestamp,
        }
    }

    pub fn model_text(text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
            timestamp,
        }
    }
}

/// One persisted conversation thread belonging to a user.
///
/// `created_at_ms` is store-assigned and used only for sort order; it may be
/// `None` on a freshly created session until the next read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<u64>,
}

/// Fields for a session that does not exist in the store yet.
#[derive(Debug, Clone)]
pub struct NewChat {
    pub title: String,
    pub messages: Vec<Turn>,
}

/// Partial-field update; `None` fields are left untouched in the store.
#[derive(Debug, Clone, Default)]
pub struct ChatUpdate {
    pub title: Option<String>,
    pub messages: Option<Vec<Turn>>,
}
