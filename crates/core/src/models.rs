use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const EMBEDDING_DIMENSIONS: usize = 1536;

pub const RETRIEVAL_TOP_K: usize = 4;

/// Prior conversation messages replayed into a follow-up prompt.
pub const HISTORY_TURNS: usize = 8;

pub const RECENT_CHATS: usize = 7;

pub const DEFAULT_CHAT_TITLE: &str = "New Chat";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TeamRole {
    Admin,
    #[default]
    Staff,
    Guest,
}

impl TeamRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamRole::Admin => "admin",
            TeamRole::Staff => "staff",
            TeamRole::Guest => "guest",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(TeamRole::Admin),
            "staff" => Some(TeamRole::Staff),
            "guest" => Some(TeamRole::Guest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamMember {
    pub id: Uuid,
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub role: TeamRole,
    pub created_at: DateTime<Utc>,
}

/// An uploaded file owned by a team. `file_path` is relative to the media root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub file_path: String,
    pub size: Option<i64>,
    pub content_type: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document: Document,
    pub chunk_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Fresh,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chat {
    pub id: Uuid,
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub is_conversation_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn state(&self) -> ChatState {
        if self.is_conversation_active {
            ChatState::Active
        } else {
            ChatState::Fresh
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Sender::User),
            "bot" => Some(Sender::Bot),
            _ => None,
        }
    }

    pub fn speaker(&self) -> &'static str {
        match self {
            Sender::User => "User",
            Sender::Bot => "Bot",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatConversation {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender: Sender,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: Uuid,
    pub chunk_index: i64,
    pub text: String,
    pub distance: f64,
    pub document: Document,
    pub document_link: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub team_id: Uuid,
    pub user_id: Uuid,
}

impl RequestContext {
    pub fn new(team_id: Uuid, user_id: Uuid) -> Self {
        Self { team_id, user_id }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionUnit {
    pub team_id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTranscript {
    pub chat: Chat,
    pub conversations: Vec<ChatConversation>,
    pub previous_chats: Vec<Chat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_role_parses_case_insensitively() {
        assert_eq!(TeamRole::parse(" Admin "), Some(TeamRole::Admin));
        assert_eq!(TeamRole::parse("guest"), Some(TeamRole::Guest));
        assert_eq!(TeamRole::parse("owner"), None);
        assert_eq!(TeamRole::default(), TeamRole::Staff);
    }

    #[test]
    fn chat_state_follows_active_flag() {
        let mut chat = Chat {
            id: Uuid::new_v4(),
            team_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: DEFAULT_CHAT_TITLE.to_string(),
            is_conversation_active: false,
            created_at: Utc::now(),
        };
        assert_eq!(chat.state(), ChatState::Fresh);
        chat.is_conversation_active = true;
        assert_eq!(chat.state(), ChatState::Active);
    }
}
