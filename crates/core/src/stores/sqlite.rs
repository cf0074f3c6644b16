use crate::models::{
    Chat, ChatConversation, Document, DocumentChunk, DocumentSummary, Sender, Team, TeamMember,
    TeamRole, User,
};
use crate::retrieval::cosine_distance;
use crate::traits::{ChunkHit, ChunkIndex};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, warn};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        display_name TEXT,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS team_members (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role TEXT NOT NULL DEFAULT 'staff',
        created_at TEXT NOT NULL,
        UNIQUE (team_id, user_id)
    )",
    "CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        file_path TEXT NOT NULL,
        size INTEGER,
        content_type TEXT,
        metadata TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS document_chunks (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        embedding BLOB NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_document_chunks_document_id ON document_chunks(document_id)",
    "CREATE TABLE IF NOT EXISTS chats (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        is_conversation_active INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chat_conversations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        sender TEXT NOT NULL CHECK (sender IN ('user', 'bot')),
        message TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_chat_conversations_chat_id ON chat_conversations(chat_id)",
];

#[derive(Debug, Clone, PartialEq)]
pub struct FirstTurn {
    /// False when another caller had already activated the chat.
    pub activated: bool,
    pub reply: Option<ChatConversation>,
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database. A single never-recycled connection keeps
    /// the data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("sqlite schema ready");
        Ok(())
    }

    // Users

    pub async fn insert_user(
        &self,
        email: &str,
        display_name: Option<&str>,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: display_name.map(str::to_string),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO users (id, email, display_name, password_hash, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(password_hash)
        .bind(timestamp(&user.created_at))
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    pub async fn user_credentials(
        &self,
        email: &str,
    ) -> Result<Option<(User, String)>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let hash = row.try_get::<String, _>("password_hash")?;
            Ok::<_, StoreError>((user_from_row(&row)?, hash))
        })
        .transpose()
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.user_credentials(email).await?.map(|(user, _)| user))
    }

    // Teams

    pub async fn team_name_exists(&self, name: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) FROM teams WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        Ok(count > 0)
    }

    /// Creates the team and makes `creator` its admin in one transaction.
    pub async fn insert_team_with_admin(
        &self,
        name: &str,
        description: Option<&str>,
        creator: Uuid,
    ) -> Result<(Team, TeamMember), StoreError> {
        let now = Utc::now();
        let team = Team {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.map(str::to_string),
            created_by: Some(creator),
            created_at: now,
        };
        let member = TeamMember {
            id: Uuid::new_v4(),
            team_id: team.id,
            user_id: creator,
            role: TeamRole::Admin,
            created_at: now,
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO teams (id, name, description, created_by, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(team.id.to_string())
        .bind(&team.name)
        .bind(&team.description)
        .bind(creator.to_string())
        .bind(timestamp(&now))
        .execute(&mut *tx)
        .await?;
        insert_member(&mut tx, &member).await?;
        tx.commit().await?;

        Ok((team, member))
    }

    pub async fn insert_member(
        &self,
        team_id: Uuid,
        user_id: Uuid,
        role: TeamRole,
    ) -> Result<TeamMember, StoreError> {
        let member = TeamMember {
            id: Uuid::new_v4(),
            team_id,
            user_id,
            role,
            created_at: Utc::now(),
        };

        let mut tx = self.pool.begin().await?;
        insert_member(&mut tx, &member).await?;
        tx.commit().await?;
        Ok(member)
    }

    pub async fn membership(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<TeamMember>, StoreError> {
        let row = sqlx::query("SELECT * FROM team_members WHERE team_id = ? AND user_id = ?")
            .bind(team_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(member_from_row).transpose()
    }

    /// The team, only if `user_id` belongs to it.
    pub async fn team_for_member(
        &self,
        team_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Team>, StoreError> {
        let row = sqlx::query(
            "SELECT t.* FROM teams t
             JOIN team_members m ON m.team_id = t.id
             WHERE t.id = ? AND m.user_id = ?",
        )
        .bind(team_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(team_from_row).transpose()
    }

    pub async fn teams_for_user(&self, user_id: Uuid) -> Result<Vec<Team>, StoreError> {
        let rows = sqlx::query(
            "SELECT t.* FROM teams t
             JOIN team_members m ON m.team_id = t.id
             WHERE m.user_id = ?
             ORDER BY t.name",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(team_from_row).collect()
    }

    // Documents

    pub async fn insert_document(&self, document: &Document) -> Result<(), StoreError> {
        let metadata = document
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO documents
                (id, team_id, name, file_path, size, content_type, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(document.id.to_string())
        .bind(document.team_id.to_string())
        .bind(&document.name)
        .bind(&document.file_path)
        .bind(document.size)
        .bind(&document.content_type)
        .bind(metadata)
        .bind(timestamp(&document.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn document(
        &self,
        team_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ? AND team_id = ?")
            .bind(document_id.to_string())
            .bind(team_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    /// Documents among `ids` that belong to `team_id`; others are silently absent.
    pub async fn documents_in_team(
        &self,
        team_id: Uuid,
        ids: &[Uuid],
    ) -> Result<Vec<Document>, StoreError> {
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(document) = self.document(team_id, *id).await? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    pub async fn list_documents(&self, team_id: Uuid) -> Result<Vec<DocumentSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT d.*, COUNT(c.seq) AS chunk_count
             FROM documents d
             LEFT JOIN document_chunks c ON c.document_id = d.id
             WHERE d.team_id = ?
             GROUP BY d.id
             ORDER BY d.created_at DESC, d.rowid DESC",
        )
        .bind(team_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DocumentSummary {
                    document: document_from_row(row)?,
                    chunk_count: row.try_get("chunk_count")?,
                })
            })
            .collect()
    }

    pub async fn set_document_metadata(
        &self,
        team_id: Uuid,
        document_id: Uuid,
        metadata: Option<&Value>,
    ) -> Result<bool, StoreError> {
        let metadata = metadata.map(serde_json::to_string).transpose()?;
        let result = sqlx::query("UPDATE documents SET metadata = ? WHERE id = ? AND team_id = ?")
            .bind(metadata)
            .bind(document_id.to_string())
            .bind(team_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Deletes the document and, through the foreign key, its chunks.
    pub async fn delete_document(
        &self,
        team_id: Uuid,
        document_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND team_id = ?")
            .bind(document_id.to_string())
            .bind(team_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn chunks_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<DocumentChunk>, StoreError> {
        let rows = sqlx::query("SELECT * FROM document_chunks WHERE document_id = ? ORDER BY seq")
            .bind(document_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(chunk_from_row).collect()
    }

    // Chats

    pub async fn insert_chat(&self, chat: &Chat) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO chats (id, team_id, user_id, title, is_conversation_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(chat.id.to_string())
        .bind(chat.team_id.to_string())
        .bind(chat.user_id.to_string())
        .bind(&chat.title)
        .bind(chat.is_conversation_active)
        .bind(timestamp(&chat.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The chat, only if it belongs to `user_id` within `team_id`.
    pub async fn chat(
        &self,
        team_id: Uuid,
        user_id: Uuid,
        chat_id: Uuid,
    ) -> Result<Option<Chat>, StoreError> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ? AND team_id = ? AND user_id = ?")
            .bind(chat_id.to_string())
            .bind(team_id.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(chat_from_row).transpose()
    }

    pub async fn recent_chats(
        &self,
        team_id: Uuid,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Chat>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM chats WHERE team_id = ? AND user_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(team_id.to_string())
        .bind(user_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chat_from_row).collect()
    }

    pub async fn append_message(
        &self,
        chat_id: Uuid,
        sender: Sender,
        message: &str,
    ) -> Result<ChatConversation, StoreError> {
        let mut tx = self.pool.begin().await?;
        let conversation = append_message(&mut tx, chat_id, sender, message).await?;
        tx.commit().await?;
        Ok(conversation)
    }

    pub async fn messages(&self, chat_id: Uuid) -> Result<Vec<ChatConversation>, StoreError> {
        let rows = sqlx::query("SELECT * FROM chat_conversations WHERE chat_id = ? ORDER BY seq")
            .bind(chat_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(conversation_from_row).collect()
    }

    /// The last `limit` messages, oldest first, leaving out `exclude`.
    pub async fn recent_messages(
        &self,
        chat_id: Uuid,
        limit: usize,
        exclude: Option<Uuid>,
    ) -> Result<Vec<ChatConversation>, StoreError> {
        let excluded = exclude.map(|id| id.to_string()).unwrap_or_default();
        let rows = sqlx::query(
            "SELECT * FROM chat_conversations WHERE chat_id = ? AND id != ?
             ORDER BY seq DESC LIMIT ?",
        )
        .bind(chat_id.to_string())
        .bind(excluded)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .iter()
            .map(conversation_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// Flips a fresh chat to active and stores its first reply, atomically.
    ///
    /// When the chat is already active nothing is written, so the first answer
    /// is recorded at most once.
    pub async fn complete_first_turn(
        &self,
        chat_id: Uuid,
        reply: Option<&str>,
    ) -> Result<FirstTurn, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE chats SET is_conversation_active = 1
             WHERE id = ? AND is_conversation_active = 0",
        )
        .bind(chat_id.to_string())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(FirstTurn {
                activated: false,
                reply: None,
            });
        }

        let reply = match reply {
            Some(message) => Some(append_message(&mut tx, chat_id, Sender::Bot, message).await?),
            None => None,
        };
        tx.commit().await?;

        Ok(FirstTurn {
            activated: true,
            reply,
        })
    }
}

#[async_trait]
impl ChunkIndex for SqliteStore {
    async fn insert_chunk(&self, _team_id: Uuid, chunk: &DocumentChunk) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO document_chunks (id, document_id, chunk_index, text, embedding, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(chunk.id.to_string())
        .bind(chunk.document_id.to_string())
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(encode_embedding(&chunk.embedding))
        .bind(timestamp(&chunk.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn nearest_chunks(
        &self,
        team_id: Uuid,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ChunkHit>, StoreError> {
        let rows = sqlx::query(
            "SELECT c.id, c.document_id, c.chunk_index, c.text, c.embedding
             FROM document_chunks c
             JOIN documents d ON d.id = c.document_id
             WHERE d.team_id = ?
             ORDER BY c.seq",
        )
        .bind(team_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let embedding = decode_embedding(&row.try_get::<Vec<u8>, _>("embedding")?)?;
            if embedding.len() != query_vector.len() {
                warn!(
                    expected = query_vector.len(),
                    actual = embedding.len(),
                    "skipping chunk with mismatched dimensionality"
                );
                continue;
            }

            hits.push(ChunkHit {
                chunk_id: uuid_column(row, "id", "document_chunks")?,
                document_id: uuid_column(row, "document_id", "document_chunks")?,
                chunk_index: row.try_get("chunk_index")?,
                text: row.try_get("text")?,
                distance: cosine_distance(query_vector, &embedding),
            });
        }

        // Stable sort: equal distances keep insertion order.
        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_document_chunks(&self, document_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
            .bind(document_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn insert_member(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    member: &TeamMember,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO team_members (id, team_id, user_id, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(member.id.to_string())
    .bind(member.team_id.to_string())
    .bind(member.user_id.to_string())
    .bind(member.role.as_str())
    .bind(timestamp(&member.created_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn append_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    chat_id: Uuid,
    sender: Sender,
    message: &str,
) -> Result<ChatConversation, StoreError> {
    let conversation = ChatConversation {
        id: Uuid::new_v4(),
        chat_id,
        sender,
        message: message.to_string(),
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO chat_conversations (id, chat_id, sender, message, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(conversation.id.to_string())
    .bind(chat_id.to_string())
    .bind(sender.as_str())
    .bind(&conversation.message)
    .bind(timestamp(&conversation.created_at))
    .execute(&mut **tx)
    .await?;

    Ok(conversation)
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding
        .iter()
        .flat_map(|value| value.to_le_bytes())
        .collect()
}

pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt {
            table: "document_chunks",
            details: format!("embedding blob of {} bytes", bytes.len()),
        });
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
        .collect())
}

fn uuid_column(row: &SqliteRow, column: &str, table: &'static str) -> Result<Uuid, StoreError> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|error| StoreError::Corrupt {
        table,
        details: format!("{column}: {error}"),
    })
}

fn optional_uuid_column(
    row: &SqliteRow,
    column: &str,
    table: &'static str,
) -> Result<Option<Uuid>, StoreError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        Uuid::parse_str(&value).map_err(|error| StoreError::Corrupt {
            table,
            details: format!("{column}: {error}"),
        })
    })
    .transpose()
}

fn time_column(row: &SqliteRow, table: &'static str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row.try_get("created_at")?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| StoreError::Corrupt {
            table,
            details: format!("created_at: {error}"),
        })
}

fn user_from_row(row: &SqliteRow) -> Result<User, StoreError> {
    Ok(User {
        id: uuid_column(row, "id", "users")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        created_at: time_column(row, "users")?,
    })
}

fn team_from_row(row: &SqliteRow) -> Result<Team, StoreError> {
    Ok(Team {
        id: uuid_column(row, "id", "teams")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_by: optional_uuid_column(row, "created_by", "teams")?,
        created_at: time_column(row, "teams")?,
    })
}

fn member_from_row(row: &SqliteRow) -> Result<TeamMember, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(TeamMember {
        id: uuid_column(row, "id", "team_members")?,
        team_id: uuid_column(row, "team_id", "team_members")?,
        user_id: uuid_column(row, "user_id", "team_members")?,
        role: TeamRole::parse(&role).ok_or_else(|| StoreError::Corrupt {
            table: "team_members",
            details: format!("unknown role {role:?}"),
        })?,
        created_at: time_column(row, "team_members")?,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(Document {
        id: uuid_column(row, "id", "documents")?,
        team_id: uuid_column(row, "team_id", "documents")?,
        name: row.try_get("name")?,
        file_path: row.try_get("file_path")?,
        size: row.try_get("size")?,
        content_type: row.try_get("content_type")?,
        metadata: metadata
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?,
        created_at: time_column(row, "documents")?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<DocumentChunk, StoreError> {
    Ok(DocumentChunk {
        id: uuid_column(row, "id", "document_chunks")?,
        document_id: uuid_column(row, "document_id", "document_chunks")?,
        chunk_index: row.try_get("chunk_index")?,
        text: row.try_get("text")?,
        embedding: decode_embedding(&row.try_get::<Vec<u8>, _>("embedding")?)?,
        created_at: time_column(row, "document_chunks")?,
    })
}

fn chat_from_row(row: &SqliteRow) -> Result<Chat, StoreError> {
    Ok(Chat {
        id: uuid_column(row, "id", "chats")?,
        team_id: uuid_column(row, "team_id", "chats")?,
        user_id: uuid_column(row, "user_id", "chats")?,
        title: row.try_get("title")?,
        is_conversation_active: row.try_get("is_conversation_active")?,
        created_at: time_column(row, "chats")?,
    })
}

fn conversation_from_row(row: &SqliteRow) -> Result<ChatConversation, StoreError> {
    let sender: String = row.try_get("sender")?;
    Ok(ChatConversation {
        id: uuid_column(row, "id", "chat_conversations")?,
        chat_id: uuid_column(row, "chat_id", "chat_conversations")?,
        sender: Sender::parse(&sender).ok_or_else(|| StoreError::Corrupt {
            table: "chat_conversations",
            details: format!("unknown sender {sender:?}"),
        })?,
        message: row.try_get("message")?,
        created_at: time_column(row, "chat_conversations")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> (SqliteStore, User, Team) {
        let store = SqliteStore::in_memory().await.unwrap();
        let user = store
            .insert_user("ada@example.com", Some("Ada"), "hash")
            .await
            .unwrap();
        let (team, _) = store
            .insert_team_with_admin("Research", None, user.id)
            .await
            .unwrap();
        (store, user, team)
    }

    fn document(team_id: Uuid, name: &str) -> Document {
        Document {
            id: Uuid::new_v4(),
            team_id,
            name: name.to_string(),
            file_path: format!("documents/{name}"),
            size: Some(42),
            content_type: Some("application/pdf".to_string()),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    fn chunk(document_id: Uuid, index: i64, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: Uuid::new_v4(),
            document_id,
            chunk_index: index,
            text: format!("chunk {index}"),
            embedding,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn embedding_blob_round_trips() {
        let values = vec![0.5f32, -1.25, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&values)).unwrap(), values);
        assert!(decode_embedding(&[1, 2, 3]).is_err());
    }

    #[tokio::test]
    async fn creator_becomes_team_admin() {
        let (store, user, team) = seeded().await;

        let member = store.membership(team.id, user.id).await.unwrap().unwrap();
        assert_eq!(member.role, TeamRole::Admin);
        assert!(store.team_name_exists("Research").await.unwrap());
        assert_eq!(store.teams_for_user(user.id).await.unwrap(), vec![team.clone()]);
        assert!(store
            .team_for_member(team.id, Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_membership_is_rejected_by_schema() {
        let (store, user, team) = seeded().await;
        assert!(store
            .insert_member(team.id, user.id, TeamRole::Guest)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn nearest_chunks_are_team_scoped_and_ordered() {
        let (store, user, team) = seeded().await;
        let (other_team, _) = store
            .insert_team_with_admin("Other", None, user.id)
            .await
            .unwrap();

        let ours = document(team.id, "ours.pdf");
        let theirs = document(other_team.id, "theirs.pdf");
        store.insert_document(&ours).await.unwrap();
        store.insert_document(&theirs).await.unwrap();

        store
            .insert_chunk(team.id, &chunk(ours.id, 1, vec![0.0, 1.0]))
            .await
            .unwrap();
        store
            .insert_chunk(team.id, &chunk(ours.id, 2, vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .insert_chunk(team.id, &chunk(ours.id, 3, vec![1.0, 0.1]))
            .await
            .unwrap();
        store
            .insert_chunk(other_team.id, &chunk(theirs.id, 1, vec![1.0, 0.0]))
            .await
            .unwrap();

        let hits = store.nearest_chunks(team.id, &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.document_id == ours.id));
        assert_eq!(hits[0].chunk_index, 2);
        assert_eq!(hits[1].chunk_index, 3);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn equal_distances_keep_insertion_order() {
        let (store, _user, team) = seeded().await;
        let doc = document(team.id, "tie.pdf");
        store.insert_document(&doc).await.unwrap();
        for index in [5, 3, 9] {
            store
                .insert_chunk(team.id, &chunk(doc.id, index, vec![1.0, 1.0]))
                .await
                .unwrap();
        }

        let hits = store.nearest_chunks(team.id, &[2.0, 2.0], 4).await.unwrap();
        let order = hits.iter().map(|hit| hit.chunk_index).collect::<Vec<_>>();
        assert_eq!(order, vec![5, 3, 9]);
    }

    #[tokio::test]
    async fn deleting_document_cascades_to_chunks() {
        let (store, _user, team) = seeded().await;
        let doc = document(team.id, "gone.pdf");
        store.insert_document(&doc).await.unwrap();
        store
            .insert_chunk(team.id, &chunk(doc.id, 1, vec![1.0]))
            .await
            .unwrap();

        assert!(store.delete_document(team.id, doc.id).await.unwrap());
        assert!(store.chunks_for_document(doc.id).await.unwrap().is_empty());
        assert!(!store.delete_document(team.id, doc.id).await.unwrap());
    }

    #[tokio::test]
    async fn metadata_is_the_only_mutable_document_field() {
        let (store, _user, team) = seeded().await;
        let doc = document(team.id, "meta.pdf");
        store.insert_document(&doc).await.unwrap();

        let metadata = json!({ "department": "finance" });
        assert!(store
            .set_document_metadata(team.id, doc.id, Some(&metadata))
            .await
            .unwrap());

        let listed = store.list_documents(team.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].document.metadata, Some(metadata));
        assert_eq!(listed[0].document.name, "meta.pdf");
        assert_eq!(listed[0].chunk_count, 0);
    }

    #[tokio::test]
    async fn recent_messages_are_oldest_first_and_bounded() {
        let (store, user, team) = seeded().await;
        let chat = Chat {
            id: Uuid::new_v4(),
            team_id: team.id,
            user_id: user.id,
            title: "t".to_string(),
            is_conversation_active: false,
            created_at: Utc::now(),
        };
        store.insert_chat(&chat).await.unwrap();

        for index in 0..5 {
            store
                .append_message(chat.id, Sender::User, &format!("m{index}"))
                .await
                .unwrap();
        }
        let latest = store.append_message(chat.id, Sender::Bot, "m5").await.unwrap();

        let recent = store.recent_messages(chat.id, 3, Some(latest.id)).await.unwrap();
        let texts = recent.iter().map(|m| m.message.as_str()).collect::<Vec<_>>();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        let all = store.messages(chat.id).await.unwrap();
        assert_eq!(all.last().map(|m| m.id), Some(latest.id));
    }

    #[tokio::test]
    async fn first_turn_completes_only_once() {
        let (store, user, team) = seeded().await;
        let chat = Chat {
            id: Uuid::new_v4(),
            team_id: team.id,
            user_id: user.id,
            title: "t".to_string(),
            is_conversation_active: false,
            created_at: Utc::now(),
        };
        store.insert_chat(&chat).await.unwrap();

        let first = store.complete_first_turn(chat.id, Some("answer")).await.unwrap();
        assert!(first.activated);
        assert_eq!(first.reply.map(|reply| reply.sender), Some(Sender::Bot));

        let second = store.complete_first_turn(chat.id, Some("again")).await.unwrap();
        assert!(!second.activated);
        assert!(second.reply.is_none());

        assert_eq!(store.messages(chat.id).await.unwrap().len(), 1);
        let stored = store.chat(team.id, user.id, chat.id).await.unwrap().unwrap();
        assert!(stored.is_conversation_active);
    }
}
