use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("team {0} not found for this user")]
    TeamNotFound(Uuid),

    #[error("document {0} not found")]
    DocumentNotFound(Uuid),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding dimension {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("corrupt row in {table}: {details}")]
    Corrupt { table: &'static str, details: String },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("malformed response from {endpoint}: {details}")]
    Malformed { endpoint: String, details: String },
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("team {0} not found for this user")]
    TeamNotFound(Uuid),

    #[error("chat {0} not found")]
    ChatNotFound(Uuid),

    #[error("query cannot be empty")]
    EmptyQuery,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("a team named {0:?} already exists")]
    DuplicateTeam(String),

    #[error("a user with email {0:?} already exists")]
    DuplicateUser(String),

    #[error("user is already a member of team {0}")]
    DuplicateMember(Uuid),

    #[error("no user with email {0:?}")]
    UnknownUser(String),

    #[error("team {0} not found for this user")]
    TeamNotFound(Uuid),

    #[error("only team admins can do that")]
    NotAdmin,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("password hashing failed: {0}")]
    Password(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
