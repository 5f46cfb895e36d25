//! Error types for the wallet chat engine

use thiserror::Error;

use crate::rpc::ErrorResponse;

/// Main error type for chat engine operations
#[derive(Error, Debug)]
pub enum ChatError {
    /// Keyserver refused the identity attestation or invite key binding
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// No identity is bound to the given public key or account
    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    /// No invite key is published (or held locally) for the account
    #[error("Invite key not found: {0}")]
    InviteKeyNotFound(String),

    /// An invite to this account is still pending
    #[error("Duplicate invite: already invited {0}")]
    DuplicateInvite(String),

    /// A thread with this peer already exists
    #[error("Already threaded with {0}")]
    AlreadyThreaded(String),

    /// Response arrived on a topic with no matching sent invite
    #[error("Unknown handshake on topic {0}")]
    UnknownHandshake(String),

    /// JWT or wallet signature did not verify
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// JWT or attestation is past its expiry
    #[error("Expired assertion: {0}")]
    ExpiredAssertion(String),

    /// JSON-RPC method outside the chat protocol
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Correlated response did not arrive in time
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Caller-supplied parameters failed validation
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Operation requires a registered account
    #[error("No account registered")]
    NoAccountRegistered,

    /// No thread is known for the topic
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    /// No received invite with this id
    #[error("Invite not found: {0}")]
    InviteNotFound(u64),

    /// Record missing from a store
    #[error("No matching key. {context}: {key}")]
    NotFound { context: String, key: String },

    /// Keychain has no entry for the requested key or topic
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Decryption failed (wrong key, tampered data, or malformed input)
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Malformed JWT or DID
    #[error("JWT error: {0}")]
    Jwt(String),

    /// Relay publish/subscribe failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unexpected keyserver response
    #[error("Keyserver error: {0}")]
    Keyserver(String),

    /// Peer answered a request with a protocol error
    #[error("Peer error {}: {}", .0.code, .0.message)]
    PeerError(ErrorResponse),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Convert into the JSON-RPC error body sent back to a peer.
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            ChatError::PeerError(response) => response.clone(),
            ChatError::SignatureInvalid(_) | ChatError::ExpiredAssertion(_) => {
                ErrorResponse::new(ErrorResponse::UNAUTHORIZED, self.to_string())
            }
            ChatError::UnsupportedMethod(_) => {
                ErrorResponse::new(ErrorResponse::METHOD_NOT_FOUND, self.to_string())
            }
            ChatError::InvalidParams(_) => {
                ErrorResponse::new(ErrorResponse::INVALID_PARAMS, self.to_string())
            }
            _ => ErrorResponse::new(ErrorResponse::INTERNAL_ERROR, self.to_string()),
        }
    }

    /// True if this is the peer's explicit rejection of an invite.
    pub fn is_user_rejected(&self) -> bool {
        matches!(self, ChatError::PeerError(r) if r.is_user_rejected())
    }
}

/// Result type alias using ChatError
pub type ChatResult<T> = Result<T, ChatError>;
