use serde::Serialize;
use thiserror::Error;

/// Failures that end a run before any invoice is written.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("mailbox connect failed: {0}")]
    Connect(String),
    #[error("mailbox login failed: {0}")]
    Auth(String),
    #[error("mailbox select failed ({mailbox}): {reason}")]
    SelectInbox { mailbox: String, reason: String },
    #[error("mailbox search failed: {0}")]
    List(String),
    #[error("invalid pipeline config: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
#[error("fetch of message {message_id} failed: {reason}")]
pub struct FetchError {
    pub message_id: u32,
    pub reason: String,
}

/// Per-document extraction failures. All of them mean "no text", never a failed run.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("corrupt document: {0}")]
    Corrupt(String),
    #[error("skipped: encrypted")]
    Encrypted,
    #[error("temporary storage failed: {0}")]
    Unreadable(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invoice store unavailable: {0}")]
    Unavailable(String),
    #[error("invoice store query failed: {0}")]
    Query(String),
    #[error("invalid invoice record: {0}")]
    InvalidRecord(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}

/// Why a message or attachment did not produce an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    FetchFailed,
    MalformedMessage,
    UnparseableDate,
    OutOfWindow,
    NoCandidates,
    EmptyText,
    CorruptDocument,
    EncryptedDocument,
    UnknownPlatform,
    NoAmount,
    PushFailed,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::FetchFailed => "fetch_failed",
            SkipReason::MalformedMessage => "malformed_message",
            SkipReason::UnparseableDate => "unparseable_date",
            SkipReason::OutOfWindow => "out_of_window",
            SkipReason::NoCandidates => "no_candidates",
            SkipReason::EmptyText => "empty_text",
            SkipReason::CorruptDocument => "corrupt_document",
            SkipReason::EncryptedDocument => "encrypted_document",
            SkipReason::UnknownPlatform => "unknown_platform",
            SkipReason::NoAmount => "no_amount",
            SkipReason::PushFailed => "push_failed",
        }
    }
}

impl From<&ExtractError> for SkipReason {
    fn from(e: &ExtractError) -> Self {
        match e {
            ExtractError::Encrypted => SkipReason::EncryptedDocument,
            ExtractError::Corrupt(_) | ExtractError::Unreadable(_) => SkipReason::CorruptDocument,
        }
    }
}
