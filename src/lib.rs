pub mod amount;
pub mod attachments;
pub mod config;
pub mod date_window;
pub mod error;
pub mod invoice;
mod invoice_db;
pub mod invoice_store;
pub mod mailbox;
pub mod pipeline;
pub mod platform;
pub mod text_extract;

pub use config::{ImapSettings, PipelineConfig};
pub use error::{ExtractError, FetchError, SessionError, SkipReason, StoreError};
pub use invoice::{format_amount_cents, Invoice, StoredInvoice, UserId};
pub use invoice_db::{apply_embedded_migrations, SqliteInvoiceStore};
pub use invoice_store::{InvoiceStore, MemoryInvoiceStore, StoreHealth};
pub use mailbox::{
    ImapConnector, MailboxConnector, MailboxCredentials, MailboxSecret, MailboxSession, MessageId,
};
pub use pipeline::{
    IngestionPipeline, RunDiagnostics, RunResult, RunState, RunStatus, RunSummary, StopReason,
};
pub use platform::Platform;
