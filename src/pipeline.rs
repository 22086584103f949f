use chrono::Utc;
use dashmap::DashMap;
use mailparse::parse_mail;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::amount::extract_amount_match;
use crate::attachments::{extract_candidates, Candidate};
use crate::config::PipelineConfig;
use crate::date_window::{local_date, message_date, DateWindow};
use crate::error::{SessionError, SkipReason};
use crate::invoice::{format_amount_cents, Invoice, UserId};
use crate::invoice_store::{InvoiceStore, StoreHealth};
use crate::mailbox::{MailboxConnector, MailboxCredentials, MailboxSession, MessageId, SessionGuard};
use crate::platform::classify;
use crate::text_extract::extract_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Connecting,
    InboxSelected,
    ClearingPriorInvoices,
    Scanning,
    Closing,
    Done,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MessagesExhausted,
    PushCapReached,
    ScanLimitReached,
    TimeLimitReached,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunDiagnostics {
    pub listed_messages: usize,
    pub scanned_messages: usize,
    pub candidates_seen: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub cleared_prior: Option<usize>,
    pub clear_error: Option<String>,
    pub store_health: Option<StoreHealth>,
}

impl RunDiagnostics {
    pub fn skipped(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub user_id: UserId,
    pub pushed_count: usize,
    pub invoices: Vec<Invoice>,
    pub stop_reason: StopReason,
    pub diagnostics: RunDiagnostics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

/// What a caller of a run gets back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub pushed_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Result<RunSummary, SessionError>> for RunResult {
    fn from(outcome: &Result<RunSummary, SessionError>) -> Self {
        match outcome {
            Ok(summary) => RunResult {
                status: RunStatus::Success,
                pushed_count: summary.pushed_count,
                message: None,
            },
            Err(e) => RunResult {
                status: RunStatus::Error,
                pushed_count: 0,
                message: Some(e.to_string()),
            },
        }
    }
}

struct RunContext {
    user_id: UserId,
    window: DateWindow,
    pushed: Vec<Invoice>,
    diagnostics: RunDiagnostics,
}

/// Mailbox scan → extraction → classification → store, one sequential run at a time per user.
pub struct IngestionPipeline<C, S: ?Sized> {
    connector: C,
    store: Arc<S>,
    config: PipelineConfig,
    user_locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl<C, S> IngestionPipeline<C, S>
where
    C: MailboxConnector,
    S: InvoiceStore + ?Sized,
{
    pub fn new(connector: C, store: Arc<S>, config: PipelineConfig) -> Self {
        Self {
            connector,
            store,
            config,
            user_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Runs once and reduces the outcome to the caller-facing report.
    pub fn fetch_invoices(&self, credentials: &MailboxCredentials, user_id: UserId) -> RunResult {
        let outcome = self.run(credentials, user_id);
        RunResult::from(&outcome)
    }

    /// Session failures abort the run; every per-message failure is skipped and counted.
    pub fn run(
        &self,
        credentials: &MailboxCredentials,
        user_id: UserId,
    ) -> Result<RunSummary, SessionError> {
        self.config.validate().map_err(SessionError::Config)?;

        // Clear and appends of one user must not interleave with another run for that user.
        let lock = self.user_locks.entry(user_id).or_default().clone();
        let outcome = {
            let _held = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.run_locked(credentials, user_id)
        };
        // Held only by the map and `lock`: nobody else is waiting on this user.
        self.user_locks
            .remove_if(&user_id, |_, entry| Arc::strong_count(entry) == 2);
        outcome
    }

    fn run_locked(
        &self,
        credentials: &MailboxCredentials,
        user_id: UserId,
    ) -> Result<RunSummary, SessionError> {
        let started = Instant::now();
        info!(user_id, address = %credentials.address, "invoice fetch requested");
        enter(user_id, RunState::Connecting);
        let session = self
            .connector
            .connect(credentials)
            .map_err(|e| abort(user_id, e))?;
        let mut session = SessionGuard::new(session);
        session
            .select_inbox(&self.config.mailbox)
            .map_err(|e| abort(user_id, e))?;
        enter(user_id, RunState::InboxSelected);

        let mut ctx = RunContext {
            user_id,
            window: DateWindow::trailing_two_months(Utc::now()),
            pushed: Vec::new(),
            diagnostics: RunDiagnostics::default(),
        };

        let health = self.store.health();
        if !health.ok {
            warn!(user_id, detail = %health.detail, "invoice store reports unhealthy");
        }
        ctx.diagnostics.store_health = Some(health);

        enter(user_id, RunState::ClearingPriorInvoices);
        match self.store.clear_user(user_id) {
            Ok(removed) => {
                info!(user_id, removed, "cleared prior invoices");
                ctx.diagnostics.cleared_prior = Some(removed);
            }
            Err(e) => {
                warn!(user_id, error = %e, "clearing prior invoices failed; continuing");
                ctx.diagnostics.clear_error = Some(e.to_string());
            }
        }

        enter(user_id, RunState::Scanning);
        let ids = session.list_message_ids().map_err(|e| abort(user_id, e))?;
        ctx.diagnostics.listed_messages = ids.len();
        debug!(
            user_id,
            messages = ids.len(),
            window_start = %ctx.window.start,
            window_end = %ctx.window.end,
            "scanning mailbox"
        );

        let mut stop_reason = StopReason::MessagesExhausted;
        for id in ids {
            if ctx.pushed.len() >= self.config.push_cap {
                stop_reason = StopReason::PushCapReached;
                break;
            }
            if ctx.diagnostics.scanned_messages >= self.config.max_scanned_messages {
                stop_reason = StopReason::ScanLimitReached;
                break;
            }
            if started.elapsed() >= self.config.max_run_duration {
                stop_reason = StopReason::TimeLimitReached;
                break;
            }
            ctx.diagnostics.scanned_messages += 1;
            self.process_message(&mut *session, id, &mut ctx);
        }
        if stop_reason == StopReason::MessagesExhausted && ctx.pushed.len() >= self.config.push_cap
        {
            stop_reason = StopReason::PushCapReached;
        }
        if matches!(
            stop_reason,
            StopReason::ScanLimitReached | StopReason::TimeLimitReached
        ) {
            warn!(user_id, reason = ?stop_reason, "scan stopped by safety bound");
        }

        enter(user_id, RunState::Closing);
        drop(session);
        enter(user_id, RunState::Done);

        let pushed_count = ctx.pushed.len();
        info!(
            user_id,
            pushed_count,
            scanned = ctx.diagnostics.scanned_messages,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "invoice fetching complete"
        );
        Ok(RunSummary {
            user_id,
            pushed_count,
            invoices: ctx.pushed,
            stop_reason,
            diagnostics: ctx.diagnostics,
        })
    }

    fn process_message(&self, session: &mut C::Session, id: MessageId, ctx: &mut RunContext) {
        let raw = match session.fetch_raw_message(id) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(message_id = id, error = %e, "skipped message: fetch failed");
                ctx.diagnostics.skip(SkipReason::FetchFailed);
                return;
            }
        };
        let mail = match parse_mail(&raw) {
            Ok(mail) => mail,
            Err(e) => {
                warn!(message_id = id, error = %e, "skipped message: malformed MIME");
                ctx.diagnostics.skip(SkipReason::MalformedMessage);
                return;
            }
        };
        let sent_at = match message_date(&mail) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(message_id = id, error = %e, "skipped message: date parse issue");
                ctx.diagnostics.skip(SkipReason::UnparseableDate);
                return;
            }
        };
        if !ctx.window.contains(sent_at) {
            debug!(message_id = id, sent_at = %sent_at, "skipped message: outside date window");
            ctx.diagnostics.skip(SkipReason::OutOfWindow);
            return;
        }

        let candidates = extract_candidates(&mail, self.config.include_html_bodies);
        if candidates.is_empty() {
            debug!(message_id = id, "skipped message: no invoice documents");
            ctx.diagnostics.skip(SkipReason::NoCandidates);
            return;
        }

        for candidate in &candidates {
            if ctx.pushed.len() >= self.config.push_cap {
                break;
            }
            ctx.diagnostics.candidates_seen += 1;
            match self.build_invoice(id, candidate, ctx.user_id, local_date(sent_at)) {
                Ok(invoice) => self.push(id, invoice, ctx),
                Err(reason) => ctx.diagnostics.skip(reason),
            }
        }
    }

    fn build_invoice(
        &self,
        id: MessageId,
        candidate: &Candidate,
        user_id: UserId,
        date: chrono::NaiveDate,
    ) -> Result<Invoice, SkipReason> {
        let text = extract_text(&candidate.bytes, candidate.kind, &self.config.temp_dir)
            .map_err(|e| {
                warn!(
                    message_id = id,
                    file = candidate.filename.as_deref().unwrap_or(""),
                    error = %e,
                    "skipped document"
                );
                SkipReason::from(&e)
            })?;
        if text.trim().is_empty() {
            debug!(message_id = id, "skipped document: empty text");
            return Err(SkipReason::EmptyText);
        }
        let platform = classify(&text).ok_or_else(|| {
            debug!(message_id = id, "skipped document: not from a known platform");
            SkipReason::UnknownPlatform
        })?;
        let amount = extract_amount_match(&text, self.config.min_amount_cents).ok_or_else(|| {
            debug!(message_id = id, platform = %platform, "skipped document: no plausible amount");
            SkipReason::NoAmount
        })?;
        debug!(message_id = id, pattern = amount.pattern, "amount matched");

        let mut hasher = Sha1::new();
        hasher.update(&candidate.bytes);
        Ok(Invoice {
            user_id,
            platform,
            amount_cents: amount.cents,
            date,
            source_ref: format!("{:x}", hasher.finalize()),
        })
    }

    fn push(&self, id: MessageId, invoice: Invoice, ctx: &mut RunContext) {
        match self.store.append(&invoice) {
            Ok(stored) => {
                info!(
                    user_id = ctx.user_id,
                    message_id = id,
                    invoice_id = %stored.id,
                    platform = %invoice.platform,
                    amount = %format_amount_cents(invoice.amount_cents),
                    date = %invoice.date,
                    "pushed invoice"
                );
                ctx.pushed.push(invoice);
            }
            Err(e) => {
                warn!(user_id = ctx.user_id, message_id = id, error = %e, "push failed");
                ctx.diagnostics.skip(SkipReason::PushFailed);
            }
        }
    }
}

fn enter(user_id: UserId, state: RunState) {
    debug!(user_id, state = ?state, "run state");
}

fn abort(user_id: UserId, e: SessionError) -> SessionError {
    error!(user_id, state = ?RunState::Aborted, error = %e, "invoice fetch aborted");
    e
}
