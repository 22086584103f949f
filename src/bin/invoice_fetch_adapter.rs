use invoice_ingest_lib::{
    ImapConnector, ImapSettings, IngestionPipeline, InvoiceStore, MailboxCredentials,
    PipelineConfig, RunResult, SessionError, SqliteInvoiceStore, StoreError, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Debug, Deserialize)]
struct AdapterRequest {
    schema_version: u64,
    case: Option<AdapterCaseMeta>,
    endpoint: AdapterEndpoint,
    #[serde(default)]
    query: Value,
    dataset: AdapterDataset,
}

#[derive(Debug, Deserialize)]
struct AdapterCaseMeta {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterEndpoint {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdapterDataset {
    db_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FetchQuery {
    email_user: String,
    email_pass: Option<String>,
    access_token: Option<String>,
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: UserId,
}

#[derive(Debug, Serialize)]
struct AdapterErrorBody {
    category: String,
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum AdapterResponse {
    #[serde(rename = "success")]
    Success { payload: Value },
    #[serde(rename = "error")]
    Error { error: AdapterErrorBody },
}

#[derive(Debug)]
struct AdapterFailure {
    category: &'static str,
    message: String,
    error_type: &'static str,
}

impl AdapterFailure {
    fn protocol(message: impl Into<String>) -> Self {
        Self {
            category: "ADAPTER_PROTOCOL_ERROR",
            message: message.into(),
            error_type: "AdapterError",
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self {
            category: "VALIDATION_ERROR",
            message: message.into(),
            error_type: "AdapterError",
        }
    }
}

impl From<StoreError> for AdapterFailure {
    fn from(e: StoreError) -> Self {
        let category = match e {
            StoreError::InvalidRecord(_) => "VALIDATION_ERROR",
            StoreError::Unavailable(_) | StoreError::Query(_) => "STORE_ERROR",
        };
        Self {
            category,
            message: e.to_string(),
            error_type: "StoreError",
        }
    }
}

impl From<SessionError> for AdapterFailure {
    fn from(e: SessionError) -> Self {
        let category = match e {
            SessionError::Auth(_) => "AUTH_ERROR",
            SessionError::Config(_) => "CONFIG_ERROR",
            SessionError::Connect(_) | SessionError::SelectInbox { .. } | SessionError::List(_) => {
                "MAILBOX_ERROR"
            }
        };
        Self {
            category,
            message: e.to_string(),
            error_type: "SessionError",
        }
    }
}

fn error_response(failure: AdapterFailure) -> AdapterResponse {
    AdapterResponse::Error {
        error: AdapterErrorBody {
            category: failure.category.to_string(),
            message: failure.message,
            error_type: failure.error_type.to_string(),
        },
    }
}

fn parse_bool_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn read_stdin_json() -> Result<Value, AdapterFailure> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| AdapterFailure::protocol(format!("read stdin failed: {e}")))?;
    if raw.trim().is_empty() {
        return Err(AdapterFailure::protocol("empty stdin request"));
    }
    serde_json::from_str::<Value>(&raw)
        .map_err(|e| AdapterFailure::protocol(format!("invalid JSON request: {e}")))
}

fn parse_query<T: for<'de> Deserialize<'de>>(query: Value, endpoint: &str) -> Result<T, AdapterFailure> {
    serde_json::from_value(query).map_err(|e| {
        AdapterFailure::validation(format!("request.query invalid for {endpoint}: {e}"))
    })
}

fn fetch_credentials(query: &FetchQuery) -> Result<MailboxCredentials, AdapterFailure> {
    let address = query.email_user.trim();
    if address.is_empty() {
        return Err(AdapterFailure::validation("email_user is required"));
    }
    let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
    match (non_empty(&query.access_token), non_empty(&query.email_pass)) {
        (Some(token), _) => Ok(MailboxCredentials::access_token(address, token)),
        (None, Some(password)) => Ok(MailboxCredentials::password(address, password)),
        (None, None) => Err(AdapterFailure::validation(
            "one of email_pass or access_token is required",
        )),
    }
}

fn fetch_invoices(store: SqliteInvoiceStore, query: FetchQuery) -> Result<Value, AdapterFailure> {
    let credentials = fetch_credentials(&query)?;
    let pipeline = IngestionPipeline::new(
        ImapConnector::new(ImapSettings::from_env()),
        Arc::new(store),
        PipelineConfig::from_env(),
    );
    let outcome = pipeline.run(&credentials, query.user_id);
    let result = RunResult::from(&outcome);
    let summary = outcome?;
    Ok(json!({
        "result": result,
        "user_id": summary.user_id,
        "pushed_count": summary.pushed_count,
        "stop_reason": summary.stop_reason,
        "invoices": summary.invoices.iter().map(|inv| inv.to_json()).collect::<Vec<_>>(),
        "diagnostics": summary.diagnostics,
    }))
}

fn dispatch(req: AdapterRequest) -> Result<Value, AdapterFailure> {
    if req.schema_version != 1 {
        return Err(AdapterFailure::protocol(format!(
            "unsupported schema_version: {}",
            req.schema_version
        )));
    }

    let path = req
        .endpoint
        .path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterFailure::protocol("request.endpoint.path missing"))?;
    let db_path = req
        .dataset
        .db_path
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AdapterFailure::protocol("request.dataset.db_path missing"))?;

    let store = SqliteInvoiceStore::open(db_path)?;
    match path {
        "/invoices/fetch" => fetch_invoices(store, parse_query(req.query, "fetch")?),
        "/invoices/list" => {
            let query: UserQuery = parse_query(req.query, "list")?;
            let rows = store.list_by_user(query.user_id)?;
            Ok(json!({
                "user_id": query.user_id,
                "count": rows.len(),
                "invoices": rows.iter().map(|row| row.to_json()).collect::<Vec<_>>(),
            }))
        }
        "/invoices/clear" => {
            let query: UserQuery = parse_query(req.query, "clear")?;
            let removed = store.clear_user(query.user_id)?;
            info!(user_id = query.user_id, removed, "cleared invoices");
            Ok(json!({ "user_id": query.user_id, "removed": removed }))
        }
        "/invoices/health" => {
            let health = store.health();
            Ok(json!({
                "ok": health.ok,
                "detail": health.detail,
                "db_path": store.db_path().to_string_lossy(),
            }))
        }
        _ => Err(AdapterFailure {
            category: "UNSUPPORTED_ENDPOINT",
            message: format!("unsupported endpoint path: {path}"),
            error_type: "AdapterError",
        }),
    }
}

fn main() {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let pretty = parse_bool_flag(&args, "--pretty");
    let verbose = parse_bool_flag(&args, "--verbose");

    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let resp = match read_stdin_json()
        .and_then(|v| {
            serde_json::from_value::<AdapterRequest>(v)
                .map_err(|e| AdapterFailure::protocol(format!("request root invalid: {e}")))
        })
        .and_then(|req| {
            if let Some(case_id) = req.case.as_ref().and_then(|c| c.id.as_deref()) {
                debug!(case = case_id, "adapter case");
            }
            debug!(
                endpoint = req.endpoint.path.as_deref().unwrap_or(""),
                db = req.dataset.db_path.as_deref().unwrap_or(""),
                "adapter request"
            );
            dispatch(req)
        }) {
        Ok(payload) => AdapterResponse::Success { payload },
        Err(failure) => error_response(failure),
    };

    let out = if pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "error": {
                "category": "ADAPTER_PROTOCOL_ERROR",
                "message": format!("serialize response failed: {e}"),
                "type": "SerializeError",
            }
        })
        .to_string()
    });

    print!("{out}");
}
