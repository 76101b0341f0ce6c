//! Databricks SQL warehouse transport over the Statement Execution API.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::connection::{Connection, Connector, RowCursor};
use crate::error::SourceError;
use crate::statement::{
    ColumnInfo, ExecuteStatementRequest, RawRow, ResultData, ServiceError, StatementResponse,
    StatementState,
};
use crate::SourceOpts;

const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";
/// Server-side wait before the submit call returns a PENDING statement
const WAIT_TIMEOUT: &str = "30s";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Must stay above `WAIT_TIMEOUT`
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

/// Normalise a workspace URL: add `https://` when no scheme is given and
/// strip trailing slashes.
pub fn normalize_workspace_url(url: &str) -> String {
    let url = url.trim();
    let url = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    };
    url.trim_end_matches('/').to_string()
}

/// Opens sessions against a Databricks SQL warehouse.
pub struct DatabricksConnector {
    opts: SourceOpts,
}

impl DatabricksConnector {
    pub fn new(opts: SourceOpts) -> Self {
        Self { opts }
    }
}

#[async_trait]
impl Connector for DatabricksConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, SourceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SourceError::Connection(format!("failed to build HTTP client: {e}")))?;

        let mut conn = DatabricksConnection {
            api: Arc::new(StatementApi {
                http,
                base_url: normalize_workspace_url(&self.opts.workspace_url),
                token: self.opts.personal_access_token.clone(),
                warehouse_id: self.opts.warehouse_id.clone(),
                disposition: self.opts.disposition,
            }),
            open: Arc::new(OpenStatements::default()),
            statement_timeout: self.opts.statement_timeout,
            poll_interval: self.opts.poll_interval,
        };

        // Probe the session; this is where a stopped warehouse shows up.
        if let Err(e) = probe(&conn).await {
            if let Err(close_err) = conn.close().await {
                debug!("Ignoring close failure after failed probe: {close_err}");
            }
            return Err(e);
        }
        Ok(Box::new(conn))
    }

    fn endpoint(&self) -> String {
        format!(
            "{} (warehouse {})",
            normalize_workspace_url(&self.opts.workspace_url),
            self.opts.warehouse_id
        )
    }
}

async fn probe(conn: &DatabricksConnection) -> Result<(), SourceError> {
    let mut cursor = conn.execute("SELECT 1").await?;
    while cursor.next_chunk().await?.is_some() {}
    Ok(())
}

/// Statement ids whose results have not been fully read yet.
#[derive(Default)]
struct OpenStatements(Mutex<HashSet<String>>);

impl OpenStatements {
    fn insert(&self, id: &str) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string());
    }

    fn remove(&self, id: &str) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
    }

    fn drain(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect()
    }
}

/// HTTP calls against one workspace, shared by a connection and its cursors.
struct StatementApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
    warehouse_id: String,
    disposition: crate::statement::Disposition,
}

impl StatementApi {
    async fn submit(&self, sql: &str) -> Result<StatementResponse, SourceError> {
        let request = ExecuteStatementRequest {
            statement: sql,
            warehouse_id: &self.warehouse_id,
            wait_timeout: WAIT_TIMEOUT,
            on_wait_timeout: "CONTINUE",
            format: "JSON_ARRAY",
            disposition: self.disposition,
        };
        let response = self
            .http
            .post(format!("{}{STATEMENTS_PATH}", self.base_url))
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn get_statement(&self, id: &str) -> Result<StatementResponse, SourceError> {
        let response = self
            .http
            .get(format!("{}{STATEMENTS_PATH}/{id}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    async fn cancel(&self, id: &str) -> Result<(), SourceError> {
        let response = self
            .http
            .post(format!("{}{STATEMENTS_PATH}/{id}/cancel", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Fetch a chunk by its internal link (a path relative to the workspace).
    async fn get_chunk(&self, link: &str) -> Result<ResultData, SourceError> {
        let response = self
            .http
            .get(format!("{}{link}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Fetch rows from a pre-signed URL. These must not carry the token.
    async fn get_external(&self, url: &str) -> Result<Vec<RawRow>, SourceError> {
        let response = self.http.get(url).send().await?;
        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ServiceError>(&body)
        .ok()
        .and_then(|e| e.message)
        .unwrap_or(body);
    let message = format!("HTTP {status}: {message}");

    Err(match status.as_u16() {
        401 | 403 => SourceError::Authentication(message),
        429 | 500 | 502 | 503 | 504 => SourceError::TransientIo(message),
        _ => SourceError::Connection(message),
    })
}

/// When a statement submitted now times out. `None` if the timeout is too
/// large to represent, which means no deadline.
fn statement_deadline(timeout: Duration) -> Option<tokio::time::Instant> {
    tokio::time::Instant::now().checked_add(timeout)
}

/// A session on a Databricks SQL warehouse.
pub struct DatabricksConnection {
    api: Arc<StatementApi>,
    open: Arc<OpenStatements>,
    statement_timeout: Duration,
    poll_interval: Duration,
}

impl DatabricksConnection {
    async fn cancel_quietly(&self, id: &str) {
        self.open.remove(id);
        if let Err(e) = self.api.cancel(id).await {
            warn!("Failed to cancel statement {id}: {e}");
        }
    }
}

#[async_trait]
impl Connection for DatabricksConnection {
    async fn execute(&self, sql: &str) -> Result<Box<dyn RowCursor>, SourceError> {
        debug!("Submitting statement: {sql}");
        let mut response = self.api.submit(sql).await?;
        let id = response.statement_id.clone();
        self.open.insert(&id);

        let deadline = statement_deadline(self.statement_timeout);
        while !response.status.state.is_terminal() {
            if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                self.cancel_quietly(&id).await;
                return Err(SourceError::TransientIo(format!(
                    "statement {id} did not finish within {:?}",
                    self.statement_timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
            response = match self.api.get_statement(&id).await {
                Ok(r) => r,
                Err(e) => {
                    self.cancel_quietly(&id).await;
                    return Err(e);
                }
            };
            debug!("Statement {id} is {}", response.status.state);
        }

        match response.status.state {
            StatementState::Succeeded => Ok(Box::new(DatabricksRowCursor::new(
                self.api.clone(),
                self.open.clone(),
                response,
            ))),
            state => {
                self.open.remove(&id);
                let error = response.status.error.unwrap_or_default();
                Err(SourceError::Statement {
                    state: state.to_string(),
                    code: error.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
                    message: error.message.unwrap_or_default(),
                })
            }
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        for id in self.open.drain() {
            debug!("Cancelling unfinished statement {id}");
            if let Err(e) = self.api.cancel(&id).await {
                warn!("Failed to cancel statement {id}: {e}");
            }
        }
        Ok(())
    }
}

/// Walks a succeeded statement's chunks through internal or external links.
pub struct DatabricksRowCursor {
    api: Arc<StatementApi>,
    open: Arc<OpenStatements>,
    statement_id: String,
    columns: Vec<ColumnInfo>,
    pending: Option<ResultData>,
    next_link: Option<String>,
    done: bool,
}

impl DatabricksRowCursor {
    fn new(api: Arc<StatementApi>, open: Arc<OpenStatements>, response: StatementResponse) -> Self {
        let statement_id = response.statement_id;
        let (columns, total_chunks) = match response.manifest {
            Some(manifest) => (
                manifest.schema.map(|s| s.columns).unwrap_or_default(),
                manifest.total_chunk_count.unwrap_or(0),
            ),
            None => (Vec::new(), 0),
        };
        let next_link = match &response.result {
            Some(_) => None,
            None if total_chunks > 0 => {
                Some(format!("{STATEMENTS_PATH}/{statement_id}/result/chunks/0"))
            }
            None => None,
        };

        Self {
            api,
            open,
            statement_id,
            columns,
            pending: response.result,
            next_link,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.open.remove(&self.statement_id);
    }
}

#[async_trait]
impl RowCursor for DatabricksRowCursor {
    fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<RawRow>>, SourceError> {
        if self.done {
            return Ok(None);
        }

        // Nothing is consumed until the whole chunk is in hand, so a failed
        // fetch can be retried.
        let data = if let Some(data) = self.pending.clone() {
            data
        } else if let Some(link) = self.next_link.clone() {
            self.api.get_chunk(&link).await?
        } else {
            self.finish();
            return Ok(None);
        };

        let next_link = data.next_link();
        let rows = match data.external_links {
            Some(links) if !links.is_empty() => {
                let mut rows = Vec::new();
                for link in &links {
                    rows.extend(self.api.get_external(&link.external_link).await?);
                }
                rows
            }
            _ => data.data_array.unwrap_or_default(),
        };

        self.pending = None;
        self.next_link = next_link;
        Ok(Some(rows))
    }
}
