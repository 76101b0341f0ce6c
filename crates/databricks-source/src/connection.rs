//! Connection management: the transport seams and the retrying manager over them.
//!
//! A [`Connector`] opens sessions, a [`Connection`] runs statements, and a
//! [`RowCursor`] walks one statement's result chunk by chunk. Each of these
//! makes a single attempt per call; [`ConnectionManager`] owns the retry
//! policy and wraps them into [`ManagedConnection`] and [`ManagedCursor`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::retry::{retry, RetryPolicy};
use crate::statement::{ColumnInfo, RawRow};

/// Opens sessions against a warehouse.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open and verify one session.
    async fn connect(&self) -> Result<Box<dyn Connection>, SourceError>;

    /// Endpoint description for logs. Must not contain credentials.
    fn endpoint(&self) -> String;
}

/// One open session. Not shared between concurrent statements.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run `sql` and return a cursor over its result.
    async fn execute(&self, sql: &str) -> Result<Box<dyn RowCursor>, SourceError>;

    /// Release the session, cancelling statements whose results were not
    /// fully read.
    async fn close(&mut self) -> Result<(), SourceError>;
}

/// Forward-only access to one statement's result.
#[async_trait]
pub trait RowCursor: Send {
    /// Result columns in positional order.
    fn columns(&self) -> &[ColumnInfo];

    /// Next chunk of rows, or `None` once the result is exhausted.
    ///
    /// A failed call leaves the cursor where it was, so it may be retried.
    async fn next_chunk(&mut self) -> Result<Option<Vec<RawRow>>, SourceError>;
}

/// Acquires connections and retries transient failures on them.
#[derive(Clone)]
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    retry: RetryPolicy,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, retry: RetryPolicy) -> Self {
        Self { connector, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Open a session, retrying while the warehouse is unavailable.
    ///
    /// The caller must [`ManagedConnection::close`] the result on every path.
    /// Transient failures that outlast the retry policy are reported as
    /// [`SourceError::Connection`]; authentication failures are returned
    /// after the first attempt.
    pub async fn acquire(&self) -> Result<ManagedConnection, SourceError> {
        let endpoint = self.connector.endpoint();
        debug!("Connecting to {endpoint}");

        let connector = &self.connector;
        match retry(&self.retry, "connect", move || connector.connect()).await {
            Ok(inner) => {
                info!("Connected to {endpoint}");
                Ok(ManagedConnection {
                    inner,
                    retry: self.retry.clone(),
                })
            }
            Err(SourceError::TransientIo(msg)) => Err(SourceError::Connection(format!(
                "{endpoint} still unavailable after {} attempts: {msg}",
                self.retry.attempts()
            ))),
            Err(e) => Err(e),
        }
    }
}

/// A session obtained from [`ConnectionManager::acquire`].
pub struct ManagedConnection {
    inner: Box<dyn Connection>,
    retry: RetryPolicy,
}

impl ManagedConnection {
    /// Run `sql`, retrying transient failures.
    pub async fn execute(&self, sql: &str) -> Result<ManagedCursor, SourceError> {
        let inner = self.inner.as_ref();
        let cursor = retry(&self.retry, "execute statement", move || inner.execute(sql)).await?;
        Ok(ManagedCursor {
            inner: cursor,
            retry: self.retry.clone(),
        })
    }

    /// Run `sql` and collect its whole result. Meant for small metadata
    /// queries.
    pub async fn query_all(&self, sql: &str) -> Result<Vec<RawRow>, SourceError> {
        let mut cursor = self.execute(sql).await?;
        let mut rows = Vec::new();
        while let Some(chunk) = cursor.next_chunk().await? {
            rows.extend(chunk);
        }
        Ok(rows)
    }

    /// Release the session. Failures are logged, not returned: there is
    /// nothing a caller could do about them.
    pub async fn close(mut self) {
        if let Err(e) = self.inner.close().await {
            warn!("Failed to close warehouse session cleanly: {e}");
        } else {
            debug!("Closed warehouse session");
        }
    }
}

/// Cursor from [`ManagedConnection::execute`]; chunk fetches are retried.
pub struct ManagedCursor {
    inner: Box<dyn RowCursor>,
    retry: RetryPolicy,
}

impl ManagedCursor {
    pub fn columns(&self) -> &[ColumnInfo] {
        self.inner.columns()
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Vec<RawRow>>, SourceError> {
        let max_attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.next_chunk().await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        "Fetching result chunk failed (attempt {attempt}/{max_attempts}): {e}. Retrying in {delay:?}..."
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Verify the warehouse answers queries: `SELECT 1` must return `1`.
pub async fn check(manager: &ConnectionManager) -> Result<(), SourceError> {
    let conn = manager.acquire().await?;
    let result = probe(&conn).await;
    conn.close().await;
    result
}

async fn probe(conn: &ManagedConnection) -> Result<(), SourceError> {
    let rows = conn.query_all("SELECT 1").await?;
    match rows.first().and_then(|row| row.first()) {
        Some(Some(value)) if value.trim() == "1" => Ok(()),
        other => Err(SourceError::Connection(format!(
            "unexpected response to connection check: {other:?}"
        ))),
    }
}
