//! In-memory warehouse for tests.
//!
//! [`MemoryWarehouse`] implements the connection seams without a network. It
//! understands exactly the statements this crate issues: the connection
//! check, both discovery queries, and the three extraction query shapes
//! (with the strict `>` filter and `ORDER BY`). It also counts sessions so
//! tests can assert nothing leaks, and can inject failures.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use sync_core::{CursorValue, MappedType, RecordEnvelope, SyncState, TableIdentity, Value};

use crate::connection::{Connection, ConnectionManager, Connector, RowCursor};
use crate::error::SourceError;
use crate::retry::RetryPolicy;
use crate::statement::{ColumnInfo, RawRow};
use crate::sync::SyncSink;

/// A table held by [`MemoryWarehouse`].
#[derive(Debug, Clone)]
pub struct MemoryTable {
    identity: TableIdentity,
    columns: Vec<ColumnInfo>,
    rows: Vec<RawRow>,
}

impl MemoryTable {
    /// `columns` are `(name, remote type)` pairs in table order.
    pub fn new(identity: TableIdentity, columns: &[(&str, &str)]) -> Self {
        Self {
            identity,
            columns: columns
                .iter()
                .map(|(name, ty)| ColumnInfo::new(*name, *ty))
                .collect(),
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, values: &[Option<&str>]) -> Self {
        self.rows.push(values.iter().map(|v| v.map(str::to_string)).collect());
        self
    }
}

#[derive(Default)]
struct WarehouseState {
    tables: Mutex<Vec<MemoryTable>>,
    chunk_size: AtomicUsize,
    open_sessions: AtomicUsize,
    connect_attempts: AtomicUsize,
    statements: Mutex<Vec<String>>,
    connect_failures: Mutex<VecDeque<SourceError>>,
    chunk_failures: Mutex<VecDeque<SourceError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Shared handle to an in-memory warehouse. Clones see the same data.
#[derive(Clone)]
pub struct MemoryWarehouse {
    state: Arc<WarehouseState>,
}

impl Default for MemoryWarehouse {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        let state = WarehouseState::default();
        state.chunk_size.store(1000, AtomicOrdering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    /// Serve results in chunks of at most `rows` rows.
    pub fn with_chunk_size(self, rows: usize) -> Self {
        self.state.chunk_size.store(rows.max(1), AtomicOrdering::SeqCst);
        self
    }

    pub fn with_table(self, table: MemoryTable) -> Self {
        lock(&self.state.tables).push(table);
        self
    }

    /// Append rows to an existing table (matched exactly).
    pub fn insert_rows(&self, identity: &TableIdentity, rows: &[&[Option<&str>]]) {
        let mut tables = lock(&self.state.tables);
        if let Some(table) = tables.iter_mut().find(|t| &t.identity == identity) {
            for values in rows {
                table
                    .rows
                    .push(values.iter().map(|v| v.map(str::to_string)).collect());
            }
        }
    }

    /// Make the next connection attempts fail with these errors, in order.
    pub fn fail_next_connects(&self, errors: impl IntoIterator<Item = SourceError>) {
        lock(&self.state.connect_failures).extend(errors);
    }

    /// Make the next chunk fetches fail with these errors, in order.
    pub fn fail_next_chunks(&self, errors: impl IntoIterator<Item = SourceError>) {
        lock(&self.state.chunk_failures).extend(errors);
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            state: self.state.clone(),
        })
    }

    pub fn manager(&self, retry: RetryPolicy) -> ConnectionManager {
        ConnectionManager::new(self.connector(), retry)
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(AtomicOrdering::SeqCst)
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(AtomicOrdering::SeqCst)
    }

    /// Every statement executed so far, in order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.state.statements).clone()
    }
}

struct MemoryConnector {
    state: Arc<WarehouseState>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, SourceError> {
        self.state.connect_attempts.fetch_add(1, AtomicOrdering::SeqCst);
        if let Some(error) = lock(&self.state.connect_failures).pop_front() {
            return Err(error);
        }
        self.state.open_sessions.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Box::new(MemoryConnection {
            state: self.state.clone(),
            closed: false,
        }))
    }

    fn endpoint(&self) -> String {
        "memory://warehouse".to_string()
    }
}

struct MemoryConnection {
    state: Arc<WarehouseState>,
    closed: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn execute(&self, sql: &str) -> Result<Box<dyn RowCursor>, SourceError> {
        if self.closed {
            return Err(SourceError::Connection("session is closed".to_string()));
        }
        lock(&self.state.statements).push(sql.to_string());

        let (columns, rows) = answer(&lock(&self.state.tables), sql)?;
        let chunk_size = self.state.chunk_size.load(AtomicOrdering::SeqCst).max(1);
        let chunks = rows
            .chunks(chunk_size)
            .map(|chunk| chunk.to_vec())
            .collect::<VecDeque<_>>();

        Ok(Box::new(MemoryCursor {
            state: self.state.clone(),
            columns,
            chunks,
        }))
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if !self.closed {
            self.closed = true;
            self.state.open_sessions.fetch_sub(1, AtomicOrdering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryCursor {
    state: Arc<WarehouseState>,
    columns: Vec<ColumnInfo>,
    chunks: VecDeque<Vec<RawRow>>,
}

#[async_trait]
impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<RawRow>>, SourceError> {
        if let Some(error) = lock(&self.state.chunk_failures).pop_front() {
            return Err(error);
        }
        Ok(self.chunks.pop_front())
    }
}

type Answer = (Vec<ColumnInfo>, Vec<RawRow>);

fn answer(tables: &[MemoryTable], sql: &str) -> Result<Answer, SourceError> {
    let trimmed = sql.trim();
    if trimmed.eq_ignore_ascii_case("SELECT 1") {
        return Ok((vec![ColumnInfo::new("1", "INT")], vec![vec![Some("1".to_string())]]));
    }
    if trimmed.contains("system.information_schema.columns") {
        return Ok(information_schema(tables, trimmed));
    }

    let mut scanner = Scanner::new(trimmed);
    if scanner.eat("DESCRIBE TABLE") {
        let identity = scanner.identity().ok_or_else(|| syntax_error(sql))?;
        return describe(tables, &identity);
    }
    if scanner.eat("SELECT * FROM") {
        let identity = scanner.identity().ok_or_else(|| syntax_error(sql))?;
        let table = find_table(tables, &identity)?;

        let filter = if scanner.eat("WHERE") {
            let field = scanner.ident().ok_or_else(|| syntax_error(sql))?;
            if !scanner.eat(">") {
                return Err(syntax_error(sql));
            }
            let literal = scanner.literal().ok_or_else(|| syntax_error(sql))?;
            Some((field, literal))
        } else {
            None
        };
        let order = if scanner.eat("ORDER BY") {
            let field = scanner.ident().ok_or_else(|| syntax_error(sql))?;
            scanner.eat("ASC");
            Some(field)
        } else {
            None
        };
        if !scanner.is_done() {
            return Err(syntax_error(sql));
        }
        return select(table, filter, order);
    }

    Err(syntax_error(sql))
}

fn syntax_error(sql: &str) -> SourceError {
    SourceError::Statement {
        state: "FAILED".to_string(),
        code: "PARSE_SYNTAX_ERROR".to_string(),
        message: format!("unsupported statement: {sql}"),
    }
}

fn matches_identity(a: &TableIdentity, catalog: &str, schema: &str, table: &str) -> bool {
    a.catalog().eq_ignore_ascii_case(catalog)
        && a.schema().eq_ignore_ascii_case(schema)
        && a.table().eq_ignore_ascii_case(table)
}

fn find_table<'a>(
    tables: &'a [MemoryTable],
    identity: &[String; 3],
) -> Result<&'a MemoryTable, SourceError> {
    tables
        .iter()
        .find(|t| matches_identity(&t.identity, &identity[0], &identity[1], &identity[2]))
        .ok_or_else(|| SourceError::Statement {
            state: "FAILED".to_string(),
            code: "BAD_REQUEST".to_string(),
            message: format!(
                "[TABLE_OR_VIEW_NOT_FOUND] The table or view `{}`.`{}`.`{}` cannot be found.",
                identity[0], identity[1], identity[2]
            ),
        })
}

fn information_schema(tables: &[MemoryTable], sql: &str) -> Answer {
    let columns = [
        "table_catalog",
        "table_schema",
        "table_name",
        "column_name",
        "full_data_type",
        "is_nullable",
    ]
    .iter()
    .map(|name| ColumnInfo::new(*name, "STRING"))
    .collect();

    let literals = string_literals(sql);
    let [catalog, schema, table] = match literals.as_slice() {
        [c, s, t, ..] => [c.as_str(), s.as_str(), t.as_str()],
        _ => return (columns, Vec::new()),
    };

    let rows = tables
        .iter()
        .filter(|t| matches_identity(&t.identity, catalog, schema, table))
        .flat_map(|t| {
            t.columns.iter().map(move |c| {
                vec![
                    Some(t.identity.catalog().to_string()),
                    Some(t.identity.schema().to_string()),
                    Some(t.identity.table().to_string()),
                    Some(c.name.clone()),
                    c.type_text.clone(),
                    Some("YES".to_string()),
                ]
            })
        })
        .collect();
    (columns, rows)
}

fn describe(tables: &[MemoryTable], identity: &[String; 3]) -> Result<Answer, SourceError> {
    let table = find_table(tables, identity)?;
    let columns = ["col_name", "data_type", "comment"]
        .iter()
        .map(|name| ColumnInfo::new(*name, "STRING"))
        .collect();

    let mut rows: Vec<RawRow> = table
        .columns
        .iter()
        .map(|c| vec![Some(c.name.clone()), c.type_text.clone(), None])
        .collect();
    rows.push(vec![Some(String::new()), Some(String::new()), Some(String::new())]);
    rows.push(vec![Some("# Detailed Table Information".to_string()), None, None]);
    Ok((columns, rows))
}

fn select(
    table: &MemoryTable,
    filter: Option<(String, String)>,
    order: Option<String>,
) -> Result<Answer, SourceError> {
    let column_of = |field: &str| -> Result<(usize, MappedType), SourceError> {
        table
            .columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(field))
            .map(|i| {
                let ty = table.columns[i].type_text.as_deref().unwrap_or("");
                (i, MappedType::from_remote(ty))
            })
            .ok_or_else(|| SourceError::Statement {
                state: "FAILED".to_string(),
                code: "UNRESOLVED_COLUMN".to_string(),
                message: format!("column `{field}` cannot be resolved"),
            })
    };
    let cursor_at = |row: &RawRow, index: usize, ty: MappedType| -> Option<CursorValue> {
        Value::decode(row.get(index)?.as_deref(), ty).ok()?.to_cursor()
    };

    let mut rows = table.rows.clone();

    if let Some((field, literal)) = filter {
        let (index, ty) = column_of(&field)?;
        let bound = CursorValue::parse(&literal, ty).map_err(|e| SourceError::Statement {
            state: "FAILED".to_string(),
            code: "DATATYPE_MISMATCH".to_string(),
            message: e.to_string(),
        })?;
        rows.retain(|row| {
            cursor_at(row, index, ty)
                .and_then(|v| v.compare(&bound).ok())
                .is_some_and(|o| o == Ordering::Greater)
        });
    }

    if let Some(field) = order {
        let (index, ty) = column_of(&field)?;
        // NULLs sort first, as the warehouse does for ASC.
        rows.sort_by(|a, b| {
            match (cursor_at(a, index, ty), cursor_at(b, index, ty)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => x.compare(&y).unwrap_or(Ordering::Equal),
            }
        });
    }

    Ok((table.columns.clone(), rows))
}

fn string_literals(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut scanner = Scanner::new(sql);
    while let Some(pos) = scanner.rest.find('\'') {
        scanner.rest = &scanner.rest[pos..];
        match scanner.string_literal() {
            Some(s) => out.push(s),
            None => break,
        }
    }
    out
}

/// Just enough of a tokenizer for the statements this crate generates.
struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(sql: &'a str) -> Self {
        Self { rest: sql }
    }

    fn is_done(&mut self) -> bool {
        self.rest = self.rest.trim_start();
        self.rest.is_empty()
    }

    fn eat(&mut self, token: &str) -> bool {
        self.rest = self.rest.trim_start();
        match self.rest.get(..token.len()) {
            Some(head) if head.eq_ignore_ascii_case(token) => {
                self.rest = &self.rest[token.len()..];
                true
            }
            _ => false,
        }
    }

    fn ident(&mut self) -> Option<String> {
        self.rest = self.rest.trim_start();
        let body = self.rest.strip_prefix('`')?;
        let mut out = String::new();
        let mut chars = body.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '`' {
                if matches!(chars.peek(), Some((_, '`'))) {
                    chars.next();
                    out.push('`');
                } else {
                    self.rest = &body[i + 1..];
                    return Some(out);
                }
            } else {
                out.push(c);
            }
        }
        None
    }

    fn identity(&mut self) -> Option<[String; 3]> {
        let catalog = self.ident()?;
        if !self.eat(".") {
            return None;
        }
        let schema = self.ident()?;
        if !self.eat(".") {
            return None;
        }
        let table = self.ident()?;
        Some([catalog, schema, table])
    }

    fn string_literal(&mut self) -> Option<String> {
        self.rest = self.rest.trim_start();
        let body = self.rest.strip_prefix('\'')?;
        let mut out = String::new();
        let mut chars = body.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => out.push(chars.next()?.1),
                '\'' => {
                    self.rest = &body[i + 1..];
                    return Some(out);
                }
                c => out.push(c),
            }
        }
        None
    }

    /// Text of a string, timestamp or bare numeric literal.
    fn literal(&mut self) -> Option<String> {
        if self.eat("TIMESTAMP") {
            return self.string_literal();
        }
        self.rest = self.rest.trim_start();
        if self.rest.starts_with('\'') {
            return self.string_literal();
        }
        let end = self
            .rest
            .find(char::is_whitespace)
            .unwrap_or(self.rest.len());
        let (word, rest) = self.rest.split_at(end);
        self.rest = rest;
        (!word.is_empty()).then(|| word.to_string())
    }
}

/// Sink that keeps everything it is given, for assertions.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub records: Vec<RecordEnvelope>,
    pub checkpoints: Vec<SyncState>,
    pub final_state: Option<SyncState>,
    /// Cancel this token once this many checkpoints have been collected
    cancel_after: Option<(usize, tokio_util::sync::CancellationToken)>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel `token` as soon as `checkpoints` checkpoints have been emitted.
    pub fn cancelling_after(
        checkpoints: usize,
        token: tokio_util::sync::CancellationToken,
    ) -> Self {
        Self {
            cancel_after: Some((checkpoints, token)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl SyncSink for CollectingSink {
    async fn emit_record(&mut self, record: RecordEnvelope) -> anyhow::Result<()> {
        self.records.push(record);
        Ok(())
    }

    async fn emit_checkpoint(&mut self, state: &SyncState) -> anyhow::Result<()> {
        self.checkpoints.push(state.clone());
        if let Some((after, token)) = &self.cancel_after {
            if self.checkpoints.len() >= *after {
                token.cancel();
            }
        }
        Ok(())
    }

    async fn emit_final(&mut self, state: &SyncState) -> anyhow::Result<()> {
        self.final_state = Some(state.clone());
        Ok(())
    }
}
