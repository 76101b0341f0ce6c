//! End-to-end sync passes against the in-memory warehouse.

use std::num::NonZeroUsize;

use chrono::{TimeZone, Utc};
use databricks_sync_source::testing::{CollectingSink, MemoryTable, MemoryWarehouse};
use databricks_sync_source::{run_sync, ErrorKind, RetryPolicy, SyncRequest, SyncStage};
use sync_core::{
    ColumnDef, ColumnSchema, CursorValue, MappedType, SyncState, TableIdentity, Value,
};
use tokio_util::sync::CancellationToken;

fn orders() -> TableIdentity {
    TableIdentity::new("main", "sales", "orders").unwrap()
}

const COLUMNS: &[(&str, &str)] = &[
    ("id", "BIGINT"),
    ("amount", "DECIMAL(10,2)"),
    ("updated_at", "TIMESTAMP"),
    ("active", "BOOLEAN"),
];

fn day(d: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

/// Five orders updated on Jan 1..=5, inserted out of order.
fn five_orders() -> MemoryWarehouse {
    let table = MemoryTable::new(orders(), COLUMNS)
        .with_row(&[Some("3"), Some("30.00"), Some("2024-01-03T00:00:00Z"), Some("true")])
        .with_row(&[Some("1"), Some("10.00"), Some("2024-01-01T00:00:00Z"), Some("true")])
        .with_row(&[Some("5"), Some("50.00"), Some("2024-01-05T00:00:00Z"), Some("false")])
        .with_row(&[Some("2"), Some("20.00"), Some("2024-01-02T00:00:00Z"), None])
        .with_row(&[Some("4"), None, Some("2024-01-04T00:00:00Z"), Some("true")]);
    MemoryWarehouse::new().with_chunk_size(3).with_table(table)
}

fn batch_size(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn ids(sink: &CollectingSink) -> Vec<i64> {
    sink.records
        .iter()
        .map(|r| match r.data.get("id") {
            Some(Value::Integer(i)) => *i,
            other => panic!("unexpected id {other:?}"),
        })
        .collect()
}

fn cursor(state: &SyncState) -> Option<CursorValue> {
    state.cursor_value.clone()
}

#[tokio::test]
async fn test_previous_cursor_filters_older_rows() {
    let warehouse = MemoryWarehouse::new().with_table(
        MemoryTable::new(orders(), COLUMNS)
            .with_row(&[Some("1"), Some("1.00"), Some("2024-01-02"), Some("true")])
            .with_row(&[Some("2"), Some("2.00"), Some("2023-12-31"), Some("true")]),
    );
    let manager = warehouse.manager(RetryPolicy::no_retry());
    let previous = SyncState {
        cursor_field: Some("updated_at".to_string()),
        cursor_value: Some(CursorValue::Timestamp(day(1))),
        last_sync_timestamp: day(1),
    };

    let mut sink = CollectingSink::new();
    let outcome = run_sync(
        &manager,
        SyncRequest::new(orders())
            .with_cursor("updated_at")
            .with_previous_state(previous),
        &mut sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(ids(&sink), vec![1]);
    assert_eq!(
        cursor(&outcome.final_state),
        Some(CursorValue::Timestamp(day(2)))
    );
    assert_eq!(sink.final_state.as_ref(), Some(&outcome.final_state));

    let select = warehouse
        .statements()
        .into_iter()
        .find(|s| s.starts_with("SELECT * FROM"))
        .unwrap();
    assert_eq!(
        select,
        "SELECT * FROM `main`.`sales`.`orders` WHERE `updated_at` > \
         TIMESTAMP '2024-01-01T00:00:00.000000Z' ORDER BY `updated_at` ASC"
    );
    assert_eq!(warehouse.open_sessions(), 0);
}

#[tokio::test]
async fn test_batches_and_checkpoints_follow_cursor_order() {
    let warehouse = five_orders();
    let manager = warehouse.manager(RetryPolicy::no_retry());

    let mut sink = CollectingSink::new();
    let outcome = run_sync(
        &manager,
        SyncRequest::new(orders())
            .with_cursor("updated_at")
            .with_batch_size(batch_size(2)),
        &mut sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.batches, 3);
    assert_eq!(outcome.records_emitted, 5);
    assert_eq!(ids(&sink), vec![1, 2, 3, 4, 5]);

    let checkpoints: Vec<_> = sink.checkpoints.iter().map(cursor).collect();
    assert_eq!(
        checkpoints,
        vec![
            Some(CursorValue::Timestamp(day(2))),
            Some(CursorValue::Timestamp(day(4))),
            Some(CursorValue::Timestamp(day(5))),
        ]
    );
    assert_eq!(
        cursor(&outcome.final_state),
        Some(CursorValue::Timestamp(day(5)))
    );
    assert_eq!(outcome.schema.len(), 4);
}

#[tokio::test]
async fn test_second_run_without_new_data_emits_nothing() {
    let warehouse = five_orders();
    let manager = warehouse.manager(RetryPolicy::no_retry());
    let cancel = CancellationToken::new();

    let mut first = CollectingSink::new();
    let outcome = run_sync(
        &manager,
        SyncRequest::new(orders()).with_cursor("updated_at"),
        &mut first,
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(first.records.len(), 5);

    let mut second = CollectingSink::new();
    let again = run_sync(
        &manager,
        SyncRequest::new(orders())
            .with_cursor("updated_at")
            .with_previous_state(outcome.final_state.clone()),
        &mut second,
        &cancel,
    )
    .await
    .unwrap();

    assert!(second.records.is_empty());
    assert!(second.checkpoints.is_empty());
    assert_eq!(again.final_state.cursor_value, outcome.final_state.cursor_value);

    // New rows after the cursor are picked up; a row at the cursor is not.
    warehouse.insert_rows(
        &orders(),
        &[
            &[Some("6"), None, Some("2024-01-06T00:00:00Z"), None],
            &[Some("7"), None, Some("2024-01-05T00:00:00Z"), None],
        ],
    );
    let mut third = CollectingSink::new();
    run_sync(
        &manager,
        SyncRequest::new(orders())
            .with_cursor("updated_at")
            .with_previous_state(again.final_state),
        &mut third,
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(ids(&third), vec![6]);
    assert_eq!(warehouse.open_sessions(), 0);
}

#[tokio::test]
async fn test_integer_cursor() {
    let warehouse = five_orders();
    let manager = warehouse.manager(RetryPolicy::no_retry());
    let previous = SyncState {
        cursor_field: Some("id".to_string()),
        cursor_value: Some(CursorValue::Integer(3)),
        last_sync_timestamp: day(1),
    };

    let mut sink = CollectingSink::new();
    let outcome = run_sync(
        &manager,
        SyncRequest::new(orders())
            .with_cursor("id")
            .with_previous_state(previous),
        &mut sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(ids(&sink), vec![4, 5]);
    assert_eq!(outcome.final_state.cursor_value, Some(CursorValue::Integer(5)));
}

#[tokio::test]
async fn test_full_refresh_leaves_cursor_alone() {
    let warehouse = five_orders();
    let manager = warehouse.manager(RetryPolicy::no_retry());
    let previous = SyncState {
        cursor_field: Some("updated_at".to_string()),
        cursor_value: Some(CursorValue::Timestamp(day(4))),
        last_sync_timestamp: day(4),
    };

    let mut sink = CollectingSink::new();
    let outcome = run_sync(
        &manager,
        SyncRequest::new(orders())
            .with_previous_state(previous.clone())
            .with_batch_size(batch_size(2)),
        &mut sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(sink.records.len(), 5);
    assert_eq!(sink.checkpoints.len(), 3);
    for state in sink.checkpoints.iter().chain([&outcome.final_state]) {
        assert_eq!(state.cursor_field, previous.cursor_field);
        assert_eq!(state.cursor_value, previous.cursor_value);
    }
    assert!(outcome.final_state.last_sync_timestamp > previous.last_sync_timestamp);
    assert!(warehouse
        .statements()
        .contains(&"SELECT * FROM `main`.`sales`.`orders`".to_string()));
}

#[tokio::test]
async fn test_unresolvable_table_fails_before_any_record() {
    let warehouse = five_orders();
    let manager = warehouse.manager(RetryPolicy::no_retry());
    let previous = SyncState {
        cursor_field: Some("updated_at".to_string()),
        cursor_value: Some(CursorValue::Timestamp(day(2))),
        last_sync_timestamp: day(2),
    };

    let mut sink = CollectingSink::new();
    let failure = run_sync(
        &manager,
        SyncRequest::new(TableIdentity::new("main", "sales", "missing").unwrap())
            .with_cursor("updated_at")
            .with_previous_state(previous.clone()),
        &mut sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(failure.stage, SyncStage::DiscoverSchema);
    assert_eq!(failure.error.kind(), ErrorKind::SchemaNotFound);
    assert_eq!(failure.last_checkpoint, previous);
    assert!(sink.records.is_empty());
    assert!(sink.checkpoints.is_empty());
    assert!(sink.final_state.is_none());
    assert_eq!(warehouse.open_sessions(), 0);
}

#[tokio::test]
async fn test_case_insensitive_duplicates_are_ambiguous() {
    let warehouse = five_orders().with_table(MemoryTable::new(
        TableIdentity::new("main", "sales", "ORDERS").unwrap(),
        &[("id", "INT")],
    ));
    let manager = warehouse.manager(RetryPolicy::no_retry());

    let failure = run_sync(
        &manager,
        SyncRequest::new(orders()),
        &mut CollectingSink::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(failure.error.kind(), ErrorKind::AmbiguousSchema);
    assert_eq!(warehouse.open_sessions(), 0);
}

#[tokio::test]
async fn test_unorderable_cursor_is_rejected_before_reading() {
    let warehouse = five_orders();
    let manager = warehouse.manager(RetryPolicy::no_retry());

    for field in ["active", "no_such_column"] {
        let mut sink = CollectingSink::new();
        let failure = run_sync(
            &manager,
            SyncRequest::new(orders()).with_cursor(field),
            &mut sink,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(failure.stage, SyncStage::BuildQuery, "{field}");
        assert_eq!(failure.error.kind(), ErrorKind::QueryBuild, "{field}");
        assert!(sink.records.is_empty());
    }

    assert!(!warehouse
        .statements()
        .iter()
        .any(|s| s.starts_with("SELECT * FROM")));
    assert_eq!(warehouse.open_sessions(), 0);
}

#[tokio::test]
async fn test_decode_failure_keeps_earlier_checkpoints() {
    // Rows sorted by id; id 5 has an unparseable amount and lands in batch 3.
    let mut table = MemoryTable::new(orders(), COLUMNS);
    for id in 1..=10u32 {
        let id_text = id.to_string();
        let amount = if id == 5 {
            "n/a".to_string()
        } else {
            format!("{id}.00")
        };
        let updated = format!("2024-01-{id:02}T00:00:00Z");
        table = table.with_row(&[
            Some(id_text.as_str()),
            Some(amount.as_str()),
            Some(updated.as_str()),
            Some("true"),
        ]);
    }
    let warehouse = MemoryWarehouse::new().with_chunk_size(4).with_table(table);
    let manager = warehouse.manager(RetryPolicy::no_retry());

    let mut sink = CollectingSink::new();
    let failure = run_sync(
        &manager,
        SyncRequest::new(orders())
            .with_cursor("updated_at")
            .with_batch_size(batch_size(2)),
        &mut sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert_eq!(failure.stage, SyncStage::StreamBatches);
    assert_eq!(failure.error.kind(), ErrorKind::RowDecode);
    assert_eq!(ids(&sink), vec![1, 2, 3, 4]);
    assert_eq!(sink.checkpoints.len(), 2);
    assert_eq!(
        failure.last_checkpoint.cursor_value,
        Some(CursorValue::Timestamp(day(4)))
    );
    assert!(sink.final_state.is_none());
    assert_eq!(warehouse.open_sessions(), 0);

    // Resuming from the checkpoint re-reads from batch 3, not from scratch.
    let mut resumed = CollectingSink::new();
    run_sync(
        &manager,
        SyncRequest::new(orders())
            .with_cursor("updated_at")
            .with_previous_state(failure.last_checkpoint),
        &mut resumed,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert!(resumed.records.is_empty());
    let last = warehouse.statements().pop().unwrap();
    assert!(last.contains("> TIMESTAMP '2024-01-04T00:00:00.000000Z'"), "{last}");
}

#[tokio::test]
async fn test_cancellation_returns_last_checkpoint() {
    let warehouse = five_orders();
    let manager = warehouse.manager(RetryPolicy::no_retry());
    let cancel = CancellationToken::new();

    let mut sink = CollectingSink::cancelling_after(2, cancel.clone());
    let outcome = run_sync(
        &manager,
        SyncRequest::new(orders())
            .with_cursor("updated_at")
            .with_batch_size(batch_size(2)),
        &mut sink,
        &cancel,
    )
    .await
    .unwrap();

    assert!(outcome.cancelled);
    assert_eq!(outcome.batches, 2);
    assert_eq!(ids(&sink), vec![1, 2, 3, 4]);
    assert_eq!(Some(&outcome.final_state), sink.checkpoints.last());
    assert!(sink.final_state.is_none());
    assert_eq!(warehouse.open_sessions(), 0);
}

#[tokio::test]
async fn test_supplied_schema_skips_discovery() {
    let warehouse = five_orders();
    let manager = warehouse.manager(RetryPolicy::no_retry());
    let schema = ColumnSchema::new(
        COLUMNS
            .iter()
            .map(|(name, ty)| ColumnDef::new(*name, *ty))
            .collect(),
    )
    .unwrap();

    let mut sink = CollectingSink::new();
    run_sync(
        &manager,
        SyncRequest::new(orders()).with_schema(schema),
        &mut sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(sink.records.len(), 5);
    assert!(!warehouse
        .statements()
        .iter()
        .any(|s| s.contains("information_schema")));
}

#[tokio::test]
async fn test_hive_metastore_uses_describe_and_keeps_unknown_columns() {
    let events = TableIdentity::new("hive_metastore", "default", "events").unwrap();
    let warehouse = MemoryWarehouse::new().with_table(
        MemoryTable::new(
            events.clone(),
            &[("seq", "int"), ("payload", "map<string,string>"), ("blob", "binary")],
        )
        .with_row(&[Some("2"), Some(r#"{"k":"v"}"#), Some("AAEC")])
        .with_row(&[Some("1"), None, None]),
    );
    let manager = warehouse.manager(RetryPolicy::no_retry());

    let mut sink = CollectingSink::new();
    let outcome = run_sync(
        &manager,
        SyncRequest::new(events.clone()).with_cursor("seq"),
        &mut sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let types: Vec<_> = outcome.schema.columns().iter().map(|c| c.mapped_type).collect();
    assert_eq!(
        types,
        vec![MappedType::Integer, MappedType::Unknown, MappedType::Unknown]
    );
    assert_eq!(outcome.schema.cursor_candidates(), vec!["seq"]);
    assert_eq!(sink.records.len(), 2);
    assert_eq!(
        sink.records[1].data.get("payload"),
        Some(&Value::Json(serde_json::json!({"k": "v"})))
    );
    assert!(warehouse
        .statements()
        .contains(&"DESCRIBE TABLE `hive_metastore`.`default`.`events`".to_string()));

    let missing = TableIdentity::new("hive_metastore", "default", "nope").unwrap();
    let failure = run_sync(
        &manager,
        SyncRequest::new(missing),
        &mut CollectingSink::new(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();
    assert_eq!(failure.error.kind(), ErrorKind::SchemaNotFound);
}

#[tokio::test]
async fn test_records_carry_stream_name() {
    let warehouse = five_orders();
    let manager = warehouse.manager(RetryPolicy::no_retry());
    let mut sink = CollectingSink::new();
    run_sync(
        &manager,
        SyncRequest::new(orders()).with_batch_size(batch_size(10)),
        &mut sink,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let json = sink.records[0].to_json();
    assert_eq!(json["stream"], "main_sales_orders");
    assert!(json["data"].get("updated_at").is_some());
}
