use arrow_array::{Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use flightagg_core::{
    aggregate_dataset, AggregateOptions, Combiner, DatasetId, Error, ExecutionMode, FailurePolicy,
    MemoryBatchSource, Stage,
};
use std::sync::Arc;
use std::time::Duration;

fn sensor_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
        Field::new("value", DataType::Float64, true),
    ]))
}

fn sensor_batch(values: Vec<Option<f64>>) -> RecordBatch {
    let n = values.len();
    RecordBatch::try_new(
        sensor_schema(),
        vec![
            Arc::new(Int64Array::from((0..n as i64).collect::<Vec<_>>())),
            Arc::new(StringArray::from(
                (0..n).map(|i| format!("Sensor_{}", i % 50 + 1)).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(values)),
        ],
    )
    .unwrap()
}

fn dense(values: &[f64]) -> RecordBatch {
    sensor_batch(values.iter().copied().map(Some).collect())
}

fn ids(names: &[&str]) -> Vec<DatasetId> {
    names.iter().copied().map(DatasetId::from).collect()
}

/// postgres: [1, 2, 3]; mongo: [10, 20] + [30, 40] in two batches;
/// duckdb: 5 rows with rows 2 and 4 null.
fn three_datasets() -> MemoryBatchSource {
    let mut source = MemoryBatchSource::new();
    source.insert("postgres", sensor_schema(), vec![dense(&[1.0, 2.0, 3.0])]);
    source.insert(
        "mongo",
        sensor_schema(),
        vec![dense(&[10.0, 20.0]), dense(&[30.0, 40.0])],
    );
    source.insert(
        "duckdb",
        sensor_schema(),
        vec![sensor_batch(vec![Some(4.0), None, Some(6.0), None, Some(8.0)])],
    );
    source
}

#[tokio::test]
async fn test_end_to_end_three_datasets() {
    let combiner = Combiner::new(three_datasets(), AggregateOptions::default());
    let report = combiner
        .run(&ids(&["postgres", "mongo", "duckdb"]))
        .await
        .unwrap();

    let fetched: Vec<_> = report.fetched().collect();
    assert_eq!(fetched.len(), 3);

    let pg = &fetched[0].aggregate;
    assert_eq!(fetched[0].dataset.as_str(), "postgres");
    assert_eq!((pg.sum, pg.valid_rows, pg.mean), (6.0, 3, 2.0));

    let mg = &fetched[1].aggregate;
    assert_eq!((mg.sum, mg.valid_rows, mg.mean), (100.0, 4, 25.0));
    assert_eq!(mg.batches, 2);

    let dk = &fetched[2].aggregate;
    assert_eq!((dk.sum, dk.valid_rows, dk.mean), (18.0, 3, 6.0));
    assert_eq!(dk.total_rows, 5);

    let combined = report.combined.unwrap();
    assert_eq!(combined.datasets, 3);
    assert_eq!(combined.total_rows, 10);
    assert_eq!(combined.total_sum, 124.0);
    assert_eq!(combined.weighted_mean, 12.4);
    assert_eq!(combined.mean_of_means, 11.0);
    assert_eq!(report.failures().count(), 0);
}

#[tokio::test]
async fn test_null_rows_excluded() {
    let mut source = MemoryBatchSource::new();
    source.insert(
        "nulls",
        sensor_schema(),
        vec![sensor_batch(vec![Some(1.25), None, Some(2.5), None, Some(4.25)])],
    );

    let report = aggregate_dataset(&source, &"nulls".into(), &AggregateOptions::default())
        .await
        .unwrap();
    assert_eq!(report.aggregate.sum, 8.0);
    assert_eq!(report.aggregate.valid_rows, 3);
    assert_eq!(report.aggregate.null_rows(), 2);
}

#[tokio::test]
async fn test_batch_split_and_replay_are_bit_identical() {
    let values: Vec<f64> = (0..500).map(|i| 10.5 + (i as f64) * 0.37).collect();

    let mut source = MemoryBatchSource::new();
    source.insert("whole", sensor_schema(), vec![dense(&values)]);
    source.insert(
        "split",
        sensor_schema(),
        values.chunks(33).map(dense).collect(),
    );

    let options = AggregateOptions::default();
    let whole = aggregate_dataset(&source, &"whole".into(), &options).await.unwrap();
    let split = aggregate_dataset(&source, &"split".into(), &options).await.unwrap();
    let replay = aggregate_dataset(&source, &"split".into(), &options).await.unwrap();

    assert_eq!(whole.aggregate.sum.to_bits(), split.aggregate.sum.to_bits());
    assert_eq!(whole.aggregate.valid_rows, split.aggregate.valid_rows);
    assert_eq!(split.aggregate, replay.aggregate);
}

#[tokio::test]
async fn test_empty_stream_mean_is_zero() {
    let mut source = MemoryBatchSource::new();
    source.insert("empty", sensor_schema(), vec![]);
    source.insert("all_null", sensor_schema(), vec![sensor_batch(vec![None, None])]);

    let options = AggregateOptions::default();
    for name in ["empty", "all_null"] {
        let report = aggregate_dataset(&source, &name.into(), &options).await.unwrap();
        assert_eq!(report.aggregate.valid_rows, 0);
        assert_eq!(report.aggregate.mean, 0.0);
    }

    let combined = Combiner::new(source, options)
        .run(&ids(&["empty", "all_null"]))
        .await
        .unwrap()
        .combined
        .unwrap();
    assert_eq!(combined.weighted_mean, 0.0);
    assert_eq!(combined.mean_of_means, 0.0);
}

#[tokio::test]
async fn test_missing_column_is_attributed() {
    let schema = Arc::new(Schema::new(vec![Field::new("reading", DataType::Float64, true)]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![Arc::new(Float64Array::from(vec![1.0]))],
    )
    .unwrap();

    let mut source = MemoryBatchSource::new();
    source.insert("mongo", schema, vec![batch]);

    let err = aggregate_dataset(&source, &"mongo".into(), &AggregateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.dataset(), Some("mongo"));
    assert_eq!(err.stage(), Some(Stage::ResolveColumn));
    assert!(err.to_string().contains("Column 'value' not found"));
    assert_eq!(source.open_streams(), 0);
}

#[tokio::test]
async fn test_wrong_column_type_is_fatal() {
    let schema = Arc::new(Schema::new(vec![Field::new("value", DataType::Int64, true)]));
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(Int64Array::from(vec![1, 2]))])
        .unwrap();

    let mut source = MemoryBatchSource::new();
    source.insert("duckdb", schema, vec![batch]);

    let err = aggregate_dataset(&source, &"duckdb".into(), &AggregateOptions::default())
        .await
        .unwrap_err();
    match err {
        Error::Dataset { stage, source, .. } => {
            assert_eq!(stage, Stage::ResolveColumn);
            assert!(matches!(*source, Error::ColumnType { .. }));
        }
        other => panic!("Expected Dataset error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_abort_run_stops_at_first_failure() {
    let mut source = three_datasets();
    source.fail_open("mongo", "service unavailable");

    let combiner = Combiner::new(source, AggregateOptions::default());
    let err = combiner
        .run(&ids(&["postgres", "mongo", "duckdb"]))
        .await
        .unwrap_err();

    assert_eq!(err.dataset(), Some("mongo"));
    assert_eq!(err.stage(), Some(Stage::OpenStream));
    // duckdb is never opened once mongo has failed
    assert_eq!(combiner.source().opened_total(), 1);
    assert_eq!(combiner.source().open_streams(), 0);
}

#[tokio::test]
async fn test_mid_stream_failure_releases_stream() {
    let mut source = MemoryBatchSource::new();
    source.insert_failing(
        "postgres",
        sensor_schema(),
        vec![dense(&[1.0]), dense(&[2.0]), dense(&[3.0])],
        2,
        "connection reset by peer",
    );

    let err = aggregate_dataset(&source, &"postgres".into(), &AggregateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::ReadBatch));
    assert!(err.to_string().contains("connection reset by peer"));
    assert_eq!(source.opened_total(), 1);
    assert_eq!(source.open_streams(), 0);
}

#[tokio::test]
async fn test_continue_on_error_combines_survivors() {
    let mut source = three_datasets();
    source.fail_open("mongo", "service unavailable");

    let report = Combiner::new(source, AggregateOptions::default())
        .with_failure_policy(FailurePolicy::ContinueOnError)
        .run(&ids(&["postgres", "mongo", "duckdb"]))
        .await
        .unwrap();

    let order: Vec<&str> = report.datasets.iter().map(|o| o.dataset().as_str()).collect();
    assert_eq!(order, vec!["postgres", "mongo", "duckdb"]);

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.as_str(), "mongo");

    let combined = report.combined.unwrap();
    assert_eq!(combined.datasets, 2);
    assert_eq!(combined.total_rows, 6);
    assert_eq!(combined.total_sum, 24.0);
    assert_eq!(combined.mean_of_means, 4.0);
}

#[tokio::test]
async fn test_continue_on_error_all_failed() {
    let mut source = MemoryBatchSource::new();
    source.fail_open("postgres", "down");

    let report = Combiner::new(source, AggregateOptions::default())
        .with_failure_policy(FailurePolicy::ContinueOnError)
        .run(&ids(&["postgres"]))
        .await
        .unwrap();
    assert!(report.combined.is_none());
    assert_eq!(report.failures().count(), 1);
}

#[tokio::test]
async fn test_concurrent_matches_sequential_order() {
    let datasets = ids(&["postgres", "mongo", "duckdb"]);

    let sequential = Combiner::new(three_datasets(), AggregateOptions::default())
        .run(&datasets)
        .await
        .unwrap();
    let concurrent = Combiner::new(three_datasets(), AggregateOptions::default())
        .with_mode(ExecutionMode::Concurrent { max_in_flight: 3 })
        .run(&datasets)
        .await
        .unwrap();

    let names = |r: &flightagg_core::CombineReport| -> Vec<String> {
        r.fetched().map(|d| d.dataset.to_string()).collect()
    };
    assert_eq!(names(&sequential), names(&concurrent));
    assert_eq!(sequential.combined, concurrent.combined);
}

#[tokio::test]
async fn test_concurrent_reports_in_given_order_when_first_finishes_last() {
    let mut source = three_datasets();
    source.insert_delayed(
        "slow",
        sensor_schema(),
        vec![dense(&[100.0])],
        Duration::from_millis(50),
    );

    let report = Combiner::new(source, AggregateOptions::default())
        .with_mode(ExecutionMode::Concurrent { max_in_flight: 4 })
        .run(&ids(&["slow", "postgres", "mongo", "duckdb"]))
        .await
        .unwrap();

    let fetched: Vec<_> = report.fetched().collect();
    let names: Vec<String> = fetched.iter().map(|d| d.dataset.to_string()).collect();
    assert_eq!(names, vec!["slow", "postgres", "mongo", "duckdb"]);
    assert!(fetched[0].elapsed >= Duration::from_millis(50));
    assert!(fetched[1..].iter().all(|d| d.elapsed < fetched[0].elapsed));
    assert_eq!(fetched[0].aggregate.sum, 100.0);

    let combined = report.combined.unwrap();
    assert_eq!(combined.total_rows, 11);
    assert_eq!(combined.total_sum, 224.0);
}

#[tokio::test]
async fn test_concurrent_abort_releases_all_streams() {
    let mut source = three_datasets();
    source.insert_stalled("stalled", sensor_schema());
    source.fail_open("broken", "no such table");

    let combiner = Combiner::new(source, AggregateOptions::default())
        .with_mode(ExecutionMode::Concurrent { max_in_flight: 4 });
    let err = combiner
        .run(&ids(&["stalled", "broken", "postgres"]))
        .await
        .unwrap_err();

    assert_eq!(err.dataset(), Some("broken"));
    assert_eq!(err.stage(), Some(Stage::OpenStream));
    assert_eq!(combiner.source().open_streams(), 0);
}

#[tokio::test]
async fn test_read_timeout_on_stalled_stream() {
    let mut source = MemoryBatchSource::new();
    source.insert_stalled("postgres", sensor_schema());

    let options = AggregateOptions {
        read_timeout: Some(Duration::from_millis(25)),
        ..Default::default()
    };
    let err = aggregate_dataset(&source, &"postgres".into(), &options)
        .await
        .unwrap_err();

    match err {
        Error::Dataset { stage, source: inner, .. } => {
            assert_eq!(stage, Stage::ReadBatch);
            assert!(matches!(*inner, Error::Timeout(_)));
        }
        other => panic!("Expected Dataset error, got {:?}", other),
    }
    assert_eq!(source.open_streams(), 0);
}

#[tokio::test]
async fn test_stream_timeout_on_stalled_stream() {
    let mut source = MemoryBatchSource::new();
    source.insert_stalled("mongo", sensor_schema());

    let options = AggregateOptions {
        stream_timeout: Some(Duration::from_millis(25)),
        ..Default::default()
    };
    let err = aggregate_dataset(&source, &"mongo".into(), &options)
        .await
        .unwrap_err();

    assert_eq!(err.dataset(), Some("mongo"));
    assert_eq!(source.open_streams(), 0);
}

#[tokio::test]
async fn test_stream_timeout_while_opening_names_open_stage() {
    let mut source = MemoryBatchSource::new();
    source.insert_stalled_open("postgres");

    let options = AggregateOptions {
        stream_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let err = aggregate_dataset(&source, &"postgres".into(), &options)
        .await
        .unwrap_err();

    assert_eq!(err.dataset(), Some("postgres"));
    assert_eq!(err.stage(), Some(Stage::OpenStream));
    assert!(err.to_string().contains("stream open not finished within 20ms"));
    assert_eq!(source.opened_total(), 0);
}

#[tokio::test]
async fn test_read_timeout_covers_wait_for_schema() {
    let mut source = MemoryBatchSource::new();
    source.insert_stalled_open("duckdb");

    let options = AggregateOptions {
        read_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let err = aggregate_dataset(&source, &"duckdb".into(), &options)
        .await
        .unwrap_err();

    match err {
        Error::Dataset { stage, source: inner, .. } => {
            assert_eq!(stage, Stage::OpenStream);
            assert!(matches!(*inner, Error::Timeout(_)));
        }
        other => panic!("Expected Dataset error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stream_timeout_after_open_names_read_stage() {
    let mut source = MemoryBatchSource::new();
    source.insert_stalled("mongo", sensor_schema());

    let options = AggregateOptions {
        stream_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let err = aggregate_dataset(&source, &"mongo".into(), &options)
        .await
        .unwrap_err();

    assert_eq!(err.stage(), Some(Stage::ReadBatch));
    assert_eq!(source.open_streams(), 0);
}

#[tokio::test]
async fn test_no_datasets() {
    let combiner = Combiner::new(MemoryBatchSource::new(), AggregateOptions::default());
    assert!(matches!(combiner.run(&[]).await, Err(Error::NoDatasets)));
}
