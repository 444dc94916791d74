mod common;

use std::{cell::Cell, env::temp_dir, time::Duration};

use common::{TestDatabase, read_only_file};
use customer_batch::{
    BatchError,
    core::{
        item::{ItemReader, ItemReaderResult},
        job::{Job, JobBuilder, JobStatus},
        step::{Step, StepBuilder, StepStatus},
    },
    item::{
        csv::csv_writer::FlatFileItemWriterBuilder,
        rdbc::{Cursor, KeysetPageFetcher, PagingQueryProvider},
    },
    pipeline::CustomerExportPipeline,
};
use rand::distr::{Alphanumeric, SampleString};
use sqlx::any::AnyPoolOptions;

struct Countdown {
    next: Cell<i64>,
}

impl ItemReader<i64> for Countdown {
    fn read(&self) -> ItemReaderResult<i64> {
        let next = self.next.get();
        if next == 0 {
            return Ok(None);
        }
        self.next.set(next - 1);
        Ok(Some(next))
    }

    fn position(&self) -> Option<i64> {
        Some(self.next.get())
    }
}

#[test]
fn write_error_should_fail_before_the_first_commit() {
    let reader = Countdown {
        next: Cell::new(5),
    };

    let writer = FlatFileItemWriterBuilder::new().from_writer(read_only_file());

    let step = StepBuilder::new("countdown")
        .chunk::<i64>(3)
        .reader(&reader)
        .writer(&writer)
        .build()
        .unwrap();

    let job = JobBuilder::new().start(&step).build();
    let result = job.run();

    assert!(result.is_err());
    assert!(job.get_status() == JobStatus::Failed);
    assert!(step.get_status() == StepStatus::Error);
    assert!(step.get_read_count() == 3);
    assert!(step.get_write_count() == 0);
    assert!(step.get_commit_count() == 0);
    assert!(matches!(
        result.unwrap_err().root_cause(),
        BatchError::WriteFailure(_)
    ));
}

#[test]
fn unwritable_output_should_fail_without_reading() {
    let db = TestDatabase::new();
    db.insert_customers(5, None);

    let output = temp_dir()
        .join(Alphanumeric.sample_string(&mut rand::rng(), 16))
        .join("customer_output.csv");

    let error = db.pipeline(db.config(&output, 1)).run().unwrap_err();

    match &error {
        BatchError::Step { written, cursor, .. } => {
            assert_eq!(*written, 0);
            assert_eq!(*cursor, None);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(matches!(error.root_cause(), BatchError::WriteFailure(_)));
}

#[test]
fn closed_pool_should_report_source_unavailable() {
    let db = TestDatabase::new();
    db.insert_customers(5, None);
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("customer_output.csv");

    let pipeline = db.pipeline(db.config(&output, 1));
    db.runtime.block_on(db.pool.close());

    let error = pipeline.run().unwrap_err();
    assert!(matches!(
        error.root_cause(),
        BatchError::SourceUnavailable(_)
    ));
}

#[test]
fn fetch_exceeding_its_timeout_should_report_source_unavailable() {
    let db = TestDatabase::new();
    db.insert_customers(5, None);

    let pool = db
        .runtime
        .block_on(AnyPoolOptions::new().max_connections(1).connect(&db.url))
        .unwrap();
    // the only connection stays checked out, so the page query never starts
    let busy = db.runtime.block_on(pool.acquire()).unwrap();

    let fetcher = KeysetPageFetcher::builder()
        .pool(pool.clone())
        .handle(db.runtime.handle().clone())
        .provider(PagingQueryProvider::new(
            "customerNumber",
            "customers",
            "customerNumber",
        ))
        .page_size(10)
        .fetch_timeout(Duration::from_millis(200))
        .build()
        .unwrap();

    let error = fetcher.fetch_page(Cursor::Start).unwrap_err();
    assert!(
        matches!(&error, BatchError::SourceUnavailable(message) if message.contains("timed out")),
        "unexpected error: {error}"
    );

    db.runtime.block_on(async move {
        drop(busy);
        pool.close().await;
    });
}

#[test]
fn partitioned_run_should_fail_fast_on_unavailable_source() {
    let db = TestDatabase::new();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("customer_output.csv");

    let pipeline = db.pipeline(db.config(&output, 3));
    db.runtime.block_on(db.pool.close());

    // the key bounds cannot be read, so no partition is started
    let error = pipeline.run().unwrap_err();
    assert!(matches!(error, BatchError::SourceUnavailable(_)));
    assert!(!dir.path().join("customer_output-partition-0.csv").exists());
}

#[test]
fn chunk_size_different_from_page_size_should_be_rejected() {
    let db = TestDatabase::new();
    let mut config = db.config(&temp_dir().join("customer_output.csv"), 1);
    config.page_size = 5;

    let result = CustomerExportPipeline::new(
        config,
        db.pool.clone(),
        db.runtime.handle().clone(),
    );

    assert!(matches!(result, Err(BatchError::Configuration(_))));
}

#[test]
fn zero_threads_should_be_rejected() {
    let db = TestDatabase::new();
    let config = db.config(&temp_dir().join("customer_output.csv"), 0);

    let result = CustomerExportPipeline::new(
        config,
        db.pool.clone(),
        db.runtime.handle().clone(),
    );

    assert!(matches!(result, Err(BatchError::Configuration(_))));
}
