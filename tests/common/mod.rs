#![allow(dead_code)]

pub mod mocks;

pub use mocks::{MockFile, read_only_file};

use std::path::Path;

use customer_batch::{config::BatchConfig, pipeline::CustomerExportPipeline};
use sqlx::{AnyPool, any::AnyPoolOptions};
use tempfile::NamedTempFile;
use tokio::runtime::{Builder, Runtime};

pub const HEADER: &str = "customerNumber,customerName,contactLastName,contactFirstName,phone,addressLine1,addressLine2,city,state,postalCode,country,salesRepEmployeeNumber,creditLimit";

const CREATE_CUSTOMERS: &str = "CREATE TABLE customers (
    customerNumber INTEGER PRIMARY KEY,
    customerName TEXT NOT NULL,
    contactLastName TEXT NOT NULL,
    contactFirstName TEXT NOT NULL,
    phone TEXT NOT NULL,
    addressLine1 TEXT NOT NULL,
    addressLine2 TEXT,
    city TEXT NOT NULL,
    state TEXT,
    postalCode TEXT,
    country TEXT NOT NULL,
    salesRepEmployeeNumber INTEGER,
    creditLimit REAL
)";

/// A customers table in a temporary SQLite file.
///
/// The pool is dropped before the runtime it was created on.
pub struct TestDatabase {
    pub pool: AnyPool,
    pub runtime: Runtime,
    pub url: String,
    _file: NamedTempFile,
}

impl TestDatabase {
    pub fn new() -> TestDatabase {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        sqlx::any::install_default_drivers();
        let file = NamedTempFile::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", file.path().display());

        let pool = runtime
            .block_on(AnyPoolOptions::new().max_connections(4).connect(&url))
            .unwrap();
        runtime
            .block_on(sqlx::query(CREATE_CUSTOMERS).execute(&pool))
            .unwrap();

        TestDatabase {
            pool,
            runtime,
            url,
            _file: file,
        }
    }

    /// Inserts customers `1..=count`, the row at `malformed` with a credit
    /// limit that is not a number.
    pub fn insert_customers(&self, count: usize, malformed: Option<usize>) {
        for index in 1..=count {
            let credit_limit = if Some(index) == malformed {
                "'abc'".to_string()
            } else {
                format!("{:.2}", credit_limit(index))
            };
            let sql = format!(
                "INSERT INTO customers VALUES ({}, 'Customer {i}', 'Last{i}', 'First{i}', '555-{i:04}', \
                 '{i} Main Street', {}, 'Nantes', {}, '440{i:02}', 'France', 1370, {})",
                customer_number(index),
                sql_text(address_line2(index)),
                sql_text(state(index)),
                credit_limit,
                i = index,
            );
            self.runtime
                .block_on(sqlx::query(&sql).execute(&self.pool))
                .unwrap();
        }
    }

    pub fn config(&self, output_path: &Path, thread_count: usize) -> BatchConfig {
        BatchConfig {
            database_url: self.url.clone(),
            output_path: output_path.to_path_buf(),
            thread_count,
            ..BatchConfig::default()
        }
    }

    pub fn pipeline(&self, config: BatchConfig) -> CustomerExportPipeline {
        CustomerExportPipeline::new(config, self.pool.clone(), self.runtime.handle().clone())
            .unwrap()
    }
}

pub fn customer_number(index: usize) -> i64 {
    100 + index as i64
}

fn credit_limit(index: usize) -> f64 {
    index as f64 * 1000.0 + 0.5
}

fn address_line2(index: usize) -> Option<String> {
    (index % 2 == 0).then(|| format!("Suite {}", index))
}

fn state(index: usize) -> Option<String> {
    (index % 3 != 0).then(|| "CA".to_string())
}

fn sql_text(value: Option<String>) -> String {
    value.map_or("NULL".to_string(), |value| format!("'{}'", value))
}

/// CSV line written for customer `index`.
pub fn expected_line(index: usize) -> String {
    format!(
        "{},Customer {i},Last{i},First{i},555-{i:04},{i} Main Street,{},Nantes,{},440{i:02},France,1370,{:.2}",
        customer_number(index),
        address_line2(index).unwrap_or_default(),
        state(index).unwrap_or_default(),
        credit_limit(index),
        i = index,
    )
}

/// Whole file expected for customers `indexes`, header first.
pub fn expected_file(indexes: impl IntoIterator<Item = usize>) -> String {
    let mut content = format!("{}\n", HEADER);
    for index in indexes {
        content.push_str(&expected_line(index));
        content.push('\n');
    }
    content
}
