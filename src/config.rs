use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    BatchError,
    customer::{CUSTOMER_SORT_KEY, CUSTOMER_TABLE, customer_select_clause},
};

pub const DEFAULT_JOB_NAME: &str = "chunkOrientedWritingOnFlatFileJob";
pub const DEFAULT_STEP_NAME: &str = "chunkBasedWritingOnFlatFileStep";
pub const DEFAULT_OUTPUT_PATH: &str = "customer_output.csv";
pub const DEFAULT_CHUNK_SIZE: usize = 10;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Settings of a customer export run.
///
/// Can be read from JSON; missing keys take their defaults.
///
/// ```
/// use customer_batch::config::BatchConfig;
///
/// let config: BatchConfig = serde_json::from_str(
///     r#"{ "database_url": "sqlite://customers.db", "thread_count": 4 }"#,
/// )
/// .unwrap();
///
/// assert_eq!(config.chunk_size, 10);
/// assert_eq!(config.page_size, 10);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    pub database_url: String,
    /// Maximum number of pooled connections; defaults to one per thread.
    pub max_connections: Option<u32>,
    /// Source table, optionally schema-qualified.
    pub table: String,
    pub sort_key: String,
    /// Select list of the page queries, used verbatim. Defaults to the
    /// customer columns as the backend of `database_url` can decode them.
    pub select_clause: Option<String>,
    /// Extra filter on the source rows.
    pub where_clause: Option<String>,
    pub output_path: PathBuf,
    pub delimiter: char,
    /// Items per commit.
    pub chunk_size: usize,
    /// Rows per query. Must equal `chunk_size`.
    pub page_size: usize,
    /// Worker threads, one key-range partition each.
    pub thread_count: usize,
    pub fetch_timeout_secs: u64,
    pub job_name: String,
    pub step_name: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: None,
            table: CUSTOMER_TABLE.to_string(),
            sort_key: CUSTOMER_SORT_KEY.to_string(),
            select_clause: None,
            where_clause: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            delimiter: ',',
            chunk_size: DEFAULT_CHUNK_SIZE,
            page_size: DEFAULT_CHUNK_SIZE,
            thread_count: 1,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            job_name: DEFAULT_JOB_NAME.to_string(),
            step_name: DEFAULT_STEP_NAME.to_string(),
        }
    }
}

impl BatchConfig {
    /// Reads a JSON configuration file.
    pub fn from_json_file(path: &Path) -> Result<BatchConfig, BatchError> {
        let content = fs::read_to_string(path).map_err(|err| {
            BatchError::Configuration(format!("cannot read {}: {}", path.display(), err))
        })?;
        serde_json::from_str(&content).map_err(|err| {
            BatchError::Configuration(format!("invalid {}: {}", path.display(), err))
        })
    }

    /// Checks the settings before anything is opened or queried.
    pub fn validate(&self) -> Result<(), BatchError> {
        let invalid = |message: String| Err(BatchError::Configuration(message));

        if self.database_url.trim().is_empty() {
            return invalid("a database url is required".to_string());
        }
        if self.chunk_size == 0 {
            return invalid("chunk size must be greater than zero".to_string());
        }
        if self.page_size != self.chunk_size {
            return invalid(format!(
                "page size ({}) must be equal to chunk size ({})",
                self.page_size, self.chunk_size
            ));
        }
        if self.thread_count == 0 {
            return invalid("thread count must be greater than zero".to_string());
        }
        if self.fetch_timeout_secs == 0 {
            return invalid("fetch timeout must be greater than zero".to_string());
        }
        if self.max_connections == Some(0) {
            return invalid("max connections must be greater than zero".to_string());
        }
        if !self.delimiter.is_ascii() {
            return invalid(format!("delimiter {:?} is not an ASCII character", self.delimiter));
        }
        if self.table.trim().is_empty() || self.sort_key.trim().is_empty() {
            return invalid("table and sort key must not be empty".to_string());
        }
        if self
            .select_clause
            .as_ref()
            .is_some_and(|select| select.trim().is_empty())
        {
            return invalid("select clause must not be empty".to_string());
        }
        Ok(())
    }

    pub fn select_list(&self) -> String {
        self.select_clause
            .clone()
            .unwrap_or_else(|| customer_select_clause(&self.database_url))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn delimiter_byte(&self) -> u8 {
        // validate() only lets ASCII through
        self.delimiter as u8
    }

    pub fn connections(&self) -> u32 {
        self.max_connections
            .unwrap_or_else(|| u32::try_from(self.thread_count).unwrap_or(u32::MAX))
    }

    /// Output file of a partition: `<stem>-partition-<id>.<ext>` next to
    /// `output_path`, or `output_path` itself for a single-thread run.
    pub fn output_path_for(&self, partition: usize) -> PathBuf {
        if self.thread_count <= 1 {
            return self.output_path.clone();
        }

        let stem = self
            .output_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string());
        let file_name = match self.output_path.extension() {
            Some(ext) => format!("{}-partition-{}.{}", stem, partition, ext.to_string_lossy()),
            None => format!("{}-partition-{}", stem, partition),
        };
        self.output_path.with_file_name(file_name)
    }
}
