use std::{fs::File, path::Path};

use log::info;
use sqlx::{AnyPool, any::AnyPoolOptions};
use tokio::runtime::Handle;

use crate::{
    BatchError,
    config::BatchConfig,
    core::{
        job::{Job, JobBuilder, JobExecution},
        partition::{Partition, PartitionStepBuilder, RangePartitioner},
        step::{Step, StepBuilder, StepResult},
    },
    customer::{CUSTOMER_COLUMNS, Customer, CustomerRowMapper},
    item::{
        csv::csv_writer::{FlatFileItemWriter, FlatFileItemWriterBuilder},
        rdbc::{
            KeysetPageFetcher, PagingQueryProvider, RdbcPagingItemReader,
            RdbcPagingItemReaderBuilder,
        },
    },
};

/// Exports the customers table to CSV.
///
/// With one thread the job has a single chunk-oriented step writing
/// `output_path`. With more, the key range is split into `thread_count`
/// partitions, each exported concurrently to its own file by its own step.
///
/// Must not be run from inside an async task of a `current_thread` runtime.
pub struct CustomerExportPipeline {
    config: BatchConfig,
    pool: AnyPool,
    handle: Handle,
    row_mapper: CustomerRowMapper,
}

impl CustomerExportPipeline {
    /// Wraps an existing pool. The configuration is validated first.
    pub fn new(
        config: BatchConfig,
        pool: AnyPool,
        handle: Handle,
    ) -> Result<CustomerExportPipeline, BatchError> {
        config.validate()?;
        Ok(CustomerExportPipeline {
            config,
            pool,
            handle,
            row_mapper: CustomerRowMapper,
        })
    }

    /// Validates the configuration and opens a pool on `database_url`.
    ///
    /// The sqlx drivers must have been installed with
    /// `sqlx::any::install_default_drivers`.
    pub fn connect(
        config: BatchConfig,
        handle: Handle,
    ) -> Result<CustomerExportPipeline, BatchError> {
        config.validate()?;

        let options = AnyPoolOptions::new()
            .max_connections(config.connections())
            .acquire_timeout(config.fetch_timeout());
        let pool = tokio::task::block_in_place(|| {
            handle.block_on(options.connect(&config.database_url))
        })
        .map_err(|err| BatchError::SourceUnavailable(err.to_string()))?;

        CustomerExportPipeline::new(config, pool, handle)
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Runs the export job to completion or to its first failing step.
    pub fn run(&self) -> Result<JobExecution, BatchError> {
        info!(
            "Exporting {} to {} with {} thread(s), chunk size {}",
            self.config.table,
            self.config.output_path.display(),
            self.config.thread_count,
            self.config.chunk_size
        );

        if self.config.thread_count <= 1 {
            self.run_single()
        } else {
            self.run_partitioned()
        }
    }

    fn run_single(&self) -> Result<JobExecution, BatchError> {
        let reader = self.reader(&Partition::whole())?;
        let writer = self.writer(&self.config.output_path);

        let step = StepBuilder::new(self.config.step_name.clone())
            .chunk::<Customer>(self.config.chunk_size)
            .reader(&reader)
            .writer(&writer)
            .build()?;

        self.run_job(&step)
    }

    fn run_partitioned(&self) -> Result<JobExecution, BatchError> {
        let bounds = self.fetcher(None)?.key_bounds()?;
        let partitioner = RangePartitioner::from_bounds(bounds);
        let worker = |partition: &Partition| self.export_partition(partition);

        let step = PartitionStepBuilder::new(self.config.step_name.clone())
            .partitioner(&partitioner)
            .grid_size(self.config.thread_count)
            .worker(&worker)
            .build()?;

        self.run_job(&step)
    }

    fn run_job(&self, step: &dyn Step) -> Result<JobExecution, BatchError> {
        let job = JobBuilder::new()
            .name(self.config.job_name.clone())
            .start(step)
            .build();

        let execution = job.run()?;
        info!(
            "Job {} completed in {:?}: {} customer(s) written in {} commit(s)",
            execution.name,
            execution.duration,
            execution.write_count(),
            execution.commit_count()
        );
        Ok(execution)
    }

    /// Exports the keys of `partition` to the partition's own output file.
    pub fn export_partition(&self, partition: &Partition) -> StepResult {
        let reader = self.reader(partition)?;
        let writer = self.writer(&self.config.output_path_for(partition.id));

        StepBuilder::new(format!("{}-partition-{}", self.config.step_name, partition.id))
            .chunk::<Customer>(self.config.chunk_size)
            .reader(&reader)
            .writer(&writer)
            .partition(partition.id)
            .build()?
            .execute()
    }

    fn reader(
        &self,
        partition: &Partition,
    ) -> Result<RdbcPagingItemReader<'_, Customer>, BatchError> {
        RdbcPagingItemReaderBuilder::new()
            .fetcher(self.fetcher(partition.upper)?)
            .row_mapper(&self.row_mapper)
            .start_after(partition.lower)
            .build()
    }

    fn fetcher(&self, upper_bound: Option<i64>) -> Result<KeysetPageFetcher, BatchError> {
        let select = self.config.select_list();
        let mut provider =
            PagingQueryProvider::new(&select, &self.config.table, &self.config.sort_key);
        if let Some(filter) = &self.config.where_clause {
            provider = provider.with_where_clause(filter);
        }

        KeysetPageFetcher::builder()
            .pool(self.pool.clone())
            .handle(self.handle.clone())
            .provider(provider)
            .page_size(self.config.page_size)
            .upper_bound(upper_bound)
            .fetch_timeout(self.config.fetch_timeout())
            .build()
    }

    fn writer(&self, path: &Path) -> FlatFileItemWriter<File> {
        FlatFileItemWriterBuilder::new()
            .delimiter(self.config.delimiter_byte())
            .header(&CUSTOMER_COLUMNS)
            .from_path(path)
    }
}
