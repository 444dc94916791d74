use std::{
    cell::Cell,
    time::{Duration, Instant},
};

use log::{debug, error, info};

use crate::BatchError;

use super::{
    build_name,
    chunk::Chunk,
    item::{ItemReader, ItemWriter},
};

/// Lifecycle of a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Built but not executed yet.
    Starting,
    /// Chunks are being read and written.
    Started,
    Success,
    Error,
}

/// Outcome of reading one chunk.
#[derive(Debug, PartialEq)]
enum ChunkStatus {
    /// The chunk reached its size, more items may follow.
    Full,
    /// The reader is exhausted; the chunk may be partially filled or empty.
    Finished,
}

/// Summary of a successful step execution.
#[derive(Debug, Clone)]
pub struct StepExecution {
    pub name: String,
    pub status: StepStatus,
    pub start: Instant,
    pub end: Instant,
    pub duration: Duration,
    pub read_count: usize,
    pub write_count: usize,
    pub commit_count: usize,
    /// Sort key of the last committed item, when the reader reports one.
    pub last_committed: Option<i64>,
}

pub type StepResult = Result<StepExecution, BatchError>;

/// A single phase of a job.
pub trait Step {
    /// Runs the step to completion or to its first fatal error.
    fn execute(&self) -> StepResult;

    fn get_name(&self) -> &str;

    fn get_status(&self) -> StepStatus;
}

/// Step that moves items from a reader to a writer in fixed-size chunks.
///
/// Each iteration fills one [`Chunk`], writes it, flushes the writer and then
/// commits. Items of a chunk that fails before its commit are never written,
/// while chunks committed earlier stay in the output. The writer is closed on
/// every exit path.
pub struct ChunkOrientedStep<'a, T> {
    name: String,
    reader: &'a dyn ItemReader<T>,
    writer: &'a dyn ItemWriter<T>,
    chunk_size: usize,
    partition: Option<usize>,
    status: Cell<StepStatus>,
    read_count: Cell<usize>,
    write_count: Cell<usize>,
    commit_count: Cell<usize>,
    last_committed: Cell<Option<i64>>,
}

impl<T> Step for ChunkOrientedStep<'_, T> {
    fn execute(&self) -> StepResult {
        let start = Instant::now();

        info!("Start of step: {}", self.name);
        self.status.set(StepStatus::Started);

        let outcome = self.process_chunks();
        // The writer is closed even when a chunk failed, the first error wins.
        let closed = self.writer.close();
        let outcome = outcome.and(closed);

        match outcome {
            Ok(()) => {
                self.status.set(StepStatus::Success);
                info!(
                    "End of step: {}, read: {}, written: {}, commits: {}",
                    self.name,
                    self.read_count.get(),
                    self.write_count.get(),
                    self.commit_count.get()
                );

                Ok(StepExecution {
                    name: self.name.clone(),
                    status: StepStatus::Success,
                    start,
                    end: Instant::now(),
                    duration: start.elapsed(),
                    read_count: self.read_count.get(),
                    write_count: self.write_count.get(),
                    commit_count: self.commit_count.get(),
                    last_committed: self.last_committed.get(),
                })
            }
            Err(err) => {
                self.status.set(StepStatus::Error);
                error!("Step {} failed: {}", self.name, err);

                Err(BatchError::Step {
                    step: self.name.clone(),
                    partition: self.partition,
                    cursor: self.last_committed.get(),
                    written: self.write_count.get(),
                    source: Box::new(err),
                })
            }
        }
    }

    fn get_name(&self) -> &str {
        &self.name
    }

    fn get_status(&self) -> StepStatus {
        self.status.get()
    }
}

impl<T> ChunkOrientedStep<'_, T> {
    pub fn get_read_count(&self) -> usize {
        self.read_count.get()
    }

    pub fn get_write_count(&self) -> usize {
        self.write_count.get()
    }

    pub fn get_commit_count(&self) -> usize {
        self.commit_count.get()
    }

    pub fn get_last_committed(&self) -> Option<i64> {
        self.last_committed.get()
    }

    fn process_chunks(&self) -> Result<(), BatchError> {
        self.writer.open()?;

        let mut chunk = Chunk::new(self.chunk_size);

        loop {
            let status = self.read_chunk(&mut chunk)?;

            if !chunk.is_empty() {
                let items = chunk.drain();
                self.write_chunk(&items)?;
                self.commit(items.len());
            }

            if status == ChunkStatus::Finished {
                return Ok(());
            }
        }
    }

    fn read_chunk(&self, chunk: &mut Chunk<T>) -> Result<ChunkStatus, BatchError> {
        debug!("Start reading chunk");

        while !chunk.is_full() {
            match self.reader.read()? {
                Some(item) => {
                    let accepted = chunk.add(item).is_ok();
                    debug_assert!(accepted, "chunk overflow");
                    self.read_count.set(self.read_count.get() + 1);
                }
                None => {
                    debug!("End reading chunk: FINISHED");
                    return Ok(ChunkStatus::Finished);
                }
            }
        }

        debug!("End reading chunk: FULL");
        Ok(ChunkStatus::Full)
    }

    fn write_chunk(&self, items: &[T]) -> Result<(), BatchError> {
        debug!("Start writing chunk of {} item(s)", items.len());
        self.writer.write(items)?;
        self.writer.flush()?;
        debug!("End writing chunk");
        Ok(())
    }

    /// Marks the chunk that was just flushed as durably written.
    fn commit(&self, written: usize) {
        self.write_count.set(self.write_count.get() + written);
        self.commit_count.set(self.commit_count.get() + 1);
        self.last_committed.set(self.reader.position());
        debug!(
            "Commit #{} of step {}: {} item(s), cursor {:?}",
            self.commit_count.get(),
            self.name,
            written,
            self.last_committed.get()
        );
    }
}

/// Entry point for building steps.
///
/// ```
/// # use customer_batch::core::step::StepBuilder;
/// # use customer_batch::core::item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult};
/// # struct Empty;
/// # impl ItemReader<u32> for Empty { fn read(&self) -> ItemReaderResult<u32> { Ok(None) } }
/// # struct Discard;
/// # impl ItemWriter<u32> for Discard { fn write(&self, _: &[u32]) -> ItemWriterResult { Ok(()) } }
/// let (reader, writer) = (Empty, Discard);
/// let step = StepBuilder::new("export")
///     .chunk::<u32>(10)
///     .reader(&reader)
///     .writer(&writer)
///     .build()
///     .unwrap();
/// ```
pub struct StepBuilder {
    name: Option<String>,
}

impl StepBuilder {
    pub fn new(name: impl Into<String>) -> StepBuilder {
        StepBuilder {
            name: Some(name.into()),
        }
    }

    /// A builder whose step gets a random name.
    pub fn unnamed() -> StepBuilder {
        StepBuilder { name: None }
    }

    /// Switches to a chunk-oriented step committing every `chunk_size` items.
    pub fn chunk<'a, T>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, T> {
        ChunkOrientedStepBuilder {
            name: self.name,
            reader: None,
            writer: None,
            chunk_size,
            partition: None,
        }
    }
}

pub struct ChunkOrientedStepBuilder<'a, T> {
    name: Option<String>,
    reader: Option<&'a dyn ItemReader<T>>,
    writer: Option<&'a dyn ItemWriter<T>>,
    chunk_size: usize,
    partition: Option<usize>,
}

impl<'a, T> ChunkOrientedStepBuilder<'a, T> {
    pub fn reader(mut self, reader: &'a dyn ItemReader<T>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<T>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Tags the step as the worker of a partition, reported in its errors.
    pub fn partition(mut self, partition: usize) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn build(self) -> Result<ChunkOrientedStep<'a, T>, BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        let reader = self
            .reader
            .ok_or_else(|| BatchError::Configuration("a step needs a reader".to_string()))?;
        let writer = self
            .writer
            .ok_or_else(|| BatchError::Configuration("a step needs a writer".to_string()))?;

        Ok(ChunkOrientedStep {
            name: self.name.unwrap_or_else(build_name),
            reader,
            writer,
            chunk_size: self.chunk_size,
            partition: self.partition,
            status: Cell::new(StepStatus::Starting),
            read_count: Cell::new(0),
            write_count: Cell::new(0),
            commit_count: Cell::new(0),
            last_committed: Cell::new(None),
        })
    }
}
