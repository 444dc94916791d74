use std::{
    cell::{Cell, RefCell},
    thread,
    time::Instant,
};

use log::{debug, info, warn};

use crate::BatchError;

use super::{
    build_name,
    step::{Step, StepExecution, StepResult, StepStatus},
};

/// A disjoint slice of the source key space, handled by one worker thread.
///
/// Keys in `(lower, upper]` belong to the partition; a missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub id: usize,
    /// Exclusive lower bound.
    pub lower: Option<i64>,
    /// Inclusive upper bound.
    pub upper: Option<i64>,
}

impl Partition {
    /// A single partition covering every key.
    pub fn whole() -> Partition {
        Partition {
            id: 0,
            lower: None,
            upper: None,
        }
    }

    pub fn contains(&self, key: i64) -> bool {
        self.lower.is_none_or(|lower| key > lower) && self.upper.is_none_or(|upper| key <= upper)
    }
}

/// Splits the source key space into partitions.
///
/// Implementations must return ranges that are pairwise disjoint and together
/// cover the whole key space.
pub trait Partitioner {
    fn partition(&self, grid_size: usize) -> Result<Vec<Partition>, BatchError>;
}

/// Cuts `[min, max]` into contiguous ranges whose widths differ by at most one.
///
/// The first partition is open below and the last one open above, so keys
/// outside the observed bounds are still covered exactly once.
#[derive(Debug, Clone, Copy)]
pub struct RangePartitioner {
    bounds: Option<(i64, i64)>,
}

impl RangePartitioner {
    pub fn new(min: i64, max: i64) -> RangePartitioner {
        RangePartitioner {
            bounds: Some((min.min(max), min.max(max))),
        }
    }

    /// `None` means an empty source, which yields a single open partition.
    pub fn from_bounds(bounds: Option<(i64, i64)>) -> RangePartitioner {
        match bounds {
            Some((min, max)) => RangePartitioner::new(min, max),
            None => RangePartitioner { bounds: None },
        }
    }
}

impl Partitioner for RangePartitioner {
    fn partition(&self, grid_size: usize) -> Result<Vec<Partition>, BatchError> {
        if grid_size == 0 {
            return Err(BatchError::Configuration(
                "grid size must be greater than zero".to_string(),
            ));
        }

        let Some((min, max)) = self.bounds else {
            return Ok(vec![Partition::whole()]);
        };

        // i128 keeps `max - min + 1` and `index * span` exact over the whole
        // i64 range.
        let span = i128::from(max) - i128::from(min) + 1;
        let grid = span.min(grid_size as i128);
        // For 0 < index < grid the boundary lies in [min, max - 1], so the
        // cast is lossless and every partition owns at least one key.
        let boundary = |index: i128| (i128::from(min) - 1 + index * span / grid) as i64;

        let partitions: Vec<Partition> = (0..grid)
            .map(|index| Partition {
                id: index as usize,
                lower: (index > 0).then(|| boundary(index)),
                upper: (index < grid - 1).then(|| boundary(index + 1)),
            })
            .collect();

        debug!(
            "Created {} partition(s) for keys [{}, {}]",
            partitions.len(),
            min,
            max
        );
        Ok(partitions)
    }
}

/// Work done for one partition, typically building and executing a
/// chunk-oriented step over the partition's key range.
pub type PartitionWorker<'a> = dyn Fn(&Partition) -> StepResult + Sync + 'a;

/// Step that runs one worker per partition on its own OS thread.
///
/// Workers share no mutable state: each one builds its own reader and writer.
/// A failing partition does not stop its siblings; once all of them have
/// finished, the step fails with the error of the lowest failing partition.
pub struct PartitionStep<'a> {
    name: String,
    partitioner: &'a dyn Partitioner,
    grid_size: usize,
    worker: &'a PartitionWorker<'a>,
    status: Cell<StepStatus>,
    read_count: Cell<usize>,
    write_count: Cell<usize>,
    commit_count: Cell<usize>,
    failed_partitions: RefCell<Vec<usize>>,
}

impl Step for PartitionStep<'_> {
    fn execute(&self) -> StepResult {
        let start = Instant::now();
        self.status.set(StepStatus::Started);

        let partitions = match self.partitioner.partition(self.grid_size) {
            Ok(partitions) => partitions,
            Err(err) => {
                self.status.set(StepStatus::Error);
                return Err(err);
            }
        };

        info!(
            "Start of partitioned step: {}, {} partition(s)",
            self.name,
            partitions.len()
        );

        let outcomes = self.run_workers(&partitions);

        let mut first_error = None;
        for (partition, outcome) in partitions.iter().zip(outcomes) {
            match outcome {
                Ok(execution) => {
                    info!(
                        "Partition {} completed: {} item(s) written in {} commit(s)",
                        partition.id, execution.write_count, execution.commit_count
                    );
                    self.read_count
                        .set(self.read_count.get() + execution.read_count);
                    self.write_count
                        .set(self.write_count.get() + execution.write_count);
                    self.commit_count
                        .set(self.commit_count.get() + execution.commit_count);
                }
                Err(err) => {
                    warn!("Partition {} failed: {}", partition.id, err);
                    if let BatchError::Step { written, .. } = &err {
                        self.write_count.set(self.write_count.get() + written);
                    }
                    self.failed_partitions.borrow_mut().push(partition.id);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            self.status.set(StepStatus::Error);
            return Err(err);
        }

        self.status.set(StepStatus::Success);
        info!(
            "End of partitioned step: {}, written: {}",
            self.name,
            self.write_count.get()
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
            last_committed: None,
        })
    }

    fn get_name(&self) -> &str {
        &self.name
    }

    fn get_status(&self) -> StepStatus {
        self.status.get()
    }
}

impl PartitionStep<'_> {
    pub fn get_read_count(&self) -> usize {
        self.read_count.get()
    }

    /// Items durably written by all partitions, failed ones included.
    pub fn get_write_count(&self) -> usize {
        self.write_count.get()
    }

    pub fn get_commit_count(&self) -> usize {
        self.commit_count.get()
    }

    pub fn get_failed_partitions(&self) -> Vec<usize> {
        self.failed_partitions.borrow().clone()
    }

    fn run_workers(&self, partitions: &[Partition]) -> Vec<StepResult> {
        let worker = self.worker;

        thread::scope(|scope| {
            let handles: Vec<_> = partitions
                .iter()
                .map(|partition| {
                    let spawned = thread::Builder::new()
                        .name(format!("{}-{}", self.name, partition.id))
                        .spawn_scoped(scope, move || worker(partition));
                    (partition.id, spawned)
                })
                .collect();

            handles
                .into_iter()
                .map(|(id, spawned)| match spawned {
                    Ok(handle) => handle
                        .join()
                        .unwrap_or_else(|_| Err(BatchError::PartitionPanicked(id))),
                    Err(err) => Err(BatchError::Configuration(format!(
                        "cannot spawn worker for partition {}: {}",
                        id, err
                    ))),
                })
                .collect()
        })
    }
}

pub struct PartitionStepBuilder<'a> {
    name: Option<String>,
    partitioner: Option<&'a dyn Partitioner>,
    grid_size: usize,
    worker: Option<&'a PartitionWorker<'a>>,
}

impl<'a> PartitionStepBuilder<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            partitioner: None,
            grid_size: 1,
            worker: None,
        }
    }

    pub fn partitioner(mut self, partitioner: &'a dyn Partitioner) -> Self {
        self.partitioner = Some(partitioner);
        self
    }

    /// Number of partitions, and therefore of worker threads.
    pub fn grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    pub fn worker(mut self, worker: &'a PartitionWorker<'a>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn build(self) -> Result<PartitionStep<'a>, BatchError> {
        if self.grid_size == 0 {
            return Err(BatchError::Configuration(
                "grid size must be greater than zero".to_string(),
            ));
        }
        let partitioner = self.partitioner.ok_or_else(|| {
            BatchError::Configuration("a partitioned step needs a partitioner".to_string())
        })?;
        let worker = self.worker.ok_or_else(|| {
            BatchError::Configuration("a partitioned step needs a worker".to_string())
        })?;

        Ok(PartitionStep {
            name: self.name.unwrap_or_else(build_name),
            partitioner,
            grid_size: self.grid_size,
            worker,
            status: Cell::new(StepStatus::Starting),
            read_count: Cell::new(0),
            write_count: Cell::new(0),
            commit_count: Cell::new(0),
            failed_partitions: RefCell::new(Vec::new()),
        })
    }
}
