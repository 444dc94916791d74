use std::{
    cell::Cell,
    time::{Duration, Instant},
};

use log::{error, info};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    step::{Step, StepExecution},
};

/// Type alias for job execution results.
///
/// A `JobResult` is a `Result` that contains either:
/// - A successful `JobExecution` with execution details
/// - The `BatchError` of the first failing step
pub type JobResult<T> = Result<T, BatchError>;

/// Lifecycle of a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

/// Represents a job that can be executed.
///
/// A job is a container for a sequence of steps that are executed in order.
/// It succeeds only when every step succeeds; otherwise the error of the
/// first failing step is returned and the remaining steps are not run.
pub trait Job {
    /// Runs the job and returns the result of the job execution.
    ///
    /// # Returns
    /// - `Ok(JobExecution)` when every step completed
    /// - `Err(BatchError)` with the first failing step's error
    fn run(&self) -> JobResult<JobExecution>;
}

/// Represents the execution of a job.
#[derive(Debug)]
pub struct JobExecution {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    /// The time when the job started executing
    pub start: Instant,
    /// The time when the job finished executing
    pub end: Instant,
    /// The total duration of the job execution
    pub duration: Duration,
    /// Executions of every step, in run order
    pub steps: Vec<StepExecution>,
}

impl JobExecution {
    /// Total number of items written across all steps.
    pub fn write_count(&self) -> usize {
        self.steps.iter().map(|step| step.write_count).sum()
    }

    pub fn read_count(&self) -> usize {
        self.steps.iter().map(|step| step.read_count).sum()
    }

    pub fn commit_count(&self) -> usize {
        self.steps.iter().map(|step| step.commit_count).sum()
    }
}

/// Represents an instance of a job.
///
/// A job instance is created through the `JobBuilder` and executed by calling
/// the `run` method. The steps are executed in the order they were added.
pub struct JobInstance<'a> {
    /// Unique identifier for this job instance
    id: Uuid,
    /// Human-readable name for the job
    name: String,
    /// Collection of steps that make up this job, in execution order
    steps: Vec<&'a dyn Step>,
    status: Cell<JobStatus>,
}

impl JobInstance<'_> {
    pub fn get_id(&self) -> Uuid {
        self.id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_status(&self) -> JobStatus {
        self.status.get()
    }
}

impl Job for JobInstance<'_> {
    fn run(&self) -> JobResult<JobExecution> {
        let start = Instant::now();
        self.status.set(JobStatus::Running);

        info!("Start of job: {}, id: {}", self.name, self.id);

        let mut executions = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match step.execute() {
                Ok(execution) => executions.push(execution),
                Err(err) => {
                    self.status.set(JobStatus::Failed);
                    error!(
                        "Job {} failed in step {}: {}",
                        self.name,
                        step.get_name(),
                        err
                    );
                    return Err(err);
                }
            }
        }

        self.status.set(JobStatus::Completed);
        info!("End of job: {}, id: {}", self.name, self.id);

        Ok(JobExecution {
            id: self.id,
            name: self.name.clone(),
            status: JobStatus::Completed,
            start,
            end: Instant::now(),
            duration: start.elapsed(),
            steps: executions,
        })
    }
}

/// Builder for creating a job instance.
///
/// ```rust,no_run,compile_fail
/// use customer_batch::core::job::JobBuilder;
///
/// let job = JobBuilder::new()
///     .name("export-customers".to_string())
///     .start(&export_step)
///     .build();
/// ```
#[derive(Default)]
pub struct JobBuilder<'a> {
    /// Optional name for the job (generated randomly if not specified)
    name: Option<String>,
    /// Collection of steps to be executed, in order
    steps: Vec<&'a dyn Step>,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            steps: Vec::new(),
        }
    }

    pub fn name(mut self, name: String) -> JobBuilder<'a> {
        self.name = Some(name);
        self
    }

    /// Sets the first step of the job.
    ///
    /// This method is semantically identical to `next()` but provides better readability
    /// when constructing the initial step of a job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Adds a step to the job. Steps are executed in the order they are added.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    /// Builds the `JobInstance`. If no name has been provided, a random name is generated.
    pub fn build(self) -> JobInstance<'a> {
        JobInstance {
            id: Uuid::new_v4(),
            name: self.name.unwrap_or_else(build_name),
            steps: self.steps,
            status: Cell::new(JobStatus::NotStarted),
        }
    }
}
