use thiserror::Error;

#[derive(Error, Debug)]
/// Batch error
pub enum BatchError {
    /// The relational source could not be queried (connection, query or timeout).
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// A fetched row could not be mapped into an item.
    #[error("Malformed row {row}: {message}")]
    MalformedRow { row: usize, message: String },

    /// The output sink rejected a write, flush or open.
    #[error("Write failure: {0}")]
    WriteFailure(String),

    /// Settings rejected before any connection or file is opened.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A partition worker thread panicked instead of returning a result.
    #[error("Partition {0} worker panicked")]
    PartitionPanicked(usize),

    /// A step stopped on one of the errors above.
    ///
    /// `cursor` is the sort key of the last committed item and `written` the
    /// number of items durably written before the failure, which is what an
    /// operator needs to resume by hand.
    #[error(
        "Step {step} failed{} after {written} written item(s), last committed cursor {}: {source}",
        partition_label(.partition),
        cursor_label(.cursor)
    )]
    Step {
        step: String,
        partition: Option<usize>,
        cursor: Option<i64>,
        written: usize,
        source: Box<BatchError>,
    },
}

impl BatchError {
    /// Returns the innermost error, looking through step wrappers.
    pub fn root_cause(&self) -> &BatchError {
        match self {
            BatchError::Step { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

fn partition_label(partition: &Option<usize>) -> String {
    match partition {
        Some(id) => format!(" in partition {}", id),
        None => String::new(),
    }
}

fn cursor_label(cursor: &Option<i64>) -> String {
    match cursor {
        Some(key) => key.to_string(),
        None => "<none>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::BatchError;

    #[test]
    fn step_error_should_carry_resume_context() {
        let error = BatchError::Step {
            step: "export".to_string(),
            partition: Some(2),
            cursor: Some(110),
            written: 10,
            source: Box::new(BatchError::MalformedRow {
                row: 15,
                message: "column creditLimit: \"abc\" is not numeric".to_string(),
            }),
        };

        assert_eq!(
            error.to_string(),
            "Step export failed in partition 2 after 10 written item(s), last committed cursor 110: Malformed row 15: column creditLimit: \"abc\" is not numeric"
        );
        assert!(matches!(
            error.root_cause(),
            BatchError::MalformedRow { row: 15, .. }
        ));
    }

    #[test]
    fn step_error_without_commit_should_say_so() {
        let error = BatchError::Step {
            step: "export".to_string(),
            partition: None,
            cursor: None,
            written: 0,
            source: Box::new(BatchError::WriteFailure("permission denied".to_string())),
        };

        assert_eq!(
            error.to_string(),
            "Step export failed after 0 written item(s), last committed cursor <none>: Write failure: permission denied"
        );
    }

    #[test]
    fn configuration_and_panic_errors_should_be_their_own_root_cause() {
        let configuration =
            BatchError::Configuration("thread count must be greater than zero".to_string());
        assert_eq!(
            configuration.to_string(),
            "Invalid configuration: thread count must be greater than zero"
        );
        assert!(matches!(
            configuration.root_cause(),
            BatchError::Configuration(_)
        ));

        let panicked = BatchError::PartitionPanicked(3);
        assert_eq!(panicked.to_string(), "Partition 3 worker panicked");
        assert!(matches!(panicked.root_cause(), BatchError::PartitionPanicked(3)));
    }
}
