use std::{
    cell::RefCell,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
};

use csv::{Writer, WriterBuilder};
use log::debug;
use serde::Serialize;

use crate::{
    BatchError,
    core::item::{ItemWriter, ItemWriterResult},
};

type Opener<W> = Box<dyn FnOnce() -> io::Result<W>>;

/// Forces flushed bytes down to the storage device.
type DataSync<W> = fn(&W) -> io::Result<()>;

enum Sink<W: Write> {
    /// Destination not created yet.
    Pending(Opener<W>),
    Open(Writer<W>),
    Closed,
}

/// Writes items as delimited lines to a flat file.
///
/// The destination is created by [`ItemWriter::open`], which also writes the
/// header line, once. Every chunk is appended in order and flushed by
/// [`ItemWriter::flush`], which also syncs file data to disk. The underlying
/// handle is released by [`ItemWriter::close`], or when the writer is
/// dropped, whichever comes first.
///
/// Fields are taken from the item's `Serialize` implementation, in declaration
/// order; the header columns must follow the same order. Every I/O error is
/// reported as [`BatchError::WriteFailure`].
pub struct FlatFileItemWriter<W: Write> {
    sink: RefCell<Sink<W>>,
    sync: Option<DataSync<W>>,
    header: Option<Vec<String>>,
    delimiter: u8,
    destination: String,
}

impl<W: Write> FlatFileItemWriter<W> {
    /// Where the lines go, for log and error messages.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Flushes and returns the underlying writer of an open writer.
    pub fn into_inner(self) -> Result<W, BatchError> {
        match self.sink.into_inner() {
            Sink::Open(wtr) => wtr
                .into_inner()
                .map_err(|error| BatchError::WriteFailure(error.to_string())),
            _ => Err(BatchError::WriteFailure(format!(
                "{} is not open",
                self.destination
            ))),
        }
    }

    fn failure(&self, error: impl std::fmt::Display) -> BatchError {
        BatchError::WriteFailure(format!("{}: {}", self.destination, error))
    }
}

impl<W: Write, T: Serialize> ItemWriter<T> for FlatFileItemWriter<W> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        let mut sink = self.sink.borrow_mut();
        let Sink::Open(wtr) = &mut *sink else {
            return Err(self.failure("writer is not open"));
        };

        for item in items {
            wtr.serialize(item).map_err(|error| self.failure(error))?;
        }
        Ok(())
    }

    /// Flush the contents of the internal buffer to the underlying writer.
    ///
    /// Note that this also flushes the underlying writer, and syncs it when it
    /// is a file.
    fn flush(&self) -> ItemWriterResult {
        let mut sink = self.sink.borrow_mut();
        let Sink::Open(wtr) = &mut *sink else {
            return Err(self.failure("writer is not open"));
        };

        wtr.flush().map_err(|error| self.failure(error))?;
        if let Some(sync) = self.sync {
            sync(wtr.get_ref()).map_err(|error| self.failure(error))?;
        }
        Ok(())
    }

    /// Creates the destination and writes the header line.
    fn open(&self) -> ItemWriterResult {
        let mut sink = self.sink.borrow_mut();
        let opener = match std::mem::replace(&mut *sink, Sink::Closed) {
            Sink::Pending(opener) => opener,
            Sink::Open(wtr) => {
                *sink = Sink::Open(wtr);
                return Ok(());
            }
            Sink::Closed => return Err(self.failure("writer was already closed")),
        };

        let target = opener().map_err(|error| self.failure(error))?;
        let mut wtr = WriterBuilder::new()
            .flexible(false)
            .has_headers(false)
            .delimiter(self.delimiter)
            .from_writer(target);

        if let Some(header) = &self.header {
            wtr.write_record(header)
                .map_err(|error| self.failure(error))?;
            wtr.flush().map_err(|error| self.failure(error))?;
        }

        debug!("Opened {}", self.destination);
        *sink = Sink::Open(wtr);
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        let previous = std::mem::replace(&mut *self.sink.borrow_mut(), Sink::Closed);
        match previous {
            Sink::Open(wtr) => {
                // into_inner flushes; dropping the returned handle closes it.
                wtr.into_inner()
                    .map(drop)
                    .map_err(|error| self.failure(error.error()))?;
                debug!("Closed {}", self.destination);
                Ok(())
            }
            Sink::Pending(_) | Sink::Closed => Ok(()),
        }
    }
}

/// Builder for [`FlatFileItemWriter`].
///
/// ```
/// use customer_batch::core::item::ItemWriter;
/// use customer_batch::item::csv::csv_writer::FlatFileItemWriterBuilder;
///
/// #[derive(serde::Serialize)]
/// struct Row<'a> {
///     city: &'a str,
///     country: &'a str,
/// }
///
/// let writer = FlatFileItemWriterBuilder::new()
///     .header(&["city", "country"])
///     .from_writer(vec![]);
///
/// ItemWriter::<Row>::open(&writer).unwrap();
/// writer
///     .write(&[Row { city: "Nantes", country: "France" }])
///     .unwrap();
///
/// let data = String::from_utf8(writer.into_inner().unwrap()).unwrap();
/// assert_eq!(data, "city,country\nNantes,France\n");
/// ```
pub struct FlatFileItemWriterBuilder {
    delimiter: u8,
    header: Option<Vec<String>>,
}

impl Default for FlatFileItemWriterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatFileItemWriterBuilder {
    pub fn new() -> FlatFileItemWriterBuilder {
        FlatFileItemWriterBuilder {
            delimiter: b',',
            header: None,
        }
    }

    pub fn delimiter(mut self, delimiter: u8) -> FlatFileItemWriterBuilder {
        self.delimiter = delimiter;
        self
    }

    /// Column names written once, as the first line, when the writer is opened.
    pub fn header<S: AsRef<str>>(mut self, columns: &[S]) -> FlatFileItemWriterBuilder {
        self.header = Some(columns.iter().map(|c| c.as_ref().to_string()).collect());
        self
    }

    /// The file is created, or truncated, when the writer is opened.
    pub fn from_path<P: AsRef<Path>>(self, path: P) -> FlatFileItemWriter<File> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let destination = path.display().to_string();
        self.build(
            Box::new(move || File::create(path)),
            Some(File::sync_data),
            destination,
        )
    }

    pub fn from_writer<W: Write + 'static>(self, wtr: W) -> FlatFileItemWriter<W> {
        self.build(Box::new(move || Ok(wtr)), None, "<writer>".to_string())
    }

    fn build<W: Write>(
        self,
        opener: Opener<W>,
        sync: Option<DataSync<W>>,
        destination: String,
    ) -> FlatFileItemWriter<W> {
        FlatFileItemWriter {
            sink: RefCell::new(Sink::Pending(opener)),
            sync,
            header: self.header,
            delimiter: self.delimiter,
            destination,
        }
    }
}
