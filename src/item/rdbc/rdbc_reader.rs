use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
};

use log::debug;
use sqlx::any::AnyRow;

use crate::{
    BatchError,
    core::item::{ItemReader, ItemReaderResult},
};

use super::{Cursor, KeysetPageFetcher, RowMapper};

/// Item reader over a keyset-paginated relational source.
///
/// Rows are fetched one page at a time and mapped lazily, one per `read`.
/// With a page size equal to the step's chunk size, every chunk is exactly one
/// page, so a chunk commit is also a page boundary.
///
/// # Thread Safety
///
/// The reader keeps its state in `Cell`/`RefCell` and is meant to be used by a
/// single step on a single thread. Partitioned steps build one reader per
/// partition.
pub struct RdbcPagingItemReader<'a, T> {
    fetcher: KeysetPageFetcher,
    row_mapper: &'a dyn RowMapper<T>,
    cursor: Cell<Cursor>,
    buffer: RefCell<VecDeque<AnyRow>>,
    exhausted: Cell<bool>,
    /// Rows handed to the mapper so far, used to number malformed rows.
    row_count: Cell<usize>,
    /// Sort key of the last item returned by `read`.
    last_key: Cell<Option<i64>>,
}

impl<T> RdbcPagingItemReader<'_, T> {
    /// Current cursor: the sort key of the last fetched row.
    pub fn cursor(&self) -> Cursor {
        self.cursor.get()
    }

    fn fill_buffer(&self) -> Result<(), BatchError> {
        let page = self.fetcher.fetch_page(self.cursor.get())?;

        if page.is_end() {
            debug!("End of source after cursor {:?}", self.cursor.get());
            self.exhausted.set(true);
            return Ok(());
        }

        // A short page is the last one, no need for another round trip.
        if page.rows.len() < self.fetcher.page_size() {
            self.exhausted.set(true);
        }

        self.cursor.set(page.next_cursor);
        self.buffer.borrow_mut().extend(page.rows);
        Ok(())
    }
}

impl<T> ItemReader<T> for RdbcPagingItemReader<'_, T> {
    fn read(&self) -> ItemReaderResult<T> {
        if self.buffer.borrow().is_empty() {
            if self.exhausted.get() {
                return Ok(None);
            }
            self.fill_buffer()?;
        }

        let Some(row) = self.buffer.borrow_mut().pop_front() else {
            return Ok(None);
        };

        let row_num = self.row_count.get() + 1;
        self.row_count.set(row_num);

        let item = self.row_mapper.map_row(&row, row_num)?;
        self.last_key.set(Some(self.fetcher.sort_key_of(&row)?));

        Ok(Some(item))
    }

    fn position(&self) -> Option<i64> {
        self.last_key.get()
    }
}

/// Builder for [`RdbcPagingItemReader`].
pub struct RdbcPagingItemReaderBuilder<'a, T> {
    fetcher: Option<KeysetPageFetcher>,
    row_mapper: Option<&'a dyn RowMapper<T>>,
    start_after: Option<i64>,
}

impl<T> Default for RdbcPagingItemReaderBuilder<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T> RdbcPagingItemReaderBuilder<'a, T> {
    pub fn new() -> Self {
        Self {
            fetcher: None,
            row_mapper: None,
            start_after: None,
        }
    }

    pub fn fetcher(mut self, fetcher: KeysetPageFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn row_mapper(mut self, row_mapper: &'a dyn RowMapper<T>) -> Self {
        self.row_mapper = Some(row_mapper);
        self
    }

    /// Only rows with a sort key strictly greater than `key` are read.
    pub fn start_after(mut self, key: Option<i64>) -> Self {
        self.start_after = key;
        self
    }

    pub fn build(self) -> Result<RdbcPagingItemReader<'a, T>, BatchError> {
        let fetcher = self
            .fetcher
            .ok_or_else(|| BatchError::Configuration("a page fetcher is required".to_string()))?;
        let row_mapper = self
            .row_mapper
            .ok_or_else(|| BatchError::Configuration("a row mapper is required".to_string()))?;

        Ok(RdbcPagingItemReader {
            buffer: RefCell::new(VecDeque::with_capacity(fetcher.page_size())),
            fetcher,
            row_mapper,
            cursor: Cell::new(Cursor::from_lower_bound(self.start_after)),
            exhausted: Cell::new(false),
            row_count: Cell::new(0),
            last_key: Cell::new(None),
        })
    }
}
