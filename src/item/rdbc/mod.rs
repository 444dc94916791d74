use sqlx::{Any, Row, any::AnyRow};

use crate::BatchError;

/// Keyset paging over a relational source.
pub mod page_fetcher;

/// This module contains the RDBC paging reader implementation.
pub mod rdbc_reader;

pub use page_fetcher::{KeysetPageFetcher, KeysetPageFetcherBuilder, Page, PagingQueryProvider};
pub use rdbc_reader::{RdbcPagingItemReader, RdbcPagingItemReaderBuilder};

/// Read progress through a keyset-paginated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cursor {
    /// Nothing fetched yet.
    #[default]
    Start,
    /// The last fetched row had this sort key.
    After(i64),
}

impl Cursor {
    /// Cursor placed just before the first key of `(lower, ..]`.
    pub fn from_lower_bound(lower: Option<i64>) -> Cursor {
        lower.map_or(Cursor::Start, Cursor::After)
    }

    pub fn key(&self) -> Option<i64> {
        match self {
            Cursor::Start => None,
            Cursor::After(key) => Some(*key),
        }
    }
}

/// Converts one fetched row into an item.
///
/// `row_num` is the 1-based position of the row in the reader's stream and
/// must be reported in [`BatchError::MalformedRow`] errors.
pub trait RowMapper<T> {
    fn map_row(&self, row: &AnyRow, row_num: usize) -> Result<T, BatchError>;
}

/// Reads a column, reporting a missing, NULL or mistyped value as a malformed row.
pub fn column<'r, V>(row: &'r AnyRow, row_num: usize, name: &str) -> Result<V, BatchError>
where
    V: sqlx::Decode<'r, Any> + sqlx::Type<Any>,
{
    row.try_get::<V, _>(name)
        .map_err(|err| BatchError::MalformedRow {
            row: row_num,
            message: format!("column {}: {}", name, err),
        })
}

/// Reads a numeric column stored as a float, an integer or a numeric string.
pub fn numeric_column(row: &AnyRow, row_num: usize, name: &str) -> Result<f64, BatchError> {
    if let Ok(value) = row.try_get::<f64, _>(name) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<i64, _>(name) {
        return Ok(value as f64);
    }

    let text: String = column(row, row_num, name)?;
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| BatchError::MalformedRow {
            row: row_num,
            message: format!("column {}: {:?} is not numeric", name, text),
        })
}
