use std::{fmt, future::Future, time::Duration};

use log::debug;
use sqlx::{AnyPool, Row, any::AnyRow};
use tokio::runtime::Handle;

use crate::BatchError;

use super::Cursor;

/// Default time allowed for one page query.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the SQL of a keyset-paginated query.
///
/// Pages are selected with `WHERE <sort key> > <cursor>` and sorted ascending
/// on the sort key, never with an OFFSET, so concurrent readers of disjoint
/// key ranges cannot skip or repeat rows.
///
/// ```
/// use customer_batch::item::rdbc::{Cursor, PagingQueryProvider};
///
/// let provider = PagingQueryProvider::new(
///     "SELECT customerNumber, customerName",
///     "FROM customers",
///     "customerNumber",
/// );
///
/// assert_eq!(
///     provider.page_query(Cursor::After(112), Some(200), 10),
///     "SELECT customerNumber, customerName FROM customers \
///      WHERE customerNumber > 112 AND customerNumber <= 200 \
///      ORDER BY customerNumber ASC LIMIT 10"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingQueryProvider {
    select_clause: String,
    from_clause: String,
    where_clause: Option<String>,
    sort_key: String,
}

impl PagingQueryProvider {
    /// The `SELECT` and `FROM` keywords are optional in the clauses.
    /// The sort key must be a unique integer column of the select list.
    pub fn new(select_clause: &str, from_clause: &str, sort_key: &str) -> PagingQueryProvider {
        PagingQueryProvider {
            select_clause: with_keyword(select_clause, "SELECT"),
            from_clause: with_keyword(from_clause, "FROM"),
            where_clause: None,
            sort_key: sort_key.trim().to_string(),
        }
    }

    /// Extra filter applied to every page and to the key bounds.
    pub fn with_where_clause(mut self, where_clause: &str) -> PagingQueryProvider {
        let trimmed = strip_keyword(where_clause.trim(), "WHERE");
        self.where_clause = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn sort_key(&self) -> &str {
        &self.sort_key
    }

    pub fn page_query(&self, cursor: Cursor, upper: Option<i64>, page_size: usize) -> String {
        let mut conditions = Vec::with_capacity(3);
        if let Some(filter) = &self.where_clause {
            conditions.push(format!("({})", filter));
        }
        if let Cursor::After(key) = cursor {
            conditions.push(format!("{} > {}", self.sort_key, key));
        }
        if let Some(upper) = upper {
            conditions.push(format!("{} <= {}", self.sort_key, upper));
        }

        let mut sql = format!("{} {}", self.select_clause, self.from_clause);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY {} ASC LIMIT {}",
            self.sort_key, page_size
        ));
        sql
    }

    /// Query returning the row count and the lowest and highest sort keys.
    pub fn bounds_query(&self) -> String {
        let mut sql = format!(
            "SELECT COUNT(*), COALESCE(MIN({key}), 0), COALESCE(MAX({key}), 0) {from}",
            key = self.sort_key,
            from = self.from_clause
        );
        if let Some(filter) = &self.where_clause {
            sql.push_str(&format!(" WHERE ({})", filter));
        }
        sql
    }
}

fn strip_keyword<'c>(clause: &'c str, keyword: &str) -> &'c str {
    match clause.get(..keyword.len()) {
        Some(head)
            if head.eq_ignore_ascii_case(keyword)
                && clause[keyword.len()..].starts_with(char::is_whitespace) =>
        {
            clause[keyword.len()..].trim_start()
        }
        _ => clause,
    }
}

fn with_keyword(clause: &str, keyword: &str) -> String {
    format!("{} {}", keyword, strip_keyword(clause.trim(), keyword))
}

/// One page of raw rows and the cursor to resume from.
pub struct Page {
    pub rows: Vec<AnyRow>,
    pub next_cursor: Cursor,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // rows carry no Debug impl, their count is enough for logs
        f.debug_struct("Page")
            .field("rows", &self.rows.len())
            .field("next_cursor", &self.next_cursor)
            .finish()
    }
}

impl Page {
    /// An empty page signals the end of the source.
    pub fn is_end(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Fetches fixed-size pages of rows from a relational source.
///
/// Queries run on the stored runtime handle and are bounded by a per-fetch
/// timeout. Connection errors, query errors and timeouts are all reported as
/// [`BatchError::SourceUnavailable`] and never retried here.
///
/// The fetcher is synchronous: call it from a plain thread or from a
/// multi-threaded runtime, never from a `current_thread` runtime.
#[derive(Debug, Clone)]
pub struct KeysetPageFetcher {
    pool: AnyPool,
    handle: Handle,
    provider: PagingQueryProvider,
    page_size: usize,
    upper_bound: Option<i64>,
    fetch_timeout: Duration,
}

impl KeysetPageFetcher {
    pub fn builder() -> KeysetPageFetcherBuilder {
        KeysetPageFetcherBuilder::new()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn provider(&self) -> &PagingQueryProvider {
        &self.provider
    }

    /// Fetches up to `page_size` rows with a sort key strictly after `cursor`.
    pub fn fetch_page(&self, cursor: Cursor) -> Result<Page, BatchError> {
        let sql = self
            .provider
            .page_query(cursor, self.upper_bound, self.page_size);
        debug!("Fetching page: {}", sql);

        let rows = self.run(sqlx::query(&sql).fetch_all(&self.pool))?;

        let next_cursor = match rows.last() {
            Some(last) => {
                let key = self.sort_key_of(last)?;
                if cursor.key().is_some_and(|previous| key <= previous) {
                    return Err(BatchError::Configuration(format!(
                        "sort key {} went from {:?} to {}, it must be unique and ascending",
                        self.provider.sort_key(),
                        cursor.key(),
                        key
                    )));
                }
                Cursor::After(key)
            }
            None => cursor,
        };

        debug!("Fetched {} row(s), next cursor {:?}", rows.len(), next_cursor);
        Ok(Page { rows, next_cursor })
    }

    /// Lowest and highest sort keys of the source, `None` when it is empty.
    pub fn key_bounds(&self) -> Result<Option<(i64, i64)>, BatchError> {
        let sql = self.provider.bounds_query();
        debug!("Fetching key bounds: {}", sql);

        let row = self.run(sqlx::query(&sql).fetch_one(&self.pool))?;
        let get = |index: usize| {
            row.try_get::<i64, _>(index).map_err(|err| {
                BatchError::SourceUnavailable(format!("unreadable key bounds: {}", err))
            })
        };

        if get(0)? == 0 {
            return Ok(None);
        }
        Ok(Some((get(1)?, get(2)?)))
    }

    /// Sort key of a fetched row.
    pub fn sort_key_of(&self, row: &AnyRow) -> Result<i64, BatchError> {
        row.try_get::<i64, _>(self.provider.sort_key())
            .map_err(|err| {
                BatchError::Configuration(format!(
                    "sort key {} is not a selected integer column: {}",
                    self.provider.sort_key(),
                    err
                ))
            })
    }

    fn run<T, F>(&self, query: F) -> Result<T, BatchError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let timeout = self.fetch_timeout;
        let outcome = tokio::task::block_in_place(|| {
            self.handle
                .block_on(async move { tokio::time::timeout(timeout, query).await })
        });

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(BatchError::SourceUnavailable(err.to_string())),
            Err(_) => Err(BatchError::SourceUnavailable(format!(
                "query timed out after {:?}",
                timeout
            ))),
        }
    }
}

/// Builder for [`KeysetPageFetcher`].
///
/// `pool`, `provider` and `page_size` are required. Without an explicit
/// `handle`, the runtime of the calling context is used.
#[derive(Default)]
pub struct KeysetPageFetcherBuilder {
    pool: Option<AnyPool>,
    handle: Option<Handle>,
    provider: Option<PagingQueryProvider>,
    page_size: Option<usize>,
    upper_bound: Option<i64>,
    fetch_timeout: Option<Duration>,
}

impl KeysetPageFetcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(mut self, pool: AnyPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn provider(mut self, provider: PagingQueryProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Rows per page. Must match the chunk size of the step reading the pages.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Inclusive upper bound on the sort key, for partitioned reads.
    pub fn upper_bound(mut self, upper_bound: Option<i64>) -> Self {
        self.upper_bound = upper_bound;
        self
    }

    pub fn fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = Some(fetch_timeout);
        self
    }

    pub fn build(self) -> Result<KeysetPageFetcher, BatchError> {
        let pool = self
            .pool
            .ok_or_else(|| BatchError::Configuration("a connection pool is required".to_string()))?;
        let provider = self
            .provider
            .ok_or_else(|| BatchError::Configuration("a query provider is required".to_string()))?;
        let page_size = match self.page_size {
            Some(size) if size > 0 => size,
            _ => {
                return Err(BatchError::Configuration(
                    "page size must be greater than zero".to_string(),
                ));
            }
        };
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|err| {
                BatchError::Configuration(format!("no tokio runtime available: {}", err))
            })?,
        };

        Ok(KeysetPageFetcher {
            pool,
            handle,
            provider,
            page_size,
            upper_bound: self.upper_bound,
            fetch_timeout: self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT),
        })
    }
}
