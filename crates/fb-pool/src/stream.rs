//! Streaming query result support.

use std::pin::Pin;
use std::task::{Context, Poll};

use fb_driver::{Row, RowStream};
use futures_core::Stream;
use futures_util::StreamExt;

use crate::error::{Error, Result};

/// Rows of a statement, produced one at a time.
///
/// Finite and single-pass. The stream ends once the driver signals the end
/// of the result set; a driver error is yielded once as [`Error::Query`]
/// and ends the stream.
///
/// # Example
///
/// ```rust,ignore
/// use futures_util::StreamExt;
///
/// let mut rows = session.stream("SELECT id FROM big_table", &[]).await?;
/// while let Some(row) = rows.next().await {
///     process(row?);
/// }
/// ```
pub struct Rows<'a> {
    inner: RowStream<'a>,
    yielded: usize,
    finished: bool,
}

impl<'a> Rows<'a> {
    pub(crate) fn new(inner: RowStream<'a>) -> Self {
        Self {
            inner,
            yielded: 0,
            finished: false,
        }
    }

    /// Number of rows yielded so far.
    #[must_use]
    pub fn rows_seen(&self) -> usize {
        self.yielded
    }

    /// Check if the stream has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Collect all remaining rows into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }
}

impl Stream for Rows<'_> {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => {
                this.yielded += 1;
                Poll::Ready(Some(Ok(row)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                Poll::Ready(Some(Err(Error::Query(e))))
            }
            Poll::Ready(None) => {
                this.finished = true;
                tracing::trace!(rows = this.yielded, "row stream finished");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for Rows<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("rows_seen", &self.yielded)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use fb_driver::{DriverError, Value};
    use futures_util::stream;

    use super::*;

    fn row(n: i64) -> Row {
        Row::new(Arc::from(vec!["n".to_owned()]), vec![Value::Int(n)])
    }

    #[tokio::test]
    async fn test_rows_counts_and_finishes() {
        let inner: RowStream<'static> = Box::pin(stream::iter(vec![Ok(row(1)), Ok(row(2))]));
        let mut rows = Rows::new(inner);

        assert!(rows.next().await.is_some());
        assert_eq!(rows.rows_seen(), 1);
        assert!(rows.next().await.is_some());
        assert!(rows.next().await.is_none());
        assert!(rows.is_finished());
        assert_eq!(rows.rows_seen(), 2);
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let inner: RowStream<'static> = Box::pin(stream::iter(vec![
            Ok(row(1)),
            Err(DriverError::Query("lost".into())),
            Ok(row(3)),
        ]));
        let mut rows = Rows::new(inner);

        assert!(rows.next().await.unwrap().is_ok());
        assert!(matches!(rows.next().await, Some(Err(Error::Query(_)))));
        assert!(rows.next().await.is_none());
    }

    #[tokio::test]
    async fn test_collect_all() {
        let inner: RowStream<'static> = Box::pin(stream::iter((0..5).map(|n| Ok(row(n)))));
        let rows = Rows::new(inner).collect_all().await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4].get(0), Some(&Value::Int(4)));
    }
}
