//! The remote side of a download, as the batch pipeline sees it

use serde_json::Value;

/// A paginated, countable remote dataset.
///
/// Implementations report failures through `Error`; they are not expected to
/// retry. The pipeline wraps every call in the retry combinator.
pub trait RecordSource {
    type Error: std::fmt::Display;

    /// Total number of rows in `dataset`
    fn count(&self, dataset: &str) -> Result<u64, Self::Error>;

    /// Up to `limit` records starting at row `offset`, in a stable order
    fn fetch(&self, dataset: &str, limit: u64, offset: u64) -> Result<Vec<Value>, Self::Error>;
}

impl<S: RecordSource + ?Sized> RecordSource for &S {
    type Error = S::Error;

    fn count(&self, dataset: &str) -> Result<u64, Self::Error> {
        (**self).count(dataset)
    }

    fn fetch(&self, dataset: &str, limit: u64, offset: u64) -> Result<Vec<Value>, Self::Error> {
        (**self).fetch(dataset, limit, offset)
    }
}
