//! Partial-failure aggregation for independent top-level operations

use std::fmt;
use std::future::Future;

use futures::future::join_all;
use tracing::error;

/// Run every operation concurrently and wait for all of them, whatever
/// their outcome.
///
/// Each failure is logged. When at least one operation failed, the first
/// failure in argument order is returned; the others are only logged.
pub async fn gather_all<I, F, E>(ops: I) -> Result<(), E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<(), E>>,
    E: fmt::Display,
{
    let results = join_all(ops).await;
    let total = results.len();
    let mut first = None;
    for (index, result) in results.into_iter().enumerate() {
        if let Err(err) = result {
            error!(operation = index + 1, of = total, error = %err, "Operation failed");
            first.get_or_insert(err);
        }
    }
    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
