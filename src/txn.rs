//! The transaction boundary around a request.
use std::future::Future;

use crate::fs::{DavStore, DavTxn};
use crate::DavResult;

/// Run `body` inside a fresh transaction.
///
/// Commits when `body` returns `Ok`, rolls back when it returns `Err` and
/// hands the error back to the caller. Exactly one of the two is called.
/// A failing rollback is logged; the original error is what the caller sees.
pub(crate) async fn with_transaction<T, F, Fut>(store: &dyn DavStore, body: F) -> DavResult<T>
where
    F: FnOnce(DavTxn) -> Fut,
    Fut: Future<Output = DavResult<T>>,
{
    let txn = store.begin().await?;
    trace!("transaction started");
    match body(txn.clone()).await {
        Ok(value) => {
            txn.commit().await?;
            trace!("transaction committed");
            Ok(value)
        }
        Err(err) => {
            match txn.rollback().await {
                Ok(()) => trace!("transaction rolled back: {err}"),
                Err(e) => warn!("rollback after \"{err}\" failed: {e}"),
            }
            Err(err)
        }
    }
}
