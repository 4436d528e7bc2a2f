use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::error::Error as StdError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Await a collaborator call unless `ct` fires first, wrapping its error in
/// `kind`.
pub(crate) async fn guarded<T, E, F>(ct: &CancellationToken, future: F, kind: impl FnOnce() -> ErrorKind) -> Result<T>
where
    E: StdError + Send + Sync + 'static,
    F: Future<Output = std::result::Result<T, exn::Exn<E>>>,
{
    tokio::select! {
        biased;
        () = ct.cancelled() => exn::bail!(ErrorKind::Cancelled),
        result = future => result.or_raise(kind),
    }
}
