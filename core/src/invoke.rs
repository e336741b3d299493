//! Races one network round trip against the caller's context.

use tracing::debug;

use crate::context::Context;
use crate::dispatch::{DispatchCounters, InflightGuard};
use crate::error::{Error, Result};

/// Execute `request` on its own task and wait for either the response or the
/// end of `ctx`.
///
/// A context that has already ended wins without touching the network. When
/// the context ends mid-call the task is aborted and awaited before the
/// cancellation is returned, so nothing from the call outlives this
/// function. A response that slipped in before the abort landed is dropped.
pub(crate) async fn invoke(
    http: &reqwest::Client,
    ctx: &Context,
    request: reqwest::Request,
    counters: &DispatchCounters,
) -> Result<reqwest::Response> {
    if let Some(reason) = ctx.err() {
        return Err(Error::Cancelled(reason));
    }

    let _in_flight = InflightGuard::acquire(counters);
    let http = http.clone();
    let mut call = tokio::spawn(async move { http.execute(request).await });

    tokio::select! {
        biased;
        reason = ctx.done() => {
            debug!(%reason, "aborting in-flight call");
            call.abort();
            if let Ok(Ok(response)) = call.await {
                debug!(status = %response.status(), "discarding response that lost the race");
                drop(response);
            }
            Err(Error::Cancelled(reason))
        }
        joined = &mut call => match joined {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(source)) => Err(Error::Network { source }),
            Err(join_error) => Err(Error::TaskFailed(join_error.to_string())),
        },
    }
}
