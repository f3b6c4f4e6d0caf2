use super::{Push, Shared, TaskToken};
use crate::{
    device_transport::DeviceTransport,
    error::SyncError,
    services::codec,
    types::{SaveOutcome, SyncState},
};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::{sync::oneshot, time::sleep};

/// Push an update, then follow the device through its reset.
///
/// Runs as the controller's single background task. Every state change is
/// made through `token`, so nothing is written once the task was cancelled.
pub(super) async fn run<T>(
    shared: Arc<Shared<T>>,
    token: TaskToken,
    push: Push,
    outcome_tx: oneshot::Sender<Result<SaveOutcome, SyncError>>,
) where
    T: DeviceTransport + Send + Sync + 'static,
{
    let what = push.label();
    let outcome = match shared.push(push).await {
        Ok(()) => {
            info!("{what} accepted, waiting for device reset");
            SaveOutcome::Acknowledged
        }
        Err(e) if e.is_connection() => {
            info!("connection dropped after sending {what}, device is resetting: {e}");
            SaveOutcome::ConnectionDropped
        }
        Err(e) if e.is_invalid_request() => {
            // nothing was sent, so there is no reset to wait for
            let e = SyncError::from(e);
            shared.with_current(token, |shared, _| shared.report(&e));
            shared.finish(token);
            let _ = outcome_tx.send(Err(e));
            return;
        }
        Err(e) => {
            warn!("{what} not confirmed by device, checking for reset anyway: {e}");
            SaveOutcome::Unconfirmed
        }
    };

    if !shared.transition_if_current(token, SyncState::AwaitingReset { attempt: 0 }) {
        return;
    }
    // the caller may have stopped waiting, recovery continues regardless
    let _ = outcome_tx.send(Ok(outcome));

    if !wait_for_device(&shared, token).await {
        return;
    }

    resync(&shared, token).await;
}

/// Ping until the device answers. Returns false if the task lost its token.
async fn wait_for_device<T>(shared: &Shared<T>, token: TaskToken) -> bool
where
    T: DeviceTransport + Send + Sync,
{
    let mut attempt: u32 = 0;

    loop {
        match shared.transport.ping().await {
            Ok(()) => {
                info!("device is back after {attempt} failed pings");
                return true;
            }
            Err(e) => {
                attempt = attempt.saturating_add(1);
                debug!("device not reachable yet (attempt {attempt}): {e}");

                if !shared.transition_if_current(token, SyncState::AwaitingReset { attempt }) {
                    return false;
                }
                sleep(shared.config.ping_interval).await;
            }
        }
    }
}

/// Fetch the configuration the device came back with and adopt it.
async fn resync<T>(shared: &Shared<T>, token: TaskToken)
where
    T: DeviceTransport + Send + Sync,
{
    let fetched = shared.transport.fetch_config().await;
    let decoded = fetched
        .map_err(SyncError::from)
        .and_then(|payload| codec::decode(&payload).map_err(SyncError::from));

    match decoded {
        Ok(record) => {
            let adopted = shared.with_current(token, |shared, inner| {
                inner.record = record;
                inner.loaded = true;
                shared.transition(inner, SyncState::Synced);
            });
            if adopted.is_none() {
                return;
            }

            sleep(shared.config.synced_display).await;
            shared.finish(token);
        }
        Err(e) => {
            error!("failed to resync after device reset: {e}");
            shared.with_current(token, |shared, _| shared.report(&e));
            shared.finish(token);
        }
    }
}
