//! Save and reset workflow
//!
//! The device resets after accepting a configuration or a firmware image, so
//! a save never completes with a response. Instead the controller treats the
//! dropped connection as the start of a reset, pings the device until it is
//! back, re-reads the configuration and adopts it.
//!
//! ```text
//! Idle -> Saving -> AwaitingReset -> AwaitingReset ... -> Synced -> Idle
//! ```

mod recovery;

use crate::{
    config::SyncConfig,
    device_transport::{Attachment, DeviceTransport, FirmwareImage},
    error::{SyncError, TransportError},
    services::codec,
    types::{ConfigRecord, SaveOutcome, SyncEvent, SyncSnapshot, SyncState},
};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        oneshot,
    },
    task::JoinHandle,
};

const EVENT_CAPACITY: usize = 64;

/// Identifies the background task allowed to change the controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TaskToken(u64);

struct ActiveTask {
    token: TaskToken,
    handle: JoinHandle<()>,
}

struct Inner {
    state: SyncState,
    record: ConfigRecord,
    loaded: bool,
    task: Option<ActiveTask>,
    next_token: u64,
}

/// What gets sent to the device before the reset.
enum Push {
    Config {
        payload: String,
        attachments: Vec<Attachment>,
    },
    Firmware(FirmwareImage),
}

impl Push {
    fn label(&self) -> &'static str {
        match self {
            Push::Config { .. } => "configuration",
            Push::Firmware(_) => "firmware",
        }
    }
}

struct Shared<T> {
    transport: T,
    config: SyncConfig,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SyncEvent>,
}

impl<T: DeviceTransport + Send + Sync> Shared<T> {
    async fn push(&self, push: Push) -> Result<(), TransportError> {
        match push {
            Push::Config {
                payload,
                attachments,
            } => self.transport.push_config(payload, attachments).await,
            Push::Firmware(image) => self.transport.push_firmware(image).await,
        }
    }
}

impl<T> Shared<T> {
    fn transition(&self, inner: &mut Inner, state: SyncState) {
        info!("sync state: {} -> {state}", inner.state);
        inner.state = state;
        // no subscribers is fine
        let _ = self.events.send(SyncEvent::StateChanged {
            state,
            record: inner.record.clone(),
        });
    }

    fn report(&self, error: &SyncError) {
        if let Some(failure) = error.failure() {
            error!("{failure}");
            let _ = self.events.send(SyncEvent::Failed(failure));
        }
    }

    /// Run `f` only while `token` owns the controller.
    fn with_current<R>(
        &self,
        token: TaskToken,
        f: impl FnOnce(&Self, &mut Inner) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock();
        if inner.task.as_ref().map(|task| task.token) != Some(token) {
            return None;
        }
        Some(f(self, &mut *inner))
    }

    fn transition_if_current(&self, token: TaskToken, state: SyncState) -> bool {
        self.with_current(token, |shared, inner| shared.transition(inner, state))
            .is_some()
    }

    /// Release the task slot and settle back to idle.
    fn finish(&self, token: TaskToken) {
        self.with_current(token, |shared, inner| {
            // dropping our own handle just detaches it
            inner.task = None;
            shared.transition(inner, SyncState::Idle);
        });
    }
}

fn ensure_idle(inner: &Inner) -> Result<(), SyncError> {
    if inner.state.is_idle() && inner.task.is_none() {
        Ok(())
    } else {
        Err(SyncError::Busy { state: inner.state })
    }
}

/// Owns the configuration record and drives the save and reset workflow.
///
/// At most one save, firmware upload or recovery runs at a time, requests
/// made meanwhile fail with [`SyncError::Busy`]. Dropping the controller
/// aborts a running recovery.
pub struct SyncController<T> {
    shared: Arc<Shared<T>>,
}

impl<T> SyncController<T>
where
    T: DeviceTransport + Send + Sync + 'static,
{
    pub fn new(transport: T, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                inner: Mutex::new(Inner {
                    state: SyncState::Idle,
                    record: ConfigRecord::default(),
                    loaded: false,
                    task: None,
                    next_token: 0,
                }),
                events,
            }),
        }
    }

    pub fn state(&self) -> SyncState {
        self.shared.inner.lock().state
    }

    /// Copy of the current record.
    pub fn record(&self) -> ConfigRecord {
        self.shared.inner.lock().record.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.inner.lock().loaded
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let inner = self.shared.inner.lock();
        SyncSnapshot {
            state: inner.state,
            record: inner.record.clone(),
            loaded: inner.loaded,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Read the configuration stored on the device.
    ///
    /// A device without a stored configuration (or one that cannot be reached)
    /// is a normal first run: the defaults are kept and `Ok(false)` returned.
    /// A payload that cannot be decoded is an error.
    pub async fn load(&self) -> Result<bool, SyncError> {
        ensure_idle(&self.shared.inner.lock())?;

        let payload = match self.shared.transport.fetch_config().await {
            Ok(payload) => payload,
            Err(e) => {
                info!("no configuration loaded from device, keeping defaults: {e}");
                return Ok(false);
            }
        };

        let record = match codec::decode(&payload) {
            Ok(record) => record,
            Err(e) => {
                let e = SyncError::from(e);
                self.shared.report(&e);
                return Err(e);
            }
        };

        let mut inner = self.shared.inner.lock();
        if let Err(e) = ensure_idle(&inner) {
            warn!("discarding loaded configuration, controller is {}", inner.state);
            return Err(e);
        }
        inner.record = record;
        inner.loaded = true;
        info!("configuration loaded from device");
        let _ = self.shared.events.send(SyncEvent::StateChanged {
            state: inner.state,
            record: inner.record.clone(),
        });

        Ok(true)
    }

    /// Apply `updates` to the record and send it to the device.
    ///
    /// Unknown keys in `updates` are ignored. The updated record is validated
    /// before anything is sent. Returns once the push finished and the device
    /// reset is being awaited, the resync continues in the background. A push
    /// that could not be sent at all fails with [`SyncError::Transport`].
    pub async fn save(
        &self,
        updates: &Map<String, Value>,
        attachments: Vec<Attachment>,
    ) -> Result<SaveOutcome, SyncError> {
        let outcome_rx = {
            let mut inner = self.shared.inner.lock();
            ensure_idle(&inner)?;

            let mut record = inner.record.clone();
            if let Err(e) = record.apply_updates(updates).and_then(|_| record.validate()) {
                let e = SyncError::from(e);
                self.shared.report(&e);
                return Err(e);
            }

            inner.record = record;
            let payload = codec::encode(&inner.record);
            self.start(
                &mut inner,
                Push::Config {
                    payload,
                    attachments,
                },
            )
        };

        outcome_rx.await.unwrap_or(Err(SyncError::Cancelled))
    }

    /// Send a firmware image unchanged, then follow the device through its reset.
    pub async fn upload_firmware(&self, image: FirmwareImage) -> Result<SaveOutcome, SyncError> {
        let outcome_rx = {
            let mut inner = self.shared.inner.lock();
            ensure_idle(&inner)?;
            self.start(&mut inner, Push::Firmware(image))
        };

        outcome_rx.await.unwrap_or(Err(SyncError::Cancelled))
    }

    /// Abort a running save, firmware upload or recovery.
    ///
    /// Pending pings and timers are dropped and the controller returns to idle
    /// with whatever record it holds. Returns false if nothing was running.
    pub fn cancel_recovery(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        let Some(task) = inner.task.take() else {
            return false;
        };

        task.handle.abort();
        warn!("recovery cancelled while {}", inner.state);
        self.shared.transition(&mut inner, SyncState::Idle);
        true
    }

    /// Wait until the controller is idle again and return its state.
    pub async fn wait_until_idle(&self) -> SyncSnapshot {
        let mut events = self.subscribe();

        loop {
            let snapshot = self.snapshot();
            if snapshot.state.is_idle() && !self.is_busy() {
                return snapshot;
            }

            match events.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return self.snapshot(),
            }
        }
    }

    fn is_busy(&self) -> bool {
        self.shared.inner.lock().task.is_some()
    }

    fn start(
        &self,
        inner: &mut Inner,
        push: Push,
    ) -> oneshot::Receiver<Result<SaveOutcome, SyncError>> {
        let token = TaskToken(inner.next_token);
        inner.next_token += 1;

        self.shared.transition(inner, SyncState::Saving);

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let handle = tokio::spawn(recovery::run(
            Arc::clone(&self.shared),
            token,
            push,
            outcome_tx,
        ));
        inner.task = Some(ActiveTask { token, handle });

        outcome_rx
    }
}

impl<T> Drop for SyncController<T> {
    fn drop(&mut self) {
        if let Some(task) = self.shared.inner.lock().task.take() {
            task.handle.abort();
        }
    }
}
