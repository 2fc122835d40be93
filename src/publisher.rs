use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::AuthProvider;
use crate::error::{PositionError, PublishError};
use crate::models::location::{DriverProfile, LocationRecord};
use crate::position::{PositionSource, PositionStream, WatchOptions};
use crate::processor::liveness::Clock;
use crate::store::LocationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingState {
    Idle,
    Sharing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublisherStatus {
    pub state: SharingState,
    /// Number of the sharing session this status belongs to.
    pub session: u64,
    /// Last failure, shown until dismissed or the next start.
    pub last_error: Option<PublishError>,
}

struct Session {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Driver side: watches the position source and overwrites the bus location
/// with every sample while sharing.
///
/// Dropping the publisher cancels any running watch.
pub struct DriverPublisher {
    store: Arc<dyn LocationStore>,
    source: Arc<dyn PositionSource>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    options: WatchOptions,
    status: Arc<watch::Sender<PublisherStatus>>,
    session: Option<Session>,
    next_session: u64,
}

impl DriverPublisher {
    pub fn new(
        store: Arc<dyn LocationStore>,
        source: Arc<dyn PositionSource>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
        options: WatchOptions,
    ) -> Self {
        let (status, _) = watch::channel(PublisherStatus {
            state: SharingState::Idle,
            session: 0,
            last_error: None,
        });
        Self {
            store,
            source,
            auth,
            clock,
            options,
            status: Arc::new(status),
            session: None,
            next_session: 1,
        }
    }

    pub fn status(&self) -> PublisherStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PublisherStatus> {
        self.status.subscribe()
    }

    pub fn is_sharing(&self) -> bool {
        self.status.borrow().state == SharingState::Sharing
    }

    /// Name and phone from the record currently in the store, if both are set.
    pub async fn previous_profile(&self) -> Option<DriverProfile> {
        match self.store.fetch().await {
            Ok(Some(record)) => {
                let profile = DriverProfile::new(record.driver_name, record.phone_number);
                profile.is_complete().then_some(profile)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Error loading driver info: {}", e);
                None
            }
        }
    }

    /// Starts sharing. On rejection nothing is written and the state stays Idle.
    pub async fn start(&mut self, profile: DriverProfile) -> Result<(), PublishError> {
        if self.is_sharing() {
            return Err(PublishError::AlreadySharing);
        }
        self.dismiss_error();

        match self.open_watch(&profile).await {
            Ok((uid, stream)) => {
                self.spawn_session(profile, uid, stream);
                Ok(())
            }
            Err(e) => {
                warn!("Location sharing not started: {}", e);
                self.status.send_modify(|s| s.last_error = Some(e.clone()));
                Err(e)
            }
        }
    }

    async fn open_watch(&self, profile: &DriverProfile) -> Result<(String, PositionStream), PublishError> {
        if !profile.is_complete() {
            return Err(PublishError::MissingDriverFields);
        }
        let identity = self
            .auth
            .current_user()
            .ok_or(PublishError::NotAuthenticated)?;
        debug!("Authenticated as {} ({:?})", identity.uid, identity.email);
        if !self.source.is_available() {
            return Err(PublishError::SourceUnavailable);
        }

        self.store
            .mark_presence(&identity.uid, self.clock.now_millis())
            .await?;
        let stream = self.source.watch(self.options).await?;
        Ok((identity.uid, stream))
    }

    fn spawn_session(&mut self, profile: DriverProfile, uid: String, stream: PositionStream) {
        let id = self.next_session;
        self.next_session += 1;
        let cancel = CancellationToken::new();
        if let Some(previous) = self.session.take() {
            previous.cancel.cancel();
        }

        self.status.send_modify(|s| {
            s.state = SharingState::Sharing;
            s.session = id;
            s.last_error = None;
        });
        info!("Location sharing started (session {}) for {}", id, uid);

        let handle = tokio::spawn(run_session(SessionContext {
            id,
            store: self.store.clone(),
            clock: self.clock.clone(),
            status: self.status.clone(),
            cancel: cancel.clone(),
            profile,
            uid,
            stream,
        }));
        self.session = Some(Session { id, cancel, handle });
    }

    /// Stops sharing. Calling it while idle does nothing.
    pub fn stop(&mut self) {
        if let Some(session) = &self.session {
            session.cancel.cancel();
            let id = session.id;
            self.status.send_modify(|s| {
                if s.session == id && s.state == SharingState::Sharing {
                    s.state = SharingState::Idle;
                    info!("Location sharing stopped (session {})", id);
                }
            });
        }
    }

    /// Stops sharing and waits for the sampling task to finish.
    pub async fn shutdown(&mut self) {
        self.stop();
        if let Some(session) = self.session.take() {
            if let Err(e) = session.handle.await {
                error!("Sharing task ended abnormally: {}", e);
            }
        }
    }

    pub fn dismiss_error(&self) {
        self.status.send_modify(|s| s.last_error = None);
    }
}

impl Drop for DriverPublisher {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }
}

struct SessionContext {
    id: u64,
    store: Arc<dyn LocationStore>,
    clock: Arc<dyn Clock>,
    status: Arc<watch::Sender<PublisherStatus>>,
    cancel: CancellationToken,
    profile: DriverProfile,
    uid: String,
    stream: PositionStream,
}

/// Writes one record per sample until cancelled or a failure ends the session.
/// Nothing is written once the session's token is cancelled.
async fn run_session(mut ctx: SessionContext) {
    let failure = loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break None,
            next = ctx.stream.next() => next,
        };

        let sample = match next {
            Some(Ok(sample)) => sample,
            Some(Err(e)) => break Some(PublishError::Position(e)),
            None => {
                break Some(PublishError::Position(PositionError::Unavailable(
                    "position watch ended".to_string(),
                )))
            }
        };

        let record = LocationRecord {
            lat: sample.lat,
            lng: sample.lng,
            driver_name: ctx.profile.driver_name.clone(),
            phone_number: ctx.profile.phone_number.clone(),
            timestamp: ctx.clock.now_millis(),
            uid: Some(ctx.uid.clone()),
        };

        // a write still in flight when the session is cancelled is abandoned
        let written = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break None,
            written = ctx.store.publish(&record) => written,
        };
        if let Err(e) = written {
            break Some(PublishError::Store(e));
        }
        debug!(
            recorded_at = ?sample.recorded_at,
            "Location updated: {}, {}",
            record.lat,
            record.lng
        );
    };

    if let Some(err) = failure {
        error!("Location sharing stopped (session {}): {}", ctx.id, err);
        ctx.status.send_modify(|s| {
            if s.session == ctx.id && s.state == SharingState::Sharing {
                s.state = SharingState::Idle;
                s.last_error = Some(err);
            }
        });
    }
    // the watch is cancelled by dropping its stream here
}
