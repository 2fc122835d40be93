use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ResolveError, StoreError};
use crate::geocode::AddressResolver;
use crate::models::location::{Coordinates, FallbackAnchor, LocationRecord};
use crate::models::view::ViewState;
use crate::processor::liveness::Clock;
use crate::processor::reconciler::Reconciler;
use crate::store::{LocationStore, RecordStream};

pub const LOAD_ERROR: &str = "Failed to load bus location. Please try again later.";
pub const UPDATE_ERROR: &str = "Failed to get location updates";

/// What the view layer is told after each reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    Updated(ViewState),
    /// Move the map to these coordinates.
    Recenter(Coordinates),
    /// Transient notice, e.g. "Driver X location updated".
    Notice(String),
}

enum Command {
    DismissError,
}

/// Student side: keeps one view in sync with the bus location.
///
/// Mounting reads the current record once, then follows the store's change
/// notifications; both go through the same reconciler. Unmounting or dropping
/// cancels the subscription, and no reconciliation happens afterwards.
pub struct ViewerSubscription {
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ViewState>,
    handle: Option<JoinHandle<()>>,
}

struct ViewContext {
    store: Arc<dyn LocationStore>,
    resolver: Arc<dyn AddressResolver>,
    clock: Arc<dyn Clock>,
    reconciler: Reconciler,
    state: watch::Sender<ViewState>,
    events: mpsc::UnboundedSender<ViewEvent>,
    lookups: JoinSet<(Coordinates, Result<String, ResolveError>)>,
}

impl ViewerSubscription {
    pub fn mount(
        store: Arc<dyn LocationStore>,
        resolver: Arc<dyn AddressResolver>,
        clock: Arc<dyn Clock>,
        fallback: FallbackAnchor,
    ) -> (Self, mpsc::UnboundedReceiver<ViewEvent>) {
        let reconciler = Reconciler::new(fallback);
        let (state_tx, state_rx) = watch::channel(reconciler.state().clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let ctx = ViewContext {
            store,
            resolver,
            clock,
            reconciler,
            state: state_tx,
            events: events_tx,
            lookups: JoinSet::new(),
        };
        let handle = tokio::spawn(run_view(ctx, commands_rx, cancel.clone()));
        info!("Viewer mounted");

        let subscription = Self {
            cancel,
            commands: commands_tx,
            state: state_rx,
            handle: Some(handle),
        };
        (subscription, events_rx)
    }

    /// Latest view state; `changed()` on the receiver waits for the next one.
    pub fn state(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    pub fn dismiss_error(&self) {
        let _ = self.commands.send(Command::DismissError);
    }

    /// Cancels the subscription and waits until the view task is gone.
    pub async fn unmount(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Viewer task ended abnormally: {}", e);
            }
        }
        info!("Viewer unmounted");
    }
}

impl Drop for ViewerSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_view(
    mut ctx: ViewContext,
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    let initial = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        initial = ctx.store.fetch() => initial,
    };
    match initial {
        Ok(record) => ctx.apply(record, false),
        Err(e) => ctx.fail(LOAD_ERROR, e),
    }

    let subscribed = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        subscribed = ctx.store.subscribe() => subscribed,
    };
    let mut changes = match subscribed {
        Ok(stream) => Some(stream),
        Err(e) => {
            ctx.fail(UPDATE_ERROR, e);
            None
        }
    };

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(command) = commands.recv() => match command {
                Command::DismissError => {
                    ctx.reconciler.dismiss_error();
                    ctx.publish();
                }
            },
            Some(joined) = ctx.lookups.join_next() => match joined {
                Ok((coords, result)) => {
                    if ctx.reconciler.apply_address(coords, result) {
                        ctx.publish();
                    }
                }
                Err(e) => warn!("Address lookup task failed: {}", e),
            },
            change = next_change(&mut changes) => match change {
                Some(Ok(record)) => ctx.apply(record, true),
                Some(Err(e)) => ctx.fail(UPDATE_ERROR, e),
                None => {
                    warn!("Location subscription closed by the store");
                    changes = None;
                }
            },
        }
    }
    // dropping `ctx` aborts pending lookups and closes the event channel
}

async fn next_change(
    changes: &mut Option<RecordStream>,
) -> Option<Result<Option<LocationRecord>, StoreError>> {
    match changes {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

impl ViewContext {
    fn apply(&mut self, record: Option<LocationRecord>, incremental: bool) {
        let now = self.clock.now_millis();
        let outcome = self.reconciler.reconcile(record, now, incremental);

        if let Some(coords) = outcome.resolve_address {
            let resolver = self.resolver.clone();
            self.lookups
                .spawn(async move { (coords, resolver.resolve(coords).await) });
        }

        self.publish();
        if outcome.recenter {
            let _ = self.events.send(ViewEvent::Recenter(outcome.displayed.coords));
        }
        if let Some(notice) = outcome.announce {
            let _ = self.events.send(ViewEvent::Notice(notice));
        }
    }

    fn fail(&mut self, banner: &str, e: StoreError) {
        error!("{}: {}", banner, e);
        self.reconciler.record_error(banner);
        self.publish();
    }

    fn publish(&self) {
        let state = self.reconciler.state().clone();
        self.state.send_replace(state.clone());
        let _ = self.events.send(ViewEvent::Updated(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::stub::StubResolver;
    use crate::models::view::{LOADING_ADDRESS, UNKNOWN_ADDRESS};
    use crate::processor::liveness::test_clock::FixedClock;
    use crate::store::memory::MemoryLocationStore;
    use std::time::Duration;

    const NOW: i64 = 1_764_396_915_000;

    fn record(lat: f64, lng: f64, timestamp: i64) -> LocationRecord {
        LocationRecord {
            lat,
            lng,
            driver_name: "Ravi".into(),
            phone_number: "9876543210".into(),
            timestamp,
            uid: Some("drv-1".into()),
        }
    }

    fn mount(
        store: &Arc<MemoryLocationStore>,
        resolver: &Arc<StubResolver>,
        clock: &Arc<FixedClock>,
    ) -> (ViewerSubscription, mpsc::UnboundedReceiver<ViewEvent>) {
        ViewerSubscription::mount(
            store.clone(),
            resolver.clone(),
            clock.clone(),
            FallbackAnchor::default(),
        )
    }

    async fn wait_state(
        viewer: &ViewerSubscription,
        pred: impl FnMut(&ViewState) -> bool,
    ) -> ViewState {
        let mut rx = viewer.state();
        let state = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
            .await
            .expect("view state not reached")
            .expect("viewer task gone")
            .clone();
        state
    }

    async fn wait_subscribed(store: &MemoryLocationStore) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.subscriber_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("viewer never subscribed");
    }

    #[tokio::test]
    async fn test_empty_store_shows_fallback() {
        let store = Arc::new(MemoryLocationStore::new());
        let resolver = Arc::new(StubResolver::answering("Somewhere"));
        let clock = Arc::new(FixedClock::at(NOW));

        let (viewer, mut events) = mount(&store, &resolver, &clock);
        let state = wait_state(&viewer, |s| !s.loading).await;

        let displayed = state.displayed.unwrap();
        assert!(!displayed.active);
        assert_eq!(displayed.coords, FallbackAnchor::default().coords);
        assert_eq!(displayed.driver_name, "No Driver");
        assert_eq!(state.address, "BIT Patna Main Gate");
        assert_eq!(resolver.call_count(), 0);

        assert!(matches!(events.recv().await, Some(ViewEvent::Updated(_))));
        assert_eq!(
            events.recv().await,
            Some(ViewEvent::Recenter(FallbackAnchor::default().coords))
        );
        viewer.unmount().await;
    }

    #[tokio::test]
    async fn test_initial_and_incremental_updates_converge() {
        let store = Arc::new(MemoryLocationStore::with_record(record(25.61, 85.14, NOW - 600_000)));
        let resolver = Arc::new(StubResolver::answering("Boring Road, Patna, Bihar"));
        let clock = Arc::new(FixedClock::at(NOW));

        let (viewer, _events) = mount(&store, &resolver, &clock);
        let state = wait_state(&viewer, |s| !s.loading).await;
        assert!(!state.is_active());
        assert_eq!(state.displayed.as_ref().unwrap().driver_name, "Ravi");

        wait_subscribed(&store).await;
        store.publish(&record(25.62, 85.15, NOW - 10_000)).await.unwrap();

        let state = wait_state(&viewer, |s| s.address == "Boring Road, Patna, Bihar").await;
        let displayed = state.displayed.unwrap();
        assert!(displayed.active);
        assert_eq!(displayed.coords, Coordinates::new(25.62, 85.15));
        assert_eq!(resolver.call_count(), 1);
        viewer.unmount().await;
    }

    #[tokio::test]
    async fn test_incremental_update_announces_and_recenters() {
        let store = Arc::new(MemoryLocationStore::new());
        let resolver = Arc::new(StubResolver::answering("Gandhi Maidan"));
        let clock = Arc::new(FixedClock::at(NOW));

        let (viewer, mut events) = mount(&store, &resolver, &clock);
        wait_state(&viewer, |s| !s.loading).await;
        wait_subscribed(&store).await;
        clock.set(NOW + 1_000);
        store.publish(&record(25.7, 85.2, NOW)).await.unwrap();
        wait_state(&viewer, |s| s.address == "Gandhi Maidan").await;
        viewer.unmount().await;

        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        assert!(seen.contains(&ViewEvent::Recenter(Coordinates::new(25.7, 85.2))));
        assert!(seen.contains(&ViewEvent::Notice("Driver Ravi location updated".into())));
    }

    #[tokio::test]
    async fn test_failed_lookup_degrades_address() {
        let store = Arc::new(MemoryLocationStore::with_record(record(25.61, 85.14, NOW)));
        let resolver = Arc::new(StubResolver::failing());
        let clock = Arc::new(FixedClock::at(NOW));

        let (viewer, _events) = mount(&store, &resolver, &clock);
        let state = wait_state(&viewer, |s| s.address == UNKNOWN_ADDRESS).await;
        assert!(state.is_active());
        assert_eq!(state.banner, None);
        viewer.unmount().await;
    }

    #[tokio::test]
    async fn test_subscription_error_keeps_last_location() {
        let store = Arc::new(MemoryLocationStore::with_record(record(25.61, 85.14, NOW)));
        let resolver = Arc::new(StubResolver::answering("Boring Road"));
        let clock = Arc::new(FixedClock::at(NOW));

        let (viewer, _events) = mount(&store, &resolver, &clock);
        let before = wait_state(&viewer, |s| s.address == "Boring Road").await;
        wait_subscribed(&store).await;

        store.push_error(StoreError::Transport("connection reset".into()));
        let after = wait_state(&viewer, |s| s.banner.is_some()).await;
        assert_eq!(after.banner.as_deref(), Some(UPDATE_ERROR));
        assert_eq!(after.displayed, before.displayed);
        assert_eq!(after.address, "Boring Road");

        viewer.dismiss_error();
        wait_state(&viewer, |s| s.banner.is_none()).await;
        viewer.unmount().await;
    }

    #[tokio::test]
    async fn test_load_failure_shows_banner() {
        let store = Arc::new(MemoryLocationStore::new());
        store.fail_with(Some(StoreError::Transport("offline".into())));
        let resolver = Arc::new(StubResolver::answering("x"));
        let clock = Arc::new(FixedClock::at(NOW));

        let (viewer, mut events) = mount(&store, &resolver, &clock);
        match events.recv().await {
            Some(ViewEvent::Updated(state)) => {
                assert_eq!(state.banner.as_deref(), Some(LOAD_ERROR));
                assert!(!state.loading);
                assert_eq!(state.displayed, None);
            }
            other => panic!("unexpected event {:?}", other),
        }
        viewer.unmount().await;
    }

    #[tokio::test]
    async fn test_superseded_lookup_is_discarded() {
        let store = Arc::new(MemoryLocationStore::with_record(record(25.61, 85.14, NOW)));
        let resolver = Arc::new(StubResolver::answering("Late Answer").with_delay(Duration::from_millis(200)));
        let clock = Arc::new(FixedClock::at(NOW));

        let (viewer, _events) = mount(&store, &resolver, &clock);
        wait_state(&viewer, |s| s.is_active()).await;
        wait_subscribed(&store).await;

        // goes stale before the lookup answers
        clock.set(NOW + 600_000);
        store.publish(&record(25.61, 85.14, NOW)).await.unwrap();
        let state = wait_state(&viewer, |s| !s.is_active()).await;
        assert_eq!(state.address, "BIT Patna Main Gate");

        tokio::time::sleep(Duration::from_millis(300)).await;
        let state = viewer.state().borrow().clone();
        assert_eq!(state.address, "BIT Patna Main Gate");
        assert_ne!(state.address, LOADING_ADDRESS);
        viewer.unmount().await;
    }

    #[tokio::test]
    async fn test_no_reconciliation_after_unmount() {
        let store = Arc::new(MemoryLocationStore::new());
        let resolver = Arc::new(StubResolver::answering("x"));
        let clock = Arc::new(FixedClock::at(NOW));

        let (viewer, mut events) = mount(&store, &resolver, &clock);
        wait_state(&viewer, |s| !s.loading).await;
        wait_subscribed(&store).await;
        let state = viewer.state();

        viewer.unmount().await;
        assert_eq!(store.subscriber_count(), 0);

        store.publish(&record(1.0, 1.0, NOW)).await.unwrap();
        while let Some(event) = events.recv().await {
            if let ViewEvent::Updated(s) = event {
                assert!(!s.is_active());
            }
        }
        assert!(!state.borrow().is_active());
        assert_eq!(resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_cancels_subscription() {
        let store = Arc::new(MemoryLocationStore::new());
        let resolver = Arc::new(StubResolver::answering("x"));
        let clock = Arc::new(FixedClock::at(NOW));

        let (viewer, mut events) = mount(&store, &resolver, &clock);
        wait_subscribed(&store).await;
        drop(viewer);

        tokio::time::timeout(Duration::from_secs(2), async {
            while events.recv().await.is_some() {}
        })
        .await
        .expect("event channel stayed open");
        assert_eq!(store.subscriber_count(), 0);
    }
}
