use tracing::{debug, info};

use crate::error::ResolveError;
use crate::models::location::{
    Coordinates, FallbackAnchor, LocationRecord, NO_DRIVER_NAME, NO_DRIVER_PHONE,
};
use crate::models::view::{DisplayedLocation, ViewState, LOADING_ADDRESS, UNKNOWN_ADDRESS};
use crate::processor::liveness;

/// Outcome of feeding one raw record through the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub displayed: DisplayedLocation,
    /// The map should move to `displayed.coords`.
    pub recenter: bool,
    /// An address lookup should be issued for these coordinates.
    pub resolve_address: Option<Coordinates>,
    /// Short notice for an active incremental update.
    pub announce: Option<String>,
}

/// Turns raw store state into what a viewer shows.
///
/// Owns the displayed location of exactly one view. Inputs arrive one at a
/// time from the owning task, so there is no interior locking.
#[derive(Debug)]
pub struct Reconciler {
    fallback: FallbackAnchor,
    state: ViewState,
}

impl Reconciler {
    pub fn new(fallback: FallbackAnchor) -> Self {
        let state = ViewState::loading(&fallback.label);
        Self { fallback, state }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// Reconciles the current record, or its absence, at `now`.
    ///
    /// `incremental` is false for the initial point-in-time read and true for
    /// subscription pushes; it only affects the announcement.
    pub fn reconcile(
        &mut self,
        record: Option<LocationRecord>,
        now: i64,
        incremental: bool,
    ) -> Reconciliation {
        let previous = self.state.displayed.take();

        let displayed = match record {
            None => DisplayedLocation {
                coords: self.fallback.coords,
                active: false,
                driver_name: NO_DRIVER_NAME.to_string(),
                phone_number: NO_DRIVER_PHONE.to_string(),
                timestamp: now,
                uid: None,
            },
            Some(r) => {
                let active = liveness::is_active(r.timestamp, now);
                let coords = if active { r.coords() } else { self.fallback.coords };
                DisplayedLocation {
                    coords,
                    active,
                    driver_name: r.driver_name,
                    phone_number: r.phone_number,
                    timestamp: r.timestamp,
                    uid: r.uid,
                }
            }
        };

        let moved = previous.as_ref().map(|p| p.coords) != Some(displayed.coords);
        let became_active = displayed.active && !previous.as_ref().is_some_and(|p| p.active);

        let resolve_address = if displayed.active && (moved || became_active) {
            self.state.address = LOADING_ADDRESS.to_string();
            Some(displayed.coords)
        } else {
            if !displayed.active {
                self.state.address = self.fallback.label.clone();
            }
            None
        };

        let announce = (incremental && displayed.active)
            .then(|| format!("Driver {} location updated", displayed.driver_name));

        debug!(
            active = displayed.active,
            lat = displayed.coords.lat,
            lng = displayed.coords.lng,
            recenter = moved,
            "Reconciled location"
        );

        self.state.displayed = Some(displayed.clone());
        self.state.loading = false;

        Reconciliation {
            displayed,
            recenter: moved,
            resolve_address,
            announce,
        }
    }

    /// Applies a finished address lookup for `coords`.
    ///
    /// Returns false when the answer is for a position no longer displayed.
    pub fn apply_address(&mut self, coords: Coordinates, result: Result<String, ResolveError>) -> bool {
        match &self.state.displayed {
            Some(d) if d.active && d.coords == coords => {}
            _ => {
                debug!(lat = coords.lat, lng = coords.lng, "Discarding superseded address lookup");
                return false;
            }
        }

        self.state.address = match result {
            Ok(address) => address,
            Err(e) => {
                info!("Address lookup for {}, {} degraded: {}", coords.lat, coords.lng, e);
                UNKNOWN_ADDRESS.to_string()
            }
        };
        true
    }

    /// Shows a transport failure without touching the displayed location.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.state.banner = Some(message.into());
        self.state.loading = false;
    }

    pub fn dismiss_error(&mut self) {
        self.state.banner = None;
    }
}
