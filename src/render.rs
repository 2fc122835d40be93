use tracing::{info, warn};

use crate::models::location::Coordinates;
use crate::models::view::ViewState;
use crate::viewer::ViewEvent;

pub const DEFAULT_ZOOM: u8 = 15;

/// Draws the bus marker and moves the map. Tile rendering lives elsewhere.
pub trait MapRenderer {
    fn render(&mut self, state: &ViewState);

    fn recenter(&mut self, coords: Coordinates, zoom: u8);

    fn notify(&mut self, message: &str);
}

/// Routes one viewer event to the renderer.
pub fn dispatch(renderer: &mut dyn MapRenderer, event: ViewEvent) {
    match event {
        ViewEvent::Updated(state) => renderer.render(&state),
        ViewEvent::Recenter(coords) => renderer.recenter(coords, DEFAULT_ZOOM),
        ViewEvent::Notice(message) => renderer.notify(&message),
    }
}

/// Headless renderer: logs the marker and prints the text summary.
#[derive(Debug, Default)]
pub struct LogRenderer {
    last_summary: Vec<String>,
}

impl MapRenderer for LogRenderer {
    fn render(&mut self, state: &ViewState) {
        if let Some(banner) = &state.banner {
            warn!("{}", banner);
        }
        if let Some(d) = &state.displayed {
            info!(
                lat = d.coords.lat,
                lng = d.coords.lng,
                active = d.active,
                driver = %d.driver_name,
                driver_uid = ?d.uid,
                "Bus marker at {:.6}, {:.6}",
                d.coords.lat,
                d.coords.lng
            );
        }

        let summary = state.summary();
        if summary != self.last_summary {
            for line in &summary {
                println!("{}", line);
            }
            self.last_summary = summary;
        }
    }

    fn recenter(&mut self, coords: Coordinates, zoom: u8) {
        info!("Map view set to {:.6}, {:.6} at zoom {}", coords.lat, coords.lng, zoom);
    }

    fn notify(&mut self, message: &str) {
        info!("Location Updated: {}", message);
    }
}
