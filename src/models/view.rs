use chrono::{Local, TimeZone};

use super::location::Coordinates;

pub const LOADING_ADDRESS: &str = "Loading address...";
pub const UNKNOWN_ADDRESS: &str = "Unknown location";

/// What a viewer actually shows: the driver's position when active, the
/// fallback anchor otherwise. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayedLocation {
    pub coords: Coordinates,
    pub active: bool,
    pub driver_name: String,
    pub phone_number: String,
    pub timestamp: i64,
    pub uid: Option<String>,
}

/// Snapshot handed to renderers after every change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewState {
    pub displayed: Option<DisplayedLocation>,
    pub address: String,
    /// Dismissible error banner.
    pub banner: Option<String>,
    pub loading: bool,
    pub fallback_label: String,
}

impl ViewState {
    pub fn loading(fallback_label: &str) -> Self {
        Self {
            loading: true,
            fallback_label: fallback_label.to_string(),
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.displayed.as_ref().is_some_and(|d| d.active)
    }

    /// One-line status shown above the map.
    pub fn status_line(&self) -> String {
        if self.is_active() {
            format!("Active | Current Location: {}", self.address)
        } else {
            format!("Inactive | No active driver. Bus is at {}", self.fallback_label)
        }
    }

    /// Full text summary shown under the map.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(banner) = &self.banner {
            lines.push(format!("Error: {}", banner));
        }
        if self.loading {
            lines.push("Loading bus location...".to_string());
            return lines;
        }

        lines.push(self.status_line());
        match &self.displayed {
            Some(d) if d.active => {
                lines.push(format!("Driver: {}", d.driver_name));
                lines.push(format!("Contact: {}", d.phone_number));
                lines.push(format!("Last Updated: {}", format_local_time(d.timestamp)));
                lines.push(format!("Address: {}", self.address));
            }
            Some(_) => lines.push(format!(
                "No active driver at this time. Bus is parked at {}.",
                self.fallback_label
            )),
            None => lines.push("No active bus location available".to_string()),
        }
        lines
    }
}

fn format_local_time(epoch_ms: i64) -> String {
    match Local.timestamp_millis_opt(epoch_ms).single() {
        Some(t) => t.format("%H:%M:%S").to_string(),
        None => "unknown".to_string(),
    }
}
