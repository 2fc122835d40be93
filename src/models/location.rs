use serde::{Deserialize, Serialize};

/// Store key holding the one and only bus location.
pub const LOCATION_KEY: &str = "bus/location";

pub const NO_DRIVER_NAME: &str = "No Driver";
pub const NO_DRIVER_PHONE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Last known bus position as persisted under [`LOCATION_KEY`].
///
/// Field names on the wire are camelCase; `uid` is omitted when unknown.
/// Every publish overwrites the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub lat: f64,
    pub lng: f64,
    pub driver_name: String,
    pub phone_number: String,
    /// Epoch milliseconds of the write.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl LocationRecord {
    pub fn coords(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }
}

/// Name and phone the driver enters before sharing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverProfile {
    pub driver_name: String,
    pub phone_number: String,
}

impl DriverProfile {
    pub fn new(driver_name: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            driver_name: driver_name.into(),
            phone_number: phone_number.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.driver_name.trim().is_empty() && !self.phone_number.trim().is_empty()
    }
}

/// Written to `presence/<uid>` when a driver starts sharing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub is_online: bool,
    pub timestamp: i64,
}

pub fn presence_key(uid: &str) -> String {
    format!("presence/{}", uid)
}

/// The point shown when no driver is actively sharing.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackAnchor {
    pub coords: Coordinates,
    pub label: String,
}

impl Default for FallbackAnchor {
    // BIT Patna main gate
    fn default() -> Self {
        Self {
            coords: Coordinates::new(25.5941, 85.1376),
            label: "BIT Patna Main Gate".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_wire_format() {
        let payload = r#"
        {
            "lat": 25.61,
            "lng": 85.14,
            "driverName": "Ravi",
            "phoneNumber": "9876543210",
            "timestamp": 1764396915000,
            "uid": "drv-1"
        }
        "#;

        let record: LocationRecord = serde_json::from_str(payload).unwrap();
        assert_eq!(record.driver_name, "Ravi");
        assert_eq!(record.phone_number, "9876543210");
        assert_eq!(record.uid.as_deref(), Some("drv-1"));
        assert_eq!(record.coords(), Coordinates::new(25.61, 85.14));
    }

    #[test]
    fn test_record_without_uid() {
        let record = LocationRecord {
            lat: 1.0,
            lng: 2.0,
            driver_name: "A".into(),
            phone_number: "B".into(),
            timestamp: 10,
            uid: None,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("uid").is_none());
        assert_eq!(value["driverName"], "A");

        let back: LocationRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.uid, None);
    }

    #[test]
    fn test_profile_completeness() {
        assert!(DriverProfile::new("Ravi", "123").is_complete());
        assert!(!DriverProfile::new("", "123").is_complete());
        assert!(!DriverProfile::new("Ravi", "  ").is_complete());
    }
}
