use serde::{Deserialize, Deserializer};

use crate::position::PositionSample;

/// Telemetry envelope emitted by the bus GPS unit.
#[derive(Debug, Deserialize)]
pub struct DeviceMessage {
    pub data: Data,
    pub metadata: Metadata,
    pub uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct Data {
    #[serde(rename = "GPS_EPOCH", default, deserialize_with = "parse_i64_option")]
    pub gps_epoch: Option<i64>,
    #[serde(rename = "LATITUD", default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(rename = "LONGITUD", default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    #[serde(rename = "FIX_")]
    pub fix: Option<String>,
    #[serde(rename = "SATELLITES", default, deserialize_with = "parse_i64_option")]
    pub satellites: Option<i64>,
    #[serde(rename = "DEVICE_ID")]
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Metadata {
    #[serde(rename = "DEVICE_ID")]
    pub device_id: Option<String>,
    #[serde(rename = "RECEIVED_EPOCH")]
    pub received_epoch: Option<i64>,
}

impl DeviceMessage {
    pub fn get_device_id(&self) -> Option<&String> {
        self.data.device_id.as_ref().or(self.metadata.device_id.as_ref())
    }

    /// True when the unit reported a satellite fix.
    pub fn has_fix(&self) -> bool {
        match self.data.fix.as_deref().map(str::trim) {
            Some("1") => true,
            Some(_) => false,
            None => self.data.satellites.unwrap_or(0) > 0,
        }
    }

    /// Epoch milliseconds at which the fix was taken, falling back to broker receipt.
    pub fn recorded_at(&self) -> Option<i64> {
        self.data
            .gps_epoch
            .map(|secs| secs * 1000)
            .or(self.metadata.received_epoch)
    }

    /// Coordinates of this message, if both are present.
    pub fn to_sample(&self) -> Option<PositionSample> {
        let lat = self.data.latitude?;
        let lng = self.data.longitude?;
        Some(PositionSample {
            lat,
            lng,
            recorded_at: self.recorded_at(),
        })
    }
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

fn parse_i64_option<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    let v: Option<StringOrInt> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrInt::Int(i)) => Ok(Some(i)),
        Some(StringOrInt::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<i64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_device_payload() {
        let payload = r#"
        {
            "data": {
                "COURSE": "0.00",
                "DEVICE_ID": "0848086072",
                "FIX_": "1",
                "GPS_DATETIME": "2025-11-29 06:15:15",
                "GPS_EPOCH": "1764396915",
                "LATITUD": "+25.594100",
                "LONGITUD": "85.137600",
                "SATELLITES": "9",
                "SPEED": "0.00"
            },
            "metadata": {
                "BYTES": 188,
                "RECEIVED_EPOCH": 1764398681920,
                "WORKER_ID": 3
            },
            "uuid": "d52b1454-d43d-50fa-99ca-79515c904162"
        }
        "#;

        let msg: DeviceMessage = serde_json::from_str(payload).unwrap();
        assert_eq!(msg.get_device_id().map(String::as_str), Some("0848086072"));
        assert!(msg.has_fix());

        let sample = msg.to_sample().unwrap();
        assert_eq!(sample.lat, 25.5941);
        assert_eq!(sample.lng, 85.1376);
        assert_eq!(sample.recorded_at, Some(1_764_396_915_000));
    }

    #[test]
    fn test_missing_coordinates_and_fix() {
        let payload = r#"
        {
            "data": { "LATITUD": "", "LONGITUD": "85.1", "FIX_": "0" },
            "metadata": { "DEVICE_ID": "abc", "RECEIVED_EPOCH": 42 },
            "uuid": "x"
        }
        "#;

        let msg: DeviceMessage = serde_json::from_str(payload).unwrap();
        assert_eq!(msg.get_device_id().map(String::as_str), Some("abc"));
        assert!(!msg.has_fix());
        assert!(msg.to_sample().is_none());
        assert_eq!(msg.recorded_at(), Some(42));
    }
}
