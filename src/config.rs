use anyhow::{bail, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::location::{Coordinates, DriverProfile, FallbackAnchor, LOCATION_KEY};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Viewer,
}

impl Role {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "driver" => Ok(Role::Driver),
            "viewer" | "student" => Ok(Role::Viewer),
            other => bail!("Unknown APP_ROLE '{}', expected 'driver' or 'viewer'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub role: Role,
    pub database_url: String,
    pub location_key: String,
    pub store_notify_channel: String,
    pub kafka_bootstrap_servers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub position_device_id: Option<String>,
    pub position_timeout_ms: u64,
    pub geocoder_url: String,
    pub geocoder_user_agent: String,
    pub fallback_lat: f64,
    pub fallback_lng: f64,
    pub fallback_label: String,
    pub driver_name: String,
    pub driver_phone: String,
    pub auth_uid: Option<String>,
    pub auth_email: Option<String>,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let role = Role::parse(&env::var("APP_ROLE").unwrap_or_else(|_| "viewer".to_string()))?;

        let db_host = env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
        let db_name = env::var("DB_DATABASE").unwrap_or_else(|_| "campus_bus".to_string());
        let db_user = env::var("DB_USER").unwrap_or_else(|_| "bus".to_string());
        let db_pwd = env::var("DB_PWD").unwrap_or_else(|_| "bus".to_string());

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let location_key = env::var("LOCATION_KEY").unwrap_or_else(|_| LOCATION_KEY.to_string());
        let store_notify_channel =
            env::var("STORE_NOTIFY_CHANNEL").unwrap_or_else(|_| "realtime_store_changes".to_string());

        let kafka_bootstrap_servers =
            env::var("KAFKA_BOOTSTRAP_SERVERS").unwrap_or_else(|_| "localhost:9092".to_string());
        let kafka_topic = env::var("KAFKA_TOPIC").unwrap_or_else(|_| "bus-gps".to_string());
        let kafka_group_id =
            env::var("KAFKA_GROUP_ID").unwrap_or_else(|_| "campus-bus-driver".to_string());
        let kafka_sasl_mechanism =
            env::var("KAFKA_SASL_MECHANISM").unwrap_or_else(|_| "SCRAM-SHA-256".to_string());
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol =
            env::var("KAFKA_SECURITY_PROTOCOL").unwrap_or_else(|_| "SASL_PLAINTEXT".to_string());

        let position_device_id = non_empty("POSITION_DEVICE_ID");
        let position_timeout_ms = env::var("POSITION_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .unwrap_or(5000);

        let geocoder_url = env::var("GEOCODER_URL")
            .unwrap_or_else(|_| "https://nominatim.openstreetmap.org".to_string());
        let geocoder_user_agent = env::var("GEOCODER_USER_AGENT")
            .unwrap_or_else(|_| format!("campus-bus-tracker/{}", env!("CARGO_PKG_VERSION")));

        let default_anchor = FallbackAnchor::default();
        let fallback_lat = env::var("FALLBACK_LAT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_anchor.coords.lat);
        let fallback_lng = env::var("FALLBACK_LNG")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_anchor.coords.lng);
        let fallback_label = env::var("FALLBACK_LABEL").unwrap_or(default_anchor.label);

        let driver_name = env::var("DRIVER_NAME").unwrap_or_default();
        let driver_phone = env::var("DRIVER_PHONE").unwrap_or_default();
        let auth_uid = non_empty("AUTH_UID");
        let auth_email = non_empty("AUTH_EMAIL");

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            role,
            database_url,
            location_key,
            store_notify_channel,
            kafka_bootstrap_servers,
            kafka_topic,
            kafka_group_id,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            position_device_id,
            position_timeout_ms,
            geocoder_url,
            geocoder_user_agent,
            fallback_lat,
            fallback_lng,
            fallback_label,
            driver_name,
            driver_phone,
            auth_uid,
            auth_email,
            log_level,
        })
    }

    pub fn fallback_anchor(&self) -> FallbackAnchor {
        FallbackAnchor {
            coords: Coordinates::new(self.fallback_lat, self.fallback_lng),
            label: self.fallback_label.clone(),
        }
    }

    pub fn position_timeout(&self) -> Duration {
        Duration::from_millis(self.position_timeout_ms)
    }

    pub fn driver_profile(&self) -> DriverProfile {
        DriverProfile::new(self.driver_name.trim(), self.driver_phone.trim())
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::parse("driver").unwrap(), Role::Driver);
        assert_eq!(Role::parse(" Viewer ").unwrap(), Role::Viewer);
        assert_eq!(Role::parse("student").unwrap(), Role::Viewer);
        assert!(Role::parse("admin").is_err());
    }
}
