//! Error types for each collaborator boundary.

use std::time::Duration;

use thiserror::Error;

/// Failures talking to the location store.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// Read, write or subscribe could not reach the store.
    #[error("location store transport error: {0}")]
    Transport(String),

    /// The stored value is not a valid record.
    #[error("malformed record: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Failures reported by a position source.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PositionError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no position within {0:?}")]
    Timeout(Duration),

    #[error("position unavailable: {0}")]
    Unavailable(String),
}

/// Failures of reverse geocoding. Never shown to the user as such.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("address lookup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no address for these coordinates")]
    NoMatch,
}

/// Why a start request was rejected or a sharing session ended.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PublishError {
    #[error("driver name and phone number are required")]
    MissingDriverFields,

    /// The caller has to re-authenticate before sharing.
    #[error("no authenticated user found, please log in again")]
    NotAuthenticated,

    #[error("position source is not available")]
    SourceUnavailable,

    #[error("location sharing is already running")]
    AlreadySharing,

    #[error("error updating location: {0}")]
    Store(#[from] StoreError),

    #[error("geolocation error: {0}")]
    Position(#[from] PositionError),
}
