use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Latest liveness beacon published by a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    /// Beacon creation time in unix milliseconds.
    pub created_at_millis: u64,
    /// True when the beacon exists but is older than the freshness bound.
    pub stale: bool,
    /// Human-readable name announced by the destination.
    pub name: Option<String>,
}

/// Looks up the freshest beacon for a destination.
#[async_trait]
pub trait BeaconSource: Send + Sync {
    /// Fetch the latest beacon of `pubkey` published on `relays` within `max_age`.
    async fn fetch_beacon(
        &self,
        pubkey: &str,
        relays: &[String],
        max_age: Duration,
    ) -> Result<Option<Beacon>>;
}

/// Beacon source that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBeacons;

#[async_trait]
impl BeaconSource for NoBeacons {
    async fn fetch_beacon(
        &self,
        _pubkey: &str,
        _relays: &[String],
        _max_age: Duration,
    ) -> Result<Option<Beacon>> {
        Ok(None)
    }
}
