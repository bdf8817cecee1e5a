//! Core types for the playlock DRM client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// License state of a protected asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// Not known to the registry (or explicitly removed)
    Unregistered,
    /// Registration or renewal in progress, license not yet acquired
    Registering,
    /// Valid license held
    Licensed,
    /// License held but its time window has elapsed
    LicenseExpired,
    /// Last acquisition attempt failed and no usable license is held
    Failed,
}

impl AssetStatus {
    /// Returns true if the transition to `next` is allowed.
    ///
    /// `Licensed -> Registering` is only reachable through the explicit
    /// renewal entry point; see [`crate::registry::AssetRegistry::begin_renewal`].
    pub fn can_transition_to(&self, next: AssetStatus) -> bool {
        use AssetStatus::*;
        match (self, next) {
            // Explicit unregister is allowed from anywhere
            (_, Unregistered) => true,
            (Unregistered, Registering) => true,
            (Registering, Licensed) | (Registering, Failed) => true,
            // Held license ages out
            (Licensed, LicenseExpired) => true,
            // Renewal re-enters acquisition
            (LicenseExpired, Registering) => true,
            (Failed, Registering) => true,
            // Guarded: only begin_renewal may take this edge
            (Licensed, Registering) => false,
            _ => false,
        }
    }

    /// Returns true if a usable license is currently held.
    pub fn is_playable(&self) -> bool {
        matches!(self, AssetStatus::Licensed)
    }
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetStatus::Unregistered => write!(f, "unregistered"),
            AssetStatus::Registering => write!(f, "registering"),
            AssetStatus::Licensed => write!(f, "licensed"),
            AssetStatus::LicenseExpired => write!(f, "license-expired"),
            AssetStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Why a license acquisition attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Transient transport failure (retried before surfacing)
    Network,
    /// The license server rejected the request
    Denied,
    /// The server response could not be parsed
    Malformed,
    /// The license or purchase window has elapsed
    Expired,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Network => write!(f, "network"),
            FailureReason::Denied => write!(f, "denied"),
            FailureReason::Malformed => write!(f, "malformed"),
            FailureReason::Expired => write!(f, "expired"),
        }
    }
}

/// Point-in-time view of a registered asset.
///
/// Snapshots are immutable copies; they are handed to callers and carried in
/// [`crate::events::DrmEvent::AssetStatus`] events. Mutating the registry
/// does not affect snapshots already taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSnapshot {
    /// Asset identifier (unique key)
    pub asset_uri: Url,
    /// License service endpoint for this asset
    pub license_uri: Url,
    /// Local content path, if the asset has been downloaded
    pub local_path: Option<PathBuf>,
    /// Current license state
    pub status: AssetStatus,
    /// License expiry, if a license has been acquired
    pub license_expiry: Option<DateTime<Utc>>,
    /// Purchase-window expiry; independent of the license expiry because a
    /// rental window and its playback license may end at different times
    pub purchase_expiry: Option<DateTime<Utc>>,
    /// When the registry last verified this record against the license
    pub last_verified: DateTime<Utc>,
}

impl AssetSnapshot {
    /// Time remaining on the license, clamped to zero once expired.
    pub fn license_time_remaining(&self) -> Duration {
        Self::remaining(self.license_expiry)
    }

    /// Time remaining in the purchase window, clamped to zero once elapsed.
    pub fn purchase_time_remaining(&self) -> Duration {
        Self::remaining(self.purchase_expiry)
    }

    /// Returns true if a license was acquired but its window has elapsed.
    pub fn is_license_expired(&self) -> bool {
        match self.license_expiry {
            Some(expiry) => expiry <= Utc::now(),
            None => false,
        }
    }

    fn remaining(expiry: Option<DateTime<Utc>>) -> Duration {
        match expiry {
            Some(expiry) => (expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }
}

/// Retry policy for transient license-service failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the initial request
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent attempt
    pub base_delay: Duration,
    /// Upper bound on the backoff delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Exponential backoff delay before retry `attempt` (1-based).
    /// Attempt 0 is the initial request and carries no delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential = self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1));
        exponential.min(self.max_delay)
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for a playback call to observe a terminal license event
    pub play_deadline: Duration,
    /// Age beyond which a cached asset status is re-verified on check
    pub status_ttl: Duration,
    /// Per-request timeout for license service round trips
    pub request_timeout: Duration,
    /// Retry policy for transient license-service failures
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            play_deadline: Duration::from_secs(30),
            status_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn snapshot_with_expiry(
        license_expiry: Option<DateTime<Utc>>,
        purchase_expiry: Option<DateTime<Utc>>,
    ) -> AssetSnapshot {
        AssetSnapshot {
            asset_uri: Url::parse("https://cdn.example.com/a1.wvm").unwrap(),
            license_uri: Url::parse("https://lic.example.com/a1").unwrap(),
            local_path: None,
            status: AssetStatus::Licensed,
            license_expiry,
            purchase_expiry,
            last_verified: Utc::now(),
        }
    }

    #[test]
    fn test_status_transitions() {
        use AssetStatus::*;

        assert!(Unregistered.can_transition_to(Registering));
        assert!(Registering.can_transition_to(Licensed));
        assert!(Registering.can_transition_to(Failed));
        assert!(Licensed.can_transition_to(LicenseExpired));
        assert!(LicenseExpired.can_transition_to(Registering));
        assert!(Failed.can_transition_to(Registering));
        assert!(Licensed.can_transition_to(Unregistered));
        assert!(Registering.can_transition_to(Unregistered));

        // Licensed never silently re-enters acquisition
        assert!(!Licensed.can_transition_to(Registering));
        assert!(!Unregistered.can_transition_to(Licensed));
        assert!(!Failed.can_transition_to(Licensed));
    }

    #[test]
    fn test_license_time_remaining_future_expiry() {
        let snapshot = snapshot_with_expiry(Some(Utc::now() + TimeDelta::seconds(3600)), None);
        let remaining = snapshot.license_time_remaining();
        assert!(remaining > Duration::from_secs(3590));
        assert!(remaining <= Duration::from_secs(3600));
    }

    #[test]
    fn test_license_time_remaining_past_expiry_is_zero() {
        let snapshot = snapshot_with_expiry(Some(Utc::now() - TimeDelta::seconds(60)), None);
        assert_eq!(snapshot.license_time_remaining(), Duration::ZERO);
        assert!(snapshot.is_license_expired());
    }

    #[test]
    fn test_purchase_time_remaining_independent_of_license() {
        let snapshot = snapshot_with_expiry(
            Some(Utc::now() - TimeDelta::seconds(60)),
            Some(Utc::now() + TimeDelta::seconds(600)),
        );
        assert_eq!(snapshot.license_time_remaining(), Duration::ZERO);
        assert!(snapshot.purchase_time_remaining() > Duration::from_secs(590));
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_policy_backoff_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(31), Duration::from_secs(8));
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.play_deadline, Duration::from_secs(30));
        assert_eq!(config.status_ttl, Duration::from_secs(3600));
        assert_eq!(config.retry.max_retries, 3);
    }
}
