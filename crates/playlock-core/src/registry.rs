//! Durable record of known protected assets and their license state
//!
//! The registry owns all asset records. Mutation happens only through the
//! operations below, under a single-writer/multiple-reader lock. Status
//! transitions are guarded: a record never regresses from `Licensed` to
//! `Registering` except through [`AssetRegistry::begin_renewal`].

use crate::types::{AssetSnapshot, AssetStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

/// Mutable registry record; callers only ever see [`AssetSnapshot`] copies.
#[derive(Debug, Clone)]
struct AssetRecord {
    asset_uri: Url,
    license_uri: Url,
    local_path: Option<PathBuf>,
    status: AssetStatus,
    license_expiry: Option<DateTime<Utc>>,
    purchase_expiry: Option<DateTime<Utc>>,
    last_verified: DateTime<Utc>,
}

impl AssetRecord {
    fn snapshot(&self) -> AssetSnapshot {
        AssetSnapshot {
            asset_uri: self.asset_uri.clone(),
            license_uri: self.license_uri.clone(),
            local_path: self.local_path.clone(),
            status: self.status,
            license_expiry: self.license_expiry,
            purchase_expiry: self.purchase_expiry,
            last_verified: self.last_verified,
        }
    }

    fn holds_valid_license(&self) -> bool {
        match self.license_expiry {
            Some(expiry) => expiry > Utc::now(),
            None => false,
        }
    }
}

/// Registry of protected assets, keyed by asset URI
#[derive(Clone, Default)]
pub struct AssetRegistry {
    assets: Arc<RwLock<HashMap<String, AssetRecord>>>,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record in `Registering`, or return the existing one.
    ///
    /// Idempotent: re-registering an identical asset returns the existing
    /// record without re-entering acquisition. A record in `Failed` or
    /// `LicenseExpired` re-enters `Registering`. The returned flag is true
    /// when a new acquisition should be started.
    pub async fn register(
        &self,
        asset_uri: &Url,
        license_uri: &Url,
        local_path: Option<PathBuf>,
    ) -> (AssetSnapshot, bool) {
        let mut assets = self.assets.write().await;
        match assets.get_mut(asset_uri.as_str()) {
            Some(record) => {
                record.license_uri = license_uri.clone();
                if let Some(path) = local_path {
                    record.local_path = Some(path);
                }
                let needs_acquisition = record.status.can_transition_to(AssetStatus::Registering);
                if needs_acquisition {
                    record.status = AssetStatus::Registering;
                }
                (record.snapshot(), needs_acquisition)
            }
            None => {
                let record = AssetRecord {
                    asset_uri: asset_uri.clone(),
                    license_uri: license_uri.clone(),
                    local_path,
                    status: AssetStatus::Registering,
                    license_expiry: None,
                    purchase_expiry: None,
                    last_verified: Utc::now(),
                };
                let snapshot = record.snapshot();
                assets.insert(asset_uri.as_str().to_string(), record);
                debug!(asset = %asset_uri, "Asset registered");
                (snapshot, true)
            }
        }
    }

    /// Explicit renewal entry point: re-enters `Registering` from any held
    /// state, preserving the local content path.
    ///
    /// Returns `None` if the asset is unknown.
    pub async fn begin_renewal(
        &self,
        asset_uri: &Url,
        license_uri: &Url,
    ) -> Option<AssetSnapshot> {
        let mut assets = self.assets.write().await;
        let record = assets.get_mut(asset_uri.as_str())?;
        record.license_uri = license_uri.clone();
        record.status = AssetStatus::Registering;
        Some(record.snapshot())
    }

    /// Apply a successful acquisition: `Licensed`, expiries max-merged so
    /// they never decrease across renewals.
    ///
    /// Returns `None` when the result must be discarded (asset removed or no
    /// longer in `Registering` at delivery time).
    pub async fn apply_license(
        &self,
        asset_uri: &Url,
        license_expiry: Option<DateTime<Utc>>,
        purchase_expiry: Option<DateTime<Utc>>,
    ) -> Option<AssetSnapshot> {
        let mut assets = self.assets.write().await;
        let record = assets.get_mut(asset_uri.as_str())?;
        if record.status != AssetStatus::Registering {
            debug!(asset = %asset_uri, status = %record.status, "Stale license result discarded");
            return None;
        }
        record.status = AssetStatus::Licensed;
        record.license_expiry = max_merge(record.license_expiry, license_expiry);
        record.purchase_expiry = max_merge(record.purchase_expiry, purchase_expiry);
        record.last_verified = Utc::now();
        Some(record.snapshot())
    }

    /// Apply a failed acquisition: revert to `Licensed` while a still-valid
    /// license is held, otherwise `Failed`. Never leaves `Registering`
    /// behind.
    pub async fn apply_failure(&self, asset_uri: &Url) -> Option<AssetSnapshot> {
        let mut assets = self.assets.write().await;
        let record = assets.get_mut(asset_uri.as_str())?;
        if record.status != AssetStatus::Registering {
            debug!(asset = %asset_uri, status = %record.status, "Stale failure result discarded");
            return None;
        }
        record.status = if record.holds_valid_license() {
            AssetStatus::Licensed
        } else {
            AssetStatus::Failed
        };
        record.last_verified = Utc::now();
        Some(record.snapshot())
    }

    /// Mark an asset `Failed` outside an acquisition attempt (missing local
    /// content, vanished license material).
    pub async fn mark_failed(&self, asset_uri: &Url) -> Option<AssetSnapshot> {
        let mut assets = self.assets.write().await;
        let record = assets.get_mut(asset_uri.as_str())?;
        record.status = AssetStatus::Failed;
        record.last_verified = Utc::now();
        Some(record.snapshot())
    }

    /// Record the local content path for an asset.
    pub async fn set_local_path(&self, asset_uri: &Url, path: PathBuf) -> Option<AssetSnapshot> {
        let mut assets = self.assets.write().await;
        let record = assets.get_mut(asset_uri.as_str())?;
        record.local_path = Some(path);
        Some(record.snapshot())
    }

    /// Remove an asset. The returned snapshot carries `Unregistered`.
    pub async fn remove(&self, asset_uri: &Url) -> Option<AssetSnapshot> {
        let mut assets = self.assets.write().await;
        let mut record = assets.remove(asset_uri.as_str())?;
        record.status = AssetStatus::Unregistered;
        Some(record.snapshot())
    }

    /// Read-only snapshot of a record.
    pub async fn get(&self, asset_uri: &Url) -> Option<AssetSnapshot> {
        let assets = self.assets.read().await;
        assets.get(asset_uri.as_str()).map(AssetRecord::snapshot)
    }

    /// Snapshot with expiry demotion applied: a `Licensed` record whose
    /// license window has elapsed becomes `LicenseExpired` first.
    pub async fn effective(&self, asset_uri: &Url) -> Option<AssetSnapshot> {
        let mut assets = self.assets.write().await;
        let record = assets.get_mut(asset_uri.as_str())?;
        if record.status == AssetStatus::Licensed && !record.holds_valid_license() {
            warn!(asset = %asset_uri, "License expired");
            record.status = AssetStatus::LicenseExpired;
        }
        Some(record.snapshot())
    }

    pub async fn contains(&self, asset_uri: &Url) -> bool {
        self.assets.read().await.contains_key(asset_uri.as_str())
    }

    /// True if the record has not been verified within `ttl`.
    pub async fn is_stale(&self, asset_uri: &Url, ttl: Duration) -> bool {
        let assets = self.assets.read().await;
        match assets.get(asset_uri.as_str()) {
            Some(record) => {
                let age = Utc::now() - record.last_verified;
                age.to_std().map(|age| age > ttl).unwrap_or(false)
            }
            None => false,
        }
    }

    /// Refresh the last-verified instant after a successful verification.
    pub async fn mark_verified(&self, asset_uri: &Url) {
        let mut assets = self.assets.write().await;
        if let Some(record) = assets.get_mut(asset_uri.as_str()) {
            record.last_verified = Utc::now();
        }
    }

    /// Snapshots of every registered asset.
    pub async fn snapshots(&self) -> Vec<AssetSnapshot> {
        let assets = self.assets.read().await;
        assets.values().map(AssetRecord::snapshot).collect()
    }

    pub async fn len(&self) -> usize {
        self.assets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.assets.read().await.is_empty()
    }
}

impl std::fmt::Debug for AssetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRegistry").finish_non_exhaustive()
    }
}

fn max_merge(
    current: Option<DateTime<Utc>>,
    incoming: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (current, incoming) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn asset() -> Url {
        Url::parse("https://cdn.example.com/a1.wvm").unwrap()
    }

    fn license() -> Url {
        Url::parse("https://lic.example.com/a1").unwrap()
    }

    #[tokio::test]
    async fn test_register_creates_registering_record() {
        let registry = AssetRegistry::new();
        let (snapshot, created) = registry.register(&asset(), &license(), None).await;
        assert!(created);
        assert_eq!(snapshot.status, AssetStatus::Registering);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = AssetRegistry::new();
        let (_, first) = registry.register(&asset(), &license(), None).await;
        let (snapshot, second) = registry.register(&asset(), &license(), None).await;
        assert!(first);
        // Already registering: no second acquisition
        assert!(!second);
        assert_eq!(snapshot.status, AssetStatus::Registering);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_does_not_restart_licensed_asset() {
        let registry = AssetRegistry::new();
        registry.register(&asset(), &license(), None).await;
        registry
            .apply_license(&asset(), Some(Utc::now() + TimeDelta::hours(1)), None)
            .await
            .unwrap();

        let (snapshot, needs_acquisition) = registry.register(&asset(), &license(), None).await;
        assert!(!needs_acquisition);
        assert_eq!(snapshot.status, AssetStatus::Licensed);
    }

    #[tokio::test]
    async fn test_begin_renewal_requires_existing_asset() {
        let registry = AssetRegistry::new();
        assert!(registry.begin_renewal(&asset(), &license()).await.is_none());
    }

    #[tokio::test]
    async fn test_begin_renewal_preserves_local_path() {
        let registry = AssetRegistry::new();
        registry
            .register(&asset(), &license(), Some(PathBuf::from("/media/a1.wvm")))
            .await;
        registry.apply_license(&asset(), None, None).await;

        let snapshot = registry.begin_renewal(&asset(), &license()).await.unwrap();
        assert_eq!(snapshot.status, AssetStatus::Registering);
        assert_eq!(snapshot.local_path, Some(PathBuf::from("/media/a1.wvm")));
    }

    #[tokio::test]
    async fn test_apply_license_merges_expiry_monotonically() {
        let registry = AssetRegistry::new();
        let later = Utc::now() + TimeDelta::hours(2);
        let earlier = Utc::now() + TimeDelta::hours(1);

        registry.register(&asset(), &license(), None).await;
        registry.apply_license(&asset(), Some(later), None).await.unwrap();

        // A renewal that returns an earlier expiry never shortens the window
        registry.begin_renewal(&asset(), &license()).await.unwrap();
        let snapshot = registry
            .apply_license(&asset(), Some(earlier), None)
            .await
            .unwrap();
        assert_eq!(snapshot.license_expiry, Some(later));
    }

    #[tokio::test]
    async fn test_apply_license_discarded_for_removed_asset() {
        let registry = AssetRegistry::new();
        registry.register(&asset(), &license(), None).await;
        registry.remove(&asset()).await.unwrap();
        assert!(registry.apply_license(&asset(), None, None).await.is_none());
    }

    #[tokio::test]
    async fn test_apply_failure_without_license_is_failed() {
        let registry = AssetRegistry::new();
        registry.register(&asset(), &license(), None).await;
        let snapshot = registry.apply_failure(&asset()).await.unwrap();
        assert_eq!(snapshot.status, AssetStatus::Failed);
    }

    #[tokio::test]
    async fn test_apply_failure_reverts_to_valid_license() {
        let registry = AssetRegistry::new();
        registry.register(&asset(), &license(), None).await;
        registry
            .apply_license(&asset(), Some(Utc::now() + TimeDelta::hours(1)), None)
            .await
            .unwrap();

        // Renewal fails while the previous license is still good
        registry.begin_renewal(&asset(), &license()).await.unwrap();
        let snapshot = registry.apply_failure(&asset()).await.unwrap();
        assert_eq!(snapshot.status, AssetStatus::Licensed);
    }

    #[tokio::test]
    async fn test_effective_demotes_expired_license() {
        let registry = AssetRegistry::new();
        registry.register(&asset(), &license(), None).await;
        registry
            .apply_license(&asset(), Some(Utc::now() - TimeDelta::seconds(1)), None)
            .await;

        // apply_license set Licensed even though the expiry already passed;
        // the effective view demotes it
        let snapshot = registry.effective(&asset()).await.unwrap();
        assert_eq!(snapshot.status, AssetStatus::LicenseExpired);
    }

    #[tokio::test]
    async fn test_remove_yields_unregistered_snapshot() {
        let registry = AssetRegistry::new();
        registry.register(&asset(), &license(), None).await;
        let snapshot = registry.remove(&asset()).await.unwrap();
        assert_eq!(snapshot.status, AssetStatus::Unregistered);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_staleness() {
        let registry = AssetRegistry::new();
        registry.register(&asset(), &license(), None).await;
        assert!(!registry.is_stale(&asset(), Duration::from_secs(60)).await);
        assert!(registry.is_stale(&asset(), Duration::ZERO).await);
    }
}
