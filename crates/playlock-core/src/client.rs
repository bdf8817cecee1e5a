//! DRM client - main orchestrator for the license lifecycle
//!
//! Coordinates:
//! - Asset registration, renewal, and unregistration
//! - License acquisition through the license manager
//! - Event delivery to per-asset subscribers
//! - Playback URL resolution for remote and local assets
//!
//! One `DrmClient` is constructed at process start and passed by reference;
//! there is no global instance.

use crate::error::{Error, Result};
use crate::events::{DrmEvent, EventBus};
use crate::license::{
    HttpLicenseService, LicenseManager, LicenseService, OutcomeReceiver, TerminalOutcome,
};
use crate::registry::AssetRegistry;
use crate::storage::{LicenseStore, MemoryLicenseStore};
use crate::types::{AssetSnapshot, AssetStatus, ClientConfig};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};
use url::Url;

/// DRM content-protection client.
///
/// Registers protected assets, drives their license lifecycle, and resolves
/// playback URLs once a license is held. All operations are non-blocking;
/// license round trips run on spawned tasks and report through per-asset
/// events.
pub struct DrmClient {
    config: ClientConfig,
    registry: AssetRegistry,
    bus: EventBus,
    manager: LicenseManager,
    store: Arc<dyn LicenseStore>,
}

impl DrmClient {
    /// Create a client backed by the HTTP license service and an in-memory
    /// license store. Embedders with a platform secure store should use
    /// [`DrmClient::with_parts`].
    pub fn new(config: ClientConfig) -> Self {
        let service = Arc::new(HttpLicenseService::new(config.request_timeout));
        Self::with_parts(config, service, Arc::new(MemoryLicenseStore::new()))
    }

    /// Create a client over explicit license-service and store
    /// implementations.
    pub fn with_parts(
        config: ClientConfig,
        service: Arc<dyn LicenseService>,
        store: Arc<dyn LicenseStore>,
    ) -> Self {
        let registry = AssetRegistry::new();
        let bus = EventBus::new();
        let manager = LicenseManager::new(
            service,
            registry.clone(),
            bus.clone(),
            store.clone(),
            config.retry.clone(),
        );
        Self {
            config,
            registry,
            bus,
            manager,
            store,
        }
    }

    /// Subscribe to events for an asset URI. Replaces any prior
    /// subscription for that URI.
    pub async fn subscribe(&self, asset_uri: &Url) -> mpsc::UnboundedReceiver<DrmEvent> {
        self.bus.subscribe(asset_uri).await
    }

    /// Set the event callback for an asset URI. Replaces any prior
    /// callback; panics inside the callback are isolated and logged.
    pub async fn set_event_callback<F>(&self, asset_uri: &Url, callback: F)
    where
        F: Fn(DrmEvent) + Send + 'static,
    {
        self.bus.subscribe_with(asset_uri, callback).await;
    }

    /// Register a remote asset and start license acquisition.
    ///
    /// Idempotent: re-registering an asset that is already registering or
    /// licensed returns its current record without a second acquisition.
    #[instrument(skip(self))]
    pub async fn register_asset(
        &self,
        asset_uri: &Url,
        license_uri: &Url,
    ) -> Result<AssetSnapshot> {
        info!(asset = %asset_uri, "Registering asset");
        let (snapshot, needs_acquisition) =
            self.registry.register(asset_uri, license_uri, None).await;
        if needs_acquisition {
            self.manager.ensure_acquisition(asset_uri, license_uri).await;
        }
        Ok(snapshot)
    }

    /// Register a downloaded asset with its local content path.
    ///
    /// A missing content file publishes `FileNotFound`, marks the asset
    /// `Failed`, and fails the call.
    #[instrument(skip(self))]
    pub async fn register_local_asset(
        &self,
        asset_uri: &Url,
        license_uri: &Url,
        local_path: &Path,
    ) -> Result<AssetSnapshot> {
        info!(asset = %asset_uri, path = %local_path.display(), "Registering local asset");

        if !tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            warn!(asset = %asset_uri, path = %local_path.display(), "Local content not found");
            self.registry
                .register(asset_uri, license_uri, Some(local_path.to_path_buf()))
                .await;
            self.registry.mark_failed(asset_uri).await;
            self.bus.publish(asset_uri, DrmEvent::FileNotFound).await;
            return Err(Error::file_not_found(asset_uri.as_str()));
        }

        let (snapshot, needs_acquisition) = self
            .registry
            .register(asset_uri, license_uri, Some(local_path.to_path_buf()))
            .await;
        if needs_acquisition {
            self.manager.ensure_acquisition(asset_uri, license_uri).await;
        }
        Ok(snapshot)
    }

    /// Renew the license of a registered asset.
    ///
    /// Fails with `NotFound` for unknown assets; publishes no event in that
    /// case. Concurrent renewals of the same asset join a single
    /// acquisition.
    #[instrument(skip(self))]
    pub async fn renew_asset(&self, asset_uri: &Url, license_uri: &Url) -> Result<AssetSnapshot> {
        info!(asset = %asset_uri, "Renewing asset license");
        match self.manager.renew(asset_uri, license_uri).await {
            Some(_outcome) => self
                .registry
                .get(asset_uri)
                .await
                .ok_or_else(|| Error::not_found(asset_uri.as_str())),
            None => Err(Error::not_found(asset_uri.as_str())),
        }
    }

    /// Unregister an asset: cancel any in-flight acquisition, revoke stored
    /// license material, publish `Unregistered`, and delete the record.
    #[instrument(skip(self))]
    pub async fn unregister_asset(&self, asset_uri: &Url) -> Result<()> {
        info!(asset = %asset_uri, "Unregistering asset");
        if !self.registry.contains(asset_uri).await {
            return Err(Error::not_found(asset_uri.as_str()));
        }

        self.manager.cancel(asset_uri).await;
        let revocation = self.store.remove(asset_uri.as_str()).await;
        self.bus.publish(asset_uri, DrmEvent::Unregistered).await;
        self.registry.remove(asset_uri).await;

        // The record is gone either way; a failed revocation is still
        // reported to the caller.
        revocation
    }

    /// Read the cached status synchronously; a fresh `AssetStatus` snapshot
    /// is published asynchronously. Records older than the configured TTL
    /// are re-verified in the background first.
    #[instrument(skip(self))]
    pub async fn check_asset_status(&self, asset_uri: &Url) -> Result<AssetSnapshot> {
        let snapshot = self
            .registry
            .effective(asset_uri)
            .await
            .ok_or_else(|| Error::not_found(asset_uri.as_str()))?;

        let stale = self
            .registry
            .is_stale(asset_uri, self.config.status_ttl)
            .await;
        let registry = self.registry.clone();
        let bus = self.bus.clone();
        let store = self.store.clone();
        let uri = asset_uri.clone();
        tokio::spawn(async move {
            let fresh = if stale {
                verify_record(&registry, &store, &uri).await
            } else {
                registry.get(&uri).await
            };
            if let Some(fresh) = fresh {
                bus.publish(&uri, DrmEvent::AssetStatus(fresh)).await;
            }
        });

        Ok(snapshot)
    }

    /// Current status of an asset, with expiry demotion applied.
    pub async fn asset_status(&self, asset_uri: &Url) -> Result<AssetSnapshot> {
        self.registry
            .effective(asset_uri)
            .await
            .ok_or_else(|| Error::not_found(asset_uri.as_str()))
    }

    /// Snapshots of all registered assets.
    pub async fn assets(&self) -> Vec<AssetSnapshot> {
        self.registry.snapshots().await
    }

    /// Initiate playback of a (possibly unregistered) protected asset.
    ///
    /// Registers the asset if unknown, awaits the terminal license event
    /// under the configured deadline, and resolves the playback URL. A
    /// `LicenseFailed` outcome fails the call with the matching error; no
    /// terminal event within the deadline fails with `Timeout` and leaves
    /// the asset `Registering` while the acquisition runs on.
    #[instrument(skip(self))]
    pub async fn play_asset(&self, asset_uri: &Url, license_uri: &Url) -> Result<Url> {
        info!(asset = %asset_uri, "Play requested");

        if let Some(snapshot) = self.registry.effective(asset_uri).await {
            if snapshot.status == AssetStatus::Licensed {
                return self.resolve_playback(&snapshot).await;
            }
        }

        self.registry.register(asset_uri, license_uri, None).await;
        let outcome = self.manager.ensure_acquisition(asset_uri, license_uri).await;
        self.finish_playback(asset_uri, outcome).await
    }

    /// Initiate playback of a registered local asset.
    ///
    /// Requires the asset to be `Licensed`; an expired license triggers an
    /// implicit renewal first. Fails with `FileNotFound` when no local
    /// content path is recorded.
    #[instrument(skip(self))]
    pub async fn play_local_asset(&self, asset_uri: &Url) -> Result<Url> {
        info!(asset = %asset_uri, "Local play requested");

        let snapshot = self
            .registry
            .effective(asset_uri)
            .await
            .ok_or_else(|| Error::not_found(asset_uri.as_str()))?;

        match snapshot.status {
            AssetStatus::Licensed => self.resolve_local(&snapshot).await,
            AssetStatus::LicenseExpired => {
                info!(asset = %asset_uri, "License expired, renewing before playback");
                let outcome = self
                    .manager
                    .renew(asset_uri, &snapshot.license_uri)
                    .await
                    .ok_or_else(|| Error::not_found(asset_uri.as_str()))?;
                self.finish_local_playback(asset_uri, outcome).await
            }
            AssetStatus::Registering => {
                let outcome = self
                    .manager
                    .ensure_acquisition(asset_uri, &snapshot.license_uri)
                    .await;
                self.finish_local_playback(asset_uri, outcome).await
            }
            AssetStatus::Failed => Err(Error::Denied(
                "asset is in failed state, re-register to retry".to_string(),
            )),
            AssetStatus::Unregistered => Err(Error::not_found(asset_uri.as_str())),
        }
    }

    /// Abort all in-flight acquisitions. Registered assets and their stored
    /// license material are kept.
    pub async fn shutdown(&self) {
        info!("DRM client shutting down");
        self.manager.cancel_all().await;
    }

    async fn finish_playback(&self, asset_uri: &Url, outcome: OutcomeReceiver) -> Result<Url> {
        match self.await_outcome(asset_uri, outcome).await? {
            TerminalOutcome::Acquired { .. } => {
                let snapshot = self
                    .registry
                    .get(asset_uri)
                    .await
                    .ok_or_else(|| Error::not_found(asset_uri.as_str()))?;
                self.resolve_playback(&snapshot).await
            }
            TerminalOutcome::Failed(reason) => Err(reason.into()),
        }
    }

    async fn finish_local_playback(&self, asset_uri: &Url, outcome: OutcomeReceiver) -> Result<Url> {
        match self.await_outcome(asset_uri, outcome).await? {
            TerminalOutcome::Acquired { .. } => {
                let snapshot = self
                    .registry
                    .get(asset_uri)
                    .await
                    .ok_or_else(|| Error::not_found(asset_uri.as_str()))?;
                self.resolve_local(&snapshot).await
            }
            TerminalOutcome::Failed(reason) => Err(reason.into()),
        }
    }

    /// Wait for the terminal outcome under the playback deadline.
    async fn await_outcome(
        &self,
        asset_uri: &Url,
        mut outcome: OutcomeReceiver,
    ) -> Result<TerminalOutcome> {
        let wait = async {
            loop {
                if let Some(terminal) = outcome.borrow_and_update().clone() {
                    return Ok(terminal);
                }
                // A closed channel means the acquisition was cancelled by an
                // unregister; the asset is gone.
                outcome
                    .changed()
                    .await
                    .map_err(|_| Error::not_found(asset_uri.as_str()))?;
            }
        };
        match tokio::time::timeout(self.config.play_deadline, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(asset = %asset_uri, deadline = ?self.config.play_deadline, "No terminal license event within deadline");
                Err(Error::Timeout)
            }
        }
    }

    /// Resolve the playback URL for a licensed asset: the local content
    /// path when one is recorded, otherwise the asset URI itself.
    async fn resolve_playback(&self, snapshot: &AssetSnapshot) -> Result<Url> {
        let url = match &snapshot.local_path {
            Some(path) => Url::from_file_path(path)
                .map_err(|_| Error::file_not_found(snapshot.asset_uri.as_str()))?,
            None => snapshot.asset_uri.clone(),
        };
        self.bus
            .publish(&snapshot.asset_uri, DrmEvent::AssetCanPlay)
            .await;
        info!(asset = %snapshot.asset_uri, playback = %url, "Playback URL resolved");
        Ok(url)
    }

    /// Local playback requires a recorded content path.
    async fn resolve_local(&self, snapshot: &AssetSnapshot) -> Result<Url> {
        if snapshot.local_path.is_none() {
            warn!(asset = %snapshot.asset_uri, "No local content path recorded");
            self.bus
                .publish(&snapshot.asset_uri, DrmEvent::FileNotFound)
                .await;
            return Err(Error::file_not_found(snapshot.asset_uri.as_str()));
        }
        self.resolve_playback(snapshot).await
    }
}

/// Background re-verification of a stale record: expiry demotion plus a
/// check that the stored license material is still present.
async fn verify_record(
    registry: &AssetRegistry,
    store: &Arc<dyn LicenseStore>,
    asset_uri: &Url,
) -> Option<AssetSnapshot> {
    let snapshot = registry.effective(asset_uri).await?;
    if snapshot.status == AssetStatus::Licensed && !store.exists(asset_uri.as_str()).await {
        warn!(asset = %asset_uri, "License material missing from store");
        return registry.mark_failed(asset_uri).await;
    }
    registry.mark_verified(asset_uri).await;
    registry.get(asset_uri).await
}

impl std::fmt::Debug for DrmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_asset_operations_fail_not_found() {
        let client = DrmClient::new(ClientConfig::default());
        let uri = Url::parse("https://cdn.example.com/none.wvm").unwrap();

        assert!(matches!(
            client.asset_status(&uri).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            client.check_asset_status(&uri).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            client.unregister_asset(&uri).await,
            Err(Error::NotFound { .. })
        ));
        assert!(matches!(
            client.play_local_asset(&uri).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_register_local_asset_missing_file() {
        let client = DrmClient::new(ClientConfig::default());
        let uri = Url::parse("file:///media/a1.wvm").unwrap();
        let license = Url::parse("https://lic.example.com/a1").unwrap();
        let mut events = client.subscribe(&uri).await;

        let result = client
            .register_local_asset(&uri, &license, Path::new("/definitely/not/here.wvm"))
            .await;

        assert!(matches!(result, Err(Error::FileNotFound { .. })));
        assert!(matches!(
            events.recv().await.unwrap(),
            DrmEvent::FileNotFound
        ));
        let status = client.asset_status(&uri).await.unwrap();
        assert_eq!(status.status, AssetStatus::Failed);
    }
}
