//! License acquisition and renewal
//!
//! Performs the round trip against a remote license service behind the
//! [`LicenseService`] seam, with exponential-backoff retry for transient
//! failures and per-asset in-flight deduplication: concurrent requests for
//! the same asset URI join a single attempt instead of issuing duplicate
//! network requests.

use crate::error::{Error, Result};
use crate::events::{DrmEvent, EventBus};
use crate::registry::AssetRegistry;
use crate::storage::LicenseStore;
use crate::types::{FailureReason, RetryPolicy};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// License request POSTed to the license service
#[derive(Debug, Clone, Serialize)]
pub struct LicenseRequest {
    /// Asset the license is requested for
    pub asset_uri: Url,
    /// Opaque challenge, base64-encoded
    pub challenge: String,
    /// Unique request identifier
    pub request_id: Uuid,
}

impl LicenseRequest {
    pub fn new(asset_uri: &Url) -> Self {
        let request_id = Uuid::new_v4();
        Self {
            asset_uri: asset_uri.clone(),
            challenge: STANDARD.encode(request_id.as_bytes()),
            request_id,
        }
    }
}

/// License response returned by the license service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseResponse {
    /// Opaque license material, base64-encoded
    pub license: String,
    /// License expiry as unix seconds; absent means unbounded
    pub license_expiry: Option<i64>,
    /// Purchase-window expiry as unix seconds
    pub purchase_expiry: Option<i64>,
}

impl LicenseResponse {
    /// Decode the license material
    pub fn license_bytes(&self) -> Result<Bytes> {
        STANDARD
            .decode(&self.license)
            .map(Bytes::from)
            .map_err(|e| Error::Malformed(format!("license payload: {e}")))
    }

    pub fn license_expiry_utc(&self) -> Option<DateTime<Utc>> {
        self.license_expiry
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    pub fn purchase_expiry_utc(&self) -> Option<DateTime<Utc>> {
        self.purchase_expiry
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }
}

/// Remote license service seam.
///
/// Production uses [`HttpLicenseService`]; tests script outcomes through
/// their own implementations.
#[async_trait]
pub trait LicenseService: Send + Sync {
    async fn fetch_license(
        &self,
        request: &LicenseRequest,
        license_uri: &Url,
    ) -> Result<LicenseResponse>;
}

/// HTTP(S) license service client
pub struct HttpLicenseService {
    client: reqwest::Client,
}

impl HttpLicenseService {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

#[async_trait]
impl LicenseService for HttpLicenseService {
    async fn fetch_license(
        &self,
        request: &LicenseRequest,
        license_uri: &Url,
    ) -> Result<LicenseResponse> {
        let response = self
            .client
            .post(license_uri.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => response
                .json::<LicenseResponse>()
                .await
                .map_err(|e| Error::Malformed(e.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::Denied(format!("license server returned {status}")))
            }
            StatusCode::GONE => Err(Error::Expired),
            s if s.is_server_error() => Err(Error::Network(format!("status: {status}"))),
            _ => Err(Error::Denied(format!("license server returned {status}"))),
        }
    }
}

/// Terminal outcome of one acquisition attempt
#[derive(Debug, Clone)]
pub enum TerminalOutcome {
    Acquired {
        license_expiry: Option<DateTime<Utc>>,
        purchase_expiry: Option<DateTime<Utc>>,
    },
    Failed(FailureReason),
}

/// Receiver side of an acquisition's terminal outcome.
///
/// Starts at `None`; flips to `Some` exactly once. The channel closes
/// without a value when the acquisition is cancelled.
pub type OutcomeReceiver = watch::Receiver<Option<TerminalOutcome>>;

struct Acquisition {
    outcome: OutcomeReceiver,
    abort: AbortHandle,
}

/// Orchestrates license acquisition and renewal round trips.
///
/// Registry and store updates for a completing acquisition happen under the
/// in-flight lock, so a join observed by [`LicenseManager::ensure_acquisition`]
/// always corresponds to a pending registry `Registering` entry.
#[derive(Clone)]
pub struct LicenseManager {
    service: Arc<dyn LicenseService>,
    registry: AssetRegistry,
    bus: EventBus,
    store: Arc<dyn LicenseStore>,
    retry: RetryPolicy,
    inflight: Arc<Mutex<HashMap<String, Acquisition>>>,
}

impl LicenseManager {
    pub fn new(
        service: Arc<dyn LicenseService>,
        registry: AssetRegistry,
        bus: EventBus,
        store: Arc<dyn LicenseStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            registry,
            bus,
            store,
            retry,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start an acquisition for the asset, or join the one already in
    /// flight. Never issues a duplicate network request for the same URI.
    pub async fn ensure_acquisition(&self, asset_uri: &Url, license_uri: &Url) -> OutcomeReceiver {
        let mut inflight = self.inflight.lock().await;
        self.start_or_join(&mut inflight, asset_uri, license_uri)
    }

    /// Renewal: atomically re-enter `Registering` and start (or join) the
    /// acquisition. Returns `None` if the asset is unknown.
    pub async fn renew(&self, asset_uri: &Url, license_uri: &Url) -> Option<OutcomeReceiver> {
        let mut inflight = self.inflight.lock().await;
        self.registry.begin_renewal(asset_uri, license_uri).await?;
        Some(self.start_or_join(&mut inflight, asset_uri, license_uri))
    }

    fn start_or_join(
        &self,
        inflight: &mut HashMap<String, Acquisition>,
        asset_uri: &Url,
        license_uri: &Url,
    ) -> OutcomeReceiver {
        if let Some(acquisition) = inflight.get(asset_uri.as_str()) {
            debug!(asset = %asset_uri, "Joining in-flight acquisition");
            return acquisition.outcome.clone();
        }

        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(run_acquisition(
            self.clone(),
            asset_uri.clone(),
            license_uri.clone(),
            tx,
        ));
        inflight.insert(
            asset_uri.as_str().to_string(),
            Acquisition {
                outcome: rx.clone(),
                abort: task.abort_handle(),
            },
        );
        rx
    }

    /// Best-effort cancellation of an in-flight acquisition. Joined waiters
    /// observe a closed outcome channel.
    pub async fn cancel(&self, asset_uri: &Url) {
        let mut inflight = self.inflight.lock().await;
        if let Some(acquisition) = inflight.remove(asset_uri.as_str()) {
            acquisition.abort.abort();
            debug!(asset = %asset_uri, "In-flight acquisition cancelled");
        }
    }

    /// Abort every in-flight acquisition (teardown).
    pub async fn cancel_all(&self) {
        let mut inflight = self.inflight.lock().await;
        for (_, acquisition) in inflight.drain() {
            acquisition.abort.abort();
        }
    }
}

impl std::fmt::Debug for LicenseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LicenseManager")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// One acquisition attempt, retries included, through to registry update
/// and event publication.
async fn run_acquisition(
    manager: LicenseManager,
    asset_uri: Url,
    license_uri: Url,
    tx: watch::Sender<Option<TerminalOutcome>>,
) {
    let result = acquire_with_retry(
        manager.service.as_ref(),
        &manager.retry,
        &asset_uri,
        &license_uri,
    )
    .await;

    // Completion is applied under the in-flight lock so joins and renewals
    // never observe a half-applied outcome.
    let mut inflight = manager.inflight.lock().await;

    let outcome = match result {
        Ok(response) => {
            match manager
                .registry
                .apply_license(
                    &asset_uri,
                    response.license_expiry_utc(),
                    response.purchase_expiry_utc(),
                )
                .await
            {
                Some(snapshot) => {
                    match response.license_bytes() {
                        Ok(bytes) => {
                            if let Err(e) = manager.store.save(asset_uri.as_str(), bytes).await {
                                warn!(asset = %asset_uri, error = %e, "Failed to persist license material");
                            }
                        }
                        Err(e) => {
                            warn!(asset = %asset_uri, error = %e, "Undecodable license payload not persisted");
                        }
                    }
                    info!(
                        asset = %asset_uri,
                        expiry = ?snapshot.license_expiry,
                        "License acquired"
                    );
                    let event = DrmEvent::LicenseAcquired {
                        license_expiry: snapshot.license_expiry,
                        purchase_expiry: snapshot.purchase_expiry,
                    };
                    manager.bus.publish(&asset_uri, event).await;
                    Some(TerminalOutcome::Acquired {
                        license_expiry: snapshot.license_expiry,
                        purchase_expiry: snapshot.purchase_expiry,
                    })
                }
                None => None,
            }
        }
        Err(error) => {
            let reason = error.failure_reason().unwrap_or(FailureReason::Network);
            match manager.registry.apply_failure(&asset_uri).await {
                Some(snapshot) => {
                    warn!(
                        asset = %asset_uri,
                        reason = %reason,
                        status = %snapshot.status,
                        "License acquisition failed"
                    );
                    manager
                        .bus
                        .publish(&asset_uri, DrmEvent::LicenseFailed(reason))
                        .await;
                    Some(TerminalOutcome::Failed(reason))
                }
                None => None,
            }
        }
    };

    inflight.remove(asset_uri.as_str());
    match outcome {
        // Dropping tx without a value closes the channel; waiters treat the
        // asset as gone.
        None => debug!(asset = %asset_uri, "Acquisition result discarded, asset no longer registered"),
        Some(outcome) => {
            let _ = tx.send(Some(outcome));
        }
    }
}

/// Issue the license request, retrying transient failures with exponential
/// backoff. Denied/malformed/expired responses are fatal to the attempt.
async fn acquire_with_retry(
    service: &dyn LicenseService,
    retry: &RetryPolicy,
    asset_uri: &Url,
    license_uri: &Url,
) -> Result<LicenseResponse> {
    let mut last_error = None;
    for attempt in 0..=retry.max_retries {
        let delay = retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let request = LicenseRequest::new(asset_uri);
        match service.fetch_license(&request, license_uri).await {
            Ok(response) => {
                if let Some(expiry) = response.license_expiry_utc() {
                    if expiry <= Utc::now() {
                        return Err(Error::Expired);
                    }
                }
                return Ok(response);
            }
            Err(error) if error.is_retryable() && attempt < retry.max_retries => {
                debug!(
                    asset = %asset_uri,
                    attempt,
                    error = %error,
                    "Transient license failure, will retry"
                );
                last_error = Some(error);
            }
            Err(error) => {
                if error.is_retryable() {
                    warn!(
                        asset = %asset_uri,
                        retries = retry.max_retries,
                        "License acquisition retries exhausted"
                    );
                }
                return Err(error);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| Error::Network("license acquisition failed".to_string())))
}
