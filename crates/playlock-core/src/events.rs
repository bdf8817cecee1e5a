//! Asynchronous DRM event delivery
//!
//! Events are keyed by asset URI. Each URI has at most one subscriber;
//! re-subscribing replaces the previous subscription. Events published for a
//! URI with no subscriber are dropped, not buffered.

use crate::types::{AssetSnapshot, FailureReason};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error};
use url::Url;

/// Asynchronous DRM event for a single asset
#[derive(Debug, Clone)]
pub enum DrmEvent {
    /// The asset is ready for playback
    AssetCanPlay,
    /// Fresh status snapshot, published in response to a status check
    AssetStatus(AssetSnapshot),
    /// A license was acquired; terminal for the acquisition attempt
    LicenseAcquired {
        license_expiry: Option<DateTime<Utc>>,
        purchase_expiry: Option<DateTime<Utc>>,
    },
    /// The acquisition attempt failed; terminal
    LicenseFailed(FailureReason),
    /// The asset was unregistered and its license material revoked
    Unregistered,
    /// The asset's local content file is missing
    FileNotFound,
}

impl DrmEvent {
    /// Terminal events end an acquisition attempt; no further state change
    /// is expected for that attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DrmEvent::LicenseAcquired { .. } | DrmEvent::LicenseFailed(_)
        )
    }

    /// Event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            DrmEvent::AssetCanPlay => "asset_can_play",
            DrmEvent::AssetStatus(_) => "asset_status",
            DrmEvent::LicenseAcquired { .. } => "license_acquired",
            DrmEvent::LicenseFailed(_) => "license_failed",
            DrmEvent::Unregistered => "unregistered",
            DrmEvent::FileNotFound => "file_not_found",
        }
    }
}

/// Per-asset event dispatch.
///
/// Delivery is FIFO per asset URI. There is no ordering guarantee across
/// different URIs. Publishing enqueues synchronously; subscribers consume on
/// their own tasks.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<String, mpsc::UnboundedSender<DrmEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for one asset URI.
    ///
    /// Replaces any existing subscription for that URI; the previous
    /// receiver's channel closes.
    pub async fn subscribe(&self, asset_uri: &Url) -> mpsc::UnboundedReceiver<DrmEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let previous = self
            .subscribers
            .write()
            .await
            .insert(asset_uri.as_str().to_string(), tx);
        if previous.is_some() {
            debug!(asset = %asset_uri, "Replaced existing event subscription");
        }
        rx
    }

    /// Subscribe with a callback instead of a channel.
    ///
    /// The callback runs on a spawned task. A panicking callback is caught
    /// and logged; the bus keeps serving that subscriber and all others.
    pub async fn subscribe_with<F>(&self, asset_uri: &Url, callback: F)
    where
        F: Fn(DrmEvent) + Send + 'static,
    {
        let mut rx = self.subscribe(asset_uri).await;
        let asset = asset_uri.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let name = event.name();
                if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                    error!(asset = %asset, event = name, "Event callback panicked");
                }
            }
        });
    }

    /// Remove the subscription for an asset URI, if any.
    pub async fn unsubscribe(&self, asset_uri: &Url) {
        self.subscribers.write().await.remove(asset_uri.as_str());
    }

    /// Publish an event to the current subscriber for the asset URI.
    ///
    /// Events for URIs with no live subscriber are dropped.
    pub async fn publish(&self, asset_uri: &Url, event: DrmEvent) {
        let name = event.name();
        let stale = {
            let subs = self.subscribers.read().await;
            match subs.get(asset_uri.as_str()) {
                Some(tx) => tx.send(event).is_err(),
                None => {
                    debug!(asset = %asset_uri, event = name, "No subscriber, event dropped");
                    false
                }
            }
        };
        // The receiver was dropped without unsubscribing; forget the sender.
        if stale {
            self.subscribers.write().await.remove(asset_uri.as_str());
            debug!(asset = %asset_uri, event = name, "Subscriber gone, event dropped");
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn asset() -> Url {
        Url::parse("https://cdn.example.com/a1.wvm").unwrap()
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(&asset(), DrmEvent::AssetCanPlay).await;
    }

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&asset()).await;
        bus.publish(&asset(), DrmEvent::Unregistered).await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DrmEvent::Unregistered));
    }

    #[tokio::test]
    async fn test_fifo_per_key() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&asset()).await;
        bus.publish(&asset(), DrmEvent::AssetCanPlay).await;
        bus.publish(&asset(), DrmEvent::Unregistered).await;
        assert!(matches!(rx.recv().await.unwrap(), DrmEvent::AssetCanPlay));
        assert!(matches!(rx.recv().await.unwrap(), DrmEvent::Unregistered));
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous() {
        let bus = EventBus::new();
        let mut first = bus.subscribe(&asset()).await;
        let mut second = bus.subscribe(&asset()).await;

        bus.publish(&asset(), DrmEvent::AssetCanPlay).await;

        // Only the latest subscriber receives events
        assert!(matches!(second.recv().await.unwrap(), DrmEvent::AssetCanPlay));
        // The replaced channel is closed
        assert!(first.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_events_isolated_per_key() {
        let bus = EventBus::new();
        let other = Url::parse("https://cdn.example.com/a2.wvm").unwrap();
        let mut rx = bus.subscribe(&asset()).await;
        let mut other_rx = bus.subscribe(&other).await;

        bus.publish(&asset(), DrmEvent::AssetCanPlay).await;
        assert!(matches!(rx.recv().await.unwrap(), DrmEvent::AssetCanPlay));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_callback_panic_is_isolated() {
        let bus = EventBus::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();

        bus.subscribe_with(&asset(), move |event| {
            if matches!(event, DrmEvent::FileNotFound) {
                panic!("callback failure");
            }
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        bus.publish(&asset(), DrmEvent::FileNotFound).await;
        bus.publish(&asset(), DrmEvent::AssetCanPlay).await;

        // The panicking delivery is swallowed; the next one still arrives
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_terminal_classification() {
        assert!(DrmEvent::LicenseAcquired {
            license_expiry: None,
            purchase_expiry: None
        }
        .is_terminal());
        assert!(DrmEvent::LicenseFailed(FailureReason::Denied).is_terminal());
        assert!(!DrmEvent::AssetCanPlay.is_terminal());
        assert!(!DrmEvent::Unregistered.is_terminal());
    }
}
