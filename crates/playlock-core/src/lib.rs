//! Playlock Core - DRM Content-Protection Client
//!
//! This crate provides the license-lifecycle core for protected media
//! playback:
//! - Asset registration, renewal, and unregistration
//! - License acquisition with retry and in-flight deduplication
//! - Per-asset event delivery (single subscriber per asset URI)
//! - Playback URL resolution for remote and local protected content
//! - Local license-material storage behind a narrow store interface
//!
//! The cryptographic DRM scheme, key exchange, and content decryption are
//! out of scope; the license service and the secure store are consumed
//! through the [`LicenseService`] and [`LicenseStore`] seams.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Playlock Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │    Asset     │  │   License    │  │    Event     │           │
//! │  │   Registry   │  │   Manager    │  │     Bus      │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │     DRM     │                              │
//! │                    │   Client    │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │         ┌─────────────────┼─────────────────┐                   │
//! │  ┌──────┴───────┐  ┌──────┴──────┐  ┌───────┴──────┐            │
//! │  │   License    │  │   License   │  │   Playback   │            │
//! │  │   Service    │  │    Store    │  │  Resolution  │            │
//! │  └──────────────┘  └─────────────┘  └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod license;
pub mod registry;
pub mod storage;
pub mod types;

pub use client::DrmClient;
pub use error::{Error, Result};
pub use events::{DrmEvent, EventBus};
pub use license::{
    HttpLicenseService, LicenseManager, LicenseRequest, LicenseResponse, LicenseService,
};
pub use registry::AssetRegistry;
pub use storage::{FsLicenseStore, LicenseStore, MemoryLicenseStore, NullLicenseStore};
pub use types::{AssetSnapshot, AssetStatus, ClientConfig, FailureReason, RetryPolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library with default configuration
pub fn init() {
    tracing::info!(version = VERSION, "Playlock Core initialized");
}
