//! CLI command implementations

use crate::output;
use anyhow::bail;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use playlock_core::{DrmClient, DrmEvent, FsLicenseStore, LicenseStore};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabled::{Table, Tabled};
use url::Url;

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// Wait for the terminal event of the running acquisition.
async fn wait_terminal(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<DrmEvent>,
) -> anyhow::Result<DrmEvent> {
    let bar = spinner("Waiting for license...");
    while let Some(event) = events.recv().await {
        if event.is_terminal() {
            bar.finish_and_clear();
            return Ok(event);
        }
    }
    bar.finish_and_clear();
    bail!("event stream closed before a terminal license event")
}

/// Acquire a license for an asset and report the outcome
pub async fn acquire(
    client: &DrmClient,
    asset: &str,
    license: &str,
    local: Option<PathBuf>,
    format: &str,
) -> anyhow::Result<()> {
    let asset_uri = Url::parse(asset)?;
    let license_uri = Url::parse(license)?;
    let mut events = client.subscribe(&asset_uri).await;

    match &local {
        Some(path) => {
            client
                .register_local_asset(&asset_uri, &license_uri, path)
                .await?
        }
        None => client.register_asset(&asset_uri, &license_uri).await?,
    };

    match wait_terminal(&mut events).await? {
        DrmEvent::LicenseAcquired { .. } => {
            println!("{} license acquired", style("ok").green().bold());
            let snapshot = client.asset_status(&asset_uri).await?;
            output::print_snapshot(&snapshot, format);
            Ok(())
        }
        DrmEvent::LicenseFailed(reason) => {
            bail!("license acquisition failed: {reason}")
        }
        other => bail!("unexpected event: {other:?}"),
    }
}

/// Check asset status and remaining license time
pub async fn status(
    client: &DrmClient,
    asset: &str,
    license: &str,
    format: &str,
) -> anyhow::Result<()> {
    let asset_uri = Url::parse(asset)?;
    let license_uri = Url::parse(license)?;
    let mut events = client.subscribe(&asset_uri).await;

    client.register_asset(&asset_uri, &license_uri).await?;
    if let DrmEvent::LicenseFailed(reason) = wait_terminal(&mut events).await? {
        bail!("license acquisition failed: {reason}");
    }

    client.check_asset_status(&asset_uri).await?;
    while let Some(event) = events.recv().await {
        if let DrmEvent::AssetStatus(snapshot) = event {
            output::print_snapshot(&snapshot, format);
            return Ok(());
        }
    }
    bail!("event stream closed before a status snapshot")
}

/// Resolve a playback URL for a remote asset
pub async fn play(client: &DrmClient, asset: &str, license: &str) -> anyhow::Result<()> {
    let asset_uri = Url::parse(asset)?;
    let license_uri = Url::parse(license)?;

    let bar = spinner("Acquiring license...");
    let result = client.play_asset(&asset_uri, &license_uri).await;
    bar.finish_and_clear();

    let url = result?;
    println!("{} {url}", style("playback").green().bold());
    Ok(())
}

/// Resolve a playback URL for a downloaded asset
pub async fn play_local(
    client: &DrmClient,
    asset: &str,
    license: &str,
    path: &Path,
) -> anyhow::Result<()> {
    let asset_uri = Url::parse(asset)?;
    let license_uri = Url::parse(license)?;
    let mut events = client.subscribe(&asset_uri).await;

    client
        .register_local_asset(&asset_uri, &license_uri, path)
        .await?;
    if let DrmEvent::LicenseFailed(reason) = wait_terminal(&mut events).await? {
        bail!("license acquisition failed: {reason}");
    }

    let url = client.play_local_asset(&asset_uri).await?;
    println!("{} {url}", style("playback").green().bold());
    Ok(())
}

/// Remove persisted license material for an asset
pub async fn revoke(store: &FsLicenseStore, asset: &str) -> anyhow::Result<()> {
    let asset_uri = Url::parse(asset)?;
    if !store.exists(asset_uri.as_str()).await {
        bail!("no stored license for {asset_uri}");
    }
    store.remove(asset_uri.as_str()).await?;
    println!("{} license revoked for {asset_uri}", style("ok").green().bold());
    Ok(())
}

#[derive(Tabled)]
struct LicenseRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Bytes")]
    bytes: u64,
    #[tabled(rename = "Stored")]
    stored: String,
}

/// List persisted licenses in the store directory
pub fn licenses(store_dir: &Path) -> anyhow::Result<()> {
    let mut rows = Vec::new();
    let entries = match std::fs::read_dir(store_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No licenses stored in {}", store_dir.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(encoded) = name.to_string_lossy().strip_suffix(".lic").map(str::to_string)
        else {
            continue;
        };
        let asset = URL_SAFE_NO_PAD
            .decode(&encoded)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or(encoded);
        let metadata = entry.metadata()?;
        let stored: DateTime<Utc> = metadata.modified()?.into();
        rows.push(LicenseRow {
            asset,
            bytes: metadata.len(),
            stored: stored.format("%Y-%m-%d %H:%M:%S").to_string(),
        });
    }

    if rows.is_empty() {
        println!("No licenses stored in {}", store_dir.display());
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(())
}
