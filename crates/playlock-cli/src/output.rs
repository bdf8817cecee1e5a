//! Output formatting for CLI

use playlock_core::AssetSnapshot;
use std::time::Duration;
use tabled::{Table, Tabled};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Asset")]
    asset: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "License left")]
    license_left: String,
    #[tabled(rename = "Purchase left")]
    purchase_left: String,
    #[tabled(rename = "Local content")]
    local: String,
}

impl From<&AssetSnapshot> for StatusRow {
    fn from(snapshot: &AssetSnapshot) -> Self {
        Self {
            asset: snapshot.asset_uri.to_string(),
            status: snapshot.status.to_string(),
            license_left: format_duration(snapshot.license_time_remaining()),
            purchase_left: format_duration(snapshot.purchase_time_remaining()),
            local: snapshot
                .local_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Print a snapshot in the selected format
pub fn print_snapshot(snapshot: &AssetSnapshot, format: &str) {
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Text => {
            println!("{}", Table::new([StatusRow::from(snapshot)]));
        }
    }
}

/// Compact duration rendering: "2h 30m", "45m 10s", "12s"
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0s");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(130)), "2m 10s");
        assert_eq!(format_duration(Duration::from_secs(9000)), "2h 30m");
    }
}
