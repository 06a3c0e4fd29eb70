use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub video: VideoConfig,
    pub snapshot: SnapshotConfig,
    pub overlay: OverlayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Pause after a transport error before polling the event loop again
    pub reconnect_delay_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            topic: "vms/roi/polygon".to_string(),
            client_id: "polygon_visualizer".to_string(),
            keep_alive_secs: 60,
            reconnect_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Anything OpenCV's VideoCapture can open (rtsp://, file path, ...)
    pub url: String,
    pub reconnect_delay_ms: u64,
    /// Backend open/read deadlines; a stalled stream counts as a failure
    pub open_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Sleep between loop iterations, caps throughput
    pub frame_interval_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://127.0.0.1:554/Streaming/Channels/1".to_string(),
            reconnect_delay_ms: 1000,
            open_timeout_ms: 10_000,
            read_timeout_ms: 5_000,
            frame_interval_ms: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub output_dir: String,
    pub interval_secs: f64,
    pub jpeg_quality: i32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            output_dir: "snapshots".to_string(),
            interval_secs: 5.0,
            jpeg_quality: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub fill_alpha: f64,
    pub outline_thickness: i32,
    pub vertex_radius: i32,
    pub visibility: VisibilityPolicy,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            fill_alpha: 0.3,
            outline_thickness: 3,
            vertex_radius: 6,
            visibility: VisibilityPolicy::All,
        }
    }
}

/// Which stored regions get composited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityPolicy {
    /// Every stored region, regardless of `showOnCamera`
    #[default]
    All,
    /// Only regions flagged `showOnCamera`
    VisibleOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ============================================================================
// REGIONS
// ============================================================================

/// Normalized `[x, y]` in unit space.
pub type Point2 = [f64; 2];

/// A named polygon published by the VMS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    pub points: Vec<Point2>,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "showOnCamera", default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl Region {
    /// Fewer than three vertices cannot enclose an area.
    pub fn is_renderable(&self) -> bool {
        self.points.len() >= 3
    }

    /// Normalized `(min, max)` corners, `None` for an empty polygon.
    pub fn bounding_box(&self) -> Option<(Point2, Point2)> {
        let first = self.points.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in &self.points[1..] {
            min[0] = min[0].min(p[0]);
            min[1] = min[1].min(p[1]);
            max[0] = max[0].max(p[0]);
            max[1] = max[1].max(p[1]);
        }
        Some((min, max))
    }
}

/// Envelope carried on the region-update topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionUpdate {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub polygons: Option<Vec<Region>>,
}

impl RegionUpdate {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("malformed region update")
    }

    /// Absent and empty `polygons` both mean "no regions".
    pub fn into_regions(self) -> Vec<Region> {
        self.polygons.unwrap_or_default()
    }
}

// ============================================================================
// FRAMES / COLORS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_envelope() {
        let payload = br##"{
            "event": "polygons_updated",
            "timestamp": "2025-01-01T00:00:00Z",
            "polygons": [
                {"name": "Gate", "points": [[0.1, 0.1], [0.5, 0.1], [0.5, 0.6]],
                 "color": "#e040fb", "label": "entry", "showOnCamera": false}
            ]
        }"##;

        let update = RegionUpdate::parse(payload).unwrap();
        assert_eq!(update.event, "polygons_updated");
        let regions = update.into_regions();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].name, "Gate");
        assert_eq!(regions[0].label.as_deref(), Some("entry"));
        assert!(!regions[0].visible);
    }

    #[test]
    fn test_optional_fields_default() {
        let payload = br#"{"polygons": [{"name": "A", "points": [[0,0],[1,0],[1,1]]}]}"#;
        let regions = RegionUpdate::parse(payload).unwrap().into_regions();
        assert_eq!(regions[0].color, "");
        assert_eq!(regions[0].label, None);
        assert!(regions[0].visible);
    }

    #[test]
    fn test_absent_polygons_is_empty_set() {
        let update = RegionUpdate::parse(br#"{"event": "cleared"}"#).unwrap();
        assert!(update.into_regions().is_empty());
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        assert!(RegionUpdate::parse(b"{\"polygons\": [").is_err());
        assert!(RegionUpdate::parse(b"not json").is_err());
        // wrong types
        assert!(RegionUpdate::parse(br#"{"polygons": "nope"}"#).is_err());
        assert!(RegionUpdate::parse(br#"{"polygons": [{"name": 3, "points": []}]}"#).is_err());
        // a point must be exactly [x, y]
        assert!(RegionUpdate::parse(br#"{"polygons": [{"name": "a", "points": [[0.1]]}]}"#).is_err());
    }

    #[test]
    fn test_bounding_box() {
        let region = Region {
            name: "r".to_string(),
            points: vec![[0.2, 0.7], [0.6, 0.1], [0.4, 0.9]],
            color: String::new(),
            label: None,
            visible: true,
        };
        let (min, max) = region.bounding_box().unwrap();
        assert_eq!(min, [0.2, 0.1]);
        assert_eq!(max, [0.6, 0.9]);
        assert!(region.is_renderable());
    }
}
