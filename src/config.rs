use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        let config: Config =
            serde_yaml::from_str(&contents).with_context(|| format!("parsing config {}", path))?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the built-in defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            info!("No config at {}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn apply_env_overrides(mut self) -> Result<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("ROI_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("ROI_MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .with_context(|| format!("ROI_MQTT_PORT is not a port: {}", port))?;
        }
        if let Some(topic) = lookup("ROI_MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(url) = lookup("ROI_VIDEO_URL") {
            self.video.url = url;
        }
        if let Some(dir) = lookup("ROI_SNAPSHOT_DIR") {
            self.snapshot.output_dir = dir;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.mqtt.topic.trim().is_empty() {
            bail!("mqtt.topic must not be empty");
        }
        if self.video.url.trim().is_empty() {
            bail!("video.url must not be empty");
        }
        if !(0.0..=1.0).contains(&self.overlay.fill_alpha) {
            bail!(
                "overlay.fill_alpha must be within [0, 1], got {}",
                self.overlay.fill_alpha
            );
        }
        let interval = self.snapshot.interval_secs;
        if !(interval.is_finite() && interval > 0.0) {
            bail!("snapshot.interval_secs must be a positive number, got {}", interval);
        }
        if self.video.reconnect_delay_ms == 0 {
            bail!("video.reconnect_delay_ms must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VisibilityPolicy;
    use std::collections::HashMap;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "video:\n  url: rtsp://cam/1\noverlay:\n  visibility: visible_only\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.video.url, "rtsp://cam/1");
        assert_eq!(config.video.reconnect_delay_ms, 1000);
        assert_eq!(config.mqtt.topic, "vms/roi/polygon");
        assert_eq!(config.overlay.visibility, VisibilityPolicy::VisibleOnly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ROI_MQTT_HOST", "broker.local"),
            ("ROI_MQTT_PORT", "1884"),
            ("ROI_VIDEO_URL", "rtsp://other"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.video.url, "rtsp://other");
        assert_eq!(config.snapshot.output_dir, "snapshots");
    }

    #[test]
    fn test_bad_port_override_rejected() {
        let mut config = Config::default();
        let result = config.apply_overrides(|k| (k == "ROI_MQTT_PORT").then(|| "abc".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.overlay.fill_alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.snapshot.interval_secs = 0.0;
        assert!(config.validate().is_err());

        for interval in [f64::INFINITY, f64::NAN, -5.0] {
            let mut config = Config::default();
            config.snapshot.interval_secs = interval;
            assert!(config.validate().is_err(), "accepted {}", interval);
        }

        let yaml = "snapshot:\n  interval_secs: .inf\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.snapshot.interval_secs.is_infinite());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mqtt.topic = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_or_default("/nonexistent/roi-overlay.yaml").unwrap();
        assert_eq!(config.mqtt.port, 1883);
    }
}
