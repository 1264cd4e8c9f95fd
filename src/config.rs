use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::tracker::{CountingLines, TrackerSettings, Zone, DEFAULT_ZONE_MARGIN};

const DEFAULT_DB_PATH: &str = "occupancy.db";
const DEFAULT_SOURCE: &str = "stub://lane";
const DEFAULT_FRAME_INTERVAL: u32 = 3;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_DETECTOR: &str = "cpu";
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_ENTRY_LINE: [[f32; 2]; 2] = [[1000.0, 500.0], [1500.0, 500.0]];
const DEFAULT_EXIT_LINE: [[f32; 2]; 2] = [[400.0, 500.0], [950.0, 500.0]];
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_PREFIX: &str = "counter";
pub const DEFAULT_CONTROL_ADDR: &str = "127.0.0.1:8790";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CounterConfigFile {
    db_path: Option<String>,
    control_addr: Option<String>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    lines: Option<LinesConfigFile>,
    tracker: Option<TrackerConfigFile>,
    sinks: Option<SinksConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    uri: Option<String>,
    frame_interval: Option<u32>,
    resize_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    confidence: Option<f32>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    classes: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LinesConfigFile {
    entry: Option<[[f32; 2]; 2]>,
    exit: Option<[[f32; 2]; 2]>,
    margin: Option<f32>,
    allow_overlap: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TrackerConfigFile {
    centroid_match_tolerance: Option<f32>,
    dedup_time_threshold_secs: Option<f64>,
    dedup_window_capacity: Option<usize>,
    track_quantization_px: Option<f32>,
    track_match_distance: Option<f32>,
    track_stale_after_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SinksConfigFile {
    jsonl_path: Option<PathBuf>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    host: Option<String>,
    port: Option<u16>,
    topic_prefix: Option<String>,
}

/// Daemon configuration: defaults, then the `COUNTER_CONFIG` file, then
/// `COUNTER_*` environment overrides, then validation.
#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub db_path: String,
    /// Loopback address of the counter control socket.
    pub control_addr: String,
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub lines: LineSettings,
    pub tracker: TrackerSettings,
    pub sinks: SinkSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Local path or stream URI; `stub://` selects the synthetic scene.
    pub uri: String,
    pub frame_interval: u32,
    /// Downscale sampled frames to this width. Lines are in the resized space.
    pub resize_width: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub confidence: f32,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    /// Model class ids counted as vehicles; `None` keeps the backend default.
    pub classes: Option<Vec<u32>>,
}

#[derive(Debug, Clone)]
pub struct LineSettings {
    pub entry: [[f32; 2]; 2],
    pub exit: [[f32; 2]; 2],
    pub margin: f32,
    pub allow_overlap: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SinkSettings {
    pub jsonl_path: Option<PathBuf>,
    pub mqtt: Option<MqttSettings>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
}

impl CounterConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("COUNTER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CounterConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let control_addr = file
            .control_addr
            .unwrap_or_else(|| DEFAULT_CONTROL_ADDR.to_string());

        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            uri: source_file.uri.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            frame_interval: source_file.frame_interval.unwrap_or(DEFAULT_FRAME_INTERVAL),
            resize_width: source_file.resize_width,
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            confidence: detector_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            model_path: detector_file.model_path,
            input_size: detector_file.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
            classes: detector_file.classes,
        };

        let lines_file = file.lines.unwrap_or_default();
        let lines = LineSettings {
            entry: lines_file.entry.unwrap_or(DEFAULT_ENTRY_LINE),
            exit: lines_file.exit.unwrap_or(DEFAULT_EXIT_LINE),
            margin: lines_file.margin.unwrap_or(DEFAULT_ZONE_MARGIN),
            allow_overlap: lines_file.allow_overlap.unwrap_or(false),
        };

        let defaults = TrackerSettings::default();
        let tracker_file = file.tracker.unwrap_or_default();
        let tracker = TrackerSettings {
            centroid_match_tolerance: tracker_file
                .centroid_match_tolerance
                .unwrap_or(defaults.centroid_match_tolerance),
            dedup_time_threshold: match tracker_file.dedup_time_threshold_secs {
                Some(secs) => secs_to_duration("tracker.dedup_time_threshold_secs", secs)?,
                None => defaults.dedup_time_threshold,
            },
            dedup_window_capacity: tracker_file
                .dedup_window_capacity
                .unwrap_or(defaults.dedup_window_capacity),
            track_quantization_px: tracker_file
                .track_quantization_px
                .unwrap_or(defaults.track_quantization_px),
            track_match_distance: tracker_file
                .track_match_distance
                .unwrap_or(defaults.track_match_distance),
            track_stale_after: match tracker_file.track_stale_after_secs {
                Some(secs) => secs_to_duration("tracker.track_stale_after_secs", secs)?,
                None => defaults.track_stale_after,
            },
        };

        let sinks_file = file.sinks.unwrap_or_default();
        let sinks = SinkSettings {
            jsonl_path: sinks_file.jsonl_path,
            mqtt: sinks_file.mqtt.map(|mqtt| MqttSettings {
                host: mqtt.host.unwrap_or_else(|| "127.0.0.1".to_string()),
                port: mqtt.port.unwrap_or(DEFAULT_MQTT_PORT),
                topic_prefix: mqtt
                    .topic_prefix
                    .unwrap_or_else(|| DEFAULT_MQTT_PREFIX.to_string()),
            }),
        };

        Ok(Self {
            db_path,
            control_addr,
            source,
            detector,
            lines,
            tracker,
            sinks,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("COUNTER_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(interval) = std::env::var("COUNTER_FRAME_INTERVAL") {
            self.source.frame_interval = interval
                .trim()
                .parse()
                .map_err(|_| anyhow!("COUNTER_FRAME_INTERVAL must be a positive integer"))?;
        }
        if let Ok(confidence) = std::env::var("COUNTER_CONFIDENCE") {
            self.detector.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("COUNTER_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(path) = std::env::var("COUNTER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("COUNTER_CONTROL_ADDR") {
            if !addr.trim().is_empty() {
                self.control_addr = addr.trim().to_string();
            }
        }
        if let Ok(backend) = std::env::var("COUNTER_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(path) = std::env::var("COUNTER_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source uri must not be empty"));
        }
        if self.source.frame_interval == 0 {
            return Err(anyhow!("frame_interval must be >= 1"));
        }
        if self.source.resize_width == Some(0) {
            return Err(anyhow!("resize_width must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(anyhow!("confidence must be within [0, 1]"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be > 0"));
        }
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("the tract detector requires a model_path"));
        }
        if self.detector.classes.as_ref().is_some_and(Vec::is_empty) {
            return Err(anyhow!("detector classes must not be empty when set"));
        }
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        let control: SocketAddr = self
            .control_addr
            .parse()
            .map_err(|_| anyhow!("control_addr '{}' is not a socket address", self.control_addr))?;
        if !control.ip().is_loopback() {
            return Err(anyhow!("control_addr must be a loopback address"));
        }
        self.tracker.validate()?;
        self.counting_lines()?;
        Ok(())
    }

    /// Build the validated entry/exit zones.
    pub fn counting_lines(&self) -> Result<CountingLines> {
        let entry = Zone::from_corners(self.lines.entry)
            .map_err(|e| anyhow!("invalid entry line: {}", e))?;
        let exit = Zone::from_corners(self.lines.exit)
            .map_err(|e| anyhow!("invalid exit line: {}", e))?;
        if self.lines.allow_overlap {
            CountingLines::allow_overlap(entry, exit, self.lines.margin)
        } else {
            CountingLines::new(entry, exit, self.lines.margin)
        }
    }
}

fn secs_to_duration(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("{} must be a non-negative number of seconds", field))
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let mut cfg = CounterConfig::from_file(CounterConfigFile::default())?;
        cfg.validate()?;
        assert_eq!(cfg.source.frame_interval, 3);
        assert_eq!(cfg.detector.confidence, 0.5);
        assert_eq!(cfg.lines.margin, 5.0);
        assert_eq!(cfg.tracker, TrackerSettings::default());
        Ok(())
    }

    #[test]
    fn overlapping_lines_need_opt_in() -> Result<()> {
        let file: CounterConfigFile = serde_json::from_str(
            r#"{"lines": {"entry": [[100, 200], [300, 200]], "exit": [[250, 205], [400, 205]]}}"#,
        )?;
        let mut cfg = CounterConfig::from_file(file)?;
        assert!(cfg.validate().is_err());
        cfg.lines.allow_overlap = true;
        cfg.validate()?;
        Ok(())
    }

    #[test]
    fn tract_requires_model() -> Result<()> {
        let mut cfg = CounterConfig::from_file(CounterConfigFile::default())?;
        cfg.detector.backend = "Tract".into();
        assert!(cfg.validate().is_err());
        cfg.detector.model_path = Some(PathBuf::from("yolov8n.onnx"));
        cfg.validate()?;
        assert_eq!(cfg.detector.backend, "tract");
        Ok(())
    }

    #[test]
    fn control_addr_must_be_loopback() -> Result<()> {
        let mut cfg = CounterConfig::from_file(CounterConfigFile::default())?;
        assert_eq!(cfg.control_addr, DEFAULT_CONTROL_ADDR);
        cfg.control_addr = "0.0.0.0:8790".into();
        assert!(cfg.validate().is_err());
        cfg.control_addr = "localhost".into();
        assert!(cfg.validate().is_err());
        cfg.control_addr = "127.0.0.1:0".into();
        cfg.validate()?;
        Ok(())
    }

    #[test]
    fn detector_classes_are_optional_but_not_empty() -> Result<()> {
        let file: CounterConfigFile =
            serde_json::from_str(r#"{"detector": {"classes": [2, 7]}}"#)?;
        let mut cfg = CounterConfig::from_file(file)?;
        cfg.validate()?;
        assert_eq!(cfg.detector.classes, Some(vec![2, 7]));
        cfg.detector.classes = Some(Vec::new());
        assert!(cfg.validate().is_err());
        Ok(())
    }

    #[test]
    fn rejects_unknown_fields_and_negative_durations() {
        assert!(serde_json::from_str::<CounterConfigFile>(r#"{"colour": "red"}"#).is_err());
        let file: CounterConfigFile =
            serde_json::from_str(r#"{"tracker": {"dedup_time_threshold_secs": -1.0}}"#).unwrap();
        assert!(CounterConfig::from_file(file).is_err());
    }
}
