use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use argh::FromArgs;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{
    classifier::{ClassifierKind, DEFAULT_HISTORY_LEN},
    pipeline::PipelineOptions,
    runner::RelayOptions,
    RelayError,
};

#[derive(FromArgs, Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Relay NMEA sentences from a GNSS receiver to a named pipe, with satellite signal classification
pub struct RelayCfg {
    /// serial device
    #[argh(positional)]
    pub serial_port: String,
    /// baud rate
    #[argh(option, default = "115200")]
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// read timeout in milliseconds
    #[argh(option, default = "10")]
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// named pipe receiving the relayed sentences
    #[argh(option, default = "PathBuf::from(crate::relay::DEFAULT_FIFO_PATH)")]
    #[serde(default = "default_fifo_path")]
    pub fifo_path: PathBuf,
    /// snapshot document location
    #[argh(option, default = "PathBuf::from(crate::snapshot::DEFAULT_SNAPSHOT_PATH)")]
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// accepted sentences between snapshots
    #[argh(option, default = "crate::runner::DEFAULT_SNAPSHOT_EVERY")]
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// seconds after which a silent satellite is dropped
    #[argh(option, default = "crate::sky::SatelliteTable::DEFAULT_STALE_SECS")]
    #[serde(default = "default_stale_secs")]
    pub stale_secs: u64,
    /// classifications remembered per satellite
    #[argh(option, default = "DEFAULT_HISTORY_LEN")]
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    /// classifier strategy: rules or hybrid
    #[argh(option, default = "ClassifierKind::Hybrid")]
    #[serde(default)]
    pub classifier: ClassifierKind,
    /// store this configuration as the saved default
    #[argh(switch)]
    #[serde(skip)]
    pub save_config: bool,
    /// start from the saved configuration
    #[argh(switch)]
    #[serde(skip)]
    pub use_saved: bool,
}

fn default_baud_rate() -> u32 {
    115200
}

fn default_timeout() -> u64 {
    10
}

fn default_fifo_path() -> PathBuf {
    PathBuf::from(crate::relay::DEFAULT_FIFO_PATH)
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from(crate::snapshot::DEFAULT_SNAPSHOT_PATH)
}

fn default_snapshot_every() -> u64 {
    crate::runner::DEFAULT_SNAPSHOT_EVERY
}

fn default_stale_secs() -> u64 {
    crate::sky::SatelliteTable::DEFAULT_STALE_SECS
}

fn default_history_len() -> usize {
    DEFAULT_HISTORY_LEN
}

impl RelayCfg {
    /// Serial read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Options for the processing pipeline
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            stale_after: Duration::from_secs(self.stale_secs),
            history_len: self.history_len.max(1),
            classifier: self.classifier,
        }
    }

    /// Options for the relay and snapshot outputs
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            fifo_path: self.fifo_path.clone(),
            snapshot_path: self.snapshot_path.clone(),
            snapshot_every: self.snapshot_every.max(1),
        }
    }

    /// Store the configuration in the default location
    pub fn store_default(&self) -> Result<(), RelayError> {
        self.store(&get_default_path().join("config.json"))
    }

    /// Load the configuration from the default location
    pub fn load_default() -> Result<Self, RelayError> {
        Self::load(&get_default_path().join("config.json"))
    }

    /// Store the configuration as JSON at `path`
    pub fn store(&self, path: &Path) -> Result<(), RelayError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| RelayError::Config(format!("{}: {}", dir.display(), e)))?;
        }
        let data =
            serde_json::to_string_pretty(self).map_err(|e| RelayError::Config(e.to_string()))?;
        std::fs::write(path, data)
            .map_err(|e| RelayError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load a configuration from `path`; comments are allowed
    pub fn load(path: &Path) -> Result<Self, RelayError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("{}: {}", path.display(), e)))?;
        json5::from_str(&data).map_err(|e| RelayError::Config(format!("{}: {}", path.display(), e)))
    }
}

fn get_default_path() -> PathBuf {
    if let Some(path) = ProjectDirs::from("", "", "gnssai_relay") {
        path.config_dir().to_path_buf()
    } else {
        PathBuf::from(".")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> RelayCfg {
        RelayCfg::from_args(&["gnssai-relay"], args).expect("args")
    }

    #[test]
    fn defaults() {
        let cfg = parse(&["/dev/serial0"]);
        assert_eq!(cfg.serial_port, "/dev/serial0");
        assert_eq!(cfg.baud_rate, 115200);
        assert_eq!(cfg.read_timeout(), Duration::from_millis(10));
        assert_eq!(cfg.classifier, ClassifierKind::Hybrid);
        assert_eq!(cfg.relay_options(), RelayOptions::default());
        assert_eq!(cfg.pipeline_options(), PipelineOptions::default());
        assert!(!cfg.save_config && !cfg.use_saved);
    }

    #[test]
    fn options_from_args() {
        let cfg = parse(&[
            "/dev/ttyUSB1",
            "--classifier",
            "rules",
            "--stale-secs",
            "30",
            "--snapshot-every",
            "0",
            "--fifo-path",
            "/tmp/out",
        ]);
        let popts = cfg.pipeline_options();
        assert_eq!(popts.classifier, ClassifierKind::Rules);
        assert_eq!(popts.stale_after, Duration::from_secs(30));
        let ropts = cfg.relay_options();
        assert_eq!(ropts.snapshot_every, 1);
        assert_eq!(ropts.fifo_path, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn rejects_unknown_classifier() {
        assert!(RelayCfg::from_args(&["gnssai-relay"], &["/dev/serial0", "--classifier", "svm"]).is_err());
    }

    #[test]
    fn store_then_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = parse(&["/dev/serial0", "--baud-rate", "9600"]);
        cfg.save_config = true;
        cfg.store(&path).expect("store");
        let loaded = RelayCfg::load(&path).expect("load");
        assert_eq!(loaded.baud_rate, 9600);
        assert!(!loaded.save_config);
        assert_eq!(loaded.serial_port, cfg.serial_port);
    }

    #[test]
    fn loads_hand_edited_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            "{\n  // receiver on the header pins\n  serial_port: '/dev/serial0',\n  classifier: 'rules',\n}\n",
        )
        .expect("write");
        let cfg = RelayCfg::load(&path).expect("load");
        assert_eq!(cfg.classifier, ClassifierKind::Rules);
        assert_eq!(cfg.baud_rate, 115200);
        assert_eq!(cfg.snapshot_every, 20);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempdir().expect("tempdir");
        assert!(matches!(
            RelayCfg::load(&dir.path().join("absent.json")),
            Err(RelayError::Config(_))
        ));
    }
}
