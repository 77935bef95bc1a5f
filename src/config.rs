use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::limits::*;
use crate::model::AdType;
use crate::sim::SimConfig;

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(serde_json::Error),
    DuplicatePlacement(String),
    InvalidPlacementId(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read {}: {e}", path.display()),
            ConfigError::Parse(e) => write!(f, "invalid placement table: {e}"),
            ConfigError::DuplicatePlacement(id) => write!(f, "duplicate placement: {id}"),
            ConfigError::InvalidPlacementId(id) => write!(f, "invalid placement id: {id:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// One placement as configured by the ad server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlacementConfig {
    pub id: String,
    #[serde(default)]
    pub ad_type: AdType,
    /// Raw configured stock size. Non-positive means "use the default".
    #[serde(default, rename = "cs")]
    pub stock: i32,
}

impl PlacementConfig {
    pub fn new(id: impl Into<String>, ad_type: AdType, stock: i32) -> Self {
        Self {
            id: id.into(),
            ad_type,
            stock,
        }
    }

    /// Desired number of ready units, always in `1..=MAX_TARGET_STOCK`.
    pub fn target_stock_size(&self) -> usize {
        if self.stock <= 0 {
            return 1;
        }
        (self.stock as usize).min(MAX_TARGET_STOCK)
    }
}

#[derive(Deserialize)]
struct TableFile {
    placements: Vec<PlacementConfig>,
}

/// Placement lookup keyed by id.
#[derive(Debug, Clone, Default)]
pub struct PlacementTable {
    placements: HashMap<String, PlacementConfig>,
}

impl PlacementTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"placements": [{"id": .., "ad_type": .., "cs": ..}, ..]}`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: TableFile = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        let mut table = Self::new();
        for placement in file.placements {
            table.insert(placement)?;
        }
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_json(&json)
    }

    pub fn insert(&mut self, placement: PlacementConfig) -> Result<(), ConfigError> {
        if placement.id.is_empty() || placement.id.len() > MAX_PLACEMENT_ID_LEN {
            return Err(ConfigError::InvalidPlacementId(placement.id));
        }
        if self.placements.contains_key(&placement.id) {
            return Err(ConfigError::DuplicatePlacement(placement.id));
        }
        self.placements.insert(placement.id.clone(), placement);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PlacementConfig> {
        self.placements.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.placements.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}

/// Host process settings, read from `ADSTOCK_*` environment variables.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub placements_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub sweep_interval: Duration,
    pub show_interval: Duration,
    pub sim: SimConfig,
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.parse().ok())
        }

        let defaults = SimConfig::default();
        Self {
            placements_path: lookup("ADSTOCK_PLACEMENTS").map(PathBuf::from),
            metrics_port: parsed(&lookup, "ADSTOCK_METRICS_PORT"),
            sweep_interval: Duration::from_millis(
                parsed(&lookup, "ADSTOCK_SWEEP_INTERVAL_MS").unwrap_or(5_000),
            ),
            show_interval: Duration::from_millis(
                parsed(&lookup, "ADSTOCK_SHOW_INTERVAL_MS").unwrap_or(15_000),
            ),
            sim: SimConfig {
                candidates_per_fetch: parsed(&lookup, "ADSTOCK_SIM_CANDIDATES")
                    .unwrap_or(defaults.candidates_per_fetch),
                ttl: parsed(&lookup, "ADSTOCK_SIM_TTL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.ttl),
                latency: parsed(&lookup, "ADSTOCK_SIM_LATENCY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.latency),
                fail_every: parsed(&lookup, "ADSTOCK_SIM_FAIL_EVERY").or(defaults.fail_every),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_stock_defaults_to_one() {
        assert_eq!(PlacementConfig::new("a", AdType::Promotion, 0).target_stock_size(), 1);
        assert_eq!(PlacementConfig::new("a", AdType::Promotion, -3).target_stock_size(), 1);
        assert_eq!(PlacementConfig::new("a", AdType::Promotion, 3).target_stock_size(), 3);
    }

    #[test]
    fn stock_size_is_capped() {
        let cfg = PlacementConfig::new("a", AdType::Promotion, 10_000);
        assert_eq!(cfg.target_stock_size(), MAX_TARGET_STOCK);
    }

    #[test]
    fn table_from_json() {
        let json = r#"{"placements": [
            {"id": "home_promo", "ad_type": "promotion", "cs": 3},
            {"id": "feed_banner", "ad_type": "banner"},
            {"id": "splash"}
        ]}"#;
        let table = PlacementTable::from_json(json).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get("home_promo").unwrap().target_stock_size(), 3);
        assert_eq!(table.get("feed_banner").unwrap().ad_type, AdType::Banner);
        // Missing fields fall back to promotion with the default stock
        let splash = table.get("splash").unwrap();
        assert_eq!(splash.ad_type, AdType::Promotion);
        assert_eq!(splash.target_stock_size(), 1);
        assert_eq!(table.ids(), vec!["feed_banner", "home_promo", "splash"]);
    }

    #[test]
    fn table_rejects_duplicates() {
        let json = r#"{"placements": [{"id": "a"}, {"id": "a"}]}"#;
        let err = PlacementTable::from_json(json).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePlacement(id) if id == "a"));
    }

    #[test]
    fn table_rejects_bad_ids() {
        let long = "x".repeat(MAX_PLACEMENT_ID_LEN + 1);
        let json = format!(r#"{{"placements": [{{"id": "{long}"}}]}}"#);
        assert!(matches!(
            PlacementTable::from_json(&json),
            Err(ConfigError::InvalidPlacementId(_))
        ));
        assert!(matches!(
            PlacementTable::from_json(r#"{"placements": [{"id": ""}]}"#),
            Err(ConfigError::InvalidPlacementId(_))
        ));
    }

    #[test]
    fn table_rejects_malformed_json() {
        assert!(matches!(
            PlacementTable::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_missing_file_reports_path() {
        let path = std::env::temp_dir().join("adstock_test_config/does_not_exist.json");
        let err = PlacementTable::load(&path).unwrap_err();
        assert!(err.to_string().contains("does_not_exist.json"));
    }

    #[test]
    fn host_config_from_lookup() {
        let cfg = HostConfig::from_lookup(|key| match key {
            "ADSTOCK_PLACEMENTS" => Some("/etc/adstock/placements.json".into()),
            "ADSTOCK_METRICS_PORT" => Some("9100".into()),
            "ADSTOCK_SWEEP_INTERVAL_MS" => Some("250".into()),
            "ADSTOCK_SIM_FAIL_EVERY" => Some("4".into()),
            "ADSTOCK_SIM_LATENCY_MS" => Some("not a number".into()),
            _ => None,
        });
        assert_eq!(
            cfg.placements_path,
            Some(PathBuf::from("/etc/adstock/placements.json"))
        );
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.sweep_interval, Duration::from_millis(250));
        assert_eq!(cfg.show_interval, Duration::from_millis(15_000));
        assert_eq!(cfg.sim.fail_every, Some(4));
        assert_eq!(cfg.sim.latency, SimConfig::default().latency);
    }
}
