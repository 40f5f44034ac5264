use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, time::Duration};
use tokio::fs;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KernelConfig {
    pub http: HttpConf,
    pub arcgis: ArcGisConf,
    pub layers: LayersConf,
    pub subscriptions: SubscriptionsConf,
    pub store: StoreConf,
    pub sweep: SweepConf,
    pub initial_output: InitialOutput,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ArcGisConf {
    pub service_url: String,
    pub token_url: String,
    pub username: String,
    /// Jamais lu depuis le YAML : `GISMIRROR_PASSWORD` uniquement
    #[serde(skip)]
    pub password: String,
    /// Token statique (`GISMIRROR_TOKEN`), prioritaire sur l'échange username/password
    #[serde(skip)]
    pub token: Option<String>,
    pub referer: String,
    pub token_expiration_minutes: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ArcGisConf {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            token_url: String::new(),
            username: String::new(),
            password: String::new(),
            token: None,
            referer: "gismirror".into(),
            token_expiration_minutes: 60,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl ArcGisConf {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LayersConf {
    pub hosts: String,
    pub events: EventLayout,
}

impl Default for LayersConf {
    fn default() -> Self {
        Self { hosts: "0".into(), events: EventLayout::None }
    }
}

/// Répartition des features event sur les couches SIG
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EventLayout {
    /// Events conservés dans le store uniquement
    #[default]
    None,
    Single { layer: String },
    /// Une couche par classe de sévérité
    BySeverity { layers: BTreeMap<i64, String> },
}

impl EventLayout {
    /// Couche cible d'un event de sévérité donnée ; `None` si pas de feature
    pub fn layer_for(&self, severity: i64) -> Option<&str> {
        match self {
            EventLayout::None => None,
            EventLayout::Single { layer } => Some(layer),
            EventLayout::BySeverity { layers } => layers.get(&severity).map(String::as_str),
        }
    }

    /// Toutes les couches event distinctes
    pub fn layers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = match self {
            EventLayout::None => Vec::new(),
            EventLayout::Single { layer } => vec![layer.as_str()],
            EventLayout::BySeverity { layers } => layers.values().map(String::as_str).collect(),
        };
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SubscriptionsConf {
    pub host: String,
    pub event: String,
}

impl Default for SubscriptionsConf {
    fn default() -> Self {
        Self { host: "ns-tcc-hosts".into(), event: "ns-tcc-events".into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConf {
    /// `null` : store en mémoire
    pub data_dir: Option<String>,
}

impl Default for StoreConf {
    fn default() -> Self {
        Self { data_dir: Some("data".into()) }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SweepConf {
    /// 0 = désactivé
    pub interval_secs: u64,
}

impl Default for SweepConf {
    fn default() -> Self {
        Self { interval_secs: 3600 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(transparent)]
pub struct InitialOutput(pub String);

impl Default for InitialOutput {
    fn default() -> Self {
        Self("Initial display".into())
    }
}

impl KernelConfig {
    pub fn from_yaml_str(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let txt = fs::read_to_string(path).await?;
        Self::from_yaml_str(&txt)
    }

    /// Applique les surcharges d'environnement `GISMIRROR_*`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GISMIRROR_SERVICE_URL") {
            self.arcgis.service_url = v;
        }
        if let Some(v) = lookup("GISMIRROR_TOKEN_URL") {
            self.arcgis.token_url = v;
        }
        if let Some(v) = lookup("GISMIRROR_USERNAME") {
            self.arcgis.username = v;
        }
        if let Some(v) = lookup("GISMIRROR_PASSWORD") {
            self.arcgis.password = v;
        }
        if let Some(v) = lookup("GISMIRROR_TOKEN").filter(|t| !t.is_empty()) {
            self.arcgis.token = Some(v);
        }
        if let Some(v) = lookup("GISMIRROR_BIND") {
            self.http.bind = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arcgis.service_url.trim().is_empty() {
            return Err(ConfigError::Invalid("arcgis.service_url is empty".into()));
        }
        if self.layers.hosts.trim().is_empty() {
            return Err(ConfigError::Invalid("layers.hosts is empty".into()));
        }
        if self.arcgis.token.is_none() && self.arcgis.token_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "either GISMIRROR_TOKEN or arcgis.token_url must be set".into(),
            ));
        }
        if let EventLayout::BySeverity { layers } = &self.layers.events {
            if layers.is_empty() {
                return Err(ConfigError::Invalid("layers.events.by_severity has no layer".into()));
            }
        }
        Ok(())
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("GISMIRROR_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut cfg = load_config_from(Path::new(&path)).await;
    cfg.apply_env(|name| std::env::var(name).ok());
    cfg
}

/// Fichier absent ou invalide : configuration par défaut, avec un warning
pub async fn load_config_from(path: &Path) -> KernelConfig {
    if !path.exists() {
        warn!("no {} found, using defaults", path.display());
        return KernelConfig::default();
    }
    KernelConfig::from_file(path).await.unwrap_or_else(|e| {
        warn!("invalid config {}, using defaults: {e}", path.display());
        KernelConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_yaml_gives_defaults() {
        let cfg = KernelConfig::from_yaml_str("  \n").unwrap();
        assert_eq!(cfg.layers.events, EventLayout::None);
        assert_eq!(cfg.initial_output.0, "Initial display");
        assert_eq!(cfg.subscriptions.event, "ns-tcc-events");
    }

    #[test]
    fn test_by_severity_layout() {
        let yaml = r#"
arcgis:
  service_url: https://gis.example.org/arcgis/rest/services/noc/FeatureServer
  token_url: https://gis.example.org/portal/sharing/rest/generateToken
layers:
  hosts: "0"
  events:
    mode: by_severity
    layers:
      0: "1"
      1: "2"
      2: "3"
"#;
        let cfg = KernelConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.layers.events.layer_for(1), Some("2"));
        assert_eq!(cfg.layers.events.layer_for(3), None);
        assert_eq!(cfg.layers.events.layers(), vec!["1", "2", "3"]);
        assert_eq!(cfg.arcgis.max_retries, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_example_config_is_valid() {
        let cfg = KernelConfig::from_yaml_str(include_str!("../kernel.example.yaml")).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.layers.events.layers(), vec!["10", "11", "12"]);
        assert_eq!(cfg.store.data_dir.as_deref(), Some("data"));
    }

    #[tokio::test]
    async fn test_unusable_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("kernel.yaml")).await;
        assert_eq!(cfg.sweep.interval_secs, 3600);

        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "layers: [not, a, map").unwrap();
        let cfg = load_config_from(&broken).await;
        assert_eq!(cfg.layers.hosts, "0");
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GISMIRROR_SERVICE_URL", "http://gis.local/FeatureServer"),
            ("GISMIRROR_TOKEN", "static"),
            ("GISMIRROR_BIND", "127.0.0.1:9000"),
        ]
        .into_iter()
        .collect();

        let mut cfg = KernelConfig::default();
        assert!(cfg.validate().is_err());
        cfg.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.http.bind, "127.0.0.1:9000");
        assert_eq!(cfg.arcgis.token.as_deref(), Some("static"));
        assert!(cfg.validate().is_ok());
    }
}
