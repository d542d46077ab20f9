//! Node configuration: file format, environment settings, and the builder
//! that turns them into an immutable [`NodeConfiguration`].
//!
//! Precedence is explicit option > environment > node file > built-in
//! default. The builder enforces cross-cutting invariants: authentication
//! implies persistence.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::ClusterEventKind;

/// Default discovery port used to seed static discovery.
pub const DEFAULT_DISCOVERY_PORT: u16 = 47500;
/// Default on-heap ceiling in megabytes.
pub const DEFAULT_ON_HEAP_MB: u64 = 1024;
/// Default off-heap data region size in megabytes.
pub const DEFAULT_OFF_HEAP_MB: u64 = 2048;
/// Default WAL segment size.
pub const DEFAULT_WAL_SEGMENT_SIZE: u64 = 256 * 1024 * 1024;
/// Name of the primary data region.
pub const DEFAULT_REGION_NAME: &str = "default";

const MB: u64 = 1024 * 1024;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: String, value: String },

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    #[error("invalid cluster endpoint: {0:?}")]
    Endpoint(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("TLS {0} path is not set")]
    MissingTlsMaterial(&'static str),
}

// ── Resolved configuration ─────────────────────────────────────────

/// Discovery settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Local discovery port; engine default when unset.
    pub local_port: Option<u16>,
    /// Static seed endpoints (`host:port` or `host:port..port`).
    pub static_endpoints: Vec<String>,
}

/// Heap ceiling for the engine runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLimits {
    pub initial_mb: u64,
    pub max_mb: u64,
}

impl HeapLimits {
    /// Initial heap is half the maximum.
    pub fn from_max_mb(max_mb: u64) -> Self {
        Self {
            initial_mb: max_mb / 2,
            max_mb,
        }
    }
}

/// Page eviction strategy of a data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageEvictionMode {
    Disabled,
    RandomLru,
    Random2Lru,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRegionConfig {
    pub name: String,
    /// Maximum size in bytes; engine default when unset.
    pub max_size_bytes: Option<u64>,
    pub persistence_enabled: bool,
    pub metrics_enabled: bool,
    pub page_eviction: PageEvictionMode,
}

impl Default for DataRegionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_REGION_NAME.to_string(),
            max_size_bytes: None,
            persistence_enabled: false,
            metrics_enabled: false,
            page_eviction: PageEvictionMode::Disabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStorageConfig {
    pub wal_segment_size: u64,
    pub metrics_enabled: bool,
    pub default_region: DataRegionConfig,
}

impl Default for DataStorageConfig {
    fn default() -> Self {
        Self {
            wal_segment_size: DEFAULT_WAL_SEGMENT_SIZE,
            metrics_enabled: false,
            default_region: DataRegionConfig::default(),
        }
    }
}

/// A key-store, trust-store, or certificate file and its password.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreMaterial {
    pub path: PathBuf,
    pub password: Option<String>,
}

impl fmt::Debug for StoreMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreMaterial")
            .field("path", &self.path)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// TLS for node-to-node traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerTls {
    pub key_store: StoreMaterial,
    pub trust_store: StoreMaterial,
    pub protocol: String,
}

/// TLS for the administrative client connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientTls {
    pub certificate: StoreMaterial,
    pub skip_server_certificate_validation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsConfig {
    /// How long metrics are kept; forever when unset.
    pub expire_time: Option<Duration>,
    pub log_frequency: Duration,
    pub update_frequency: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            expire_time: None,
            log_frequency: Duration::from_secs(60),
            update_frequency: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub failure_detection: Duration,
    pub client_failure_detection: Duration,
    pub network: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            failure_detection: Duration::from_secs(30),
            client_failure_detection: Duration::from_secs(60),
            network: Duration::from_secs(10),
        }
    }
}

/// Engine configuration for one lifecycle attempt.
///
/// Produced by [`NodeConfigurationBuilder::build`]; never mutated while
/// the node runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfiguration {
    /// Instance name; generated by the engine when unset.
    pub instance_name: Option<String>,
    pub consistent_id: Option<String>,
    pub work_dir: PathBuf,
    pub discovery: DiscoveryConfig,
    pub heap: Option<HeapLimits>,
    pub storage: DataStorageConfig,
    pub authentication_enabled: bool,
    pub tls: Option<ServerTls>,
    pub metrics: MetricsConfig,
    pub timeouts: Timeouts,
    pub included_events: Vec<ClusterEventKind>,
    /// Rendered engine-native configuration file.
    pub engine_config_path: Option<PathBuf>,
}

impl Default for NodeConfiguration {
    fn default() -> Self {
        Self {
            instance_name: None,
            consistent_id: None,
            work_dir: PathBuf::from("work"),
            discovery: DiscoveryConfig::default(),
            heap: None,
            storage: DataStorageConfig::default(),
            authentication_enabled: false,
            tls: None,
            metrics: MetricsConfig::default(),
            timeouts: Timeouts::default(),
            included_events: ClusterEventKind::ALL.to_vec(),
            engine_config_path: None,
        }
    }
}

impl NodeConfiguration {
    pub fn persistence_enabled(&self) -> bool {
        self.storage.default_region.persistence_enabled
    }

    /// Load a node file as the base configuration.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: NodeFile = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        file.into_configuration()
    }
}

// ── Node file (TOML) ───────────────────────────────────────────────

/// On-disk node file. Every field is optional; missing values keep the
/// built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeFile {
    pub instance_name: Option<String>,
    pub consistent_id: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub authentication_enabled: Option<bool>,
    pub discovery: Option<DiscoveryFile>,
    pub memory: Option<MemoryFile>,
    pub timeouts: Option<TimeoutsFile>,
    pub metrics: Option<MetricsFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryFile {
    pub local_port: Option<u16>,
    pub endpoints: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFile {
    pub on_heap_mb: Option<u64>,
    pub off_heap_mb: Option<u64>,
    pub persistence_enabled: Option<bool>,
    pub wal_segment_size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutsFile {
    pub failure_detection: Option<String>,
    pub client_failure_detection: Option<String>,
    pub network: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsFile {
    pub expire_time: Option<String>,
    pub log_frequency: Option<String>,
    pub update_frequency: Option<String>,
}

impl NodeFile {
    pub fn into_configuration(self) -> ConfigResult<NodeConfiguration> {
        let mut cfg = NodeConfiguration::default();
        cfg.instance_name = self.instance_name;
        cfg.consistent_id = self.consistent_id;
        if let Some(dir) = self.work_dir {
            cfg.work_dir = dir;
        }
        cfg.authentication_enabled = self.authentication_enabled.unwrap_or(false);

        if let Some(d) = self.discovery {
            cfg.discovery.local_port = d.local_port;
            cfg.discovery.static_endpoints = d.endpoints.unwrap_or_default();
        }

        if let Some(m) = self.memory {
            if let Some(mb) = m.on_heap_mb {
                cfg.heap = Some(HeapLimits::from_max_mb(mb));
            }
            if let Some(mb) = m.off_heap_mb {
                apply_off_heap(&mut cfg.storage, mb)?;
            }
            if let Some(p) = m.persistence_enabled {
                cfg.storage.default_region.persistence_enabled = p;
            }
            if let Some(size) = m.wal_segment_size {
                cfg.storage.wal_segment_size = size;
            }
        }

        if let Some(t) = self.timeouts {
            let d = cfg.timeouts;
            cfg.timeouts = Timeouts {
                failure_detection: duration_or("timeouts.failure_detection", t.failure_detection, d.failure_detection)?,
                client_failure_detection: duration_or(
                    "timeouts.client_failure_detection",
                    t.client_failure_detection,
                    d.client_failure_detection,
                )?,
                network: duration_or("timeouts.network", t.network, d.network)?,
            };
        }

        if let Some(m) = self.metrics {
            let d = cfg.metrics;
            cfg.metrics = MetricsConfig {
                expire_time: match m.expire_time {
                    Some(v) => Some(require_duration("metrics.expire_time", &v)?),
                    None => d.expire_time,
                },
                log_frequency: duration_or("metrics.log_frequency", m.log_frequency, d.log_frequency)?,
                update_frequency: duration_or(
                    "metrics.update_frequency",
                    m.update_frequency,
                    d.update_frequency,
                )?,
            };
        }

        Ok(cfg)
    }
}

fn duration_or(field: &str, value: Option<String>, default: Duration) -> ConfigResult<Duration> {
    match value {
        Some(v) => require_duration(field, &v),
        None => Ok(default),
    }
}

fn require_duration(field: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "2m". A bare number is
/// seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn off_heap_overflow(mb: u64) -> ConfigError {
    ConfigError::Invalid {
        key: "off-heap memory".to_string(),
        value: format!("{mb} MB"),
    }
}

fn apply_off_heap(storage: &mut DataStorageConfig, mb: u64) -> ConfigResult<()> {
    let bytes = mb.checked_mul(MB).ok_or_else(|| off_heap_overflow(mb))?;
    storage.default_region.max_size_bytes = Some(bytes);
    storage.default_region.page_eviction = PageEvictionMode::Random2Lru;
    Ok(())
}

// ── Builder ────────────────────────────────────────────────────────

/// Accumulates configuration changes and produces validated
/// [`NodeConfiguration`] values.
///
/// The lifecycle manager keeps one builder for its whole life and calls
/// [`build`](Self::build) at the start of every run, so changes made
/// while stopped show up on the next start.
#[derive(Debug, Clone, Default)]
pub struct NodeConfigurationBuilder {
    config: NodeConfiguration,
    off_heap_metrics: bool,
    /// Last off-heap size that did not fit in bytes; fails `build`.
    rejected_off_heap_mb: Option<u64>,
}

impl NodeConfigurationBuilder {
    pub fn new(base: NodeConfiguration) -> Self {
        Self {
            config: base,
            off_heap_metrics: false,
            rejected_off_heap_mb: None,
        }
    }

    /// The pending (unvalidated) configuration.
    pub fn pending(&self) -> &NodeConfiguration {
        &self.config
    }

    pub fn instance_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.config.instance_name = Some(name.into());
        self
    }

    pub fn server_port(&mut self, port: u16) -> &mut Self {
        self.config.discovery.local_port = Some(port);
        self
    }

    pub fn cluster_endpoints(&mut self, endpoints: Vec<String>) -> &mut Self {
        self.config.discovery.static_endpoints = endpoints;
        self
    }

    /// Heap ceiling; the initial heap is half of it.
    pub fn on_heap_memory_mb(&mut self, mb: u64) -> &mut Self {
        self.config.heap = Some(HeapLimits::from_max_mb(mb));
        self
    }

    /// Maximum size of the default data region. A size too large to
    /// express in bytes is reported by [`build`](Self::build).
    pub fn off_heap_memory_mb(&mut self, mb: u64) -> &mut Self {
        self.rejected_off_heap_mb = apply_off_heap(&mut self.config.storage, mb).err().map(|_| mb);
        self
    }

    pub fn persistence(&mut self, enabled: bool) -> &mut Self {
        self.config.storage.default_region.persistence_enabled = enabled;
        self
    }

    pub fn consistent_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.config.consistent_id = Some(id.into());
        self
    }

    /// Enabling authentication also enables persistence.
    pub fn authentication(&mut self, enabled: bool) -> &mut Self {
        self.config.authentication_enabled = enabled;
        if enabled {
            self.persistence(true);
        }
        self
    }

    pub fn server_tls(&mut self, tls: Option<ServerTls>) -> &mut Self {
        self.config.tls = tls;
        self
    }

    pub fn metrics(&mut self, metrics: MetricsConfig) -> &mut Self {
        self.config.metrics = metrics;
        self
    }

    pub fn off_heap_metrics(&mut self, enabled: bool) -> &mut Self {
        self.off_heap_metrics = enabled;
        self
    }

    pub fn work_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.config.work_dir = dir.into();
        self
    }

    pub fn engine_config_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.config.engine_config_path = Some(path.into());
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(&self) -> ConfigResult<NodeConfiguration> {
        if let Some(mb) = self.rejected_off_heap_mb {
            return Err(off_heap_overflow(mb));
        }

        let mut cfg = self.config.clone();

        if cfg.authentication_enabled && !cfg.persistence_enabled() {
            debug!("authentication requires persistence, enabling it");
            cfg.storage.default_region.persistence_enabled = true;
        }

        if self.off_heap_metrics {
            cfg.storage.metrics_enabled = true;
            cfg.storage.default_region.metrics_enabled = true;
        }

        if cfg.discovery.local_port == Some(0) {
            return Err(ConfigError::Zero("discovery port"));
        }
        if let Some(heap) = cfg.heap {
            if heap.max_mb == 0 {
                return Err(ConfigError::Zero("on-heap memory"));
            }
        }
        if cfg.storage.default_region.max_size_bytes == Some(0) {
            return Err(ConfigError::Zero("off-heap memory"));
        }
        for endpoint in &cfg.discovery.static_endpoints {
            validate_endpoint(endpoint)?;
        }
        if let Some(tls) = &cfg.tls {
            if tls.key_store.path.as_os_str().is_empty() {
                return Err(ConfigError::MissingTlsMaterial("key store"));
            }
            if tls.trust_store.path.as_os_str().is_empty() {
                return Err(ConfigError::MissingTlsMaterial("trust store"));
            }
        }

        Ok(cfg)
    }
}

/// Accepts `host`, `host:port` and `host:port..port`.
fn validate_endpoint(endpoint: &str) -> ConfigResult<()> {
    let invalid = || ConfigError::Endpoint(endpoint.to_string());
    let (host, ports) = match endpoint.rsplit_once(':') {
        Some((h, p)) => (h, Some(p)),
        None => (endpoint, None),
    };
    if host.trim().is_empty() {
        return Err(invalid());
    }
    if let Some(ports) = ports {
        let (lo, hi) = match ports.split_once("..") {
            Some((lo, hi)) => (lo, hi),
            None => (ports, ports),
        };
        let lo: u16 = lo.parse().map_err(|_| invalid())?;
        let hi: u16 = hi.parse().map_err(|_| invalid())?;
        if lo == 0 || hi < lo {
            return Err(invalid());
        }
    }
    Ok(())
}

// ── Environment ────────────────────────────────────────────────────

/// What to do when a peer leaves the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeLeftPolicy {
    /// Log only; partition-loss events drive remediation.
    #[default]
    DeferToPartitionLoss,
    /// Reset lost partitions on every cache right away.
    ResetAllCaches,
}

impl FromStr for NodeLeftPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "defer" | "log" | "defer-to-partition-loss" => Ok(Self::DeferToPartitionLoss),
            "reset" | "reset-all" | "reset-all-caches" => Ok(Self::ResetAllCaches),
            _ => Err(ConfigError::Invalid {
                key: "NODE_LEFT_POLICY".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Settings read from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSettings {
    pub on_heap_mb: Option<u64>,
    pub off_heap_mb: Option<u64>,
    pub use_static_discovery: bool,
    pub default_consistent_id: Option<String>,
    pub authentication_enabled: bool,
    pub namespace: Option<String>,
    pub service_name: Option<String>,
    pub admin_password: Option<String>,
    pub use_ssl: bool,
    pub use_client_ssl: bool,
    pub key_store: Option<StoreMaterial>,
    pub trust_store: Option<StoreMaterial>,
    pub client_certificate: Option<StoreMaterial>,
    pub metrics: MetricsConfig,
    pub off_heap_metrics: bool,
    pub node_left_policy: NodeLeftPolicy,
    pub credential_debounce: Option<Duration>,
    /// Admin client endpoint override for the password bootstrap.
    pub admin_endpoint: Option<String>,
    pub admin_socket_timeout: Option<Duration>,
}

impl EnvSettings {
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str| get(key).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
        let store = |path_key: &str, password_key: &str| {
            get(path_key).map(|p| StoreMaterial {
                path: PathBuf::from(p),
                password: get(password_key),
            })
        };
        let megabytes = |key: &str| {
            get(key).and_then(|v| match v.trim().parse::<u64>() {
                Ok(mb) => Some(mb),
                Err(_) => {
                    warn!(key, value = %v, "ignoring non-numeric memory setting");
                    None
                }
            })
        };
        let duration = |key: &str| -> ConfigResult<Option<Duration>> {
            match get(key) {
                Some(v) => require_duration(key, &v).map(Some),
                None => Ok(None),
            }
        };

        let defaults = MetricsConfig::default();
        let metrics = MetricsConfig {
            expire_time: duration("METRICS_EXPIRE_TIME")?.or(defaults.expire_time),
            log_frequency: duration("METRICS_LOG_FREQUENCY")?.unwrap_or(defaults.log_frequency),
            update_frequency: duration("METRICS_UPDATE_FREQUENCY")?
                .unwrap_or(defaults.update_frequency),
        };

        let node_left_policy = match get("NODE_LEFT_POLICY") {
            Some(v) => v.parse()?,
            None => NodeLeftPolicy::default(),
        };

        Ok(Self {
            on_heap_mb: megabytes("DEFAULT_ON_HEAP_MEMORY"),
            off_heap_mb: megabytes("DEFAULT_OFF_HEAP_MEMORY"),
            use_static_discovery: flag("USE_TCP_DISCOVERY_STATIC_IP_FINDER"),
            default_consistent_id: get("WEBSITE_INSTANCE_ID"),
            authentication_enabled: flag("ENABLE_AUTHENTICATION"),
            namespace: get("K8S_NAMESPACE"),
            service_name: get("K8S_SERVICE_NAME"),
            admin_password: get("IGNITE_USER_PASSWORD"),
            use_ssl: flag("USE_SSL"),
            use_client_ssl: flag("USE_CLIENT_SSL"),
            key_store: store("SSL_KEY_STORE_FILE_PATH", "SSL_KEY_STORE_PASSWORD"),
            trust_store: store("SSL_TRUST_STORE_FILE_PATH", "SSL_TRUST_STORE_PASSWORD"),
            client_certificate: store(
                "SSL_CLIENT_CERTIFICATE_PATH",
                "SSL_CLIENT_CERTIFICATE_PASSWORD",
            ),
            metrics,
            off_heap_metrics: flag("ENABLE_OFF_HEAP_METRICS"),
            node_left_policy,
            credential_debounce: duration("CREDENTIAL_DEBOUNCE")?,
            admin_endpoint: get("ADMIN_CLIENT_ENDPOINT").map(|v| v.trim().to_string()),
            admin_socket_timeout: duration("ADMIN_CLIENT_SOCKET_TIMEOUT")?,
        })
    }

    /// Server TLS material, when `USE_SSL` is on.
    pub fn server_tls(&self) -> ConfigResult<Option<ServerTls>> {
        if !self.use_ssl {
            return Ok(None);
        }
        let key_store = self
            .key_store
            .clone()
            .ok_or(ConfigError::MissingTlsMaterial("key store"))?;
        let trust_store = self
            .trust_store
            .clone()
            .ok_or(ConfigError::MissingTlsMaterial("trust store"))?;
        Ok(Some(ServerTls {
            key_store,
            trust_store,
            protocol: "TLSv1.2".to_string(),
        }))
    }

    /// Admin client TLS material, when `USE_CLIENT_SSL` is on.
    pub fn client_tls(&self) -> ConfigResult<Option<ClientTls>> {
        if !self.use_client_ssl {
            return Ok(None);
        }
        let certificate = self
            .client_certificate
            .clone()
            .ok_or(ConfigError::MissingTlsMaterial("client certificate"))?;
        Ok(Some(ClientTls {
            certificate,
            skip_server_certificate_validation: true,
        }))
    }

    /// Credential files to watch for rotation. Empty unless some form of
    /// TLS is enabled.
    pub fn credential_paths(&self) -> Vec<PathBuf> {
        if !(self.use_ssl || self.use_client_ssl) {
            return Vec::new();
        }
        [&self.key_store, &self.trust_store, &self.client_certificate]
            .into_iter()
            .flatten()
            .map(|m| m.path.clone())
            .collect()
    }
}

// ── Explicit options ───────────────────────────────────────────────

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct NodeOptions {
    pub config_file: Option<PathBuf>,
    pub off_heap_mb: Option<u64>,
    pub on_heap_mb: Option<u64>,
    pub discovery_port: Option<u16>,
    pub cluster_endpoints: Vec<String>,
    pub consistent_id: Option<String>,
    pub persistence_enabled: bool,
}

/// Combine explicit options, environment and defaults into a builder.
///
/// `default_endpoints` is only consulted when static discovery is on and
/// no endpoints were given explicitly.
pub fn resolve<F>(
    options: &NodeOptions,
    env: &EnvSettings,
    default_endpoints: F,
) -> ConfigResult<NodeConfigurationBuilder>
where
    F: FnOnce() -> Vec<String>,
{
    let base = match &options.config_file {
        Some(path) => NodeConfiguration::from_file(path)?,
        None => NodeConfiguration::default(),
    };
    let file_on_heap = base.heap.map(|h| h.max_mb);
    let file_off_heap = base.storage.default_region.max_size_bytes.map(|b| b / MB);

    let mut builder = NodeConfigurationBuilder::new(base);
    builder
        .metrics(env.metrics)
        .off_heap_metrics(env.off_heap_metrics)
        .server_tls(env.server_tls()?);

    if env.authentication_enabled {
        builder.authentication(true);
    }

    let off_heap_mb = options
        .off_heap_mb
        .or(env.off_heap_mb)
        .or(file_off_heap)
        .unwrap_or(DEFAULT_OFF_HEAP_MB);
    if off_heap_mb.checked_mul(MB).is_none() {
        return Err(off_heap_overflow(off_heap_mb));
    }
    builder.off_heap_memory_mb(off_heap_mb);
    builder.on_heap_memory_mb(
        options
            .on_heap_mb
            .or(env.on_heap_mb)
            .or(file_on_heap)
            .unwrap_or(DEFAULT_ON_HEAP_MB),
    );

    if let Some(port) = options.discovery_port {
        builder.server_port(port);
    }

    if !options.cluster_endpoints.is_empty() {
        builder.cluster_endpoints(options.cluster_endpoints.clone());
    } else if env.use_static_discovery {
        builder.cluster_endpoints(default_endpoints());
    }

    if let Some(id) = options.consistent_id.clone().or_else(|| env.default_consistent_id.clone()) {
        builder.consistent_id(id);
    }

    if options.persistence_enabled {
        builder.persistence(true);
    }

    Ok(builder)
}

/// `<local IPv4>:47500`, the seed used when static discovery is on and
/// nothing else was given.
pub fn default_discovery_endpoints() -> Vec<String> {
    vec![format!("{}:{DEFAULT_DISCOVERY_PORT}", local_ipv4())]
}

/// Best-effort local IPv4 address, falling back to loopback.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn local_ipv4() -> Ipv4Addr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(IpAddr::V4(ip)) if !ip.is_unspecified() => ip,
        _ => Ipv4Addr::LOCALHOST,
    }
}
