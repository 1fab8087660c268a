use crate::constants::ENV_PREFIX;
use config::{Config, Environment, File};
use lora_as_error::ASResult;
use lora_as_integration::{IntegrationSettings, Marshaler};
use serde::{self, Deserialize};
use std::{ops::Deref, sync::Arc, time::Duration};

#[derive(Debug, Clone)]
pub struct Settings(Arc<Inner>);

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(config_path: String) -> ASResult<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(config_path.as_str()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("redis.servers"),
            );
        let inner: Inner = builder.build()?.try_deserialize()?;
        Ok(Self(Arc::new(inner)))
    }

    /// Wraps an already built configuration, used by tests and embedders.
    pub fn from_inner(inner: Inner) -> Self {
        Self(Arc::new(inner))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub postgresql: Database,
    #[serde(default)]
    pub redis: Redis,
    #[serde(default)]
    pub application_server: ApplicationServer,
    #[serde(default)]
    pub join_server: JoinServer,
    #[serde(default)]
    pub network_server: NetworkServerClient,
}

#[derive(Debug, Clone, Deserialize)]
pub struct General {
    #[serde(default = "General::log_level_default")]
    pub log_level: String,
    /// Directory for the daily rolling log file.
    #[serde(default = "General::log_dir_default")]
    pub log_dir: String,
}

impl Default for General {
    fn default() -> Self {
        General {
            log_level: General::log_level_default(),
            log_dir: General::log_dir_default(),
        }
    }
}

impl General {
    fn log_level_default() -> String {
        "info".into()
    }

    fn log_dir_default() -> String {
        "logs".into()
    }
}

/// Persistent store. The URL scheme selects the backend
/// (`postgres://...` in production, `sqlite::memory:` or `sqlite://...` otherwise).
#[derive(Debug, Clone, Deserialize)]
pub struct Database {
    #[serde(default = "Database::dsn_default")]
    pub dsn: String,
    #[serde(default = "Database::max_open_connections_default")]
    pub max_open_connections: u32,
    #[serde(default = "Database::min_idle_connections_default")]
    pub min_idle_connections: u32,
    /// Milliseconds.
    #[serde(default = "Database::connect_timeout_default")]
    pub connect_timeout: u64,
    /// Milliseconds.
    #[serde(default = "Database::idle_timeout_default")]
    pub idle_timeout: u64,
    #[serde(default = "Database::automigrate_default")]
    pub automigrate: bool,
}

impl Default for Database {
    fn default() -> Self {
        Database {
            dsn: Database::dsn_default(),
            max_open_connections: Database::max_open_connections_default(),
            min_idle_connections: Database::min_idle_connections_default(),
            connect_timeout: Database::connect_timeout_default(),
            idle_timeout: Database::idle_timeout_default(),
            automigrate: Database::automigrate_default(),
        }
    }
}

impl Database {
    fn dsn_default() -> String {
        "postgres://localhost/chirpstack_as?sslmode=disable".into()
    }

    fn max_open_connections_default() -> u32 {
        10
    }

    fn min_idle_connections_default() -> u32 {
        0
    }

    fn connect_timeout_default() -> u64 {
        10_000
    }

    fn idle_timeout_default() -> u64 {
        600_000
    }

    fn automigrate_default() -> bool {
        true
    }

    #[inline]
    pub fn is_sqlite(&self) -> bool {
        self.dsn.starts_with("sqlite:")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EphemeralBackend {
    #[default]
    Redis,
    /// In-process store, only suitable for a single replica.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Redis {
    #[serde(default)]
    pub backend: EphemeralBackend,
    /// One URL for a single instance, several for a cluster.
    #[serde(default = "Redis::servers_default")]
    pub servers: Vec<String>,
    #[serde(default)]
    pub cluster: bool,
    /// Capacity of the in-process backend.
    #[serde(default = "Redis::memory_capacity_default")]
    pub memory_capacity: u64,
}

impl Default for Redis {
    fn default() -> Self {
        Redis {
            backend: EphemeralBackend::default(),
            servers: Redis::servers_default(),
            cluster: false,
            memory_capacity: Redis::memory_capacity_default(),
        }
    }
}

impl Redis {
    fn servers_default() -> Vec<String> {
        vec!["redis://localhost:6379".into()]
    }

    fn memory_capacity_default() -> u64 {
        100_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationServer {
    #[serde(default)]
    pub codec: Codec,
    #[serde(default)]
    pub integration: Integration,
    #[serde(default)]
    pub fuota_deployment: FuotaDeployment,
    #[serde(default = "CommandSync::multicast_setup_default")]
    pub remote_multicast_setup: CommandSync,
    #[serde(default = "CommandSync::fragmentation_session_default")]
    pub fragmentation_session: CommandSync,
    #[serde(default)]
    pub clock_sync: ClockSync,
    #[serde(default)]
    pub gateway_discovery: GatewayDiscovery,
    #[serde(default)]
    pub downlink: Downlink,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Default for ApplicationServer {
    fn default() -> Self {
        ApplicationServer {
            codec: Codec::default(),
            integration: Integration::default(),
            fuota_deployment: FuotaDeployment::default(),
            remote_multicast_setup: CommandSync::multicast_setup_default(),
            fragmentation_session: CommandSync::fragmentation_session_default(),
            clock_sync: ClockSync::default(),
            gateway_discovery: GatewayDiscovery::default(),
            downlink: Downlink::default(),
            metrics: Metrics::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Codec {
    /// Wall-clock budget for a single JS codec invocation, in milliseconds.
    #[serde(default = "Codec::js_max_execution_time_default")]
    pub js_max_execution_time: u64,
    /// Interpreter stack limit in bytes.
    #[serde(default = "Codec::js_max_stack_size_default")]
    pub js_max_stack_size: usize,
    /// Interpreter heap limit in bytes.
    #[serde(default = "Codec::js_memory_limit_default")]
    pub js_memory_limit: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Codec {
            js_max_execution_time: Codec::js_max_execution_time_default(),
            js_max_stack_size: Codec::js_max_stack_size_default(),
            js_memory_limit: Codec::js_memory_limit_default(),
        }
    }
}

impl Codec {
    fn js_max_execution_time_default() -> u64 {
        100
    }

    fn js_max_stack_size_default() -> usize {
        256 * 1024
    }

    fn js_memory_limit_default() -> usize {
        16 * 1024 * 1024
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Integration {
    #[serde(default)]
    pub marshaler: Marshaler,
    /// Global sinks receiving the events of every application.
    #[serde(default)]
    pub global: Vec<IntegrationSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FuotaDeployment {
    /// Milliseconds between scheduler ticks.
    #[serde(default = "FuotaDeployment::interval_default")]
    pub interval: u64,
    #[serde(default = "FuotaDeployment::batch_size_default")]
    pub batch_size: u64,
    /// Back-off applied to a deployment whose step failed, in milliseconds.
    #[serde(default = "FuotaDeployment::error_backoff_default")]
    pub error_backoff: u64,
}

impl Default for FuotaDeployment {
    fn default() -> Self {
        FuotaDeployment {
            interval: FuotaDeployment::interval_default(),
            batch_size: FuotaDeployment::batch_size_default(),
            error_backoff: FuotaDeployment::error_backoff_default(),
        }
    }
}

impl FuotaDeployment {
    fn interval_default() -> u64 {
        1_000
    }

    fn batch_size_default() -> u64 {
        100
    }

    fn error_backoff_default() -> u64 {
        60_000
    }
}

/// Parameters of a retried application-layer command family.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSync {
    /// Milliseconds between reconciler ticks.
    #[serde(default = "CommandSync::sync_interval_default")]
    pub sync_interval: u64,
    #[serde(default = "CommandSync::sync_batch_size_default")]
    pub sync_batch_size: u64,
    /// Attempts per command before the reconciler gives up.
    #[serde(default = "CommandSync::sync_retries_default")]
    pub sync_retries: u32,
    pub fport: u8,
}

impl Default for CommandSync {
    fn default() -> Self {
        CommandSync::multicast_setup_default()
    }
}

impl CommandSync {
    fn sync_interval_default() -> u64 {
        1_000
    }

    fn sync_batch_size_default() -> u64 {
        100
    }

    fn sync_retries_default() -> u32 {
        3
    }

    pub fn multicast_setup_default() -> Self {
        CommandSync {
            sync_interval: CommandSync::sync_interval_default(),
            sync_batch_size: CommandSync::sync_batch_size_default(),
            sync_retries: CommandSync::sync_retries_default(),
            fport: lora_as_lorawan::applayer::multicastsetup::DEFAULT_FPORT,
        }
    }

    pub fn fragmentation_session_default() -> Self {
        CommandSync {
            fport: lora_as_lorawan::applayer::fragmentation::DEFAULT_FPORT,
            ..CommandSync::multicast_setup_default()
        }
    }

    #[inline]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClockSync {
    #[serde(default = "ClockSync::fport_default")]
    pub fport: u8,
}

impl Default for ClockSync {
    fn default() -> Self {
        ClockSync {
            fport: ClockSync::fport_default(),
        }
    }
}

impl ClockSync {
    fn fport_default() -> u8 {
        lora_as_lorawan::applayer::clocksync::DEFAULT_FPORT
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayDiscovery {
    /// Milliseconds between ping scheduler ticks.
    #[serde(default = "GatewayDiscovery::interval_default")]
    pub interval: u64,
    /// Lifetime of the MIC lookup entry, in milliseconds.
    #[serde(default = "GatewayDiscovery::lookup_ttl_default")]
    pub lookup_ttl: u64,
}

impl Default for GatewayDiscovery {
    fn default() -> Self {
        GatewayDiscovery {
            interval: GatewayDiscovery::interval_default(),
            lookup_ttl: GatewayDiscovery::lookup_ttl_default(),
        }
    }
}

impl GatewayDiscovery {
    fn interval_default() -> u64 {
        1_000
    }

    fn lookup_ttl_default() -> u64 {
        10_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Downlink {
    /// Lifetime of the per-payload de-duplication lock, in milliseconds.
    #[serde(default = "Downlink::lock_ttl_default")]
    pub lock_ttl: u64,
}

impl Default for Downlink {
    fn default() -> Self {
        Downlink {
            lock_ttl: Downlink::lock_ttl_default(),
        }
    }
}

impl Downlink {
    fn lock_ttl_default() -> u64 {
        100
    }
}

/// Retention of aggregated metrics buckets, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct Metrics {
    #[serde(default = "Metrics::minute_ttl_default")]
    pub minute_ttl: u64,
    #[serde(default = "Metrics::hour_ttl_default")]
    pub hour_ttl: u64,
    #[serde(default = "Metrics::day_ttl_default")]
    pub day_ttl: u64,
    #[serde(default = "Metrics::month_ttl_default")]
    pub month_ttl: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            minute_ttl: Metrics::minute_ttl_default(),
            hour_ttl: Metrics::hour_ttl_default(),
            day_ttl: Metrics::day_ttl_default(),
            month_ttl: Metrics::month_ttl_default(),
        }
    }
}

impl Metrics {
    fn minute_ttl_default() -> u64 {
        2 * 3600
    }

    fn hour_ttl_default() -> u64 {
        48 * 3600
    }

    fn day_ttl_default() -> u64 {
        90 * 24 * 3600
    }

    fn month_ttl_default() -> u64 {
        730 * 24 * 3600
    }
}

/// A key-encryption key shared with a peer, identified by its label.
#[derive(Debug, Clone, Deserialize)]
pub struct KekSet {
    pub label: String,
    /// Hex encoded AES key (16, 24 or 32 bytes).
    pub kek: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinServer {
    #[serde(default = "JoinServer::bind_default")]
    pub bind: String,
    /// Label of the KEK used to wrap AppSKeys destined to the application server.
    #[serde(default)]
    pub as_kek_label: String,
    #[serde(default)]
    pub kek: Vec<KekSet>,
}

impl Default for JoinServer {
    fn default() -> Self {
        JoinServer {
            bind: JoinServer::bind_default(),
            as_kek_label: String::new(),
            kek: Vec::new(),
        }
    }
}

impl JoinServer {
    fn bind_default() -> String {
        "0.0.0.0:8003".into()
    }

    pub fn kek_for_label(&self, label: &str) -> Option<&KekSet> {
        if label.is_empty() {
            return None;
        }
        self.kek.iter().find(|k| k.label == label)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkServerClient {
    /// Per-request timeout in milliseconds.
    #[serde(default = "NetworkServerClient::request_timeout_default")]
    pub request_timeout: u64,
}

impl Default for NetworkServerClient {
    fn default() -> Self {
        NetworkServerClient {
            request_timeout: NetworkServerClient::request_timeout_default(),
        }
    }
}

impl NetworkServerClient {
    fn request_timeout_default() -> u64 {
        5_000
    }
}
