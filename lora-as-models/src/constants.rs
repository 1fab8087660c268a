// Constants shared across the application server crates.

/// Default configuration file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "lora-app-server.toml";

/// Environment variable prefix for configuration overrides (`LORA_AS__SECTION__KEY`).
pub const ENV_PREFIX: &str = "LORA_AS";

/// Ephemeral-store key prefix for gateway ping lookups, suffixed with the hex MIC.
pub const GW_PING_KEY_PREFIX: &str = "lora:as:gwping";

/// Ephemeral-store key prefix for downlink de-duplication locks.
pub const DOWNLINK_LOCK_KEY_PREFIX: &str = "lora:as:downlink:lock";

/// Ephemeral-store key prefix for aggregated metrics.
pub const METRICS_KEY_PREFIX: &str = "lora:as:metrics";

/// Largest JoinNonce representable on air (24 bits).
pub const MAX_JOIN_NONCE: u32 = (1 << 24) - 1;

/// Valid application FPort range for downlinks.
pub const MIN_APP_FPORT: u8 = 1;
pub const MAX_APP_FPORT: u8 = 224;
