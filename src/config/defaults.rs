/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Lookup defaults
pub const DEFAULT_REGION: &str = "US";
pub const DEFAULT_CONFIG_FILE: &str = "lookup-provider.toml";

// Provider defaults
pub const DEFAULT_PROVIDER_NAME: &str = "Local Directory";
pub const DEFAULT_DIRECTORY_FILE: &str = "./data/directory.toml";
pub const DEFAULT_SIMULATED_LATENCY_MS: u64 = 250;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

// Avatar cache defaults
pub const DEFAULT_HOT_CAPACITY: usize = 50;
pub const DEFAULT_FETCH_REMOTE: bool = false;

// CLI defaults
pub const DEFAULT_WAIT: &str = "3s";
