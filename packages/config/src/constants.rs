// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Warden

// Resource Limits
pub const WARDEN_CPU_LIMIT: &str = "WARDEN_CPU_LIMIT";
pub const WARDEN_MEMORY_LIMIT: &str = "WARDEN_MEMORY_LIMIT";
pub const WARDEN_MAX_PROCESSES: &str = "WARDEN_MAX_PROCESSES";

// Sandbox Provisioning
pub const WARDEN_BASE_IMAGE: &str = "WARDEN_BASE_IMAGE";
pub const WARDEN_SECURITY_POLICY: &str = "WARDEN_SECURITY_POLICY";
pub const WARDEN_WORKSPACE_PATH: &str = "WARDEN_WORKSPACE_PATH";
pub const WARDEN_STOP_GRACE_SECS: &str = "WARDEN_STOP_GRACE_SECS";
pub const WARDEN_IMAGE_PULL_TIMEOUT_SECS: &str = "WARDEN_IMAGE_PULL_TIMEOUT_SECS";

// Command Execution
pub const WARDEN_ALLOWED_COMMANDS: &str = "WARDEN_ALLOWED_COMMANDS";
pub const WARDEN_COMMAND_TIMEOUT_SECS: &str = "WARDEN_COMMAND_TIMEOUT_SECS";

// Kill Switch
pub const WARDEN_PROCESS_MARKER: &str = "WARDEN_PROCESS_MARKER";
pub const WARDEN_SCRATCH_PREFIX: &str = "WARDEN_SCRATCH_PREFIX";
pub const WARDEN_TEMP_ROOT: &str = "WARDEN_TEMP_ROOT";
pub const WARDEN_POLL_INTERVAL_SECS: &str = "WARDEN_POLL_INTERVAL_SECS";
pub const WARDEN_SAMPLE_TIMEOUT_MS: &str = "WARDEN_SAMPLE_TIMEOUT_MS";
pub const WARDEN_SNAPSHOT_BEFORE_TERMINATION: &str = "WARDEN_SNAPSHOT_BEFORE_TERMINATION";

// Network Isolation
pub const WARDEN_NETWORK_INTERFACE: &str = "WARDEN_NETWORK_INTERFACE";

// Snapshots
pub const WARDEN_SNAPSHOT_DIR: &str = "WARDEN_SNAPSHOT_DIR";

