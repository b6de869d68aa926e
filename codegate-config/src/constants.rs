/// File name looked up in the workspace root and in the user config dir.
pub const CONFIG_FILE_NAME: &str = "codegate.toml";

/// Directory under the user's home holding the user-level config.
pub const USER_CONFIG_DIR: &str = ".codegate";

/// Environment variables consulted by [`crate::ConfigManager::load`].
pub mod env {
    pub const CONFIG_PATH: &str = "CODEGATE_CONFIG_PATH";
    pub const WORKSPACE: &str = "CODEGATE_WORKSPACE";
}

pub mod retry {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    /// Upper bound accepted from configuration; the attempt log is sized from it.
    pub const MAX_ATTEMPTS_CEILING: u32 = 32;
}

pub mod sandbox {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
    pub const MIN_TIMEOUT_SECS: u64 = 1;
    pub const MAX_TIMEOUT_SECS: u64 = 1_800;
    pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 256 * 1024;
    pub const DEFAULT_INFRASTRUCTURE_RETRIES: u32 = 1;
    pub const DEFAULT_PYTHON_IMAGE: &str = "python:3.12-slim";
    pub const DEFAULT_NODE_IMAGE: &str = "node:20-slim";
}

pub mod audit {
    pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;
}
