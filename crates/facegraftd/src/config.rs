use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Model cache directory.
    pub model_dir: PathBuf,
    /// Optional TOML file overriding the built-in download candidates.
    pub catalog_file: Option<PathBuf>,
    /// Directory that relative target references resolve against.
    pub template_dir: PathBuf,
    /// Directory generated images are written to.
    pub output_dir: PathBuf,
    /// Maximum concurrently processed batch targets.
    pub batch_workers: usize,
    /// Per-request timeout for model downloads.
    pub download_timeout_secs: u64,
    /// Upper bound on a single model download.
    pub max_download_bytes: u64,
    /// Delete source images once consumed (for upload spool directories).
    pub cleanup_inputs: bool,
    /// Skip the swap model and serve demo output.
    pub disable_swap: bool,
}

impl Config {
    /// Load configuration from `FACEGRAFT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEGRAFT_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facegraft_models::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegraft");

        Self {
            model_dir,
            catalog_file: std::env::var("FACEGRAFT_CATALOG").ok().map(PathBuf::from),
            template_dir: std::env::var("FACEGRAFT_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("templates")),
            output_dir: std::env::var("FACEGRAFT_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join("output")),
            batch_workers: env_usize("FACEGRAFT_BATCH_WORKERS", 2),
            download_timeout_secs: env_u64("FACEGRAFT_DOWNLOAD_TIMEOUT_SECS", 300),
            max_download_bytes: env_u64("FACEGRAFT_MAX_DOWNLOAD_BYTES", 2 * 1024 * 1024 * 1024),
            cleanup_inputs: env_flag("FACEGRAFT_CLEANUP_INPUTS", false),
            disable_swap: env_flag("FACEGRAFT_DISABLE_SWAP", false),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}
