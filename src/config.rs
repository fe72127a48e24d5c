use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory where uploaded PDF blobs are kept.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "deterministic".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorConfig {
    /// Text-extraction backend. Currently only the local pdf parser.
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Documents picked up per batch run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retry budget per document; batch selection skips documents past it.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,
    /// Cron expression for `shikin schedule` (seconds field included).
    #[serde(default = "default_cron")]
    pub cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            cron: default_cron(),
        }
    }
}

fn default_batch_size() -> usize {
    3
}
fn default_max_attempts() -> i64 {
    5
}
fn default_cron() -> String {
    // Every five minutes.
    "0 */5 * * * *".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Bearer secret required by the cron trigger endpoint.
    #[serde(default)]
    pub cron_secret: Option<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified for the openai provider");
            }
        }
        "deterministic" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai, deterministic, or disabled.",
            other
        ),
    }

    match config.extractor.backend.as_str() {
        "local" => {}
        other => anyhow::bail!("Unknown extractor backend: '{}'. Must be local.", other),
    }

    if config.scheduler.batch_size == 0 {
        anyhow::bail!("scheduler.batch_size must be > 0");
    }
    if config.scheduler.max_attempts < 1 {
        anyhow::bail!("scheduler.max_attempts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("shikin.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let tmp = std::env::temp_dir().join("shikin-config-defaults");
        std::fs::create_dir_all(&tmp).unwrap();
        let path = write_config(
            &tmp,
            r#"
[db]
path = "data/shikin.sqlite"

[storage]
root = "data/blobs"

[server]
bind = "127.0.0.1:7411"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.embedding.provider, "deterministic");
        assert_eq!(config.embedding.dims, 1536);
        assert_eq!(config.scheduler.batch_size, 3);
        assert_eq!(config.scheduler.max_attempts, 5);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk_size() {
        let tmp = std::env::temp_dir().join("shikin-config-overlap");
        std::fs::create_dir_all(&tmp).unwrap();
        let path = write_config(
            &tmp,
            r#"
[db]
path = "data/shikin.sqlite"

[storage]
root = "data/blobs"

[chunking]
chunk_size = 100
overlap = 100

[server]
bind = "127.0.0.1:7411"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn rejects_unknown_embedding_provider() {
        let tmp = std::env::temp_dir().join("shikin-config-provider");
        std::fs::create_dir_all(&tmp).unwrap();
        let path = write_config(
            &tmp,
            r#"
[db]
path = "data/shikin.sqlite"

[storage]
root = "data/blobs"

[embedding]
provider = "quantum"

[server]
bind = "127.0.0.1:7411"
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
