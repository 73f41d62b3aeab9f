use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LineaConfig {
    pub paths: PathsSection,
    pub upstream: UpstreamSection,
    pub playlist: PlaylistSection,
    pub ingest: IngestSection,
    pub sessions: SessionsSection,
    pub proxy: ProxySection,
}

impl LineaConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    /// Absolute path of the placeholder template on durable storage.
    pub fn template_path(&self) -> PathBuf {
        Path::new(&self.paths.m3u_dir).join(&self.playlist.template_filename)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
    pub m3u_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    pub feed_url: String,
    pub base_url: String,
    pub download_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistSection {
    pub public_domain: String,
    pub template_filename: String,
    pub default_logo_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSection {
    pub batch_size: usize,
    pub workers: usize,
    pub max_retries: usize,
    pub retry_base_seconds: u64,
    pub delete_batch_size: usize,
    pub delete_max_attempts: usize,
    pub delete_pause_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsSection {
    pub idle_timeout_minutes: i64,
    pub default_max_devices: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySection {
    pub user_agent: String,
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
}

impl ProxySection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

pub fn load_linea_config<P: AsRef<Path>>(path: P) -> Result<LineaConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/linea.toml");
        let config = load_linea_config(path).expect("config should parse");
        assert_eq!(config.ingest.batch_size, 5000);
        assert_eq!(config.sessions.default_max_devices, 2);
        assert!(config.upstream.base_url.starts_with("http://"));
        assert_eq!(
            config.template_path().file_name().unwrap(),
            "playlist_template.m3u"
        );
    }

    #[test]
    fn resolve_path_keeps_absolute_paths() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/linea.toml");
        let config = load_linea_config(path).unwrap();
        assert_eq!(
            config.resolve_path("/var/tmp/feed.m3u"),
            PathBuf::from("/var/tmp/feed.m3u")
        );
        assert_eq!(
            config.resolve_path("cache/feed.m3u"),
            PathBuf::from("/opt/linea/cache/feed.m3u")
        );
    }
}
