use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid template pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type TemplateResult<T> = Result<T, TemplateError>;

pub const DOMAIN_PLACEHOLDER: &str = "{{DOMAIN}}";
pub const USERNAME_PLACEHOLDER: &str = "{{USERNAME}}";
pub const PASSWORD_PLACEHOLDER: &str = "{{PASSWORD}}";

const MISSING_TEMPLATE_PLAYLIST: &str = "#EXTM3U\n\
#EXTINF:-1,Playlist unavailable\n\
# No playlist template found. Run the catalog sync first.\n";

/// Rewrites the raw feed into a credential-free template once per sync,
/// then expands it per request with three whole-string replacements. The
/// cached template is an immutable snapshot swapped on publish/reload, so
/// request handlers never take a write lock.
pub struct TemplateEngine {
    path: PathBuf,
    public_domain: String,
    series_pattern: Regex,
    movie_pattern: Regex,
    live_pattern: Regex,
    cache: RwLock<Option<Arc<String>>>,
}

impl TemplateEngine {
    pub fn new(
        path: impl Into<PathBuf>,
        upstream_base_url: &str,
        public_domain: &str,
    ) -> TemplateResult<Self> {
        let base = regex::escape(upstream_base_url.trim_end_matches('/'));
        Ok(Self {
            path: path.into(),
            public_domain: public_domain.trim_end_matches('/').to_string(),
            series_pattern: Regex::new(&format!(
                r"^{base}/series/[^/]+/[^/]+/(\d+)\.([A-Za-z0-9]+)$"
            ))?,
            movie_pattern: Regex::new(&format!(
                r"^{base}/movie/[^/]+/[^/]+/(\d+)\.([A-Za-z0-9]+)$"
            ))?,
            live_pattern: Regex::new(&format!(r"^{base}/[^/]+/[^/]+/(\d+)$"))?,
            cache: RwLock::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Line-by-line rewrite of the raw feed. Matching is attempted in a
    /// fixed order (series, movie, live) and the first match wins;
    /// non-matching lines pass through untouched.
    pub fn build(&self, feed: &str) -> String {
        let mut out = String::with_capacity(feed.len());
        for line in feed.lines() {
            let line = line.trim_end();
            out.push_str(&self.rewrite_line(line));
            out.push('\n');
        }
        out
    }

    fn rewrite_line(&self, line: &str) -> String {
        if let Some(caps) = self.series_pattern.captures(line) {
            return format!(
                "{domain}/series/{user}/{pass}/{id}.{ext}",
                domain = DOMAIN_PLACEHOLDER,
                user = USERNAME_PLACEHOLDER,
                pass = PASSWORD_PLACEHOLDER,
                id = &caps[1],
                ext = &caps[2],
            );
        }
        if let Some(caps) = self.movie_pattern.captures(line) {
            return format!(
                "{domain}/movie/{user}/{pass}/{id}.{ext}",
                domain = DOMAIN_PLACEHOLDER,
                user = USERNAME_PLACEHOLDER,
                pass = PASSWORD_PLACEHOLDER,
                id = &caps[1],
                ext = &caps[2],
            );
        }
        if let Some(caps) = self.live_pattern.captures(line) {
            return format!(
                "{domain}/{user}/{pass}/{id}",
                domain = DOMAIN_PLACEHOLDER,
                user = USERNAME_PLACEHOLDER,
                pass = PASSWORD_PLACEHOLDER,
                id = &caps[1],
            );
        }
        line.to_string()
    }

    /// Builds the template from the feed, writes it to durable storage
    /// via write-to-temp-then-rename and swaps the in-memory snapshot.
    /// Concurrent readers keep the previous snapshot until the swap.
    pub fn publish(&self, feed: &str) -> TemplateResult<u64> {
        let template = self.build(feed);
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TemplateError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = self.path.with_extension("m3u.tmp");
        std::fs::write(&tmp, template.as_bytes()).map_err(|source| TemplateError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| TemplateError::Io {
            path: self.path.clone(),
            source,
        })?;
        let bytes = template.len() as u64;
        *self.cache.write().unwrap() = Some(Arc::new(template));
        info!(path = %self.path.display(), bytes, "playlist template published");
        Ok(bytes)
    }

    /// Loads the template from durable storage into the cache. Returns
    /// false when no template file exists yet.
    pub fn reload(&self) -> TemplateResult<bool> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let bytes = contents.len();
                *self.cache.write().unwrap() = Some(Arc::new(contents));
                info!(path = %self.path.display(), bytes, "playlist template loaded");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(TemplateError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Personalizes the cached template. Cost is three whole-string
    /// replacements regardless of catalog size; no per-line work happens
    /// on the request path.
    pub fn generate(&self, username: &str, password: &str) -> String {
        let snapshot = self.snapshot().or_else(|| {
            match self.reload() {
                Ok(true) => self.snapshot(),
                Ok(false) => None,
                Err(err) => {
                    warn!(error = %err, "template reload failed");
                    None
                }
            }
        });
        match snapshot {
            Some(template) => template
                .replace(DOMAIN_PLACEHOLDER, &self.public_domain)
                .replace(USERNAME_PLACEHOLDER, username)
                .replace(PASSWORD_PLACEHOLDER, password),
            None => MISSING_TEMPLATE_PLAYLIST.to_string(),
        }
    }

    fn snapshot(&self) -> Option<Arc<String>> {
        self.cache.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn engine(dir: &Path) -> TemplateEngine {
        TemplateEngine::new(
            dir.join("playlist_template.m3u"),
            "http://h:80",
            "http://tv.example.com",
        )
        .unwrap()
    }

    #[test]
    fn series_line_round_trips_through_template_and_expansion() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine.publish("http://h:80/series/u/p/123.mkv\n").unwrap();
        let playlist = engine.generate("bob", "xyz");
        assert_eq!(playlist, "http://tv.example.com/series/bob/xyz/123.mkv\n");
    }

    #[test]
    fn movie_and_live_lines_round_trip() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        engine
            .publish("http://h:80/movie/u/p/99.mp4\nhttp://h:80/u/p/456\n")
            .unwrap();
        let playlist = engine.generate("bob", "xyz");
        assert_eq!(
            playlist,
            "http://tv.example.com/movie/bob/xyz/99.mp4\nhttp://tv.example.com/bob/xyz/456\n"
        );
    }

    #[test]
    fn metadata_and_foreign_lines_pass_through() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let feed = "#EXTM3U\n\
            #EXTINF:-1 tvg-name=\"La 1\" group-title=\"ES|TV\",La 1 HD\n\
            http://other-host:80/u/p/456\n";
        let template = engine.build(feed);
        assert!(template.starts_with("#EXTM3U\n#EXTINF:-1"));
        assert!(template.contains("http://other-host:80/u/p/456"));
        assert!(!template.contains(DOMAIN_PLACEHOLDER));
    }

    #[test]
    fn windows_line_endings_are_stripped() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let template = engine.build("http://h:80/u/p/456\r\n");
        assert_eq!(template, "{{DOMAIN}}/{{USERNAME}}/{{PASSWORD}}/456\n");
    }

    #[test]
    fn generate_without_template_returns_diagnostic_playlist() {
        let dir = tempdir().unwrap();
        let engine = engine(dir.path());
        let playlist = engine.generate("bob", "xyz");
        assert!(playlist.starts_with("#EXTM3U"));
        assert!(playlist.contains("Run the catalog sync"));
    }

    #[test]
    fn publish_leaves_no_partial_file_and_reload_sees_it() {
        let dir = tempdir().unwrap();
        let first = engine(dir.path());
        first.publish("http://h:80/u/p/1\n").unwrap();
        assert!(!dir.path().join("playlist_template.m3u.tmp").exists());

        let second = engine(dir.path());
        assert!(second.reload().unwrap());
        let playlist = second.generate("alice", "pw");
        assert_eq!(playlist, "http://tv.example.com/alice/pw/1\n");
    }
}
