use regex::Regex;

use super::models::{ContentItem, ContentKind};

const EXTINF_PREFIX: &str = "#EXTINF:";
const GROUP_TITLE_ATTR: &str = "group-title=\"";
const TVG_LOGO_ATTR: &str = "tvg-logo=\"";
const TVG_ID_ATTR: &str = "tvg-id=\"";

const SERIES_URL_MARKER: &str = "/series/";
const MOVIE_URL_MARKER: &str = "/movie/";

/// One playlist entry before classification: the attributes of an
/// `#EXTINF` line plus the URL line that follows it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub name: String,
    pub group_title: String,
    pub logo: String,
    pub tvg_id: String,
    pub url: String,
}

/// Per-class count of entries that carried their own logo in the feed,
/// recorded before missing logos are filled with the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogoStats {
    pub channels: i64,
    pub movies: i64,
    pub series: i64,
}

impl LogoStats {
    pub fn for_kind(&self, kind: ContentKind) -> i64 {
        match kind {
            ContentKind::Channel => self.channels,
            ContentKind::Movie => self.movies,
            ContentKind::Series => self.series,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassifiedFeed {
    pub channels: Vec<ContentItem>,
    pub movies: Vec<ContentItem>,
    pub series: Vec<ContentItem>,
    pub with_logo: LogoStats,
}

impl ClassifiedFeed {
    pub fn items_for(&self, kind: ContentKind) -> &[ContentItem] {
        match kind {
            ContentKind::Channel => &self.channels,
            ContentKind::Movie => &self.movies,
            ContentKind::Series => &self.series,
        }
    }

    pub fn count_for(&self, kind: ContentKind) -> usize {
        self.items_for(kind).len()
    }

    pub fn total(&self) -> usize {
        self.channels.len() + self.movies.len() + self.series.len()
    }
}

pub struct FeedParser {
    series_pattern: Regex,
    country_pattern: Regex,
    default_logo: String,
}

impl FeedParser {
    pub fn new(default_logo: impl Into<String>) -> Self {
        Self {
            series_pattern: Regex::new(r"[Ss](\d{1,2})\s*[Ee](\d{1,2})").expect("valid regex"),
            country_pattern: Regex::new(r"^[|\s]*([A-Z]{2})[|\s]").expect("valid regex"),
            default_logo: default_logo.into(),
        }
    }

    /// Parses M3U text into raw entries. An entry is an `#EXTINF` line
    /// followed by a non-comment URL line; anything else is skipped.
    pub fn parse(&self, text: &str) -> Vec<RawEntry> {
        let mut entries = Vec::new();
        let mut current: Option<RawEntry> = None;

        for line in text.lines() {
            let line = line.trim();
            if line.starts_with(EXTINF_PREFIX) {
                let name = line
                    .rsplit_once(',')
                    .map(|(_, name)| name.trim().to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                current = Some(RawEntry {
                    name,
                    group_title: attr_value(line, GROUP_TITLE_ATTR),
                    logo: attr_value(line, TVG_LOGO_ATTR),
                    tvg_id: attr_value(line, TVG_ID_ATTR),
                    url: String::new(),
                });
            } else if !line.is_empty() && !line.starts_with('#') {
                if let Some(mut entry) = current.take() {
                    entry.url = line.to_string();
                    entries.push(entry);
                }
            }
        }

        entries
    }

    /// Series detection takes precedence over movie detection: a URL can
    /// carry both markers and a name can match the `SxxExx` pattern even
    /// when the URL does not.
    pub fn classify(&self, url: &str, name: &str) -> ContentKind {
        let url_lower = url.to_lowercase();
        if url_lower.contains(SERIES_URL_MARKER) || self.series_pattern.is_match(name) {
            return ContentKind::Series;
        }
        if url_lower.contains(MOVIE_URL_MARKER) {
            return ContentKind::Movie;
        }
        ContentKind::Channel
    }

    pub fn season_episode(&self, name: &str) -> Option<(String, String)> {
        self.series_pattern.captures(name).map(|caps| {
            (
                format!("{:0>2}", &caps[1]),
                format!("{:0>2}", &caps[2]),
            )
        })
    }

    pub fn country_code(&self, group: &str) -> Option<String> {
        self.country_pattern
            .captures(group)
            .map(|caps| caps[1].to_string())
    }

    /// Classifies parsed entries into the three content classes and
    /// assigns 1-based contiguous positions within each class.
    pub fn classify_feed(&self, entries: &[RawEntry]) -> ClassifiedFeed {
        let mut feed = ClassifiedFeed::default();

        for entry in entries {
            let kind = self.classify(&entry.url, &entry.name);
            let has_logo = !entry.logo.is_empty();
            if has_logo {
                match kind {
                    ContentKind::Channel => feed.with_logo.channels += 1,
                    ContentKind::Movie => feed.with_logo.movies += 1,
                    ContentKind::Series => feed.with_logo.series += 1,
                }
            }
            let bucket = match kind {
                ContentKind::Channel => &mut feed.channels,
                ContentKind::Movie => &mut feed.movies,
                ContentKind::Series => &mut feed.series,
            };
            let position = bucket.len() as i64 + 1;
            let (season, episode) = if kind == ContentKind::Series {
                match self.season_episode(&entry.name) {
                    Some((season, episode)) => (Some(season), Some(episode)),
                    None => (None, None),
                }
            } else {
                (None, None)
            };
            bucket.push(ContentItem {
                id: position.to_string(),
                position,
                name: entry.name.clone(),
                logo: if has_logo {
                    entry.logo.clone()
                } else {
                    self.default_logo.clone()
                },
                url: entry.url.clone(),
                provider_id: provider_id(&entry.url),
                group_title: if entry.group_title.is_empty() {
                    None
                } else {
                    Some(entry.group_title.clone())
                },
                country: self.country_code(&entry.group_title),
                tvg_id: if entry.tvg_id.is_empty() {
                    None
                } else {
                    Some(entry.tvg_id.clone())
                },
                season,
                episode,
            });
        }

        feed
    }
}

/// Provider-assigned id: the terminal path segment of the origin URL
/// with any extension stripped.
pub fn provider_id(url: &str) -> String {
    let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    last.split('.').next().unwrap_or("").to_string()
}

fn attr_value(line: &str, attr: &str) -> String {
    line.split_once(attr)
        .and_then(|(_, rest)| rest.split('"').next())
        .unwrap_or("")
        .to_string()
}
