use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Fixed key of the single sync metadata row.
pub const SYNC_METADATA_ID: &str = "iptv_sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Channel,
    Movie,
    Series,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Channel => "channel",
            ContentKind::Movie => "movie",
            ContentKind::Series => "series",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            ContentKind::Channel => "channels",
            ContentKind::Movie => "movies",
            ContentKind::Series => "series",
        }
    }

    /// Path segment used on the public stream URL. Live content has no
    /// subdirectory of its own, so its public paths use the bare form.
    pub fn path_kind(&self) -> &'static str {
        match self {
            ContentKind::Channel => "live",
            ContentKind::Movie => "movie",
            ContentKind::Series => "series",
        }
    }

    pub fn all() -> [ContentKind; 3] {
        [ContentKind::Channel, ContentKind::Movie, ContentKind::Series]
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "channel" | "live" => Ok(ContentKind::Channel),
            "movie" => Ok(ContentKind::Movie),
            "series" => Ok(ContentKind::Series),
            other => Err(format!("unknown content kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub id: String,
    pub position: i64,
    pub name: String,
    pub logo: String,
    pub url: String,
    pub provider_id: String,
    pub group_title: Option<String>,
    pub country: Option<String>,
    pub tvg_id: Option<String>,
    pub season: Option<String>,
    pub episode: Option<String>,
}

impl ContentItem {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            position: row.get("position")?,
            name: row.get("name")?,
            logo: row.get("logo")?,
            url: row.get("url")?,
            provider_id: row.get("provider_id")?,
            group_title: row.get("group_title")?,
            country: row.get("country")?,
            tvg_id: row.get("tvg_id")?,
            season: row.get("season")?,
            episode: row.get("episode")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SyncMetadata {
    pub last_sync: Option<DateTime<Utc>>,
    pub total_channels: i64,
    pub total_movies: i64,
    pub total_series: i64,
    pub channels_with_logo: i64,
    pub movies_with_logo: i64,
    pub series_with_logo: i64,
    pub template_path: Option<String>,
    pub template_bytes: Option<i64>,
}

impl SyncMetadata {
    pub fn total(&self) -> i64 {
        self.total_channels + self.total_movies + self.total_series
    }

    pub fn count_for(&self, kind: ContentKind) -> i64 {
        match kind {
            ContentKind::Channel => self.total_channels,
            ContentKind::Movie => self.total_movies,
            ContentKind::Series => self.total_series,
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let last_sync: Option<NaiveDateTime> = row.get("last_sync")?;
        Ok(Self {
            last_sync: last_sync.map(|dt| Utc.from_utc_datetime(&dt)),
            total_channels: row.get("total_channels")?,
            total_movies: row.get("total_movies")?,
            total_series: row.get("total_series")?,
            channels_with_logo: row.get("channels_with_logo")?,
            movies_with_logo: row.get("movies_with_logo")?,
            series_with_logo: row.get("series_with_logo")?,
            template_path: row.get("template_path")?,
            template_bytes: row.get("template_bytes")?,
        })
    }
}
