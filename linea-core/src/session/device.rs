use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Tv,
    Mobile,
    Desktop,
    Unknown,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Tv => "tv",
            DeviceClass::Mobile => "mobile",
            DeviceClass::Desktop => "desktop",
            DeviceClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tv" => Ok(DeviceClass::Tv),
            "mobile" => Ok(DeviceClass::Mobile),
            "desktop" => Ok(DeviceClass::Desktop),
            "unknown" => Ok(DeviceClass::Unknown),
            other => Err(format!("unknown device class: {other}")),
        }
    }
}

// Ordered signature tables; evaluation is strictly top-down and the first
// match wins. IPTV applications outrank platform signatures because their
// user agents usually embed one.
const IPTV_APPS: &[(&str, &str, DeviceClass)] = &[
    ("tivimate", "TiviMate", DeviceClass::Tv),
    ("iptv smarters", "IPTV Smarters", DeviceClass::Mobile),
    ("smarters", "IPTV Smarters", DeviceClass::Mobile),
    ("xciptv", "XCIPTV", DeviceClass::Mobile),
    ("ott navigator", "OTT Navigator", DeviceClass::Tv),
    ("perfect player", "Perfect Player", DeviceClass::Tv),
    ("kodi", "Kodi", DeviceClass::Tv),
    ("vlc", "VLC Media Player", DeviceClass::Desktop),
    ("mpv", "MPV Player", DeviceClass::Desktop),
    ("iptv pro", "IPTV Pro", DeviceClass::Mobile),
    ("gse", "GSE Smart IPTV", DeviceClass::Mobile),
    ("implayer", "implayer", DeviceClass::Tv),
    ("duplex", "Duplex IPTV", DeviceClass::Tv),
    ("ibo player", "iBO Player", DeviceClass::Tv),
    ("lazy iptv", "Lazy IPTV", DeviceClass::Tv),
];

const TV_PLATFORMS: &[(&str, &str)] = &[
    ("smarttv", "Smart TV"),
    ("smart-tv", "Smart TV"),
    ("webos", "LG Smart TV"),
    ("tizen", "Samsung Smart TV"),
    ("roku", "Roku"),
    ("fire tv", "Amazon Fire TV"),
    ("firetv", "Amazon Fire TV"),
    ("androidtv", "Android TV"),
    ("chromecast", "Chromecast"),
    ("apple tv", "Apple TV"),
    ("appletv", "Apple TV"),
    ("playstation", "PlayStation"),
    ("xbox", "Xbox"),
];

const BROWSERS: &[(&str, &str)] = &[
    ("chrome", "Chrome"),
    ("firefox", "Firefox"),
    ("safari", "Safari"),
    ("edge", "Edge"),
    ("opera", "Opera"),
];

/// Resolves a raw client identifier string to a display name and device
/// class. Priority order: IPTV applications, TV platforms, mobile
/// platforms, desktop browsers with OS sub-detection, else Unknown.
pub fn detect_device(user_agent: &str) -> (String, DeviceClass) {
    let ua = user_agent.to_lowercase();

    for (signature, name, class) in IPTV_APPS {
        if ua.contains(signature) {
            return (name.to_string(), *class);
        }
    }

    for (signature, name) in TV_PLATFORMS {
        if ua.contains(signature) {
            return (name.to_string(), DeviceClass::Tv);
        }
    }

    if ua.contains("iphone") {
        return ("iPhone".to_string(), DeviceClass::Mobile);
    }
    if ua.contains("ipad") {
        return ("iPad".to_string(), DeviceClass::Mobile);
    }
    if ua.contains("android") {
        let name = if ua.contains("mobile") {
            "Android Phone"
        } else {
            "Android Device"
        };
        return (name.to_string(), DeviceClass::Mobile);
    }

    for (signature, name) in BROWSERS {
        if ua.contains(signature) {
            let os = if ua.contains("windows") {
                "Windows"
            } else if ua.contains("mac") {
                "macOS"
            } else if ua.contains("linux") {
                "Linux"
            } else {
                "Desktop"
            };
            return (format!("{name} - {os}"), DeviceClass::Desktop);
        }
    }

    ("Unknown device".to_string(), DeviceClass::Unknown)
}
