use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }
}

/// How the export expects a media link to be requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FetchMethod {
    #[default]
    Get,
    /// POST to the URL without its query; the query string is sent as a form body.
    Post,
}

/// One manifest entry.
///
/// `id` is derived from the URL only, so it stays stable when the same
/// export is loaded again after an interrupted run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub method: FetchMethod,
    pub timestamp: Option<DateTime<Utc>>,
    pub location: Option<GeoPoint>,
    pub media_kind: Option<MediaKind>,
    pub index: usize,
}

impl DownloadRecord {
    /// File stem used for every file this record produces.
    pub fn file_stem(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("{}_{}", ts.format("%Y%m%d_%H%M%S"), self.id),
            None => self.id.clone(),
        }
    }

    pub fn has_metadata(&self) -> bool {
        self.timestamp.is_some() || self.location.is_some()
    }
}
