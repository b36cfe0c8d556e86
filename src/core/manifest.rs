use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use memget_core::models::record::{DownloadRecord, FetchMethod, GeoPoint, MediaKind};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"downloadMemories\('(.+?)',\s*this,\s*(true|false)\)").unwrap()
});
static COORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Latitude,\s*Longitude:\s*([+-]?\d+\.?\d*),\s*([+-]?\d+\.?\d*)").unwrap()
});
static MID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"mid=([a-zA-Z0-9\-]+)").unwrap());

const ROW_SELECTOR: &str = "body > div.rightpanel > table > tbody > tr";

pub async fn load_manifest(path: &Path) -> anyhow::Result<Vec<DownloadRecord>> {
    let html = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read export file {}", path.display()))?;
    let records = parse_manifest(&html);
    tracing::info!("[manifest] {} record(s) in {}", records.len(), path.display());
    Ok(records)
}

/// Extracts download records from the memories export page.
///
/// Each table row carries its capture date, an optional location and the
/// download link. Pages without the table fall back to scanning the whole
/// document for links, which yields records without metadata.
pub fn parse_manifest(html: &str) -> Vec<DownloadRecord> {
    let doc = Html::parse_document(html);
    let rows = Selector::parse(ROW_SELECTOR).unwrap();

    let mut raw: Vec<RawEntry> = doc.select(&rows).filter_map(parse_row).collect();
    if raw.is_empty() {
        raw = LINK_RE
            .captures_iter(html)
            .map(|c| RawEntry {
                url: c[1].replace("&amp;", "&"),
                method: method_from_flag(&c[2]),
                timestamp: None,
                location: None,
                media_kind: None,
            })
            .collect();
        if !raw.is_empty() {
            tracing::warn!("[manifest] table not found; loaded links without dates or locations");
        }
    }

    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(raw.len());
    for entry in raw {
        let id = record_id(&entry.url);
        if !seen.insert(id.clone()) {
            tracing::debug!("[manifest] duplicate entry {} ignored", id);
            continue;
        }
        records.push(DownloadRecord {
            id,
            url: entry.url,
            method: entry.method,
            timestamp: entry.timestamp,
            location: entry.location,
            media_kind: entry.media_kind,
            index: records.len(),
        });
    }
    records
}

struct RawEntry {
    url: String,
    method: FetchMethod,
    timestamp: Option<DateTime<Utc>>,
    location: Option<GeoPoint>,
    media_kind: Option<MediaKind>,
}

fn parse_row(row: ElementRef<'_>) -> Option<RawEntry> {
    let cells = Selector::parse("td").unwrap();
    let texts: Vec<String> = row
        .select(&cells)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect();

    let (url, method) = find_link(row)?;

    let timestamp = texts.first().and_then(|t| parse_capture_date(t));
    let location = texts.iter().find_map(|t| {
        let c = COORD_RE.captures(t)?;
        let lat = c[1].parse().ok()?;
        let lon = c[2].parse().ok()?;
        GeoPoint::new(lat, lon)
    });
    let media_kind = texts.iter().find_map(|t| match t.to_ascii_lowercase().as_str() {
        "image" => Some(MediaKind::Image),
        "video" => Some(MediaKind::Video),
        _ => None,
    });

    Some(RawEntry {
        url,
        method,
        timestamp,
        location,
        media_kind,
    })
}

/// Attribute values are already entity-decoded by the parser.
fn find_link(row: ElementRef<'_>) -> Option<(String, FetchMethod)> {
    std::iter::once(row)
        .chain(row.descendants().filter_map(ElementRef::wrap))
        .flat_map(|el| el.value().attrs().map(|(_, v)| v))
        .find_map(|value| {
            let c = LINK_RE.captures(value)?;
            Some((c[1].to_string(), method_from_flag(&c[2])))
        })
}

fn method_from_flag(flag: &str) -> FetchMethod {
    if flag == "true" {
        FetchMethod::Get
    } else {
        FetchMethod::Post
    }
}

/// Dates look like `2023-05-01 14:03:22 UTC`; the trailing zone is always UTC.
pub fn parse_capture_date(text: &str) -> Option<DateTime<Utc>> {
    let cleaned = text.replace("UTC", "");
    let cleaned = cleaned.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%d.%m.%Y %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, fmt) {
            return Some(dt.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%d.%m.%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(cleaned, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// The `mid` query value when present, otherwise a hash of the whole URL.
pub fn record_id(url: &str) -> String {
    if let Some(c) = MID_RE.captures(url) {
        return c[1].to_string();
    }
    let digest = Sha256::digest(url.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn page(rows: &str) -> String {
        format!(
            r#"<html><body><div class="leftpanel"></div><div class="rightpanel">
            <table><tbody>
            <tr><th>Date</th><th>Media Type</th><th>Location</th><th></th></tr>
            {}
            </tbody></table></div></body></html>"#,
            rows
        )
    }

    fn row(date: &str, kind: &str, loc: &str, url: &str, get: bool) -> String {
        format!(
            r#"<tr><td>{}</td><td>{}</td><td>{}</td>
            <td><a href="javascript:downloadMemories('{}', this, {});">Download</a></td></tr>"#,
            date, kind, loc, url, get
        )
    }

    #[test]
    fn parses_rows_with_date_location_and_method() {
        let html = page(&format!(
            "{}{}",
            row(
                "2023-05-01 14:03:22 UTC",
                "Image",
                "Latitude, Longitude: 48.26275, 13.296288",
                "https://cdn.example.com/get?uid=u&amp;mid=AB-12&amp;ts=1",
                true
            ),
            row(
                "2022-12-31 23:59:59 UTC",
                "Video",
                "Latitude, Longitude: 0.0, 0.0",
                "https://cdn.example.com/post?mid=CD-34",
                false
            )
        ));
        let records = parse_manifest(&html);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.id, "AB-12");
        assert_eq!(first.url, "https://cdn.example.com/get?uid=u&mid=AB-12&ts=1");
        assert_eq!(first.method, FetchMethod::Get);
        assert_eq!(
            first.timestamp,
            Some(Utc.with_ymd_and_hms(2023, 5, 1, 14, 3, 22).unwrap())
        );
        let loc = first.location.unwrap();
        assert!((loc.latitude - 48.26275).abs() < 1e-9);
        assert!((loc.longitude - 13.296288).abs() < 1e-9);
        assert_eq!(first.media_kind, Some(MediaKind::Image));
        assert_eq!(first.index, 0);

        let second = &records[1];
        assert_eq!(second.method, FetchMethod::Post);
        assert_eq!(second.media_kind, Some(MediaKind::Video));
        assert_eq!(second.index, 1);
        assert_eq!(second.file_stem(), "20221231_235959_CD-34");
    }

    #[test]
    fn rows_without_links_are_ignored() {
        let html = page(&format!(
            "<tr><td>2023-01-01 00:00:00 UTC</td><td>Image</td></tr>{}",
            row("2023-01-02 00:00:00 UTC", "Image", "", "https://x.test/a?mid=A", true)
        ));
        let records = parse_manifest(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "A");
        assert!(records[0].location.is_none());
    }

    #[test]
    fn repeated_ids_keep_first_occurrence() {
        let html = page(&format!(
            "{}{}{}",
            row("2023-01-01 00:00:00 UTC", "Image", "", "https://x.test/a?mid=A", true),
            row("2023-01-05 00:00:00 UTC", "Image", "", "https://x.test/b?mid=A", true),
            row("2023-01-03 00:00:00 UTC", "Image", "", "https://x.test/c?mid=C", true)
        ));
        let records = parse_manifest(&html);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url, "https://x.test/a?mid=A");
        assert_eq!(records[1].id, "C");
        assert_eq!(records[1].index, 1);
    }

    #[test]
    fn falls_back_to_scanning_links_without_table() {
        let html = r#"<html><body>
            <a onclick="downloadMemories('https://x.test/a?mid=Z1', this, false)">x</a>
            </body></html>"#;
        let records = parse_manifest(html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "Z1");
        assert_eq!(records[0].method, FetchMethod::Post);
        assert!(records[0].timestamp.is_none());
    }

    #[test]
    fn out_of_range_coordinates_are_dropped() {
        let html = page(&row(
            "2023-01-01 00:00:00 UTC",
            "Image",
            "Latitude, Longitude: 123.0, 13.0",
            "https://x.test/a?mid=A",
            true,
        ));
        assert!(parse_manifest(&html)[0].location.is_none());
    }

    #[test]
    fn capture_date_formats() {
        assert_eq!(
            parse_capture_date("2023-05-01 14:03:22 UTC"),
            Some(Utc.with_ymd_and_hms(2023, 5, 1, 14, 3, 22).unwrap())
        );
        assert_eq!(
            parse_capture_date("01.05.2023"),
            Some(Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_capture_date("yesterday"), None);
    }

    #[test]
    fn id_falls_back_to_url_hash() {
        let a = record_id("https://x.test/file.jpg");
        assert_eq!(a.len(), 64);
        assert_eq!(a, record_id("https://x.test/file.jpg"));
        assert_ne!(a, record_id("https://x.test/other.jpg"));
    }
}
