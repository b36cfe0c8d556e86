use memget_core::models::record::MediaKind;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentFormat {
    Jpeg,
    Png,
    Webp,
    Mp4,
    Mov,
    Zip,
}

impl ContentFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContentFormat::Jpeg => "jpg",
            ContentFormat::Png => "png",
            ContentFormat::Webp => "webp",
            ContentFormat::Mp4 => "mp4",
            ContentFormat::Mov => "mov",
            ContentFormat::Zip => "zip",
        }
    }

    /// `None` for containers that hold media rather than being media.
    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            ContentFormat::Jpeg | ContentFormat::Png | ContentFormat::Webp => {
                Some(MediaKind::Image)
            }
            ContentFormat::Mp4 | ContentFormat::Mov => Some(MediaKind::Video),
            ContentFormat::Zip => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ContentFormat::Jpeg),
            "png" => Some(ContentFormat::Png),
            "webp" => Some(ContentFormat::Webp),
            "mp4" | "m4v" => Some(ContentFormat::Mp4),
            "mov" => Some(ContentFormat::Mov),
            "zip" => Some(ContentFormat::Zip),
            _ => None,
        }
    }

    pub fn from_url(url: &str) -> Option<Self> {
        let parsed = url::Url::parse(url).ok()?;
        let last = parsed.path_segments()?.next_back()?;
        let (_, ext) = last.rsplit_once('.')?;
        Self::from_extension(ext)
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ContentFormat::Jpeg),
            "image/png" => Some(ContentFormat::Png),
            "image/webp" => Some(ContentFormat::Webp),
            "video/quicktime" => Some(ContentFormat::Mov),
            "application/zip" | "application/x-zip-compressed" => Some(ContentFormat::Zip),
            m if m.starts_with("video/") => Some(ContentFormat::Mp4),
            _ => None,
        }
    }

    /// Identifies a payload from its leading bytes.
    pub fn sniff(head: &[u8]) -> Option<Self> {
        if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(ContentFormat::Jpeg);
        }
        if head.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Some(ContentFormat::Png);
        }
        if head.starts_with(b"PK\x03\x04") {
            return Some(ContentFormat::Zip);
        }
        if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
            return Some(ContentFormat::Webp);
        }
        if head.len() >= 12 && &head[4..8] == b"ftyp" {
            if &head[8..12] == b"qt  " {
                return Some(ContentFormat::Mov);
            }
            return Some(ContentFormat::Mp4);
        }
        None
    }
}

/// A payload written to its final location by a `MediaSource`.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub format: ContentFormat,
    pub content_type: Option<String>,
    pub bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_extension_wins_when_known() {
        assert_eq!(
            ContentFormat::from_url("https://cdn.example.com/media/clip.MP4?sig=1"),
            Some(ContentFormat::Mp4)
        );
        assert_eq!(ContentFormat::from_url("https://cdn.example.com/get?mid=1"), None);
    }

    #[test]
    fn content_type_ignores_parameters() {
        assert_eq!(
            ContentFormat::from_content_type("image/jpeg; charset=binary"),
            Some(ContentFormat::Jpeg)
        );
        assert_eq!(
            ContentFormat::from_content_type("video/webm"),
            Some(ContentFormat::Mp4)
        );
        assert_eq!(ContentFormat::from_content_type("text/html"), None);
    }

    #[test]
    fn sniff_common_signatures() {
        assert_eq!(ContentFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ContentFormat::Jpeg));
        assert_eq!(ContentFormat::sniff(b"PK\x03\x04rest"), Some(ContentFormat::Zip));
        assert_eq!(
            ContentFormat::sniff(b"\x00\x00\x00\x18ftypmp42"),
            Some(ContentFormat::Mp4)
        );
        assert_eq!(
            ContentFormat::sniff(b"\x00\x00\x00\x14ftypqt  "),
            Some(ContentFormat::Mov)
        );
        assert_eq!(ContentFormat::sniff(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some(ContentFormat::Webp));
        assert_eq!(ContentFormat::sniff(b"<html>"), None);
    }

    #[test]
    fn zip_has_no_media_kind() {
        assert_eq!(ContentFormat::Zip.media_kind(), None);
        assert_eq!(ContentFormat::Mov.media_kind(), Some(MediaKind::Video));
    }
}
