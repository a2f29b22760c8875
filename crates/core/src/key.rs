//! Cache keys, filter strings and source URL classification

use crate::request::{DocumentRef, FileLocation};

/// Extension used when a request names none
pub const DEFAULT_EXT: &str = "jpg";

const MEDIA_THUMB_SCHEME: &str = "thumb://";
const VIDEO_THUMB_SCHEME: &str = "vthumb://";

/// Blur intensity selected by a filter marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurLevel {
    /// `b1`
    Light,
    /// `b`
    Normal,
    /// `b2`
    Heavy,
}

impl BlurLevel {
    /// Radius and number of passes applied on the thumbnail path
    pub fn passes(self) -> (u32, u32) {
        match self {
            BlurLevel::Light => (1, 1),
            BlurLevel::Normal => (3, 1),
            BlurLevel::Heavy => (7, 3),
        }
    }
}

/// A parsed filter string such as `80_80`, `50_50_b2` or `d`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Filter {
    /// Target size in physical pixels
    pub size: Option<(f32, f32)>,
    pub blur: Option<BlurLevel>,
    /// Animated sources show only their first frame
    pub first_frame_only: bool,
}

impl Filter {
    pub fn parse(filter: &str, density: f32) -> Self {
        let mut parts = filter.split('_');
        let width = parts.next().and_then(|w| w.parse::<f32>().ok());
        let height = parts.next().and_then(|h| h.parse::<f32>().ok());
        let size = match (width, height) {
            (Some(w), Some(h)) => Some((w * density, h * density)),
            _ => None,
        };

        let blur = if filter.contains("b2") {
            Some(BlurLevel::Heavy)
        } else if filter.contains("b1") {
            Some(BlurLevel::Light)
        } else if filter.contains('b') {
            Some(BlurLevel::Normal)
        } else {
            None
        };

        Self {
            size,
            blur,
            first_frame_only: filter == "d",
        }
    }
}

/// Classification of an entry's http location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceUrl<'a> {
    Http(&'a str),
    /// `thumb://<id>:<path>`, an image thumbnail owned by the media store
    MediaThumb { id: i64, path: &'a str },
    /// `vthumb://<id>:<path>`, a video thumbnail owned by the media store
    VideoThumb { id: i64, path: &'a str },
    LocalPath(&'a str),
}

impl<'a> SourceUrl<'a> {
    pub fn classify(url: &'a str) -> Self {
        if let Some(source) = Self::media_ref(url, MEDIA_THUMB_SCHEME) {
            let (id, path) = source;
            return SourceUrl::MediaThumb { id, path };
        }
        if let Some(source) = Self::media_ref(url, VIDEO_THUMB_SCHEME) {
            let (id, path) = source;
            return SourceUrl::VideoThumb { id, path };
        }
        if url.starts_with("http") {
            SourceUrl::Http(url)
        } else {
            SourceUrl::LocalPath(url)
        }
    }

    fn media_ref(url: &'a str, scheme: &str) -> Option<(i64, &'a str)> {
        let rest = url.strip_prefix(scheme)?;
        let (id, path) = rest.split_once(':')?;
        Some((id.parse().ok()?, path))
    }

    /// Media store id and whether it names a video
    pub fn media_id(&self) -> Option<(i64, bool)> {
        match self {
            SourceUrl::MediaThumb { id, .. } => Some((*id, false)),
            SourceUrl::VideoThumb { id, .. } => Some((*id, true)),
            _ => None,
        }
    }

    /// Files behind media-store and local sources belong to someone else
    pub fn can_delete(&self) -> bool {
        matches!(self, SourceUrl::Http(_))
    }

    pub fn is_media_store(&self) -> bool {
        self.media_id().is_some()
    }
}

/// Extension after the last dot of `url`, or `default` when it is missing,
/// empty or longer than four characters.
pub fn http_url_extension<'a>(url: &'a str, default: &'a str) -> &'a str {
    match url.rfind('.') {
        Some(idx) => {
            let ext = &url[idx + 1..];
            if ext.is_empty() || ext.len() > 4 {
                default
            } else {
                ext
            }
        }
        None => default,
    }
}

/// MD5 hex digest of a remote URL
pub fn http_key(url: &str) -> String {
    format!("{:x}", md5::compute(url.as_bytes()))
}

/// Key and download name of an http image
pub fn http_location_key(url: &str) -> (String, String) {
    let key = http_key(url);
    let name = format!("{}.{}", key, http_url_extension(url, DEFAULT_EXT));
    (key, name)
}

/// Key and download name of a stored file
pub fn file_location_key(location: &FileLocation, ext: &str) -> (String, String) {
    let key = location.key();
    let name = format!("{}.{}", key, ext);
    (key, name)
}

/// Key and download name of a document, `None` for incomplete references
pub fn document_key(document: &DocumentRef) -> Option<(String, String)> {
    if document.id == 0 || document.dc_id == 0 {
        return None;
    }
    let key = format!("{}_{}", document.dc_id, document.id);
    let mut ext = document
        .file_name
        .as_deref()
        .and_then(|name| name.rfind('.').map(|idx| &name[idx..]))
        .unwrap_or("");
    if ext.len() <= 1 {
        ext = if document.mime_type.as_deref() == Some("video/mp4") {
            ".mp4"
        } else {
            ""
        };
    }
    let name = format!("{}{}", key, ext);
    Some((key, name))
}

/// Append the `@filter` suffix
pub fn with_filter(key: &str, filter: Option<&str>) -> String {
    match filter {
        Some(filter) => format!("{}@{}", key, filter),
        None => key.to_string(),
    }
}

/// Animated formats decoded frame by frame instead of as one raster
pub fn is_animated_url(url: &str) -> bool {
    !url.starts_with(MEDIA_THUMB_SCHEME)
        && !url.starts_with(VIDEO_THUMB_SCHEME)
        && (url.ends_with("mp4") || url.ends_with("gif"))
}
