use url::Url;

use crate::types::MediaCategory;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "heic", "avif",
];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi", "m4v", "3gp"];
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "csv", "rtf", "odt", "zip", "rar",
];

/// Classify an attachment URL by the file extension of its path.
///
/// Query strings and fragments are ignored, and percent-encoded path
/// separators (as produced by object-storage download links) are honored.
pub fn media_category_of(raw_url: &str) -> MediaCategory {
    let path = match Url::parse(raw_url) {
        Ok(url) => url.path().to_owned(),
        Err(_) => raw_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_owned(),
    };

    let Some(extension) = extension_of(&path) else {
        return MediaCategory::Unknown;
    };

    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        MediaCategory::Image
    } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        MediaCategory::Video
    } else if DOCUMENT_EXTENSIONS.contains(&extension.as_str()) {
        MediaCategory::Document
    } else {
        MediaCategory::Unknown
    }
}

fn extension_of(path: &str) -> Option<String> {
    let last_segment = path
        .rsplit(['/', '\\'])
        .next()?
        .rsplit("%2F")
        .next()?
        .rsplit("%2f")
        .next()?;
    let (stem, extension) = last_segment.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}
