// Media link classification
// The core only distinguishes images, external embeds, and no media at all;
// external media has an indeterminate end time and suspends the active countdown

/// How the session treats an exercise's media link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Still image; the active countdown runs normally
    Image,
    /// Embedded external media (video etc.); ends via an explicit signal
    External,
    /// No media
    None,
}

const IMAGE_EXTENSIONS: [&str; 4] = [".jpeg", ".jpg", ".png", ".webp"];

/// Classifies a resource link
pub fn classify_media(link: Option<&str>) -> MediaKind {
    let Some(link) = link else {
        return MediaKind::None;
    };
    if link.is_empty() {
        return MediaKind::None;
    }
    if link.starts_with("data:image") {
        return MediaKind::Image;
    }
    let lower = link.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return MediaKind::Image;
    }
    MediaKind::External
}
