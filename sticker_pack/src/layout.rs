//! Where each sticker's files land on disk.

use crate::records::{StickerKind, StickerRecord};
use std::path::{Path, PathBuf};

/// Maps a record to its output files.
pub trait SaveLocation {
    fn pack_dir(&self) -> &Path;

    /// The sticker itself: the still image, or the animation.
    fn primary_path(&self, record: &StickerRecord) -> PathBuf;

    /// Static key frame saved alongside an animated sticker.
    fn key_path(&self, record: &StickerRecord) -> Option<PathBuf>;
}

/// `<out>/<pack>/<id>.png`, `<id>_animation.png` and `<id>_key.png`.
#[derive(Debug, Clone)]
pub struct PackLayout {
    dir: PathBuf,
}

impl PackLayout {
    pub fn new(out_dir: &Path, pack_name: &str) -> Self {
        Self {
            dir: out_dir.join(sanitize_component(pack_name)),
        }
    }
}

impl SaveLocation for PackLayout {
    fn pack_dir(&self) -> &Path {
        &self.dir
    }

    fn primary_path(&self, record: &StickerRecord) -> PathBuf {
        let id = sanitize_component(&record.id);
        match record.kind {
            StickerKind::Static => self.dir.join(format!("{}.png", id)),
            StickerKind::Animated => self.dir.join(format!("{}_animation.png", id)),
        }
    }

    fn key_path(&self, record: &StickerRecord) -> Option<PathBuf> {
        match record.kind {
            StickerKind::Static => None,
            StickerKind::Animated => Some(
                self.dir
                    .join(format!("{}_key.png", sanitize_component(&record.id))),
            ),
        }
    }
}

/// Replaces characters that are not allowed in file names on common
/// filesystems. Never returns an empty string or a dot-only name.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// A sanitized name is always a single, non-empty path component.
        #[test]
        fn prop_sanitized_is_single_component(name in "\\PC{0,24}") {
            let clean = sanitize_component(&name);
            prop_assert!(!clean.is_empty());
            let joined = Path::new("/root").join(&clean);
            prop_assert_eq!(joined.parent(), Some(Path::new("/root")));
        }
    }
}
