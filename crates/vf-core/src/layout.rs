//! Object-store key layout.
//!
//! Every key the pipeline reads or writes is built here so the upload side,
//! the worker and the API agree on where things live:
//!
//! ```text
//! {folder}/{video_id}/source/{file_name}
//! {folder}/{video_id}/{quality}/index.m3u8
//! {folder}/{video_id}/{quality}/segment_000.ts
//! {folder}/{video_id}/master.m3u8
//! {folder}/thumbnails/{category}/{video_id}_thumbnail.jpg
//! ```

use crate::config::FolderConfig;
use crate::ids::VideoId;
use crate::video::Category;

/// Builds object keys for a configured folder mapping.
#[derive(Debug, Clone, Default)]
pub struct StorageLayout {
    folders: FolderConfig,
}

impl StorageLayout {
    pub fn new(folders: FolderConfig) -> Self {
        Self { folders }
    }

    pub fn folder(&self, category: Category) -> &str {
        self.folders.folder(category)
    }

    /// Key of the uploaded original.
    pub fn source_key(&self, category: Category, video_id: VideoId, file_name: &str) -> String {
        format!(
            "{}/{video_id}/source/{}",
            self.folder(category),
            sanitize_file_name(file_name)
        )
    }

    /// Prefix under which one rung's playlist and segments live.
    pub fn variant_prefix(&self, category: Category, video_id: VideoId, quality: &str) -> String {
        format!("{}/{video_id}/{quality}", self.folder(category))
    }

    /// Key of a file inside a rung's prefix.
    pub fn variant_object_key(
        &self,
        category: Category,
        video_id: VideoId,
        quality: &str,
        file_name: &str,
    ) -> String {
        format!(
            "{}/{file_name}",
            self.variant_prefix(category, video_id, quality)
        )
    }

    pub fn master_playlist_key(&self, category: Category, video_id: VideoId) -> String {
        format!("{}/{video_id}/master.m3u8", self.folder(category))
    }

    pub fn thumbnail_key(&self, category: Category, video_id: VideoId) -> String {
        format!(
            "{}/thumbnails/{}/{video_id}_thumbnail.jpg",
            self.folder(category),
            category.slug()
        )
    }
}

/// Reduce a client-supplied file name to a safe single key segment.
///
/// Directory components are dropped and anything outside `[A-Za-z0-9._-]`
/// becomes `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "source".to_string()
    } else {
        cleaned.to_string()
    }
}
