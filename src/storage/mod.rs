mod local;

use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use url::Url;

pub use self::local::LocalDiskStore;

/// What an uploaded file is attached to; decides the storage directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    PostImage,
    Avatar,
}

impl MediaKind {
    pub fn dir(self) -> &'static str {
        match self {
            MediaKind::PostImage => "postImages",
            MediaKind::Avatar => "avatars",
        }
    }
}

/// A file received from a client, fully buffered.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub file_name: Option<String>,
    pub mime: String,
    pub data: Bytes,
}

impl MediaUpload {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Generated file name, unique per upload.
    pub name: String,
    /// Public URL derived from `name`.
    pub path: String,
}

/// Persists uploaded media and hands back the stored name.
///
/// Calls are synchronous so they can run inside an open database
/// transaction without crossing an `.await`.
pub trait BlobStore: Send + Sync {
    fn store(&self, kind: MediaKind, upload: &MediaUpload) -> std::io::Result<StoredBlob>;

    fn remove(&self, kind: MediaKind, name: &str) -> std::io::Result<()>;
}

/// Blobs written on behalf of a transaction that has not committed yet.
/// Dropping without `commit` removes them again.
pub struct PendingBlobs<'a> {
    store: &'a dyn BlobStore,
    kind: MediaKind,
    names: Vec<String>,
    committed: bool,
}

impl<'a> PendingBlobs<'a> {
    pub fn new(store: &'a dyn BlobStore, kind: MediaKind) -> Self {
        Self {
            store,
            kind,
            names: Vec::new(),
            committed: false,
        }
    }

    pub fn store(&mut self, upload: &MediaUpload) -> std::io::Result<StoredBlob> {
        let blob = self.store.store(self.kind, upload)?;
        self.names.push(blob.name.clone());
        Ok(blob)
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingBlobs<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for name in &self.names {
            if let Err(e) = self.store.remove(self.kind, name) {
                tracing::warn!("Failed to remove orphaned blob {}: {}", name, e);
            }
        }
    }
}

/// Generated file name: a time-ordered UUID plus an extension matching the
/// mime type.
pub fn stored_name(upload: &MediaUpload) -> String {
    format!("{}.{}", uuid::Uuid::now_v7().simple(), extension_for(&upload.mime))
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("bin"),
    }
}

/// Public URL for a stored file. Depends only on the kind and stored name.
pub fn public_path(base: &Url, kind: MediaKind, name: &str) -> String {
    let relative = format!("storage/upload/{}/{}", kind.dir(), name);
    base.join(&relative)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| format!("{}{}", base, relative))
}

/// Join `relative` onto `root`, refusing anything that could escape it.
pub fn resolve_under(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe || relative.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(relative))
}
