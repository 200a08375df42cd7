use std::path::{Path, PathBuf};

use url::Url;

use super::{public_path, stored_name, BlobStore, MediaKind, MediaUpload, StoredBlob};

/// Stores media under `<root>/upload/<kind>/`.
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    root: PathBuf,
    public_base: Url,
}

impl LocalDiskStore {
    pub fn new(root: impl Into<PathBuf>, public_url: &str) -> anyhow::Result<Self> {
        let mut public_base = Url::parse(public_url)?;
        // Url::join replaces the last segment unless the base ends in '/'
        if !public_base.path().ends_with('/') {
            let path = format!("{}/", public_base.path());
            public_base.set_path(&path);
        }
        Ok(Self {
            root: root.into(),
            public_base,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, kind: MediaKind) -> PathBuf {
        self.root.join("upload").join(kind.dir())
    }
}

impl BlobStore for LocalDiskStore {
    fn store(&self, kind: MediaKind, upload: &MediaUpload) -> std::io::Result<StoredBlob> {
        let dir = self.dir(kind);
        std::fs::create_dir_all(&dir)?;

        let name = stored_name(upload);
        std::fs::write(dir.join(&name), &upload.data)?;

        Ok(StoredBlob {
            path: public_path(&self.public_base, kind, &name),
            name,
        })
    }

    fn remove(&self, kind: MediaKind, name: &str) -> std::io::Result<()> {
        match std::fs::remove_file(self.dir(kind).join(name)) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
