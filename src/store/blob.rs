use crate::store::{BlobStore, StoreError, StoredBlob};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use techblog_core::ImageFormat;
use tokio::fs;
use tracing::{debug, instrument, warn};

pub const ARTICLE_IMAGE_DIR: &str = "articles";

pub fn hash_file(file: impl AsRef<[u8]>) -> u64 {
    seahash::hash(file.as_ref())
}

/// Content addressed name: the same bytes always land on the same path and
/// different bytes never share one.
pub fn new_filename(file: impl AsRef<[u8]>, format: ImageFormat) -> (u64, String) {
    let file = file.as_ref();
    let hash = hash_file(file);
    let encoded = URL_SAFE_NO_PAD.encode(hash.to_le_bytes());
    let ext = format.extension();
    (hash, format!("{encoded}.{}.{ext}", file.len()))
}

pub fn parse_filename(filename: &str) -> Option<u64> {
    let (hash, _) = filename.split_once('.')?;
    let data = URL_SAFE_NO_PAD.decode(hash).ok()?;
    let bytes: [u8; 8] = data.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StoreError::Unavailable(format!("refusing blob path {path}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    async fn put(&self, format: ImageFormat, bytes: Bytes) -> Result<StoredBlob, StoreError> {
        let (_, filename) = new_filename(&bytes, format);
        let reference = format!("{ARTICLE_IMAGE_DIR}/{filename}");
        let target = self.resolve(&reference)?;

        if fs::try_exists(&target).await? {
            debug!(%reference, "identical image already stored");
            return Ok(StoredBlob {
                path: reference,
                fresh: false,
            });
        }

        fs::create_dir_all(self.root.join(ARTICLE_IMAGE_DIR)).await?;
        // concurrent writers each stage their own copy; linking into place
        // fails for every one but the first
        let staging = self
            .root
            .join(ARTICLE_IMAGE_DIR)
            .join(format!(".{filename}.{:016x}.partial", rand::random::<u64>()));
        let linked = match fs::write(&staging, &bytes).await {
            Ok(()) => fs::hard_link(&staging, &target).await,
            Err(why) => Err(why),
        };
        if let Err(why) = fs::remove_file(&staging).await {
            if why.kind() != std::io::ErrorKind::NotFound {
                warn!(%why, staging = %staging.display(), "could not remove staged image");
            }
        }

        let fresh = match linked {
            Ok(()) => true,
            Err(why) if why.kind() == std::io::ErrorKind::AlreadyExists => false,
            Err(why) => return Err(why.into()),
        };
        debug!(%reference, fresh, "stored image");
        Ok(StoredBlob {
            path: reference,
            fresh,
        })
    }

    async fn remove(&self, path: &str) -> Result<(), StoreError> {
        let target = self.resolve(path)?;
        match fs::remove_file(target).await {
            Ok(()) => Ok(()),
            Err(why) if why.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(why) => Err(why.into()),
        }
    }
}
