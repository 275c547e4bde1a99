use crate::archive::ImageMap;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use lazy_regex::regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Object storage for product images. Uploads overwrite on conflict:
/// the path is the original filename, so re-uploading a filename
/// replaces prior content and keeps the same public URL.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, anyhow::Error>;
}

pub struct FilesystemImageStore {
    root: PathBuf,
    public_base: String,
}

impl FilesystemImageStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageStore for FilesystemImageStore {
    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, anyhow::Error> {
        // Basename only, uploads never escape the bucket directory.
        let filename = filename
            .rsplit(['/', '\\'])
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| anyhow!("Empty image filename"))?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Unable to create image directory {:?}", self.root))?;
        let path = self.root.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Unable to write image {path:?}"))?;
        Ok(format!("{}/{filename}", self.public_base))
    }
}

/// In-process store used by the degraded mode and by tests.
#[derive(Default)]
pub struct MemoryImageStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryImageStore {
    pub fn len(&self) -> usize {
        self.files.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, anyhow::Error> {
        let mut files = self
            .files
            .lock()
            .map_err(|_| anyhow!("Image store lock poisoned"))?;
        files.insert(filename.to_string(), bytes.to_vec());
        Ok(format!("memory://products/{filename}"))
    }
}

pub fn strip_image_extension(name: &str) -> String {
    regex!(r"(?i)\.(jpe?g|png|gif|webp)$")
        .replace(name, "")
        .to_string()
}

/// Finds the archive entry for a product code.
///
/// First pass: case-insensitive containment of the code in the basename,
/// so `CODE.webp` and `prefix_CODE_suffix.webp` both match. Second pass:
/// equality after stripping image extensions from both sides. Within a
/// pass the first match in map insertion order wins; there is no scoring.
pub fn match_image<'a>(code: &str, images: &'a ImageMap) -> Option<&'a str> {
    let code = code.trim().to_lowercase();
    if code.is_empty() {
        return None;
    }
    if let Some(key) = images.keys().find(|key| key.to_lowercase().contains(&code)) {
        return Some(key);
    }
    let stem = strip_image_extension(&code);
    images
        .keys()
        .find(|key| strip_image_extension(&key.to_lowercase()) == stem)
}

/// Matches and uploads the cover image for one product code. Both a
/// missing match and a failed upload yield `None`: image problems never
/// fail the product row.
pub async fn resolve_product_image(
    store: &dyn ImageStore,
    code: &str,
    images: &ImageMap,
) -> Option<String> {
    let key = match_image(code, images)?;
    let bytes = images.get(key)?;
    match store.upload(key, bytes).await {
        Ok(url) => {
            log::info!("Uploaded image {key} for product {code}");
            Some(url)
        }
        Err(err) => {
            log::error!("Unable to upload image {key} for product {code}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(keys: &[&str]) -> ImageMap {
        let mut images = ImageMap::default();
        for key in keys {
            images.insert(key.to_string(), vec![0]);
        }
        images
    }

    #[test]
    fn matches_exact_and_substring() {
        let images = map(&["BRK001.webp", "other.png"]);
        assert_eq!(Some("BRK001.webp"), match_image("BRK001", &images));
        assert_eq!(Some("BRK001.webp"), match_image("brk001", &images));

        let images = map(&["xBRK001y.png"]);
        assert_eq!(Some("xBRK001y.png"), match_image("BRK001", &images));
    }

    #[test]
    fn falls_back_to_stripped_extension_equality() {
        let images = map(&["BRK001.png"]);
        // Code carries its own extension and contains no key verbatim.
        assert_eq!(Some("BRK001.png"), match_image("BRK001.webp", &images));
    }

    #[test]
    fn first_match_in_insertion_order_wins() {
        let images = map(&["a_BRK001.webp", "b_BRK001.webp"]);
        assert_eq!(Some("a_BRK001.webp"), match_image("BRK001", &images));
    }

    #[test]
    fn no_match_yields_none() {
        let images = map(&["BRK002.webp"]);
        assert_eq!(None, match_image("BRK001", &images));
        assert_eq!(None, match_image("", &images));
        assert_eq!(None, match_image("BRK002", &ImageMap::default()));
    }

    #[tokio::test]
    async fn memory_store_overwrites_on_conflict() {
        let store = MemoryImageStore::default();
        let url1 = store.upload("BRK001.webp", b"one").await.unwrap();
        let url2 = store.upload("BRK001.webp", b"two").await.unwrap();
        assert_eq!(url1, url2);
        assert_eq!(1, store.len());
    }

    #[tokio::test]
    async fn filesystem_store_writes_and_builds_public_url() {
        let root = std::env::temp_dir().join(format!("brk-images-{}", uuid::Uuid::new_v4()));
        let store = FilesystemImageStore::new(&root, "http://localhost:8080/products/");
        let url = store.upload("sub/dir/BRK001.webp", b"bytes").await.unwrap();
        assert_eq!("http://localhost:8080/products/BRK001.webp", url);
        let written = tokio::fs::read(root.join("BRK001.webp")).await.unwrap();
        assert_eq!(b"bytes".to_vec(), written);
        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn failed_upload_resolves_to_none() {
        struct FailingStore;
        #[async_trait]
        impl ImageStore for FailingStore {
            async fn upload(&self, _: &str, _: &[u8]) -> Result<String, anyhow::Error> {
                Err(anyhow!("bucket unavailable"))
            }
        }
        let images = map(&["BRK001.webp"]);
        assert_eq!(
            None,
            resolve_product_image(&FailingStore, "BRK001", &images).await
        );
    }
}
