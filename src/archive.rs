use anyhow::Context;
use async_zip::base::read::mem::ZipFileReader;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Basename → bytes mapping with insertion order preserved.
///
/// Iteration order is the tie-break rule for image matching, so it is a
/// real contract here, not an implementation detail. Inserting an
/// existing basename replaces the bytes in place (last write wins) and
/// keeps the original position.
#[derive(Debug, Default)]
pub struct ImageMap {
    entries: Vec<(String, Vec<u8>)>,
}

impl ImageMap {
    pub fn insert(&mut self, name: String, bytes: Vec<u8>) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = bytes,
            None => self.entries.push((name, bytes)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn is_image_filename(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            let ext = ext.to_lowercase();
            IMAGE_EXTENSIONS.iter().any(|e| *e == ext)
        })
        .unwrap_or(false)
}

/// Extracts image entries from a ZIP archive into an [`ImageMap`].
///
/// Directory entries, macOS metadata (`__MACOSX/`) and dot-files are
/// skipped, as is anything without a known image extension. Paths are
/// stripped to the basename; archives are expected to be flat, so
/// duplicate basenames across subfolders overwrite one another.
/// A corrupt archive fails the whole extraction; a single unreadable
/// entry is logged and skipped.
pub async fn extract_images(bytes: Vec<u8>) -> Result<ImageMap, anyhow::Error> {
    let zip = ZipFileReader::new(bytes)
        .await
        .context("Unable to read the ZIP archive")?;

    let mut images = ImageMap::default();
    for index in 0..zip.file().entries().len() {
        let entry = &zip.file().entries()[index];
        if entry.dir().unwrap_or(true) {
            continue;
        }
        let filename = match entry.filename().as_str() {
            Ok(name) => name.to_string(),
            Err(err) => {
                log::warn!("Skipping ZIP entry with undecodable name: {err}");
                continue;
            }
        };
        if filename.starts_with("__MACOSX/") || filename.starts_with('.') {
            continue;
        }
        let basename = filename.rsplit('/').next().unwrap_or(&filename);
        if basename.starts_with('.') || !is_image_filename(basename) {
            continue;
        }

        let mut reader = match zip.reader_with_entry(index).await {
            Ok(reader) => reader,
            Err(err) => {
                log::error!("Unable to open ZIP entry {filename}: {err}");
                continue;
            }
        };
        let mut data = Vec::new();
        if let Err(err) = reader.read_to_end_checked(&mut data).await {
            log::error!("Unable to read ZIP entry {filename}: {err}");
            continue;
        }
        images.insert(basename.to_string(), data);
    }

    log::info!("Extracted {} images from archive", images.len());
    Ok(images)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_zip::tokio::write::ZipFileWriter;
    use async_zip::{Compression, ZipEntryBuilder};

    pub async fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipFileWriter::with_tokio(Vec::new());
        for (name, data) in entries {
            let builder = ZipEntryBuilder::new((*name).into(), Compression::Stored);
            writer.write_entry_whole(builder, data).await.unwrap();
        }
        writer.close().await.unwrap().into_inner()
    }

    #[tokio::test]
    async fn extracts_flat_images() {
        let bytes = build_zip(&[
            ("BRK001.webp", b"one".as_slice()),
            ("BRK002.png", b"two".as_slice()),
            ("notes.txt", b"skip".as_slice()),
        ])
        .await;
        let images = extract_images(bytes).await.unwrap();
        assert_eq!(2, images.len());
        assert_eq!(Some(b"one".as_slice()), images.get("BRK001.webp"));
        assert_eq!(None, images.get("notes.txt"));
    }

    #[tokio::test]
    async fn skips_directories_and_metadata() {
        let bytes = build_zip(&[
            ("imgs/", b"".as_slice()),
            ("__MACOSX/BRK001.webp", b"meta".as_slice()),
            (".DS_Store", b"meta".as_slice()),
            ("imgs/.hidden.png", b"meta".as_slice()),
            ("imgs/BRK001.webp", b"real".as_slice()),
        ])
        .await;
        let images = extract_images(bytes).await.unwrap();
        assert_eq!(1, images.len());
        assert_eq!(Some(b"real".as_slice()), images.get("BRK001.webp"));
    }

    #[tokio::test]
    async fn duplicate_basenames_are_last_write_wins() {
        let bytes = build_zip(&[
            ("a/BRK001.webp", b"first".as_slice()),
            ("b/BRK001.webp", b"second".as_slice()),
        ])
        .await;
        let images = extract_images(bytes).await.unwrap();
        assert_eq!(1, images.len());
        assert_eq!(Some(b"second".as_slice()), images.get("BRK001.webp"));
    }

    #[tokio::test]
    async fn corrupt_archive_fails() {
        assert!(extract_images(b"not a zip".to_vec()).await.is_err());
    }

    #[test]
    fn image_map_preserves_insertion_order_on_overwrite() {
        let mut map = ImageMap::default();
        map.insert("a.png".into(), vec![1]);
        map.insert("b.png".into(), vec![2]);
        map.insert("a.png".into(), vec![3]);
        assert_eq!(vec!["a.png", "b.png"], map.keys().collect::<Vec<_>>());
        assert_eq!(Some([3u8].as_slice()), map.get("a.png"));
    }

    #[test]
    fn recognizes_image_extensions() {
        assert!(is_image_filename("x.JPG"));
        assert!(is_image_filename("x.webp"));
        assert!(!is_image_filename("x.txt"));
        assert!(!is_image_filename("no_extension"));
    }
}
