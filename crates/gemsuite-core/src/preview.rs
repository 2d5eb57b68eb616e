//! Revocable preview handles
//!
//! A preview is a small decoded thumbnail of a picked image, addressed by a
//! handle. Handles are acquired when an image is picked and must be revoked
//! when the image is replaced or cleared; the store counts live handles so a
//! leak shows up as a growing `live_count`.

use std::collections::HashMap;

use crate::codec::ImageFile;
use crate::error::Result;

/// Downscaled RGB pixels, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
    pixels: Vec<[u8; 3]>,
}

impl Thumbnail {
    /// Decode `bytes` and shrink to fit `max_width` x `max_height`, keeping
    /// the aspect ratio.
    pub fn from_bytes(bytes: &[u8], max_width: u32, max_height: u32) -> Result<Self> {
        let image = image::load_from_memory(bytes)?;
        let (source_width, source_height) = (image.width(), image.height());
        let (max_width, max_height) = (max_width.max(1), max_height.max(1));
        // Small images are kept as they are, never enlarged
        let small = if source_width > max_width || source_height > max_height {
            image.thumbnail(max_width, max_height).to_rgb8()
        } else {
            image.to_rgb8()
        };

        Ok(Self {
            width: small.width(),
            height: small.height(),
            source_width,
            source_height,
            pixels: small.pixels().map(|p| p.0).collect(),
        })
    }

    /// Read `file` and decode its thumbnail on the blocking pool. Read
    /// failures surface as `ImageRead`, undecodable content as `ImageDecode`.
    pub async fn load(file: &ImageFile, max_width: u32, max_height: u32) -> Result<Self> {
        let bytes = file.read_bytes().await?;
        tokio::task::spawn_blocking(move || Self::from_bytes(&bytes, max_width, max_height)).await?
    }

    pub fn from_pixels(width: u32, height: u32, pixels: Vec<[u8; 3]>) -> Self {
        Self {
            width,
            height,
            source_width: width,
            source_height: height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get((y * self.width + x) as usize).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreviewHandle(u64);

#[derive(Debug, Default)]
pub struct PreviewStore {
    next_id: u64,
    entries: HashMap<u64, Thumbnail>,
    revoked: u64,
}

impl PreviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, thumbnail: Thumbnail) -> PreviewHandle {
        self.next_id += 1;
        self.entries.insert(self.next_id, thumbnail);
        PreviewHandle(self.next_id)
    }

    pub fn get(&self, handle: PreviewHandle) -> Option<&Thumbnail> {
        self.entries.get(&handle.0)
    }

    /// Release a handle. Returns false if it was already released.
    pub fn revoke(&mut self, handle: PreviewHandle) -> bool {
        let removed = self.entries.remove(&handle.0).is_some();
        if removed {
            self.revoked += 1;
        }
        removed
    }

    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    pub fn revoked_count(&self) -> u64 {
        self.revoked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_fn(width, height, |x, _| image::Rgb([x as u8, 0, 200]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_thumbnail_fits_bounds_and_keeps_aspect() {
        let thumb = Thumbnail::from_bytes(&png_bytes(200, 100), 40, 40).unwrap();
        assert_eq!((thumb.source_width, thumb.source_height), (200, 100));
        assert_eq!(thumb.width, 40);
        assert_eq!(thumb.height, 20);
        assert_eq!(thumb.pixel(0, 0).map(|p| p[2]), Some(200));
        assert!(thumb.pixel(40, 0).is_none());
    }

    #[test]
    fn test_thumbnail_rejects_garbage() {
        assert!(Thumbnail::from_bytes(b"not an image", 10, 10).is_err());
    }

    #[tokio::test]
    async fn test_load_reads_and_decodes_off_thread() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("wide.png");
        std::fs::write(&path, png_bytes(90, 30)).unwrap();
        let file = ImageFile::from_path(&path).unwrap();

        let thumb = Thumbnail::load(&file, 30, 30).await.unwrap();
        assert_eq!((thumb.width, thumb.height), (30, 10));

        let missing = ImageFile::from_path(dir.path().join("gone.png")).unwrap();
        assert!(matches!(
            Thumbnail::load(&missing, 30, 30).await,
            Err(Error::ImageRead { .. })
        ));

        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"not a png").unwrap();
        let garbage = ImageFile::from_path(&garbage).unwrap();
        assert!(matches!(
            Thumbnail::load(&garbage, 30, 30).await,
            Err(Error::ImageDecode(_))
        ));
    }

    #[test]
    fn test_revoke_is_one_shot() {
        let mut store = PreviewStore::new();
        let a = store.create(Thumbnail::from_pixels(1, 1, vec![[0, 0, 0]]));
        let b = store.create(Thumbnail::from_pixels(1, 1, vec![[9, 9, 9]]));
        assert_ne!(a, b);
        assert_eq!(store.live_count(), 2);

        assert!(store.revoke(a));
        assert!(!store.revoke(a));
        assert!(store.get(a).is_none());
        assert_eq!(store.get(b).and_then(|t| t.pixel(0, 0)), Some([9, 9, 9]));
        assert_eq!(store.live_count(), 1);
        assert_eq!(store.revoked_count(), 1);
    }
}
