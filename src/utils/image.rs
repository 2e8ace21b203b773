use crate::core::io::Storage;
use crate::core::state::ImageData;
use anyhow::{anyhow, Context, Result};
use image::DynamicImage;

/// MIME type from the file's magic bytes. Only formats the image services accept.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// Reads a user-supplied reference image.
pub async fn load_image_file(storage: &dyn Storage, path: &str) -> Result<ImageData> {
    let bytes = storage
        .read(path)
        .await
        .with_context(|| format!("Failed to load reference image {}", path))?;
    let mime = sniff_mime(&bytes).ok_or_else(|| anyhow!("{} is not a PNG, JPEG or WebP image", path))?;
    Ok(ImageData::new(mime, bytes))
}

pub fn decode(image: &ImageData) -> Result<DynamicImage> {
    image::load_from_memory(&image.bytes)
        .with_context(|| format!("Failed to decode {} image ({} bytes)", image.mime_type, image.bytes.len()))
}

/// Single-colour PNG for tests that need decodable pixels.
#[cfg(test)]
pub(crate) fn solid_png(w: u32, h: u32) -> Vec<u8> {
    use image::{ImageFormat, Rgb, RgbImage};
    let img = RgbImage::from_pixel(w, h, Rgb([200, 10, 10]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::{join, NativeStorage};

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(&solid_png(1, 1)), Some("image/png"));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime(b"GIF89a"), None);
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/jpeg"), "jpg");
    }

    #[tokio::test]
    async fn test_load_and_decode() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().to_string_lossy().to_string();
        let storage = NativeStorage::new();

        let good = join(&root, "hero.png");
        storage.write(&good, &solid_png(4, 3)).await?;
        let img = load_image_file(&storage, &good).await?;
        assert_eq!(img.mime_type, "image/png");
        let decoded = decode(&img)?;
        assert_eq!((decoded.width(), decoded.height()), (4, 3));

        let bad = join(&root, "notes.txt");
        storage.write(&bad, b"hello").await?;
        assert!(load_image_file(&storage, &bad).await.is_err());
        assert!(load_image_file(&storage, &join(&root, "missing.png")).await.is_err());
        Ok(())
    }
}
