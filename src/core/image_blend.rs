use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::core::ffmpeg::{CompositeError, Compositor};

/// In-process alpha compositing for still images. The result keeps the base
/// dimensions; the overlay is scaled to fit and centred.
pub struct ImageBlender {
    jpeg_quality: u8,
}

impl ImageBlender {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }
}

#[async_trait]
impl Compositor for ImageBlender {
    async fn composite(&self, base: &Path, overlay: &Path, output: &Path) -> Result<(), CompositeError> {
        let base = base.to_path_buf();
        let overlay = overlay.to_path_buf();
        let output: PathBuf = output.to_path_buf();
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || blend_files(&base, &overlay, &output, quality))
            .await
            .map_err(|e| CompositeError::Image(format!("blend task failed: {}", e)))?
            .map_err(|e| CompositeError::Image(e.to_string()))
    }
}

fn blend_files(base: &Path, overlay: &Path, output: &Path, quality: u8) -> image::ImageResult<()> {
    let base_img = image::open(base)?;
    let overlay_img = image::open(overlay)?;
    let combined = blend(&base_img, &overlay_img);

    let format = ImageFormat::from_path(output).unwrap_or(ImageFormat::Png);
    match format {
        ImageFormat::Jpeg => {
            let file = std::fs::File::create(output)?;
            let mut writer = BufWriter::new(file);
            let rgb = DynamicImage::ImageRgba8(combined).to_rgb8();
            JpegEncoder::new_with_quality(&mut writer, quality).encode_image(&rgb)?;
            writer.flush()?;
        }
        other => DynamicImage::ImageRgba8(combined).save_with_format(output, other)?,
    }
    Ok(())
}

pub fn blend(base: &DynamicImage, overlay: &DynamicImage) -> image::RgbaImage {
    let mut canvas = base.to_rgba8();
    let (bw, bh) = base.dimensions();
    let (ow, oh) = overlay.dimensions();

    let fitted = if (ow, oh) == (bw, bh) {
        overlay.to_rgba8()
    } else {
        overlay.resize(bw, bh, FilterType::Lanczos3).to_rgba8()
    };

    let x = (bw as i64 - fitted.width() as i64) / 2;
    let y = (bh as i64 - fitted.height() as i64) / 2;
    imageops::overlay(&mut canvas, &fitted, x, y);
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn solid(w: u32, h: u32, px: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba(px)))
    }

    #[test]
    fn opaque_overlay_replaces_base_pixels() {
        let out = blend(&solid(4, 4, [0, 0, 255, 255]), &solid(4, 4, [255, 0, 0, 255]));
        assert_eq!(out.get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn transparent_overlay_keeps_base() {
        let out = blend(&solid(4, 4, [0, 0, 255, 255]), &solid(4, 4, [255, 0, 0, 0]));
        assert_eq!(out.get_pixel(2, 2), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn smaller_overlay_is_fitted_and_centred() {
        // 2x1 overlay on a 4x4 base scales to 4x2, leaving one row free above and below.
        let out = blend(&solid(4, 4, [0, 0, 0, 255]), &solid(2, 1, [255, 255, 255, 255]));
        assert_eq!(out.dimensions(), (4, 4));
        let luma = |x, y| out.get_pixel(x, y).0[0];
        assert!(luma(0, 0) < 5);
        assert!(luma(0, 1) > 250);
        assert!(luma(3, 2) > 250);
        assert!(luma(3, 3) < 5);
    }

    #[tokio::test]
    async fn writes_jpeg_with_base_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("p_base.png");
        let overlay = dir.path().join("p_overlay.png");
        let output = dir.path().join("p_combined.jpg");
        solid(8, 6, [10, 20, 30, 255]).save(&base).unwrap();
        solid(4, 3, [200, 0, 0, 128]).save(&overlay).unwrap();

        ImageBlender::new(95).composite(&base, &overlay, &output).await.unwrap();
        let written = image::open(&output).unwrap();
        assert_eq!(written.dimensions(), (8, 6));
    }

    #[tokio::test]
    async fn unreadable_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("x_base.png");
        std::fs::write(&base, b"not an image").unwrap();
        let err = ImageBlender::new(95)
            .composite(&base, &base, &dir.path().join("x_combined.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, CompositeError::Image(_)));
    }
}
