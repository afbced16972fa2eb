//! Dominant-color extraction.
//!
//! Decoded pixels go through the modified median-cut quantizer from
//! `color-thief`; the first palette entry is the dominant color. Transparent
//! (alpha < 125) and near-white (every channel > 250) pixels never count.

use super::{ColorError, Rgb};
use color_thief::ColorFormat;
use std::path::Path;

pub trait ColorExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Rgb, ColorError>;
}

/// Read the file at `path` and run `extractor` over its bytes.
pub fn extract_from_path(extractor: &dyn ColorExtractor, path: &Path) -> Result<Rgb, ColorError> {
    let bytes = std::fs::read(path).map_err(|source| ColorError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    extractor.extract(&bytes)
}

const CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ImageColorExtractor {
    /// Sampling step, 1 (every pixel) to 10.
    pub quality: u8,
    /// Palette size the quantizer aims for, at least 2.
    pub palette_size: u8,
}

impl Default for ImageColorExtractor {
    fn default() -> Self {
        Self {
            quality: 10,
            palette_size: 5,
        }
    }
}

impl ImageColorExtractor {
    fn quality(&self) -> u8 {
        self.quality.clamp(1, 10)
    }

    /// Whether any pixel the quantizer samples is usable. The quantizer
    /// visits every `CHANNELS × quality`-th pixel and averages an empty box
    /// to white, so an image without usable samples is rejected up front.
    fn has_usable_sample(&self, rgba: &[u8]) -> bool {
        rgba.chunks_exact(CHANNELS)
            .step_by(CHANNELS * usize::from(self.quality()))
            .any(|px| px[3] >= 125 && !(px[0] > 250 && px[1] > 250 && px[2] > 250))
    }
}

impl ColorExtractor for ImageColorExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Rgb, ColorError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8().into_raw();
        if !self.has_usable_sample(&rgba) {
            return Err(ColorError::NoUsablePixels);
        }

        let palette = color_thief::get_palette(
            &rgba,
            ColorFormat::Rgba,
            self.quality(),
            self.palette_size.max(2),
        )?;
        let dominant = palette.first().ok_or(ColorError::NoUsablePixels)?;
        Ok(Rgb::new(dominant.r, dominant.g, dominant.b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode(image: RgbaImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image).write_to(&mut out, format).unwrap();
        out.into_inner()
    }

    // Quantized colors are reported at the center of their 5-bit cell:
    // (200, 40, 90) lands in cell (25, 5, 11), centered at (204, 44, 92).
    #[test]
    fn solid_image_yields_its_quantized_color() {
        let png = encode(
            RgbaImage::from_pixel(20, 20, Rgba([200, 40, 90, 255])),
            ImageFormat::Png,
        );
        let rgb = ImageColorExtractor::default().extract(&png).unwrap();
        assert_eq!(rgb, Rgb::new(204, 44, 92));
    }

    #[test]
    fn majority_color_wins() {
        let mut img = RgbaImage::from_pixel(30, 30, Rgba([10, 120, 220, 255]));
        for x in 0..30 {
            for y in 0..5 {
                img.put_pixel(x, y, Rgba([240, 200, 0, 255]));
            }
        }
        let rgb = ImageColorExtractor::default()
            .extract(&encode(img, ImageFormat::Png))
            .unwrap();
        assert_eq!(rgb, Rgb::new(12, 124, 220));
    }

    #[test]
    fn majority_spread_over_shades_beats_solid_minority() {
        // 60% blues with varying green, 40% one solid red. No single blue
        // shade outnumbers the red, but the blues together do.
        let img = RgbaImage::from_fn(100, 100, |x, y| {
            if y < 60 {
                Rgba([12, 40 + ((x + y) % 64) as u8, 204, 255])
            } else {
                Rgba([220, 30, 30, 255])
            }
        });
        let rgb = ImageColorExtractor::default()
            .extract(&encode(img, ImageFormat::Png))
            .unwrap();
        assert!(rgb.b > 200 && rgb.r < 20, "expected a blue, got {rgb}");
    }

    #[test]
    fn ignores_white_and_transparent_pixels() {
        let mut img = RgbaImage::from_pixel(30, 30, Rgba([255, 255, 255, 255]));
        for x in 0..30 {
            img.put_pixel(x, 0, Rgba([0, 0, 0, 10]));
        }
        for x in 0..30 {
            for y in 20..30 {
                img.put_pixel(x, y, Rgba([50, 60, 70, 255]));
            }
        }
        let rgb = ImageColorExtractor::default()
            .extract(&encode(img, ImageFormat::Png))
            .unwrap();
        assert_eq!(rgb, Rgb::new(52, 60, 68));
    }

    #[test]
    fn all_white_image_is_an_error() {
        let png = encode(
            RgbaImage::from_pixel(10, 10, Rgba([255, 255, 255, 255])),
            ImageFormat::Png,
        );
        assert!(matches!(
            ImageColorExtractor::default().extract(&png),
            Err(ColorError::NoUsablePixels)
        ));
    }

    #[test]
    fn out_of_range_settings_are_clamped() {
        let extractor = ImageColorExtractor {
            quality: 0,
            palette_size: 0,
        };
        let png = encode(
            RgbaImage::from_pixel(4, 4, Rgba([200, 40, 90, 255])),
            ImageFormat::Png,
        );
        assert_eq!(extractor.extract(&png).unwrap(), Rgb::new(204, 44, 92));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            ImageColorExtractor::default().extract(b"<html>403</html>"),
            Err(ColorError::Decode(_))
        ));
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(
            &path,
            encode(RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255])), ImageFormat::Png),
        )
        .unwrap();
        let rgb = extract_from_path(&ImageColorExtractor::default(), &path).unwrap();
        assert_eq!(rgb, Rgb::new(4, 4, 4));

        assert!(matches!(
            extract_from_path(&ImageColorExtractor::default(), &dir.path().join("none.jpg")),
            Err(ColorError::Read { .. })
        ));
    }
}
