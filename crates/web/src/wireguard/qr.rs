//! QR-code export of peer configs
//!
//! Mobile WireGuard clients import a tunnel by scanning the config text as
//! a QR code. The rendered config is treated as one opaque payload; output
//! is PNG bytes.

use image::{GrayImage, Luma};
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;

/// Pixels per QR module
const MODULE_PIXELS: u32 = 10;
/// Quiet-zone border, in modules
const QUIET_ZONE: u32 = 4;

/// Encode config text into a scannable PNG image.
pub fn config_png(config: &str) -> Result<Vec<u8>, String> {
    let code = QrCode::with_error_correction_level(config.as_bytes(), EcLevel::L)
        .map_err(|e| format!("QR encoding failed: {}", e))?;

    let modules = code.width() as u32;
    let colors = code.to_colors();
    let size = (modules + 2 * QUIET_ZONE) * MODULE_PIXELS;
    let mut img = GrayImage::from_pixel(size, size, Luma([255u8]));

    for y in 0..modules {
        for x in 0..modules {
            if colors[(y * modules + x) as usize] != Color::Dark {
                continue;
            }
            let px0 = (x + QUIET_ZONE) * MODULE_PIXELS;
            let py0 = (y + QUIET_ZONE) * MODULE_PIXELS;
            for py in py0..py0 + MODULE_PIXELS {
                for px in px0..px0 + MODULE_PIXELS {
                    img.put_pixel(px, py, Luma([0u8]));
                }
            }
        }
    }

    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {}", e))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CONFIG: &str =
        "[Interface]\nPrivateKey = PK1\nAddress = 10.0.0.2/32\nDNS = 8.8.8.8\n";

    #[test]
    fn test_png_signature() {
        let bytes = config_png(SAMPLE_CONFIG).unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn test_image_is_square_with_quiet_zone() {
        let bytes = config_png(SAMPLE_CONFIG).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.width(), img.height());
        assert!(img.width() > 2 * QUIET_ZONE * MODULE_PIXELS);
    }

    #[test]
    fn test_contains_dark_modules() {
        let bytes = config_png(SAMPLE_CONFIG).unwrap();
        let img = image::load_from_memory(&bytes).unwrap().to_luma8();
        assert!(img.pixels().any(|p| p.0[0] == 0));
        assert!(img.pixels().any(|p| p.0[0] == 255));
    }

    #[test]
    fn test_same_payload_same_bytes() {
        assert_eq!(
            config_png(SAMPLE_CONFIG).unwrap(),
            config_png(SAMPLE_CONFIG).unwrap()
        );
    }
}
