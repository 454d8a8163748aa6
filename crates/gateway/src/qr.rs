//! Pairing-code rendering as a PNG QR image.

use std::io::Cursor;

use {
    image::{GrayImage, ImageFormat, Luma, imageops},
    qrcode::{EcLevel, QrCode},
};

/// Side length of the rendered image in pixels.
pub const QR_SIZE: u32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum QrRenderError {
    #[error("cannot encode pairing code as QR: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("cannot encode QR image: {0}")]
    Image(#[from] image::ImageError),
}

/// Render `data` as a `QR_SIZE`×`QR_SIZE` grayscale PNG with medium error
/// correction.
///
/// Modules are a whole number of pixels wide. The symbol, quiet zone
/// included, is centred on a light canvas of the fixed size.
pub fn render_png(data: &str) -> Result<Vec<u8>, QrRenderError> {
    let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)?;
    let symbol = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .max_dimensions(QR_SIZE, QR_SIZE)
        .build();

    let mut canvas = GrayImage::from_pixel(QR_SIZE, QR_SIZE, Luma([255]));
    let x = (i64::from(QR_SIZE) - i64::from(symbol.width())) / 2;
    let y = (i64::from(QR_SIZE) - i64::from(symbol.height())) / 2;
    imageops::overlay(&mut canvas, &symbol, x, y);

    let mut png = Vec::new();
    canvas.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_dark(image: &GrayImage, x: u32, y: u32) -> bool {
        image.get_pixel(x, y).0[0] < 128
    }

    /// Lengths of alternating dark/light runs on row `y` starting at `x`.
    fn runs(image: &GrayImage, mut x: u32, y: u32, count: usize) -> Vec<u32> {
        let mut out = Vec::new();
        while out.len() < count && x < image.width() {
            let dark = is_dark(image, x, y);
            let start = x;
            while x < image.width() && is_dark(image, x, y) == dark {
                x += 1;
            }
            out.push(x - start);
        }
        out
    }

    #[test]
    fn renders_fixed_size_png() {
        let png = render_png("2@abc,def,ghi==").unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

        let decoded = image::load_from_memory(&png).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (QR_SIZE, QR_SIZE));
        // Light quiet zone around dark modules.
        assert_eq!(decoded.get_pixel(0, 0), &Luma([255]));
        assert!(decoded.pixels().any(|p| p.0[0] == 0));
    }

    #[test]
    fn finder_pattern_has_uniform_modules() {
        let pairing = format!("2@{},{},{}", "A".repeat(80), "B".repeat(44), "C".repeat(44));
        let png = render_png(&pairing).unwrap();
        let image = image::load_from_memory(&png).unwrap().to_luma8();

        let (x0, y0) = (0..QR_SIZE)
            .flat_map(|y| (0..QR_SIZE).map(move |x| (x, y)))
            .find(|&(x, y)| is_dark(&image, x, y))
            .unwrap();

        // Top edge of the finder is seven dark modules.
        let edge = runs(&image, x0, y0, 1)[0];
        assert_eq!(edge % 7, 0, "finder edge is {edge}px");
        let module = edge / 7;
        assert!(module >= 2);

        // Through its centre the finder reads 1:1:3:1:1.
        let centre = y0 + 3 * module + module / 2;
        assert_eq!(runs(&image, x0, centre, 5), [
            module,
            module,
            3 * module,
            module,
            module
        ]);
    }

    #[test]
    fn long_codes_still_fit() {
        let code = "x".repeat(300);
        let png = render_png(&code).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.width(), QR_SIZE);
    }
}
