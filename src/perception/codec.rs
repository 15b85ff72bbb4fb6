use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{ImageFormat, RgbaImage};

use crate::errors::{PilotError, PilotResult};

pub fn encode_png(image: &RgbaImage) -> PilotResult<Vec<u8>> {
    let mut out = Vec::new();
    image
        .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| PilotError::Encode(format!("PNG encode: {e}")))?;
    Ok(out)
}

/// `data:image/png;base64,...` form expected by vision chat endpoints.
pub fn to_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(png))
}

/// Pixel width and height of an encoded image.
pub fn dimensions(bytes: &[u8]) -> PilotResult<(u32, u32)> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| PilotError::Encode(format!("decode: {e}")))?;
    Ok((img.width(), img.height()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_dimensions_survive_encoding() {
        let png = encode_png(&RgbaImage::new(37, 21)).unwrap();
        assert_eq!(dimensions(&png).unwrap(), (37, 21));
        assert!(to_data_url(&png).starts_with("data:image/png;base64,iVBOR"));
    }

    #[test]
    fn garbage_is_an_encode_error() {
        assert!(matches!(dimensions(b"not an image"), Err(PilotError::Encode(_))));
    }
}
