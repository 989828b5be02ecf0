//! Payload checks run before any engine sees an image.

use std::io::Cursor;

use image::ImageReader;

/// An image whose header decoded and whose format is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelImage {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Identify the format from the header and read the dimensions.
///
/// The error string is the reason reported in `ScanError::InvalidImage`.
pub fn sniff(bytes: Vec<u8>, max_bytes: usize) -> Result<LabelImage, String> {
    if bytes.is_empty() {
        return Err("image payload is empty".to_string());
    }
    if bytes.len() > max_bytes {
        return Err(format!(
            "image is {} bytes, limit is {max_bytes}",
            bytes.len()
        ));
    }

    let (media_type, width, height) = {
        let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
            .with_guessed_format()
            .map_err(|e| format!("unreadable image: {e}"))?;
        let format = reader
            .format()
            .ok_or_else(|| "unrecognised image format".to_string())?;
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| format!("corrupt {format:?} image: {e}"))?;
        (format.to_mime_type(), width, height)
    };

    if width == 0 || height == 0 {
        return Err(format!("image has no pixels ({width}x{height})"));
    }

    Ok(LabelImage {
        bytes,
        media_type,
        width,
        height,
    })
}

#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    let mut buf = Vec::new();
    image::RgbImage::new(4, 3)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("encode png");
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_is_identified_with_dimensions() {
        let image = sniff(tiny_png(), 1024 * 1024).unwrap();
        assert_eq!(image.media_type, "image/png");
        assert_eq!((image.width, image.height), (4, 3));
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(sniff(Vec::new(), 1024).unwrap_err().contains("empty"));
    }

    #[test]
    fn unknown_bytes_are_rejected() {
        let err = sniff(b"definitely not an image".to_vec(), 1024).unwrap_err();
        assert!(err.contains("unrecognised"), "{err}");
    }

    #[test]
    fn truncated_header_is_rejected() {
        let mut png = tiny_png();
        png.truncate(12);
        assert!(sniff(png, 1024).is_err());
    }

    #[test]
    fn oversized_payload_is_rejected_before_decoding() {
        let err = sniff(tiny_png(), 8).unwrap_err();
        assert!(err.contains("limit"), "{err}");
    }
}
