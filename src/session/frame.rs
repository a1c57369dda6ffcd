use image::DynamicImage;

use crate::session::DecodeError;
use crate::utils::Resolution;

/// Decoded live frame together with the bytes it was decoded from
pub struct Frame {
    pub encoded: Vec<u8>,
    pub image: DynamicImage,
}

impl Frame {
    pub fn decode(encoded: Vec<u8>) -> Result<Self, DecodeError> {
        match image::load_from_memory(&encoded) {
            Ok(image) => Ok(Frame { encoded, image }),
            Err(source) => Err(DecodeError {
                bytes: encoded.len(),
                source,
            }),
        }
    }
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }
}

#[cfg(test)]
pub(crate) mod test_images {
    use std::io::Cursor;

    use image::{ImageFormat, RgbImage};

    /// Encodes a blank image of the given size
    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::new(width, height)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }
}
