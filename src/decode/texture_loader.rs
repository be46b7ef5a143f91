use image::ImageFormat;
use preview_common::scene::TextureImage;

/// Decodes a raster image into RGBA8.
///
/// Formats are sniffed from the bytes, except TGA, which has no magic number.
pub fn load_texture(bytes: &[u8], extension: &str) -> Result<TextureImage, image::ImageError> {
    let image = match extension {
        "tga" => image::load_from_memory_with_format(bytes, ImageFormat::Tga)?,
        _ => image::load_from_memory(bytes)?,
    };
    let rgba = image.to_rgba8();
    Ok(TextureImage::new(rgba.width(), rgba.height(), rgba.into_raw()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{Rgb, RgbImage};

    use super::*;

    fn encode(image: &RgbImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn png_is_expanded_to_rgba() {
        let image = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let texture = load_texture(&encode(&image, ImageFormat::Png), "png").unwrap();

        assert_eq!((texture.width, texture.height), (3, 2));
        assert_eq!(texture.pixels.len(), 3 * 2 * 4);
        assert_eq!(&texture.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn tga_is_decoded_without_sniffing() {
        let image = RgbImage::from_pixel(4, 4, Rgb([200, 100, 0]));
        let texture = load_texture(&encode(&image, ImageFormat::Tga), "tga").unwrap();

        assert_eq!((texture.width, texture.height), (4, 4));
        assert_eq!(&texture.pixels[..4], &[200, 100, 0, 255]);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(load_texture(b"not an image", "png").is_err());
        assert!(load_texture(b"", "tga").is_err());
    }
}
