use preview_common::scene::TextureImage;
use psd::Psd;
use thiserror::Error;

const SIGNATURE: &[u8] = b"8BPS";
const HEADER_LENGTH: usize = 26;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct PsdLoadError(String);

/// Composites the layers of a Photoshop document into one RGBA8 image.
/// Documents without layers use their merged image data.
///
/// Layer visibility is left to `psd`, which already skips transparent
/// layers. Its `visible` flag reads the inverted bit, so filtering on it
/// again would drop every shown layer.
pub fn load_psd(bytes: &[u8]) -> Result<TextureImage, PsdLoadError> {
    if bytes.len() < HEADER_LENGTH || !bytes.starts_with(SIGNATURE) {
        return Err(PsdLoadError("missing PSD file header".into()));
    }
    let psd = Psd::from_bytes(bytes).map_err(|e| PsdLoadError(e.to_string()))?;

    let pixels = if psd.layers().is_empty() {
        psd.rgba()
    } else {
        psd.flatten_layers_rgba(&|_| true)
            .map_err(|e| PsdLoadError(e.to_string()))?
    };

    let (width, height) = (psd.width(), psd.height());
    if pixels.len() != width as usize * height as usize * 4 {
        return Err(PsdLoadError(format!(
            "composite has {} bytes, expected {width}x{height} RGBA",
            pixels.len()
        )));
    }
    Ok(TextureImage::new(width, height, pixels))
}
