use std::{fmt, sync::Arc};

/// Decoded pixels, always 8-bit RGBA, rows top to bottom.
#[derive(Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            pixels,
        }
    }

    /// A 2x2 magenta/black checkerboard.
    pub fn missing_texture() -> Self {
        const MAGENTA: [u8; 4] = [255, 0, 255, 255];
        const BLACK: [u8; 4] = [0, 0, 0, 255];
        let pixels = [MAGENTA, BLACK, BLACK, MAGENTA].concat();
        Self::new(2, 2, pixels)
    }
}

impl fmt::Debug for TextureImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureImage")
            .field("width", &self.width)
            .field("height", &self.height)
            //.field("pixels", &self.pixels) // explicitly omitted
            .finish()
    }
}

/// A decoded texture as seen by the material binder.
/// The name is the file name it was decoded from.
#[derive(Debug, Clone)]
pub struct LoadedTexture {
    pub name: String,
    pub image: Arc<TextureImage>,
}

impl LoadedTexture {
    pub fn new(name: impl Into<String>, image: Arc<TextureImage>) -> Self {
        Self {
            name: name.into(),
            image,
        }
    }
}
