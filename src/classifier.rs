use std::fmt;

/// The normalized extension of a file name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExtensionToken {
    Known(String),
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatCategory {
    Raster,
    LayeredImage,
    Mesh,
    /// Authoring formats we can list but not decode.
    Authoring,
    Archive,
    Other,
}

const RASTER_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png", "tga", "tiff", "webp"];
const LAYERED_IMAGE_EXTENSIONS: &[&str] = &["psd"];
const MESH_EXTENSIONS: &[&str] = &["dae", "fbx", "glb", "gltf", "obj"];
const AUTHORING_EXTENSIONS: &[&str] = &["3ds", "blend", "ma", "max", "mb"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip"];

/// Lower-cases whatever follows the last `.`.
/// No dot, or nothing after it, is [`ExtensionToken::Unknown`].
pub fn classify(filename: &str) -> ExtensionToken {
    match filename.rfind('.') {
        Some(index) if index + 1 < filename.len() => {
            ExtensionToken::Known(filename[index + 1..].to_lowercase())
        }
        _ => ExtensionToken::Unknown,
    }
}

/// Classifies the path of a (signed) URL, ignoring its query string and fragment.
pub fn classify_url(url: &str) -> ExtensionToken {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let last_segment = path.rsplit('/').next().unwrap_or_default();
    classify(last_segment)
}

impl ExtensionToken {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExtensionToken::Known(extension) => Some(extension),
            ExtensionToken::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, ExtensionToken::Known(_))
    }

    pub fn category(&self) -> FormatCategory {
        let Some(extension) = self.as_str() else {
            return FormatCategory::Other;
        };
        let is_in = |list: &[&str]| list.contains(&extension);

        if is_in(RASTER_EXTENSIONS) {
            FormatCategory::Raster
        } else if is_in(LAYERED_IMAGE_EXTENSIONS) {
            FormatCategory::LayeredImage
        } else if is_in(MESH_EXTENSIONS) {
            FormatCategory::Mesh
        } else if is_in(AUTHORING_EXTENSIONS) {
            FormatCategory::Authoring
        } else if is_in(ARCHIVE_EXTENSIONS) {
            FormatCategory::Archive
        } else {
            FormatCategory::Other
        }
    }

    /// Extraction priority of archive members. Textures come first so that
    /// the texture pool is filled before any mesh gets its materials bound.
    pub fn tier(&self) -> Option<u8> {
        match self.category() {
            FormatCategory::Raster | FormatCategory::LayeredImage => Some(1),
            FormatCategory::Mesh => Some(2),
            FormatCategory::Authoring => Some(3),
            FormatCategory::Archive | FormatCategory::Other => None,
        }
    }
}

impl fmt::Display for ExtensionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionToken::Known(extension) => f.write_str(extension),
            ExtensionToken::Unknown => f.write_str("<unknown>"),
        }
    }
}
