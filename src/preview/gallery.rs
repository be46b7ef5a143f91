use preview_common::RenderableAsset;

/// Shown wherever there is nothing to display.
pub const NO_PREVIEW_TEXT: &str = "NO PREVIEW AVAILABLE";

/// The decoded assets of one load, in member order, with a cycling cursor.
#[derive(Debug, Default)]
pub struct Gallery {
    assets: Vec<RenderableAsset>,
    cursor: usize,
}

/// What the preview canvas should draw.
#[derive(Debug, Clone, Copy)]
pub enum PreviewView<'a> {
    Asset(&'a RenderableAsset),
    Placeholder,
}

impl PreviewView<'_> {
    /// On-screen caption, the member file name or the placeholder text.
    pub fn label(&self) -> &str {
        match self {
            PreviewView::Asset(asset) => asset.source_name(),
            PreviewView::Placeholder => NO_PREVIEW_TEXT,
        }
    }
}

impl Gallery {
    pub fn new(assets: Vec<RenderableAsset>) -> Self {
        Self { assets, cursor: 0 }
    }

    pub fn assets(&self) -> &[RenderableAsset] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor. It can land at most one past the last asset,
    /// where the placeholder is shown.
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.assets.len());
    }

    pub fn next(&mut self) {
        if !self.assets.is_empty() {
            let len = self.assets.len();
            self.cursor = (self.cursor % len + 1) % len;
        }
    }

    pub fn previous(&mut self) {
        if !self.assets.is_empty() {
            let len = self.assets.len();
            self.cursor = (self.cursor % len + len - 1) % len;
        }
    }

    pub fn current(&self) -> Option<&RenderableAsset> {
        self.assets.get(self.cursor)
    }

    pub fn current_mut(&mut self) -> Option<&mut RenderableAsset> {
        self.assets.get_mut(self.cursor)
    }

    pub fn current_view(&self) -> PreviewView<'_> {
        match self.current() {
            Some(asset) => PreviewView::Asset(asset),
            None => PreviewView::Placeholder,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use preview_common::scene::TextureImage;

    use super::*;

    fn texture(name: &str) -> RenderableAsset {
        RenderableAsset::Texture {
            image: Arc::new(TextureImage::missing_texture()),
            source_name: name.to_string(),
        }
    }

    fn label(gallery: &Gallery) -> String {
        gallery.current_view().label().to_string()
    }

    #[test]
    fn cycling_wraps_in_both_directions() {
        let mut gallery = Gallery::new(vec![texture("a.png"), texture("b.png"), texture("c.png")]);
        assert_eq!(label(&gallery), "a.png");

        gallery.previous();
        assert_eq!(label(&gallery), "c.png");
        gallery.next();
        assert_eq!(label(&gallery), "a.png");
        gallery.next();
        gallery.next();
        gallery.next();
        assert_eq!(label(&gallery), "a.png");
    }

    #[test]
    fn empty_or_dangling_cursor_shows_the_placeholder() {
        let mut empty = Gallery::default();
        empty.next();
        empty.previous();
        assert!(matches!(empty.current_view(), PreviewView::Placeholder));
        assert_eq!(label(&empty), NO_PREVIEW_TEXT);

        let mut gallery = Gallery::new(vec![texture("a.png")]);
        gallery.set_cursor(5);
        assert!(gallery.current().is_none());
        assert_eq!(label(&gallery), NO_PREVIEW_TEXT);

        // cycling brings a dangling cursor back into range
        gallery.next();
        assert_eq!(label(&gallery), "a.png");
    }

    #[test]
    fn far_out_cursors_are_clamped() {
        let mut gallery = Gallery::new(vec![texture("a.png"), texture("b.png")]);

        gallery.set_cursor(usize::MAX);
        assert_eq!(gallery.cursor(), 2);
        assert_eq!(label(&gallery), NO_PREVIEW_TEXT);
        gallery.next();
        assert_eq!(label(&gallery), "a.png");

        gallery.set_cursor(usize::MAX);
        gallery.previous();
        assert_eq!(label(&gallery), "b.png");

        let mut empty = Gallery::default();
        empty.set_cursor(usize::MAX);
        assert_eq!(empty.cursor(), 0);
    }
}
