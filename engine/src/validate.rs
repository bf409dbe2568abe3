use std::fmt;

use crate::error::{ComposeError, ComposeResult};

/// Width and height as declared by a catalog entry or an image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMeta {
    pub width: u32,
    pub height: u32,
}

impl ImageMeta {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes in one RGBA8 row.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * crate::pixel::BYTES_PER_PIXEL
    }
}

impl fmt::Display for ImageMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Fails with `DimensionMismatch` unless both sizes agree exactly.
pub fn validate(front: &ImageMeta, back: &ImageMeta) -> ComposeResult<()> {
    if front != back {
        return Err(ComposeError::DimensionMismatch {
            front: *front,
            back: *back,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_sizes_pass() {
        assert!(validate(&ImageMeta::new(640, 480), &ImageMeta::new(640, 480)).is_ok());
    }

    #[test]
    fn width_only_difference_fails() {
        let err = validate(&ImageMeta::new(640, 480), &ImageMeta::new(641, 480)).unwrap_err();
        assert!(matches!(err, ComposeError::DimensionMismatch { .. }));
    }

    #[test]
    fn height_only_difference_fails() {
        let err = validate(&ImageMeta::new(640, 480), &ImageMeta::new(640, 479)).unwrap_err();
        assert!(matches!(err, ComposeError::DimensionMismatch { .. }));
    }

    #[test]
    fn row_bytes_is_rgba() {
        assert_eq!(ImageMeta::new(3, 1).row_bytes(), 12);
    }
}
