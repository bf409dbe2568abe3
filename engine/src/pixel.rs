use crate::error::{ComposeError, ComposeResult};

/// Bytes per pixel in every row that flows through the pipeline (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// A single RGBA8 pixel. Sources without alpha report 255.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelSample {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl PixelSample {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn from_rgba(px: &[u8; 4]) -> Self {
        Self { r: px[0], g: px[1], b: px[2], a: px[3] }
    }
}

/// A chroma-key reference color. Only RGB takes part in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl KeyColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse a flat comma-separated channel list, three values per color.
    ///
    /// `"255,0,0,0,255,0"` yields two keys. Whitespace around values is
    /// ignored.
    pub fn parse_list(input: &str) -> ComposeResult<Vec<KeyColor>> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ComposeError::invalid_request("color list is empty"));
        }

        let channels = input
            .split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<u8>().map_err(|_| {
                    ComposeError::invalid_request(format!(
                        "color channel {part:?} is not an integer in 0..=255"
                    ))
                })
            })
            .collect::<ComposeResult<Vec<u8>>>()?;

        if channels.len() % 3 != 0 {
            return Err(ComposeError::invalid_request(format!(
                "color list has {} values, expected a multiple of 3",
                channels.len()
            )));
        }

        Ok(channels
            .chunks_exact(3)
            .map(|c| KeyColor::new(c[0], c[1], c[2]))
            .collect())
    }
}

impl From<PixelSample> for KeyColor {
    fn from(p: PixelSample) -> Self {
        Self::new(p.r, p.g, p.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_color() {
        let keys = KeyColor::parse_list("255,0,0").unwrap();
        assert_eq!(keys, vec![KeyColor::new(255, 0, 0)]);
    }

    #[test]
    fn parse_multiple_colors_with_spaces() {
        let keys = KeyColor::parse_list(" 0, 255 ,0,1,2,3 ").unwrap();
        assert_eq!(keys, vec![KeyColor::new(0, 255, 0), KeyColor::new(1, 2, 3)]);
    }

    #[test]
    fn parse_rejects_partial_triple() {
        let err = KeyColor::parse_list("255,0").unwrap_err();
        assert!(matches!(err, ComposeError::InvalidRequest(_)));
    }

    #[test]
    fn parse_rejects_out_of_range_and_garbage() {
        assert!(KeyColor::parse_list("256,0,0").is_err());
        assert!(KeyColor::parse_list("-1,0,0").is_err());
        assert!(KeyColor::parse_list("red,0,0").is_err());
        assert!(KeyColor::parse_list("1.5,0,0").is_err());
        assert!(KeyColor::parse_list("").is_err());
        assert!(KeyColor::parse_list("1,,2").is_err());
    }

    #[test]
    fn pixel_from_rgba_array() {
        let p = PixelSample::from_rgba(&[1, 2, 3, 4]);
        assert_eq!(p, PixelSample::rgba(1, 2, 3, 4));
        assert_eq!(KeyColor::from(p), KeyColor::new(1, 2, 3));
    }
}
