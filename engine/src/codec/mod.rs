//! Row-at-a-time image codecs.
//!
//! Decoders normalise every supported input to RGBA8 rows so the compositor
//! only ever sees one pixel layout. The encoder writes PNG and hands its
//! output to a bounded channel in fixed-size chunks.

pub mod encoder;
pub mod jpeg_rows;
pub mod png_rows;
pub mod traits;

use std::io::{BufRead, BufReader, Read};

use image::ImageFormat;
use tracing::debug;

use crate::error::{ComposeError, ComposeResult};

pub use encoder::{ChunkSink, PngRowEncoder};
pub use jpeg_rows::JpegRows;
pub use png_rows::PngRows;
pub use traits::RowStream;

/// Channel layout of a decoded 8-bit row before normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Gray,
    GrayAlpha,
    Rgb,
    Rgba,
}

impl Layout {
    pub fn channels(self) -> usize {
        match self {
            Layout::Gray => 1,
            Layout::GrayAlpha => 2,
            Layout::Rgb => 3,
            Layout::Rgba => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, Layout::GrayAlpha | Layout::Rgba)
    }
}

/// Expand one decoded row into RGBA8, replacing the contents of `dst`.
pub fn expand_to_rgba(layout: Layout, src: &[u8], dst: &mut Vec<u8>) {
    dst.clear();
    dst.reserve(src.len() / layout.channels() * 4);
    match layout {
        Layout::Gray => {
            for &v in src {
                dst.extend_from_slice(&[v, v, v, 255]);
            }
        }
        Layout::GrayAlpha => {
            for px in src.chunks_exact(2) {
                dst.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
            }
        }
        Layout::Rgb => {
            for px in src.chunks_exact(3) {
                dst.extend_from_slice(&[px[0], px[1], px[2], 255]);
            }
        }
        Layout::Rgba => dst.extend_from_slice(src),
    }
}

/// Sniff the format of an opened byte stream and read its header.
///
/// Only the header is consumed; pixel data is decoded lazily by the returned
/// stream.
pub fn open_stream(source: Box<dyn Read + Send>) -> ComposeResult<Box<dyn RowStream>> {
    let mut reader = BufReader::new(source);
    let head = reader
        .fill_buf()
        .map_err(|e| ComposeError::decode(format!("failed to read image header: {e}")))?;
    if head.is_empty() {
        return Err(ComposeError::decode("image stream is empty"));
    }

    let format = image::guess_format(head)
        .map_err(|_| ComposeError::decode("unrecognised image format"))?;
    debug!(?format, "opening image stream");

    match format {
        ImageFormat::Png => Ok(Box::new(PngRows::open(reader)?)),
        ImageFormat::Jpeg => Ok(Box::new(JpegRows::open(reader)?)),
        other => Err(ComposeError::decode(format!(
            "unsupported image format {other:?}, expected PNG or JPEG"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::io::Cursor;

    use image::{ImageFormat, RgbImage, RgbaImage};

    pub fn png_rgb(width: u32, height: u32, pixels: &[(u8, u8, u8)]) -> Vec<u8> {
        let raw = pixels.iter().flat_map(|&(r, g, b)| [r, g, b]).collect();
        let img = RgbImage::from_raw(width, height, raw).unwrap();
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
        out
    }

    pub fn png_rgba(width: u32, height: u32, pixels: &[[u8; 4]]) -> Vec<u8> {
        let raw = pixels.iter().flatten().copied().collect();
        let img = RgbaImage::from_raw(width, height, raw).unwrap();
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
        out
    }

    pub fn jpeg_solid(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb(rgb));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg).unwrap();
        out
    }

    pub fn solid(width: u32, height: u32, rgb: (u8, u8, u8)) -> Vec<(u8, u8, u8)> {
        vec![rgb; (width * height) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::validate::ImageMeta;
    use std::io::Cursor;

    fn boxed(bytes: Vec<u8>) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(bytes))
    }

    #[test]
    fn expand_gray_and_rgb() {
        let mut out = Vec::new();
        expand_to_rgba(Layout::Gray, &[7, 9], &mut out);
        assert_eq!(out, vec![7, 7, 7, 255, 9, 9, 9, 255]);

        expand_to_rgba(Layout::Rgb, &[1, 2, 3], &mut out);
        assert_eq!(out, vec![1, 2, 3, 255]);

        expand_to_rgba(Layout::GrayAlpha, &[5, 6], &mut out);
        assert_eq!(out, vec![5, 5, 5, 6]);
    }

    #[test]
    fn opens_png_by_sniffing() {
        let stream = open_stream(boxed(png_rgb(3, 2, &solid(3, 2, (1, 2, 3))))).unwrap();
        assert_eq!(stream.meta(), ImageMeta::new(3, 2));
        assert!(!stream.has_alpha());
    }

    #[test]
    fn opens_jpeg_by_sniffing() {
        let stream = open_stream(boxed(jpeg_solid(16, 8, [200, 10, 10]))).unwrap();
        assert_eq!(stream.meta(), ImageMeta::new(16, 8));
    }

    #[test]
    fn rejects_unknown_bytes() {
        let err = open_stream(boxed(b"definitely not an image".to_vec())).err().unwrap();
        assert!(matches!(err, ComposeError::Decode(_)));
    }

    #[test]
    fn rejects_empty_stream() {
        let err = open_stream(boxed(Vec::new())).err().unwrap();
        assert!(matches!(err, ComposeError::Decode(_)));
    }

    #[test]
    fn rejects_other_known_formats() {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([0, 0, 0]));
        let mut bmp = Vec::new();
        img.write_to(&mut Cursor::new(&mut bmp), ImageFormat::Bmp).unwrap();
        let err = open_stream(boxed(bmp)).err().unwrap();
        assert!(err.to_string().contains("unsupported image format"));
    }
}
