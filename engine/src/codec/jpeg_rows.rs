use std::io::{Cursor, Read};

use image::codecs::jpeg::JpegDecoder;
use image::{ColorType, ImageDecoder};
use tracing::debug;

use super::traits::RowStream;
use super::{expand_to_rgba, Layout};
use crate::error::{ComposeError, ComposeResult};
use crate::validate::ImageMeta;

/// JPEG row source.
///
/// The header is parsed on open. Baseline and progressive JPEG both need the
/// full scan before rows are final, so pixel data is decoded into one frame
/// buffer on the first `next_row` call and handed out row by row.
pub struct JpegRows {
    decoder: Option<JpegDecoder<Cursor<Vec<u8>>>>,
    frame: Vec<u8>,
    meta: ImageMeta,
    layout: Layout,
    rows_read: u32,
}

impl JpegRows {
    pub fn open<R: Read>(mut source: R) -> ComposeResult<Self> {
        let mut encoded = Vec::new();
        source
            .read_to_end(&mut encoded)
            .map_err(|e| ComposeError::decode(format!("failed to read JPEG bytes: {e}")))?;

        let decoder = JpegDecoder::new(Cursor::new(encoded))
            .map_err(|e| ComposeError::decode(format!("invalid JPEG header: {e}")))?;
        let (width, height) = decoder.dimensions();
        let layout = match decoder.color_type() {
            ColorType::L8 => Layout::Gray,
            ColorType::Rgb8 => Layout::Rgb,
            ColorType::Rgba8 => Layout::Rgba,
            other => {
                return Err(ComposeError::decode(format!(
                    "unsupported JPEG color type {other:?}"
                )))
            }
        };

        debug!(width, height, ?layout, "JPEG header read");

        Ok(Self {
            decoder: Some(decoder),
            frame: Vec::new(),
            meta: ImageMeta::new(width, height),
            layout,
            rows_read: 0,
        })
    }

    fn decode_frame(&mut self) -> ComposeResult<()> {
        if let Some(decoder) = self.decoder.take() {
            let mut buf = vec![0; decoder.total_bytes() as usize];
            decoder
                .read_image(&mut buf)
                .map_err(|e| ComposeError::decode(format!("JPEG decode failed: {e}")))?;
            self.frame = buf;
        }
        Ok(())
    }
}

impl RowStream for JpegRows {
    fn meta(&self) -> ImageMeta {
        self.meta
    }

    fn has_alpha(&self) -> bool {
        false
    }

    fn next_row(&mut self) -> ComposeResult<Option<Vec<u8>>> {
        if self.rows_read >= self.meta.height {
            // Release the frame as soon as the last row is out.
            self.frame = Vec::new();
            return Ok(None);
        }
        self.decode_frame()?;

        let line = self.meta.width as usize * self.layout.channels();
        let start = self.rows_read as usize * line;
        let src = self.frame.get(start..start + line).ok_or_else(|| {
            ComposeError::decode(format!(
                "JPEG frame ended after {} of {} rows",
                self.rows_read, self.meta.height
            ))
        })?;

        let mut row = Vec::new();
        expand_to_rgba(self.layout, src, &mut row);
        self.rows_read += 1;
        Ok(Some(row))
    }

    fn name(&self) -> &str {
        "jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testutil::*;

    #[test]
    fn yields_every_row_then_ends() {
        let mut rows = JpegRows::open(Cursor::new(jpeg_solid(8, 4, [0, 0, 255]))).unwrap();
        assert_eq!(rows.meta(), ImageMeta::new(8, 4));
        assert!(!rows.has_alpha());

        let mut count = 0;
        while let Some(row) = rows.next_row().unwrap() {
            assert_eq!(row.len(), 8 * 4);
            // lossy, but a solid block stays close to the source color
            assert!(row[2] > 200 && row[0] < 40, "unexpected pixel {:?}", &row[..4]);
            assert_eq!(row[3], 255);
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn corrupt_header_rejected() {
        let err = JpegRows::open(Cursor::new(vec![0xFF, 0xD8, 0xFF, 0x00, 0x01]))
            .err()
            .unwrap();
        assert!(matches!(err, ComposeError::Decode(_)));
    }
}
