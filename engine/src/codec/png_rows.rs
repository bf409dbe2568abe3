use std::io::Read;

use ::png::{BitDepth, ColorType, Decoder, Reader, Transformations};
use tracing::debug;

use super::traits::RowStream;
use super::{expand_to_rgba, Layout};
use crate::error::{ComposeError, ComposeResult};
use crate::validate::ImageMeta;

/// Streaming PNG decoder.
///
/// Non-interlaced images are decoded one scanline at a time, so memory stays
/// at one row regardless of image height. Adam7-interlaced images cannot be
/// emitted in raster order before the last pass, so those are decoded into a
/// frame buffer on the first `next_row` call.
pub struct PngRows<R: Read> {
    reader: Reader<R>,
    meta: ImageMeta,
    layout: Layout,
    /// Bytes per decoded scanline before expansion to RGBA.
    line_size: usize,
    interlaced: bool,
    /// Whole decoded frame, only used for interlaced input.
    frame: Option<Vec<u8>>,
    rows_read: u32,
}

impl<R: Read> PngRows<R> {
    pub fn open(source: R) -> ComposeResult<Self> {
        let mut decoder = Decoder::new(source);
        decoder.set_transformations(Transformations::EXPAND | Transformations::STRIP_16);
        let reader = decoder
            .read_info()
            .map_err(|e| ComposeError::decode(format!("invalid PNG header: {e}")))?;

        let (width, height, interlaced) = {
            let info = reader.info();
            (info.width, info.height, info.interlaced)
        };

        let layout = match reader.output_color_type() {
            (ColorType::Grayscale, BitDepth::Eight) => Layout::Gray,
            (ColorType::GrayscaleAlpha, BitDepth::Eight) => Layout::GrayAlpha,
            (ColorType::Rgb, BitDepth::Eight) => Layout::Rgb,
            (ColorType::Rgba, BitDepth::Eight) => Layout::Rgba,
            (color, depth) => {
                return Err(ComposeError::decode(format!(
                    "unsupported PNG output format {color:?}/{depth:?}"
                )))
            }
        };

        let line_size = reader.output_line_size(width);
        debug!(width, height, ?layout, interlaced, "PNG header read");

        Ok(Self {
            reader,
            meta: ImageMeta::new(width, height),
            layout,
            line_size,
            interlaced,
            frame: None,
            rows_read: 0,
        })
    }

    fn next_buffered_row(&mut self) -> ComposeResult<Option<Vec<u8>>> {
        if self.frame.is_none() {
            let mut buf = vec![0; self.reader.output_buffer_size()];
            self.reader
                .next_frame(&mut buf)
                .map_err(|e| ComposeError::decode(format!("PNG decode failed: {e}")))?;
            self.frame = Some(buf);
        }

        let start = self.rows_read as usize * self.line_size;
        let Some(line) = self
            .frame
            .as_ref()
            .and_then(|frame| frame.get(start..start + self.line_size))
        else {
            return Ok(None);
        };
        let mut row = Vec::new();
        expand_to_rgba(self.layout, line, &mut row);
        Ok(Some(row))
    }
}

impl<R: Read + Send> RowStream for PngRows<R> {
    fn meta(&self) -> ImageMeta {
        self.meta
    }

    fn has_alpha(&self) -> bool {
        self.layout.has_alpha()
    }

    fn next_row(&mut self) -> ComposeResult<Option<Vec<u8>>> {
        if self.rows_read >= self.meta.height {
            return Ok(None);
        }

        let row = if self.interlaced {
            self.next_buffered_row()?
        } else {
            let layout = self.layout;
            let decoded = self
                .reader
                .next_row()
                .map_err(|e| ComposeError::decode(format!("PNG decode failed: {e}")))?;
            decoded.map(|r| {
                let mut row = Vec::new();
                expand_to_rgba(layout, r.data(), &mut row);
                row
            })
        };

        match row {
            Some(row) => {
                self.rows_read += 1;
                Ok(Some(row))
            }
            None => Err(ComposeError::decode(format!(
                "PNG data ended after {} of {} rows",
                self.rows_read, self.meta.height
            ))),
        }
    }

    fn name(&self) -> &str {
        "png"
    }
}
