use crate::error::ComposeResult;
use crate::validate::ImageMeta;

/// A single-use, lazily decoded sequence of RGBA8 pixel rows.
///
/// The header is read when the stream is opened, so `meta` is known before
/// any row is decoded. Every row returned is exactly `meta().row_bytes()`
/// long. After `Ok(None)` or an error the stream is spent.
pub trait RowStream: Send {
    fn meta(&self) -> ImageMeta;

    /// Whether the source carries a real alpha channel.
    fn has_alpha(&self) -> bool;

    /// Decode the next row, or `None` at end of stream.
    fn next_row(&mut self) -> ComposeResult<Option<Vec<u8>>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
