use crate::error::{ComposeError, ComposeResult};
use crate::matcher::ChromaKeyMatcher;
use crate::pixel::{PixelSample, BYTES_PER_PIXEL};

/// Composite one RGBA8 row in place.
///
/// Every pixel of `front` that the matcher accepts is overwritten with the
/// pixel at the same index in `back`. Pixels are visited in raster order and
/// never reordered. Returns the number of replaced pixels.
pub fn composite_row(
    matcher: &ChromaKeyMatcher,
    front: &mut [u8],
    back: &[u8],
) -> ComposeResult<usize> {
    if front.len() != back.len() || front.len() % BYTES_PER_PIXEL != 0 {
        return Err(ComposeError::internal(format!(
            "composite_row expects equal-length rgba8 rows, got {} and {} bytes",
            front.len(),
            back.len()
        )));
    }

    let mut replaced = 0;
    for (f, b) in front
        .chunks_exact_mut(BYTES_PER_PIXEL)
        .zip(back.chunks_exact(BYTES_PER_PIXEL))
    {
        if matcher.matches(&PixelSample::rgba(f[0], f[1], f[2], f[3])) {
            f.copy_from_slice(b);
            replaced += 1;
        }
    }
    Ok(replaced)
}
