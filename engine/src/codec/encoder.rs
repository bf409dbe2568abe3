use std::io::{self, Write};

use ::png::{BitDepth, ColorType, Encoder, StreamWriter};
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{ComposeError, ComposeResult};
use crate::pixel::BYTES_PER_PIXEL;
use crate::validate::ImageMeta;

/// `Write` adapter that cuts encoder output into chunks and pushes them into
/// a bounded channel.
///
/// `write` blocks while the channel is full, which is how the HTTP consumer's
/// pace propagates back to the encoder. Once the receiver is gone every write
/// fails with `BrokenPipe`. Must only be used from a blocking thread.
pub struct ChunkSink {
    tx: mpsc::Sender<ComposeResult<Bytes>>,
    buf: BytesMut,
    chunk_size: usize,
    bytes_sent: u64,
}

impl ChunkSink {
    pub fn new(tx: mpsc::Sender<ComposeResult<Bytes>>, chunk_size: usize) -> Self {
        Self {
            tx,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
            bytes_sent: 0,
        }
    }

    fn send_pending(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        let len = chunk.len() as u64;
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output consumer went away"))?;
        self.bytes_sent += len;
        Ok(())
    }
}

impl Write for ChunkSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.tx.is_closed() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "output consumer went away"));
        }
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= self.chunk_size {
            self.send_pending()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_pending()
    }
}

impl Drop for ChunkSink {
    // The PNG writer owns the sink and offers no way to take it back after
    // the trailer is written, so the tail chunk goes out here.
    fn drop(&mut self) {
        if self.send_pending().is_ok() {
            debug!(bytes = self.bytes_sent, "encoder output closed");
        }
    }
}

/// Streaming PNG encoder fed one RGBA8 row at a time.
///
/// Output is RGBA when either input carried alpha, RGB otherwise.
pub struct PngRowEncoder<W: Write + 'static> {
    writer: StreamWriter<'static, W>,
    keep_alpha: bool,
    scratch: Vec<u8>,
}

impl<W: Write + 'static> PngRowEncoder<W> {
    pub fn start(sink: W, meta: ImageMeta, keep_alpha: bool) -> ComposeResult<Self> {
        let mut encoder = Encoder::new(sink, meta.width, meta.height);
        encoder.set_color(if keep_alpha { ColorType::Rgba } else { ColorType::Rgb });
        encoder.set_depth(BitDepth::Eight);

        let writer = encoder
            .write_header()
            .map_err(|e| ComposeError::encode(format!("failed to write PNG header: {e}")))?
            .into_stream_writer()
            .map_err(|e| ComposeError::encode(format!("failed to start PNG stream: {e}")))?;

        Ok(Self {
            writer,
            keep_alpha,
            scratch: Vec::with_capacity(meta.width as usize * 3),
        })
    }

    pub fn write_row(&mut self, rgba: &[u8]) -> ComposeResult<()> {
        let result = if self.keep_alpha {
            self.writer.write_all(rgba)
        } else {
            self.scratch.clear();
            for px in rgba.chunks_exact(BYTES_PER_PIXEL) {
                self.scratch.extend_from_slice(&px[..3]);
            }
            self.writer.write_all(&self.scratch)
        };
        result.map_err(|e| ComposeError::encode(format!("failed to write PNG row: {e}")))
    }

    /// Write the trailer and release the sink.
    pub fn finish(self) -> ComposeResult<()> {
        self.writer
            .finish()
            .map_err(|e| ComposeError::encode(format!("failed to finish PNG: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn encode_in_background(
        meta: ImageMeta,
        keep_alpha: bool,
        rows: Vec<Vec<u8>>,
        chunk_size: usize,
    ) -> Vec<Bytes> {
        let (tx, mut rx) = mpsc::channel(4);
        let task = tokio::task::spawn_blocking(move || {
            let mut enc = PngRowEncoder::start(ChunkSink::new(tx, chunk_size), meta, keep_alpha)?;
            for row in &rows {
                enc.write_row(row)?;
            }
            enc.finish()
        });

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.unwrap());
        }
        task.await.unwrap().unwrap();
        chunks
    }

    #[tokio::test]
    async fn encodes_rgb_png_in_bounded_chunks() {
        let meta = ImageMeta::new(2, 1);
        let chunks =
            encode_in_background(meta, false, vec![vec![1, 2, 3, 255, 4, 5, 6, 255]], 16).await;

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= 16 && !c.is_empty()));

        let png: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.color(), image::ColorType::Rgb8);
        assert_eq!(img.to_rgb8().into_raw(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn keeps_alpha_when_asked() {
        let meta = ImageMeta::new(1, 2);
        let chunks = encode_in_background(
            meta,
            true,
            vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8]],
            1024,
        )
        .await;

        let png: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.to_rgba8().into_raw(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn closed_receiver_breaks_the_pipe() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = tokio::task::spawn_blocking(move || {
            let mut sink = ChunkSink::new(tx, 8);
            sink.write(b"abc").unwrap_err()
        })
        .await
        .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
