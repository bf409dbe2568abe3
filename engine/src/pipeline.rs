use std::io::{Read, Write};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::codec::{self, ChunkSink, PngRowEncoder, RowStream};
use crate::composite::composite_row;
use crate::error::{ComposeError, ComposeResult};
use crate::matcher::ChromaKeyMatcher;
use crate::pixel::KeyColor;
use crate::validate::{validate, ImageMeta};

pub const OUTPUT_CONTENT_TYPE: &str = "image/png";

/// Per-request pipeline settings, passed in explicitly rather than read from
/// global state.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Decoded rows buffered between each decoder and the compositor.
    pub row_queue_depth: usize,
    /// Encoded chunks buffered between the encoder and the consumer.
    pub chunk_queue_depth: usize,
    /// Target size of each encoded chunk in bytes.
    pub chunk_size: usize,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self {
            row_queue_depth: 16,
            chunk_queue_depth: 8,
            chunk_size: 64 * 1024,
        }
    }
}

impl PipelineContext {
    /// Every queue and chunk size must be non-zero for the stages to make progress.
    pub fn check(&self) -> ComposeResult<()> {
        if self.row_queue_depth == 0 || self.chunk_queue_depth == 0 {
            return Err(ComposeError::internal(format!(
                "pipeline queue depths must be non-zero (rows {}, chunks {})",
                self.row_queue_depth, self.chunk_queue_depth
            )));
        }
        if self.chunk_size == 0 {
            return Err(ComposeError::internal("pipeline chunk size must be non-zero"));
        }
        Ok(())
    }
}

/// An opened input image as handed over by the catalog.
pub struct ImageSource {
    pub id: String,
    pub reader: Box<dyn Read + Send>,
    /// Dimensions recorded by the catalog, checked against the real header.
    pub declared: ImageMeta,
}

impl ImageSource {
    pub fn new(id: impl Into<String>, reader: impl Read + Send + 'static, declared: ImageMeta) -> Self {
        Self {
            id: id.into(),
            reader: Box::new(reader),
            declared,
        }
    }
}

pub struct CompositeRequest {
    pub front: ImageSource,
    pub back: ImageSource,
    pub keys: Vec<KeyColor>,
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ValidatingDimensions,
    Streaming,
    Completed,
    Failed,
}

/// Tracks and traces the lifecycle of one pipeline.
struct StateLog {
    label: String,
    state: PipelineState,
}

impl StateLog {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: PipelineState::Idle,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(pipeline = %self.label, from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }

    fn fail(&mut self, error: &ComposeError) {
        if error.is_client_error() {
            info!(pipeline = %self.label, error = %error, "composition rejected");
        } else {
            warn!(pipeline = %self.label, error = %error, "composition failed");
        }
        self.advance(PipelineState::Failed);
    }
}

/// The encoded output of a running pipeline.
///
/// Items arrive in output order. A failure after streaming started shows up
/// as a single `Err` item, after which the stream ends; any bytes received
/// before it are a truncated image and must be discarded. Dropping this
/// value cancels the pipeline.
pub struct ComposedStream {
    meta: ImageMeta,
    has_alpha: bool,
    rx: mpsc::Receiver<ComposeResult<Bytes>>,
    failed: bool,
}

impl ComposedStream {
    pub fn meta(&self) -> ImageMeta {
        self.meta
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    pub fn content_type(&self) -> &'static str {
        OUTPUT_CONTENT_TYPE
    }

    pub async fn next_chunk(&mut self) -> Option<ComposeResult<Bytes>> {
        if self.failed {
            return None;
        }
        let item = self.rx.recv().await?;
        if item.is_err() {
            self.failed = true;
            self.rx.close();
        }
        Some(item)
    }

    pub fn into_stream(self) -> impl Stream<Item = ComposeResult<Bytes>> + Send + 'static {
        futures_util::stream::unfold(self, |mut s| async move {
            s.next_chunk().await.map(|item| (item, s))
        })
    }

    /// Collect the whole encoded image.
    pub async fn into_bytes(mut self) -> ComposeResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

/// Validate a request, open both inputs and start streaming.
///
/// Every failure that can be detected up front (threshold, dimensions,
/// unreadable headers) is returned here, before any output exists.
pub async fn compose(ctx: &PipelineContext, request: CompositeRequest) -> ComposeResult<ComposedStream> {
    let CompositeRequest {
        front,
        back,
        keys,
        threshold,
    } = request;

    let mut log = StateLog::new(format!("{}+{}", front.id, back.id));
    log.advance(PipelineState::ValidatingDimensions);

    match open_validated(ctx, front, back, keys, threshold).await {
        Ok((front_rows, back_rows, matcher)) => {
            Ok(start_streaming(ctx, log, front_rows, back_rows, matcher))
        }
        Err(e) => {
            log.fail(&e);
            Err(e)
        }
    }
}

/// Start a pipeline over already opened row streams.
///
/// Must be called from within a tokio runtime.
pub fn compose_streams(
    ctx: &PipelineContext,
    label: impl Into<String>,
    front: Box<dyn RowStream>,
    back: Box<dyn RowStream>,
    matcher: ChromaKeyMatcher,
) -> ComposeResult<ComposedStream> {
    let mut log = StateLog::new(label);
    log.advance(PipelineState::ValidatingDimensions);
    if let Err(e) = ctx.check().and_then(|()| validate(&front.meta(), &back.meta())) {
        log.fail(&e);
        return Err(e);
    }
    Ok(start_streaming(ctx, log, front, back, matcher))
}

async fn open_validated(
    ctx: &PipelineContext,
    front: ImageSource,
    back: ImageSource,
    keys: Vec<KeyColor>,
    threshold: f64,
) -> ComposeResult<(Box<dyn RowStream>, Box<dyn RowStream>, ChromaKeyMatcher)> {
    ctx.check()?;
    let matcher = ChromaKeyMatcher::new(keys, threshold)?;
    validate(&front.declared, &back.declared)?;

    let (front_rows, back_rows) = tokio::task::spawn_blocking(move || -> ComposeResult<_> {
        let front_rows = open_checked(front)?;
        let back_rows = open_checked(back)?;
        Ok((front_rows, back_rows))
    })
    .await??;

    validate(&front_rows.meta(), &back_rows.meta())?;
    Ok((front_rows, back_rows, matcher))
}

fn open_checked(source: ImageSource) -> ComposeResult<Box<dyn RowStream>> {
    let rows = codec::open_stream(source.reader)?;
    if rows.meta() != source.declared {
        return Err(ComposeError::decode(format!(
            "image {} header is {} but the catalog declares {}",
            source.id,
            rows.meta(),
            source.declared
        )));
    }
    Ok(rows)
}

fn start_streaming(
    ctx: &PipelineContext,
    mut log: StateLog,
    front: Box<dyn RowStream>,
    back: Box<dyn RowStream>,
    matcher: ChromaKeyMatcher,
) -> ComposedStream {
    let meta = front.meta();
    let keep_alpha = front.has_alpha() || back.has_alpha();

    let (front_tx, front_rx) = mpsc::channel(ctx.row_queue_depth);
    let (back_tx, back_rx) = mpsc::channel(ctx.row_queue_depth);
    let (out_tx, out_rx) = mpsc::channel(ctx.chunk_queue_depth);
    let chunk_size = ctx.chunk_size;

    log.advance(PipelineState::Streaming);
    info!(
        pipeline = %log.label,
        width = meta.width,
        height = meta.height,
        keys = matcher.keys().len(),
        threshold = matcher.threshold(),
        "composition streaming"
    );

    tokio::task::spawn_blocking(move || pump_rows("front", front, front_tx));
    tokio::task::spawn_blocking(move || pump_rows("back", back, back_tx));
    tokio::task::spawn_blocking(move || {
        run_composite_stage(meta, keep_alpha, &matcher, front_rx, back_rx, out_tx, chunk_size, log)
    });

    ComposedStream {
        meta,
        has_alpha: keep_alpha,
        rx: out_rx,
        failed: false,
    }
}

/// Decoder stage: pull rows from one input into its bounded queue.
///
/// Stops at end of input, on the first error, or when the compositor has
/// dropped its receiver.
fn pump_rows(side: &'static str, mut rows: Box<dyn RowStream>, tx: mpsc::Sender<ComposeResult<Vec<u8>>>) {
    let mut sent: u32 = 0;
    loop {
        if tx.is_closed() {
            debug!(side, sent, "compositor gone, decoder stopping");
            return;
        }
        match rows.next_row() {
            Ok(Some(row)) => {
                if tx.blocking_send(Ok(row)).is_err() {
                    debug!(side, sent, "compositor gone, decoder stopping");
                    return;
                }
                sent += 1;
            }
            Ok(None) => {
                debug!(side, decoder = rows.name(), rows = sent, "input exhausted");
                return;
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

enum StageEnd {
    Completed { rows: u32, replaced: u64 },
    Cancelled,
}

#[allow(clippy::too_many_arguments)]
fn run_composite_stage(
    meta: ImageMeta,
    keep_alpha: bool,
    matcher: &ChromaKeyMatcher,
    front_rx: mpsc::Receiver<ComposeResult<Vec<u8>>>,
    back_rx: mpsc::Receiver<ComposeResult<Vec<u8>>>,
    out_tx: mpsc::Sender<ComposeResult<Bytes>>,
    chunk_size: usize,
    mut log: StateLog,
) {
    let sink = ChunkSink::new(out_tx.clone(), chunk_size);
    let mut encoder = match PngRowEncoder::start(sink, meta, keep_alpha) {
        Ok(enc) => enc,
        Err(e) => {
            log.fail(&e);
            let _ = out_tx.blocking_send(Err(e));
            return;
        }
    };

    let outcome = match composite_rows(&mut encoder, meta, matcher, front_rx, back_rx, &out_tx) {
        Ok(StageEnd::Completed { rows, replaced }) => encoder
            .finish()
            .map(|()| StageEnd::Completed { rows, replaced }),
        other => other,
    };

    match outcome {
        Ok(StageEnd::Completed { rows, replaced }) => {
            log.advance(PipelineState::Completed);
            info!(pipeline = %log.label, rows, replaced, "composition complete");
        }
        Ok(StageEnd::Cancelled) => {
            log.advance(PipelineState::Failed);
            info!(pipeline = %log.label, "output consumer went away, pipeline stopped");
        }
        Err(_) if out_tx.is_closed() => {
            log.advance(PipelineState::Failed);
            info!(pipeline = %log.label, "output consumer went away, pipeline stopped");
        }
        Err(e) => {
            log.fail(&e);
            // Sent while the encoder is still alive so nothing it flushes on
            // drop can reach the consumer ahead of the error.
            let _ = out_tx.blocking_send(Err(e));
        }
    }
}

fn composite_rows<W: Write + 'static>(
    encoder: &mut PngRowEncoder<W>,
    meta: ImageMeta,
    matcher: &ChromaKeyMatcher,
    mut front_rx: mpsc::Receiver<ComposeResult<Vec<u8>>>,
    mut back_rx: mpsc::Receiver<ComposeResult<Vec<u8>>>,
    out_tx: &mpsc::Sender<ComposeResult<Bytes>>,
) -> ComposeResult<StageEnd> {
    let mut rows: u32 = 0;
    let mut replaced: u64 = 0;

    loop {
        if out_tx.is_closed() {
            return Ok(StageEnd::Cancelled);
        }

        let next = (front_rx.blocking_recv(), back_rx.blocking_recv());
        match next {
            (Some(Ok(mut front)), Some(Ok(back))) => {
                if rows == meta.height {
                    return Err(ComposeError::decode(format!(
                        "inputs produced more than the {} rows their headers declare",
                        meta.height
                    )));
                }
                replaced += composite_row(matcher, &mut front, &back)? as u64;
                if let Err(e) = encoder.write_row(&front) {
                    if out_tx.is_closed() {
                        return Ok(StageEnd::Cancelled);
                    }
                    return Err(e);
                }
                rows += 1;
            }
            (Some(Err(e)), _) | (_, Some(Err(e))) => return Err(e),
            (None, None) => break,
            (None, Some(Ok(_))) => {
                return Err(ComposeError::decode(format!(
                    "front image ended after {rows} rows while the back image continued"
                )))
            }
            (Some(Ok(_)), None) => {
                return Err(ComposeError::decode(format!(
                    "back image ended after {rows} rows while the front image continued"
                )))
            }
        }
    }

    if rows != meta.height {
        return Err(ComposeError::decode(format!(
            "inputs ended after {rows} of {} rows",
            meta.height
        )));
    }
    Ok(StageEnd::Completed { rows, replaced })
}
