//! Streaming chroma-key compositing.
//!
//! Two equally sized images are decoded row by row in lockstep. Every front
//! pixel within a Euclidean RGB distance of any key color is replaced by the
//! back pixel at the same position, and the result is re-encoded as PNG
//! while it is produced.

pub mod codec;
pub mod composite;
pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod pixel;
pub mod validate;

pub use error::{ComposeError, ComposeResult};
pub use matcher::ChromaKeyMatcher;
pub use pipeline::{
    compose, compose_streams, ComposedStream, CompositeRequest, ImageSource, PipelineContext,
    PipelineState, OUTPUT_CONTENT_TYPE,
};
pub use pixel::{KeyColor, PixelSample};
pub use validate::{validate, ImageMeta};
