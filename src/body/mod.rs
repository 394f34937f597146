//! Request and response bodies
mod body_reader;
mod body_writer;
mod chain;
mod chunked;

pub use self::body_reader::BodyReader;
pub use self::body_writer::BodyWriter;
pub use self::chain::{BufferChain, ChainBuf};
pub use self::chunked::ChunkedReader;

/// the streaming quantum, size of one response buffer and of the scratch
/// buffer used to slurp request bodies
pub const BUFFER_SIZE: usize = 8192;
