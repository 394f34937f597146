use std::fmt;
use std::io::{self, Write};

use http::StatusCode;

use super::chain::{BufferChain, ChainBuf};
use crate::error::Condition;

/// accumulates the response body into a chain of fixed size buffers
///
/// The chain is never copied, the host sends the buffers as they are. Only
/// the most recently allocated buffer carries the last buffer flag.
pub struct BodyWriter {
    chain: BufferChain,
    buffer_size: usize,
    // maximum number of buffers this response may allocate
    limit: Option<usize>,
    closed: bool,
}

impl fmt::Debug for BodyWriter {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(
            f,
            "BodyWriter {} bytes in {} buffers",
            self.chain.size(),
            self.chain.links()
        )
    }
}

impl BodyWriter {
    pub fn new(buffer_size: usize) -> Self {
        BodyWriter::with_limit(buffer_size, None)
    }

    pub fn with_limit(buffer_size: usize, limit: Option<usize>) -> Self {
        BodyWriter {
            chain: BufferChain::new(),
            buffer_size: buffer_size.max(1),
            limit,
            closed: false,
        }
    }

    /// the chain written so far
    #[inline]
    pub fn chain(&self) -> &BufferChain {
        &self.chain
    }

    /// take the chain out for transmission, leaving an empty one behind
    pub fn take_chain(&mut self) -> BufferChain {
        std::mem::replace(&mut self.chain, BufferChain::new())
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn allocate_buffer(&mut self) -> io::Result<()> {
        trace!("allocating response buffer");
        let exhausted = self.limit.map_or(false, |n| self.chain.links() >= n);
        let buf = match ChainBuf::try_with_capacity(self.buffer_size) {
            Ok(buf) if !exhausted => buf,
            _ => {
                error!("failed to allocate response buffer");
                return Err(Condition::nginx(
                    "put-u8",
                    "[Internal] Failed to allocate response buffer",
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
                .into());
            }
        };
        if let Some(prev) = self.chain.last_mut() {
            prev.set_last(false);
        }
        self.chain.push(buf);
        Ok(())
    }
}

impl Write for BodyWriter {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "response output port is closed",
            ));
        }
        let mut written = 0;
        while !buf.is_empty() {
            let full = self.chain.last_mut().map_or(true, |b| b.is_full());
            if full {
                match self.allocate_buffer() {
                    Ok(()) => {}
                    // report what was copied, the next write raises
                    Err(_) if written > 0 => return Ok(written),
                    Err(e) => return Err(e),
                }
            }
            if let Some(cur) = self.chain.last_mut() {
                let n = cur.put(buf);
                buf = &buf[n..];
                written += n;
            }
        }
        Ok(written)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
