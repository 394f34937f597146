//! Decoding of `Transfer-Encoding: chunked` request bodies for the
//! development host
use std::cmp;
use std::convert::TryFrom;
use std::io::{self, Read};

/// reads the payload of a chunked body from the underlying stream
pub struct ChunkedReader<R> {
    inner: R,
    // None means we don't know the size of the next chunk
    remaining: Option<usize>,
}

impl<R: Read> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        ChunkedReader {
            inner,
            remaining: None,
        }
    }
}

impl<R: Read> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let r = &mut self.inner;
        let mut rem = match self.remaining {
            Some(rem) => rem,
            None => read_chunk_size(r)?,
        };
        trace!("Chunked read, remaining={:?}", rem);

        if rem == 0 {
            if self.remaining.is_none() {
                // the trailer section is not supported, just the final CRLF
                eat(r, b"\r\n")?;
            }
            self.remaining = Some(0);
            trace!("end of chunked");
            return Ok(0);
        }

        let to_read = cmp::min(rem, buf.len());
        let count = r.read(&mut buf[..to_read])?;
        if count == 0 {
            self.remaining = Some(0);
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "early eof"));
        }

        rem -= count;
        self.remaining = if rem > 0 {
            Some(rem)
        } else {
            eat(r, b"\r\n")?;
            None
        };
        Ok(count)
    }
}

fn eat<R: Read>(rdr: &mut R, bytes: &[u8]) -> io::Result<()> {
    let mut buf = [0];
    for &b in bytes.iter() {
        match rdr.read(&mut buf)? {
            1 if buf[0] == b => {}
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "Invalid characters found",
                ));
            }
        }
    }
    Ok(())
}

// longest size line accepted, extensions included
const MAX_SIZE_LINE: usize = 4096;

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

/// read the size line of the next chunk and parse it with `httparse`
///
/// the line is read byte by byte so nothing past it leaves the stream
fn read_chunk_size<R: Read>(rdr: &mut R) -> io::Result<usize> {
    let mut line = Vec::with_capacity(16);
    let mut byte = [0];
    loop {
        if rdr.read(&mut byte)? == 0 {
            return Err(invalid("Invalid chunk size line, read byte"));
        }
        line.push(byte[0]);
        if byte[0] == b'\n' {
            break;
        }
        if line.len() > MAX_SIZE_LINE {
            return Err(invalid("Invalid chunk size line, too long"));
        }
    }
    let size = match httparse::parse_chunk_size(&line) {
        Ok(httparse::Status::Complete((_, size))) => size,
        _ => return Err(invalid("Invalid chunk size line")),
    };
    trace!("chunk size={:?}", size);
    usize::try_from(size).map_err(|_| invalid("chunk size overflow"))
}
