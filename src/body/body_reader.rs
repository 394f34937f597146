use std::cmp;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::rc::Rc;

use bytes::{BufMut, Bytes, BytesMut};

use super::BUFFER_SIZE;
use crate::host::RequestBody;

use self::TempInput::*;

// state of the spilled part of the body
enum TempInput {
    // the in memory chain is not drained yet
    Unopened,
    // the host did not spill anything
    Absent,
    Open(BufReader<File>),
}

/// sequential reader over a request body the host already buffered
///
/// The body is a chain of in memory buffers, optionally followed by a
/// temporary file holding the part that did not fit in memory.
pub struct BodyReader {
    body: Option<Rc<RequestBody>>,
    // index of the current link and cursor inside it
    link: usize,
    pos: usize,
    temp: TempInput,
    closed: bool,
}

impl fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let name = match self.temp {
            Unopened => "memory",
            Absent => "exhausted",
            Open(_) => "temp file",
        };
        write!(f, "BodyReader {}", name)
    }
}

impl BodyReader {
    pub fn new(body: Option<Rc<RequestBody>>) -> Self {
        BodyReader {
            body,
            link: 0,
            pos: 0,
            temp: Unopened,
            closed: false,
        }
    }

    /// read the rest of the body
    pub fn read_all(&mut self) -> io::Result<Bytes> {
        let mut scratch = [0u8; BUFFER_SIZE];
        let mut out = BytesMut::new();
        loop {
            let n = self.read(&mut scratch)?;
            out.put_slice(&scratch[..n]);
            if n != BUFFER_SIZE {
                break;
            }
        }
        Ok(out.freeze())
    }

    /// release the temp file stream, if any
    pub fn close(&mut self) {
        if let Open(_) = self.temp {
            trace!("closing request body temp file");
        }
        self.temp = Absent;
        self.closed = true;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn read_memory(&mut self, body: &RequestBody, buf: &mut [u8]) -> usize {
        let mut read = 0;
        while read < buf.len() {
            let cur = match body.bufs.get(self.link) {
                Some(cur) => cur,
                None => break,
            };
            if self.pos == cur.len() {
                if cur.is_last() || body.bufs.get(self.link + 1).is_none() {
                    break;
                }
                self.link += 1;
                self.pos = 0;
                continue;
            }
            let n = cmp::min(cur.len() - self.pos, buf.len() - read);
            buf[read..read + n].copy_from_slice(&cur.as_slice()[self.pos..self.pos + n]);
            self.pos += n;
            read += n;
        }
        read
    }

    fn open_temp(body: &RequestBody) -> io::Result<TempInput> {
        match body.temp_file {
            Some(ref tmp) => {
                debug!("reading request body from temp file {:?}", tmp.path());
                let mut file = tmp.as_file().try_clone()?;
                file.seek(SeekFrom::Start(0))?;
                Ok(Open(BufReader::with_capacity(BUFFER_SIZE, file)))
            }
            None => Ok(Absent),
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "request input port is closed",
            ));
        }
        let body = match self.body {
            Some(ref body) => body.clone(),
            None => return Ok(0),
        };

        let mut read = 0;
        if let Unopened = self.temp {
            read = self.read_memory(&body, buf);
        }
        if read != buf.len() {
            if let Unopened = self.temp {
                self.temp = Self::open_temp(&body)?;
            }
            if let Open(ref mut file) = self.temp {
                read += read_fully(file, &mut buf[read..])?;
            }
        }
        Ok(read)
    }
}

// fill `buf` as far as the reader allows
fn read_fully<R: Read>(rdr: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match rdr.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::body::{BufferChain, ChainBuf};

    fn memory_body(parts: &[&[u8]]) -> RequestBody {
        let mut bufs = BufferChain::new();
        for (i, p) in parts.iter().enumerate() {
            bufs.push(ChainBuf::from_vec(p.to_vec(), i == parts.len() - 1));
        }
        RequestBody {
            bufs,
            temp_file: None,
        }
    }

    #[test]
    fn test_no_body() {
        let mut rdr = BodyReader::new(None);
        let mut buf = [0u8; 8];
        assert_eq!(rdr.read(&mut buf).unwrap(), 0);
        assert_eq!(rdr.read_all().unwrap().len(), 0);
    }

    #[test]
    fn test_read_across_links() {
        let body = memory_body(&[b"foo", b"", b"barbaz"]);
        let mut rdr = BodyReader::new(Some(Rc::new(body)));
        let mut buf = [0u8; 4];
        assert_eq!(rdr.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"foob");
        assert_eq!(rdr.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"arba");
        assert_eq!(rdr.read(&mut buf).unwrap(), 1);
        assert_eq!(&buf[..1], b"z");
        assert_eq!(rdr.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_stops_at_last_buf() {
        let mut bufs = BufferChain::new();
        bufs.push(ChainBuf::from_vec(b"abc".to_vec(), true));
        bufs.push(ChainBuf::from_vec(b"ignored".to_vec(), false));
        let body = RequestBody {
            bufs,
            temp_file: None,
        };
        let mut rdr = BodyReader::new(Some(Rc::new(body)));
        assert_eq!(&rdr.read_all().unwrap()[..], b"abc");
    }

    #[test]
    fn test_memory_then_temp_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let tail: Vec<u8> = (0..3 * BUFFER_SIZE + 17).map(|i| (i % 251) as u8).collect();
        tmp.write_all(&tail).unwrap();
        let mut bufs = BufferChain::new();
        bufs.push(ChainBuf::from_vec(b"head-".to_vec(), false));
        bufs.push(ChainBuf::from_vec(b"part".to_vec(), false));
        let body = RequestBody {
            bufs,
            temp_file: Some(tmp),
        };

        let mut rdr = BodyReader::new(Some(Rc::new(body)));
        let all = rdr.read_all().unwrap();
        let mut expect = b"head-part".to_vec();
        expect.extend_from_slice(&tail);
        assert_eq!(&all[..], &expect[..]);
        let mut buf = [0u8; 4];
        assert_eq!(rdr.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_close() {
        let body = memory_body(&[b"abc"]);
        let mut rdr = BodyReader::new(Some(Rc::new(body)));
        rdr.close();
        rdr.close();
        assert!(rdr.is_closed());
        let mut buf = [0u8; 4];
        assert!(rdr.read(&mut buf).is_err());
    }
}
