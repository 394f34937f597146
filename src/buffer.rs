use std::cmp;
use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};

/// a stream with a growable read buffer and a fixed size write buffer
///
/// The read buffer is exposed so the request parser can work on it in
/// place, whatever it leaves behind is what body readers get first.
#[derive(Debug)]
pub struct BufferIo<T> {
    inner: T,
    reader_buf: BytesMut,
    writer_buf: Vec<u8>,
    writer_cap: usize,
}

const INIT_BUFFER_SIZE: usize = 1024;

impl<T> BufferIo<T> {
    #[inline]
    pub fn new(io: T) -> Self {
        BufferIo::with_capacity(io, INIT_BUFFER_SIZE)
    }

    #[inline]
    pub fn with_capacity(io: T, cap: usize) -> Self {
        BufferIo {
            inner: io,
            reader_buf: BytesMut::with_capacity(cap),
            writer_buf: Vec::with_capacity(cap),
            writer_cap: cap.max(1),
        }
    }
}

impl<T: Read> BufferIo<T> {
    /// read some data into internal buffer
    pub fn bump_read(&mut self) -> io::Result<usize> {
        let len = self.reader_buf.len();
        // the minimum size is 32
        let spare = cmp::max(self.reader_buf.capacity() - len, 32);
        self.reader_buf.resize(len + spare, 0);
        match self.inner.read(&mut self.reader_buf[len..]) {
            Ok(n) => {
                self.reader_buf.truncate(len + n);
                Ok(n)
            }
            Err(e) => {
                self.reader_buf.truncate(len);
                Err(e)
            }
        }
    }

    /// return the internal buffer
    #[inline]
    pub fn get_reader_buf(&mut self) -> &mut BytesMut {
        &mut self.reader_buf
    }
}

impl<T: Read> Read for BufferIo<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.reader_buf.is_empty() && self.bump_read()? == 0 {
            return Ok(0);
        }
        let len = cmp::min(buf.len(), self.reader_buf.len());
        buf[..len].copy_from_slice(&self.reader_buf[..len]);
        self.reader_buf.advance(len);
        Ok(len)
    }
}

impl<T: Write> Write for BufferIo<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.writer_buf.len() == self.writer_cap {
            self.flush()?;
        }
        let remain = self.writer_cap - self.writer_buf.len();
        let len = cmp::min(remain, buf.len());
        self.writer_buf.extend_from_slice(&buf[..len]);
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.write_all(&self.writer_buf)?;
        self.writer_buf.clear();
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read};

    struct SlowRead(u8);

    impl Read for SlowRead {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let state = self.0;
            self.0 += 1;
            (&match state % 3 {
                0 => b"foo",
                1 => b"bar",
                _ => b"baz",
            }[..])
                .read(buf)
        }
    }

    #[test]
    fn test_advance_and_get_buf() {
        let mut rdr = BufferIo::new(SlowRead(0));
        rdr.bump_read().unwrap();
        rdr.get_reader_buf().advance(1);
        assert_eq!(rdr.get_reader_buf().as_ref(), b"oo");
        rdr.bump_read().unwrap();
        rdr.bump_read().unwrap();
        assert_eq!(rdr.get_reader_buf().as_ref(), b"oobarbaz");
        rdr.get_reader_buf().advance(5);
        assert_eq!(rdr.get_reader_buf().as_ref(), b"baz");
        rdr.get_reader_buf().advance(3);
        assert_eq!(rdr.get_reader_buf().as_ref(), b"");
    }

    #[test]
    fn test_read_drains_buffer_first() {
        let raw = b"GET / HTTP/1.1\r\n\r\nbody";
        let mut rdr = BufferIo::with_capacity(&raw[..], 64);
        rdr.bump_read().unwrap();
        let _ = rdr.get_reader_buf().split_to(18);
        let mut out = Vec::new();
        rdr.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"body");
    }

    #[test]
    fn test_grows() {
        let raw = vec![1u8; 5000];
        let mut rdr = BufferIo::with_capacity(&raw[..], 65);
        let mut total = 0;
        loop {
            let n = rdr.bump_read().unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 5000);
        assert_eq!(rdr.get_reader_buf().len(), 5000);
    }

    #[test]
    fn test_write() {
        let data = vec![0u8; 100];
        let mut wrt = BufferIo::with_capacity(io::sink(), 40);
        let n = wrt.write(&data).unwrap();
        assert_eq!(n, 40);
        let n = wrt.write(&[0u8; 6]).unwrap();
        assert_eq!(n, 6);
        let n = wrt.write(&data).unwrap();
        assert_eq!(n, 34);
        let n = wrt.write(&data).unwrap();
        assert_eq!(n, 40);
    }
}
