//! Buffer chains as the host sees them
use std::collections::TryReserveError;
use std::fmt;
use std::slice;

use bytes::{BufMut, Bytes, BytesMut};

/// one fixed capacity buffer of a chain
pub struct ChainBuf {
    data: Vec<u8>,
    cap: usize,
    last_buf: bool,
}

impl ChainBuf {
    /// reserve an empty buffer of exactly `cap` bytes, flagged as the last one
    pub fn try_with_capacity(cap: usize) -> Result<Self, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(cap)?;
        Ok(ChainBuf {
            data,
            cap,
            last_buf: true,
        })
    }

    /// a filled buffer, the way the host hands over request body parts
    pub fn from_vec(data: Vec<u8>, last_buf: bool) -> Self {
        let cap = data.len();
        ChainBuf {
            data,
            cap,
            last_buf,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// the used length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.data.len() == self.cap
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.last_buf
    }

    #[inline]
    pub fn set_last(&mut self, last: bool) {
        self.last_buf = last;
    }

    /// copy as much of `src` as fits, return the copied length
    pub(crate) fn put(&mut self, src: &[u8]) -> usize {
        let n = std::cmp::min(self.cap - self.data.len(), src.len());
        self.data.extend_from_slice(&src[..n]);
        n
    }
}

impl fmt::Debug for ChainBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<buf {}/{} last={}>", self.len(), self.cap, self.last_buf)
    }
}

/// an append only chain of buffers
#[derive(Default)]
pub struct BufferChain {
    bufs: Vec<ChainBuf>,
}

impl BufferChain {
    pub fn new() -> Self {
        BufferChain { bufs: Vec::new() }
    }

    pub fn push(&mut self, buf: ChainBuf) {
        self.bufs.push(buf);
    }

    /// the root of the chain
    #[inline]
    pub fn first(&self) -> Option<&ChainBuf> {
        self.bufs.first()
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<&ChainBuf> {
        self.bufs.get(i)
    }

    #[inline]
    pub(crate) fn last_mut(&mut self) -> Option<&mut ChainBuf> {
        self.bufs.last_mut()
    }

    /// number of linked buffers
    #[inline]
    pub fn links(&self) -> usize {
        self.bufs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    /// total number of bytes, the sum of every buffer's used length
    pub fn size(&self) -> usize {
        self.bufs.iter().map(ChainBuf::len).sum()
    }

    pub fn iter(&self) -> slice::Iter<'_, ChainBuf> {
        self.bufs.iter()
    }

    /// concatenate the chain
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.size());
        for b in self.bufs.iter() {
            out.put_slice(b.as_slice());
        }
        out.freeze()
    }
}

impl fmt::Debug for BufferChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.bufs.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a BufferChain {
    type Item = &'a ChainBuf;
    type IntoIter = slice::Iter<'a, ChainBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.bufs.iter()
    }
}
