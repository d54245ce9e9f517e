use std::io::{self, Read};

/// Reads at most `limit` bytes from a borrowed reader.
///
/// Unlike [`Read::take`], the inner reader is only borrowed, so it stays
/// usable afterwards, and [`is_input_finished`](Self::is_input_finished)
/// tells whether the inner reader ran dry before the limit was reached.
#[derive(Debug)]
pub struct LimitedReader<'a, R: ?Sized> {
    inner: &'a mut R,
    remaining: u64,
    input_finished: bool,
}

impl<'a, R: Read + ?Sized> LimitedReader<'a, R> {
    /// Limits `inner` to `limit` bytes.
    pub fn new(inner: &'a mut R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
            input_finished: false,
        }
    }

    /// Bytes still allowed.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// `true` once the inner reader reported end of data before the limit.
    ///
    /// Reading exactly up to the limit never probes the inner reader, so
    /// this stays `false` even if the inner reader is also exhausted.
    pub fn is_input_finished(&self) -> bool {
        self.input_finished
    }
}

impl<R: Read + ?Sized> Read for LimitedReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() || self.input_finished {
            return Ok(0);
        }
        let max = (buf.len() as u64).min(self.remaining) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            self.input_finished = true;
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}
