//! Byte-counting wrappers around readable streams.

use std::io::{self, Read, Write};
use std::time::Instant;

use crate::bar::Bar;

/// Instruments a readable stream: every successful read of `n > 0` bytes
/// advances the owning bar by `n` before the call returns, and with
/// timing enabled the read's wall-clock duration feeds the bar's
/// moving-average decorators. Stream errors pass through untouched;
/// whatever was counted before the error stays counted.
///
/// Built by [`Bar::wrap_read`].
pub struct ProxyReader<R> {
    inner: R,
    bar: Bar,
    timed: bool,
}

impl<R> ProxyReader<R> {
    pub(crate) fn new(bar: Bar, inner: R, timed: bool) -> Self {
        ProxyReader { inner, bar, timed }
    }

    /// The wrapped stream.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Unwrap, dropping the instrumentation.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ProxyReader<R> {
    /// Drain the stream into `w`. Bookkeeping is identical to the
    /// read-call path, so progress tracking doesn't depend on which path
    /// the caller drives.
    pub fn copy_to<W: Write>(&mut self, w: &mut W) -> io::Result<u64> {
        let mut buf = [0u8; 8 * 1024];
        let mut written = 0u64;
        loop {
            let n = match self.read(&mut buf) {
                Ok(0) => return Ok(written),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            w.write_all(&buf[..n])?;
            written += n as u64;
        }
    }
}

impl<R: Read> Read for ProxyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.timed {
            let start = Instant::now();
            let n = self.inner.read(buf)?;
            if n > 0 {
                self.bar.ewma_increment_by(n as i64, start.elapsed());
            }
            Ok(n)
        } else {
            let n = self.inner.read(buf)?;
            if n > 0 {
                self.bar.increment_by(n as i64);
            }
            Ok(n)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::Bar;
    use std::io::{Cursor, Read};

    #[test]
    fn full_drain_matches_stream_length() {
        let data = vec![7u8; 64 * 1024 + 123];
        let bar = Bar::detached(data.len() as i64);

        let mut out = Vec::new();
        let mut proxy = bar.wrap_read(Cursor::new(data.clone()), false);
        proxy.read_to_end(&mut out).unwrap();

        assert_eq!(out, data);
        assert_eq!(bar.current(), data.len() as i64);
        assert!(bar.completed());
    }

    #[test]
    fn bulk_path_keeps_the_same_accounting() {
        let data = vec![3u8; 40 * 1024 + 17];
        let bar = Bar::detached(data.len() as i64);

        let mut out = Vec::new();
        let mut proxy = bar.wrap_read(Cursor::new(data.clone()), true);
        let n = proxy.copy_to(&mut out).unwrap();

        assert_eq!(n, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(bar.current(), data.len() as i64);
        assert!(bar.completed());
    }

    #[test]
    fn odd_sized_reads_still_sum_exactly() {
        let data: Vec<u8> = (0..=255).cycle().take(10_000).map(|b| b as u8).collect();
        let bar = Bar::detached(data.len() as i64);
        let mut proxy = bar.wrap_read(Cursor::new(data.clone()), false);

        let mut buf = [0u8; 97];
        loop {
            match proxy.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(bar.current(), data.len() as i64);
    }

    struct Flaky {
        served: usize,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served >= 10 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe burst"));
            }
            let n = buf.len().min(10 - self.served);
            buf[..n].fill(1);
            self.served += n;
            Ok(n)
        }
    }

    #[test]
    fn stream_errors_pass_through_after_partial_accounting() {
        let bar = Bar::detached(100);
        let mut proxy = bar.wrap_read(Flaky { served: 0 }, false);

        let mut out = Vec::new();
        let err = proxy.copy_to(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(out.len(), 10);
        assert_eq!(bar.current(), 10);
        assert!(bar.is_running());
    }
}
