//! Transport trait
//!
//! Protocol layers (HTTP, TLS handshakes, DNS clients) are written against
//! [`NonBlockingTransport`] instead of a concrete socket or file, so the
//! suspend-on-EAGAIN wrappers can be injected wherever a blocking
//! transport would otherwise be assumed.

use std::io;
use std::time::Duration;

use crate::bomb::TaskResult;

/// A byte stream whose blocking calls suspend only the calling task
pub trait NonBlockingTransport {
    /// Descriptor used for reading (negative once closed)
    fn fileno(&self) -> i32;

    /// Read up to `buf.len()` bytes; `Ok(0)` is end of file
    fn read_into(&self, buf: &mut [u8]) -> TaskResult<usize>;

    /// Read at most `size` bytes; an empty vector is end of file
    fn read_at_most(&self, size: usize) -> TaskResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; size];
        let n = self.read_into(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write every byte, suspending as often as needed
    fn write_all(&self, data: &[u8]) -> TaskResult<()>;

    /// `true` when readable, `false` when the timeout elapsed first
    fn wait_for_readable(&self, timeout: Option<Duration>) -> TaskResult<bool>;

    /// `true` when writable, `false` when the timeout elapsed first
    fn wait_for_writable(&self, timeout: Option<Duration>) -> TaskResult<bool>;

    /// Retire the wait slots and close the descriptor; idempotent
    fn close(&self) -> TaskResult<()>;

    fn is_closed(&self) -> bool {
        self.fileno() < 0
    }
}

/// `std::io::Read` + `std::io::Write` view of any transport
///
/// Bombs surface as `io::Error`s; an `Io` bomb keeps its errno.
pub struct IoAdapter<T>(pub T);

impl<T: NonBlockingTransport> IoAdapter<T> {
    pub fn get_ref(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: NonBlockingTransport> io::Read for IoAdapter<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.0.read_into(buf)?)
    }
}

impl<T: NonBlockingTransport> io::Write for IoAdapter<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
