//! Print-output plumbing for the `print` builtin.
//!
//! The interpreter never writes to stdout directly; everything goes through a
//! [`PrintWriter`] chosen by the embedder. Writers take `&self` because
//! workflow workers may print concurrently from several threads.

use parking_lot::Mutex;

/// Destination for `print` output.
pub trait PrintWriter: Send + Sync {
    /// Writes one line of output.
    fn print(&self, line: &str);
}

/// Writes to stdout, one line per `print` call.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn print(&self, line: &str) {
        println!("{line}");
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn print(&self, _line: &str) {}
}

/// Collects output into a string, for tests and embedders that capture it.
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    buffer: Mutex<String>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything printed so far.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    /// Takes the collected output, leaving the buffer empty.
    #[must_use]
    pub fn take(&self) -> String {
        std::mem::take(&mut *self.buffer.lock())
    }
}

impl PrintWriter for CollectStringPrint {
    fn print(&self, line: &str) {
        let mut buffer = self.buffer.lock();
        buffer.push_str(line);
        buffer.push('\n');
    }
}
