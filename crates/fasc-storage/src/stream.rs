use std::fmt;
use std::io::{self, Read};
use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

type SharedReader = Arc<Mutex<Option<Box<dyn Read + Send>>>>;

/// A readable stream over payload content.
///
/// The payload that opened the stream keeps a weak handle to it. Closing the
/// payload releases the underlying reader, after which reads fail with an
/// `io::Error`. Dropping the stream releases it as well.
pub struct PayloadStream {
    pid: String,
    inner: SharedReader,
}

impl PayloadStream {
    /// Identifier of the payload this stream reads.
    pub fn pid(&self) -> &str {
        &self.pid
    }

    /// Whether the owning payload has released this stream.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }
}

impl Read for PayloadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "payload stream lock poisoned"))?;
        match guard.as_mut() {
            Some(reader) => reader.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("payload stream '{}' is closed", self.pid),
            )),
        }
    }
}

impl fmt::Debug for PayloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadStream")
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Streams handed out by one payload that may still be open.
#[derive(Default)]
pub(crate) struct OpenStreams {
    handles: Vec<Weak<Mutex<Option<Box<dyn Read + Send>>>>>,
}

impl OpenStreams {
    /// Wrap `reader` in a [`PayloadStream`] and remember it.
    pub(crate) fn track(&mut self, pid: &str, reader: Box<dyn Read + Send>) -> PayloadStream {
        self.handles.retain(|h| h.strong_count() > 0);
        let inner = Arc::new(Mutex::new(Some(reader)));
        self.handles.push(Arc::downgrade(&inner));
        PayloadStream {
            pid: pid.to_string(),
            inner,
        }
    }

    /// Release every stream that is still alive. Returns how many were open.
    ///
    /// Streams already dropped by the caller are skipped silently.
    pub(crate) fn close_all(&mut self, pid: &str) -> usize {
        let mut closed = 0;
        for handle in self.handles.drain(..) {
            let Some(shared) = handle.upgrade() else {
                continue;
            };
            let released = match shared.lock() {
                Ok(mut guard) => guard.take().is_some(),
                Err(_) => {
                    warn!(pid, "payload stream lock poisoned; stream left open");
                    false
                }
            };
            if released {
                closed += 1;
            }
        }
        closed
    }

    pub(crate) fn open_count(&self) -> usize {
        self.handles
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|s| s.lock().map(|g| g.is_some()).unwrap_or(false))
            .count()
    }
}

impl fmt::Debug for OpenStreams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenStreams")
            .field("open", &self.open_count())
            .finish()
    }
}
