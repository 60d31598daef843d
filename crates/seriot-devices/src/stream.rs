//! Byte streams and line framing.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Pause between empty reads so an idle stream is not polled in a hot loop.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Transport to a physical device.
///
/// `read` is a short poll: it returns whatever bytes are available right
/// now, or an empty buffer when the device is quiet. Framing into lines is
/// the caller's job ([`LineFramer`]). Implementations keep their own
/// interior mutability so reads and writes can be issued through a shared
/// reference.
#[async_trait]
pub trait ByteStream: Send + Sync {
    /// Poll for available bytes. Empty means nothing to read right now.
    async fn read(&self) -> io::Result<Vec<u8>>;

    /// Send bytes to the device.
    async fn write(&self, bytes: &[u8]) -> io::Result<()>;

    /// Close the transport. A component closes its stream exactly once,
    /// at teardown.
    async fn close(&self) -> io::Result<()>;
}

/// Accumulates stream reads into EOL-delimited lines.
///
/// A line ends at the component's EOL marker (which may be more than one
/// byte, e.g. `"\r:"` for devices that echo a prompt). If the device goes
/// quiet for longer than the inactivity timeout, whatever has accumulated
/// is returned as-is so a half-finished response is still observable.
/// Bytes following an EOL are kept for the next call.
pub struct LineFramer {
    eol: Vec<u8>,
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new(eol: impl Into<String>) -> Self {
        Self {
            eol: eol.into().into_bytes(),
            buffer: Vec::new(),
        }
    }

    /// Read one line from `stream`.
    ///
    /// Returns the line with its EOL marker stripped, or the partial
    /// buffer (possibly empty) once `timeout` elapses with no activity.
    pub async fn read_line(
        &mut self,
        stream: &dyn ByteStream,
        timeout: Duration,
    ) -> io::Result<String> {
        let mut last_activity = Instant::now();
        loop {
            if let Some(at) = find(&self.buffer, &self.eol) {
                let line = self.buffer.drain(..at).collect::<Vec<u8>>();
                self.buffer.drain(..self.eol.len());
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }

            let chunk = stream.read().await?;
            if chunk.is_empty() {
                if last_activity.elapsed() >= timeout {
                    let partial = std::mem::take(&mut self.buffer);
                    return Ok(String::from_utf8_lossy(&partial).into_owned());
                }
                tokio::time::sleep(IDLE_POLL).await;
            } else {
                self.buffer.extend_from_slice(&chunk);
                last_activity = Instant::now();
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// In-memory [`ByteStream`] that simulates a device.
///
/// Unsolicited device output is queued with [`push`](Self::push); host
/// writes are captured and can be inspected with
/// [`take_written`](Self::take_written). A responder closure can script a
/// synchronous device: it sees each write and may return the bytes the
/// device answers with.
pub struct LoopbackStream {
    inner: Mutex<LoopbackInner>,
}

struct LoopbackInner {
    pending: Vec<u8>,
    written: Vec<u8>,
    closed: bool,
    responder: Option<Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>>,
}

impl LoopbackStream {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LoopbackInner {
                pending: Vec::new(),
                written: Vec::new(),
                closed: false,
                responder: None,
            }),
        }
    }

    /// Create a stream whose device half answers writes via `responder`.
    pub fn with_responder(
        responder: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        let stream = Self::new();
        stream.inner.try_lock().expect("fresh stream").responder = Some(Box::new(responder));
        stream
    }

    /// Queue bytes the device emits on its own.
    pub async fn push(&self, bytes: &[u8]) {
        self.inner.lock().await.pending.extend_from_slice(bytes);
    }

    /// Everything the host has written so far, clearing the capture.
    pub async fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().await.written)
    }

    /// Everything the host has written so far.
    pub async fn written(&self) -> Vec<u8> {
        self.inner.lock().await.written.clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

impl Default for LoopbackStream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ByteStream for LoopbackStream {
    async fn read(&self) -> io::Result<Vec<u8>> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream closed"));
        }
        Ok(std::mem::take(&mut inner.pending))
    }

    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream closed"));
        }
        inner.written.extend_from_slice(bytes);
        if let Some(responder) = &inner.responder {
            if let Some(reply) = responder(bytes) {
                inner.pending.extend_from_slice(&reply);
            }
        }
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        self.inner.lock().await.closed = true;
        Ok(())
    }
}
