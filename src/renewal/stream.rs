//! Tee for the process' own standard streams.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::target::StdStream;

#[derive(Debug, Default)]
struct SinkState {
    path: Option<PathBuf>,
    file: Option<File>,
}

/// The output file that a standard stream is currently forwarded to.
///
/// Cloning shares the sink. Swapping the file is the whole of a
/// process-stream renewal: writers pick up the new file on their next write.
#[derive(Debug, Clone, Default)]
pub struct StreamSink {
    state: Arc<Mutex<SinkState>>,
}

impl StreamSink {
    /// Create a sink that forwards nowhere yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `file` as the forward target; returns the previous one.
    pub(crate) fn swap(&self, path: PathBuf, file: File) -> Option<(PathBuf, File)> {
        let mut state = self.state.lock();
        let previous = state.path.take().zip(state.file.take());
        state.path = Some(path);
        state.file = Some(file);
        previous
    }

    /// Stop forwarding; returns the detached file.
    pub(crate) fn detach(&self) -> Option<(PathBuf, File)> {
        let mut state = self.state.lock();
        state.path.take().zip(state.file.take())
    }

    /// Path currently forwarded to.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.state.lock().path.clone()
    }

    fn forward(&self, buf: &[u8]) {
        if let Some(file) = self.state.lock().file.as_mut() {
            let _ = file.write_all(buf);
        }
    }

    fn flush(&self) {
        if let Some(file) = self.state.lock().file.as_mut() {
            let _ = file.flush();
        }
    }
}

/// `io::Write` that writes to a standard stream and copies every byte into
/// the stream's current output file.
///
/// Forwarding errors never affect the write to the real stream.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    stream: StdStream,
    sink: StreamSink,
}

impl StreamWriter {
    pub fn new(stream: StdStream, sink: StreamSink) -> Self {
        Self { stream, sink }
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.stream {
            StdStream::Stdout => io::stdout().write(buf)?,
            StdStream::Stderr => io::stderr().write(buf)?,
        };
        self.sink.forward(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush();
        match self.stream {
            StdStream::Stdout => io::stdout().flush(),
            StdStream::Stderr => io::stderr().flush(),
        }
    }
}
