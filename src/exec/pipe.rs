// src/exec/pipe.rs

//! Non-blocking channel to one redirected stream of a child process.
//!
//! A read never blocks the caller for longer than the pipe's wait budget:
//! if no data arrives in time the attempt is recorded as pending and an empty
//! result is returned. `AsyncReadExt::read` is cancel safe, so abandoning a
//! timed-out read never loses bytes.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Default upper bound for a single read or write attempt.
pub const DEFAULT_PIPE_WAIT: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 8 * 1024;

/// Which stream of the child a pipe is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeStream {
    Stdin,
    Stdout,
    Stderr,
}

/// Lifecycle of a pipe. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    Idle,
    ReadPending,
    Closed,
}

/// Outcome of a single [`AsyncProcessPipe::read`] attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeRead {
    Data(Vec<u8>),
    /// Nothing was ready within the wait budget.
    Pending,
    /// The remote end disconnected; no more data will ever arrive.
    Closed,
}

enum Endpoint {
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    Detached,
}

pub struct AsyncProcessPipe {
    stream: PipeStream,
    endpoint: Endpoint,
    state: PipeState,
    wait: Duration,
}

impl std::fmt::Debug for AsyncProcessPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncProcessPipe")
            .field("stream", &self.stream)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AsyncProcessPipe {
    /// Create the pipe and the child's end of it.
    ///
    /// The returned [`Stdio`] is handed to the command; the retained end is
    /// attached with [`attach_reader`](Self::attach_reader) or
    /// [`attach_writer`](Self::attach_writer) once the child is spawned.
    pub fn open(stream: PipeStream) -> (Self, Stdio) {
        let pipe = Self {
            stream,
            endpoint: Endpoint::Detached,
            state: PipeState::Idle,
            wait: DEFAULT_PIPE_WAIT,
        };
        (pipe, Stdio::piped())
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn attach_reader<R>(&mut self, reader: Option<R>)
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.endpoint = match reader {
            Some(r) => Endpoint::Reader(Box::new(r)),
            None => {
                self.state = PipeState::Closed;
                Endpoint::Detached
            }
        };
    }

    pub fn attach_writer<W>(&mut self, writer: Option<W>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.endpoint = match writer {
            Some(w) => Endpoint::Writer(Box::new(w)),
            None => {
                self.state = PipeState::Closed;
                Endpoint::Detached
            }
        };
    }

    pub fn stream(&self) -> PipeStream {
        self.stream
    }

    pub fn state(&self) -> PipeState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == PipeState::Closed
    }

    /// Attempt a read, waiting at most the pipe's wait budget.
    pub async fn read(&mut self) -> io::Result<PipeRead> {
        if self.state == PipeState::Closed {
            return Ok(PipeRead::Closed);
        }
        let Endpoint::Reader(reader) = &mut self.endpoint else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{:?} pipe is not readable", self.stream),
            ));
        };

        let mut buf = vec![0u8; READ_CHUNK];
        match timeout(self.wait, reader.read(&mut buf)).await {
            Err(_elapsed) => {
                self.state = PipeState::ReadPending;
                Ok(PipeRead::Pending)
            }
            Ok(Ok(0)) => {
                self.close();
                Ok(PipeRead::Closed)
            }
            Ok(Ok(n)) => {
                self.state = PipeState::Idle;
                buf.truncate(n);
                Ok(PipeRead::Data(buf))
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.close();
                Ok(PipeRead::Closed)
            }
            Ok(Err(e)) => Err(e),
        }
    }

    /// Write as much of `data` as the child accepts within the wait budget.
    ///
    /// Returns the number of bytes written; `0` means the child was not ready.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state == PipeState::Closed || data.is_empty() {
            return Ok(0);
        }
        let Endpoint::Writer(writer) = &mut self.endpoint else {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{:?} pipe is not writable", self.stream),
            ));
        };

        match timeout(self.wait, writer.write(data)).await {
            Err(_elapsed) => Ok(0),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.close();
                Ok(0)
            }
            Ok(Err(e)) => Err(e),
        }
    }

    /// Force the pipe closed, dropping our end. Closing a stdin pipe signals
    /// end-of-input to the child.
    pub fn close(&mut self) {
        self.endpoint = Endpoint::Detached;
        self.state = PipeState::Closed;
    }
}
