use std::io::{self, Cursor, Read};

/// Lookahead kept for the bounds probe. Large enough for the common codecs to
/// find their header so the stream can be rewound instead of fetched twice.
pub const BUFFER_SIZE: usize = 128 * 1024;

/// A byte stream that can remember a position and rewind to it.
pub trait MarkableRead: Read {
    /// Remember the current position. At most `limit` bytes may be read
    /// before `reset` stops being possible.
    fn mark(&mut self, limit: usize);

    /// Rewind to the last mark. Fails when no mark is set or when more than
    /// the mark limit has been read since.
    fn reset(&mut self) -> io::Result<()>;
}

/// Fully buffered stream, e.g. the payload of a data URI.
#[derive(Debug)]
pub struct MemoryStream {
    cursor: Cursor<Vec<u8>>,
    mark: u64,
}

impl MemoryStream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
            mark: 0,
        }
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl MarkableRead for MemoryStream {
    fn mark(&mut self, _limit: usize) {
        self.mark = self.cursor.position();
    }

    fn reset(&mut self) -> io::Result<()> {
        self.cursor.set_position(self.mark);
        Ok(())
    }
}

/// Adds mark/reset to a stream that cannot seek by recording what is read
/// after the mark, up to a fixed capacity.
pub struct ReplayReader<R> {
    inner: R,
    recorded: Vec<u8>,
    replay_pos: usize,
    limit: Option<usize>,
    capacity: usize,
}

impl<R: Read> ReplayReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(BUFFER_SIZE, inner)
    }

    pub fn with_capacity(capacity: usize, inner: R) -> Self {
        Self {
            inner,
            recorded: Vec::new(),
            replay_pos: 0,
            limit: None,
            capacity,
        }
    }

    fn invalidate_mark(&mut self) {
        self.limit = None;
        self.recorded = Vec::new();
        self.replay_pos = 0;
    }
}

impl<R: Read> Read for ReplayReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.replay_pos < self.recorded.len() {
            let pending = &self.recorded[self.replay_pos..];
            let n = pending.len().min(buf.len());
            buf[..n].copy_from_slice(&pending[..n]);
            self.replay_pos += n;
            return Ok(n);
        }

        let n = self.inner.read(buf)?;
        if let Some(limit) = self.limit {
            if self.recorded.len() + n <= limit {
                self.recorded.extend_from_slice(&buf[..n]);
                self.replay_pos = self.recorded.len();
            } else {
                self.invalidate_mark();
            }
        }
        Ok(n)
    }
}

impl<R: Read> MarkableRead for ReplayReader<R> {
    fn mark(&mut self, limit: usize) {
        // Bytes already consumed before the new mark are no longer needed.
        self.recorded.drain(..self.replay_pos);
        self.replay_pos = 0;
        self.limit = Some(limit.min(self.capacity));
    }

    fn reset(&mut self) -> io::Result<()> {
        match self.limit {
            Some(_) => {
                self.replay_pos = 0;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "resetting to invalid mark",
            )),
        }
    }
}
