//! Sideband multiplexing.
//!
//! With `side-band`/`side-band-64k` negotiated, each pkt-line's first
//! payload byte selects a channel: 1 carries pack data, 2 progress text,
//! 3 a fatal error. A flush ends the multiplexed stream.

use std::io::{Read, Write};

use crate::capability::SidebandMode;
use crate::pktline::{PktLine, PktLineReader, PktLineWriter};
use crate::ProtocolError;

/// Demultiplexer: band 1 comes out of [`read_data`](Self::read_data) (and
/// the [`Read`] impl), band 2 goes to the progress sink, band 3 aborts
/// with [`ProtocolError::Remote`].
pub struct SidebandReader<'a, R> {
    frames: PktLineReader<R>,
    progress: Option<&'a mut dyn Write>,
    /// Unconsumed tail of the last band-1 frame (Read impl only).
    pending: Vec<u8>,
    done: bool,
}

impl<'a, R: Read> SidebandReader<'a, R> {
    pub fn new(frames: PktLineReader<R>) -> Self {
        Self {
            frames,
            progress: None,
            pending: Vec::new(),
            done: false,
        }
    }

    /// Attach a progress sink, rebinding the reader's lifetime to it.
    pub fn with_progress<'b>(self, sink: &'b mut dyn Write) -> SidebandReader<'b, R> {
        SidebandReader {
            frames: self.frames,
            progress: Some(sink),
            pending: self.pending,
            done: self.done,
        }
    }

    /// The next band-1 chunk; `None` once the stream's flush arrived.
    pub fn read_data(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.done {
            return Ok(None);
        }
        loop {
            let payload = match self.frames.read_frame()? {
                PktLine::Data(payload) => payload,
                PktLine::Flush => {
                    self.done = true;
                    return Ok(None);
                }
                other => {
                    return Err(ProtocolError::InvalidResponse(format!(
                        "unexpected {other:?} inside sideband stream"
                    )))
                }
            };
            let Some((&band, rest)) = payload.split_first() else {
                return Err(ProtocolError::InvalidResponse(
                    "sideband frame without a band byte".into(),
                ));
            };
            match band {
                1 => return Ok(Some(rest.to_vec())),
                2 => {
                    if let Some(sink) = self.progress.as_deref_mut() {
                        sink.write_all(rest)?;
                    }
                }
                3 => {
                    return Err(ProtocolError::Remote(
                        String::from_utf8_lossy(rest).trim_end().to_string(),
                    ))
                }
                other => {
                    return Err(ProtocolError::InvalidResponse(format!(
                        "unknown sideband channel {other}"
                    )))
                }
            }
        }
    }

    /// Drain every band-1 byte into one buffer.
    pub fn read_all_data(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_data()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl<R: Read> Read for SidebandReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pending.is_empty() {
            match self.read_data() {
                Ok(Some(chunk)) => self.pending = chunk,
                Ok(None) => return Ok(0),
                Err(e) => return Err(std::io::Error::other(e.to_string())),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Multiplexer, the server-side encode. Splits band-1 data into frames no
/// larger than the negotiated limit and interleaves progress and error
/// frames as asked.
pub struct SidebandWriter<'a, W> {
    frames: &'a mut PktLineWriter<W>,
    limit: usize,
}

impl<'a, W: Write> SidebandWriter<'a, W> {
    pub fn new(frames: &'a mut PktLineWriter<W>, mode: SidebandMode) -> Self {
        Self {
            frames,
            limit: mode.data_limit(),
        }
    }

    fn write_band(&mut self, band: u8, data: &[u8]) -> Result<(), ProtocolError> {
        for chunk in data.chunks(self.limit) {
            let mut frame = Vec::with_capacity(1 + chunk.len());
            frame.push(band);
            frame.extend_from_slice(chunk);
            self.frames.write_data(&frame)?;
        }
        Ok(())
    }

    pub fn write_data(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.write_band(1, data)
    }

    pub fn write_progress(&mut self, message: &[u8]) -> Result<(), ProtocolError> {
        self.write_band(2, message)
    }

    pub fn write_error(&mut self, message: &[u8]) -> Result<(), ProtocolError> {
        self.write_band(3, message)
    }

    /// End the multiplexed stream.
    pub fn finish(self) -> Result<(), ProtocolError> {
        self.frames.write_flush()
    }
}
