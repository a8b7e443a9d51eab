//! Pkt-line framing.
//!
//! Every frame opens with four lowercase-hex digits giving the total frame
//! length (header included). Three lengths are sentinels with no payload:
//! `0000` flush, `0001` delimiter, `0002` response-end. Data frames carry
//! at most [`MAX_DATA_LEN`] payload bytes.

use std::io::{Read, Write};

use crate::ProtocolError;

/// Largest whole frame: 65520 bytes.
pub const MAX_FRAME_LEN: usize = 65520;

/// Largest payload: the frame minus its 4-byte header.
pub const MAX_DATA_LEN: usize = MAX_FRAME_LEN - 4;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Vec<u8>),
    /// `0000`, the section terminator.
    Flush,
    /// `0001`, the v2 section separator (recognized, never emitted here).
    Delimiter,
    /// `0002`, the v2 response terminator (recognized, never emitted here).
    ResponseEnd,
}

/// Decodes frames from a byte stream.
pub struct PktLineReader<R> {
    inner: R,
}

impl<R: Read> PktLineReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read exactly one frame.
    pub fn read_frame(&mut self) -> Result<PktLine, ProtocolError> {
        let mut head = [0u8; 4];
        self.inner.read_exact(&mut head).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::InvalidPktLine("stream ended inside a frame header".into())
            } else {
                ProtocolError::Io(e)
            }
        })?;

        let text = std::str::from_utf8(&head)
            .map_err(|_| ProtocolError::InvalidPktLine(format!("non-ASCII length {head:?}")))?;
        let len = usize::from_str_radix(text, 16)
            .map_err(|_| ProtocolError::InvalidPktLine(format!("bad hex length {text:?}")))?;

        match len {
            0 => {
                tracing::trace!(target: "grit::packet", "< 0000");
                return Ok(PktLine::Flush);
            }
            1 => return Ok(PktLine::Delimiter),
            2 => return Ok(PktLine::ResponseEnd),
            3 => {
                return Err(ProtocolError::InvalidPktLine(
                    "length 3 is neither sentinel nor data".into(),
                ))
            }
            _ => {}
        }
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::InvalidPktLine(format!(
                "frame of {len} bytes exceeds the {MAX_FRAME_LEN} cap"
            )));
        }

        let mut payload = vec![0u8; len - 4];
        self.inner.read_exact(&mut payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                ProtocolError::InvalidPktLine(format!(
                    "frame declared {len} bytes but the stream ended early"
                ))
            } else {
                ProtocolError::Io(e)
            }
        })?;
        tracing::trace!(
            target: "grit::packet",
            "< {}",
            String::from_utf8_lossy(&payload).trim_end()
        );
        Ok(PktLine::Data(payload))
    }

    /// Next data payload; `None` on flush (delimiter and response-end also
    /// terminate, for callers that treat any sentinel as a boundary).
    pub fn read_data(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.read_frame()? {
            PktLine::Data(payload) => Ok(Some(payload)),
            _ => Ok(None),
        }
    }

    /// Collect data payloads up to the next flush.
    pub fn read_section(&mut self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let mut lines = Vec::new();
        while let Some(payload) = self.read_data()? {
            lines.push(payload);
        }
        Ok(lines)
    }
}

/// Encodes frames onto a byte stream.
pub struct PktLineWriter<W> {
    inner: W,
}

impl<W: Write> PktLineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Write one data frame.
    pub fn write_data(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if payload.len() > MAX_DATA_LEN {
            return Err(ProtocolError::InvalidPktLine(format!(
                "{} payload bytes exceed the {MAX_DATA_LEN} cap",
                payload.len()
            )));
        }
        tracing::trace!(
            target: "grit::packet",
            "> {}",
            String::from_utf8_lossy(payload).trim_end()
        );
        write!(self.inner, "{:04x}", payload.len() + 4)?;
        self.inner.write_all(payload)?;
        Ok(())
    }

    /// Write a text frame, appending the conventional trailing newline when
    /// missing.
    pub fn write_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        if text.ends_with('\n') {
            self.write_data(text.as_bytes())
        } else {
            let mut line = Vec::with_capacity(text.len() + 1);
            line.extend_from_slice(text.as_bytes());
            line.push(b'\n');
            self.write_data(&line)
        }
    }

    /// Write the flush sentinel.
    pub fn write_flush(&mut self) -> Result<(), ProtocolError> {
        tracing::trace!(target: "grit::packet", "> 0000");
        self.inner.write_all(b"0000")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Strip one trailing newline, the way protocol lines are compared.
pub fn trim_line(payload: &[u8]) -> &[u8] {
    match payload.last() {
        Some(b'\n') => &payload[..payload.len() - 1],
        _ => payload,
    }
}
