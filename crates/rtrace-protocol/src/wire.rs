use std::borrow::Cow;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::command::{Command, CommandId};
use crate::error::ProtocolError;
use crate::instruction::Instruction;
use crate::observation::ResourceId;

/// Stream magic bytes: "RT"
pub const MAGIC: [u8; 2] = [0x52, 0x54];

/// Maximum frame payload size: 256 MB
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// Frame header size in bytes: magic(2) + flags(1) + seq(4) + length(4) = 11
pub const HEADER_SIZE: usize = 11;

/// Payloads at or below this size are stored uncompressed.
const COMPRESSION_THRESHOLD: usize = 512;

bitflags::bitflags! {
    /// Frame flags byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const COMPRESSED  = 0b0000_0001;
        const INSTRUCTION = 0b0000_0010;
        const END         = 0b0000_0100;
    }
}

/// One entry of a capture or replay-program file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum Record {
    /// A captured blob referenced by observations.
    Resource { id: ResourceId, data: Vec<u8> },
    Command { id: CommandId, command: Command },
    Instruction(Instruction),
    End,
}

/// Encode a record into one frame (header + payload), with optional LZ4 compression.
pub fn encode_record(record: &Record, seq: u32) -> Result<Vec<u8>, ProtocolError> {
    let payload = rkyv::to_bytes::<rkyv::rancor::Error>(record)
        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;

    let (final_payload, compression_flag) = if payload.len() > COMPRESSION_THRESHOLD {
        let compressed = lz4_flex::compress_prepend_size(&payload);
        if compressed.len() < payload.len() {
            (Cow::Owned(compressed), FrameFlags::COMPRESSED)
        } else {
            (Cow::Borrowed(payload.as_slice()), FrameFlags::empty())
        }
    } else {
        (Cow::Borrowed(payload.as_slice()), FrameFlags::empty())
    };

    let kind_flags = match record {
        Record::Instruction(_) => FrameFlags::INSTRUCTION,
        Record::End => FrameFlags::END,
        _ => FrameFlags::empty(),
    };

    let flags = compression_flag | kind_flags;
    let payload_len = u32::try_from(final_payload.len())
        .map_err(|_| ProtocolError::FrameTooLarge(u32::MAX))?;
    if payload_len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload_len));
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + final_payload.len());
    frame.extend_from_slice(&MAGIC);
    frame.push(flags.bits());
    frame.extend_from_slice(&seq.to_le_bytes());
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.extend_from_slice(&final_payload);

    Ok(frame)
}

/// Decode a frame header. Returns (flags, seq, payload_length).
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(FrameFlags, u32, u32), ProtocolError> {
    if header[0] != MAGIC[0] || header[1] != MAGIC[1] {
        return Err(ProtocolError::InvalidMagic);
    }

    let flags = FrameFlags::from_bits_truncate(header[2]);
    let seq = u32::from_le_bytes([header[3], header[4], header[5], header[6]]);
    let length = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    Ok((flags, seq, length))
}

/// Decode a record from payload bytes, decompressing if the COMPRESSED flag is set.
pub fn decode_record(payload: &[u8], flags: FrameFlags) -> Result<Record, ProtocolError> {
    let data: Cow<'_, [u8]> = if flags.contains(FrameFlags::COMPRESSED) {
        Cow::Owned(
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| ProtocolError::Decompression(e.to_string()))?,
        )
    } else {
        Cow::Borrowed(payload)
    };
    rkyv::from_bytes::<Record, rkyv::rancor::Error>(&data)
        .map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Writes sequentially numbered frames to a byte sink.
pub struct RecordWriter<W: Write> {
    inner: W,
    seq: u32,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, seq: 0 }
    }

    pub fn write(&mut self, record: &Record) -> Result<(), ProtocolError> {
        let frame = encode_record(record, self.seq)?;
        self.inner.write_all(&frame)?;
        self.seq = self.seq.wrapping_add(1);
        Ok(())
    }

    /// Write the `End` record and flush.
    pub fn finish(mut self) -> Result<W, ProtocolError> {
        self.write(&Record::End)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Reads frames back until the `End` record or end of input.
pub struct RecordReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn next_record(&mut self) -> Result<Option<Record>, ProtocolError> {
        let mut header = [0u8; HEADER_SIZE];
        match self.inner.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let (flags, _seq, length) = decode_header(&header)?;
        let mut payload = vec![0u8; length as usize];
        self.inner.read_exact(&mut payload).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::Truncated {
                expected: length as usize,
                actual: 0,
            },
            _ => ProtocolError::Io(e),
        })?;
        match decode_record(&payload, flags)? {
            Record::End => Ok(None),
            record => Ok(Some(record)),
        }
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
