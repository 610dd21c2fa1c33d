//! Encoding and decoding of shard records.
//!
//! All integers are big-endian. Text is stored as UTF-16 code units, two
//! bytes each, prefixed by the unit count.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{CorruptReason, ShardError};
use crate::record::{DirectoryEntry, FsTag, StatusMap, StatusRecord};

/// Upper bound on any decoded text length (10 MiB of UTF-16).
///
/// A corrupted length prefix must degrade to a corrupt shard, never to an
/// enormous allocation.
pub const MAX_TEXT_UNITS: u32 = 5 * 1024 * 1024;

/// Upper bound on a single record payload.
pub const MAX_PAYLOAD_BYTES: u32 = 64 * 1024 * 1024;

/// `[pathLen:i32][payloadLen:i32]`
pub const RECORD_HEADER_LEN: u64 = 8;

// `[nameLen:i32][status:i32]` with an empty name.
const MIN_CHILD_BYTES: u64 = 8;

/// Length fields of one record, already validated against the limits above.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub path_units: u32,
    pub payload_len: u32,
}

impl RecordHeader {
    pub fn validate(path_units: i32, payload_len: i32) -> Result<Self, CorruptReason> {
        let path_units = non_negative(path_units)?;
        let payload_len = non_negative(payload_len)?;
        if path_units > MAX_TEXT_UNITS {
            return Err(CorruptReason::TextTooLong { units: path_units });
        }
        if payload_len > MAX_PAYLOAD_BYTES {
            return Err(CorruptReason::PayloadTooLarge { bytes: payload_len });
        }
        Ok(Self {
            path_units,
            payload_len,
        })
    }

    /// Bytes following the header: path text plus payload.
    pub fn body_len(&self) -> u64 {
        u64::from(self.path_units) * 2 + u64::from(self.payload_len)
    }

    pub fn record_len(&self) -> u64 {
        RECORD_HEADER_LEN + self.body_len()
    }

    pub(crate) fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_i32::<BigEndian>(self.path_units as i32)?;
        out.write_i32::<BigEndian>(self.payload_len as i32)
    }
}

fn non_negative(value: i32) -> Result<u32, CorruptReason> {
    u32::try_from(value).map_err(|_| CorruptReason::NegativeLength { value })
}

/// Writes one complete record and returns the number of bytes written.
pub fn write_record<W: Write>(
    out: &mut W,
    directory: &str,
    fs_tag: &FsTag,
    children: &StatusMap,
) -> Result<u64, ShardError> {
    let header = RecordHeader {
        path_units: text_units(directory, "directory path")?,
        payload_len: payload_len(fs_tag, children)?,
    };

    header.write_to(out)?;
    write_units(out, directory)?;
    write_payload(out, fs_tag, children)?;

    Ok(header.record_len())
}

pub fn encode_record(
    directory: &str,
    fs_tag: &FsTag,
    children: &StatusMap,
) -> Result<Vec<u8>, ShardError> {
    let mut buf = Vec::new();
    write_record(&mut buf, directory, fs_tag, children)?;
    Ok(buf)
}

/// Encodes only the payload part of a record; its length is the record's
/// `payloadLen` prefix.
pub fn encode_payload(fs_tag: &FsTag, children: &StatusMap) -> Result<Vec<u8>, ShardError> {
    let len = payload_len(fs_tag, children)?;
    let mut buf = Vec::with_capacity(len as usize);
    write_payload(&mut buf, fs_tag, children)?;
    Ok(buf)
}

fn write_payload<W: Write>(
    out: &mut W,
    fs_tag: &FsTag,
    children: &StatusMap,
) -> Result<(), ShardError> {
    write_text(out, fs_tag.as_str())?;
    out.write_i32::<BigEndian>(children.len() as i32)?;
    for (name, record) in children {
        write_text(out, name)?;
        out.write_u32::<BigEndian>(record.pack())?;
    }
    Ok(())
}

fn write_text<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    out.write_i32::<BigEndian>(text.encode_utf16().count() as i32)?;
    write_units(out, text)
}

fn write_units<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    for unit in text.encode_utf16() {
        out.write_u16::<BigEndian>(unit)?;
    }
    Ok(())
}

pub(crate) fn write_raw_units<W: Write>(out: &mut W, units: &[u16]) -> io::Result<()> {
    for &unit in units {
        out.write_u16::<BigEndian>(unit)?;
    }
    Ok(())
}

fn text_units(text: &str, what: &'static str) -> Result<u32, ShardError> {
    let units = text.encode_utf16().count() as u64;
    if units > u64::from(MAX_TEXT_UNITS) {
        return Err(ShardError::TooLarge {
            what,
            len: units,
            limit: u64::from(MAX_TEXT_UNITS),
        });
    }
    Ok(units as u32)
}

fn payload_len(fs_tag: &FsTag, children: &StatusMap) -> Result<u32, ShardError> {
    let mut len = 4 + u64::from(text_units(fs_tag.as_str(), "filesystem tag")?) * 2 + 4;
    for name in children.keys() {
        len += MIN_CHILD_BYTES + u64::from(text_units(name, "file name")?) * 2;
    }
    if len > u64::from(MAX_PAYLOAD_BYTES) {
        return Err(ShardError::TooLarge {
            what: "directory record",
            len,
            limit: u64::from(MAX_PAYLOAD_BYTES),
        });
    }
    Ok(len as u32)
}

/// Decodes a record payload. `base_offset` is the payload's position in the
/// shard file and only affects reported corruption offsets.
pub fn decode_payload(
    bytes: &[u8],
    base_offset: u64,
    shard: &Path,
) -> Result<(FsTag, StatusMap), ShardError> {
    let mut reader = RecordReader::new(Cursor::new(bytes), bytes.len() as u64, shard);
    reader.base = base_offset;

    let fs_tag = FsTag::new(reader.read_text()?);

    let count_at = reader.position;
    let count = reader.read_len()?;
    if u64::from(count) * MIN_CHILD_BYTES > reader.remaining() {
        return Err(reader.corrupt_at(
            count_at,
            CorruptReason::ChildCountTooLarge {
                count,
                remaining: reader.remaining(),
            },
        ));
    }

    let mut children = StatusMap::new();
    for _ in 0..count {
        let name = reader.read_text()?;
        let raw = reader.read_u32()?;
        children.insert(name, StatusRecord::unpack(raw));
    }

    if reader.remaining() != 0 {
        return Err(reader.corrupt_at(
            reader.position,
            CorruptReason::PayloadLengthMismatch {
                declared: bytes.len() as u64,
                consumed: reader.position,
            },
        ));
    }

    Ok((fs_tag, children))
}

/// Decodes every record of an in-memory shard image.
pub fn decode_shard(bytes: &[u8], shard: &Path) -> Result<Vec<DirectoryEntry>, ShardError> {
    let mut reader = RecordReader::new(Cursor::new(bytes), bytes.len() as u64, shard);
    let mut entries = Vec::new();
    while let Some(header) = reader.next_header()? {
        entries.push(reader.read_entry(header)?);
    }
    Ok(entries)
}

/// Sequential reader over shard records that tracks its byte position so
/// corruption can be reported precisely.
///
/// `len` is the number of readable bytes; running past it is corruption
/// rather than an I/O error.
pub(crate) struct RecordReader<R> {
    inner: R,
    position: u64,
    len: u64,
    base: u64,
    shard: PathBuf,
}

impl<R: Read + Seek> RecordReader<R> {
    pub(crate) fn new(inner: R, len: u64, shard: &Path) -> Self {
        Self {
            inner,
            position: 0,
            len,
            base: 0,
            shard: shard.to_path_buf(),
        }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.base + self.position
    }

    fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.position)
    }

    fn corrupt_at(&self, position: u64, reason: CorruptReason) -> ShardError {
        ShardError::Corrupt {
            shard: self.shard.clone(),
            offset: self.base + position,
            reason,
        }
    }

    fn ensure(&self, needed: u64) -> Result<(), ShardError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(self.corrupt_at(
                self.position,
                CorruptReason::UnexpectedEof {
                    needed: needed - remaining,
                },
            ));
        }
        Ok(())
    }

    // The file can still shrink underneath us after `len` was sampled.
    fn map_read_err(&self, err: io::Error, needed: u64) -> ShardError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            self.corrupt_at(self.position, CorruptReason::UnexpectedEof { needed })
        } else {
            ShardError::Io(err)
        }
    }

    fn read_i32(&mut self) -> Result<i32, ShardError> {
        self.ensure(4)?;
        let value = self
            .inner
            .read_i32::<BigEndian>()
            .map_err(|err| self.map_read_err(err, 4))?;
        self.position += 4;
        Ok(value)
    }

    fn read_u32(&mut self) -> Result<u32, ShardError> {
        self.ensure(4)?;
        let value = self
            .inner
            .read_u32::<BigEndian>()
            .map_err(|err| self.map_read_err(err, 4))?;
        self.position += 4;
        Ok(value)
    }

    fn read_len(&mut self) -> Result<u32, ShardError> {
        let at = self.position;
        let value = self.read_i32()?;
        non_negative(value).map_err(|reason| self.corrupt_at(at, reason))
    }

    fn read_text(&mut self) -> Result<String, ShardError> {
        let at = self.position;
        let units = self.read_len()?;
        if units > MAX_TEXT_UNITS {
            return Err(self.corrupt_at(at, CorruptReason::TextTooLong { units }));
        }
        let units = self.read_units(units)?;
        String::from_utf16(&units).map_err(|_| self.corrupt_at(at, CorruptReason::InvalidUtf16))
    }

    /// Returns `None` at a clean record boundary at end of input.
    pub(crate) fn next_header(&mut self) -> Result<Option<RecordHeader>, ShardError> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let at = self.position;
        let path_units = self.read_i32()?;
        let payload_len = self.read_i32()?;
        let header = RecordHeader::validate(path_units, payload_len)
            .map_err(|reason| self.corrupt_at(at, reason))?;
        self.ensure(header.body_len())?;
        Ok(Some(header))
    }

    pub(crate) fn read_units(&mut self, units: u32) -> Result<Vec<u16>, ShardError> {
        let bytes = u64::from(units) * 2;
        self.ensure(bytes)?;
        let mut buf = vec![0u16; units as usize];
        self.inner
            .read_u16_into::<BigEndian>(&mut buf)
            .map_err(|err| self.map_read_err(err, bytes))?;
        self.position += bytes;
        Ok(buf)
    }

    pub(crate) fn read_bytes(&mut self, len: u32) -> Result<Vec<u8>, ShardError> {
        let len64 = u64::from(len);
        self.ensure(len64)?;
        let mut buf = vec![0u8; len as usize];
        self.inner
            .read_exact(&mut buf)
            .map_err(|err| self.map_read_err(err, len64))?;
        self.position += len64;
        Ok(buf)
    }

    pub(crate) fn skip(&mut self, len: u64) -> Result<(), ShardError> {
        self.ensure(len)?;
        self.inner.seek(SeekFrom::Current(len as i64))?;
        self.position += len;
        Ok(())
    }

    /// Copies `len` raw bytes to `out` without interpreting them.
    pub(crate) fn copy_to<W: Write>(&mut self, len: u64, out: &mut W) -> Result<(), ShardError> {
        self.ensure(len)?;
        let copied = io::copy(&mut (&mut self.inner).take(len), out)?;
        if copied < len {
            return Err(self.corrupt_at(
                self.position + copied,
                CorruptReason::UnexpectedEof {
                    needed: len - copied,
                },
            ));
        }
        self.position += len;
        Ok(())
    }

    /// Decodes the body of the record whose header was just read.
    pub(crate) fn read_entry(&mut self, header: RecordHeader) -> Result<DirectoryEntry, ShardError> {
        let path_at = self.position;
        let units = self.read_units(header.path_units)?;
        let directory = String::from_utf16(&units)
            .map_err(|_| self.corrupt_at(path_at, CorruptReason::InvalidUtf16))?;
        let payload_offset = self.offset();
        let payload = self.read_bytes(header.payload_len)?;
        let (fs_tag, children) = decode_payload(&payload, payload_offset, &self.shard)?;
        Ok(DirectoryEntry {
            directory,
            fs_tag,
            children,
        })
    }
}
