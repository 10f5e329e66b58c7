//! Segment file framing.
//!
//! A segment is a flat run of framed records with no file header, so the
//! byte size the writer accumulates is exactly the sum of frame lengths.
//!
//! ```text
//! 0..4    payload length (u32 LE)
//! 4       record kind
//! 5       flags (reserved)
//! 6..8    reserved
//! 8..16   timestamp_ns (u64 LE)
//! 16..20  crc32 of payload
//! 20..24  reserved
//! 24..    payload
//! ```

use std::fs::File;
use std::io::{BufReader, Cursor, ErrorKind, Read, Write};
use std::path::Path;

use crate::record::{Record, RecordKind};
use crate::{Error, Result};

pub const RECORD_HEADER_SIZE: usize = 24;

const LEN_OFFSET: usize = 0;
const KIND_OFFSET: usize = 4;
const FLAGS_OFFSET: usize = 5;
const TIMESTAMP_OFFSET: usize = 8;
const CRC_OFFSET: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub payload_len: u32,
    pub kind: RecordKind,
    pub flags: u8,
    pub timestamp_ns: u64,
    pub checksum: u32,
}

impl RecordHeader {
    pub fn for_record(record: &Record) -> Result<Self> {
        let payload_len = u32::try_from(record.payload.len())
            .map_err(|_| Error::Corrupt("payload too large"))?;
        Ok(Self {
            payload_len,
            kind: record.kind,
            flags: 0,
            timestamp_ns: record.timestamp_ns,
            checksum: crc32(&record.payload),
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        buf[LEN_OFFSET..LEN_OFFSET + 4].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[KIND_OFFSET] = self.kind as u8;
        buf[FLAGS_OFFSET] = self.flags;
        buf[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]
            .copy_from_slice(&self.timestamp_ns.to_le_bytes());
        buf[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; RECORD_HEADER_SIZE]) -> Result<Self> {
        let payload_len = u32::from_le_bytes(
            bytes[LEN_OFFSET..LEN_OFFSET + 4]
                .try_into()
                .expect("slice length"),
        );
        let kind = RecordKind::try_from(bytes[KIND_OFFSET])?;
        let timestamp_ns = u64::from_le_bytes(
            bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8]
                .try_into()
                .expect("slice length"),
        );
        let checksum = u32::from_le_bytes(
            bytes[CRC_OFFSET..CRC_OFFSET + 4]
                .try_into()
                .expect("slice length"),
        );
        Ok(Self {
            payload_len,
            kind,
            flags: bytes[FLAGS_OFFSET],
            timestamp_ns,
            checksum,
        })
    }
}

pub fn crc32(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Encoded size of `record` on disk.
pub fn encoded_len(record: &Record) -> u64 {
    (RECORD_HEADER_SIZE + record.payload.len()) as u64
}

/// Writes one framed record, returning the number of bytes written.
pub fn write_record<W: Write>(out: &mut W, record: &Record) -> Result<u64> {
    let header = RecordHeader::for_record(record)?;
    out.write_all(&header.to_bytes())?;
    out.write_all(&record.payload)?;
    Ok(encoded_len(record))
}

pub fn encode_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for record in records {
        write_record(&mut buf, record)?;
    }
    Ok(buf)
}

/// Sequential decoder over one segment.
pub struct SegmentReader<R> {
    inner: R,
    records_read: u64,
}

impl SegmentReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl SegmentReader<Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read> SegmentReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            records_read: 0,
        }
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Returns the next record, or `None` at a clean end of segment.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let mut header_buf = [0u8; RECORD_HEADER_SIZE];
        match read_full(&mut self.inner, &mut header_buf)? {
            0 => return Ok(None),
            RECORD_HEADER_SIZE => {}
            _ => return Err(Error::Corrupt("truncated record header")),
        }
        let header = RecordHeader::from_bytes(&header_buf)?;

        let mut payload = vec![0u8; header.payload_len as usize];
        if read_full(&mut self.inner, &mut payload)? != payload.len() {
            return Err(Error::Corrupt("truncated record payload"));
        }
        if crc32(&payload) != header.checksum {
            return Err(Error::Corrupt("record checksum mismatch"));
        }

        self.records_read += 1;
        Ok(Some(Record {
            timestamp_ns: header.timestamp_ns,
            kind: header.kind,
            payload,
        }))
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}
