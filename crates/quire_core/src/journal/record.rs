//! Record framing.
//!
//! ```text
//! | tag (1) | txn (8) | data_len (4) | data (N) | back_link (4) | crc32 (4) |
//! ```
//!
//! `back_link` is `13 + N`, the distance from the end of the data back to the
//! start of the record. The checksum covers every byte before it.

use crate::error::{CoreError, CoreResult};
use crate::journal::loggable::{LogType, Loggable};
use crate::types::TransactionId;
use bytes::{Buf, BufMut};

/// Bytes before the payload: tag, transaction id, payload length.
pub const RECORD_HEADER_LEN: usize = 1 + 8 + 4;

/// Bytes after the payload: back link and checksum.
pub const RECORD_TRAILER_LEN: usize = 4 + 4;

/// Largest payload a record can carry.
pub const MAX_PAYLOAD_LEN: usize = u32::MAX as usize - RECORD_HEADER_LEN;

/// Computes the CRC32 checksum of data.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Encodes a loggable as a complete framed record.
///
/// # Errors
///
/// Returns an error if the payload exceeds [`MAX_PAYLOAD_LEN`].
pub fn encode_record(loggable: &Loggable) -> CoreResult<Vec<u8>> {
    let payload_len = loggable.payload_len();
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(CoreError::invalid_argument(format!(
            "record payload of {payload_len} bytes exceeds maximum of {MAX_PAYLOAD_LEN}"
        )));
    }

    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + payload_len + RECORD_TRAILER_LEN);
    buf.put_u8(loggable.log_type().as_byte());
    buf.put_u64_le(loggable.transaction_id().as_u64());
    buf.put_u32_le(payload_len as u32);
    loggable.encode_payload(&mut buf)?;
    debug_assert_eq!(buf.len(), RECORD_HEADER_LEN + payload_len);

    buf.put_u32_le((RECORD_HEADER_LEN + payload_len) as u32);
    let crc = compute_crc32(&buf);
    buf.put_u32_le(crc);
    Ok(buf)
}

/// Parsed fixed-size record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record kind.
    pub log_type: LogType,
    /// Owning transaction.
    pub txn: TransactionId,
    /// Payload length.
    pub data_len: u32,
}

impl RecordHeader {
    /// Parses a header. `offset` is only used for error reporting.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownLogType`] for an unregistered tag.
    pub fn parse(mut bytes: &[u8], offset: u64) -> CoreResult<Self> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(CoreError::journal_corruption("record header too short"));
        }
        let tag = bytes.get_u8();
        let log_type = LogType::from_byte(tag).ok_or(CoreError::UnknownLogType { tag, offset })?;
        let txn = TransactionId::new(bytes.get_u64_le());
        let data_len = bytes.get_u32_le();
        Ok(Self {
            log_type,
            txn,
            data_len,
        })
    }

    /// Total length of the framed record.
    #[must_use]
    pub fn record_len(&self) -> u64 {
        (RECORD_HEADER_LEN + RECORD_TRAILER_LEN) as u64 + u64::from(self.data_len)
    }
}

/// Verifies and decodes a complete framed record.
///
/// # Errors
///
/// Returns a corruption error on a bad back link, checksum or payload.
pub fn decode_record(record: &[u8], offset: u64) -> CoreResult<Loggable> {
    let header = RecordHeader::parse(record, offset)?;
    if record.len() as u64 != header.record_len() {
        return Err(CoreError::journal_corruption(format!(
            "record at offset {offset} has length {}, expected {}",
            record.len(),
            header.record_len()
        )));
    }

    let (body, mut trailer) = record.split_at(record.len() - RECORD_TRAILER_LEN);
    let back_link = trailer.get_u32_le();
    let stored_crc = trailer.get_u32_le();

    let computed_crc = compute_crc32(&record[..record.len() - 4]);
    if stored_crc != computed_crc {
        return Err(CoreError::ChecksumMismatch {
            expected: stored_crc,
            actual: computed_crc,
        });
    }
    if back_link as usize != body.len() {
        return Err(CoreError::journal_corruption(format!(
            "record at offset {offset} has back link {back_link}, expected {}",
            body.len()
        )));
    }

    Loggable::decode_payload(header.log_type, header.txn, &body[RECORD_HEADER_LEN..])
}
