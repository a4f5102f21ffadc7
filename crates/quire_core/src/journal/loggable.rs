//! Loggable kinds and their payload codec.

use crate::error::{CoreError, CoreResult};
use crate::types::{PageNum, TransactionId};
use bytes::{Buf, BufMut};
use quire_storage::PageStore;
use std::fmt;

/// Type tag of a loggable.
///
/// Tag `0` is never assigned: a zero byte where a record should start marks
/// the end of the journal data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogType {
    /// A transaction started.
    TxnStart = 1,
    /// A transaction committed.
    TxnCommit = 2,
    /// A transaction aborted; its effects were compensated before this record.
    TxnAbort = 3,
    /// Recovery need not look at anything before this record.
    Checkpoint = 4,
    /// A page was created.
    CreatePage = 5,
    /// A byte range of a page was replaced.
    UpdatePage = 6,
    /// A page was removed.
    FreePage = 7,
}

impl LogType {
    /// Converts a byte to a log type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::TxnStart),
            2 => Some(Self::TxnCommit),
            3 => Some(Self::TxnAbort),
            4 => Some(Self::Checkpoint),
            5 => Some(Self::CreatePage),
            6 => Some(Self::UpdatePage),
            7 => Some(Self::FreePage),
            _ => None,
        }
    }

    /// Converts the log type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Returns the short upper-case name used in dumps.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TxnStart => "START",
            Self::TxnCommit => "COMMIT",
            Self::TxnAbort => "ABORT",
            Self::Checkpoint => "CHECKPOINT",
            Self::CreatePage => "CREATE_PAGE",
            Self::UpdatePage => "UPDATE_PAGE",
            Self::FreePage => "FREE_PAGE",
        }
    }

    /// Returns true for transaction-boundary kinds, which carry no payload
    /// and have no effect on pages.
    #[must_use]
    pub const fn is_boundary(self) -> bool {
        matches!(
            self,
            Self::TxnStart | Self::TxnCommit | Self::TxnAbort | Self::Checkpoint
        )
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A journal record: one page mutation or transaction-boundary marker.
///
/// Page mutations carry enough state to be replayed (`redo`) and reversed
/// (`undo`). Both operations are idempotent against a store that is already
/// in the target state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loggable {
    /// A transaction started.
    TxnStart {
        /// Transaction ID.
        txn: TransactionId,
    },

    /// A transaction committed.
    TxnCommit {
        /// Transaction ID.
        txn: TransactionId,
    },

    /// A transaction aborted.
    TxnAbort {
        /// Transaction ID.
        txn: TransactionId,
    },

    /// Checkpoint marker.
    Checkpoint {
        /// Transaction that requested the checkpoint (usually reserved).
        txn: TransactionId,
    },

    /// A page was created with initial contents.
    CreatePage {
        /// Transaction ID.
        txn: TransactionId,
        /// The new page.
        page: PageNum,
        /// Initial contents.
        data: Vec<u8>,
    },

    /// The bytes at `offset` were replaced.
    ///
    /// The replaced span is `max(before.len(), after.len())` bytes, so an
    /// update that grows the page is reversed by one that shrinks it back.
    UpdatePage {
        /// Transaction ID.
        txn: TransactionId,
        /// The updated page.
        page: PageNum,
        /// Byte offset of the change.
        offset: u32,
        /// Bytes at `offset` before the change.
        before: Vec<u8>,
        /// Bytes at `offset` after the change.
        after: Vec<u8>,
    },

    /// A page was removed.
    FreePage {
        /// Transaction ID.
        txn: TransactionId,
        /// The removed page.
        page: PageNum,
        /// Contents at the time of removal.
        before: Vec<u8>,
    },
}

impl Loggable {
    /// Returns the log type.
    #[must_use]
    pub fn log_type(&self) -> LogType {
        match self {
            Self::TxnStart { .. } => LogType::TxnStart,
            Self::TxnCommit { .. } => LogType::TxnCommit,
            Self::TxnAbort { .. } => LogType::TxnAbort,
            Self::Checkpoint { .. } => LogType::Checkpoint,
            Self::CreatePage { .. } => LogType::CreatePage,
            Self::UpdatePage { .. } => LogType::UpdatePage,
            Self::FreePage { .. } => LogType::FreePage,
        }
    }

    /// Returns the transaction the record belongs to.
    #[must_use]
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            Self::TxnStart { txn }
            | Self::TxnCommit { txn }
            | Self::TxnAbort { txn }
            | Self::Checkpoint { txn }
            | Self::CreatePage { txn, .. }
            | Self::UpdatePage { txn, .. }
            | Self::FreePage { txn, .. } => *txn,
        }
    }

    /// Returns the page a mutation touches.
    #[must_use]
    pub fn page(&self) -> Option<PageNum> {
        match self {
            Self::CreatePage { page, .. }
            | Self::UpdatePage { page, .. }
            | Self::FreePage { page, .. } => Some(*page),
            _ => None,
        }
    }

    /// Returns true for transaction-boundary records.
    #[must_use]
    pub fn is_boundary(&self) -> bool {
        self.log_type().is_boundary()
    }

    /// Length of the encoded payload in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            Self::TxnStart { .. }
            | Self::TxnCommit { .. }
            | Self::TxnAbort { .. }
            | Self::Checkpoint { .. } => 0,
            Self::CreatePage { data, .. } => 8 + 4 + data.len(),
            Self::UpdatePage { before, after, .. } => 8 + 4 + 4 + before.len() + 4 + after.len(),
            Self::FreePage { before, .. } => 8 + 4 + before.len(),
        }
    }

    /// Writes the kind-specific payload.
    ///
    /// # Errors
    ///
    /// Returns an error if a byte image is too large for its 4-byte length.
    pub fn encode_payload(&self, buf: &mut impl BufMut) -> CoreResult<()> {
        match self {
            Self::TxnStart { .. }
            | Self::TxnCommit { .. }
            | Self::TxnAbort { .. }
            | Self::Checkpoint { .. } => {}

            Self::CreatePage { page, data, .. } => {
                buf.put_u64_le(page.as_u64());
                put_bytes(buf, data)?;
            }

            Self::UpdatePage {
                page,
                offset,
                before,
                after,
                ..
            } => {
                buf.put_u64_le(page.as_u64());
                buf.put_u32_le(*offset);
                put_bytes(buf, before)?;
                put_bytes(buf, after)?;
            }

            Self::FreePage { page, before, .. } => {
                buf.put_u64_le(page.as_u64());
                put_bytes(buf, before)?;
            }
        }
        Ok(())
    }

    /// Decodes a loggable from its type, transaction and payload.
    ///
    /// The payload must be consumed exactly.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::JournalCorruption`] if the payload is short or
    /// has trailing bytes.
    pub fn decode_payload(
        log_type: LogType,
        txn: TransactionId,
        mut payload: &[u8],
    ) -> CoreResult<Self> {
        let loggable = match log_type {
            LogType::TxnStart => Self::TxnStart { txn },
            LogType::TxnCommit => Self::TxnCommit { txn },
            LogType::TxnAbort => Self::TxnAbort { txn },
            LogType::Checkpoint => Self::Checkpoint { txn },

            LogType::CreatePage => {
                let page = get_page(&mut payload)?;
                let data = get_bytes(&mut payload)?;
                Self::CreatePage { txn, page, data }
            }

            LogType::UpdatePage => {
                let page = get_page(&mut payload)?;
                if payload.remaining() < 4 {
                    return Err(short_payload());
                }
                let offset = payload.get_u32_le();
                let before = get_bytes(&mut payload)?;
                let after = get_bytes(&mut payload)?;
                Self::UpdatePage {
                    txn,
                    page,
                    offset,
                    before,
                    after,
                }
            }

            LogType::FreePage => {
                let page = get_page(&mut payload)?;
                let before = get_bytes(&mut payload)?;
                Self::FreePage { txn, page, before }
            }
        };

        if payload.has_remaining() {
            return Err(CoreError::journal_corruption(format!(
                "{} bytes left over after decoding {log_type} record",
                payload.remaining()
            )));
        }
        Ok(loggable)
    }

    /// Replays the forward effect against `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn redo(&self, store: &mut dyn PageStore) -> CoreResult<()> {
        match self {
            Self::CreatePage { page, data, .. } => {
                if store.create_page(*page)? {
                    store.write_at(*page, 0, data)?;
                }
            }
            Self::UpdatePage {
                page,
                offset,
                before,
                after,
                ..
            } => splice(store, *page, *offset, before.len().max(after.len()), after)?,
            Self::FreePage { page, .. } => {
                store.free_page(*page)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Reverses the effect against `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn undo(&self, store: &mut dyn PageStore) -> CoreResult<()> {
        match self {
            Self::CreatePage { page, .. } => {
                store.free_page(*page)?;
            }
            Self::UpdatePage {
                page,
                offset,
                before,
                after,
                ..
            } => splice(store, *page, *offset, before.len().max(after.len()), before)?,
            Self::FreePage { page, before, .. } => {
                store.put_page(*page, before.clone())?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns the compensating record whose redo equals this record's undo.
    ///
    /// Boundary records have no inverse.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        match self {
            Self::CreatePage { txn, page, data } => Some(Self::FreePage {
                txn: *txn,
                page: *page,
                before: data.clone(),
            }),
            Self::UpdatePage {
                txn,
                page,
                offset,
                before,
                after,
            } => Some(Self::UpdatePage {
                txn: *txn,
                page: *page,
                offset: *offset,
                before: after.clone(),
                after: before.clone(),
            }),
            Self::FreePage { txn, page, before } => Some(Self::CreatePage {
                txn: *txn,
                page: *page,
                data: before.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Loggable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.log_type(), self.transaction_id())?;
        match self {
            Self::CreatePage { page, data, .. } => write!(f, " {page} len={}", data.len()),
            Self::UpdatePage {
                page,
                offset,
                before,
                after,
                ..
            } => write!(
                f,
                " {page} offset={offset} before={} after={}",
                before.len(),
                after.len()
            ),
            Self::FreePage { page, before, .. } => write!(f, " {page} len={}", before.len()),
            _ => Ok(()),
        }
    }
}

/// Replaces `span` bytes at `offset` with `bytes`, zero-filling a short page.
fn splice(
    store: &mut dyn PageStore,
    page: PageNum,
    offset: u32,
    span: usize,
    bytes: &[u8],
) -> CoreResult<()> {
    let offset = offset as usize;
    let mut contents = store.read_page(page)?.unwrap_or_default();
    if contents.len() < offset {
        contents.resize(offset, 0);
    }
    let end = (offset + span).min(contents.len());
    let tail = contents.split_off(end);
    contents.truncate(offset);
    contents.extend_from_slice(bytes);
    contents.extend_from_slice(&tail);
    store.put_page(page, contents)?;
    Ok(())
}

fn put_bytes(buf: &mut impl BufMut, bytes: &[u8]) -> CoreResult<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| {
        CoreError::invalid_argument(format!(
            "page image of {} bytes exceeds the record limit",
            bytes.len()
        ))
    })?;
    buf.put_u32_le(len);
    buf.put_slice(bytes);
    Ok(())
}

fn get_page(payload: &mut &[u8]) -> CoreResult<PageNum> {
    if payload.remaining() < 8 {
        return Err(short_payload());
    }
    Ok(PageNum::new(payload.get_u64_le()))
}

fn get_bytes(payload: &mut &[u8]) -> CoreResult<Vec<u8>> {
    if payload.remaining() < 4 {
        return Err(short_payload());
    }
    let len = payload.get_u32_le() as usize;
    if payload.remaining() < len {
        return Err(short_payload());
    }
    let bytes = payload[..len].to_vec();
    payload.advance(len);
    Ok(bytes)
}

fn short_payload() -> CoreError {
    CoreError::journal_corruption("unexpected end of record payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_storage::InMemoryPageStore;

    fn txn(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    fn encode(loggable: &Loggable) -> Vec<u8> {
        let mut buf = Vec::new();
        loggable.encode_payload(&mut buf).unwrap();
        assert_eq!(buf.len(), loggable.payload_len());
        buf
    }

    fn sample_update() -> Loggable {
        Loggable::UpdatePage {
            txn: txn(3),
            page: PageNum::new(9),
            offset: 2,
            before: b"cd".to_vec(),
            after: b"XYZ".to_vec(),
        }
    }

    #[test]
    fn log_type_byte_conversion() {
        for b in 1..=7u8 {
            let log_type = LogType::from_byte(b).unwrap();
            assert_eq!(log_type.as_byte(), b);
        }
        assert_eq!(LogType::from_byte(0), None);
        assert_eq!(LogType::from_byte(8), None);
        assert_eq!(LogType::from_byte(255), None);
    }

    #[test]
    fn boundary_kinds() {
        assert!(Loggable::TxnStart { txn: txn(1) }.is_boundary());
        assert!(Loggable::Checkpoint { txn: txn(0) }.is_boundary());
        assert!(!sample_update().is_boundary());
        assert_eq!(Loggable::TxnCommit { txn: txn(1) }.payload_len(), 0);
    }

    #[test]
    fn update_payload_roundtrip() {
        let loggable = sample_update();
        let payload = encode(&loggable);
        let decoded = Loggable::decode_payload(LogType::UpdatePage, txn(3), &payload).unwrap();
        assert_eq!(decoded, loggable);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut payload = encode(&Loggable::FreePage {
            txn: txn(1),
            page: PageNum::new(1),
            before: b"x".to_vec(),
        });
        payload.push(0);
        let err = Loggable::decode_payload(LogType::FreePage, txn(1), &payload).unwrap_err();
        assert!(matches!(err, CoreError::JournalCorruption { .. }));

        let err = Loggable::decode_payload(LogType::TxnStart, txn(1), &[1]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn decode_rejects_short_payload() {
        let payload = encode(&sample_update());
        let err = Loggable::decode_payload(LogType::UpdatePage, txn(3), &payload[..payload.len() - 1])
            .unwrap_err();
        assert!(matches!(err, CoreError::JournalCorruption { .. }));
    }

    #[test]
    fn create_redo_is_idempotent_and_undo_removes() {
        let mut store = InMemoryPageStore::new();
        let create = Loggable::CreatePage {
            txn: txn(1),
            page: PageNum::new(4),
            data: b"init".to_vec(),
        };

        create.redo(&mut store).unwrap();
        store.put_page(PageNum::new(4), b"later".to_vec()).unwrap();
        create.redo(&mut store).unwrap();
        assert_eq!(store.read_page(PageNum::new(4)).unwrap().unwrap(), b"later");

        create.undo(&mut store).unwrap();
        assert_eq!(store.read_page(PageNum::new(4)).unwrap(), None);
    }

    #[test]
    fn create_redo_persists_through_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pages.dat");
        let mut store = quire_storage::FilePageStore::open(&path).unwrap();

        for (n, data) in [(1, b"".to_vec()), (2, b"body".to_vec())] {
            Loggable::CreatePage {
                txn: txn(1),
                page: PageNum::new(n),
                data,
            }
            .redo(&mut store)
            .unwrap();
        }
        store.sync().unwrap();
        drop(store);

        let store = quire_storage::FilePageStore::open(&path).unwrap();
        assert_eq!(store.read_page(PageNum::new(1)).unwrap(), Some(Vec::new()));
        assert_eq!(store.read_page(PageNum::new(2)).unwrap().unwrap(), b"body");
    }

    #[test]
    fn growing_update_is_reversible() {
        let page = PageNum::new(9);
        let mut store = InMemoryPageStore::with_pages([(page, b"abcd".to_vec())]);
        let update = sample_update();

        update.redo(&mut store).unwrap();
        assert_eq!(store.read_page(page).unwrap().unwrap(), b"abXYZ");
        update.redo(&mut store).unwrap();
        assert_eq!(store.read_page(page).unwrap().unwrap(), b"abXYZ");

        update.undo(&mut store).unwrap();
        assert_eq!(store.read_page(page).unwrap().unwrap(), b"abcd");
        update.undo(&mut store).unwrap();
        assert_eq!(store.read_page(page).unwrap().unwrap(), b"abcd");
    }

    #[test]
    fn inverse_redo_matches_undo() {
        let page = PageNum::new(9);
        let records = [
            Loggable::CreatePage {
                txn: txn(1),
                page,
                data: Vec::new(),
            },
            sample_update(),
            Loggable::FreePage {
                txn: txn(1),
                page,
                before: b"abXYZ".to_vec(),
            },
        ];
        let states: [Option<&[u8]>; 3] = [None, Some(b"abcd"), Some(b"abXYZ")];

        for (record, state) in records.iter().zip(states) {
            let mut by_undo = InMemoryPageStore::with_pages(state.map(|s| (page, s.to_vec())));
            record.redo(&mut by_undo).unwrap();
            let mut by_inverse = InMemoryPageStore::with_pages(by_undo.snapshot());

            record.undo(&mut by_undo).unwrap();
            record.inverse().unwrap().redo(&mut by_inverse).unwrap();
            assert_eq!(by_undo.snapshot(), by_inverse.snapshot(), "{record}");
        }

        assert!(Loggable::TxnAbort { txn: txn(1) }.inverse().is_none());
    }

    #[test]
    fn free_undo_restores_contents() {
        let page = PageNum::new(2);
        let mut store = InMemoryPageStore::with_pages([(page, b"keep".to_vec())]);
        let free = Loggable::FreePage {
            txn: txn(5),
            page,
            before: b"keep".to_vec(),
        };

        free.redo(&mut store).unwrap();
        free.redo(&mut store).unwrap();
        assert_eq!(store.page_count(), 0);

        free.undo(&mut store).unwrap();
        assert_eq!(store.read_page(page).unwrap().unwrap(), b"keep");
    }

    #[test]
    fn display_format() {
        assert_eq!(Loggable::TxnStart { txn: txn(1) }.to_string(), "START T-1");
        assert_eq!(
            sample_update().to_string(),
            "UPDATE_PAGE T-3 page:9 offset=2 before=2 after=3"
        );
    }
}
