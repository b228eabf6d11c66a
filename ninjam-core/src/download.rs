//! Download manager: in-flight interval downloads keyed by GUID, chunks appended in
//! arrival order and concatenated when the final chunk arrives.

use std::collections::HashMap;

use crate::protocol::{FourCc, Guid, FOURCC_OGG_VORBIS};

/// One interval being received.
#[derive(Debug)]
pub struct IntervalDownload {
    pub username: String,
    pub channel_index: u8,
    pub fourcc: FourCc,
    chunks: Vec<Vec<u8>>,
}

impl IntervalDownload {
    fn new(username: String, channel_index: u8, fourcc: FourCc) -> Self {
        Self {
            username,
            channel_index,
            fourcc,
            chunks: Vec::new(),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

/// Concatenate chunks in arrival order.
fn concat_chunks(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunks.iter().map(Vec::len).sum());
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

/// Completed interval: who it belongs to and the assembled container bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedDownload {
    pub guid: Guid,
    pub username: String,
    pub channel_index: u8,
    pub bytes: Vec<u8>,
}

/// Result of `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    Started,
    /// A download with this GUID is already live; it was left untouched.
    Duplicate,
    /// Container is not one we accept; nothing was stored.
    UnsupportedFourCc(FourCc),
}

#[derive(Debug, Default)]
pub struct DownloadManager {
    intervals: HashMap<Guid, IntervalDownload>,
}

impl DownloadManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(
        &mut self,
        guid: Guid,
        username: &str,
        channel_index: u8,
        fourcc: FourCc,
    ) -> BeginOutcome {
        if self.intervals.contains_key(&guid) {
            return BeginOutcome::Duplicate;
        }
        if fourcc != FOURCC_OGG_VORBIS {
            return BeginOutcome::UnsupportedFourCc(fourcc);
        }
        self.intervals.insert(
            guid,
            IntervalDownload::new(username.to_string(), channel_index, fourcc),
        );
        BeginOutcome::Started
    }

    /// Append a chunk. Returns false (and drops the chunk) if the GUID is not live.
    pub fn append_chunk(&mut self, guid: &Guid, chunk: Vec<u8>) -> bool {
        match self.intervals.get_mut(guid) {
            Some(download) => {
                download.chunks.push(chunk);
                true
            }
            None => false,
        }
    }

    /// Remove the download and return its concatenated bytes.
    pub fn finish(&mut self, guid: &Guid) -> Option<FinishedDownload> {
        let download = self.intervals.remove(guid)?;
        let bytes = concat_chunks(&download.chunks);
        Some(FinishedDownload {
            guid: *guid,
            username: download.username,
            channel_index: download.channel_index,
            bytes,
        })
    }

    /// Drop every in-flight download owned by `username`. Returns how many were dropped.
    pub fn drop_all_for_user(&mut self, username: &str) -> usize {
        let before = self.intervals.len();
        self.intervals.retain(|_, d| d.username != username);
        before - self.intervals.len()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    pub fn contains(&self, guid: &Guid) -> bool {
        self.intervals.contains_key(guid)
    }

    pub fn get(&self, guid: &Guid) -> Option<&IntervalDownload> {
        self.intervals.get(guid)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_guid() -> Guid {
        Guid(rand::random())
    }

    #[test]
    fn finish_concatenates_in_order() {
        let mut m = DownloadManager::new();
        let guid = random_guid();
        assert_eq!(
            m.begin(guid, "alice@x", 0, FOURCC_OGG_VORBIS),
            BeginOutcome::Started
        );
        assert!(m.append_chunk(&guid, b"AB".to_vec()));
        assert!(m.append_chunk(&guid, b"CD".to_vec()));
        assert!(m.append_chunk(&guid, b"EF".to_vec()));
        let done = m.finish(&guid).unwrap();
        assert_eq!(done.bytes, b"ABCDEF");
        assert_eq!(done.username, "alice@x");
        assert!(!m.contains(&guid));
        assert!(m.finish(&guid).is_none());
    }

    #[test]
    fn duplicate_begin_keeps_original() {
        let mut m = DownloadManager::new();
        let guid = random_guid();
        m.begin(guid, "alice@x", 0, FOURCC_OGG_VORBIS);
        m.append_chunk(&guid, b"AB".to_vec());
        assert_eq!(
            m.begin(guid, "bob@y", 3, FOURCC_OGG_VORBIS),
            BeginOutcome::Duplicate
        );
        let d = m.get(&guid).unwrap();
        assert_eq!(d.username, "alice@x");
        assert_eq!(d.chunk_count(), 1);
        assert_eq!(d.byte_len(), 2);
    }

    #[test]
    fn non_ogg_fourcc_is_rejected() {
        let mut m = DownloadManager::new();
        let guid = random_guid();
        let wave = FourCc(*b"WAVE");
        assert_eq!(
            m.begin(guid, "alice@x", 0, wave),
            BeginOutcome::UnsupportedFourCc(wave)
        );
        assert!(!m.contains(&guid));
        assert!(!m.append_chunk(&guid, b"AB".to_vec()));
    }

    #[test]
    fn drop_all_for_user_only_touches_that_user() {
        let mut m = DownloadManager::new();
        let (a1, a2, b1) = (random_guid(), random_guid(), random_guid());
        m.begin(a1, "alice@x", 0, FOURCC_OGG_VORBIS);
        m.begin(a2, "alice@x", 1, FOURCC_OGG_VORBIS);
        m.begin(b1, "bob@y", 0, FOURCC_OGG_VORBIS);
        assert_eq!(m.drop_all_for_user("alice@x"), 2);
        assert!(!m.append_chunk(&a1, vec![1]));
        assert!(!m.append_chunk(&a2, vec![1]));
        assert!(m.append_chunk(&b1, vec![1]));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn clear_empties() {
        let mut m = DownloadManager::new();
        m.begin(random_guid(), "alice@x", 0, FOURCC_OGG_VORBIS);
        m.clear();
        assert!(m.is_empty());
    }
}
