//! Decode and playback collaborators. The interval container is checked for Ogg pages;
//! samples are not rendered, playback logs each interval and can capture it to disk.

use std::path::PathBuf;

use ninjam_core::{AudioDecodeError, Playback};

const OGG_CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// A received interval that passed the container check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInterval {
    pub bytes: Vec<u8>,
    pub pages: usize,
}

/// Runs on a blocking worker.
pub fn decode_interval(bytes: Vec<u8>) -> Result<DecodedInterval, AudioDecodeError> {
    if !bytes.starts_with(OGG_CAPTURE_PATTERN) {
        return Err(AudioDecodeError(format!(
            "no Ogg page at start of {} byte interval",
            bytes.len()
        )));
    }
    let pages = bytes
        .windows(OGG_CAPTURE_PATTERN.len())
        .filter(|w| *w == OGG_CAPTURE_PATTERN)
        .count();
    Ok(DecodedInterval { bytes, pages })
}

pub struct Capture {
    dir: Option<PathBuf>,
    played: u64,
}

impl Capture {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir, played: 0 }
    }

    pub fn play(&mut self, playback: Playback<DecodedInterval>) {
        self.played += 1;
        tracing::info!(
            "interval {} from {}/{}: {} bytes, {} pages",
            self.played,
            playback.user,
            playback.channel_index,
            playback.audio.bytes.len(),
            playback.audio.pages
        );
        let Some(dir) = &self.dir else {
            return;
        };
        let path = dir.join(capture_file_name(
            &playback.user,
            playback.channel_index,
            self.played,
        ));
        let written = std::fs::create_dir_all(dir)
            .and_then(|_| std::fs::write(&path, &playback.audio.bytes));
        match written {
            Ok(()) => tracing::debug!("captured {}", path.display()),
            Err(e) => tracing::warn!("capture to {} failed: {}", path.display(), e),
        }
    }
}

fn capture_file_name(user: &str, channel_index: u8, seq: u64) -> String {
    let user: String = user
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{seq:06}-{user}-{channel_index}.ogg")
}
