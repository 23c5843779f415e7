//! Demuxer cache configuration, read once at open.

use serde::{Deserialize, Serialize};

/// Buffering and cache behavior options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DemuxOptions {
    /// Minimum forward time buffered per eager stream before the read-ahead
    /// thread goes idle, in seconds.
    pub readahead_secs: f64,
    /// Hard cap on forward bytes buffered in the current range.
    pub max_bytes: usize,
    /// Back-buffer byte budget. 0 disables cache-based back seeks.
    pub max_back_bytes: usize,
    /// Overrides `readahead_secs` (if larger) when the source is
    /// network-backed or has an upstream cache.
    pub cache_secs: f64,
    /// Enables in-cache seeking, range joining, and back-buffer retention.
    pub seekable_cache: bool,
    /// Treat sources that report themselves unseekable as
    /// partially-seekable anyway.
    pub force_seekable: bool,
    /// Permit producers to follow external references (playlists, cue
    /// sheets). Carried through to producers; this layer only stores it.
    pub access_references: bool,
    /// Auto-create a closed-caption subtitle track for each video stream.
    pub create_cc_tracks: bool,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self {
            readahead_secs: 1.0,
            max_bytes: 400 * 1024 * 1024,
            max_back_bytes: 0,
            cache_secs: 10.0,
            seekable_cache: false,
            force_seekable: false,
            access_references: true,
            create_cc_tracks: false,
        }
    }
}
