//! The snapshot/events bridge between producer and consumer views.
//!
//! The producer and the consumer never touch each other's mutable state
//! directly. Instead, demuxer-wide fields live in a [`DemuxerInfo`] value
//! held three times: the producer's working copy, a staging copy under the
//! cache lock, and the consumer's copy. Producer-side changes are published
//! with an event mask ([`ProducerCtx::changed`](crate::ProducerCtx::changed)),
//! which copies the affected field groups into the staging view; the
//! consumer's [`Demuxer::update`](crate::Demuxer::update) pulls them the
//! rest of the way. Event bits are coalesced until that pull.

use bitflags::bitflags;

use vireo_common::Tags;

bitflags! {
    /// Which groups of demuxer-wide fields changed.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Events: u32 {
        /// Fields fixed at (re)initialization: format, seekability,
        /// duration, network-ness.
        const INIT = 1 << 0;
        /// Top-level or per-stream metadata changed.
        const METADATA = 1 << 1;
        /// Streams were added.
        const STREAMS = 1 << 2;
    }
}

/// Demuxer-wide state shared between the producer and consumer views.
///
/// The producer fills this in during `open()` and may mutate its copy at
/// any time from its own callbacks; field groups propagate on `changed()`.
#[derive(Clone, Debug, Default)]
pub struct DemuxerInfo {
    /// Detected file format name (for display).
    pub format: String,
    /// Whether the source supports low-level seeking.
    pub seekable: bool,
    /// Seekable, but imprecisely (e.g. forced-seekable sources); in-cache
    /// refresh seeks are disabled for such sources.
    pub partially_seekable: bool,
    /// Start time of the media, if known.
    pub start_time: Option<f64>,
    /// Total duration, if known.
    pub duration: Option<f64>,
    /// Whether the source is network-backed (affects readahead sizing).
    pub is_network: bool,
    /// Whether the source has an upstream byte cache (same effect).
    pub has_cache: bool,
    /// The producer has read the entire source into memory.
    pub fully_read: bool,
    /// Timestamp discontinuities are expected mid-stream.
    pub ts_resets_possible: bool,
    /// Whether producers may follow external references (set from options;
    /// read-only for producers).
    pub access_references: bool,
    /// Top-level metadata.
    pub metadata: Tags,
    /// Staged per-stream tag updates, moved (not copied) downstream.
    pub(crate) stream_tags: Vec<Option<Tags>>,
}

impl DemuxerInfo {
    /// Copy the field groups selected by `events` from `src`. Staged
    /// per-stream tags are transferred by ownership so a bag is applied
    /// exactly once.
    pub(crate) fn copy_from(&mut self, src: &mut DemuxerInfo, events: Events) {
        if events.contains(Events::INIT) {
            self.format = src.format.clone();
            self.seekable = src.seekable;
            self.partially_seekable = src.partially_seekable;
            self.start_time = src.start_time;
            self.duration = src.duration;
            self.is_network = src.is_network;
            self.has_cache = src.has_cache;
            self.fully_read = src.fully_read;
            self.ts_resets_possible = src.ts_resets_possible;
            self.access_references = src.access_references;
        }
        if events.contains(Events::METADATA) {
            self.metadata = src.metadata.clone();
            if self.stream_tags.len() < src.stream_tags.len() {
                self.stream_tags.resize(src.stream_tags.len(), None);
            }
            for (dst, src) in self.stream_tags.iter_mut().zip(src.stream_tags.iter_mut()) {
                if let Some(tags) = src.take() {
                    *dst = Some(tags);
                }
            }
        }
    }
}
