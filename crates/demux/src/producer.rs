//! The producer contract — what a format parser must implement to feed
//! the buffering layer.

use bitflags::bitflags;

use vireo_common::{add_pts, OpenError, Tags};

use crate::append;
use crate::events::{DemuxerInfo, Events};
use crate::packet::Packet;
use crate::state::Shared;
use crate::stream::Stream;

bitflags! {
    /// Seek request modifiers, shared between the consumer API and the
    /// producer contract.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SeekFlags: u32 {
        /// Land at or after the target instead of at or before it.
        const FORWARD = 1 << 0;
        /// The target is a 0..1 position factor, not seconds.
        const FACTOR = 1 << 1;
        /// The caller wants to land as close to the target as possible
        /// (decoders will discard up to the exact position).
        const HR = 1 << 2;
    }
}

/// How aggressively a parser should probe the source during open.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CheckLevel {
    /// Open unconditionally, skipping all content checks.
    Force,
    /// Open if the format is plausible, even on weak evidence.
    Unsafe,
    /// The user requested this parser by name; normal checks apply.
    Request,
    /// Full content checks.
    Normal,
}

impl CheckLevel {
    pub fn name(self) -> &'static str {
        match self {
            CheckLevel::Force => "force",
            CheckLevel::Unsafe => "unsafe",
            CheckLevel::Request => "request",
            CheckLevel::Normal => "normal",
        }
    }
}

/// Out-of-band commands delivered to the producer on its own thread.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum ProducerCommand {
    /// The set of selected tracks changed; `any_selected` tells the
    /// producer whether anything is consuming at all.
    SwitchedTracks { any_selected: bool },
}

/// Byte-source state snapshot, polled off the producer between reads.
#[derive(Clone, Debug, Default)]
pub struct SourceState {
    /// Total source size in bytes, if known.
    pub size: Option<u64>,
    /// Upstream cache state, if the source has one.
    pub cache: Option<CacheInfo>,
    /// Source-level metadata (e.g. ICY titles), if any.
    pub metadata: Option<Tags>,
    /// Display name of the underlying source, if it has one.
    pub base_filename: Option<String>,
}

/// State of an upstream byte cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheInfo {
    /// Cache capacity in bytes.
    pub size: u64,
    /// Bytes currently buffered.
    pub fill: u64,
    /// Whether the cache reader is idle.
    pub idle: bool,
    /// Current fill rate in bytes per second.
    pub speed: u64,
}

/// A format parser feeding packets into the buffering layer.
///
/// All methods are called with the cache lock *dropped*; the context handle
/// re-acquires it per operation. Implementations must not call back into
/// the consumer API.
pub trait Producer: Send {
    /// Probe and open the source. On success the producer has filled in
    /// `ctx.info` (seekability, duration, metadata, ...) and registered its
    /// streams via [`ProducerCtx::add_stream`].
    fn open(&mut self, ctx: &mut ProducerCtx<'_>, check: CheckLevel) -> Result<(), OpenError>;

    /// Read ahead: parse some input and emit zero or more packets through
    /// [`ProducerCtx::add_packet`]. Returns the number of packets emitted;
    /// 0 means end of stream.
    fn fill_buffer(&mut self, ctx: &mut ProducerCtx<'_>) -> usize;

    /// Reposition the parser. `pts` is in seconds unless
    /// [`SeekFlags::FACTOR`] is set.
    fn seek(&mut self, ctx: &mut ProducerCtx<'_>, pts: f64, flags: SeekFlags);

    /// Handle an out-of-band command. The default ignores everything.
    fn control(&mut self, ctx: &mut ProducerCtx<'_>, cmd: ProducerCommand) {
        let _ = (ctx, cmd);
    }

    /// Poll byte-source state (size, cache fill, stream metadata). Called
    /// without any lock held; the results are folded into the cached state.
    fn query_source(&mut self) -> SourceState {
        SourceState::default()
    }

    /// Release parser resources. Called exactly once during teardown.
    fn close(&mut self) {}
}

/// Registry entry for [`open`](crate::open): a named parser and its factory.
#[derive(Clone, Copy)]
pub struct ProducerDesc {
    /// Name used to force a format (`OpenParams::force_format`).
    pub name: &'static str,
    /// Human-readable description for logs.
    pub description: &'static str,
    /// Creates a fresh parser instance for one open attempt.
    pub create: fn() -> Box<dyn Producer>,
}

/// Handle passed to every [`Producer`] callback. Grants access to the
/// producer-side view of the demuxer and to the packet/stream ingestion
/// entry points (each of which briefly takes the cache lock).
pub struct ProducerCtx<'a> {
    pub(crate) shared: &'a Shared,
    /// The producer-side view of demuxer-wide state. Freely mutable from
    /// producer callbacks; visible to the consumer only after
    /// [`changed`](Self::changed) and the consumer's `update()`.
    pub info: &'a mut DemuxerInfo,
}

impl ProducerCtx<'_> {
    /// Register a new elementary stream. Assigns the stream index (and a
    /// per-type `demuxer_id` if the producer left it unset) and returns the
    /// index. Streams live until the demuxer is destroyed.
    pub fn add_stream(&mut self, stream: Stream) -> usize {
        let mut state = self.shared.state.lock();
        let index = state.add_stream_locked(stream);
        self.shared.wakeup.notify_all();
        index
    }

    /// Append one demuxed packet to its stream's queue. Packets arriving
    /// for unselected streams, during a queued seek, or while a refresh
    /// seek is deduplicating are dropped here.
    pub fn add_packet(&mut self, stream: usize, packet: Packet) {
        let mut state = self.shared.state.lock();
        append::add_packet_locked(&mut state, stream, packet);
        self.shared.wakeup.notify_all();
    }

    /// Feed a closed-caption packet extracted from a video stream. The CC
    /// subtitle track is created lazily on first use.
    pub fn feed_caption(&mut self, video_stream: usize, mut packet: Packet) {
        let mut state = self.shared.state.lock();
        let cc = state.cc_track_locked(video_stream);
        let offset = state.ts_offset;
        packet.pts = add_pts(packet.pts, -offset);
        packet.dts = add_pts(packet.dts, -offset);
        append::add_packet_locked(&mut state, cc, packet);
        self.shared.wakeup.notify_all();
    }

    /// Publish changed producer-side fields to the consumer view. `events`
    /// selects which field groups are copied; bits are coalesced until the
    /// consumer calls `update()`.
    pub fn changed(&mut self, events: Events) {
        let mut state = self.shared.state.lock();
        state.buffer_info.copy_from(self.info, events);
        state.buffer_events |= events;
        if let Some(cb) = state.wakeup_cb.clone() {
            cb();
        }
    }

    /// Replace the staged tag bag for one stream. Takes effect on the
    /// consumer's next `update()`.
    pub fn set_stream_tags(&mut self, stream: usize, tags: Tags) {
        if self.info.stream_tags.len() <= stream {
            self.info.stream_tags.resize(stream + 1, None);
        }
        self.info.stream_tags[stream] = Some(tags);
        self.changed(Events::METADATA);
    }

    /// Whether the user asked to abort; producers should check this in
    /// long parse loops and bail out early.
    pub fn cancelled(&self) -> bool {
        self.shared.cancelled()
    }
}
