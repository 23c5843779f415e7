//! Shared demuxer state: the lock-protected core every component mutates.
//!
//! One mutex ([`Shared::state`]) plus one condition variable protect all
//! queues, ranges, selection flags, and pending commands; a second mutex
//! holds the producer so its blocking I/O runs with the state lock
//! dropped. The state lock is never acquired while holding the producer
//! lock's critical section the other way around — producer callbacks
//! re-enter through [`ProducerCtx`](crate::ProducerCtx), which takes the
//! state lock per operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::debug;
use vireo_common::{pts_min, StreamType, Tags};

use crate::events::{DemuxerInfo, Events};
use crate::opts::DemuxOptions;
use crate::producer::{CacheInfo, Producer, SeekFlags, SourceState};
use crate::range::CachedRange;
use crate::stream::Stream;

/// The producer and its working view, behind their own lock so parser I/O
/// never blocks cache access.
pub(crate) struct ProducerSlot {
    pub producer: Box<dyn Producer>,
    pub info: DemuxerInfo,
}

/// A closure queued to run on the demux thread with the producer lock held
/// and the state lock dropped.
pub(crate) type RunFn = Box<dyn FnOnce(&mut ProducerSlot) + Send>;

pub(crate) type WakeupCb = Arc<dyn Fn() + Send + Sync>;

/// Everything shared between the consumer handle, the demux thread, and
/// producer callbacks.
pub(crate) struct Shared {
    pub state: Mutex<Inner>,
    pub wakeup: Condvar,
    pub producer: Mutex<ProducerSlot>,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Shared {
    pub fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// Per-stream demuxing and reader state.
#[derive(Debug)]
pub(crate) struct StreamState {
    pub stream_type: StreamType,
    /// Copied from the descriptor for quick access under the lock.
    pub has_attached_picture: bool,

    /// The consumer wants packets from this stream.
    pub selected: bool,
    /// Participates in read-ahead pacing and EOF. False for unselected
    /// streams, attached pictures, and (usually) subtitles.
    pub eager: bool,
    /// Enabled mid-stream; a refresh seek is pending.
    pub need_refresh: bool,
    /// A refresh seek rewound the producer; drop packets until we pass the
    /// previously seen position.
    pub refreshing: bool,

    /// Monotonicity observed across the whole session (not just the
    /// current queue); required for refresh seeks and range joins.
    pub global_correct_dts: bool,
    pub global_correct_pos: bool,

    /// Timestamp of the last packet returned to the consumer.
    pub base_ts: Option<f64>,
    /// Bitrate window state (keyframe-aligned, packet-timestamp driven).
    pub last_br_ts: Option<f64>,
    pub last_br_bytes: usize,
    pub bitrate: Option<f64>,

    /// Forward buffer accounting (reader position to tail, current range).
    pub fw_packs: usize,
    pub fw_bytes: usize,

    /// No more packets coming (producer EOF or byte-cap back-pressure).
    pub eof: bool,
    /// Consumer read position in the current range's queue.
    pub reader_head: Option<u64>,
    /// After an in-cache seek landed on nothing: wait for the next
    /// keyframe before resuming reads.
    pub skip_to_keyframe: bool,
    /// The single-shot attached picture was already emitted.
    pub attached_picture_added: bool,

    /// Lazily created closed-caption track fed from this video stream.
    pub cc_track: Option<usize>,
    /// Exclude this stream from EOF/underrun bookkeeping (CC tracks).
    pub ignore_eof: bool,
}

impl StreamState {
    fn new(stream_type: StreamType, has_attached_picture: bool) -> Self {
        Self {
            stream_type,
            has_attached_picture,
            selected: false,
            eager: false,
            need_refresh: false,
            refreshing: false,
            global_correct_dts: true,
            global_correct_pos: true,
            base_ts: None,
            last_br_ts: None,
            last_br_bytes: 0,
            bitrate: None,
            fw_packs: 0,
            fw_bytes: 0,
            eof: false,
            reader_head: None,
            skip_to_keyframe: false,
            attached_picture_added: false,
            cc_track: None,
            ignore_eof: false,
        }
    }
}

/// The lock-protected core.
pub(crate) struct Inner {
    pub opts: DemuxOptions,
    /// Effective readahead target; `opts.readahead_secs`, possibly boosted
    /// to `opts.cache_secs` for network/cached sources.
    pub readahead_secs: f64,

    pub streams: Vec<Arc<Stream>>,
    pub states: Vec<StreamState>,
    /// Consumer-visible per-stream tags (initial descriptor tags, then
    /// whatever the events bridge delivered).
    pub current_tags: Vec<Tags>,

    /// Cached ranges ordered least-recently-used first. Never empty; the
    /// last entry is the current range, the only one being appended to.
    pub ranges: Vec<CachedRange>,
    /// Total estimated bytes of all packets in all ranges.
    pub total_bytes: usize,
    /// Bytes from each selected stream's reader position forward, current
    /// range only.
    pub fw_bytes: usize,

    pub seekable: bool,
    pub partially_seekable: bool,

    /// Layer-generated events (STREAMS) pending for the consumer.
    pub events: Events,
    /// Producer-published events pending for the consumer.
    pub buffer_events: Events,
    /// Staging copy of the demuxer-wide fields (the "buffer" view).
    pub buffer_info: DemuxerInfo,

    pub threading: bool,
    pub thread_terminate: bool,
    /// A consumer actually requested data since init or the last seek.
    pub reading: bool,
    /// EOF state; reset to retry on the next read request.
    pub eof: bool,
    /// Last actual global EOF status (edge detection for wakeups).
    pub last_eof: bool,
    pub idle: bool,
    /// Still at the very start of the file; allows skipping the initial
    /// refresh seek when streams are enabled before playback begins.
    pub initial_state: bool,
    pub autoselect: bool,
    pub warned_queue_overflow: bool,

    /// The thread must inform the producer about a selection change.
    pub tracks_switched: bool,

    /// A low-level seek is queued.
    pub seeking: bool,
    pub seek_flags: SeekFlags,
    pub seek_pts: f64,

    /// Assumed player position, for refresh seeks on track switches.
    pub ref_pts: Option<f64>,
    /// Offset applied to all timestamps leaving the demuxer.
    pub ts_offset: f64,
    /// High-water mark of dequeued packet positions.
    pub filepos: Option<u64>,

    /// Closure queued to run on the demux thread (blocking controls).
    pub run_fn: Option<RunFn>,
    pub force_cache_update: bool,

    pub wakeup_cb: Option<WakeupCb>,

    /// Cached byte-source state from the last `query_source` fold.
    pub source_size: Option<u64>,
    pub source_cache: Option<CacheInfo>,
    pub source_metadata: Option<Tags>,
    pub base_filename: Option<String>,
}

impl Inner {
    pub fn new(opts: DemuxOptions) -> Self {
        let readahead_secs = opts.readahead_secs;
        Self {
            opts,
            readahead_secs,
            streams: Vec::new(),
            states: Vec::new(),
            current_tags: Vec::new(),
            ranges: vec![CachedRange::new(0)],
            total_bytes: 0,
            fw_bytes: 0,
            seekable: false,
            partially_seekable: false,
            events: Events::empty(),
            buffer_events: Events::empty(),
            buffer_info: DemuxerInfo::default(),
            threading: false,
            thread_terminate: false,
            reading: false,
            eof: false,
            last_eof: false,
            idle: false,
            initial_state: true,
            autoselect: false,
            warned_queue_overflow: false,
            tracks_switched: false,
            seeking: false,
            seek_flags: SeekFlags::empty(),
            seek_pts: 0.0,
            ref_pts: None,
            ts_offset: 0.0,
            filepos: None,
            run_fn: None,
            force_cache_update: false,
            wakeup_cb: None,
            source_size: None,
            source_cache: None,
            source_metadata: None,
            base_filename: None,
        }
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn current_range(&self) -> usize {
        self.ranges.len() - 1
    }

    /// Register a stream: assign its index (and per-type `demuxer_id` if
    /// unset), grow every range, and apply autoselection.
    pub fn add_stream_locked(&mut self, mut stream: Stream) -> usize {
        let index = self.streams.len();
        stream.index = index;
        if stream.demuxer_id.is_none() {
            let id = self
                .streams
                .iter()
                .filter(|s| s.stream_type == stream.stream_type)
                .count() as i64;
            stream.demuxer_id = Some(id);
        }

        self.states.push(StreamState::new(
            stream.stream_type,
            stream.attached_picture.is_some(),
        ));
        self.current_tags.push(stream.tags.clone());
        self.streams.push(Arc::new(stream));

        let num = self.streams.len();
        for range in &mut self.ranges {
            range.add_missing_streams(num);
        }

        let autoselect = self.autoselect;
        self.update_stream_selection_state(index, autoselect, true);

        self.events |= Events::STREAMS;
        if let Some(cb) = self.wakeup_cb.clone() {
            cb();
        }
        index
    }

    /// Get or lazily create the closed-caption track fed from a video
    /// stream.
    pub fn cc_track_locked(&mut self, video_stream: usize) -> usize {
        if let Some(cc) = self.states[video_stream].cc_track {
            return cc;
        }
        let mut sh = Stream::new(StreamType::Subtitle);
        sh.codec.codec = "eia_608".to_string();
        sh.default_track = true;
        let cc = self.add_stream_locked(sh);
        self.states[cc].ignore_eof = true;
        self.states[video_stream].cc_track = Some(cc);
        cc
    }

    /// Reset one stream's reader-side state (position, EOF, bitrate) and
    /// remove its forward-buffer contribution.
    pub fn clear_reader_state_one(&mut self, idx: usize) {
        let ds = &mut self.states[idx];
        self.fw_bytes -= ds.fw_bytes;
        ds.reader_head = None;
        ds.eof = false;
        ds.base_ts = None;
        ds.last_br_ts = None;
        ds.last_br_bytes = 0;
        ds.bitrate = None;
        ds.skip_to_keyframe = false;
        ds.attached_picture_added = false;
        ds.fw_bytes = 0;
        ds.fw_packs = 0;
    }

    /// Reset all reader state (before seeks and on flush).
    pub fn clear_reader_state_all(&mut self) {
        for n in 0..self.states.len() {
            self.clear_reader_state_one(n);
        }
        self.warned_queue_overflow = false;
        self.filepos = None;
        debug_assert_eq!(self.fw_bytes, 0);
    }

    /// Flip a stream's selection and rebuild derived state. `is_new` forces
    /// the reset path for freshly registered streams.
    ///
    /// Deselecting drops the stream's cached data in every range (it can't
    /// be kept consistent); either way the range seek windows are
    /// recomputed and emptied ranges are dropped.
    pub fn update_stream_selection_state(&mut self, idx: usize, selected: bool, is_new: bool) {
        if self.states[idx].selected != selected || is_new {
            {
                let ds = &mut self.states[idx];
                ds.selected = selected;
                ds.eof = false;
                ds.refreshing = false;
                ds.need_refresh = false;
            }
            self.clear_reader_state_one(idx);

            for r in 0..self.ranges.len() {
                if !selected {
                    let freed = self.ranges[r].streams[idx].reset();
                    self.total_bytes -= freed;
                }
                let states = &self.states;
                self.ranges[r].update_seek_ranges(|n| states[n].selected);
            }
            self.free_empty_cached_ranges();
        }

        // Eagerness depends on the whole selection set: subtitles are only
        // read eagerly when nothing else is.
        let mut any_av_streams = false;
        for s in self.states.iter_mut() {
            s.eager = s.selected && !s.has_attached_picture;
            if s.eager {
                any_av_streams |= s.stream_type != StreamType::Subtitle;
            }
        }
        if any_av_streams {
            for s in self.states.iter_mut() {
                if s.stream_type == StreamType::Subtitle {
                    s.eager = false;
                }
            }
        }
    }

    /// Promote a range to the LRU tail, making it the current range.
    pub fn set_current_range(&mut self, idx: usize) {
        let range = self.ranges.remove(idx);
        self.ranges.push(range);
    }

    /// Drop non-current ranges whose seek window collapsed.
    pub fn free_empty_cached_ranges(&mut self) {
        debug_assert!(!self.ranges.is_empty());
        for n in (0..self.ranges.len().saturating_sub(1)).rev() {
            if self.ranges[n].seek_start.is_none() {
                let freed = self.ranges[n].clear();
                self.total_bytes -= freed;
                self.ranges.remove(n);
            }
        }
    }

    /// Compute the refresh-seek target after a mid-playback selection
    /// change, per the track-switch protocol:
    ///
    /// - no stream needs a refresh (or seeking is impossible): `None`;
    /// - only newly enabled streams are selected: a plain seek to the
    ///   reference position;
    /// - otherwise, rewind to slightly before the earliest playing
    ///   position and mark the already-playing streams `refreshing` so
    ///   their duplicate packets get dropped on arrival.
    pub fn get_refresh_seek_pts(&mut self) -> Option<f64> {
        let mut start_ts = self.ref_pts;
        let mut needed = false;
        let mut normal_seek = true;
        let mut refresh_possible = true;

        let cur = self.current_range();
        for n in 0..self.states.len() {
            if !self.states[n].selected {
                continue;
            }
            if matches!(
                self.states[n].stream_type,
                StreamType::Video | StreamType::Audio
            ) {
                start_ts = pts_min(start_ts, self.states[n].base_ts);
            }
            needed |= self.states[n].need_refresh;
            normal_seek &= self.states[n].need_refresh;
            self.states[n].need_refresh = false;

            let queue = &self.ranges[cur].streams[n];
            refresh_possible &= queue.correct_dts || queue.correct_pos;
        }

        if !needed || self.partially_seekable || !self.seekable {
            return None;
        }
        let start_ts = start_ts?;

        if normal_seek {
            return Some(start_ts);
        }

        if !refresh_possible {
            debug!("can't issue refresh seek");
            return None;
        }

        for n in 0..self.states.len() {
            let queue = &self.ranges[cur].streams[n];
            // Streams that never produced a packet will simply deliver
            // everything from the seek target; the rest resume where they
            // left off.
            if queue.last_pos.is_some() || queue.last_dts.is_some() {
                let selected = self.states[n].selected;
                self.states[n].refreshing |= selected;
            }
        }

        Some(start_ts - 1.0)
    }

    /// Fold a byte-source snapshot into the cached state. Metadata changes
    /// raise a METADATA event for the consumer.
    pub fn fold_source_state(&mut self, state: SourceState) {
        if state.size.is_some() {
            self.source_size = state.size;
        }
        if state.cache.is_some() {
            self.source_cache = state.cache;
        }
        if state.base_filename.is_some() {
            self.base_filename = state.base_filename;
        }
        if let Some(metadata) = state.metadata {
            if self.source_metadata.as_ref() != Some(&metadata) {
                self.source_metadata = Some(metadata);
                self.buffer_events |= Events::METADATA;
            }
        }
    }

    /// Expensive cross-check of all cached-state invariants; compiled into
    /// debug builds and driven from the ends of public operations.
    #[cfg(debug_assertions)]
    pub fn check_consistency(&self) {
        assert!(!self.ranges.is_empty());
        let cur = self.current_range();
        let mut total_bytes = 0usize;
        let mut total_fw_bytes = 0usize;

        for (ri, range) in self.ranges.iter().enumerate() {
            assert_eq!(range.streams.len(), self.streams.len());
            if let (Some(start), Some(end)) = (range.seek_start, range.seek_end) {
                assert!(start <= end);
            }

            for (si, queue) in range.streams.iter().enumerate() {
                let ds = &self.states[si];
                let mut fw_bytes = 0usize;
                let mut fw_packs = 0usize;
                let mut is_forward = false;
                let mut kf_found = false;
                let mut npt_found = false;

                for (seq, p) in queue.iter() {
                    if ri == cur && ds.reader_head == Some(seq) {
                        is_forward = true;
                    }
                    kf_found |= queue.keyframe_latest == Some(seq);
                    npt_found |= queue.next_prune_target == Some(seq);

                    let bytes = p.estimate_size();
                    total_bytes += bytes;
                    if is_forward {
                        fw_bytes += bytes;
                        fw_packs += 1;
                    }
                }

                if ri == cur {
                    assert_eq!(is_forward, ds.reader_head.is_some());
                    assert_eq!(ds.fw_bytes, fw_bytes);
                    assert_eq!(ds.fw_packs, fw_packs);
                    total_fw_bytes += fw_bytes;
                } else {
                    assert!(!is_forward);
                }

                if let Some(kl) = queue.keyframe_latest {
                    assert!(kf_found);
                    assert!(queue.get(kl).expect("stale keyframe_latest").keyframe);
                }
                assert_eq!(npt_found, queue.next_prune_target.is_some());
            }
        }

        assert_eq!(self.total_bytes, total_bytes);
        assert_eq!(self.fw_bytes, total_fw_bytes);
    }

    #[cfg(not(debug_assertions))]
    #[inline]
    pub fn check_consistency(&self) {}
}
