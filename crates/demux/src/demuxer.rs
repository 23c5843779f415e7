//! The public demuxer handle: opening, thread control, and the consumer
//! API.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use vireo_common::{add_pts, pts_max, OpenError, SeekError, StreamType, Tags};

use crate::events::{DemuxerInfo, Events};
use crate::opts::DemuxOptions;
use crate::packet::Packet;
use crate::producer::{CacheInfo, CheckLevel, ProducerCtx, ProducerDesc, SeekFlags};
use crate::reader::{self, ReadStatus};
use crate::seek;
use crate::state::{Inner, ProducerSlot, Shared, WakeupCb};
use crate::stream::Stream;
use crate::thread;

/// Cap on the number of cached ranges reported by [`Demuxer::reader_state`].
const MAX_SEEK_RANGES: usize = 16;

/// Parameters for [`open`] beyond the cache options.
#[derive(Clone, Default)]
pub struct OpenParams {
    /// Try only the named parser. A `"+"` prefix skips content checks
    /// entirely (open at [`CheckLevel::Force`]).
    pub force_format: Option<String>,
    /// Select every stream as it is registered (single-threaded setups).
    pub autoselect: bool,
    /// Cooperative cancellation probe, checked before blocking producer
    /// I/O.
    pub cancel: Option<Arc<std::sync::atomic::AtomicBool>>,
}

/// Aggregate reader state for the player frontend.
#[derive(Clone, Debug, Default)]
pub struct ReaderState {
    /// Global EOF was reached.
    pub eof: bool,
    /// An eager stream has no data and is not at EOF.
    pub underrun: bool,
    /// The read-ahead loop has nothing to do.
    pub idle: bool,
    /// Newest timestamp returned to any consumer.
    pub ts_reader: Option<f64>,
    /// Newest timestamp buffered on any eager stream.
    pub ts_end: Option<f64>,
    /// Buffered duration ahead of the reader.
    pub ts_duration: Option<f64>,
    /// Estimated bytes buffered ahead of the readers (current range).
    pub fw_bytes: usize,
    /// Estimated bytes buffered in total, back-buffer included.
    pub total_bytes: usize,
    /// Seekable cached ranges, `(start, end)` with the timestamp offset
    /// applied.
    pub seek_ranges: Vec<(f64, f64)>,
}

/// Per-type bitrate sums over selected streams, bytes per second.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BitrateStats {
    pub video: Option<f64>,
    pub audio: Option<f64>,
    pub subtitle: Option<f64>,
}

/// Try every registered parser against the source until one accepts it.
///
/// Parsers are tried in registry order, first at [`CheckLevel::Normal`],
/// then at [`CheckLevel::Unsafe`]. Forcing a format by name switches to a
/// single [`CheckLevel::Request`] (or [`CheckLevel::Force`] with a `"+"`
/// prefix) pass over just that parser.
pub fn open(
    registry: &[ProducerDesc],
    opts: DemuxOptions,
    params: OpenParams,
) -> Result<Demuxer, OpenError> {
    let mut check_levels: &[CheckLevel] = &[CheckLevel::Normal, CheckLevel::Unsafe];
    let mut forced: Option<&str> = None;
    if let Some(name) = params.force_format.as_deref() {
        if let Some(stripped) = name.strip_prefix('+') {
            forced = Some(stripped);
            check_levels = &[CheckLevel::Force];
        } else {
            forced = Some(name);
            check_levels = &[CheckLevel::Request];
        }
        let forced_name = forced.expect("just set");
        if !registry.iter().any(|d| d.name == forced_name) {
            return Err(OpenError::UnknownFormat(forced_name.to_string()));
        }
    }

    for &level in check_levels {
        debug!(level = level.name(), "trying parsers");
        for desc in registry {
            if forced.is_some_and(|f| f != desc.name) {
                continue;
            }
            if params
                .cancel
                .as_ref()
                .is_some_and(|c| c.load(Ordering::Relaxed))
            {
                return Err(OpenError::Cancelled);
            }
            match open_instance((desc.create)(), desc.name, desc.description, &opts, &params, level)
            {
                Ok(demuxer) => return Ok(demuxer),
                Err(err) => debug!(parser = desc.name, %err, "parser rejected source"),
            }
        }
    }

    Err(OpenError::Unrecognized)
}

/// Open with an externally constructed parser instance, skipping the
/// registry and content checks. For callers that already know the format
/// (timeline resolvers, tests).
pub fn open_with(
    producer: Box<dyn crate::producer::Producer>,
    opts: DemuxOptions,
    params: OpenParams,
) -> Result<Demuxer, OpenError> {
    open_instance(
        producer,
        "external",
        "externally supplied parser",
        &opts,
        &params,
        CheckLevel::Force,
    )
}

fn open_instance(
    producer: Box<dyn crate::producer::Producer>,
    name: &str,
    description: &str,
    opts: &DemuxOptions,
    params: &OpenParams,
    level: CheckLevel,
) -> Result<Demuxer, OpenError> {
    debug!(parser = name, level = level.name(), "trying parser");

    let mut inner = Inner::new(opts.clone());
    inner.autoselect = params.autoselect;
    let shared = Arc::new(Shared {
        state: Mutex::new(inner),
        wakeup: Condvar::new(),
        producer: Mutex::new(ProducerSlot {
            producer,
            info: DemuxerInfo {
                access_references: opts.access_references,
                ..Default::default()
            },
        }),
        cancel: params.cancel.clone(),
    });

    let open_result = {
        let mut slot = shared.producer.lock();
        let ProducerSlot { producer, info } = &mut *slot;
        let mut ctx = ProducerCtx {
            shared: &shared,
            info,
        };
        producer.open(&mut ctx, level)
    };
    if let Err(err) = open_result {
        shared.producer.lock().producer.close();
        return Err(err);
    }

    {
        let mut slot = shared.producer.lock();
        let info = &mut slot.info;

        if !info.seekable && opts.force_seekable {
            warn!("source not seekable, but enabling seeking on user request");
            info.seekable = true;
            info.partially_seekable = true;
        }
        if info.format.is_empty() {
            info.format = name.to_string();
        }
        info!(format = %info.format, parser = description, "detected file format");
        if !info.seekable {
            debug!("source is not seekable");
        }

        let mut guard = shared.state.lock();
        guard.seekable = info.seekable;
        guard.partially_seekable = info.partially_seekable;
        if info.is_network || info.has_cache {
            guard.readahead_secs = guard.readahead_secs.max(opts.cache_secs);
        }
        guard.buffer_info.copy_from(info, Events::all());
        guard.buffer_events |= Events::all();

        if opts.create_cc_tracks {
            let existing = guard.streams.len();
            for n in 0..existing {
                if guard.streams[n].stream_type == StreamType::Video {
                    guard.cc_track_locked(n);
                }
            }
        }
    }

    let mut demuxer = Demuxer {
        shared,
        info: DemuxerInfo::default(),
        thread: None,
    };
    demuxer.update();
    Ok(demuxer)
}

/// The consumer handle to an open demuxer.
///
/// Packet reads, seeks, and track selection are safe to call from any
/// consumer thread through a shared reference; [`update`](Self::update)
/// and thread control need the owning handle.
pub struct Demuxer {
    shared: Arc<Shared>,
    /// Consumer view of demuxer-wide state; refreshed by `update()`.
    info: DemuxerInfo,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Demuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demuxer").finish_non_exhaustive()
    }
}

impl Demuxer {
    /// Start the read-ahead thread.
    pub fn start_thread(&mut self) {
        if self.thread.is_some() {
            return;
        }
        self.shared.state.lock().threading = true;
        let shared = Arc::clone(&self.shared);
        self.thread = Some(
            std::thread::Builder::new()
                .name("demux".into())
                .spawn(move || thread::demux_thread(shared))
                .expect("failed to spawn demux thread"),
        );
    }

    /// Stop and join the read-ahead thread. The demuxer keeps working in
    /// single-threaded mode afterwards.
    pub fn stop_thread(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.state.lock().thread_terminate = true;
        self.shared.wakeup.notify_all();
        handle.join().expect("demux thread panicked");
        let mut guard = self.shared.state.lock();
        guard.threading = false;
        guard.thread_terminate = false;
    }

    /// The consumer view of demuxer-wide state (format, duration,
    /// metadata, ...), as of the last [`update`](Self::update).
    pub fn info(&self) -> &DemuxerInfo {
        &self.info
    }

    /// Pull pending producer-side changes into the consumer view. Returns
    /// the coalesced events since the previous call.
    pub fn update(&mut self) -> Events {
        if !self.shared.state.lock().threading {
            thread::update_cache(&self.shared);
        }

        let mut guard = self.shared.state.lock();
        let mut events = guard.buffer_events;
        guard.buffer_events = Events::empty();
        self.info.copy_from(&mut guard.buffer_info, events);
        events |= guard.events;
        guard.events = Events::empty();

        if events.contains(Events::METADATA) {
            let num = guard.current_tags.len().min(self.info.stream_tags.len());
            for n in 0..num {
                if let Some(tags) = self.info.stream_tags[n].take() {
                    guard.current_tags[n] = tags;
                }
            }

            // Audio-only files often carry their metadata on the single
            // stream instead of the container.
            if guard.current_tags.len() == 1 {
                let stream_tags = guard.current_tags[0].clone();
                self.info.metadata.merge(&stream_tags);
            }
            if let Some(source_metadata) = guard.source_metadata.clone() {
                self.info.metadata.merge(&source_metadata);
            }
        }

        events
    }

    /// Install a callback fired when a new packet arrives after an
    /// underrun, or when EOF is reached. The callback runs under the
    /// cache lock and must not call back into the demuxer; just wake your
    /// event loop.
    pub fn set_wakeup_cb(&self, cb: impl Fn() + Send + Sync + 'static) {
        self.shared.state.lock().wakeup_cb = Some(Arc::new(cb) as WakeupCb);
    }

    /// Offset added to every timestamp leaving the demuxer (and removed
    /// from every incoming seek target).
    pub fn set_ts_offset(&self, offset: f64) {
        self.shared.state.lock().ts_offset = offset;
    }

    /// Select every future stream as it is registered. Single-threaded
    /// setup convenience.
    pub fn set_autoselect(&self, autoselect: bool) {
        let mut guard = self.shared.state.lock();
        assert!(!guard.threading, "autoselect must be configured before threading");
        guard.autoselect = autoselect;
    }

    pub fn num_streams(&self) -> usize {
        self.shared.state.lock().streams.len()
    }

    /// Stream descriptor by index. Valid indices never go away.
    pub fn stream(&self, index: usize) -> Option<Arc<Stream>> {
        self.shared.state.lock().streams.get(index).cloned()
    }

    /// All registered stream descriptors.
    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.shared.state.lock().streams.clone()
    }

    /// Look a stream up by producer-visible numbering.
    pub fn stream_by_demuxer_id(&self, ty: StreamType, id: i64) -> Option<Arc<Stream>> {
        let guard = self.shared.state.lock();
        guard
            .streams
            .iter()
            .find(|s| s.stream_type == ty && s.demuxer_id == Some(id))
            .cloned()
    }

    /// Current tags for a stream (initial descriptor tags plus any updates
    /// delivered through [`update`](Self::update)).
    pub fn stream_tags(&self, index: usize) -> Tags {
        self.shared
            .state
            .lock()
            .current_tags
            .get(index)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_stream_selected(&self, index: usize) -> bool {
        self.shared
            .state
            .lock()
            .states
            .get(index)
            .is_some_and(|s| s.selected)
    }

    /// Enable or disable packet delivery for a stream.
    ///
    /// Enabling mid-playback schedules a refresh seek: the producer is
    /// rewound to slightly before `ref_pts` (the assumed player position)
    /// and already-buffered streams deduplicate the replayed packets, so
    /// the new track fills in without disturbing the others.
    pub fn select_track(&self, index: usize, selected: bool, ref_pts: Option<f64>) {
        let mut guard = self.shared.state.lock();
        let Some(currently) = guard.states.get(index).map(|s| s.selected) else {
            return;
        };
        // Don't flush buffers on a no-op selection.
        if currently != selected {
            guard.update_stream_selection_state(index, selected, false);
            guard.tracks_switched = true;
            let need_refresh = selected && !guard.initial_state;
            guard.states[index].need_refresh = need_refresh;
            if need_refresh {
                let offset = guard.ts_offset;
                guard.ref_pts = add_pts(ref_pts, -offset);
            }
            if !guard.threading {
                thread::execute_trackswitch(&self.shared, &mut guard);
            }
        }
        guard.check_consistency();
        drop(guard);
        self.shared.wakeup.notify_all();
    }

    /// Blocking read. Returns `None` on EOF (or while the forward byte cap
    /// pauses read-ahead; draining buffered packets recovers that).
    pub fn read_packet(&self, stream: usize) -> Option<Packet> {
        reader::read_packet_blocking(&self.shared, stream)
    }

    /// Non-blocking read; see [`ReadStatus`].
    pub fn read_packet_async(&self, stream: usize) -> ReadStatus {
        reader::read_packet_async(&self.shared, stream)
    }

    /// Whether a packet is queued right now. Never blocks or reads.
    pub fn has_packet(&self, stream: usize) -> bool {
        reader::has_packet(&self.shared, stream)
    }

    /// Read whichever stream has data next. Single-threaded mode only.
    pub fn read_any_packet(&self) -> Option<Packet> {
        reader::read_any_packet(&self.shared)
    }

    /// Drop all cached packets and reset reader state. Stream selection
    /// and the producer position are unaffected.
    pub fn flush(&self) {
        let mut guard = self.shared.state.lock();
        guard.clear_reader_state_all();
        for n in 0..guard.ranges.len() {
            let freed = guard.ranges[n].clear();
            guard.total_bytes -= freed;
        }
        guard.free_empty_cached_ranges();
        debug_assert_eq!(guard.total_bytes, 0);
        guard.check_consistency();
    }

    /// Seek to `pts` (seconds, or a 0..1 factor with
    /// [`SeekFlags::FACTOR`]). Satisfied from the cache when possible;
    /// otherwise queues a low-level producer seek.
    pub fn seek(&self, pts: f64, flags: SeekFlags) -> Result<(), SeekError> {
        seek::seek_impl(&self.shared, pts, flags)
    }

    /// High-water mark of dequeued packet byte positions.
    pub fn filepos(&self) -> Option<u64> {
        self.shared.state.lock().filepos
    }

    /// Aggregate reader/buffer state for the player frontend.
    pub fn reader_state(&self) -> ReaderState {
        let guard = self.shared.state.lock();
        let mut r = ReaderState {
            eof: guard.last_eof,
            fw_bytes: guard.fw_bytes,
            total_bytes: guard.total_bytes,
            ..Default::default()
        };

        let cur = guard.current_range();
        let mut any_packets = false;
        for n in 0..guard.states.len() {
            let ds = &guard.states[n];
            let queue = &guard.ranges[cur].streams[n];
            if ds.eager && !(queue.is_empty() && ds.eof) && !ds.ignore_eof {
                r.underrun |= ds.reader_head.is_none() && !ds.eof;
                r.ts_reader = pts_max(r.ts_reader, ds.base_ts);
                r.ts_end = pts_max(r.ts_end, queue.last_ts);
                any_packets |= !queue.is_empty();
            }
        }
        r.idle = (guard.idle && !r.underrun) || r.eof;
        r.underrun &= !r.idle;
        r.ts_reader = add_pts(r.ts_reader, guard.ts_offset);
        r.ts_end = add_pts(r.ts_end, guard.ts_offset);
        if let (Some(reader), Some(end)) = (r.ts_reader, r.ts_end) {
            if reader <= end {
                r.ts_duration = Some(end - reader);
            }
        }
        if guard.seeking || !any_packets {
            r.ts_duration = Some(0.0);
        }
        for range in guard.ranges.iter() {
            if r.seek_ranges.len() >= MAX_SEEK_RANGES {
                break;
            }
            if let (Some(start), Some(end)) = (range.seek_start, range.seek_end) {
                r.seek_ranges
                    .push((start + guard.ts_offset, end + guard.ts_offset));
            }
        }
        r
    }

    /// Bitrate sums per stream type over selected streams.
    pub fn bitrate_stats(&self) -> BitrateStats {
        let guard = self.shared.state.lock();
        let mut stats = BitrateStats::default();
        for ds in &guard.states {
            if !ds.selected {
                continue;
            }
            let Some(bitrate) = ds.bitrate else {
                continue;
            };
            let slot = match ds.stream_type {
                StreamType::Video => &mut stats.video,
                StreamType::Audio => &mut stats.audio,
                StreamType::Subtitle => &mut stats.subtitle,
            };
            *slot = Some(slot.unwrap_or(0.0) + bitrate);
        }
        stats
    }

    /// Total source size in bytes, if the producer knows it. Served from
    /// the cached snapshot; falls back to a blocking query on the demux
    /// thread.
    pub fn source_size(&self) -> Option<u64> {
        if let Some(size) = self.shared.state.lock().source_size {
            return Some(size);
        }
        self.ensure_source_state();
        self.shared.state.lock().source_size
    }

    /// Upstream byte-cache state, if the source has a cache.
    pub fn source_cache_info(&self) -> Option<CacheInfo> {
        if let Some(cache) = self.shared.state.lock().source_cache {
            return Some(cache);
        }
        self.ensure_source_state();
        self.shared.state.lock().source_cache
    }

    /// Display name of the underlying source, if it has one.
    pub fn base_filename(&self) -> Option<String> {
        if let Some(name) = self.shared.state.lock().base_filename.clone() {
            return Some(name);
        }
        self.ensure_source_state();
        self.shared.state.lock().base_filename.clone()
    }

    /// Refresh the cached source snapshot: immediately in single-threaded
    /// mode, via a blocking round-trip on the demux thread otherwise.
    fn ensure_source_state(&self) {
        let threading = {
            let mut guard = self.shared.state.lock();
            if guard.source_cache.is_some() {
                // Keep the cached numbers fresh for the next caller too.
                guard.force_cache_update = true;
            }
            guard.threading
        };
        self.shared.wakeup.notify_all();

        if !threading {
            thread::update_cache(&self.shared);
            return;
        }

        debug!("blocking on demux thread for source state");
        let (tx, rx) = crossbeam::channel::bounded(1);
        {
            let mut guard = self.shared.state.lock();
            while guard.run_fn.is_some() {
                self.shared.wakeup.wait(&mut guard);
            }
            guard.run_fn = Some(Box::new(move |slot: &mut ProducerSlot| {
                let _ = tx.send(slot.producer.query_source());
            }));
        }
        self.shared.wakeup.notify_all();
        if let Ok(state) = rx.recv() {
            self.shared.state.lock().fold_source_state(state);
        }
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.stop_thread();
        self.shared.producer.lock().producer.close();
        self.flush();
        debug_assert_eq!(self.shared.state.lock().total_bytes, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{Producer, SourceState};
    use bytes::Bytes;
    use vireo_common::OpenError;

    /// Minimal scripted parser: one video and one audio track, packets
    /// interleaved 25 fps / 50 pps.
    struct ScriptProducer {
        accept: bool,
        attached_picture: bool,
        video: usize,
        audio: usize,
        cursor: usize,
        total: usize,
    }

    impl ScriptProducer {
        fn desc_accepting() -> ProducerDesc {
            ProducerDesc {
                name: "script",
                description: "scripted test parser",
                create: || {
                    Box::new(ScriptProducer {
                        accept: true,
                        attached_picture: false,
                        video: 0,
                        audio: 0,
                        cursor: 0,
                        total: 100,
                    })
                },
            }
        }

        fn desc_rejecting() -> ProducerDesc {
            ProducerDesc {
                name: "reject",
                description: "rejects everything",
                create: || {
                    Box::new(ScriptProducer {
                        accept: false,
                        attached_picture: false,
                        video: 0,
                        audio: 0,
                        cursor: 0,
                        total: 0,
                    })
                },
            }
        }
    }

    impl Producer for ScriptProducer {
        fn open(
            &mut self,
            ctx: &mut ProducerCtx<'_>,
            _check: CheckLevel,
        ) -> Result<(), OpenError> {
            if !self.accept {
                return Err(OpenError::Parser {
                    name: "reject",
                    reason: "not my format".into(),
                });
            }
            ctx.info.seekable = true;
            ctx.info.duration = Some(self.total as f64 * 0.02);

            let mut video = Stream::new(StreamType::Video);
            video.codec.codec = "h264".into();
            if self.attached_picture {
                let mut pic = Packet::new(Bytes::from_static(b"cover"));
                pic.keyframe = true;
                video.attached_picture = Some(pic);
            }
            self.video = ctx.add_stream(video);

            let mut audio = Stream::new(StreamType::Audio);
            audio.codec.codec = "aac".into();
            self.audio = ctx.add_stream(audio);
            Ok(())
        }

        fn fill_buffer(&mut self, ctx: &mut ProducerCtx<'_>) -> usize {
            if self.cursor >= self.total {
                return 0;
            }
            let n = self.cursor;
            self.cursor += 1;
            let mut p = Packet::new(Bytes::from(vec![0u8; 64]));
            p.pts = Some(n as f64 * 0.02);
            p.dts = p.pts;
            p.pos = Some(n as u64 * 64);
            p.keyframe = true;
            let stream = if n % 2 == 0 { self.video } else { self.audio };
            ctx.add_packet(stream, p);
            1
        }

        fn seek(&mut self, _ctx: &mut ProducerCtx<'_>, pts: f64, _flags: SeekFlags) {
            let frame = (pts.max(0.0) / 0.02) as usize;
            self.cursor = frame.min(self.total);
        }

        fn query_source(&mut self) -> SourceState {
            SourceState {
                size: Some(self.total as u64 * 64),
                ..Default::default()
            }
        }
    }

    fn open_script() -> Demuxer {
        open(
            &[ScriptProducer::desc_accepting()],
            DemuxOptions::default(),
            OpenParams::default(),
        )
        .expect("open")
    }

    #[test]
    fn open_fails_when_no_parser_accepts() {
        let err = open(
            &[ScriptProducer::desc_rejecting()],
            DemuxOptions::default(),
            OpenParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OpenError::Unrecognized));
    }

    #[test]
    fn forcing_an_unknown_format_errors() {
        let err = open(
            &[ScriptProducer::desc_accepting()],
            DemuxOptions::default(),
            OpenParams {
                force_format: Some("nope".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpenError::UnknownFormat(_)));
    }

    #[test]
    fn selection_is_idempotent() {
        let demuxer = open_script();
        demuxer.select_track(0, true, None);
        {
            let guard = demuxer.shared.state.lock();
            assert!(guard.states[0].selected);
            // Initial state: enabling before playback needs no refresh.
            assert!(!guard.states[0].need_refresh);
        }
        // Selecting again must not clear anything.
        demuxer.read_packet(0).expect("packet");
        demuxer.select_track(0, true, None);
        assert!(demuxer.has_packet(0) || demuxer.shared.state.lock().states[0].selected);

        // Off and back on mid-playback wants a refresh.
        demuxer.select_track(1, true, Some(0.5));
        let guard = demuxer.shared.state.lock();
        assert!(guard.states[1].need_refresh);
    }

    #[test]
    fn source_size_comes_from_the_cached_snapshot() {
        let mut demuxer = open_script();
        demuxer.update();
        assert_eq!(demuxer.source_size(), Some(100 * 64));
    }

    #[test]
    fn flush_is_idempotent() {
        let demuxer = open_script();
        demuxer.select_track(0, true, None);
        demuxer.select_track(1, true, None);
        demuxer.read_packet(0).expect("packet");
        demuxer.flush();
        {
            let guard = demuxer.shared.state.lock();
            assert_eq!(guard.total_bytes, 0);
            assert_eq!(guard.fw_bytes, 0);
        }
        demuxer.flush();
        let guard = demuxer.shared.state.lock();
        assert_eq!(guard.total_bytes, 0);
    }

    #[test]
    fn attached_picture_is_emitted_exactly_once() {
        let desc = ProducerDesc {
            name: "script-pic",
            description: "scripted test parser with cover art",
            create: || {
                Box::new(ScriptProducer {
                    accept: true,
                    attached_picture: true,
                    video: 0,
                    audio: 0,
                    cursor: 0,
                    total: 4,
                })
            },
        };
        let demuxer = open(&[desc], DemuxOptions::default(), OpenParams::default()).expect("open");
        demuxer.select_track(0, true, None);

        let pic = demuxer.read_packet(0).expect("attached picture");
        assert_eq!(&pic.data[..], b"cover");
        assert!(demuxer.read_packet(0).is_none());
        assert!(demuxer.read_packet(0).is_none());
    }

    #[test]
    fn streams_are_found_by_demuxer_id() {
        let demuxer = open_script();
        let audio = demuxer
            .stream_by_demuxer_id(StreamType::Audio, 0)
            .expect("audio stream");
        assert_eq!(audio.index, 1);
        assert!(demuxer.stream_by_demuxer_id(StreamType::Subtitle, 0).is_none());
    }
}
