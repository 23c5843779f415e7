//! The seek engine: in-cache seeks, range switching, and fresh seeks.

use tracing::{debug, warn};
use vireo_common::{SeekError, StreamType};

use crate::producer::SeekFlags;
use crate::range::CachedRange;
use crate::state::{Inner, Shared};
use crate::thread::execute_seek;

impl Inner {
    /// Make `target` the current range and sanitize the old one: drop its
    /// already-condemned prune prefix, discard it entirely if resuming it
    /// later would be impossible (no monotonic dts or pos), and reset all
    /// per-stream demuxing state to the new range.
    pub(crate) fn switch_current_range(&mut self, target: usize) {
        self.set_current_range(target);
        debug_assert!(self.ranges.len() >= 2);
        let old = self.ranges.len() - 2;

        // Packets up to the cached prune boundary can't be seeked back to;
        // they would only waste back-buffer budget.
        for n in 0..self.ranges[old].streams.len() {
            loop {
                let queue = &mut self.ranges[old].streams[n];
                if queue.next_prune_target.is_none() {
                    break;
                }
                let p = queue.pop_front().expect("prune target implies packets");
                self.total_bytes -= p.estimate_size();
            }
        }

        // Resuming or joining the old range requires a monotonic dts or
        // position on every selected stream.
        for n in 0..self.states.len() {
            let ds = &self.states[n];
            if ds.selected && !(ds.global_correct_dts || ds.global_correct_pos) {
                debug!(
                    stream = n,
                    correct_dts = ds.global_correct_dts,
                    correct_pos = ds.global_correct_pos,
                    "discarding old range"
                );
                let freed = self.ranges[old].clear();
                self.total_bytes -= freed;
                break;
            }
        }

        for s in self.states.iter_mut() {
            s.refreshing = false;
            s.need_refresh = false;
            s.eof = false;
        }

        self.free_empty_cached_ranges();
    }

    /// Start a new blank current range, keeping the old one for in-cache
    /// seeks. Without a seekable cache this merely clears the current
    /// range.
    pub(crate) fn switch_to_fresh_cache_range(&mut self) {
        if !self.opts.seekable_cache {
            let cur = self.current_range();
            let freed = self.ranges[cur].clear();
            self.total_bytes -= freed;
            return;
        }

        self.ranges.push(CachedRange::new(self.num_streams()));
        let target = self.ranges.len() - 1;
        self.switch_current_range(target);
    }

    /// Try to satisfy a seek from cached data. On success the reader
    /// positions are moved to the target keyframes; if the data lives in a
    /// non-current range, the demuxer is additionally redirected to resume
    /// writing at that range's end.
    pub(crate) fn try_seek_cache(&mut self, mut pts: f64, mut flags: SeekFlags) -> bool {
        if flags.contains(SeekFlags::FACTOR) || !self.opts.seekable_cache {
            return false;
        }

        // Note: `seeking` can still be true here from a previous resume
        // seek. Seeking into the current range just changes reader
        // positions and must leave it queued; otherwise it gets
        // overridden below anyway.

        let mut found = None;
        for (n, range) in self.ranges.iter().enumerate() {
            if range.seek_start.is_some() {
                debug!(range = n, start = ?range.seek_start, end = ?range.seek_end, "cached range");
                if range.contains(pts) {
                    found = Some(n);
                    break;
                }
            }
        }
        let Some(ridx) = found else {
            return false;
        };
        debug!(range = ridx, "using cached range for in-cache seek");

        // Snap the target to the video keyframe that will actually be
        // shown, so audio does not seek closer to the request than video
        // can (the overshoot would play as silence). Pointless for hr
        // seeks, which decode away the difference anyway.
        if !flags.contains(SeekFlags::HR) {
            for n in 0..self.states.len() {
                if !self.states[n].selected || self.states[n].stream_type != StreamType::Video {
                    continue;
                }
                let queue = &self.ranges[ridx].streams[n];
                if let Some(target) = queue.find_seek_target(pts, flags) {
                    if let Some(target_pts) =
                        queue.get(target).expect("seek target in queue").kf_seek_pts
                    {
                        debug!(from = pts, to = target_pts, "adjust seek target");
                        pts = target_pts;
                        flags.remove(SeekFlags::FORWARD);
                    }
                }
                break;
            }
        }

        for n in 0..self.states.len() {
            let queue = &self.ranges[ridx].streams[n];
            let target = queue.find_seek_target(pts, flags);
            if let Some(seq) = target {
                let p = queue.get(seq).expect("seek target in queue");
                self.states[n].base_ts = p.pts.or(p.dts);
            }
            let (packs, bytes) = match target {
                Some(seq) => queue.tally_from(seq),
                None => (0, 0),
            };
            debug!(
                stream = n,
                kind = %self.states[n].stream_type,
                found = target.is_some(),
                "in-cache seek"
            );
            self.states[n].reader_head = target;
            self.states[n].skip_to_keyframe = target.is_none();
            self.states[n].fw_packs = packs;
            self.states[n].fw_bytes = bytes;
            self.fw_bytes += bytes;
        }

        // Seeking into another range means reader and demuxer queues must
        // be brought back together: resume low-level demuxing at its end.
        if self.current_range() != ridx {
            self.switch_current_range(ridx);

            self.seeking = true;
            self.seek_flags = SeekFlags::HR;
            self.seek_pts = self.ranges[self.current_range()]
                .seek_end
                .expect("cached range has a seek window")
                - 1.0;

            // Appended packets can overlap what the range already holds
            // (seek imprecision, readahead past the old seek target);
            // don't store them twice.
            for s in self.states.iter_mut() {
                s.refreshing = true;
            }

            debug!("resuming demuxer to end of cached range");
        }

        true
    }
}

/// Queue (and in single-threaded mode, execute) a seek.
pub(crate) fn seek_impl(shared: &Shared, pts: f64, flags: SeekFlags) -> Result<(), SeekError> {
    let mut guard = shared.state.lock();

    if !guard.seekable {
        warn!("cannot seek in this source");
        return Err(SeekError::Unseekable);
    }
    if !pts.is_finite() {
        return Err(SeekError::BadTarget);
    }

    debug!(pts, cascade = guard.seeking, "queuing seek");

    let pts = if flags.contains(SeekFlags::FACTOR) {
        pts
    } else {
        pts - guard.ts_offset
    };

    guard.clear_reader_state_all();
    guard.eof = false;
    guard.last_eof = false;
    guard.idle = true;
    guard.reading = false;

    if !guard.try_seek_cache(pts, flags) {
        guard.switch_to_fresh_cache_range();
        guard.seeking = true;
        guard.seek_flags = flags;
        guard.seek_pts = pts;
    }

    if !guard.threading && guard.seeking {
        execute_seek(shared, &mut guard);
    }

    guard.check_consistency();
    drop(guard);
    shared.wakeup.notify_all();
    Ok(())
}
