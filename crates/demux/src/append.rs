//! Packet ingestion and the cache maintenance it triggers: keyframe-block
//! accounting, back-buffer pruning, and range joining.

use tracing::{debug, trace, warn};
use vireo_common::StreamType;

use crate::packet::Packet;
use crate::producer::SeekFlags;
use crate::queue::Queue;
use crate::state::Inner;

fn reached_f64(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a >= b)
}

fn reached_u64(a: Option<u64>, b: Option<u64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a >= b)
}

/// Append one producer packet to its stream's queue in the current range.
///
/// Handles refresh-seek deduplication, monotonicity tracking, reader
/// pickup, cache accounting, and seek-range maintenance. Packets are
/// dropped outright while a seek is queued, for unselected streams, and
/// while a refresh seek has not yet reached the previously seen position.
pub(crate) fn add_packet_locked(inner: &mut Inner, stream: usize, mut dp: Packet) {
    if dp.data.is_empty() || stream >= inner.states.len() {
        return;
    }
    let cur = inner.current_range();

    // A refreshing stream drops everything up to (and including) the last
    // position seen before the refresh seek, then resumes normally.
    let drop_packet = inner.states[stream].refreshing;
    if drop_packet {
        let queue = &inner.ranges[cur].streams[stream];
        let still_refreshing = if queue.correct_dts {
            match (dp.dts, queue.last_dts) {
                (Some(dts), Some(last)) => dts < last,
                (None, Some(_)) => true,
                (_, None) => false,
            }
        } else if queue.correct_pos {
            match (dp.pos, queue.last_pos) {
                (Some(pos), Some(last)) => pos < last,
                (None, Some(_)) => true,
                (_, None) => false,
            }
        } else {
            warn!(stream, "demux refreshing failed");
            false
        };
        inner.states[stream].refreshing = still_refreshing;
    }

    if !inner.states[stream].selected
        || inner.states[stream].need_refresh
        || inner.seeking
        || drop_packet
    {
        return;
    }

    inner.ranges[cur].streams[stream].track_append(&dp);
    {
        let queue = &inner.ranges[cur].streams[stream];
        inner.states[stream].global_correct_dts &= queue.correct_dts;
        inner.states[stream].global_correct_pos &= queue.correct_pos;
    }

    dp.stream = stream;
    dp.kf_seek_pts = None;
    // For video, PTS determination is not trivial; for everything else,
    // distinguishing PTS and DTS is not useful.
    if inner.states[stream].stream_type != StreamType::Video && dp.pts.is_none() {
        dp.pts = dp.dts;
    }

    let bytes = dp.estimate_size();
    let take_reader = inner.states[stream].reader_head.is_none()
        && (!inner.states[stream].skip_to_keyframe || dp.keyframe);

    // Payload is refcounted, so this keeps the metadata around without
    // duplicating packet data.
    let meta = dp.clone();
    let seq = inner.ranges[cur].streams[stream].push_back(dp);

    if take_reader {
        inner.states[stream].reader_head = Some(seq);
        inner.states[stream].skip_to_keyframe = false;
    }

    inner.total_bytes += bytes;
    if inner.states[stream].reader_head.is_some() {
        inner.states[stream].fw_packs += 1;
        inner.states[stream].fw_bytes += bytes;
        inner.fw_bytes += bytes;
    }

    if !inner.states[stream].ignore_eof {
        inner.states[stream].eof = false;
        inner.eof = false;
        inner.last_eof = false;
    }

    inner.ranges[cur].streams[stream].track_timestamp(&meta);
    if inner.states[stream].base_ts.is_none() {
        inner.states[stream].base_ts = inner.ranges[cur].streams[stream].last_ts;
    }

    trace!(
        stream = %inner.states[stream].stream_type,
        size = meta.data.len(),
        pts = ?meta.pts,
        dts = ?meta.dts,
        pos = ?meta.pos,
        fw_packs = inner.states[stream].fw_packs,
        fw_bytes = inner.states[stream].fw_bytes,
        "append packet"
    );

    adjust_seek_range_on_packet(inner, stream, Some((seq, &meta)));

    // Wake the consumer if this was the first packet after a start or a
    // possible underrun.
    if inner.states[stream].reader_head == Some(seq) {
        if let Some(cb) = inner.wakeup_cb.clone() {
            cb();
        }
    }
}

/// Maintain the seekable range as packets arrive. A keyframe (or EOF,
/// `dp == None`) closes the block under construction, which stamps the
/// block head's `kf_seek_pts`, extends the queue's seek window, and may
/// make the current range overlap a cached one — in which case a join is
/// attempted.
pub(crate) fn adjust_seek_range_on_packet(
    inner: &mut Inner,
    stream: usize,
    dp: Option<(u64, &Packet)>,
) {
    if !inner.opts.seekable_cache {
        return;
    }
    let cur = inner.current_range();
    let mut attempt_join = false;

    if dp.map_or(true, |(_, p)| p.keyframe) {
        let old_end = inner.ranges[cur].seek_end;
        if inner.ranges[cur].streams[stream].finish_keyframe_block() {
            let states = &inner.states;
            inner.ranges[cur].update_seek_ranges(|n| states[n].selected);
            attempt_join = match (inner.ranges[cur].seek_end, old_end) {
                (Some(new), Some(old)) => new > old,
                (Some(_), None) => true,
                (None, _) => false,
            };
        }
        inner.ranges[cur].streams[stream].begin_keyframe_block(dp.map(|(seq, _)| seq));
    }

    if let Some((_, p)) = dp {
        inner.ranges[cur].streams[stream].fold_block_ts(p);
    }

    if attempt_join {
        attempt_range_joining(inner);
    }
}

/// Drop old packets while the back buffer exceeds its budget.
///
/// Victims come from the least-recently-used range: streams whose head is
/// not a seekable keyframe must be pruned outright; otherwise the stream
/// with the earliest seekable entry time loses its oldest keyframe block.
/// The reader position is never dropped. Ranges emptied by pruning are
/// removed.
pub(crate) fn prune_old_packets(inner: &mut Inner) {
    debug_assert!(!inner.ranges.is_empty());

    let max_back = if inner.opts.seekable_cache {
        inner.opts.max_back_bytes
    } else {
        0
    };

    while inner.total_bytes - inner.fw_bytes > max_back {
        let range_is_current = inner.ranges.len() == 1;

        let mut earliest: Option<f64> = None;
        let mut victim: Option<usize> = None;
        for n in 0..inner.ranges[0].streams.len() {
            let queue = &inner.ranges[0].streams[n];
            let Some(head) = queue.head_seq() else {
                continue;
            };
            if range_is_current && inner.states[n].reader_head == Some(head) {
                continue;
            }
            let p = queue.get(head).expect("head packet present");
            let ts = p.kf_seek_pts;
            // Packets with no usable seek timestamp can't help with
            // seeking; they must go first regardless of age.
            let prune_always = !inner.opts.seekable_cache || ts.is_none() || !p.keyframe;
            let better = prune_always
                || victim.is_none()
                || matches!((ts, earliest), (Some(a), Some(b)) if a < b);
            if better {
                earliest = ts;
                victim = Some(n);
                if prune_always {
                    break;
                }
            }
        }

        let idx = victim.expect("back-buffer bytes with no prunable stream");

        if inner.opts.seekable_cache && inner.ranges[0].streams[idx].next_prune_target.is_none() {
            inner.ranges[0].streams[idx].compute_prune_target();
            let states = &inner.states;
            inner.ranges[0].update_seek_ranges(|n| states[n].selected);
        }

        let reader_head = if range_is_current {
            inner.states[idx].reader_head
        } else {
            None
        };
        loop {
            let queue = &mut inner.ranges[0].streams[idx];
            let Some(head) = queue.head_seq() else {
                break;
            };
            if reader_head == Some(head) {
                break;
            }
            let done = queue.next_prune_target == Some(head);
            let p = queue.pop_front().expect("head packet present");
            inner.total_bytes -= p.estimate_size();
            if done {
                break;
            }
        }

        if !range_is_current && inner.ranges[0].seek_start.is_none() {
            inner.free_empty_cached_ranges();
        }
    }
}

/// Try to join the current range with the nearest cached range it now
/// overlaps.
///
/// Packets in the cached range that lie before the current range's tail
/// are dropped; the first survivor must then be the exact packet at the
/// current tail (same DTS, position, PTS, and length), proving the two
/// ranges line up. On success the current queues are spliced in front of
/// the cached ones, the cached range becomes current, and a high-accuracy
/// resume seek is queued to continue demuxing past the join point. On any
/// mismatch the cached range is discarded (losing cache is better than
/// corrupting it). Subtitle-like lazy streams are allowed to miss the
/// overlap entirely.
pub(crate) fn attempt_range_joining(inner: &mut Inner) {
    let cur = inner.current_range();
    let (cur_start, cur_end) = (inner.ranges[cur].seek_start, inner.ranges[cur].seek_end);

    let mut next = None;
    let mut next_dist = f64::INFINITY;
    for n in 0..cur {
        let range = &inner.ranges[n];
        if let (Some(cs), Some(rs), Some(ce)) = (cur_start, range.seek_start, cur_end) {
            if cs <= rs {
                // ">" so the overlap is non-zero.
                let dist = ce - rs;
                if dist > 0.0 && dist < next_dist {
                    next = Some(n);
                    next_dist = dist;
                }
            }
        }
    }
    let Some(nidx) = next else {
        return;
    };

    debug!(
        current = ?(cur_start, cur_end),
        next = ?(inner.ranges[nidx].seek_start, inner.ranges[nidx].seek_end),
        "going to join ranges"
    );

    let num = inner.num_streams();
    let mut failed = false;
    'check: for n in 0..num {
        let correct_dts = inner.states[n].global_correct_dts;
        let correct_pos = inner.states[n].global_correct_pos;
        if !correct_dts && !correct_pos {
            warn!(stream = n, "ranges unjoinable");
            failed = true;
            break;
        }

        let end_meta = {
            let q1 = &inner.ranges[cur].streams[n];
            q1.tail_seq().map(|seq| {
                let p = q1.get(seq).expect("tail packet present");
                (p.dts, p.pos, p.pts, p.data.len())
            })
        };

        // No packets yet in the current range: joining trivially works.
        let mut join_point_found = end_meta.is_none();

        if let Some((end_dts, end_pos, end_pts, end_len)) = end_meta {
            loop {
                let q2 = &inner.ranges[nidx].streams[n];
                let Some(head) = q2.head_seq() else {
                    break;
                };
                // We'd have to find the equivalent packet in the current
                // queue to keep block accounting correct. Give up instead.
                if q2.keyframe_latest == Some(head) {
                    warn!(stream = n, "not enough keyframes for join");
                    failed = true;
                    break 'check;
                }
                let p = q2.get(head).expect("head packet present");
                let reached = (correct_dts && reached_f64(p.dts, end_dts))
                    || (correct_pos && reached_u64(p.pos, end_pos));
                if reached {
                    // pos/dts equivalence across ranges is never actually
                    // verified, so cross-check the rest of the packet.
                    if p.dts != end_dts
                        || p.pos != end_pos
                        || p.pts != end_pts
                        || p.data.len() != end_len
                    {
                        warn!(stream = n, "demuxer behavior mismatch prevents join");
                        failed = true;
                        break 'check;
                    }
                    let p = inner.ranges[nidx].streams[n]
                        .pop_front()
                        .expect("head packet present");
                    inner.total_bytes -= p.estimate_size();
                    join_point_found = true;
                    break;
                }
                let p = inner.ranges[nidx].streams[n]
                    .pop_front()
                    .expect("head packet present");
                inner.total_bytes -= p.estimate_size();
            }
        }

        if inner.states[n].eager && !join_point_found {
            warn!(stream = n, "no join point found");
            failed = true;
            break;
        }
    }

    if failed {
        let freed = inner.ranges[nidx].clear();
        inner.total_bytes -= freed;
        inner.free_empty_cached_ranges();
        return;
    }

    // The join will work: splice each current queue in front of the cached
    // one and make the cached range the current range.
    inner.fw_bytes = 0;
    for n in 0..num {
        let q1 = std::mem::replace(&mut inner.ranges[cur].streams[n], Queue::new());
        inner.ranges[nidx].streams[n].splice_front(q1);

        let (packs, bytes) = match inner.states[n].reader_head {
            Some(seq) => inner.ranges[nidx].streams[n].tally_from(seq),
            None => (0, 0),
        };
        inner.states[n].fw_packs = packs;
        inner.states[n].fw_bytes = bytes;
        inner.fw_bytes += bytes;

        // The demuxer position moves past the join point; drop duplicates
        // until it gets there.
        inner.states[n].refreshing = true;
    }

    inner.ranges[nidx].seek_start = cur_start;

    // Resume demuxing at the end of the joined range.
    inner.seeking = true;
    inner.seek_flags = SeekFlags::HR;
    inner.seek_pts = inner.ranges[nidx]
        .seek_end
        .expect("joined range has a seek window")
        - 1.0;

    inner.set_current_range(nidx);
    let old = inner.ranges.len() - 2;
    let freed = inner.ranges[old].clear();
    inner.total_bytes -= freed;

    debug!("ranges joined");
    inner.free_empty_cached_ranges();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opts::DemuxOptions;
    use crate::stream::Stream;
    use bytes::Bytes;

    const PAYLOAD: usize = 1000;

    fn make_inner(seekable_cache: bool, max_back_bytes: usize) -> Inner {
        let opts = DemuxOptions {
            seekable_cache,
            max_back_bytes,
            ..Default::default()
        };
        let mut inner = Inner::new(opts);
        inner.seekable = true;
        inner
    }

    fn add_video_stream(inner: &mut Inner) -> usize {
        let idx = inner.add_stream_locked(Stream::new(StreamType::Video));
        inner.update_stream_selection_state(idx, true, false);
        idx
    }

    fn feed(inner: &mut Inner, stream: usize, t: f64, keyframe: bool) {
        let mut p = Packet::new(Bytes::from(vec![0u8; PAYLOAD]));
        p.pts = Some(t);
        p.dts = Some(t);
        p.pos = Some((t * 1000.0) as u64);
        p.keyframe = keyframe;
        add_packet_locked(inner, stream, p);
    }

    fn drain_one(inner: &mut Inner, stream: usize) -> Option<f64> {
        let cur = inner.current_range();
        let head = inner.states[stream].reader_head?;
        let p = inner.ranges[cur].streams[stream].get(head)?.clone();
        let next = head + 1;
        inner.states[stream].reader_head =
            (next < inner.ranges[cur].streams[stream].end_seq()).then_some(next);
        let bytes = p.estimate_size();
        inner.states[stream].fw_packs -= 1;
        inner.states[stream].fw_bytes -= bytes;
        inner.fw_bytes -= bytes;
        p.dts
    }

    #[test]
    fn back_buffer_pruning_respects_budget_and_reader() {
        let mut inner = make_inner(true, 3 * (PAYLOAD + 200));
        let s = add_video_stream(&mut inner);

        for i in 0..20 {
            feed(&mut inner, s, i as f64, true);
        }
        // Consume half; the consumed packets become back-buffer.
        for _ in 0..10 {
            drain_one(&mut inner, s);
        }
        prune_old_packets(&mut inner);
        inner.check_consistency();

        assert!(inner.total_bytes - inner.fw_bytes <= 3 * (PAYLOAD + 200));
        // The reader position itself must survive.
        let cur = inner.current_range();
        let head = inner.states[s].reader_head.unwrap();
        assert!(inner.ranges[cur].streams[s].get(head).is_some());
        // seek_start moved up to a surviving keyframe.
        assert!(inner.ranges[cur].streams[s].seek_start > Some(0.0));
    }

    #[test]
    fn unseekable_cache_prunes_everything_behind_reader() {
        let mut inner = make_inner(false, usize::MAX);
        let s = add_video_stream(&mut inner);
        for i in 0..5 {
            feed(&mut inner, s, i as f64, true);
        }
        for _ in 0..3 {
            drain_one(&mut inner, s);
        }
        prune_old_packets(&mut inner);
        inner.check_consistency();
        assert_eq!(inner.total_bytes, inner.fw_bytes);
        assert_eq!(inner.states[s].fw_packs, 2);
    }

    #[test]
    fn overlapping_ranges_join_into_one() {
        let mut inner = make_inner(true, usize::MAX);
        let s = add_video_stream(&mut inner);

        // Cached range: keyframes at 30..=45.
        for t in 30..=45 {
            feed(&mut inner, s, t as f64, true);
        }
        // Seek away: fresh current range, then play 10..=32 so the current
        // range's window reaches past the cached range's start.
        inner.clear_reader_state_all();
        inner.switch_to_fresh_cache_range();
        assert_eq!(inner.ranges.len(), 2);

        for t in 10..=32 {
            feed(&mut inner, s, t as f64, true);
        }
        inner.check_consistency();

        // The join happened: one range spanning both.
        assert_eq!(inner.ranges.len(), 1);
        let range = &inner.ranges[0];
        assert_eq!(range.seek_start, Some(10.0));
        assert_eq!(range.seek_end, Some(44.0));

        // Concatenation with duplicates removed: 10..=45, each exactly once.
        let queue = &range.streams[s];
        let times: Vec<f64> = queue.iter().map(|(_, p)| p.dts.unwrap()).collect();
        let expect: Vec<f64> = (10..=45).map(|t| t as f64).collect();
        assert_eq!(times, expect);

        // A resume seek past the join point was queued.
        assert!(inner.seeking);
        assert!(inner.seek_flags.contains(SeekFlags::HR));
        assert!((inner.seek_pts - 43.0).abs() < 1e-9);
        assert!(inner.states[s].refreshing);
    }

    #[test]
    fn join_failure_discards_cached_range() {
        let mut inner = make_inner(true, usize::MAX);
        let s = add_video_stream(&mut inner);

        for t in 30..=40 {
            feed(&mut inner, s, t as f64, true);
        }
        inner.clear_reader_state_all();
        inner.switch_to_fresh_cache_range();

        // Feed overlapping packets whose positions/lengths don't line up
        // with the cached ones.
        for t in 10..=32 {
            let mut p = Packet::new(Bytes::from(vec![0u8; PAYLOAD / 2]));
            p.pts = Some(t as f64);
            p.dts = Some(t as f64);
            p.pos = Some((t * 1000 + 1) as u64);
            p.keyframe = true;
            add_packet_locked(&mut inner, s, p);
        }
        inner.check_consistency();

        // Join was attempted and failed; the cached range is gone, the
        // current range is unharmed.
        assert_eq!(inner.ranges.len(), 1);
        assert_eq!(inner.ranges[0].seek_start, Some(10.0));
        assert!(!inner.seeking);
    }
}
