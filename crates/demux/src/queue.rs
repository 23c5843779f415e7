//! Per-(stream, range) packet queue.
//!
//! Packets live in a `VecDeque`, addressed by monotonically increasing
//! sequence ids: slot ids stay valid across both tail growth and head
//! pruning, which is what reader positions and prune targets need. Pop
//! from the front and push to the back are O(1).
//!
//! The queue also carries the incremental state demuxing needs across
//! seeks: DTS/position monotonicity tracking, the last written timestamp,
//! and the keyframe block currently being formed.

use std::collections::VecDeque;

use vireo_common::{pts_max, pts_min};

use crate::packet::Packet;
use crate::producer::SeekFlags;

/// How far a timestamp may jump backwards before we treat it as a
/// timestamp reset rather than reordering noise, in seconds.
pub(crate) const TS_REORDER_TOLERANCE: f64 = 10.0;

/// A contiguous run of cached packets for a single stream within one
/// cached range.
#[derive(Debug)]
pub(crate) struct Queue {
    packets: VecDeque<Packet>,
    /// Sequence id of `packets[0]`. Ids are never reused, even across
    /// `reset()`, so a stale id can only miss, never alias.
    first_seq: u64,

    /// Packet DTS observed strictly monotonically increasing so far.
    pub correct_dts: bool,
    /// Packet byte position observed strictly monotonically increasing.
    pub correct_pos: bool,
    /// Position of the last appended packet (for `correct_pos`).
    pub last_pos: Option<u64>,
    /// DTS of the last appended packet (for `correct_dts`).
    pub last_dts: Option<f64>,
    /// Timestamp of the newest packet appended to this queue.
    pub last_ts: Option<f64>,

    /// Min/max timestamps folded over the keyframe block being formed.
    pub keyframe_pts: Option<f64>,
    pub keyframe_end_pts: Option<f64>,
    /// The keyframe heading the block being formed.
    pub keyframe_latest: Option<u64>,

    /// Cached prune boundary: the last packet that may be dropped before
    /// the next seekable keyframe (computed lazily while pruning).
    pub next_prune_target: Option<u64>,

    /// Seekable window covered by closed keyframe blocks in this queue.
    pub seek_start: Option<f64>,
    pub seek_end: Option<f64>,
}

impl Queue {
    pub fn new() -> Self {
        Self {
            packets: VecDeque::new(),
            first_seq: 0,
            correct_dts: true,
            correct_pos: true,
            last_pos: None,
            last_dts: None,
            last_ts: None,
            keyframe_pts: None,
            keyframe_end_pts: None,
            keyframe_latest: None,
            next_prune_target: None,
            seek_start: None,
            seek_end: None,
        }
    }

    /// Drop all packets and reset incremental state. Returns the estimated
    /// bytes freed so the caller can fix up cache totals.
    pub fn reset(&mut self) -> usize {
        let freed = self.packets.iter().map(Packet::estimate_size).sum();
        self.first_seq += self.packets.len() as u64;
        self.packets.clear();
        self.correct_dts = true;
        self.correct_pos = true;
        self.last_pos = None;
        self.last_dts = None;
        self.last_ts = None;
        self.keyframe_pts = None;
        self.keyframe_end_pts = None;
        self.keyframe_latest = None;
        self.next_prune_target = None;
        self.seek_start = None;
        self.seek_end = None;
        freed
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Sequence id of the oldest packet, if any.
    pub fn head_seq(&self) -> Option<u64> {
        (!self.packets.is_empty()).then_some(self.first_seq)
    }

    /// Sequence id of the newest packet, if any.
    pub fn tail_seq(&self) -> Option<u64> {
        if self.packets.is_empty() {
            None
        } else {
            Some(self.first_seq + self.packets.len() as u64 - 1)
        }
    }

    /// One past the newest valid sequence id.
    pub fn end_seq(&self) -> u64 {
        self.first_seq + self.packets.len() as u64
    }

    pub fn get(&self, seq: u64) -> Option<&Packet> {
        let idx = seq.checked_sub(self.first_seq)?;
        self.packets.get(idx as usize)
    }

    pub fn get_mut(&mut self, seq: u64) -> Option<&mut Packet> {
        let idx = seq.checked_sub(self.first_seq)?;
        self.packets.get_mut(idx as usize)
    }

    /// Append a packet and return its sequence id.
    pub fn push_back(&mut self, packet: Packet) -> u64 {
        let seq = self.end_seq();
        self.packets.push_back(packet);
        seq
    }

    /// Remove the oldest packet. Internal references to it are cleared;
    /// the caller is responsible for never popping a reader position and
    /// for adjusting cache totals.
    pub fn pop_front(&mut self) -> Option<Packet> {
        let packet = self.packets.pop_front()?;
        let seq = self.first_seq;
        self.first_seq += 1;
        if self.next_prune_target == Some(seq) {
            self.next_prune_target = None;
        }
        if self.keyframe_latest == Some(seq) {
            self.keyframe_latest = None;
        }
        Some(packet)
    }

    /// Iterate `(seq, packet)` pairs from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &Packet)> {
        let first = self.first_seq;
        self.packets
            .iter()
            .enumerate()
            .map(move |(i, p)| (first + i as u64, p))
    }

    /// Packet count and estimated bytes from `seq` (inclusive) to the tail.
    pub fn tally_from(&self, seq: u64) -> (usize, usize) {
        let Some(idx) = seq.checked_sub(self.first_seq) else {
            return (0, 0);
        };
        let idx = idx as usize;
        if idx >= self.packets.len() {
            return (0, 0);
        }
        let mut bytes = 0;
        for p in self.packets.iter().skip(idx) {
            bytes += p.estimate_size();
        }
        (self.packets.len() - idx, bytes)
    }

    /// Update DTS/position monotonicity for a packet about to be appended.
    pub fn track_append(&mut self, p: &Packet) {
        self.correct_pos &= match (p.pos, self.last_pos) {
            (Some(pos), Some(last)) => pos > last,
            (Some(_), None) => true,
            (None, _) => false,
        };
        self.correct_dts &= match (p.dts, self.last_dts) {
            (Some(dts), Some(last)) => dts > last,
            (Some(_), None) => true,
            (None, _) => false,
        };
        self.last_pos = p.pos;
        self.last_dts = p.dts;
    }

    /// Advance `last_ts` for an appended packet. Accepts timestamps that
    /// move forward, or jump backwards by more than the reset tolerance.
    pub fn track_timestamp(&mut self, p: &Packet) {
        let mut ts = p.ts();
        if p.segmented {
            ts = pts_min(ts, p.end);
        }
        if let Some(t) = ts {
            let accept = match self.last_ts {
                None => true,
                Some(last) => t > last || t + TS_REORDER_TOLERANCE < last,
            };
            if accept {
                self.last_ts = Some(t);
            }
        }
    }

    /// Fold a packet's effective presentation time into the keyframe block
    /// being formed. Timestamps outside the packet's segment bounds do not
    /// count.
    pub fn fold_block_ts(&mut self, p: &Packet) {
        let mut ts = p.pts.or(p.dts);
        if p.segmented {
            if let Some(t) = ts {
                let below = p.start.is_some_and(|s| t < s);
                let above = p.end.is_some_and(|e| t > e);
                if below || above {
                    ts = None;
                }
            }
        }
        self.keyframe_pts = pts_min(self.keyframe_pts, ts);
        self.keyframe_end_pts = pts_max(self.keyframe_end_pts, ts);
    }

    /// Close the keyframe block being formed: stamp its head keyframe with
    /// the block's earliest presentation time and extend the queue's
    /// seekable window. Returns false if no block was open.
    pub fn finish_keyframe_block(&mut self) -> bool {
        let Some(latest) = self.keyframe_latest else {
            return false;
        };
        let kf_pts = self.keyframe_pts;
        if let Some(p) = self.get_mut(latest) {
            p.kf_seek_pts = kf_pts;
        }
        if self.seek_start.is_none() {
            self.seek_start = kf_pts;
        }
        if self.keyframe_end_pts.is_some() {
            self.seek_end = self.keyframe_end_pts;
        }
        true
    }

    /// Start forming a new keyframe block headed by `seq` (`None` closes
    /// out at EOF with no successor).
    pub fn begin_keyframe_block(&mut self, seq: Option<u64>) {
        self.keyframe_latest = seq;
        self.keyframe_pts = None;
        self.keyframe_end_pts = None;
    }

    /// Find the keyframe whose block entry time best matches `pts`:
    /// nearest at or before it, or (with [`SeekFlags::FORWARD`]) nearest at
    /// or after it. Equidistant candidates resolve to the earlier packet.
    pub fn find_seek_target(&self, pts: f64, flags: SeekFlags) -> Option<u64> {
        let mut target = None;
        let mut target_diff: Option<f64> = None;
        for (seq, p) in self.iter() {
            let Some(range_pts) = p.kf_seek_pts else {
                continue;
            };
            if !p.keyframe {
                continue;
            }
            let mut diff = range_pts - pts;
            if flags.contains(SeekFlags::FORWARD) {
                diff = -diff;
                if diff > 0.0 {
                    continue;
                }
            }
            if let Some(best) = target_diff {
                if diff <= 0.0 {
                    if best <= 0.0 && diff <= best {
                        continue;
                    }
                } else if diff >= best {
                    continue;
                }
            }
            target_diff = Some(diff);
            target = Some(seq);
        }
        target
    }

    /// Lazily pick the prune boundary: everything up to and including the
    /// packet before the next seekable keyframe may be dropped, and the
    /// queue's `seek_start` moves up to that keyframe's entry time (or goes
    /// unknown if no further seekable keyframe is buffered). Requires at
    /// least one packet; drops at least one.
    pub fn compute_prune_target(&mut self) {
        if self.next_prune_target.is_some() {
            return;
        }
        let Some(head) = self.head_seq() else {
            return;
        };
        let mut found = None;
        for (seq, p) in self.iter() {
            if seq == head {
                continue;
            }
            if p.keyframe && p.kf_seek_pts.is_some() {
                found = Some((seq - 1, p.kf_seek_pts));
                break;
            }
        }
        match found {
            Some((boundary, start)) => {
                self.next_prune_target = Some(boundary);
                self.seek_start = start;
            }
            None => {
                // Nothing seekable left; the whole queue may go.
                self.next_prune_target = self.tail_seq();
                self.seek_start = None;
            }
        }
    }

    /// Splice `front` (the current range's queue) in front of this queue.
    /// This queue's sequence ids are remapped past the spliced block so the
    /// combined queue shares `front`'s id space; prune target, seek start,
    /// and monotonicity flags carry over from `front`.
    pub fn splice_front(&mut self, mut front: Queue) {
        let new_start = front.first_seq + front.packets.len() as u64;
        let delta = new_start as i64 - self.first_seq as i64;
        self.keyframe_latest = self
            .keyframe_latest
            .map(|s| (s as i64 + delta) as u64);
        self.next_prune_target = front.next_prune_target.take();
        self.seek_start = front.seek_start;
        self.correct_dts &= front.correct_dts;
        self.correct_pos &= front.correct_pos;

        let mut packets = std::mem::take(&mut front.packets);
        packets.extend(self.packets.drain(..));
        self.packets = packets;
        self.first_seq = front.first_seq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn pkt(dts: f64, keyframe: bool) -> Packet {
        let mut p = Packet::new(Bytes::from_static(&[0u8; 16]));
        p.dts = Some(dts);
        p.pts = Some(dts);
        p.keyframe = keyframe;
        p
    }

    /// Append with full block accounting, the way ingestion drives it.
    fn push_tracked(q: &mut Queue, p: Packet) -> u64 {
        q.track_append(&p);
        if p.keyframe {
            q.finish_keyframe_block();
            let seq = q.push_back(p);
            q.begin_keyframe_block(Some(seq));
            let folded = q.get(seq).unwrap().clone();
            q.fold_block_ts(&folded);
            seq
        } else {
            let seq = q.push_back(p);
            let folded = q.get(seq).unwrap().clone();
            q.fold_block_ts(&folded);
            seq
        }
    }

    #[test]
    fn seq_ids_survive_pruning_and_growth() {
        let mut q = Queue::new();
        let a = q.push_back(pkt(0.0, true));
        let b = q.push_back(pkt(0.1, false));
        q.pop_front();
        let c = q.push_back(pkt(0.2, false));
        assert_eq!(q.get(a).map(|p| p.dts), None);
        assert_eq!(q.get(b).unwrap().dts, Some(0.1));
        assert_eq!(q.get(c).unwrap().dts, Some(0.2));
        assert_eq!(q.head_seq(), Some(b));
        assert_eq!(q.tail_seq(), Some(c));
    }

    #[test]
    fn monotonicity_tracking_degrades_and_stays_degraded() {
        let mut q = Queue::new();
        q.track_append(&pkt(1.0, true));
        assert!(q.correct_dts);
        q.track_append(&pkt(0.5, false)); // DTS went backwards
        assert!(!q.correct_dts);
        q.track_append(&pkt(2.0, false));
        assert!(!q.correct_dts);
    }

    #[test]
    fn missing_dts_clears_correctness() {
        let mut q = Queue::new();
        let mut p = pkt(1.0, true);
        p.dts = None;
        q.track_append(&p);
        assert!(!q.correct_dts);
    }

    #[test]
    fn last_ts_tolerates_small_backward_jumps() {
        let mut q = Queue::new();
        q.track_timestamp(&pkt(20.0, true));
        assert_eq!(q.last_ts, Some(20.0));
        // Reordering within the tolerance: keep the newer value.
        q.track_timestamp(&pkt(19.0, false));
        assert_eq!(q.last_ts, Some(20.0));
        // A jump beyond the tolerance reads as a timestamp reset.
        q.track_timestamp(&pkt(5.0, true));
        assert_eq!(q.last_ts, Some(5.0));
    }

    #[test]
    fn block_close_stamps_keyframe_and_extends_window() {
        let mut q = Queue::new();
        let kf = push_tracked(&mut q, pkt(1.0, true));
        push_tracked(&mut q, pkt(1.2, false));
        push_tracked(&mut q, pkt(1.1, false));
        assert_eq!(q.get(kf).unwrap().kf_seek_pts, None);
        // Next keyframe closes the block.
        push_tracked(&mut q, pkt(1.3, true));
        assert_eq!(q.get(kf).unwrap().kf_seek_pts, Some(1.0));
        assert_eq!(q.seek_start, Some(1.0));
        assert_eq!(q.seek_end, Some(1.2));
    }

    #[test]
    fn eof_closes_open_block() {
        let mut q = Queue::new();
        let kf = push_tracked(&mut q, pkt(2.0, true));
        push_tracked(&mut q, pkt(2.5, false));
        q.finish_keyframe_block();
        q.begin_keyframe_block(None);
        assert_eq!(q.get(kf).unwrap().kf_seek_pts, Some(2.0));
        assert_eq!(q.seek_end, Some(2.5));
    }

    #[test]
    fn find_seek_target_backward_and_forward() {
        let mut q = Queue::new();
        for t in [0.0, 1.0, 2.0, 3.0] {
            push_tracked(&mut q, pkt(t, true));
            push_tracked(&mut q, pkt(t + 0.5, false));
        }
        q.finish_keyframe_block();
        q.begin_keyframe_block(None);

        let back = q.find_seek_target(2.4, SeekFlags::empty()).unwrap();
        assert_eq!(q.get(back).unwrap().kf_seek_pts, Some(2.0));

        let fwd = q.find_seek_target(2.4, SeekFlags::FORWARD).unwrap();
        assert_eq!(q.get(fwd).unwrap().kf_seek_pts, Some(3.0));

        // Before the first keyframe, a backward seek still snaps forward.
        let first = q.find_seek_target(-5.0, SeekFlags::empty()).unwrap();
        assert_eq!(q.get(first).unwrap().kf_seek_pts, Some(0.0));
    }

    #[test]
    fn find_seek_target_tie_breaks_to_earlier_packet() {
        let mut q = Queue::new();
        push_tracked(&mut q, pkt(1.0, true));
        push_tracked(&mut q, pkt(3.0, true));
        q.finish_keyframe_block();
        q.begin_keyframe_block(None);
        // 2.0 is equidistant from both keyframes; backward semantics keep
        // the one at or before the target.
        let t = q.find_seek_target(2.0, SeekFlags::empty()).unwrap();
        assert_eq!(q.get(t).unwrap().kf_seek_pts, Some(1.0));
    }

    #[test]
    fn prune_target_stops_before_next_seekable_keyframe() {
        let mut q = Queue::new();
        let _a = push_tracked(&mut q, pkt(0.0, true));
        let b = push_tracked(&mut q, pkt(0.5, false));
        let c = push_tracked(&mut q, pkt(1.0, true));
        push_tracked(&mut q, pkt(1.5, false));
        push_tracked(&mut q, pkt(2.0, true)); // closes c's block
        q.compute_prune_target();
        assert_eq!(q.next_prune_target, Some(b));
        assert_eq!(q.seek_start, q.get(c).unwrap().kf_seek_pts);
    }

    #[test]
    fn splice_front_preserves_both_id_spaces() {
        let mut newer = Queue::new();
        let n0 = newer.push_back(pkt(10.0, true));
        newer.keyframe_latest = Some(n0);

        let mut older = Queue::new();
        let o0 = older.push_back(pkt(9.0, true));
        let o1 = older.push_back(pkt(9.5, false));
        older.seek_start = Some(9.0);

        newer.splice_front(older);
        assert_eq!(newer.len(), 3);
        assert_eq!(newer.head_seq(), Some(o0));
        assert_eq!(newer.get(o1).unwrap().dts, Some(9.5));
        assert_eq!(newer.seek_start, Some(9.0));
        // The spliced-in block's successor keyframe id was remapped.
        let kl = newer.keyframe_latest.unwrap();
        assert_eq!(newer.get(kl).unwrap().dts, Some(10.0));
    }
}
