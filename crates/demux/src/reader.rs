//! The consumer-facing read path and the read-ahead decision.

use parking_lot::MutexGuard;
use tracing::{debug, trace, warn};
use vireo_common::add_pts;

use crate::append::{adjust_seek_range_on_packet, prune_old_packets};
use crate::packet::Packet;
use crate::producer::{ProducerCtx, SeekFlags};
use crate::state::{Inner, ProducerSlot, Shared};

/// Minimum packet-timestamp window for a bitrate estimate, in seconds.
const BITRATE_WINDOW_SECS: f64 = 0.5;

/// Result of a non-blocking read.
#[derive(Debug)]
pub enum ReadStatus {
    /// A packet was available.
    Have(Packet),
    /// Nothing buffered yet; read-ahead was triggered and the wakeup
    /// callback will fire when data arrives.
    Pending,
    /// End of stream (or the stream is lazy and has nothing queued).
    Eof,
}

/// Remove the packet at the reader position and hand the consumer a copy
/// (the cached original stays for later in-cache seeks). Also maintains
/// bitrate stats, the file-position high-water mark, applies the
/// timestamp offset, and prunes the back buffer.
pub(crate) fn dequeue_packet(inner: &mut Inner, stream: usize) -> Option<Packet> {
    if inner.states[stream].has_attached_picture {
        inner.states[stream].eof = true;
        if inner.states[stream].attached_picture_added {
            return None;
        }
        inner.states[stream].attached_picture_added = true;
        let mut pkt = inner.streams[stream]
            .attached_picture
            .clone()
            .expect("descriptor carries the attached picture");
        pkt.stream = stream;
        return Some(pkt);
    }

    let head = inner.states[stream].reader_head?;
    let cur = inner.current_range();
    let mut pkt = inner.ranges[cur].streams[stream]
        .get(head)
        .expect("reader head is in the current queue")
        .clone();
    let next = head + 1;
    inner.states[stream].reader_head =
        (next < inner.ranges[cur].streams[stream].end_seq()).then_some(next);

    let bytes = pkt.estimate_size();
    inner.states[stream].fw_packs -= 1;
    inner.states[stream].fw_bytes -= bytes;
    inner.fw_bytes -= bytes;

    let ts = pkt.dts.or(pkt.pts);
    if ts.is_some() {
        inner.states[stream].base_ts = ts;
    }

    // Bitrate only at keyframe points: packet timestamps (not wall clock)
    // drive the window, and they may be reordered within a block.
    if pkt.keyframe {
        if let Some(ts) = ts {
            let ds = &mut inner.states[stream];
            match ds.last_br_ts {
                Some(last) if ts >= last => {
                    let d = ts - last;
                    if d >= BITRATE_WINDOW_SECS {
                        ds.bitrate = Some(ds.last_br_bytes as f64 / d);
                        ds.last_br_ts = Some(ts);
                        ds.last_br_bytes = 0;
                    }
                }
                _ => {
                    // First keyframe, or the timestamp went backwards.
                    ds.bitrate = None;
                    ds.last_br_ts = Some(ts);
                    ds.last_br_bytes = 0;
                }
            }
        }
    }
    inner.states[stream].last_br_bytes += pkt.data.len();

    let advance = match (pkt.pos, inner.filepos) {
        (Some(pos), Some(filepos)) => pos >= filepos,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if advance {
        inner.filepos = pkt.pos;
    }

    let offset = inner.ts_offset;
    pkt.pts = add_pts(pkt.pts, offset);
    pkt.dts = add_pts(pkt.dts, offset);
    pkt.start = add_pts(pkt.start, offset);
    pkt.end = add_pts(pkt.end, offset);

    prune_old_packets(inner);
    Some(pkt)
}

/// One read-ahead step. Returns true when it made progress (the lock was
/// dropped for producer I/O), so callers re-check their conditions.
///
/// Decides whether new packets are needed: a starving eager stream, a
/// refresh in progress, or buffered time below the readahead target. Also
/// enforces the forward byte cap, reporting overflow once and raising
/// soft EOF on starving streams as back-pressure.
pub(crate) fn read_packet_step(shared: &Shared, guard: &mut MutexGuard<'_, Inner>) -> bool {
    guard.eof = false;
    guard.idle = true;

    // With a thread, queued seeks run in the thread loop. Single-threaded,
    // resume seeks (range switches, joins) must run here or the producer
    // would keep reading from the wrong position.
    if guard.seeking && !guard.threading {
        crate::thread::execute_seek(shared, guard);
        return true;
    }

    if !guard.reading {
        return false;
    }

    let mut read_more = false;
    let mut prefetch_more = false;
    let cur = guard.current_range();
    for n in 0..guard.states.len() {
        let ds = &guard.states[n];
        read_more |= (ds.eager && ds.reader_head.is_none()) || ds.refreshing;
        if ds.eager && guard.readahead_secs > 0.0 {
            let queue = &guard.ranges[cur].streams[n];
            if let (Some(last_ts), Some(base_ts)) = (queue.last_ts, ds.base_ts) {
                if last_ts >= base_ts {
                    prefetch_more |= last_ts - base_ts < guard.readahead_secs;
                }
            }
        }
    }
    trace!(
        fw_bytes = guard.fw_bytes,
        read_more,
        prefetch_more,
        "readahead decision"
    );

    if guard.fw_bytes >= guard.opts.max_bytes {
        if !read_more {
            return false;
        }
        if !guard.warned_queue_overflow {
            guard.warned_queue_overflow = true;
            warn!("too many packets in the demuxer packet queues");
            for n in 0..guard.states.len() {
                let ds = &guard.states[n];
                if ds.selected {
                    warn!(
                        stream = %ds.stream_type,
                        index = n,
                        packs = ds.fw_packs,
                        bytes = ds.fw_bytes,
                        lazy = !ds.eager,
                        "overflowing stream"
                    );
                }
            }
        }
        // Starving streams can't make progress against the cap; report
        // EOF to their consumers so playback drains the queues.
        for n in 0..guard.states.len() {
            let starved = guard.states[n].reader_head.is_none();
            if starved && !guard.states[n].eof {
                if let Some(cb) = guard.wakeup_cb.clone() {
                    cb();
                }
                shared.wakeup.notify_all();
            }
            guard.states[n].eof |= starved;
        }
        return false;
    }

    let refresh_pts = guard.get_refresh_seek_pts();

    if !read_more && refresh_pts.is_none() && !prefetch_more {
        return false;
    }

    // Actually read. Drop the lock: disk or network I/O can take a while.
    guard.idle = false;
    guard.initial_state = false;

    let mut eof = true;
    let mut source = None;
    MutexGuard::unlocked(guard, || {
        let mut slot = shared.producer.lock();
        let ProducerSlot { producer, info } = &mut *slot;
        let mut ctx = ProducerCtx { shared, info };
        if let Some(pts) = refresh_pts {
            debug!(pts, "refresh seek");
            producer.seek(&mut ctx, pts, SeekFlags::HR);
        }
        if !shared.cancelled() {
            eof = producer.fill_buffer(&mut ctx) == 0;
        }
        source = Some(producer.query_source());
    });
    if let Some(state) = source {
        guard.fold_source_state(state);
    }

    if !guard.seeking {
        if eof {
            for n in 0..guard.states.len() {
                if !guard.states[n].eof {
                    // Close the keyframe block left open by the last
                    // packets of the stream.
                    adjust_seek_range_on_packet(&mut **guard, n, None);
                }
                guard.states[n].eof = true;
            }
            // Skip the wakeup if we were at EOF before (avoids a wakeup
            // feedback loop).
            if !guard.last_eof {
                if let Some(cb) = guard.wakeup_cb.clone() {
                    cb();
                }
                shared.wakeup.notify_all();
                debug!("EOF reached");
            }
        }
        guard.eof = eof;
        guard.last_eof = eof;
    }
    true
}

/// Blocking read: waits (or, single-threaded, drives read-ahead inline)
/// until a packet is available, the stream hits EOF, or it is deselected.
pub(crate) fn read_packet_blocking(shared: &Shared, stream: usize) -> Option<Packet> {
    let mut guard = shared.state.lock();
    if stream >= guard.states.len() {
        return None;
    }
    if guard.states[stream].eager {
        trace!(stream = %guard.states[stream].stream_type, "reading packet");
        guard.eof = false; // force retry
        while guard.states[stream].selected && guard.states[stream].reader_head.is_none() {
            guard.reading = true;
            if guard.threading {
                shared.wakeup.notify_all();
                shared.wakeup.wait(&mut guard);
            } else {
                read_packet_step(shared, &mut guard);
            }
            if guard.states[stream].eof {
                break;
            }
        }
    }
    let pkt = dequeue_packet(&mut guard, stream);
    guard.check_consistency();
    drop(guard);
    shared.wakeup.notify_all(); // possibly read more
    pkt
}

/// Non-blocking read. Triggers read-ahead so the wakeup callback fires
/// once data is available. Lazy (non-eager) streams report EOF instead of
/// pending — their next packet may be minutes away and must not stall the
/// caller.
pub(crate) fn read_packet_async(shared: &Shared, stream: usize) -> ReadStatus {
    let threading = shared.state.lock().threading;
    if !threading {
        return match read_packet_blocking(shared, stream) {
            Some(pkt) => ReadStatus::Have(pkt),
            None => ReadStatus::Eof,
        };
    }

    let mut guard = shared.state.lock();
    if stream >= guard.states.len() {
        return ReadStatus::Eof;
    }
    let pkt = dequeue_packet(&mut guard, stream);
    let status = if !guard.states[stream].eager {
        match pkt {
            Some(pkt) => ReadStatus::Have(pkt),
            None => ReadStatus::Eof,
        }
    } else {
        guard.reading = true; // enable readahead
        guard.eof = false; // force retry
        match pkt {
            Some(pkt) => ReadStatus::Have(pkt),
            None if guard.states[stream].eof => ReadStatus::Eof,
            None => ReadStatus::Pending,
        }
    };
    guard.check_consistency();
    drop(guard);
    shared.wakeup.notify_all();
    status
}

/// Whether a packet is queued at the reader position. Never blocks, never
/// triggers reads.
pub(crate) fn has_packet(shared: &Shared, stream: usize) -> bool {
    let guard = shared.state.lock();
    guard
        .states
        .get(stream)
        .is_some_and(|ds| ds.reader_head.is_some())
}

/// Read whichever stream has data next (single-threaded mode only).
pub(crate) fn read_any_packet(shared: &Shared) -> Option<Packet> {
    let mut guard = shared.state.lock();
    assert!(
        !guard.threading,
        "read_any_packet does not work with the demux thread running"
    );
    loop {
        for n in 0..guard.states.len() {
            guard.reading = true; // force read_packet_step to read
            if let Some(pkt) = dequeue_packet(&mut guard, n) {
                guard.check_consistency();
                return Some(pkt);
            }
        }
        let progressed = read_packet_step(shared, &mut guard);
        if !progressed || guard.eof {
            return None;
        }
    }
}
