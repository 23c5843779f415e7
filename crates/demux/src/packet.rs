//! Demuxed packets — output of the producer, input to decoders.

use bytes::Bytes;

/// Rough per-packet bookkeeping overhead added to the payload length when
/// estimating cache memory use (struct, queue slot, allocator slack).
const PACKET_OVERHEAD: usize = 112;

/// One unit of demuxed data: an opaque payload plus timing and framing
/// metadata. Immutable once enqueued (the cache assigns `kf_seek_pts`
/// lazily, everything else is producer-set).
#[derive(Clone, Debug)]
pub struct Packet {
    /// Compressed payload bytes. `Bytes` so that dequeued copies share the
    /// allocation with the cached original.
    pub data: Bytes,
    /// Presentation timestamp in seconds (`None` if unknown).
    pub pts: Option<f64>,
    /// Decode timestamp in seconds (`None` if unknown).
    pub dts: Option<f64>,
    /// Byte position in the source, if the producer knows it.
    pub pos: Option<u64>,
    /// Whether decoding can start at this packet.
    pub keyframe: bool,
    /// Whether this packet came from a bounded segment; if set, `start`
    /// and `end` clamp which timestamps count for seek-range accounting.
    pub segmented: bool,
    /// Segment start time (only meaningful when `segmented`).
    pub start: Option<f64>,
    /// Segment end time (only meaningful when `segmented`).
    pub end: Option<f64>,
    /// Index of the stream this packet belongs to (assigned on add).
    pub stream: usize,
    /// Earliest presentation time reachable by decoding from this keyframe.
    /// Assigned when the *next* keyframe closes the block this packet
    /// starts; `None` until then and on non-keyframes.
    pub(crate) kf_seek_pts: Option<f64>,
}

impl Packet {
    /// Create a packet with the given payload and no timing information.
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            pts: None,
            dts: None,
            pos: None,
            keyframe: false,
            segmented: false,
            start: None,
            end: None,
            stream: 0,
            kf_seek_pts: None,
        }
    }

    /// Estimated total memory footprint of this packet in the cache.
    pub fn estimate_size(&self) -> usize {
        self.data.len() + PACKET_OVERHEAD
    }

    /// The timestamp used for ordering decisions: DTS, falling back to PTS.
    pub fn ts(&self) -> Option<f64> {
        self.dts.or(self.pts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_includes_overhead() {
        let p = Packet::new(Bytes::from(vec![0u8; 1000]));
        assert_eq!(p.estimate_size(), 1000 + PACKET_OVERHEAD);
    }

    #[test]
    fn ts_prefers_dts() {
        let mut p = Packet::new(Bytes::new());
        p.pts = Some(2.0);
        assert_eq!(p.ts(), Some(2.0));
        p.dts = Some(1.0);
        assert_eq!(p.ts(), Some(1.0));
    }
}
