//! Stream descriptors — identity and codec info for one elementary stream.

use bytes::Bytes;
use vireo_common::{StreamType, Tags};

use crate::packet::Packet;

/// Codec parameters carried through to decoders. Opaque to the buffering
/// layer; only the codec name is ever inspected (for logging).
#[derive(Clone, Debug, Default)]
pub struct CodecParams {
    /// Codec identifier, e.g. `"h264"`, `"aac"`, `"eia_608"`.
    pub codec: String,
    /// Codec-specific initialization data (SPS/PPS, ASC, ...).
    pub extra_data: Bytes,
    /// Sample rate for audio streams (0 if not applicable).
    pub samplerate: u32,
    /// Channel count for audio streams (0 if not applicable).
    pub channels: u16,
    /// Coded width/height for video streams (0 if not applicable).
    pub width: u32,
    pub height: u32,
}

/// Descriptor for one logical elementary stream.
///
/// Producers construct one per track and hand it to
/// [`ProducerCtx::add_stream`](crate::ProducerCtx::add_stream), which
/// assigns `index` (and `demuxer_id` if unset) and freezes it. After
/// registration the descriptor is immutable and shared as `Arc<Stream>`;
/// tag updates flow through the events bridge instead.
#[derive(Clone, Debug)]
pub struct Stream {
    /// Stream kind.
    pub stream_type: StreamType,
    /// Index assigned on registration; equals the position in the stream
    /// list and never changes.
    pub index: usize,
    /// Producer-visible numbering (e.g. the container's track id). When the
    /// producer leaves it `None`, registration assigns a per-type counter.
    pub demuxer_id: Option<i64>,
    /// Codec parameters, opaque to this layer.
    pub codec: CodecParams,
    /// Tags known at registration time. Later updates arrive via
    /// [`Demuxer::stream_tags`](crate::Demuxer::stream_tags).
    pub tags: Tags,
    /// A single-shot packet (e.g. embedded cover art) emitted once on the
    /// first read, after which the stream reports EOF.
    pub attached_picture: Option<Packet>,
    /// Whether the container marks this track as default.
    pub default_track: bool,
}

impl Stream {
    /// Create a blank descriptor of the given kind.
    pub fn new(stream_type: StreamType) -> Self {
        Self {
            stream_type,
            index: 0,
            demuxer_id: None,
            codec: CodecParams::default(),
            tags: Tags::new(),
            attached_picture: None,
            default_track: false,
        }
    }
}
