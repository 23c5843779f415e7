//! `vireo-demux` — the buffering demuxer layer.
//!
//! Sits between a raw format parser (the [`Producer`]) and decoder
//! consumers. Converts the producer's packet stream into a time-indexed,
//! seekable, concurrency-safe cache:
//!
//! - a dedicated read-ahead thread decouples producer I/O from real-time
//!   consumption,
//! - per-stream packet queues with byte, time, and back-buffer budgets,
//! - a multi-range seekable cache with automatic range joining and pruning,
//! - mid-playback track switching with refresh seeks,
//! - metadata/state snapshots bridged between the producer and consumer
//!   views of the same demuxer.
//!
//! Format parsing, the byte stream underneath, and decoding are external
//! collaborators; packets are opaque payloads with timing metadata.

mod append;
mod queue;
mod range;
mod reader;
mod seek;
mod state;
mod thread;

pub mod demuxer;
pub mod events;
pub mod opts;
pub mod packet;
pub mod producer;
pub mod stream;

pub use demuxer::{open, open_with, BitrateStats, Demuxer, OpenParams, ReaderState};
pub use events::{DemuxerInfo, Events};
pub use opts::DemuxOptions;
pub use packet::Packet;
pub use producer::{
    CacheInfo, CheckLevel, Producer, ProducerCommand, ProducerCtx, ProducerDesc, SeekFlags,
    SourceState,
};
pub use reader::ReadStatus;
pub use stream::{CodecParams, Stream};
