//! `vireo-common` — shared scalar types, metadata tag bags, and error types.
//!
//! Everything in here is plain data used across the engine crates:
//! stream kinds, NOPTS-aware timestamp helpers, and the thiserror-based
//! error enums.

pub mod error;
pub mod tags;
pub mod types;

pub use error::{OpenError, SeekError};
pub use tags::Tags;
pub use types::{add_pts, pts_max, pts_min, StreamType};
