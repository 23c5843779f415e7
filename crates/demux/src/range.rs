//! Cached ranges — contiguous buffered spans across all streams.

use vireo_common::{pts_max, pts_min};

use crate::queue::Queue;

/// A continuous range of cached packets covering every known stream (one
/// [`Queue`] per stream, indexed by stream index).
///
/// The aggregate `seek_start`/`seek_end` pair is the playable window of the
/// range: the intersection of the per-stream windows over *selected*
/// streams. Unlike the per-queue values it is always either fully valid or
/// fully unknown.
#[derive(Debug)]
pub(crate) struct CachedRange {
    pub streams: Vec<Queue>,
    pub seek_start: Option<f64>,
    pub seek_end: Option<f64>,
}

impl CachedRange {
    pub fn new(num_streams: usize) -> Self {
        Self {
            streams: (0..num_streams).map(|_| Queue::new()).collect(),
            seek_start: None,
            seek_end: None,
        }
    }

    /// Grow the per-stream queue list to cover newly registered streams.
    pub fn add_missing_streams(&mut self, num_streams: usize) {
        while self.streams.len() < num_streams {
            self.streams.push(Queue::new());
        }
    }

    /// Recompute the aggregate seekable window from the per-queue windows.
    /// Any selected queue without a closed keyframe block collapses the
    /// whole window to unknown, as does an empty intersection.
    pub fn update_seek_ranges(&mut self, selected: impl Fn(usize) -> bool) {
        self.seek_start = None;
        self.seek_end = None;

        for (n, queue) in self.streams.iter().enumerate() {
            if !selected(n) {
                continue;
            }
            self.seek_start = pts_max(self.seek_start, queue.seek_start);
            self.seek_end = pts_min(self.seek_end, queue.seek_end);

            if queue.seek_start.is_none() || queue.seek_end.is_none() {
                self.seek_start = None;
                self.seek_end = None;
                return;
            }
        }

        if let (Some(start), Some(end)) = (self.seek_start, self.seek_end) {
            if start >= end {
                self.seek_start = None;
                self.seek_end = None;
            }
        }
    }

    /// Whether `pts` falls inside the (valid) seekable window.
    pub fn contains(&self, pts: f64) -> bool {
        matches!((self.seek_start, self.seek_end),
            (Some(start), Some(end)) if pts >= start && pts <= end)
    }

    /// Drop all packets in all queues; returns the estimated bytes freed.
    pub fn clear(&mut self) -> usize {
        let mut freed = 0;
        for queue in &mut self.streams {
            freed += queue.reset();
        }
        self.seek_start = None;
        self.seek_end = None;
        freed
    }
}
