//! The demux thread: runs read-ahead and executes queued commands.

use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::debug;

use crate::producer::{ProducerCommand, ProducerCtx};
use crate::reader::read_packet_step;
use crate::state::{Inner, ProducerSlot, Shared};

/// Thread body. Owns the state lock across the loop and drops it only
/// around producer I/O. Loop priority: queued control closure, pending
/// track switch, pending seek, read-ahead, forced source-state refresh,
/// then wait.
pub(crate) fn demux_thread(shared: Arc<Shared>) {
    let mut guard = shared.state.lock();
    while !guard.thread_terminate {
        if let Some(run_fn) = guard.run_fn.take() {
            MutexGuard::unlocked(&mut guard, || {
                let mut slot = shared.producer.lock();
                run_fn(&mut *slot);
            });
            shared.wakeup.notify_all();
            continue;
        }
        if guard.tracks_switched {
            execute_trackswitch(&shared, &mut guard);
            continue;
        }
        if guard.seeking {
            execute_seek(&shared, &mut guard);
            continue;
        }
        if !guard.eof && read_packet_step(&shared, &mut guard) {
            // The lock was dropped; conditions may have changed.
            continue;
        }
        if guard.force_cache_update {
            MutexGuard::unlocked(&mut guard, || update_cache(&shared));
            guard.force_cache_update = false;
            continue;
        }
        shared.wakeup.notify_all();
        shared.wakeup.wait(&mut guard);
    }
}

/// Run the queued low-level seek on the producer.
pub(crate) fn execute_seek(shared: &Shared, guard: &mut MutexGuard<'_, Inner>) {
    let flags = guard.seek_flags;
    let pts = guard.seek_pts;
    guard.seeking = false;
    guard.initial_state = false;

    MutexGuard::unlocked(guard, || {
        debug!(pts, ?flags, "execute seek");
        let mut slot = shared.producer.lock();
        let ProducerSlot { producer, info } = &mut *slot;
        let mut ctx = ProducerCtx { shared, info };
        producer.seek(&mut ctx, pts, flags);
        debug!("seek done");
    });
}

/// Tell the producer the selected-track set changed.
pub(crate) fn execute_trackswitch(shared: &Shared, guard: &mut MutexGuard<'_, Inner>) {
    guard.tracks_switched = false;
    let any_selected = guard.states.iter().any(|s| s.selected);

    MutexGuard::unlocked(guard, || {
        let mut slot = shared.producer.lock();
        let ProducerSlot { producer, info } = &mut *slot;
        let mut ctx = ProducerCtx { shared, info };
        producer.control(&mut ctx, ProducerCommand::SwitchedTracks { any_selected });
    });
}

/// Poll byte-source state off the producer and fold it into the cached
/// state. Must be called without the state lock held.
pub(crate) fn update_cache(shared: &Shared) {
    let state = {
        let mut slot = shared.producer.lock();
        slot.producer.query_source()
    };
    let mut guard = shared.state.lock();
    guard.fold_source_state(state);
}
