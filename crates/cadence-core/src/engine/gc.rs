//! RT-safe deferred reclamation for graph structures
//!
//! Every structure the audio thread reads (buses, track nodes, plugin
//! lists, send lists) lives in a `basedrop::Shared`. When the control
//! thread publishes a new snapshot, the old one may still be held by the
//! block currently being processed. Dropping the last `Shared` reference
//! never frees on the spot: the pointer is queued and the global collector
//! on the `audio-gc` thread frees it later.
//!
//! That queue is the grace period for add/remove while rolling: a plugin
//! removed from a chain is destroyed only after the audio thread released
//! the snapshot that contained it.
//!
//! ## Usage
//!
//! ```ignore
//! use basedrop::{Shared, SharedCell};
//! use crate::engine::gc::gc_handle;
//!
//! let cell = SharedCell::new(Shared::new(&gc_handle(), Vec::<u32>::new()));
//! cell.set(Shared::new(&gc_handle(), vec![1, 2, 3])); // old list reclaimed later
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread frees queued allocations
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Spawn the collector thread and return a handle to it
fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, it stays on this thread
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }

            log::info!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    match spawned.ok().and_then(|_| rx.recv().ok()) {
        Some(handle) => handle,
        None => {
            log::error!("Failed to start audio GC thread; retired graph data will be leaked");
            let collector: &'static mut Collector = Box::leak(Box::new(Collector::new()));
            collector.handle()
        }
    }
}

/// Handle for allocating `Shared<T>` values
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::{Shared, SharedCell};

    #[test]
    fn test_snapshot_survives_replacement() {
        let cell = SharedCell::new(Shared::new(&gc_handle(), vec![1, 2, 3]));
        let snapshot = cell.get();
        cell.set(Shared::new(&gc_handle(), vec![4]));

        assert_eq!(*snapshot, vec![1, 2, 3]);
        assert_eq!(*cell.get(), vec![4]);
    }
}
