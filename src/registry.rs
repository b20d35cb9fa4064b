//! Hook handle to engine instance registry.
//!
//! OS hook APIs call a free function, so each backend's trampoline needs a
//! way back to the engine that installed the hook. Backends register the
//! engine's sink under an opaque handle (passed to the OS as user data where
//! the API allows it, the hook thread id otherwise) and look it up on every
//! callback. The lock is held only for the lookup; the sink runs after it is
//! released.

use crate::event::RawEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

/// Receiver of raw events from a hook trampoline.
pub(crate) trait InputSink: Send + Sync {
    /// Handle one event. Must not block.
    fn on_event(&self, event: RawEvent);
}

static SINKS: LazyLock<Mutex<HashMap<u64, Arc<dyn InputSink>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh handle.
pub(crate) fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Register `sink` under `handle`, replacing any previous entry.
pub(crate) fn insert(handle: u64, sink: Arc<dyn InputSink>) {
    SINKS
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(handle, sink);
}

/// Register `sink` under a fresh handle.
pub(crate) fn register(sink: Arc<dyn InputSink>) -> u64 {
    let handle = next_handle();
    insert(handle, sink);
    handle
}

/// Remove the entry for `handle`. No callback reaches it afterwards.
pub(crate) fn remove(handle: u64) -> bool {
    SINKS
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&handle)
        .is_some()
}

/// Look up the sink for `handle`.
pub(crate) fn lookup(handle: u64) -> Option<Arc<dyn InputSink>> {
    SINKS
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&handle)
        .cloned()
}

/// Forward `event` to the sink registered under `handle`, if any.
pub(crate) fn dispatch(handle: u64, event: RawEvent) -> bool {
    match lookup(handle) {
        Some(sink) => {
            sink.on_event(event);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Collect(StdMutex<Vec<RawEvent>>);

    impl InputSink for Collect {
        fn on_event(&self, event: RawEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        let ha = register(a.clone());
        let hb = register(b.clone());
        assert_ne!(ha, hb);

        assert!(dispatch(ha, RawEvent::moved(1.0, 1.0)));
        assert!(dispatch(hb, RawEvent::moved(2.0, 2.0)));
        assert!(dispatch(hb, RawEvent::moved(3.0, 3.0)));
        assert_eq!(a.0.lock().unwrap().len(), 1);
        assert_eq!(b.0.lock().unwrap().len(), 2);

        assert!(remove(ha));
        assert!(!remove(ha));
        assert!(!dispatch(ha, RawEvent::moved(4.0, 4.0)));
        assert_eq!(a.0.lock().unwrap().len(), 1);
        remove(hb);
    }

    #[test]
    fn test_sink_may_reenter_registry() {
        struct Reentrant(u64);
        impl InputSink for Reentrant {
            fn on_event(&self, _event: RawEvent) {
                // Would deadlock if the lookup lock were still held.
                assert!(lookup(self.0).is_some());
            }
        }
        let handle = next_handle();
        insert(handle, Arc::new(Reentrant(handle)));
        assert!(dispatch(handle, RawEvent::moved(0.0, 0.0)));
        remove(handle);
    }
}
