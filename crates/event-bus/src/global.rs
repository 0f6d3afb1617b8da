//! Process-wide bus accessor.
//!
//! Optional convenience for applications that want a single shared bus
//! without threading a handle through every constructor. Nothing inside the
//! crate depends on it.

use crate::bus::EventBus;
use crate::config::EventBusConfig;
use parking_lot::{const_rwlock, RwLock};
use tracing::{info, warn};

static GLOBAL_BUS: RwLock<Option<EventBus>> = const_rwlock(None);

/// The process-wide bus, created from `EventBusConfig::from_env()` on first
/// use.
///
/// An invalid environment configuration falls back to the defaults.
pub fn global_bus() -> EventBus {
    if let Some(bus) = GLOBAL_BUS.read().as_ref() {
        return bus.clone();
    }

    let mut slot = GLOBAL_BUS.write();
    slot.get_or_insert_with(|| {
        let bus = EventBus::new(EventBusConfig::from_env()).unwrap_or_else(|e| {
            warn!(error = %e, "Invalid event bus environment, using defaults");
            EventBus::with_defaults()
        });
        info!("Global event bus initialized");
        bus
    })
    .clone()
}

/// Install `bus` as the process-wide bus, returning the previous one.
pub fn set_global_bus(bus: EventBus) -> Option<EventBus> {
    GLOBAL_BUS.write().replace(bus)
}

/// Remove the process-wide bus; the next `global_bus()` builds a fresh one.
pub fn take_global_bus() -> Option<EventBus> {
    GLOBAL_BUS.write().take()
}
