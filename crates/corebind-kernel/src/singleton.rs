//! Reference bookkeeping: per-client singleton bind counters and
//! per-server reference counts.
//!
//! A singleton server may be bound by many logical clients through the same
//! slot.  [`SingletonCounters`] keeps one counter per (slot, logical client);
//! the physical binding exists exactly while the sum over all clients is
//! non-zero.

use std::collections::HashMap;

use corebind_types::{BindError, ClientId, ComponentId, InterfaceDesc};
use parking_lot::Mutex;

/// Identity of a required interface element.
pub type SlotKey = (ComponentId, usize, usize);

pub fn slot_key(desc: &InterfaceDesc) -> SlotKey {
    (desc.component, desc.slot, desc.index)
}

/// Bind counters of singleton bindings, per slot and logical client.
#[derive(Default, Debug)]
pub struct SingletonCounters {
    counts: HashMap<SlotKey, HashMap<ClientId, u32>>,
}

impl SingletonCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more bind by `client`.  Returns the new total for the slot.
    pub fn increment(&mut self, key: SlotKey, client: ClientId) -> u32 {
        let per_client = self.counts.entry(key).or_default();
        *per_client.entry(client).or_default() += 1;
        per_client.values().sum()
    }

    /// Count one unbind by `client`.  Returns the remaining total.
    ///
    /// # Errors
    ///
    /// [`BindError::NotFound`] when `client` holds no bind on the slot.
    pub fn decrement(&mut self, key: SlotKey, client: ClientId) -> Result<u32, BindError> {
        let per_client = self
            .counts
            .get_mut(&key)
            .ok_or_else(|| Self::not_held(key, client))?;
        let count = per_client
            .get_mut(&client)
            .ok_or_else(|| Self::not_held(key, client))?;
        *count -= 1;
        if *count == 0 {
            per_client.remove(&client);
        }
        let remaining = per_client.values().sum();
        if remaining == 0 {
            self.counts.remove(&key);
        }
        Ok(remaining)
    }

    /// Binds `client` holds on the slot.
    pub fn held_by(&self, key: SlotKey, client: ClientId) -> u32 {
        self.counts
            .get(&key)
            .and_then(|c| c.get(&client))
            .copied()
            .unwrap_or(0)
    }

    /// Sum over every client.
    pub fn total(&self, key: SlotKey) -> u32 {
        self.counts.get(&key).map(|c| c.values().sum()).unwrap_or(0)
    }

    fn not_held((component, slot, index): SlotKey, client: ClientId) -> BindError {
        BindError::NotFound(format!(
            "client {} holds no binding on {component} slot {slot}[{index}]",
            client.0
        ))
    }
}

/// Number of physical bindings targeting each server.
#[derive(Default, Debug)]
pub struct ServerRefCounts {
    counts: Mutex<HashMap<ComponentId, usize>>,
}

impl ServerRefCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, server: ComponentId) {
        *self.counts.lock().entry(server).or_default() += 1;
    }

    /// Drop one reference.  Releasing an unreferenced server is a no-op.
    pub fn release(&self, server: ComponentId) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(&server) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&server);
            }
        }
    }

    pub fn count(&self, server: ComponentId) -> usize {
        self.counts.lock().get(&server).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: SlotKey = (ComponentId(1), 0, 0);

    #[test]
    fn totals_sum_over_clients() {
        let mut c = SingletonCounters::new();
        assert_eq!(c.increment(KEY, ClientId(1)), 1);
        assert_eq!(c.increment(KEY, ClientId(2)), 2);
        assert_eq!(c.increment(KEY, ClientId(1)), 3);
        assert_eq!(c.held_by(KEY, ClientId(1)), 2);
        assert_eq!(c.total(KEY), 3);
    }

    #[test]
    fn decrement_reaches_zero_once() {
        let mut c = SingletonCounters::new();
        c.increment(KEY, ClientId(1));
        c.increment(KEY, ClientId(2));
        assert_eq!(c.decrement(KEY, ClientId(2)).unwrap(), 1);
        assert_eq!(c.decrement(KEY, ClientId(1)).unwrap(), 0);
        assert_eq!(c.total(KEY), 0);
        assert!(matches!(c.decrement(KEY, ClientId(1)), Err(BindError::NotFound(_))));
    }

    #[test]
    fn client_without_binds_cannot_decrement() {
        let mut c = SingletonCounters::new();
        c.increment(KEY, ClientId(1));
        assert!(c.decrement(KEY, ClientId(9)).is_err());
        assert_eq!(c.total(KEY), 1);
    }

    #[test]
    fn server_refcounts() {
        let refs = ServerRefCounts::new();
        refs.acquire(ComponentId(5));
        refs.acquire(ComponentId(5));
        refs.release(ComponentId(5));
        assert_eq!(refs.count(ComponentId(5)), 1);
        refs.release(ComponentId(5));
        refs.release(ComponentId(5));
        assert_eq!(refs.count(ComponentId(5)), 0);
    }
}
