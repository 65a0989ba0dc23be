use std::{collections::HashMap, sync::Mutex};

/// In-memory, process-wide mapping from owner to current store count.
/// Consulted (and updated) by the intent layer before a create is
/// allowed to reach the cluster API.
pub struct OwnerQuota {
    cap: u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl OwnerQuota {
    pub fn new(cap: u32) -> Self {
        Self {
            cap,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Reserves a slot for `owner` if they're under cap, returning
    /// whether the reservation succeeded. Guarded by a single mutex
    /// around the read-check-update so concurrent creates can't both
    /// observe room for the last slot.
    pub fn try_reserve(&self, owner: &str) -> bool {
        let mut counts = self.counts.lock().expect("quota mutex poisoned");
        let count = counts.entry(owner.to_string()).or_insert(0);
        if *count >= self.cap {
            return false;
        }
        *count += 1;
        true
    }

    pub fn release(&self, owner: &str) {
        let mut counts = self.counts.lock().expect("quota mutex poisoned");
        if let Some(count) = counts.get_mut(owner) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn count(&self, owner: &str) -> u32 {
        *self
            .counts
            .lock()
            .expect("quota mutex poisoned")
            .get(owner)
            .unwrap_or(&0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_denies_once_cap_is_reached() {
        let quota = OwnerQuota::new(2);
        assert!(quota.try_reserve("alice"));
        assert!(quota.try_reserve("alice"));
        assert!(!quota.try_reserve("alice"));
    }

    #[test]
    fn owners_are_tracked_independently() {
        let quota = OwnerQuota::new(1);
        assert!(quota.try_reserve("alice"));
        assert!(quota.try_reserve("bob"));
    }

    #[test]
    fn release_frees_a_slot() {
        let quota = OwnerQuota::new(1);
        assert!(quota.try_reserve("alice"));
        assert!(!quota.try_reserve("alice"));
        quota.release("alice");
        assert!(quota.try_reserve("alice"));
    }
}
