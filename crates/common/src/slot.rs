use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// Errors from slot allocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    #[error("slot allocator '{name}' exhausted: all {capacity} slots are in use")]
    Exhausted { name: String, capacity: usize },
}

/// Free-list allocator over a bounded set of discrete slots, e.g. the layers
/// of a shadow-map array texture.
///
/// Freed values are handed out again most-recently-freed first. The allocator
/// never grows: allocating from an empty free list is an error.
///
/// Internally locked; may be shared between the update and render threads.
pub struct SlotAllocator<T> {
    name: String,
    state: Mutex<SlotState<T>>,
}

struct SlotState<T> {
    used: HashSet<T>,
    free: Vec<T>,
}

impl<T> SlotAllocator<T>
where
    T: Copy + Eq + Hash,
{
    /// Build an allocator whose whole domain starts out free. Duplicate
    /// domain values are ignored. The first value of the domain is the first
    /// one allocated.
    pub fn new(name: impl Into<String>, domain: impl IntoIterator<Item = T>) -> Self {
        let mut seen = HashSet::new();
        let mut free: Vec<T> = domain.into_iter().filter(|v| seen.insert(*v)).collect();
        free.reverse();
        Self {
            name: name.into(),
            state: Mutex::new(SlotState {
                used: HashSet::new(),
                free,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take a free slot.
    pub fn alloc(&self) -> Result<T, SlotError> {
        let mut state = self.state.lock();
        match state.free.pop() {
            Some(value) => {
                state.used.insert(value);
                Ok(value)
            }
            None => Err(SlotError::Exhausted {
                name: self.name.clone(),
                capacity: state.used.len(),
            }),
        }
    }

    /// Return a slot. Freeing a value that is not in use does nothing and
    /// returns `false`.
    pub fn free(&self, value: T) -> bool {
        let mut state = self.state.lock();
        if state.used.remove(&value) {
            state.free.push(value);
            true
        } else {
            false
        }
    }

    pub fn is_used(&self, value: T) -> bool {
        self.state.lock().used.contains(&value)
    }

    pub fn used_count(&self) -> usize {
        self.state.lock().used.len()
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Total number of slots in the domain.
    pub fn capacity(&self) -> usize {
        let state = self.state.lock();
        state.used.len() + state.free.len()
    }
}

impl<T> fmt::Debug for SlotAllocator<T>
where
    T: Copy + Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SlotAllocator")
            .field("name", &self.name)
            .field("used", &state.used.len())
            .field("free", &state.free.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn allocates_whole_domain_then_fails() {
        let slots = SlotAllocator::new("point", 0u32..4);
        let mut taken = Vec::new();
        for _ in 0..4 {
            taken.push(slots.alloc().unwrap());
        }
        taken.sort();
        assert_eq!(taken, vec![0, 1, 2, 3]);

        let err = slots.alloc().unwrap_err();
        assert_eq!(
            err,
            SlotError::Exhausted {
                name: "point".into(),
                capacity: 4
            }
        );
    }

    #[test]
    fn first_allocation_is_first_domain_value() {
        let slots = SlotAllocator::new("dir", 10u32..13);
        assert_eq!(slots.alloc().unwrap(), 10);
        assert_eq!(slots.alloc().unwrap(), 11);
    }

    #[test]
    fn reuse_is_lifo() {
        let slots = SlotAllocator::new("point", 0u32..3);
        let a = slots.alloc().unwrap();
        let b = slots.alloc().unwrap();
        let c = slots.alloc().unwrap();
        assert!(slots.alloc().is_err());

        assert!(slots.free(a));
        assert!(slots.free(c));
        assert_eq!(slots.alloc().unwrap(), c);
        assert_eq!(slots.alloc().unwrap(), a);
        assert!(slots.is_used(b));
    }

    #[test]
    fn freeing_unused_value_is_noop() {
        let slots = SlotAllocator::new("point", 0u32..2);
        assert!(!slots.free(1));
        assert!(!slots.free(99));
        assert_eq!(slots.free_count(), 2);

        let v = slots.alloc().unwrap();
        assert!(slots.free(v));
        assert!(!slots.free(v));
        assert_eq!(slots.free_count(), 2);
        assert_eq!(slots.used_count(), 0);
    }

    #[test]
    fn used_and_free_partition_the_domain() {
        let slots = SlotAllocator::new("point", [1u32, 2, 2, 3, 4]);
        assert_eq!(slots.capacity(), 4);
        let a = slots.alloc().unwrap();
        slots.alloc().unwrap();
        slots.free(a);
        for v in 1..=4 {
            let used = slots.is_used(v);
            let total = slots.used_count() + slots.free_count();
            assert_eq!(total, 4);
            if used {
                assert_ne!(v, a);
            }
        }
    }

    #[test]
    fn concurrent_alloc_never_hands_out_a_slot_twice() {
        let slots = Arc::new(SlotAllocator::new("shared", 0u32..64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slots = Arc::clone(&slots);
                std::thread::spawn(move || {
                    (0..16).map(|_| slots.alloc().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 64);
        assert!(slots.alloc().is_err());
    }
}
