use kiln_common::ObjectId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How a consumer holds its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    /// The target is part of the consumer and dies with it once every other
    /// consumer is dying too.
    Owns,
    /// The target is shared; it dies only when its last consumer lets go.
    References,
}

#[derive(Debug, Default)]
struct Node {
    consumers: BTreeMap<ObjectId, EdgeKind>,
    dependencies: BTreeSet<ObjectId>,
}

#[derive(Debug, Default)]
struct Ledger {
    nodes: BTreeMap<ObjectId, Node>,
    pending: BTreeSet<ObjectId>,
    finalizing: BTreeSet<ObjectId>,
}

impl Ledger {
    fn accepts(&self, id: ObjectId) -> bool {
        (id.is_root() || self.nodes.contains_key(&id)) && !self.finalizing.contains(&id)
    }

    /// Mark every object whose consumers are all pending and at least one of
    /// which owns it.
    fn propagate(&mut self) -> usize {
        let mut marked = 0;
        let mut work: Vec<ObjectId> = self.pending.iter().copied().collect();
        while let Some(dying) = work.pop() {
            let Some(node) = self.nodes.get(&dying) else {
                continue;
            };
            for dep in node.dependencies.clone() {
                if self.pending.contains(&dep) || self.finalizing.contains(&dep) {
                    continue;
                }
                let Some(dep_node) = self.nodes.get(&dep) else {
                    continue;
                };
                let owned = dep_node.consumers.values().any(|k| *k == EdgeKind::Owns);
                let orphaned = dep_node.consumers.keys().all(|c| self.pending.contains(c));
                if owned && orphaned {
                    self.pending.insert(dep);
                    work.push(dep);
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Drop a finalized object and its edges. Dependencies left without
    /// consumers become pending.
    fn detach(&mut self, id: ObjectId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        for dep in node.dependencies {
            if let Some(dep_node) = self.nodes.get_mut(&dep) {
                dep_node.consumers.remove(&id);
                if dep_node.consumers.is_empty() && !self.finalizing.contains(&dep) {
                    self.pending.insert(dep);
                }
            }
        }
        for consumer in node.consumers.keys() {
            if let Some(consumer_node) = self.nodes.get_mut(consumer) {
                consumer_node.dependencies.remove(&id);
            }
        }
    }
}

/// Consumer sets and the pending-deallocation list of every scene object.
///
/// Cloning shares the ledger. All operations take the internal lock, so
/// references may be added and removed from any thread; the sweep itself runs
/// only at the synchronization point.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    ledger: Arc<Mutex<Ledger>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id` with no consumers. A fresh object is not pending.
    pub fn register(&self, id: ObjectId) {
        self.ledger.lock().nodes.entry(id).or_default();
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.ledger.lock().nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ledger.lock().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record that `consumer` holds `target`. Adding the same consumer again
    /// only updates the edge kind. A pending target is taken off the pending
    /// list. Refused for unknown objects and for objects being finalized.
    pub fn add_ref(&self, target: ObjectId, consumer: ObjectId, kind: EdgeKind) -> bool {
        let mut ledger = self.ledger.lock();
        if target.is_root() || !ledger.accepts(target) || !ledger.accepts(consumer) {
            tracing::warn!(%target, %consumer, "add_ref refused");
            return false;
        }
        if let Some(node) = ledger.nodes.get_mut(&target) {
            node.consumers.insert(consumer, kind);
        }
        if let Some(node) = ledger.nodes.get_mut(&consumer) {
            node.dependencies.insert(target);
        }
        if ledger.pending.remove(&target) {
            tracing::trace!(%target, %consumer, "deallocation undone by add_ref");
        }
        true
    }

    /// Drop `consumer`'s hold on `target`. The target becomes pending when no
    /// consumers remain. Returns `false` when there was no such edge.
    pub fn remove_ref(&self, target: ObjectId, consumer: ObjectId) -> bool {
        let mut ledger = self.ledger.lock();
        let Some(node) = ledger.nodes.get_mut(&target) else {
            return false;
        };
        if node.consumers.remove(&consumer).is_none() {
            return false;
        }
        let now_unreferenced = node.consumers.is_empty();
        if let Some(consumer_node) = ledger.nodes.get_mut(&consumer) {
            consumer_node.dependencies.remove(&target);
        }
        if now_unreferenced && !ledger.finalizing.contains(&target) {
            ledger.pending.insert(target);
            tracing::trace!(%target, "pending deallocation");
        }
        true
    }

    pub fn ref_count(&self, id: ObjectId) -> Option<usize> {
        self.ledger.lock().nodes.get(&id).map(|n| n.consumers.len())
    }

    pub fn consumers(&self, id: ObjectId) -> Vec<(ObjectId, EdgeKind)> {
        self.ledger
            .lock()
            .nodes
            .get(&id)
            .map(|n| n.consumers.iter().map(|(c, k)| (*c, *k)).collect())
            .unwrap_or_default()
    }

    /// Objects `id` holds, in id order.
    pub fn dependencies(&self, id: ObjectId) -> Vec<ObjectId> {
        self.ledger
            .lock()
            .nodes
            .get(&id)
            .map(|n| n.dependencies.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The first consumer that owns `id`.
    pub fn owner_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.ledger
            .lock()
            .nodes
            .get(&id)?
            .consumers
            .iter()
            .find(|(_, k)| **k == EdgeKind::Owns)
            .map(|(c, _)| *c)
    }

    /// Put `id` on the pending list regardless of its consumers.
    pub fn deallocate(&self, id: ObjectId) -> bool {
        let mut ledger = self.ledger.lock();
        if !ledger.nodes.contains_key(&id) || ledger.finalizing.contains(&id) {
            return false;
        }
        ledger.pending.insert(id)
    }

    pub fn deallocate_undo(&self, id: ObjectId) -> bool {
        self.ledger.lock().pending.remove(&id)
    }

    pub fn is_pending(&self, id: ObjectId) -> bool {
        self.ledger.lock().pending.contains(&id)
    }

    pub fn pending(&self) -> Vec<ObjectId> {
        self.ledger.lock().pending.iter().copied().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.ledger.lock().pending.len()
    }

    /// Deallocation sweep.
    ///
    /// Repeats until nothing is pending: propagate through owning edges,
    /// finalize the whole pending batch in id order via `finalize` (called
    /// without the lock held), then detach the batch so that dependencies
    /// left without consumers join the next batch. Returns every finalized
    /// id in finalization order.
    pub fn sweep(&self, mut finalize: impl FnMut(ObjectId)) -> Vec<ObjectId> {
        let mut finalized = Vec::new();
        loop {
            let batch: Vec<ObjectId> = {
                let mut ledger = self.ledger.lock();
                let propagated = ledger.propagate();
                if propagated > 0 {
                    tracing::trace!(propagated, "ownership propagated");
                }
                let batch: Vec<ObjectId> = std::mem::take(&mut ledger.pending).into_iter().collect();
                ledger.finalizing.extend(batch.iter().copied());
                batch
            };
            if batch.is_empty() {
                break;
            }

            for &id in &batch {
                finalize(id);
            }

            let mut ledger = self.ledger.lock();
            for &id in &batch {
                ledger.detach(id);
            }
            for id in &batch {
                ledger.finalizing.remove(id);
            }
            drop(ledger);
            finalized.extend(batch);
        }
        finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ObjectId> {
        (0..n).map(|_| ObjectId::next()).collect()
    }

    fn ledger_with(ids: &[ObjectId]) -> Lifecycle {
        let lifecycle = Lifecycle::new();
        for id in ids {
            lifecycle.register(*id);
        }
        lifecycle
    }

    #[test]
    fn add_ref_is_idempotent() {
        let [a, b] = ids(2)[..] else { unreachable!() };
        let lc = ledger_with(&[a, b]);
        assert!(lc.add_ref(a, b, EdgeKind::References));
        assert!(lc.add_ref(a, b, EdgeKind::References));
        assert_eq!(lc.ref_count(a), Some(1));
        assert_eq!(lc.dependencies(b), vec![a]);
    }

    #[test]
    fn add_then_remove_is_neutral() {
        let [a, b, c] = ids(3)[..] else { unreachable!() };
        let lc = ledger_with(&[a, b, c]);
        lc.add_ref(a, b, EdgeKind::Owns);
        lc.add_ref(a, c, EdgeKind::References);
        lc.remove_ref(a, c);
        assert_eq!(lc.ref_count(a), Some(1));
        assert!(!lc.is_pending(a));
        assert!(lc.sweep(|_| {}).is_empty());
    }

    #[test]
    fn last_remove_marks_pending() {
        let [a] = ids(1)[..] else { unreachable!() };
        let lc = ledger_with(&[a]);
        lc.add_ref(a, ObjectId::ROOT, EdgeKind::Owns);
        assert!(lc.remove_ref(a, ObjectId::ROOT));
        assert!(lc.is_pending(a));
        assert!(!lc.remove_ref(a, ObjectId::ROOT));
    }

    #[test]
    fn add_ref_before_sweep_resurrects() {
        let [a] = ids(1)[..] else { unreachable!() };
        let lc = ledger_with(&[a]);
        lc.add_ref(a, ObjectId::ROOT, EdgeKind::Owns);
        lc.remove_ref(a, ObjectId::ROOT);
        lc.add_ref(a, ObjectId::ROOT, EdgeKind::Owns);

        let mut finalized = Vec::new();
        lc.sweep(|id| finalized.push(id));
        assert!(finalized.is_empty());
        assert!(lc.contains(a));
    }

    #[test]
    fn deallocate_and_undo_are_idempotent() {
        let [a] = ids(1)[..] else { unreachable!() };
        let lc = ledger_with(&[a]);
        assert!(lc.deallocate(a));
        assert!(!lc.deallocate(a));
        assert!(lc.deallocate_undo(a));
        assert!(!lc.deallocate_undo(a));
        assert_eq!(lc.pending_count(), 0);
    }

    #[test]
    fn owned_subtree_dies_in_one_batch() {
        let [actor, mesh, material, other] = ids(4)[..] else { unreachable!() };
        let lc = ledger_with(&[actor, mesh, material, other]);
        lc.add_ref(actor, ObjectId::ROOT, EdgeKind::Owns);
        lc.add_ref(mesh, actor, EdgeKind::Owns);
        lc.add_ref(material, actor, EdgeKind::Owns);
        lc.add_ref(material, mesh, EdgeKind::References);
        lc.add_ref(other, ObjectId::ROOT, EdgeKind::Owns);

        lc.remove_ref(actor, ObjectId::ROOT);
        let mut finalized = Vec::new();
        lc.sweep(|id| finalized.push(id));

        let mut expected = vec![actor, mesh, material];
        expected.sort();
        assert_eq!(finalized, expected);
        assert!(!lc.contains(actor));
        assert!(lc.contains(other));
        assert_eq!(lc.len(), 1);
    }

    #[test]
    fn shared_dependency_survives_while_referenced() {
        let [a, b, shared] = ids(3)[..] else { unreachable!() };
        let lc = ledger_with(&[a, b, shared]);
        lc.add_ref(a, ObjectId::ROOT, EdgeKind::Owns);
        lc.add_ref(b, ObjectId::ROOT, EdgeKind::Owns);
        lc.add_ref(shared, a, EdgeKind::Owns);
        lc.add_ref(shared, b, EdgeKind::References);

        lc.remove_ref(a, ObjectId::ROOT);
        assert_eq!(lc.sweep(|_| {}), vec![a]);
        assert!(lc.contains(shared));
        assert_eq!(lc.consumers(shared), vec![(b, EdgeKind::References)]);

        lc.remove_ref(b, ObjectId::ROOT);
        let finalized = lc.sweep(|_| {});
        assert_eq!(finalized, vec![b, shared]);
    }

    #[test]
    fn released_reference_cascades_in_same_sweep() {
        let [mesh, material] = ids(2)[..] else { unreachable!() };
        let lc = ledger_with(&[mesh, material]);
        lc.add_ref(mesh, ObjectId::ROOT, EdgeKind::Owns);
        lc.add_ref(material, mesh, EdgeKind::References);
        lc.remove_ref(mesh, ObjectId::ROOT);

        let finalized = lc.sweep(|_| {});
        assert_eq!(finalized, vec![mesh, material]);
        assert!(lc.is_empty());
    }

    #[test]
    fn add_ref_during_finalize_is_refused() {
        let [a, b] = ids(2)[..] else { unreachable!() };
        let lc = ledger_with(&[a, b]);
        lc.deallocate(a);
        let inner = lc.clone();
        lc.sweep(|id| {
            assert!(!inner.add_ref(id, b, EdgeKind::References));
        });
        assert!(!lc.contains(a));
        assert!(lc.dependencies(b).is_empty());
    }

    #[test]
    fn peer_cycle_is_never_collected() {
        let [a, b] = ids(2)[..] else { unreachable!() };
        let lc = ledger_with(&[a, b]);
        lc.add_ref(a, ObjectId::ROOT, EdgeKind::Owns);
        lc.add_ref(a, b, EdgeKind::References);
        lc.add_ref(b, a, EdgeKind::References);
        lc.remove_ref(a, ObjectId::ROOT);
        assert!(lc.sweep(|_| {}).is_empty());
        assert_eq!(lc.len(), 2);
    }

    #[test]
    fn explicit_deallocate_detaches_from_live_consumers() {
        let [a, holder] = ids(2)[..] else { unreachable!() };
        let lc = ledger_with(&[a, holder]);
        lc.add_ref(a, holder, EdgeKind::References);
        lc.deallocate(a);
        assert_eq!(lc.sweep(|_| {}), vec![a]);
        assert!(lc.dependencies(holder).is_empty());
        assert!(!lc.is_pending(holder));
    }

    #[test]
    fn concurrent_refs_keep_counts_exact() {
        let target = ObjectId::next();
        let consumers = ids(8);
        let lc = ledger_with(&consumers);
        lc.register(target);
        lc.add_ref(target, ObjectId::ROOT, EdgeKind::Owns);

        let handles: Vec<_> = consumers
            .iter()
            .map(|&c| {
                let lc = lc.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        lc.add_ref(target, c, EdgeKind::References);
                        lc.remove_ref(target, c);
                    }
                    lc.add_ref(target, c, EdgeKind::References);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(lc.ref_count(target), Some(9));
        assert!(!lc.is_pending(target));
    }
}
