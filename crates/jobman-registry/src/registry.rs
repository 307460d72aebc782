//! Thread-safe job association registry.

use crate::index::JobIndex;
use jobman_core::{Error, Job, JobId, JobSnapshot, Result};
use parking_lot::Mutex;
use tracing::{debug, error};

/// Tracks live jobs and the one-to-one link from each job to its child id.
///
/// Every operation runs under a single lock covering all indices, so
/// concurrent callers observe a linearizable sequence of complete updates.
/// Share it across tasks as `Arc<JobRegistry<J>>`.
pub struct JobRegistry<J: Job> {
    state: Mutex<State<J>>,
}

struct State<J: Job> {
    index: JobIndex<J>,
    /// Set once an invariant violation has been observed.
    poisoned: Option<String>,
}

impl<J: Job + Clone> State<J> {
    /// Run a mutation against the index, latching fatal errors.
    fn mutate<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut JobIndex<J>) -> Result<T>,
    ) -> Result<T> {
        if let Some(reason) = &self.poisoned {
            return Err(Error::InvariantViolation(format!(
                "registry poisoned by earlier violation: {reason}"
            )));
        }

        let result = f(&mut self.index);
        if let Err(Error::InvariantViolation(reason)) = &result {
            error!(operation, %reason, "Job registry invariant violated");
            self.poisoned = Some(reason.clone());
        }
        result
    }
}

impl<J: Job + Clone> JobRegistry<J> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                index: JobIndex::new(),
                poisoned: None,
            }),
        }
    }

    /// Register `job` under `id`, optionally linking it to `child_id`.
    ///
    /// Pass `Id::NONE` as `child_id` to keep whatever child the handle already
    /// carries. Either the job and its link are both stored or nothing is.
    pub fn insert(&self, id: J::Id, job: J, child_id: J::Id) -> Result<()> {
        let child_id = self
            .state
            .lock()
            .mutate("insert", |index| index.insert(id, job, child_id))?;
        debug!(job_id = %id, %child_id, "Inserted job");
        Ok(())
    }

    /// Remove a job and any link it holds, returning its handle.
    pub fn remove(&self, id: J::Id) -> Result<J> {
        let job = self
            .state
            .lock()
            .mutate("remove", |index| index.remove(id))?;
        debug!(job_id = %id, "Removed job");
        Ok(job)
    }

    /// Remove the job that owns `child_id`.
    pub fn remove_by_child_id(&self, child_id: J::Id) -> Result<J> {
        let (id, job) = self.state.lock().mutate("remove_by_child_id", |index| {
            let id = index.owner_of(child_id)?;
            index.remove(id).map(|job| (id, job))
        })?;
        debug!(job_id = %id, %child_id, "Removed job by child id");
        Ok(job)
    }

    /// Remove all of `ids` in order. If any id is unknown or repeated the
    /// batch fails and nothing is removed.
    pub fn remove_many(&self, ids: &[J::Id]) -> Result<Vec<J>> {
        let jobs = self
            .state
            .lock()
            .mutate("remove_many", |index| index.remove_many(ids))?;
        debug!(count = jobs.len(), "Removed jobs");
        Ok(jobs)
    }

    /// Link `id` to `child_id`. Re-assigning the current child is a no-op.
    pub fn assign_child_id(&self, id: J::Id, child_id: J::Id) -> Result<()> {
        let linked = self
            .state
            .lock()
            .mutate("assign_child_id", |index| index.link(id, child_id))?;
        if linked {
            debug!(job_id = %id, %child_id, "Assigned child id");
        }
        Ok(())
    }

    /// Clear the link of `id`. Returns whether there was one.
    pub fn unassign_child_id(&self, id: J::Id) -> Result<bool> {
        let child_id = self
            .state
            .lock()
            .mutate("unassign_child_id", |index| index.unlink(id))?;
        if let Some(child_id) = child_id {
            debug!(job_id = %id, %child_id, "Unassigned child id");
        }
        Ok(child_id.is_some())
    }

    pub fn has(&self, id: J::Id) -> bool {
        self.state.lock().index.contains(id)
    }

    pub fn get(&self, id: J::Id) -> Result<J> {
        self.state.lock().index.get(id).cloned()
    }

    pub fn get_by_child_id(&self, child_id: J::Id) -> Result<J> {
        let state = self.state.lock();
        let id = state.index.owner_of(child_id)?;
        state.index.get(id).cloned()
    }

    /// Child of `id`, or `Id::NONE` when the job is unlinked or unknown.
    pub fn child_id_of(&self, id: J::Id) -> J::Id {
        self.state
            .lock()
            .index
            .child_of(id)
            .unwrap_or(<J::Id as JobId>::NONE)
    }

    /// Owner of `child_id`, or `Id::NONE` when no job owns it.
    pub fn id_of_child(&self, child_id: J::Id) -> J::Id {
        self.state
            .lock()
            .index
            .owner_of(child_id)
            .unwrap_or(<J::Id as JobId>::NONE)
    }

    /// Snapshot of every job, ordered by id.
    pub fn all(&self) -> Vec<J> {
        self.state
            .lock()
            .index
            .entries()
            .map(|(_, job)| job.clone())
            .collect()
    }

    /// Jobs from a snapshot of [`all`](Self::all) that match `predicate`.
    ///
    /// The predicate runs after the lock is released, so it may call back
    /// into the registry.
    pub fn find<P>(&self, mut predicate: P) -> Vec<J>
    where
        P: FnMut(&J) -> bool,
    {
        self.all().into_iter().filter(|job| predicate(job)).collect()
    }

    /// Like [`find`](Self::find), projected to the owning ids.
    pub fn find_ids<P>(&self, mut predicate: P) -> Vec<J::Id>
    where
        P: FnMut(&J) -> bool,
    {
        let entries: Vec<(J::Id, J)> = self
            .state
            .lock()
            .index
            .entries()
            .map(|(id, job)| (id, job.clone()))
            .collect();

        entries
            .into_iter()
            .filter(|(_, job)| predicate(job))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All `(id, child_id)` links, ordered by id.
    pub fn links(&self) -> Vec<(J::Id, J::Id)> {
        self.state.lock().index.links().collect()
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot<J::Id>> {
        self.state
            .lock()
            .index
            .entries()
            .map(|(_, job)| JobSnapshot::of(job))
            .collect()
    }

    /// Check every index invariant. A failure poisons the registry.
    pub fn verify(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.mutate("verify", |index| index.verify())
    }

    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned.is_some()
    }

    #[cfg(test)]
    fn with_index(&self, f: impl FnOnce(&mut JobIndex<J>)) {
        f(&mut self.state.lock().index)
    }
}

impl<J: Job + Clone> Default for JobRegistry<J> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobman_core::SimpleJob;
    use proptest::prelude::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    type Handle = Arc<SimpleJob<u32>>;
    type Registry = JobRegistry<Handle>;

    fn job(id: u32) -> Handle {
        SimpleJob::shared(id)
    }

    fn ids(jobs: &[Handle]) -> Vec<u32> {
        jobs.iter().map(|j| j.id()).collect()
    }

    #[test]
    fn test_insert_remove_round_trip() {
        let registry = Registry::new();
        registry.insert(1, job(1), 10).unwrap();
        let before = ids(&registry.all());

        registry.insert(5, job(5), 0).unwrap();
        assert!(registry.has(5));
        registry.remove(5).unwrap();

        assert_eq!(ids(&registry.all()), before);
        assert_eq!(registry.links(), vec![(1, 10)]);
    }

    #[test]
    fn test_duplicate_insert_conflicts() {
        let registry = Registry::new();
        let first = job(5);
        registry.insert(5, first.clone(), 0).unwrap();

        let err = registry.insert(5, job(5), 0).unwrap_err();
        assert!(err.is_conflict());
        assert!(Arc::ptr_eq(&registry.get(5).unwrap(), &first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_assign_child_id() {
        let registry = Registry::new();
        let handle = job(5);
        registry.insert(5, handle.clone(), 0).unwrap();

        registry.assign_child_id(5, 42).unwrap();
        assert_eq!(registry.id_of_child(42), 5);
        assert_eq!(registry.child_id_of(5), 42);
        assert_eq!(handle.child_id(), 42);

        // same child again is fine, a different one is not
        registry.assign_child_id(5, 42).unwrap();
        assert!(registry.assign_child_id(5, 99).unwrap_err().is_conflict());
        assert_eq!(registry.child_id_of(5), 42);
    }

    #[test]
    fn test_child_ids_are_unique() {
        let registry = Registry::new();
        registry.insert(5, job(5), 0).unwrap();
        registry.insert(6, job(6), 0).unwrap();

        registry.assign_child_id(5, 42).unwrap();
        assert!(registry.assign_child_id(6, 42).unwrap_err().is_conflict());
        assert_eq!(registry.child_id_of(6), 0);
        assert_eq!(registry.id_of_child(42), 5);
    }

    #[test]
    fn test_assign_unknown_job() {
        let registry = Registry::new();
        assert!(registry.assign_child_id(5, 42).unwrap_err().is_not_found());
        assert!(registry.unassign_child_id(5).unwrap_err().is_not_found());
    }

    #[test]
    fn test_assign_none_child_is_invalid() {
        let registry = Registry::new();
        registry.insert(5, job(5), 0).unwrap();
        assert!(matches!(
            registry.assign_child_id(5, 0),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_insert_with_claimed_child_is_all_or_nothing() {
        let registry = Registry::new();
        registry.insert(5, job(5), 42).unwrap();

        let late = job(6);
        let err = registry.insert(6, late.clone(), 42).unwrap_err();
        assert!(err.is_conflict());
        assert!(!registry.has(6));
        assert_eq!(late.child_id(), 0);
        assert_eq!(registry.id_of_child(42), 5);
        registry.verify().unwrap();
    }

    #[test]
    fn test_unassign_child_id() {
        let registry = Registry::new();
        registry.insert(5, job(5), 42).unwrap();

        assert!(registry.unassign_child_id(5).unwrap());
        assert!(!registry.unassign_child_id(5).unwrap());
        assert_eq!(registry.id_of_child(42), 0);

        // the freed child can be claimed elsewhere
        registry.insert(6, job(6), 42).unwrap();
        assert_eq!(registry.id_of_child(42), 6);
    }

    #[test]
    fn test_remove_cascades_link() {
        let registry = Registry::new();
        let handle = job(5);
        registry.insert(5, handle.clone(), 0).unwrap();
        registry.assign_child_id(5, 42).unwrap();

        registry.remove(5).unwrap();
        assert_eq!(registry.id_of_child(42), 0);
        assert!(!registry.has(5));
        assert!(registry.get_by_child_id(42).unwrap_err().is_not_found());
        assert_eq!(handle.child_id(), 0);
        assert!(registry.remove(5).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_by_child_id() {
        let registry = Registry::new();
        registry.insert(5, job(5), 42).unwrap();
        registry.insert(6, job(6), 0).unwrap();

        let removed = registry.remove_by_child_id(42).unwrap();
        assert_eq!(removed.id(), 5);
        assert!(!registry.has(5));
        assert_eq!(registry.id_of_child(42), 0);
        assert_eq!(ids(&registry.all()), vec![6]);
        assert!(registry.remove_by_child_id(42).unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_many() {
        let registry = Registry::new();
        for id in 1..=4 {
            registry.insert(id, job(id), id * 10).unwrap();
        }

        assert!(registry.remove_many(&[1, 9]).unwrap_err().is_not_found());
        assert_eq!(registry.len(), 4);

        let removed = registry.remove_many(&[3, 1]).unwrap();
        assert_eq!(ids(&removed), vec![3, 1]);
        assert_eq!(ids(&registry.all()), vec![2, 4]);
        assert_eq!(registry.links(), vec![(2, 20), (4, 40)]);
    }

    #[test]
    fn test_lookups() {
        let registry = Registry::new();
        registry.insert(5, job(5), 42).unwrap();
        registry.insert(6, job(6), 0).unwrap();

        assert_eq!(registry.get_by_child_id(42).unwrap().id(), 5);
        assert!(registry.get(7).unwrap_err().is_not_found());
        assert_eq!(registry.child_id_of(6), 0);
        assert_eq!(registry.child_id_of(7), 0);
        assert_eq!(registry.id_of_child(43), 0);
    }

    #[test]
    fn test_find_matches_filtered_all() {
        let registry = Registry::new();
        for id in 1..=6 {
            let child = if id % 2 == 0 { id + 100 } else { 0 };
            registry.insert(id, job(id), child).unwrap();
        }

        let linked = |j: &Handle| j.child_id() != 0;
        let expected: Vec<u32> = registry
            .all()
            .into_iter()
            .filter(|j| linked(j))
            .map(|j| j.id())
            .collect();

        assert_eq!(ids(&registry.find(linked)), expected);
        assert_eq!(registry.find_ids(linked), expected);
        assert_eq!(expected, vec![2, 4, 6]);
    }

    #[test]
    fn test_find_predicate_may_reenter() {
        let registry = Registry::new();
        registry.insert(1, job(1), 0).unwrap();
        registry.insert(2, job(2), 0).unwrap();

        let found = registry.find_ids(|j| registry.child_id_of(j.id()) == 0);
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn test_snapshot() {
        let registry = Registry::new();
        registry.insert(2, job(2), 0).unwrap();
        registry.insert(1, job(1), 11).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(
            snapshot,
            vec![
                JobSnapshot {
                    id: 1,
                    child_id: Some(11)
                },
                JobSnapshot {
                    id: 2,
                    child_id: None
                },
            ]
        );
    }

    #[test]
    fn test_violation_poisons_registry() {
        let registry = Registry::new();
        registry.insert(5, job(5), 42).unwrap();
        registry.insert(6, job(6), 0).unwrap();
        registry.with_index(|index| index.corrupt_reverse_link(42));

        let err = registry.remove(5).unwrap_err();
        assert!(err.is_fatal());
        assert!(registry.is_poisoned());

        // unrelated mutations are refused as well
        assert!(registry.remove(6).unwrap_err().is_fatal());
        assert!(registry.insert(7, job(7), 0).unwrap_err().is_fatal());
        assert!(registry.has(6));
    }

    #[test]
    fn test_external_child_mutation_is_detected() {
        let registry = Registry::new();
        let handle = job(5);
        registry.insert(5, handle.clone(), 42).unwrap();

        handle.set_child_id(43);
        assert!(registry.verify().unwrap_err().is_fatal());
        assert!(registry.is_poisoned());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_inserts() {
        let registry = Arc::new(Registry::new());
        let n = 200u32;

        let handles: Vec<_> = (1..=n)
            .map(|id| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.insert(id, job(id), id + 1000) })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(registry.all().len(), n as usize);
        assert_eq!(registry.links().len(), n as usize);
        registry.verify().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_insert() {
        let registry = Arc::new(Registry::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.insert(7, job(7), 0) })
            })
            .collect();

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(e) if e.is_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!((ok, conflicts), (1, 1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_child_claims() {
        let registry = Registry::new();
        for id in 1..=8 {
            registry.insert(id, job(id), 0).unwrap();
        }

        let winners: Vec<u32> = std::thread::scope(|s| {
            let workers: Vec<_> = (1..=8)
                .map(|id| {
                    let registry = &registry;
                    s.spawn(move || registry.assign_child_id(id, 42).ok().map(|_| id))
                })
                .collect();
            workers
                .into_iter()
                .filter_map(|w| w.join().unwrap())
                .collect()
        });

        assert_eq!(winners.len(), 1);
        assert_eq!(registry.id_of_child(42), winners[0]);
        registry.verify().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u32, u32),
        Remove(u32),
        RemoveByChild(u32),
        Assign(u32, u32),
        Unassign(u32),
    }

    fn arb_child() -> impl Strategy<Value = u32> {
        prop_oneof![Just(0u32), 100u32..106]
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..8, arb_child()).prop_map(|(id, child)| Op::Insert(id, child)),
            (0u32..8).prop_map(Op::Remove),
            (100u32..106).prop_map(Op::RemoveByChild),
            (0u32..8, arb_child()).prop_map(|(id, child)| Op::Assign(id, child)),
            (0u32..8).prop_map(Op::Unassign),
        ]
    }

    /// Reference behaviour: job id -> child id (0 when unlinked).
    fn apply_model(model: &mut BTreeMap<u32, u32>, op: &Op) -> bool {
        let owned = |model: &BTreeMap<u32, u32>, child: u32| {
            child != 0 && model.values().any(|c| *c == child)
        };
        match *op {
            Op::Insert(id, child) => {
                if id == 0 || model.contains_key(&id) || owned(model, child) {
                    return false;
                }
                model.insert(id, child);
                true
            }
            Op::Remove(id) => model.remove(&id).is_some(),
            Op::RemoveByChild(child) => {
                match model.iter().find(|(_, c)| **c == child).map(|(id, _)| *id) {
                    Some(id) => model.remove(&id).is_some(),
                    None => false,
                }
            }
            Op::Assign(id, child) => match model.get(&id).copied() {
                None => false,
                Some(_) if child == 0 => false,
                Some(current) if current == child => true,
                Some(0) if !owned(model, child) => {
                    model.insert(id, child);
                    true
                }
                Some(_) => false,
            },
            Op::Unassign(id) => match model.get_mut(&id) {
                Some(current) => {
                    *current = 0;
                    true
                }
                None => false,
            },
        }
    }

    fn apply_registry(registry: &Registry, op: &Op) -> Result<()> {
        match *op {
            Op::Insert(id, child) => registry.insert(id, job(id), child),
            Op::Remove(id) => registry.remove(id).map(|_| ()),
            Op::RemoveByChild(child) => registry.remove_by_child_id(child).map(|_| ()),
            Op::Assign(id, child) => registry.assign_child_id(id, child),
            Op::Unassign(id) => registry.unassign_child_id(id).map(|_| ()),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Forward and reverse links stay inverse and child ids stay unique
        /// after every operation, and outcomes match the reference model.
        #[test]
        fn prop_links_stay_bijective(ops in prop::collection::vec(arb_op(), 1..60)) {
            let registry = Registry::new();
            let mut model = BTreeMap::new();

            for op in &ops {
                let result = apply_registry(&registry, op);
                let expected = apply_model(&mut model, op);

                prop_assert!(!matches!(&result, Err(e) if e.is_fatal()));
                prop_assert_eq!(result.is_ok(), expected, "op {:?}", op);
                prop_assert!(registry.verify().is_ok());

                let links = registry.links();
                let children: BTreeSet<u32> = links.iter().map(|(_, c)| *c).collect();
                prop_assert_eq!(children.len(), links.len());
                for (id, child) in &links {
                    prop_assert_eq!(registry.id_of_child(*child), *id);
                    prop_assert_eq!(registry.child_id_of(*id), *child);
                }
            }

            let expected: Vec<(u32, u32)> = model
                .iter()
                .filter(|(_, c)| **c != 0)
                .map(|(id, c)| (*id, *c))
                .collect();
            prop_assert_eq!(registry.links(), expected);
            prop_assert_eq!(ids(&registry.all()), model.keys().copied().collect::<Vec<_>>());
        }
    }
}
