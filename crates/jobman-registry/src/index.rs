//! Three-map job index.
//!
//! `JobIndex` is the unlocked state behind [`crate::JobRegistry`]. Every mutator
//! validates first and commits all three maps together, so a returned error
//! never leaves a partial update behind.

use jobman_core::{Error, Job, JobId, Result};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) struct JobIndex<J: Job> {
    /// Every live job, keyed by its own id.
    jobs: BTreeMap<J::Id, J>,
    /// id -> child id, only for linked jobs.
    children: BTreeMap<J::Id, J::Id>,
    /// child id -> owning id.
    owners: BTreeMap<J::Id, J::Id>,
}

impl<J: Job + Clone> JobIndex<J> {
    pub(crate) fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
            children: BTreeMap::new(),
            owners: BTreeMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn contains(&self, id: J::Id) -> bool {
        self.jobs.contains_key(&id)
    }

    pub(crate) fn get(&self, id: J::Id) -> Result<&J> {
        self.jobs
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    pub(crate) fn owner_of(&self, child_id: J::Id) -> Result<J::Id> {
        self.owners
            .get(&child_id)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("child {child_id}")))
    }

    pub(crate) fn child_of(&self, id: J::Id) -> Option<J::Id> {
        self.children.get(&id).copied()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (J::Id, &J)> {
        self.jobs.iter().map(|(id, job)| (*id, job))
    }

    pub(crate) fn links(&self) -> impl Iterator<Item = (J::Id, J::Id)> + '_ {
        self.children.iter().map(|(id, child)| (*id, *child))
    }

    /// Add a job, linking it to `child_id` or to the child its handle already
    /// carries.
    pub(crate) fn insert(&mut self, id: J::Id, job: J, child_id: J::Id) -> Result<J::Id> {
        if id.is_none() {
            return Err(Error::InvalidInput(format!(
                "job id must not be {}",
                <J::Id as JobId>::NONE
            )));
        }
        if job.id() != id {
            return Err(Error::InvalidInput(format!(
                "job {} cannot be registered under id {id}",
                job.id()
            )));
        }
        if self.jobs.contains_key(&id) {
            return Err(Error::Conflict(format!("job {id} already exists")));
        }

        let carried = job.child_id();
        let child_id = if child_id.is_none() {
            carried
        } else if carried.is_some() && carried != child_id {
            return Err(Error::Conflict(format!(
                "job {id} already carries child {carried}, cannot link {child_id}"
            )));
        } else {
            child_id
        };

        if child_id.is_some() {
            if let Some(owner) = self.owners.get(&child_id) {
                return Err(Error::Conflict(format!(
                    "child {child_id} is already owned by job {owner}"
                )));
            }
        }

        job.set_child_id(child_id);
        if child_id.is_some() {
            self.children.insert(id, child_id);
            self.owners.insert(child_id, id);
        }
        self.jobs.insert(id, job);
        Ok(child_id)
    }

    /// Link `id` to `child_id`. Returns `false` if that exact link already existed.
    pub(crate) fn link(&mut self, id: J::Id, child_id: J::Id) -> Result<bool> {
        if child_id.is_none() {
            return Err(Error::InvalidInput(format!(
                "child id must not be {}",
                <J::Id as JobId>::NONE
            )));
        }

        match self.checked_child(id)? {
            Some(current) if current == child_id => return Ok(false),
            Some(current) => {
                return Err(Error::Conflict(format!(
                    "job {id} already has child {current}"
                )));
            }
            None => {}
        }

        if let Some(owner) = self.owners.get(&child_id) {
            return Err(Error::Conflict(format!(
                "child {child_id} is already owned by job {owner}"
            )));
        }

        self.get(id)?.set_child_id(child_id);
        self.children.insert(id, child_id);
        self.owners.insert(child_id, id);
        Ok(true)
    }

    /// Drop the link of `id`, returning the child it pointed to.
    pub(crate) fn unlink(&mut self, id: J::Id) -> Result<Option<J::Id>> {
        let Some(child_id) = self.checked_child(id)? else {
            return Ok(None);
        };

        self.get(id)?.set_child_id(<J::Id as JobId>::NONE);
        self.children.remove(&id);
        self.owners.remove(&child_id);
        Ok(Some(child_id))
    }

    pub(crate) fn remove(&mut self, id: J::Id) -> Result<J> {
        let child_id = self.checked_child(id)?;

        let job = self
            .jobs
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        if let Some(child_id) = child_id {
            self.children.remove(&id);
            self.owners.remove(&child_id);
        }
        job.set_child_id(<J::Id as JobId>::NONE);
        Ok(job)
    }

    /// Remove every id or none of them.
    pub(crate) fn remove_many(&mut self, ids: &[J::Id]) -> Result<Vec<J>> {
        let mut seen = BTreeSet::new();
        for id in ids {
            if !seen.insert(*id) {
                return Err(Error::NotFound(format!("job {id} (listed twice)")));
            }
            self.checked_child(*id)?;
        }

        ids.iter().map(|id| self.remove(*id)).collect()
    }

    /// Check every invariant across the three maps and the job handles.
    pub(crate) fn verify(&self) -> Result<()> {
        if self.children.len() != self.owners.len() {
            return Err(Error::InvariantViolation(format!(
                "{} forward links but {} reverse links",
                self.children.len(),
                self.owners.len()
            )));
        }

        for (child_id, owner) in &self.owners {
            if child_id.is_none() || owner.is_none() {
                return Err(Error::InvariantViolation(format!(
                    "reverse link {child_id} -> {owner} uses the empty id"
                )));
            }
            if self.children.get(owner) != Some(child_id) {
                return Err(Error::InvariantViolation(format!(
                    "reverse link {child_id} -> {owner} has no forward link"
                )));
            }
        }

        for id in self.children.keys() {
            if !self.jobs.contains_key(id) {
                return Err(Error::InvariantViolation(format!(
                    "job {id} owns a link but is not registered"
                )));
            }
        }

        for (id, job) in &self.jobs {
            if id.is_none() || job.id() != *id {
                return Err(Error::InvariantViolation(format!(
                    "job {} is stored under id {id}",
                    job.id()
                )));
            }
            self.checked_child(*id)?;
        }

        Ok(())
    }

    /// Look up the child of a registered job, cross-checking the forward map,
    /// the reverse map and the handle's own child field.
    fn checked_child(&self, id: J::Id) -> Result<Option<J::Id>> {
        let carried = self.get(id)?.child_id();

        match self.children.get(&id).copied() {
            Some(child_id) => {
                match self.owners.get(&child_id) {
                    Some(owner) if *owner == id => {}
                    Some(owner) => {
                        return Err(Error::InvariantViolation(format!(
                            "child {child_id} of job {id} is indexed under job {owner}"
                        )));
                    }
                    None => {
                        return Err(Error::InvariantViolation(format!(
                            "child {child_id} of job {id} is missing from the reverse index"
                        )));
                    }
                }
                if carried != child_id {
                    return Err(Error::InvariantViolation(format!(
                        "job {id} carries child {carried} but the index records {child_id}"
                    )));
                }
                Ok(Some(child_id))
            }
            None if carried.is_some() => Err(Error::InvariantViolation(format!(
                "job {id} carries child {carried} that is not indexed"
            ))),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub(crate) fn corrupt_reverse_link(&mut self, child_id: J::Id) {
        self.owners.remove(&child_id);
    }
}
