//! Job trait and the plain job value holder.
//!
//! The registry never owns job payloads. It stores caller-supplied handles and
//! only touches them through the [`Job`] accessors.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::JobId;

/// Capabilities a job handle must expose to the registry.
///
/// `set_child_id` takes `&self` because handles are shared with the caller;
/// implementations use interior mutability. Only the registry should call it
/// while the job is registered.
pub trait Job {
    type Id: JobId;

    /// The job's own identifier.
    fn id(&self) -> Self::Id;

    /// The linked child id, or `Id::NONE`.
    fn child_id(&self) -> Self::Id;

    fn set_child_id(&self, child_id: Self::Id);
}

impl<T: Job + ?Sized> Job for Arc<T> {
    type Id = T::Id;

    fn id(&self) -> Self::Id {
        (**self).id()
    }

    fn child_id(&self) -> Self::Id {
        (**self).child_id()
    }

    fn set_child_id(&self, child_id: Self::Id) {
        (**self).set_child_id(child_id)
    }
}

/// A job that carries nothing but its identifiers.
#[derive(Debug)]
pub struct SimpleJob<I: JobId> {
    id: I,
    child_id: Mutex<I>,
}

impl<I: JobId> SimpleJob<I> {
    pub fn new(id: I) -> Self {
        Self::with_child(id, I::NONE)
    }

    /// Create a job that already names its child.
    pub fn with_child(id: I, child_id: I) -> Self {
        Self {
            id,
            child_id: Mutex::new(child_id),
        }
    }

    /// Convenience for the common `Arc` handle.
    pub fn shared(id: I) -> Arc<Self> {
        Arc::new(Self::new(id))
    }
}

impl<I: JobId> Job for SimpleJob<I> {
    type Id = I;

    fn id(&self) -> I {
        self.id
    }

    fn child_id(&self) -> I {
        *self.child_id.lock()
    }

    fn set_child_id(&self, child_id: I) {
        *self.child_id.lock() = child_id;
    }
}

/// Point-in-time view of a job's identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot<I> {
    pub id: I,
    /// `None` when the job has no child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_id: Option<I>,
}

impl<I: JobId> JobSnapshot<I> {
    pub fn of<J: Job<Id = I> + ?Sized>(job: &J) -> Self {
        let child_id = job.child_id();
        Self {
            id: job.id(),
            child_id: child_id.is_some().then_some(child_id),
        }
    }
}
