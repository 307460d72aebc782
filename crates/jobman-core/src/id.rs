//! Job identifiers.

use std::fmt::{Debug, Display};
use std::hash::Hash;

/// An identifier usable as a registry key.
///
/// `NONE` is the distinguished "no job" value. It is never stored as a job id
/// or child id.
pub trait JobId: Copy + Ord + Hash + Debug + Display + Send + Sync + 'static {
    /// The "absent" sentinel.
    const NONE: Self;

    fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    fn is_some(&self) -> bool {
        !self.is_none()
    }
}

macro_rules! impl_job_id {
    ($($t:ty),* $(,)?) => {
        $(
            impl JobId for $t {
                const NONE: Self = 0;
            }
        )*
    };
}

impl_job_id!(u8, u16, u32, u64, u128, usize);
