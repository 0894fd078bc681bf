//! Stable handle newtype for addressable fields.
//!
//! A [`FieldHandle`] names one location of a configuration tree for the
//! lifetime of the synchronizer that issued it. Static handles come from the
//! [`Layout`](crate::layout::Layout) in declaration order; dynamic handles
//! (sequence elements, mapping entries) are allocated as paths are first seen.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable field identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldHandle(pub u32);

impl FieldHandle {
    /// Handle of the root struct.
    pub const ROOT: FieldHandle = FieldHandle(0);
}

impl fmt::Display for FieldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldHandle({})", self.0)
    }
}
