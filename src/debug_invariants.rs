//! Structural self-checks of committed meshes and forests.
//!
//! `validate_invariants` is always compiled and reports the first broken
//! invariant as an error. The panicking form only fires in debug builds or
//! with the `strict-invariants` feature; builders call it on every commit.

use crate::mesh_error::MeshForestError;

/// Panic with `$ctx` as prefix when the fallible check `$expr` fails and
/// invariant checking is compiled in.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}

pub trait DebugInvariants {
    /// First violated invariant, if any.
    fn validate_invariants(&self) -> Result<(), MeshForestError>;

    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "structure");
    }
}
