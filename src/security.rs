//! Explicit security context for job-registry access.
//!
//! Webhook callers have no session, so a dispatch starts out anonymous. The
//! dispatcher elevates to [`Principal::System`] for exactly the block that
//! enumerates and triggers jobs; the [`ElevatedContext`] guard borrows the
//! context mutably, so nothing else can observe or reuse it while elevated,
//! and restores the previous principal when dropped, including on unwind.

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    System,
}

#[derive(Debug)]
pub struct SecurityContext {
    principal: Principal,
}

impl SecurityContext {
    pub fn anonymous() -> Self {
        Self {
            principal: Principal::Anonymous,
        }
    }

    pub fn principal(&self) -> Principal {
        self.principal
    }

    pub fn is_elevated(&self) -> bool {
        self.principal == Principal::System
    }

    /// Switches to the system principal until the returned guard is dropped.
    pub fn impersonate_system(&mut self) -> ElevatedContext<'_> {
        let previous = std::mem::replace(&mut self.principal, Principal::System);
        trace!(?previous, "Elevated to system principal");
        ElevatedContext {
            context: self,
            previous,
        }
    }
}

impl Default for SecurityContext {
    fn default() -> Self {
        Self::anonymous()
    }
}

/// Proof of elevation, required to enumerate every job and to fire triggers.
#[derive(Debug)]
pub struct ElevatedContext<'a> {
    context: &'a mut SecurityContext,
    previous: Principal,
}

impl ElevatedContext<'_> {
    pub fn principal(&self) -> Principal {
        self.context.principal
    }
}

impl Drop for ElevatedContext<'_> {
    fn drop(&mut self) {
        self.context.principal = self.previous;
        trace!(restored = ?self.previous, "Dropped system principal");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn elevation_is_scoped_to_the_guard() {
        let mut ctx = SecurityContext::anonymous();
        {
            let elevated = ctx.impersonate_system();
            assert_eq!(elevated.principal(), Principal::System);
        }
        assert_eq!(ctx.principal(), Principal::Anonymous);
        assert!(!ctx.is_elevated());
    }

    #[test]
    fn elevation_is_restored_on_unwind() {
        let mut ctx = SecurityContext::anonymous();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _elevated = ctx.impersonate_system();
            panic!("trigger blew up");
        }));
        assert!(result.is_err());
        assert_eq!(ctx.principal(), Principal::Anonymous);
    }

    #[test]
    fn nested_elevation_restores_system() {
        let mut ctx = SecurityContext::anonymous();
        let mut outer = ctx.impersonate_system();
        {
            let inner = outer.context.impersonate_system();
            assert_eq!(inner.principal(), Principal::System);
        }
        assert_eq!(outer.principal(), Principal::System);
        drop(outer);
        assert_eq!(ctx.principal(), Principal::Anonymous);
    }
}
