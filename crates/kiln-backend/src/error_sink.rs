//! Kernel failure reporting.

use kiln_core::ValidationFuture;
use std::fmt;

/// Where a kernel failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The kernel's run function returned an error.
    Execution,
    /// The device reported a validation error for the kernel's commands.
    Validation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Execution => f.write_str("execution"),
            FailureKind::Validation => f.write_str("validation"),
        }
    }
}

/// A failure of one kernel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelFailure {
    pub op_type: String,
    pub node_name: String,
    pub kind: FailureKind,
    pub detail: String,
}

impl fmt::Display for KernelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failure in {} node '{}': {}",
            self.kind, self.op_type, self.node_name, self.detail
        )
    }
}

/// A validation check whose result has not arrived yet.
pub struct PendingValidation {
    op_type: String,
    node_name: String,
    check: ValidationFuture,
}

/// Collects kernel failures for the caller.
///
/// Execution failures are recorded immediately. Validation checks are
/// deferred and only turn into failures when
/// [`resolve_pending`](Self::resolve_pending) is awaited, which the caller
/// should do at a well-defined point such as before reading results or at
/// session teardown.
#[derive(Default)]
pub struct ErrorSink {
    failures: Vec<KernelFailure>,
    pending: Vec<PendingValidation>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: KernelFailure) {
        self.failures.push(failure);
    }

    /// Queue a validation check for `op_type`/`node_name`.
    pub fn defer(&mut self, op_type: &str, node_name: &str, check: ValidationFuture) {
        self.pending.push(PendingValidation {
            op_type: op_type.to_string(),
            node_name: node_name.to_string(),
            check,
        });
    }

    pub fn failures(&self) -> &[KernelFailure] {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<KernelFailure> {
        std::mem::take(&mut self.failures)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// True when there are neither failures nor pending checks.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty() && self.pending.is_empty()
    }

    /// Await every pending validation check, in the order they were queued.
    ///
    /// Returns the number of validation failures found.
    pub async fn resolve_pending(&mut self) -> usize {
        let mut found = 0;
        for pending in std::mem::take(&mut self.pending) {
            if let Some(detail) = pending.check.await {
                tracing::warn!(
                    op_type = %pending.op_type,
                    node = %pending.node_name,
                    "Validation error: {detail}"
                );
                self.failures.push(KernelFailure {
                    op_type: pending.op_type,
                    node_name: pending.node_name,
                    kind: FailureKind::Validation,
                    detail,
                });
                found += 1;
            }
        }
        found
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("failures", &self.failures)
            .field("pending", &self.pending.len())
            .finish()
    }
}
