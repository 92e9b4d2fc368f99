//! Transaction modes and the mutation state machine
//!
//! Every mutation call moves through
//! `Pending -> Compiling -> Executing -> {Committed | RolledBack}`.
//! [`MutationTracker`] enforces those transitions and logs each one.

use super::error::{DatabaseError, Result};
use std::fmt;

/// How a connection scope opens its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionMode {
    /// `BEGIN DEFERRED`: locks are taken on first use (read-mostly scopes)
    #[default]
    Deferred,
    /// `BEGIN IMMEDIATE`: the write lock is taken up front
    Immediate,
}

impl TransactionMode {
    pub fn begin_sql(&self) -> &'static str {
        match self {
            TransactionMode::Deferred => "BEGIN DEFERRED",
            TransactionMode::Immediate => "BEGIN IMMEDIATE",
        }
    }
}

/// Phase of a single mutation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Pending,
    Compiling,
    Executing,
    Committed,
    RolledBack,
}

impl MutationPhase {
    /// Whether `next` is a legal successor of this phase
    pub fn can_advance_to(&self, next: MutationPhase) -> bool {
        use MutationPhase::*;
        matches!(
            (self, next),
            (Pending, Compiling)
                | (Compiling, Executing)
                | (Compiling, RolledBack)
                | (Executing, Committed)
                | (Executing, RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationPhase::Committed | MutationPhase::RolledBack)
    }
}

impl fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationPhase::Pending => "pending",
            MutationPhase::Compiling => "compiling",
            MutationPhase::Executing => "executing",
            MutationPhase::Committed => "committed",
            MutationPhase::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Tracks one mutation call through its phases
///
/// A tracker dropped before reaching a terminal phase logs a warning; that
/// happens when an async caller is cancelled mid-call.
#[derive(Debug)]
pub struct MutationTracker {
    table: String,
    operation: &'static str,
    phase: MutationPhase,
}

impl MutationTracker {
    pub fn new(table: impl Into<String>, operation: &'static str) -> Self {
        Self {
            table: table.into(),
            operation,
            phase: MutationPhase::Pending,
        }
    }

    /// A tracker already in the `Compiling` phase
    pub fn start(table: impl Into<String>, operation: &'static str) -> Self {
        let mut tracker = Self::new(table, operation);
        tracker.phase = MutationPhase::Compiling;
        tracker
    }

    pub fn phase(&self) -> MutationPhase {
        self.phase
    }

    /// Move to `next`, failing with [`DatabaseError::TransactionError`] on an
    /// illegal transition
    pub fn advance(&mut self, next: MutationPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(DatabaseError::transaction(format!(
                "{} on '{}' cannot move from {} to {}",
                self.operation, self.table, self.phase, next
            )));
        }
        tracing::trace!(
            table = %self.table,
            operation = self.operation,
            from = %self.phase,
            to = %next,
            "mutation phase"
        );
        self.phase = next;
        Ok(())
    }

    /// Record the outcome of compilation
    ///
    /// A compiled statement moves the call to `Executing`; a compile error
    /// ends it in `RolledBack` before anything reached the driver.
    pub fn compiled<C>(&mut self, compiled: Result<C>) -> Result<C> {
        match compiled {
            Ok(c) => {
                self.advance(MutationPhase::Executing)?;
                Ok(c)
            }
            Err(e) => {
                let _ = self.advance(MutationPhase::RolledBack);
                Err(e)
            }
        }
    }

    /// Record the outcome of the executing phase and pass it through
    ///
    /// Success moves to `Committed`; an error moves to `RolledBack` and is
    /// returned unchanged.
    pub fn finish<T>(&mut self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.advance(MutationPhase::Committed)?;
                Ok(value)
            }
            Err(e) => {
                // an error from Compiling or Executing both land here
                let _ = self.advance(MutationPhase::RolledBack);
                Err(e)
            }
        }
    }
}

impl Drop for MutationTracker {
    fn drop(&mut self) {
        if !self.phase.is_terminal() && self.phase != MutationPhase::Pending {
            tracing::warn!(
                table = %self.table,
                operation = self.operation,
                phase = %self.phase,
                "mutation abandoned before completion"
            );
        }
    }
}
