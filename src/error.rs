//! Workflow Error Types
//!
//! All domain operations return typed errors. The transport boundary maps
//! each kind to a stable code and a safe user-facing message; full
//! diagnostic detail stays in `Display`/`Debug` for internal logs and is
//! never echoed to untrusted callers.

use thiserror::Error;

use crate::entity::{EntityKind, Status};
use crate::transitions::Violation;

/// Main error type for workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed or missing required payload fields.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Actor lacks a required capability.
    #[error("not authorized: {reason}")]
    Authorization { reason: String },

    /// Entity absent, or outside the actor's organization. The two cases
    /// are deliberately indistinguishable to the caller.
    #[error("{kind} not found")]
    NotFound { kind: EntityKind },

    /// Illegal status transition or unmet transition precondition. Carries
    /// the currently-legal next statuses so a client can self-correct.
    #[error("business rule violated: {}", format_violations(.violations))]
    BusinessRule {
        violations: Vec<Violation>,
        allowed: Vec<Status>,
    },

    /// Concurrent-write race detected, or a change was required and none
    /// was produced.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// Too many operations from this actor in the current window.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Storage failure that survived the retry policy.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl WorkflowError {
    /// Stable code for the transport boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Authorization { .. } => "AUTHORIZATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::BusinessRule { .. } => "BUSINESS_RULE",
            Self::Conflict { .. } => "CONFLICT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Storage(_) => "STORAGE",
        }
    }

    /// Safe user-facing message. Business-rule errors keep their full
    /// explanation (it is the client's correction guidance); storage errors
    /// are reduced to a generic message.
    pub fn safe_message(&self) -> String {
        match self {
            Self::Storage(_) => "A storage error occurred. Please retry later.".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the transport layer may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_transient())
    }
}

/// Errors surfaced by `EntityStore` implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row absent. Adapters must already have applied organization scoping.
    #[error("record not found")]
    NotFound,

    /// Optimistic-version check failed on write.
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    /// Connection loss, timeout — retryable at the adapter boundary.
    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
