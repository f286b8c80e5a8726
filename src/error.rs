//! Error taxonomy for the container.

use crate::resource::ResourceId;
use std::sync::Arc;
use thiserror::Error;

/// The five error kinds the container can signal.
///
/// Each variant names the offending [`ResourceId`] where one is known, and
/// chains the underlying cause (`#[source]`) so a client can unwind and
/// print the whole failure.
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// Illegal configuration, e.g. a duplicate provider registration when
    /// `strict_providers()` is enabled.
    #[error("configuration error for {resource}: {message}")]
    Configuration {
        resource: ResourceId,
        message: String,
    },

    /// Provider/injector/initializer failure, a cyclical dependency, or a
    /// request for an undeclared resource.
    #[error("instantiation of {resource} failed: {message}")]
    Instantiation {
        resource: ResourceId,
        message: String,
        #[source]
        cause: Option<Arc<DiError>>,
    },

    /// A disposer failed, or the manager needed to dispose a resource could
    /// not be located. Disposal continues for the remaining assets in the
    /// same context; this records the first failure seen for `resource`.
    #[error("disposal of {resource} failed: {message}")]
    Disposal {
        resource: ResourceId,
        message: String,
    },

    /// A request against a `Guarded`/`Local` scope whose activation count
    /// is zero.
    #[error("scope is inactive for {resource}")]
    InactiveScope { resource: ResourceId },

    /// A value was retrieved at a type differing from its stored type.
    /// Indicates a programmer bug in this crate, never a user-input error.
    #[error("type mismatch reading {resource}: expected {expected}")]
    TypeMismatch {
        resource: ResourceId,
        expected: &'static str,
    },
}

impl DiError {
    pub(crate) fn instantiation(resource: &ResourceId, message: impl Into<String>) -> Self {
        DiError::Instantiation {
            resource: resource.clone(),
            message: message.into(),
            cause: None,
        }
    }

    pub(crate) fn instantiation_caused(
        resource: &ResourceId,
        message: impl Into<String>,
        cause: DiError,
    ) -> Self {
        DiError::Instantiation {
            resource: resource.clone(),
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub(crate) fn cyclical_dependency(resource: &ResourceId) -> Self {
        DiError::instantiation(resource, "cyclical dependency")
    }

    pub(crate) fn undeclared_resource(resource: &ResourceId) -> Self {
        DiError::instantiation(resource, "undeclared resource")
    }

    pub(crate) fn inactive_scope(resource: &ResourceId) -> Self {
        DiError::InactiveScope {
            resource: resource.clone(),
        }
    }

    pub(crate) fn disposal(resource: &ResourceId, message: impl Into<String>) -> Self {
        DiError::Disposal {
            resource: resource.clone(),
            message: message.into(),
        }
    }

    pub(crate) fn type_mismatch(resource: &ResourceId, expected: &'static str) -> Self {
        DiError::TypeMismatch {
            resource: resource.clone(),
            expected,
        }
    }

    pub(crate) fn configuration(resource: &ResourceId, message: impl Into<String>) -> Self {
        DiError::Configuration {
            resource: resource.clone(),
            message: message.into(),
        }
    }

    /// Whether this error's message chain contains the phrase "cyclical
    /// dependency" (used by tests and by clients probing a failure).
    pub fn is_cyclical_dependency(&self) -> bool {
        format!("{self}").contains("cyclical dependency")
            || match self {
                DiError::Instantiation {
                    cause: Some(c), ..
                } => c.is_cyclical_dependency(),
                _ => false,
            }
    }
}

/// Result type alias for container operations.
pub type Result<T> = std::result::Result<T, DiError>;
