use crate::guard::CompletionDiagnostic;
use crate::types::{EntityKind, Status};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: EntityKind, id: String },

    #[error("epic document not found: {}", .0.display())]
    DocumentNotFound(PathBuf),

    #[error("no epic selected: pass --file or run 'agentpm switch <path>'")]
    NoDocument,

    #[error("config already exists: {} (use --force to overwrite)", .0.display())]
    ConfigExists(PathBuf),

    #[error("cannot move {kind} {id} from {from} to {to}: {reason}")]
    InvalidTransition {
        kind: EntityKind,
        id: String,
        from: Status,
        to: Status,
        reason: String,
    },

    #[error("{0}")]
    Completion(Box<CompletionDiagnostic>),

    #[error("{message}")]
    Validation { id: Option<String>, message: String },

    #[error("{0}")]
    Usage(String),

    #[error("malformed epic document: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// The error taxonomy exposed in structured output as the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Io,
    InvalidTransition,
    CompletionValidation,
    Validation,
    Usage,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Io => "io",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::CompletionValidation => "completion_validation",
            ErrorKind::Validation => "validation",
            ErrorKind::Usage => "usage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::EntityNotFound { .. } | CoreError::DocumentNotFound(_) => {
                ErrorKind::NotFound
            }
            CoreError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            CoreError::Completion(_) => ErrorKind::CompletionValidation,
            CoreError::Validation { .. } => ErrorKind::Validation,
            CoreError::Usage(_) | CoreError::NoDocument | CoreError::ConfigExists(_) => {
                ErrorKind::Usage
            }
            CoreError::Parse(_)
            | CoreError::Io(_)
            | CoreError::Json(_)
            | CoreError::Xml(_)
            | CoreError::XmlAttr(_) => ErrorKind::Io,
        }
    }

    /// Process exit code for this failure. A missing document is an I/O
    /// failure; a missing entity inside a loaded document is not.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::DocumentNotFound(_) => 2,
            _ => match self.kind() {
                ErrorKind::NotFound
                | ErrorKind::InvalidTransition
                | ErrorKind::CompletionValidation
                | ErrorKind::Validation => 1,
                ErrorKind::Io => 2,
                ErrorKind::Usage => 3,
            },
        }
    }

    pub fn validation(id: Option<&str>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            id: id.map(str::to_string),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_taxonomy() {
        let missing_doc = CoreError::DocumentNotFound(PathBuf::from("epic.xml"));
        assert_eq!(missing_doc.kind(), ErrorKind::NotFound);
        assert_eq!(missing_doc.exit_code(), 2);

        let missing_task = CoreError::EntityNotFound {
            kind: EntityKind::Task,
            id: "t9".to_string(),
        };
        assert_eq!(missing_task.exit_code(), 1);
        assert_eq!(missing_task.to_string(), "task not found: t9");

        assert_eq!(CoreError::Usage("bad flag".into()).exit_code(), 3);
        assert_eq!(CoreError::Parse("no root".into()).exit_code(), 2);
        assert_eq!(CoreError::validation(None, "nope").exit_code(), 1);
    }
}
