use crate::QualifiedType;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Which registry a failed lookup was made against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    Binder,
    ColumnMapper,
    RowMapper,
}

impl Display for RegistryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegistryKind::Binder => "binder",
            RegistryKind::ColumnMapper => "column mapper",
            RegistryKind::RowMapper => "row mapper",
        })
    }
}

/// Category of an [`Error`], handy for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Resolution,
    Customization,
    Binding,
    Execution,
    Mapping,
    Transaction,
    Resource,
}

/// Every failure a call (or an attach) can report.
///
/// Collaborators (drivers, binders, mappers, customizers) report `anyhow`
/// errors, the engine wraps them into the variant matching the step that
/// failed. Nothing is retried and nothing is swallowed: an error raised while
/// cleaning up after another error is attached through [`Error::Suppressed`].
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid declaration, raised while attaching or creating an on demand
    /// object, never during a call.
    #[error("Invalid declaration of `{site}`: {message}")]
    Configuration { site: String, message: String },

    /// No binder or mapper matches the requested type. Raised at first call and
    /// remembered for every following call of the same method.
    #[error("No {kind} registered for `{requested}` (required by `{site}`)")]
    Resolution {
        site: String,
        kind: RegistryKind,
        requested: QualifiedType,
    },

    /// A customizer failed, the statement was not executed.
    #[error("Could not customize the statement of `{method}`")]
    Customization {
        method: String,
        #[source]
        source: anyhow::Error,
    },

    /// The arguments could not be bound to the statement parameters.
    #[error("Could not bind the arguments of `{method}`: {message}")]
    Binding { method: String, message: String },

    /// The driver failed while executing the statement.
    #[error("Execution of `{method}` failed{}", .chunk.as_ref().map(|c| format!(" (batch chunk {c})")).unwrap_or_default())]
    Execution {
        method: String,
        chunk: Option<usize>,
        #[source]
        source: anyhow::Error,
    },

    /// A result could not be converted into the declared return shape.
    #[error("Could not map the result of `{method}`")]
    Mapping {
        method: String,
        #[source]
        source: anyhow::Error,
    },

    /// Transaction demarcation failed, `cause` is the error that triggered a
    /// failed rollback, if any.
    #[error("Transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
        cause: Option<Box<Error>>,
    },

    /// Opening or closing a resource failed.
    #[error("Resource error: {message}")]
    Resource {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    /// `primary` is the outcome of the call, `suppressed` happened afterwards
    /// while releasing resources.
    #[error("{primary} (suppressed: {suppressed})")]
    Suppressed {
        #[source]
        primary: Box<Error>,
        suppressed: Box<Error>,
    },
}

impl Error {
    pub fn configuration(site: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Configuration {
            site: site.into(),
            message: message.into(),
        }
    }

    pub fn binding(method: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Binding {
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn mapping(method: impl Into<String>, source: anyhow::Error) -> Self {
        Error::Mapping {
            method: method.into(),
            source,
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Error::Transaction {
            message: message.into(),
            source: None,
            cause: None,
        }
    }

    pub fn resource(message: impl Into<String>, source: anyhow::Error) -> Self {
        Error::Resource {
            message: message.into(),
            source,
        }
    }

    /// Attach `suppressed` to this error, keeping `self` as the primary one.
    pub fn suppress(self, suppressed: Error) -> Self {
        Error::Suppressed {
            primary: Box::new(self),
            suppressed: Box::new(suppressed),
        }
    }

    /// The error describing the outcome of the call.
    pub fn primary(&self) -> &Error {
        match self {
            Error::Suppressed { primary, .. } => primary.primary(),
            _ => self,
        }
    }

    /// The cleanup error attached to this one, if any.
    pub fn suppressed(&self) -> Option<&Error> {
        match self {
            Error::Suppressed { suppressed, .. } => Some(suppressed),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Resolution { .. } => ErrorKind::Resolution,
            Error::Customization { .. } => ErrorKind::Customization,
            Error::Binding { .. } => ErrorKind::Binding,
            Error::Execution { .. } => ErrorKind::Execution,
            Error::Mapping { .. } => ErrorKind::Mapping,
            Error::Transaction { .. } => ErrorKind::Transaction,
            Error::Resource { .. } => ErrorKind::Resource,
            Error::Suppressed { primary, .. } => primary.kind(),
        }
    }

    /// True when the driver reported a [`StatementTimeout`](crate::StatementTimeout).
    pub fn is_timeout(&self) -> bool {
        match self.primary() {
            Error::Execution { source, .. } => source.is::<crate::StatementTimeout>(),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};

    #[test]
    fn suppressed_keeps_primary() {
        let primary = Error::Execution {
            method: "find".into(),
            chunk: None,
            source: anyhow::Error::msg("connection reset"),
        };
        let close = Error::resource("close failed", anyhow::Error::msg("broken pipe"));
        let error = primary.suppress(close);
        assert_eq!(error.kind(), ErrorKind::Execution);
        assert_eq!(error.primary().kind(), ErrorKind::Execution);
        assert_eq!(error.suppressed().map(Error::kind), Some(ErrorKind::Resource));
        assert!(error.to_string().starts_with("Execution of `find` failed"));
    }

    #[test]
    fn chunk_in_message() {
        let error = Error::Execution {
            method: "insert_all".into(),
            chunk: Some(2),
            source: anyhow::Error::msg("constraint violated"),
        };
        assert_eq!(
            error.to_string(),
            "Execution of `insert_all` failed (batch chunk 2)"
        );
    }
}
