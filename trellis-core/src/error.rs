// Error types for the Trellis runtime

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Startup and resolution errors. These abort startup or the resolution call.
    #[error("Duplicate component identifier: {0}")]
    DuplicateComponent(String),

    #[error("Duplicate bean definition: {0}")]
    DuplicateBeanDefinition(String),

    #[error("Bean candidate not found: {id} (type {type_name})")]
    BeanCandidateNotFound { id: String, type_name: String },

    #[error("Bean definition not found: {0}")]
    UnknownBean(String),

    #[error("No compatible bean found: {0}")]
    NoCompatibleBean(String),

    #[error("Multiple compatible beans found for {type_name}: {candidates:?}")]
    AmbiguousBean {
        type_name: String,
        candidates: Vec<String>,
    },

    #[error("Group not found: {0}")]
    UnknownGroup(String),

    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Dependency injection error: {0}")]
    DependencyInjection(String),

    // Request-time errors. The dispatcher recovers from these locally.
    #[error(
        "Unsupported controller method parameter type. Handler={handler} Parameter={parameter} ParameterType={type_name}"
    )]
    UnsupportedParameterType {
        handler: String,
        parameter: String,
        type_name: String,
    },

    #[error("Failed to bind parameter '{parameter}': {message}")]
    Binding { parameter: String, message: String },

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("Response headers already sent, cannot add {0}")]
    HeadersSent(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    // Transport
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error belongs to the startup / resolution class
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DuplicateComponent(_)
                | Error::DuplicateBeanDefinition(_)
                | Error::BeanCandidateNotFound { .. }
                | Error::UnknownBean(_)
                | Error::NoCompatibleBean(_)
                | Error::AmbiguousBean { .. }
                | Error::UnknownGroup(_)
                | Error::CyclicDependency(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Deserialization(err.to_string())
    }
}

impl From<hyper::Error> for Error {
    fn from(err: hyper::Error) -> Self {
        Error::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyclic_dependency_message() {
        let err = Error::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_unsupported_parameter_names_handler() {
        let err = Error::UnsupportedParameterType {
            handler: "ItemController.show".into(),
            parameter: "id".into(),
            type_name: "u8".into(),
        };
        let message = err.to_string();
        assert!(message.contains("ItemController.show"));
        assert!(message.contains("id"));
        assert!(message.contains("u8"));
    }

    #[test]
    fn test_request_errors_are_recoverable() {
        let err = Error::Binding {
            parameter: "id".into(),
            message: "invalid digit".into(),
        };
        assert!(!err.is_fatal());
        assert!(!Error::HeadersSent("X-Late".into()).is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::UnknownGroup("g".into()).is_fatal());
        assert!(Error::AmbiguousBean {
            type_name: "dyn Repo".into(),
            candidates: vec!["a".into(), "b".into()],
        }
        .is_fatal());
        assert!(!Error::Handler("boom".into()).is_fatal());
    }
}
