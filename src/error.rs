//! Error type shared by the retrieval pipeline, backends, and session store.
//!
//! Structural problems ([`Error::UnknownUser`], [`Error::IndexNotBuilt`]) are
//! kept apart from "nothing relevant was found", which is never an error and
//! flows through the pipeline as empty collections.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("no embedding index has been built for user '{0}'; run `eqa ingest` first")]
    IndexNotBuilt(String),
    #[error("{service} unavailable: {message}")]
    UpstreamUnavailable {
        service: &'static str,
        message: String,
    },
    #[error("invalid response from {service}: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("failed to load {path}: {message}")]
    Load { path: String, message: String },
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap a transport failure from one of the external backends.
    pub fn upstream(service: &'static str, err: impl std::fmt::Display) -> Self {
        Error::UpstreamUnavailable {
            service,
            message: err.to_string(),
        }
    }

    pub fn invalid_response(service: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidResponse {
            service,
            message: message.into(),
        }
    }

    /// Only backend outages are worth retrying; everything else is a
    /// configuration or input problem.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::UpstreamUnavailable { .. })
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownUser(_) => "unknown_user",
            Error::IndexNotBuilt(_) => "index_not_built",
            Error::UpstreamUnavailable { .. } => "upstream_unavailable",
            Error::InvalidResponse { .. } => "upstream_invalid_response",
            Error::EmptyQuery => "bad_request",
            Error::Load { .. } | Error::Config(_) | Error::Database(_) | Error::Io(_) => "internal",
        }
    }
}
