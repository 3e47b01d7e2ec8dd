//! Error types for Gatekeeper

use std::io;

use thiserror::Error;

/// Result type alias for Gatekeeper
pub type Result<T> = std::result::Result<T, Error>;

/// Gatekeeper errors.
///
/// Load-time variants abort a reload wholesale and leave the previous
/// configuration in place; request-time variants short-circuit a single
/// authorization request.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed configuration (bad YAML shape, empty file, missing fields)
    #[error("configuration error: {0}")]
    Config(String),

    /// Two service configurations declare the same service identifier
    #[error("duplicated service {service:?} (source {source_file:?})")]
    DuplicateService {
        /// Service identifier declared twice
        service: String,
        /// Source of the second declaration
        source_file: String,
    },

    /// Two policies within one service share an id
    #[error("duplicated policy {id:?} in service {service:?}")]
    DuplicatePolicy {
        /// Service identifier
        service: String,
        /// Offending policy id
        id: String,
    },

    /// A condition references a type the registry does not know
    #[error("unknown condition type {0:?}")]
    UnknownCondition(String),

    /// A principal/action/resource pattern or condition regex failed to compile
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidRegex {
        /// The offending pattern as written in the policy file
        pattern: String,
        /// Compilation error from the regex engine
        source: regex::Error,
    },

    /// An identity provider URL does not use the https:// scheme
    #[error("identity provider {0:?} does not use the https:// scheme")]
    InsecureIssuer(String),

    /// The identity provider could not be reached or its discovery
    /// document could not be parsed at load time
    #[error("identity provider {issuer:?} is unreachable: {source}")]
    IssuerUnreachable {
        /// Issuer URL
        issuer: String,
        /// Underlying authentication error
        source: crate::authn::AuthnError,
    },

    /// No loader accepts the given policies source
    #[error("no appropriate loader found for {0:?}")]
    NoLoader(String),

    /// The service identifier from the `Origin` header is not registered
    #[error("unknown service {0:?}")]
    UnknownService(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// YAML parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP error while downloading a policies source
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
