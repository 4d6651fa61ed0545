use libxml::parser::XmlParseError;
use thiserror::Error;

/// Failures that abort processing without producing a SAML response.
///
/// Protocol-level rejections of a trusted request are not errors; they are
/// reported as a [`ValidationOutcome`](crate::ValidationOutcome) and answered
/// with a SAML error response.
#[derive(Debug, Error)]
pub enum SamlError {
    #[error("malformed SAMLRequest: {0}")]
    MalformedRequest(String),
    #[error("invalid XML: {0:?}")]
    InvalidXml(XmlParseError),
    #[error("unknown service provider {0:?}")]
    UnknownServiceProvider(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("unusable key or certificate")]
    InvalidKey,
    #[error("failed to sign document")]
    SigningFailed,
    #[error("duplicate service provider {0:?}")]
    DuplicateServiceProvider(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("continuation {0:?} not found")]
    ContinuationNotFound(String),
    #[error("corrupt continuation: {0}")]
    CorruptContinuation(String),
    #[error("continuation store failure: {0}")]
    Store(String),
    #[error("authenticator failure: {0}")]
    Authenticator(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl SamlError {
    /// HTTP status the front end should answer with. Details stay in the logs.
    pub fn http_status(&self) -> u16 {
        match self {
            SamlError::MalformedRequest(_) | SamlError::InvalidXml(_) => 400,
            _ => 500,
        }
    }
}
