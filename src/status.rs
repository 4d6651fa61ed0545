use std::fmt::Display;

use serde::{Deserialize, Serialize};

const STATUS_PREFIX: &str = "urn:oasis:names:tc:SAML:2.0:status:";

pub const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";
pub const STATUS_REQUESTER: &str = "urn:oasis:names:tc:SAML:2.0:status:Requester";
pub const STATUS_RESPONDER: &str = "urn:oasis:names:tc:SAML:2.0:status:Responder";
pub const STATUS_VERSION_MISMATCH: &str = "urn:oasis:names:tc:SAML:2.0:status:VersionMismatch";

/// Status vocabulary the IdP answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Success,
    VersionMismatch,
    AuthnFailed,
    RequestDenied,
    NoPassive,
    RequesterError,
    UnsupportedBinding,
}

impl StatusCode {
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    /// The top-level `StatusCode/@Value` URN.
    pub fn top_level(self) -> &'static str {
        match self {
            StatusCode::Success => STATUS_SUCCESS,
            StatusCode::VersionMismatch => STATUS_VERSION_MISMATCH,
            StatusCode::RequesterError => STATUS_REQUESTER,
            StatusCode::AuthnFailed
            | StatusCode::RequestDenied
            | StatusCode::NoPassive
            | StatusCode::UnsupportedBinding => STATUS_RESPONDER,
        }
    }

    /// The nested second-level status URN, if this code has one.
    pub fn second_level(self) -> Option<String> {
        match self {
            StatusCode::AuthnFailed
            | StatusCode::RequestDenied
            | StatusCode::NoPassive
            | StatusCode::UnsupportedBinding => Some(format!("{STATUS_PREFIX}{self}")),
            _ => None,
        }
    }
}

impl Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            StatusCode::Success => "Success",
            StatusCode::VersionMismatch => "VersionMismatch",
            StatusCode::AuthnFailed => "AuthnFailed",
            StatusCode::RequestDenied => "RequestDenied",
            StatusCode::NoPassive => "NoPassive",
            StatusCode::RequesterError => "Requester",
            StatusCode::UnsupportedBinding => "UnsupportedBinding",
        };
        f.write_str(name)
    }
}

/// Result of the request validation chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub status: StatusCode,
    pub message: String,
}

impl ValidationOutcome {
    pub fn success() -> Self {
        Self {
            status: StatusCode::Success,
            message: "Successful Authentication".into(),
        }
    }

    pub fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responder_codes_nest_under_responder() {
        assert_eq!(StatusCode::NoPassive.top_level(), STATUS_RESPONDER);
        assert_eq!(
            StatusCode::NoPassive.second_level().as_deref(),
            Some("urn:oasis:names:tc:SAML:2.0:status:NoPassive")
        );
        assert_eq!(
            StatusCode::UnsupportedBinding.second_level().as_deref(),
            Some("urn:oasis:names:tc:SAML:2.0:status:UnsupportedBinding")
        );
    }

    #[test]
    fn top_level_codes_have_no_sub_code() {
        for code in [
            StatusCode::Success,
            StatusCode::VersionMismatch,
            StatusCode::RequesterError,
        ] {
            assert_eq!(code.second_level(), None);
        }
        assert_eq!(StatusCode::RequesterError.top_level(), STATUS_REQUESTER);
        assert_eq!(
            StatusCode::VersionMismatch.top_level(),
            STATUS_VERSION_MISMATCH
        );
    }
}
