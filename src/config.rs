//! Startup configuration. Keys and certificates are PEM text; reading them
//! from disk is left to the caller.

use serde::Deserialize;

use crate::{ProtocolBinding, SamlError, CONSENT_UNSPECIFIED, NAME_ID_FORMAT_TRANSIENT};

#[derive(Clone, Deserialize)]
pub struct IdpConfig {
    pub entity_id: String,
    /// Absolute URL of the SSO endpoint; requests naming another destination are denied.
    pub destination: String,
    pub x509_cert: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_password: Option<String>,
    #[serde(default = "default_true")]
    pub permit_force_authn: bool,
    #[serde(default = "default_assertion_lifetime")]
    pub assertion_lifetime_minutes: u32,
    #[serde(default)]
    pub service_providers: Vec<SpConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpConfig {
    pub entity_id: String,
    /// Authorized ACS URLs, the first one is the default.
    #[serde(default)]
    pub acs_urls: Vec<String>,
    #[serde(default)]
    pub relay_state: String,
    #[serde(default = "default_consent")]
    pub default_consent: String,
    #[serde(default = "default_name_id_format")]
    pub default_name_id_format: String,
    #[serde(default)]
    pub protocol_binding: ProtocolBinding,
    #[serde(default = "default_requested_attributes")]
    pub requested_attributes: Vec<String>,
    #[serde(default)]
    pub name_id_attribute: Option<String>,
    #[serde(default)]
    pub sp_cert: Option<String>,
    #[serde(default = "default_true")]
    pub sign_response: bool,
    #[serde(default)]
    pub require_signed_assertion: bool,
}

impl IdpConfig {
    pub fn from_json(input: &str) -> Result<Self, SamlError> {
        serde_json::from_str(input).map_err(|e| SamlError::InvalidConfig(e.to_string()))
    }
}

fn default_true() -> bool {
    true
}

fn default_assertion_lifetime() -> u32 {
    60
}

fn default_consent() -> String {
    CONSENT_UNSPECIFIED.into()
}

fn default_name_id_format() -> String {
    NAME_ID_FORMAT_TRANSIENT.into()
}

fn default_requested_attributes() -> Vec<String> {
    vec!["uid".into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let config = IdpConfig::from_json(
            r#"{
                "entity_id": "https://idp.example.com",
                "destination": "https://idp.example.com/saml2",
                "x509_cert": "cert",
                "private_key": "key",
                "service_providers": [{
                    "entity_id": "https://sp.example.com",
                    "acs_urls": ["https://sp.example.com/saml2/acs"]
                }]
            }"#,
        )
        .unwrap();

        assert!(config.permit_force_authn);
        assert_eq!(config.assertion_lifetime_minutes, 60);
        assert_eq!(config.private_key_password, None);

        let sp = &config.service_providers[0];
        assert_eq!(sp.relay_state, "");
        assert_eq!(sp.default_consent, CONSENT_UNSPECIFIED);
        assert_eq!(sp.default_name_id_format, NAME_ID_FORMAT_TRANSIENT);
        assert_eq!(sp.protocol_binding, ProtocolBinding::Post);
        assert_eq!(sp.requested_attributes, vec!["uid".to_string()]);
        assert!(sp.sign_response);
        assert!(!sp.require_signed_assertion);
    }

    #[test]
    fn binding_is_read_as_urn() {
        let sp: SpConfig = serde_json::from_str(
            r#"{
                "entity_id": "sp",
                "protocol_binding": "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect"
            }"#,
        )
        .unwrap();
        assert_eq!(sp.protocol_binding, ProtocolBinding::Redirect);
    }

    #[test]
    fn rejects_missing_entity_id() {
        assert!(matches!(
            IdpConfig::from_json(r#"{"destination": "x"}"#),
            Err(SamlError::InvalidConfig(_))
        ));
    }
}
