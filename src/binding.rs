//! HTTP-Redirect binding: the `SAMLRequest` query string.

use std::{collections::HashMap, io::Read};

use flate2::read::DeflateDecoder;
use url::form_urlencoded;

use crate::{utils::decode_xml_base64, SamlError};

pub const SAML_REQUEST: &str = "SAMLRequest";
pub const RELAY_STATE: &str = "RelayState";
pub const SIG_ALG: &str = "SigAlg";
pub const SIGNATURE: &str = "Signature";

const PARAMETERS: [&str; 4] = [SAML_REQUEST, RELAY_STATE, SIG_ALG, SIGNATURE];

const MAX_ENCODED_SIZE: usize = 128 * 1024;
const MAX_DECOMPRESSED_SIZE: u64 = 64 * 1024;

/// The binding parameters of a redirect query.
///
/// The values are kept exactly as they arrived (still URL-encoded) so the
/// signed octets can be reconstructed, next to their form-decoded values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectQuery {
    saml_request: String,
    relay_state: Option<String>,
    sig_alg: Option<String>,
    signature: Option<String>,
    decoded: HashMap<String, String>,
}

impl RedirectQuery {
    /// Parses a raw query string, or a full URL carrying one.
    pub fn parse(raw: &str) -> Result<Self, SamlError> {
        let query = match raw.split_once('?') {
            Some((_, query)) => query,
            None => raw,
        };
        let query = query.split('#').next().unwrap_or_default();

        let mut saml_request = None;
        let mut relay_state = None;
        let mut sig_alg = None;
        let mut signature = None;
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let slot = match key {
                SAML_REQUEST => &mut saml_request,
                RELAY_STATE => &mut relay_state,
                SIG_ALG => &mut sig_alg,
                SIGNATURE => &mut signature,
                _ => continue,
            };
            if slot.is_some() {
                return Err(SamlError::MalformedRequest(format!("repeated {key} parameter")));
            }
            *slot = Some(value.to_string());
        }

        let saml_request = saml_request
            .filter(|value| !value.is_empty())
            .ok_or_else(|| SamlError::MalformedRequest("no SAMLRequest parameter".into()))?;
        if saml_request.len() > MAX_ENCODED_SIZE {
            return Err(SamlError::MalformedRequest(format!(
                "SAMLRequest exceeds {MAX_ENCODED_SIZE} bytes"
            )));
        }

        let decoded = form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| PARAMETERS.contains(&key.as_ref()))
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        Ok(Self {
            saml_request,
            relay_state,
            sig_alg,
            signature,
            decoded,
        })
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// The octets covered by the redirect signature:
    /// `SAMLRequest=..[&RelayState=..]&SigAlg=..` in their received encoding.
    pub fn signed_content(&self) -> Option<String> {
        let sig_alg = self.sig_alg.as_ref()?;
        let mut content = format!("{SAML_REQUEST}={}", self.saml_request);
        if let Some(relay_state) = &self.relay_state {
            content.push_str(&format!("&{RELAY_STATE}={relay_state}"));
        }
        content.push_str(&format!("&{SIG_ALG}={sig_alg}"));
        Some(content)
    }

    fn decoded(&self, key: &str) -> Option<&str> {
        self.decoded.get(key).map(String::as_str)
    }

    pub fn relay_state(&self) -> Option<String> {
        self.decoded(RELAY_STATE).map(str::to_string)
    }

    pub fn sig_alg(&self) -> Option<String> {
        self.decoded(SIG_ALG).map(str::to_string)
    }

    pub fn signature(&self) -> Result<Option<Vec<u8>>, SamlError> {
        self.decoded(SIGNATURE)
            .map(|value| {
                decode_xml_base64(value)
                    .map_err(|e| SamlError::MalformedRequest(format!("Signature: {e}")))
            })
            .transpose()
    }

    /// Reverses URL-encoding, base64 and raw deflate on `SAMLRequest`.
    pub fn message(&self) -> Result<Vec<u8>, SamlError> {
        let encoded = self.decoded(SAML_REQUEST).unwrap_or_default();
        let compressed = decode_xml_base64(encoded)
            .map_err(|e| SamlError::MalformedRequest(format!("SAMLRequest: {e}")))?;
        inflate(&compressed)
    }
}

/// Decodes a redirect query string into the request XML and its RelayState.
pub fn decode_redirect_query_string(raw: &str) -> Result<(Vec<u8>, Option<String>), SamlError> {
    let query = RedirectQuery::parse(raw)?;
    Ok((query.message()?, query.relay_state()))
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>, SamlError> {
    let mut xml = Vec::new();
    DeflateDecoder::new(compressed)
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut xml)
        .map_err(|e| SamlError::MalformedRequest(format!("inflate: {e}")))?;
    if xml.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(SamlError::MalformedRequest(format!(
            "inflated SAMLRequest exceeds {MAX_DECOMPRESSED_SIZE} bytes"
        )));
    }
    Ok(xml)
}

#[cfg(test)]
mod tests {
    use base64::{prelude::BASE64_STANDARD, Engine};
    use deflate::deflate_bytes;

    use super::*;

    fn encode(xml: &str) -> String {
        urlencoding::encode(&BASE64_STANDARD.encode(deflate_bytes(xml.as_bytes()))).into_owned()
    }

    #[test]
    fn decodes_message_and_relay_state() {
        let raw = format!(
            "https://idp.example.com/saml2?{SAML_REQUEST}={}&{RELAY_STATE}=a%20b%2Fc",
            encode("<samlp:AuthnRequest/>")
        );
        let (xml, relay_state) = decode_redirect_query_string(&raw).unwrap();
        assert_eq!(xml, b"<samlp:AuthnRequest/>");
        assert_eq!(relay_state.as_deref(), Some("a b/c"));
    }

    #[test]
    fn signed_content_keeps_received_encoding() {
        let query =
            RedirectQuery::parse("SAMLRequest=abc%2B&RelayState=x%20y&SigAlg=alg%23&Signature=c2ln")
                .unwrap();
        assert!(query.is_signed());
        assert_eq!(
            query.signed_content().as_deref(),
            Some("SAMLRequest=abc%2B&RelayState=x%20y&SigAlg=alg%23")
        );
        assert_eq!(query.sig_alg().as_deref(), Some("alg#"));
        assert_eq!(query.signature().unwrap(), Some(b"sig".to_vec()));
    }

    #[test]
    fn missing_request_is_malformed() {
        assert!(matches!(
            RedirectQuery::parse("RelayState=x"),
            Err(SamlError::MalformedRequest(_))
        ));
        assert!(matches!(
            RedirectQuery::parse("SAMLRequest=a&SAMLRequest=b"),
            Err(SamlError::MalformedRequest(_))
        ));
    }

    #[test]
    fn relay_state_is_form_decoded() {
        let query = RedirectQuery::parse("SAMLRequest=abc&RelayState=a+b%2Bc").unwrap();
        assert_eq!(query.relay_state().as_deref(), Some("a b+c"));
        // The signed octets keep the plus as received.
        let query = RedirectQuery::parse("SAMLRequest=abc&RelayState=a+b&SigAlg=x").unwrap();
        assert_eq!(
            query.signed_content().as_deref(),
            Some("SAMLRequest=abc&RelayState=a+b&SigAlg=x")
        );
    }

    #[test]
    fn inflate_cap_includes_limit() {
        let at_limit = vec![b'a'; MAX_DECOMPRESSED_SIZE as usize];
        assert_eq!(inflate(&deflate_bytes(&at_limit)).unwrap().len(), at_limit.len());

        let over_limit = vec![b'a'; MAX_DECOMPRESSED_SIZE as usize + 1];
        assert!(matches!(
            inflate(&deflate_bytes(&over_limit)),
            Err(SamlError::MalformedRequest(_))
        ));
    }

    #[test]
    fn bad_base64_is_malformed() {
        let query = RedirectQuery::parse("SAMLRequest=!!not*base64!!").unwrap();
        assert!(matches!(query.message(), Err(SamlError::MalformedRequest(_))));
    }
}
