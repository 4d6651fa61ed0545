use std::{fmt::Display, str::FromStr};

use base64::{prelude::BASE64_STANDARD, Engine};
use deflate::deflate_bytes;
use libxml::xpath::Context;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use yaserde::YaSerialize;

use crate::{
    binding::{RedirectQuery, RELAY_STATE, SAML_REQUEST},
    signature::sign_redirect_query,
    utils::{
        find_value, format_instant, parse_instant, parse_xml, random_string, single_node,
        xpath_context,
    },
    SamlError, NAME_ID_FORMAT_ENTITY, NS_ASSERTION, NS_PROTOCOL,
};

/// An `AuthnRequest` as received over the HTTP-Redirect binding.
///
/// `acs_url`, `name_id_format`, `protocol_binding`, `consent` and
/// `force_authn` are normalized while the request is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnRequest {
    pub version: String,
    pub request_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issue_instant: OffsetDateTime,
    pub destination: Option<String>,
    pub acs_url: Option<String>,
    pub force_authn: bool,
    pub issuer: String,
    pub is_passive: bool,
    pub name_id_format: Option<String>,
    pub name_id_allow_create: bool,
    pub protocol_binding: Option<String>,
    pub consent: Option<String>,
    pub relay_state: Option<String>,
    pub raw_xml: String,
    pub raw_query_string: String,
}

impl AuthnRequest {
    /// Decodes the `SAMLRequest` of a redirect URL (or bare query string).
    ///
    /// Nothing here is trusted yet: the issuer is only a claim until the
    /// request has been validated.
    pub fn decode(raw_url: &str) -> Result<Self, SamlError> {
        let query = RedirectQuery::parse(raw_url)?;
        let xml = String::from_utf8(query.message()?)
            .map_err(|e| SamlError::MalformedRequest(format!("SAMLRequest is not UTF-8: {e}")))?;
        let relay_state = query.relay_state();

        let document = parse_xml(xml.as_bytes())?;
        let mut context = xpath_context(
            &document,
            &[("samlp", NS_PROTOCOL), ("saml", NS_ASSERTION)],
        )?;

        single_node(
            &context
                .evaluate("/samlp:AuthnRequest")
                .map_err(|_| SamlError::MalformedRequest("not an AuthnRequest".into()))?,
        )?;

        let required = |context: &mut Context, xpath: &str, name: &str| {
            find_value(context, xpath)
                .ok_or_else(|| SamlError::MalformedRequest(format!("AuthnRequest has no {name}")))
        };
        let request_id = required(&mut context, "/samlp:AuthnRequest/@ID", "ID")?;
        let version = required(&mut context, "/samlp:AuthnRequest/@Version", "Version")?;
        let issue_instant = parse_instant(&required(
            &mut context,
            "/samlp:AuthnRequest/@IssueInstant",
            "IssueInstant",
        )?)?;
        let issuer = required(&mut context, "/samlp:AuthnRequest/saml:Issuer", "Issuer")?;

        let flag = |context: &mut Context, xpath: &str, default: bool| {
            find_value(context, xpath).map_or(default, |value| value == "true" || value == "1")
        };
        let force_authn = flag(&mut context, "/samlp:AuthnRequest/@ForceAuthn", false);
        let is_passive = flag(&mut context, "/samlp:AuthnRequest/@IsPassive", false);
        let name_id_allow_create = flag(
            &mut context,
            "/samlp:AuthnRequest/samlp:NameIDPolicy/@AllowCreate",
            true,
        );

        Ok(AuthnRequest {
            version,
            request_id,
            issue_instant,
            destination: find_value(&mut context, "/samlp:AuthnRequest/@Destination"),
            acs_url: find_value(
                &mut context,
                "/samlp:AuthnRequest/@AssertionConsumerServiceURL",
            ),
            force_authn,
            issuer,
            is_passive,
            name_id_format: find_value(
                &mut context,
                "/samlp:AuthnRequest/samlp:NameIDPolicy/@Format",
            ),
            name_id_allow_create,
            protocol_binding: find_value(&mut context, "/samlp:AuthnRequest/@ProtocolBinding"),
            consent: find_value(&mut context, "/samlp:AuthnRequest/@Consent"),
            relay_state,
            raw_xml: xml,
            raw_query_string: raw_url
                .split_once('?')
                .map_or(raw_url, |(_, query)| query)
                .to_string(),
        })
    }
}

#[derive(YaSerialize)]
#[yaserde(
  rename = "AuthnRequest",
  namespaces = {
    "samlp" = "urn:oasis:names:tc:SAML:2.0:protocol",
    "saml" = "urn:oasis:names:tc:SAML:2.0:assertion",
  },
  prefix = "samlp"
)]
struct AuthnRequestXml {
    #[yaserde(attribute = true, rename = "ID")]
    id: String,
    #[yaserde(attribute = true, rename = "Version")]
    version: String,
    #[yaserde(attribute = true, rename = "IssueInstant")]
    issue_instant: String,
    #[yaserde(attribute = true, rename = "Destination")]
    destination: Option<String>,
    #[yaserde(attribute = true, rename = "ForceAuthn")]
    force_authn: bool,
    #[yaserde(attribute = true, rename = "IsPassive")]
    is_passive: bool,
    #[yaserde(attribute = true, rename = "ProtocolBinding")]
    protocol_binding: Option<String>,
    #[yaserde(attribute = true, rename = "AssertionConsumerServiceURL")]
    assertion_consumer_service_url: Option<String>,
    #[yaserde(rename = "Issuer", prefix = "saml")]
    issuer: Issuer,
    #[yaserde(rename = "NameIDPolicy", prefix = "samlp")]
    name_id_policy: Option<NameIdPolicy>,
}

#[derive(YaSerialize)]
struct Issuer {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct NameIdPolicy {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(attribute = true, rename = "AllowCreate")]
    allow_create: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolBinding {
    #[default]
    #[serde(rename = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST")]
    Post,
    #[serde(rename = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect")]
    Redirect,
}

impl Display for ProtocolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ProtocolBinding::Post => write!(f, "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST"),
            ProtocolBinding::Redirect => {
                write!(f, "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect")
            }
        }
    }
}

impl FromStr for ProtocolBinding {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" => Ok(ProtocolBinding::Post),
            "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" => Ok(ProtocolBinding::Redirect),
            _ => Err(()),
        }
    }
}

/// Builds `AuthnRequest`s the way an SP would send them. Used to drive the
/// IdP from tests and tooling.
#[derive(Default)]
pub struct AuthnRequestBuilder {
    id: Option<String>,
    version: Option<String>,
    issue_instant: Option<OffsetDateTime>,
    issuer: Option<String>,
    destination: Option<String>,
    protocol_binding: Option<String>,
    consumer_url: Option<String>,
    name_format: Option<String>,
    deny_create: bool,
    force_authn: bool,
    is_passive: bool,
}

impl AuthnRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(self, id: &str) -> Self {
        AuthnRequestBuilder {
            id: Some(id.into()),
            ..self
        }
    }

    pub fn auto_id(self) -> Self {
        AuthnRequestBuilder {
            id: Some(format!("_id{}", random_string(32))),
            ..self
        }
    }

    pub fn version(self, version: &str) -> Self {
        AuthnRequestBuilder {
            version: Some(version.into()),
            ..self
        }
    }

    pub fn issue_instant(self, instant: OffsetDateTime) -> Self {
        AuthnRequestBuilder {
            issue_instant: Some(instant),
            ..self
        }
    }

    pub fn issued_now(self) -> Self {
        AuthnRequestBuilder {
            issue_instant: Some(OffsetDateTime::now_utc()),
            ..self
        }
    }

    pub fn issuer(self, issuer: &str) -> Self {
        AuthnRequestBuilder {
            issuer: Some(issuer.into()),
            ..self
        }
    }

    pub fn destination(self, destination: &str) -> Self {
        AuthnRequestBuilder {
            destination: Some(destination.into()),
            ..self
        }
    }

    pub fn protocol_binding(self, binding: &str) -> Self {
        AuthnRequestBuilder {
            protocol_binding: Some(binding.into()),
            ..self
        }
    }

    pub fn consumer_url(self, url: &str) -> Self {
        AuthnRequestBuilder {
            consumer_url: Some(url.into()),
            ..self
        }
    }

    pub fn name_format(self, format: &str) -> Self {
        AuthnRequestBuilder {
            name_format: Some(format.into()),
            ..self
        }
    }

    pub fn allow_create(self, allow: bool) -> Self {
        AuthnRequestBuilder {
            deny_create: !allow,
            ..self
        }
    }

    pub fn force_authn(self, force: bool) -> Self {
        AuthnRequestBuilder {
            force_authn: force,
            ..self
        }
    }

    pub fn passive(self, passive: bool) -> Self {
        AuthnRequestBuilder {
            is_passive: passive,
            ..self
        }
    }

    pub fn build(self) -> Result<String, SamlError> {
        let issue_instant = self
            .issue_instant
            .ok_or(SamlError::MissingField("IssueInstant"))?;
        let deny_create = self.deny_create;
        let req = AuthnRequestXml {
            id: self.id.ok_or(SamlError::MissingField("ID"))?,
            version: self.version.unwrap_or_else(|| "2.0".to_string()),
            issue_instant: format_instant(issue_instant)?,
            destination: self.destination,
            force_authn: self.force_authn,
            is_passive: self.is_passive,
            protocol_binding: self.protocol_binding,
            assertion_consumer_service_url: self.consumer_url,
            issuer: Issuer {
                format: NAME_ID_FORMAT_ENTITY.to_string(),
                content: self.issuer.ok_or(SamlError::MissingField("Issuer"))?,
            },
            name_id_policy: self.name_format.map(|format| NameIdPolicy {
                format,
                allow_create: !deny_create,
            }),
        };
        yaserde::ser::to_string(&req).map_err(SamlError::Serialization)
    }

    pub fn build_and_encode(self) -> Result<String, SamlError> {
        let xml = self.build()?;
        let compressed = deflate_bytes(xml.as_bytes());
        Ok(BASE64_STANDARD.encode(compressed))
    }

    /// Full HTTP-Redirect binding URL for `idp_url`.
    pub fn build_redirect_url(
        self,
        idp_url: &str,
        relay_state: Option<&str>,
    ) -> Result<String, SamlError> {
        Ok(format!("{idp_url}?{}", self.encoded_query(relay_state)?))
    }

    /// As [`build_redirect_url`](Self::build_redirect_url), signed with the
    /// SP's PEM private key.
    pub fn build_signed_redirect_url(
        self,
        idp_url: &str,
        relay_state: Option<&str>,
        key_pem: &[u8],
    ) -> Result<String, SamlError> {
        let query = sign_redirect_query(&self.encoded_query(relay_state)?, key_pem)?;
        Ok(format!("{idp_url}?{query}"))
    }

    fn encoded_query(self, relay_state: Option<&str>) -> Result<String, SamlError> {
        let mut query = format!(
            "{SAML_REQUEST}={}",
            urlencoding::encode(&self.build_and_encode()?)
        );
        if let Some(relay_state) = relay_state {
            query.push_str(&format!("&{RELAY_STATE}={}", urlencoding::encode(relay_state)));
        }
        Ok(query)
    }
}
