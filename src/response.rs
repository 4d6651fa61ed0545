use base64::{prelude::BASE64_STANDARD, Engine};
use time::{Duration, OffsetDateTime};
use yaserde::YaSerialize;

use crate::{
    flow::SessionAttributes,
    signature::{sign_xml, SignatureTarget, SignatureTemplate},
    utils::{format_instant, random_id},
    AuthnRequest, IdentityProvider, SamlError, ServiceProvider, StatusCode, ValidationOutcome,
    AUTHN_CONTEXT_PASSWORD_PROTECTED_TRANSPORT, NAME_ID_FORMAT_TRANSIENT,
    SUBJECT_CONFIRMATION_BEARER,
};

/// A `samlp:Response` before serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDocument {
    pub id: String,
    pub issue_instant: OffsetDateTime,
    pub in_response_to: String,
    pub issuer: String,
    /// ACS URL the response is posted to.
    pub destination: String,
    pub status: StatusCode,
    pub status_message: Option<String>,
    pub assertion: Option<Assertion>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    pub id: String,
    pub issue_instant: OffsetDateTime,
    pub issuer: String,
    pub name_id: String,
    pub name_id_format: String,
    pub recipient: String,
    pub not_before: OffsetDateTime,
    pub not_on_or_after: OffsetDateTime,
    pub audience: String,
    /// Name and values, in the order the SP asked for them.
    pub attributes: Vec<(String, Vec<String>)>,
    pub session_index: String,
    pub authn_instant: OffsetDateTime,
    pub authn_context_class: String,
}

pub struct ResponseBuilder<'a> {
    idp: &'a IdentityProvider,
}

impl<'a> ResponseBuilder<'a> {
    pub fn new(idp: &'a IdentityProvider) -> Self {
        Self { idp }
    }

    pub fn build_success(
        &self,
        req: &AuthnRequest,
        sp: &ServiceProvider,
        attributes: &SessionAttributes,
    ) -> ResponseDocument {
        self.build_success_at(req, sp, attributes, OffsetDateTime::now_utc())
    }

    /// Success response with an assertion about the current session.
    ///
    /// Every instant in the document is `now`, truncated to whole seconds,
    /// apart from the expiry which is `now` plus the IdP's assertion lifetime.
    pub fn build_success_at(
        &self,
        req: &AuthnRequest,
        sp: &ServiceProvider,
        attributes: &SessionAttributes,
        now: OffsetDateTime,
    ) -> ResponseDocument {
        let now = whole_seconds(now);
        let destination = sp.resolve_acs_url(req.acs_url.as_deref()).to_string();
        let name_id_format = req
            .name_id_format
            .clone()
            .unwrap_or_else(|| sp.default_name_id_format().to_string());

        let name_id = sp
            .name_id_attribute()
            .and_then(|attribute| attributes.get(attribute))
            .and_then(|values| values.first())
            .filter(|_| name_id_format != NAME_ID_FORMAT_TRANSIENT)
            .cloned()
            .unwrap_or_else(random_id);

        let released = sp
            .requested_attributes()
            .iter()
            .filter_map(|name| {
                attributes
                    .get(name)
                    .map(|values| (name.clone(), values.clone()))
            })
            .collect();

        let assertion_id = random_id();
        ResponseDocument {
            id: random_id(),
            issue_instant: now,
            in_response_to: req.request_id.clone(),
            issuer: self.idp.entity_id().to_string(),
            destination: destination.clone(),
            status: StatusCode::Success,
            status_message: None,
            assertion: Some(Assertion {
                id: assertion_id.clone(),
                issue_instant: now,
                issuer: self.idp.entity_id().to_string(),
                name_id,
                name_id_format,
                recipient: destination,
                not_before: now,
                not_on_or_after: now + self.idp.assertion_lifetime(),
                audience: sp.entity_id().to_string(),
                attributes: released,
                session_index: assertion_id,
                authn_instant: now,
                authn_context_class: AUTHN_CONTEXT_PASSWORD_PROTECTED_TRANSPORT.to_string(),
            }),
        }
    }

    /// Assertion-less response carrying a failed validation outcome.
    pub fn build_error(
        &self,
        req: &AuthnRequest,
        sp: &ServiceProvider,
        outcome: &ValidationOutcome,
    ) -> ResponseDocument {
        ResponseDocument {
            id: random_id(),
            issue_instant: whole_seconds(OffsetDateTime::now_utc()),
            in_response_to: req.request_id.clone(),
            issuer: self.idp.entity_id().to_string(),
            destination: sp.resolve_acs_url(req.acs_url.as_deref()).to_string(),
            status: outcome.status,
            status_message: Some(outcome.message.clone()),
            assertion: None,
        }
    }

    /// Serializes and signs `doc` with the IdP's credentials.
    pub fn sign(&self, doc: &ResponseDocument, sp: &ServiceProvider) -> Result<Vec<u8>, SamlError> {
        let target = match doc.assertion {
            Some(_) if sp.require_signed_assertion() => SignatureTarget::Assertion,
            _ => SignatureTarget::Response,
        };
        let unsigned = yaserde::ser::to_string(&ResponseXml::new(doc, target)?)
            .map_err(SamlError::Serialization)?;
        sign_xml(unsigned.as_bytes(), self.idp.credentials(), target)
    }

    /// Base64 `SAMLResponse` form value.
    pub fn serialize(&self, doc: &ResponseDocument, sp: &ServiceProvider) -> Result<String, SamlError> {
        Ok(BASE64_STANDARD.encode(self.sign(doc, sp)?))
    }
}

fn whole_seconds(instant: OffsetDateTime) -> OffsetDateTime {
    instant - Duration::nanoseconds(instant.nanosecond().into())
}

#[derive(YaSerialize)]
#[yaserde(
  rename = "Response",
  namespaces = {
    "samlp" = "urn:oasis:names:tc:SAML:2.0:protocol",
    "saml" = "urn:oasis:names:tc:SAML:2.0:assertion",
    "ds" = "http://www.w3.org/2000/09/xmldsig#",
  },
  prefix = "samlp"
)]
struct ResponseXml {
    #[yaserde(attribute = true, rename = "ID")]
    id: String,
    #[yaserde(attribute = true, rename = "Version")]
    version: String,
    #[yaserde(attribute = true, rename = "IssueInstant")]
    issue_instant: String,
    #[yaserde(attribute = true, rename = "Destination")]
    destination: String,
    #[yaserde(attribute = true, rename = "InResponseTo")]
    in_response_to: String,
    #[yaserde(rename = "Issuer", prefix = "saml")]
    issuer: String,
    #[yaserde(rename = "Signature", prefix = "ds")]
    signature: Option<SignatureTemplate>,
    #[yaserde(rename = "Status", prefix = "samlp")]
    status: Status,
    #[yaserde(rename = "Assertion", prefix = "saml")]
    assertion: Option<AssertionXml>,
}

#[derive(YaSerialize)]
struct Status {
    #[yaserde(rename = "StatusCode", prefix = "samlp")]
    status_code: TopLevelStatusCode,
    #[yaserde(rename = "StatusMessage", prefix = "samlp")]
    status_message: Option<String>,
}

#[derive(YaSerialize)]
struct TopLevelStatusCode {
    #[yaserde(attribute = true, rename = "Value")]
    value: String,
    #[yaserde(rename = "StatusCode", prefix = "samlp")]
    status_code: Option<SecondLevelStatusCode>,
}

#[derive(YaSerialize)]
struct SecondLevelStatusCode {
    #[yaserde(attribute = true, rename = "Value")]
    value: String,
}

#[derive(YaSerialize)]
struct AssertionXml {
    #[yaserde(attribute = true, rename = "ID")]
    id: String,
    #[yaserde(attribute = true, rename = "Version")]
    version: String,
    #[yaserde(attribute = true, rename = "IssueInstant")]
    issue_instant: String,
    #[yaserde(rename = "Issuer", prefix = "saml")]
    issuer: String,
    #[yaserde(rename = "Signature", prefix = "ds")]
    signature: Option<SignatureTemplate>,
    #[yaserde(rename = "Subject", prefix = "saml")]
    subject: Subject,
    #[yaserde(rename = "Conditions", prefix = "saml")]
    conditions: Conditions,
    #[yaserde(rename = "AuthnStatement", prefix = "saml")]
    authn_statement: AuthnStatement,
    #[yaserde(rename = "AttributeStatement", prefix = "saml")]
    attribute_statement: Option<AttributeStatement>,
}

#[derive(YaSerialize)]
struct Subject {
    #[yaserde(rename = "NameID", prefix = "saml")]
    name_id: NameId,
    #[yaserde(rename = "SubjectConfirmation", prefix = "saml")]
    subject_confirmation: SubjectConfirmation,
}

#[derive(YaSerialize)]
struct NameId {
    #[yaserde(attribute = true, rename = "Format")]
    format: String,
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct SubjectConfirmation {
    #[yaserde(attribute = true, rename = "Method")]
    method: String,
    #[yaserde(rename = "SubjectConfirmationData", prefix = "saml")]
    data: SubjectConfirmationData,
}

#[derive(YaSerialize)]
struct SubjectConfirmationData {
    #[yaserde(attribute = true, rename = "InResponseTo")]
    in_response_to: String,
    #[yaserde(attribute = true, rename = "NotOnOrAfter")]
    not_on_or_after: String,
    #[yaserde(attribute = true, rename = "Recipient")]
    recipient: String,
}

#[derive(YaSerialize)]
struct Conditions {
    #[yaserde(attribute = true, rename = "NotBefore")]
    not_before: String,
    #[yaserde(attribute = true, rename = "NotOnOrAfter")]
    not_on_or_after: String,
    #[yaserde(rename = "AudienceRestriction", prefix = "saml")]
    audience_restriction: AudienceRestriction,
}

#[derive(YaSerialize)]
struct AudienceRestriction {
    #[yaserde(rename = "Audience", prefix = "saml")]
    audience: String,
}

#[derive(YaSerialize)]
struct AuthnStatement {
    #[yaserde(attribute = true, rename = "AuthnInstant")]
    authn_instant: String,
    #[yaserde(attribute = true, rename = "SessionIndex")]
    session_index: String,
    #[yaserde(rename = "AuthnContext", prefix = "saml")]
    authn_context: AuthnContext,
}

#[derive(YaSerialize)]
struct AuthnContext {
    #[yaserde(rename = "AuthnContextClassRef", prefix = "saml")]
    class_ref: String,
}

#[derive(YaSerialize)]
struct AttributeStatement {
    #[yaserde(rename = "Attribute", prefix = "saml")]
    attributes: Vec<Attribute>,
}

#[derive(YaSerialize)]
struct Attribute {
    #[yaserde(attribute = true, rename = "Name")]
    name: String,
    #[yaserde(rename = "AttributeValue", prefix = "saml")]
    values: Vec<String>,
}

impl ResponseXml {
    fn new(doc: &ResponseDocument, target: SignatureTarget) -> Result<Self, SamlError> {
        let assertion = doc
            .assertion
            .as_ref()
            .map(|assertion| AssertionXml::new(assertion, &doc.in_response_to, target))
            .transpose()?;
        Ok(ResponseXml {
            id: doc.id.clone(),
            version: "2.0".into(),
            issue_instant: format_instant(doc.issue_instant)?,
            destination: doc.destination.clone(),
            in_response_to: doc.in_response_to.clone(),
            issuer: doc.issuer.clone(),
            signature: (target == SignatureTarget::Response)
                .then(|| SignatureTemplate::enveloped(&doc.id)),
            status: Status {
                status_code: TopLevelStatusCode {
                    value: doc.status.top_level().into(),
                    status_code: doc
                        .status
                        .second_level()
                        .map(|value| SecondLevelStatusCode { value }),
                },
                status_message: doc.status_message.clone(),
            },
            assertion,
        })
    }
}

impl AssertionXml {
    fn new(
        assertion: &Assertion,
        in_response_to: &str,
        target: SignatureTarget,
    ) -> Result<Self, SamlError> {
        let not_on_or_after = format_instant(assertion.not_on_or_after)?;
        Ok(AssertionXml {
            id: assertion.id.clone(),
            version: "2.0".into(),
            issue_instant: format_instant(assertion.issue_instant)?,
            issuer: assertion.issuer.clone(),
            signature: (target == SignatureTarget::Assertion)
                .then(|| SignatureTemplate::enveloped(&assertion.id)),
            subject: Subject {
                name_id: NameId {
                    format: assertion.name_id_format.clone(),
                    content: assertion.name_id.clone(),
                },
                subject_confirmation: SubjectConfirmation {
                    method: SUBJECT_CONFIRMATION_BEARER.into(),
                    data: SubjectConfirmationData {
                        in_response_to: in_response_to.into(),
                        not_on_or_after: not_on_or_after.clone(),
                        recipient: assertion.recipient.clone(),
                    },
                },
            },
            conditions: Conditions {
                not_before: format_instant(assertion.not_before)?,
                not_on_or_after,
                audience_restriction: AudienceRestriction {
                    audience: assertion.audience.clone(),
                },
            },
            authn_statement: AuthnStatement {
                authn_instant: format_instant(assertion.authn_instant)?,
                session_index: assertion.session_index.clone(),
                authn_context: AuthnContext {
                    class_ref: assertion.authn_context_class.clone(),
                },
            },
            // An empty AttributeStatement is invalid.
            attribute_statement: (!assertion.attributes.is_empty()).then(|| AttributeStatement {
                attributes: assertion
                    .attributes
                    .iter()
                    .map(|(name, values)| Attribute {
                        name: name.clone(),
                        values: values.clone(),
                    })
                    .collect(),
            }),
        })
    }
}
