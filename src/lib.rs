mod authn_request;
mod binding;
mod config;
mod continuation;
mod error;
mod flow;
mod metadata;
mod registry;
mod response;
mod signature;
mod status;
mod utils;
mod validation;

#[cfg(test)]
mod testing;

pub use authn_request::{AuthnRequest, AuthnRequestBuilder, ProtocolBinding};
pub use binding::{decode_redirect_query_string, RedirectQuery};
pub use config::{IdpConfig, SpConfig};
pub use continuation::{new_continuation_key, Continuation, ContinuationStore, MemoryContinuationStore};
pub use error::SamlError;
pub use flow::{
    Authenticator, FlowController, FlowOutcome, LoginRequest, PostResponse, SessionAttributes,
    RESUME_HOOK,
};
pub use metadata::IdpMetadataBuilder;
pub use registry::{
    IdentityProvider, IdentityProviderBuilder, Registry, ServiceProvider, ServiceProviderBuilder,
};
pub use response::{Assertion, ResponseBuilder, ResponseDocument};
pub use signature::{
    sign_redirect_query, sign_xml, verify_redirect_signature, verify_xml, SignatureTarget,
    SigningCredentials,
};
pub use status::{StatusCode, ValidationOutcome};
pub use validation::{validate, MAX_CLOCK_SKEW};

use time::format_description::well_known::iso8601::{self, TimePrecision};

pub const NS_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const NS_METADATA: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub const NS_XMLDSIG: &str = "http://www.w3.org/2000/09/xmldsig#";

pub const NAME_ID_FORMAT_EMAIL_ADDRESS: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress";
pub const NAME_ID_FORMAT_TRANSIENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:transient";
pub const NAME_ID_FORMAT_PERSISTENT: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:persistent";
pub const NAME_ID_FORMAT_ENTITY: &str = "urn:oasis:names:tc:SAML:2.0:nameid-format:entity";

pub const CONSENT_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:2.0:consent:unspecified";

pub const AUTHN_CONTEXT_PASSWORD_PROTECTED_TRANSPORT: &str =
    "urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport";
pub const SUBJECT_CONFIRMATION_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";

// xs:dateTime isn't actually ISO8601, because implementors often don't support higher precisions.
pub const DATE_TIME_FORMAT: iso8601::Iso8601<
    {
        iso8601::Config::DEFAULT
            .set_time_precision(TimePrecision::Second {
                decimal_digits: None,
            })
            .encode()
    },
> = iso8601::Iso8601;
