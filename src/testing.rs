//! Fixtures shared by the unit tests.

use std::sync::OnceLock;

use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    pkey::PKey,
    rsa::Rsa,
    x509::{X509Builder, X509NameBuilder},
};

use crate::{
    config::{IdpConfig, SpConfig},
    flow::{Authenticator, LoginRequest, SessionAttributes},
    AuthnRequestBuilder, IdentityProvider, IdentityProviderBuilder, ProtocolBinding, Registry,
    SamlError, ServiceProviderBuilder, SigningCredentials, CONSENT_UNSPECIFIED,
    NAME_ID_FORMAT_TRANSIENT,
};

pub const IDP_ENTITY_ID: &str = "https://idp.example.com/metadata";
pub const IDP_SSO_URL: &str = "https://idp.example.com/saml2";

pub const SP_ENTITY_ID: &str = "https://sp.example.com";
pub const SP_ACS_URL: &str = "https://sp.example.com/saml2/acs";
pub const SP_ALT_ACS_URL: &str = "https://sp.example.com/saml2/acs-alt";

pub const SIGNING_SP_ENTITY_ID: &str = "https://signing-sp.example.com";
pub const SIGNING_SP_ACS_URL: &str = "https://signing-sp.example.com/acs";

pub const ASSERTION_SP_ENTITY_ID: &str = "https://assertion-sp.example.com";
pub const ASSERTION_SP_ACS_URL: &str = "https://assertion-sp.example.com/acs";

pub const RELAY_SP_ENTITY_ID: &str = "https://relay-sp.example.com";
pub const RELAY_SP_ACS_URL: &str = "https://relay-sp.example.com/acs";
pub const RELAY_SP_DEFAULT_STATE: &str = "/landing";

const LOGIN_URL: &str = "https://login.example.com/authenticate";

/// PKCS#8 private key and self-signed certificate, both PEM.
fn key_pair(common_name: &str) -> (Vec<u8>, Vec<u8>) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut cert = X509Builder::new().unwrap();
    cert.set_version(2).unwrap();
    cert.set_serial_number(&BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap())
        .unwrap();
    cert.set_subject_name(&name).unwrap();
    cert.set_issuer_name(&name).unwrap();
    cert.set_pubkey(&key).unwrap();
    cert.set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    cert.set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();
    cert.sign(&key, MessageDigest::sha256()).unwrap();

    (
        key.private_key_to_pem_pkcs8().unwrap(),
        cert.build().to_pem().unwrap(),
    )
}

fn idp_key_pair() -> &'static (Vec<u8>, Vec<u8>) {
    static PAIR: OnceLock<(Vec<u8>, Vec<u8>)> = OnceLock::new();
    PAIR.get_or_init(|| key_pair("idp.example.com"))
}

pub fn sp_key_pair() -> (Vec<u8>, Vec<u8>) {
    static PAIR: OnceLock<(Vec<u8>, Vec<u8>)> = OnceLock::new();
    PAIR.get_or_init(|| key_pair("signing-sp.example.com"))
        .clone()
}

pub fn idp_credentials() -> SigningCredentials {
    let (key, cert) = idp_key_pair();
    SigningCredentials::new(key.clone(), cert.clone())
}

pub fn identity_provider() -> IdentityProvider {
    IdentityProviderBuilder::new()
        .entity_id(IDP_ENTITY_ID)
        .destination_url(IDP_SSO_URL)
        .credentials(idp_credentials())
        .build()
        .unwrap()
}

pub fn idp_config() -> IdpConfig {
    let (key, cert) = idp_key_pair();
    IdpConfig {
        entity_id: IDP_ENTITY_ID.into(),
        destination: IDP_SSO_URL.into(),
        x509_cert: String::from_utf8(cert.clone()).unwrap(),
        private_key: String::from_utf8(key.clone()).unwrap(),
        private_key_password: None,
        permit_force_authn: true,
        assertion_lifetime_minutes: 60,
        service_providers: vec![SpConfig {
            entity_id: SP_ENTITY_ID.into(),
            acs_urls: vec![SP_ACS_URL.into()],
            relay_state: String::new(),
            default_consent: CONSENT_UNSPECIFIED.into(),
            default_name_id_format: NAME_ID_FORMAT_TRANSIENT.into(),
            protocol_binding: ProtocolBinding::Post,
            requested_attributes: vec!["uid".into()],
            name_id_attribute: None,
            sp_cert: None,
            sign_response: true,
            require_signed_assertion: false,
        }],
    }
}

/// The IdP with a response-signing SP, an assertion-signing SP and an SP
/// with a default relay state.
pub fn registry() -> Registry {
    let mut registry = Registry::new(identity_provider());
    registry
        .register(
            ServiceProviderBuilder::new()
                .entity_id(SP_ENTITY_ID)
                .acs_url(SP_ACS_URL)
                .acs_url(SP_ALT_ACS_URL)
                .requested_attributes(["uid", "mail", "cn"])
                .name_id_attribute("mail")
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ServiceProviderBuilder::new()
                .entity_id(ASSERTION_SP_ENTITY_ID)
                .acs_url(ASSERTION_SP_ACS_URL)
                .sign_response(false)
                .require_signed_assertion(true)
                .requested_attributes(["uid"])
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ServiceProviderBuilder::new()
                .entity_id(RELAY_SP_ENTITY_ID)
                .acs_url(RELAY_SP_ACS_URL)
                .default_relay_state(RELAY_SP_DEFAULT_STATE)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

/// [`registry`] plus an SP whose requests must carry a redirect signature
/// made with [`sp_key_pair`].
pub fn registry_with_signing_sp() -> Registry {
    let (_, cert) = sp_key_pair();
    let mut registry = registry();
    registry
        .register(
            ServiceProviderBuilder::new()
                .entity_id(SIGNING_SP_ENTITY_ID)
                .acs_url(SIGNING_SP_ACS_URL)
                .certificate(&cert)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

/// A fresh, valid request from [`SP_ENTITY_ID`].
pub fn request() -> AuthnRequestBuilder {
    AuthnRequestBuilder::new()
        .auto_id()
        .issued_now()
        .issuer(SP_ENTITY_ID)
}

/// Records what the flow asks of the primary authenticator.
pub struct FakeAuthenticator {
    pub authenticated: bool,
    pub attributes: SessionAttributes,
    pub unauthenticate_calls: usize,
    pub logins: Vec<LoginRequest>,
}

impl FakeAuthenticator {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated,
            attributes: SessionAttributes::from([
                ("uid".to_string(), vec!["jdoe".to_string()]),
                ("mail".to_string(), vec!["jane@example.com".to_string()]),
                ("cn".to_string(), vec!["Jane Doe".to_string()]),
            ]),
            unauthenticate_calls: 0,
            logins: Vec::new(),
        }
    }
}

impl Authenticator for FakeAuthenticator {
    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn unauthenticate(&mut self) -> Result<(), SamlError> {
        self.authenticated = false;
        self.unauthenticate_calls += 1;
        Ok(())
    }

    fn attributes(&self) -> SessionAttributes {
        self.attributes.clone()
    }

    fn initiate_login(&mut self, login: LoginRequest) -> Result<String, SamlError> {
        let location = format!("{LOGIN_URL}?state={}", login.continuation_key);
        self.logins.push(login);
        Ok(location)
    }
}
