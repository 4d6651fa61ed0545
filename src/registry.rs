use std::collections::HashMap;

use time::Duration;

use crate::{
    config::{IdpConfig, SpConfig},
    signature::SigningCredentials,
    ProtocolBinding, SamlError, CONSENT_UNSPECIFIED, NAME_ID_FORMAT_TRANSIENT,
};

const DEFAULT_ASSERTION_LIFETIME: Duration = Duration::minutes(60);

/// This IdP's identity and signing material.
#[derive(Debug, Clone)]
pub struct IdentityProvider {
    entity_id: String,
    destination_url: String,
    credentials: SigningCredentials,
    permit_force_authn: bool,
    assertion_lifetime: Duration,
}

impl IdentityProvider {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn destination_url(&self) -> &str {
        &self.destination_url
    }

    pub fn credentials(&self) -> &SigningCredentials {
        &self.credentials
    }

    pub fn permit_force_authn(&self) -> bool {
        self.permit_force_authn
    }

    pub fn assertion_lifetime(&self) -> Duration {
        self.assertion_lifetime
    }
}

pub struct IdentityProviderBuilder {
    entity_id: Option<String>,
    destination_url: Option<String>,
    credentials: Option<SigningCredentials>,
    permit_force_authn: bool,
    assertion_lifetime: Duration,
}

impl Default for IdentityProviderBuilder {
    fn default() -> Self {
        Self {
            entity_id: None,
            destination_url: None,
            credentials: None,
            permit_force_authn: true,
            assertion_lifetime: DEFAULT_ASSERTION_LIFETIME,
        }
    }
}

impl IdentityProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_id(self, entity_id: &str) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..self
        }
    }

    pub fn destination_url(self, url: &str) -> Self {
        Self {
            destination_url: Some(url.into()),
            ..self
        }
    }

    pub fn credentials(self, credentials: SigningCredentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..self
        }
    }

    pub fn permit_force_authn(self, permit: bool) -> Self {
        Self {
            permit_force_authn: permit,
            ..self
        }
    }

    pub fn assertion_lifetime(self, lifetime: Duration) -> Self {
        Self {
            assertion_lifetime: lifetime,
            ..self
        }
    }

    pub fn build(self) -> Result<IdentityProvider, SamlError> {
        let entity_id = self
            .entity_id
            .filter(|id| !id.is_empty())
            .ok_or(SamlError::MissingField("IdP entity id"))?;
        if !self.assertion_lifetime.is_positive() {
            return Err(SamlError::InvalidConfig(
                "assertion lifetime must be positive".into(),
            ));
        }
        Ok(IdentityProvider {
            entity_id,
            destination_url: self
                .destination_url
                .ok_or(SamlError::MissingField("IdP destination URL"))?,
            credentials: self
                .credentials
                .ok_or(SamlError::MissingField("IdP signing credentials"))?,
            permit_force_authn: self.permit_force_authn,
            assertion_lifetime: self.assertion_lifetime,
        })
    }
}

/// A trusted Service Provider.
#[derive(Debug, Clone)]
pub struct ServiceProvider {
    entity_id: String,
    acs_urls: Vec<String>,
    sign_response: bool,
    require_signed_assertion: bool,
    default_relay_state: String,
    default_consent: String,
    default_name_id_format: String,
    protocol_binding: ProtocolBinding,
    requested_attributes: Vec<String>,
    name_id_attribute: Option<String>,
    certificate: Option<Vec<u8>>,
}

impl ServiceProvider {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn acs_urls(&self) -> &[String] {
        &self.acs_urls
    }

    pub fn default_acs_url(&self) -> &str {
        // Non-empty by construction.
        &self.acs_urls[0]
    }

    pub fn accepts_acs_url(&self, url: &str) -> bool {
        self.acs_urls.iter().any(|acs| acs == url)
    }

    /// `requested` when it is one of ours, the default ACS otherwise.
    pub fn resolve_acs_url<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .filter(|url| self.accepts_acs_url(url))
            .unwrap_or_else(|| self.default_acs_url())
    }

    pub fn sign_response(&self) -> bool {
        self.sign_response
    }

    pub fn require_signed_assertion(&self) -> bool {
        self.require_signed_assertion
    }

    pub fn default_relay_state(&self) -> &str {
        &self.default_relay_state
    }

    /// Configured consent URN. Requests keep the `Consent` they carry;
    /// this value is never substituted into them.
    pub fn default_consent(&self) -> &str {
        &self.default_consent
    }

    pub fn default_name_id_format(&self) -> &str {
        &self.default_name_id_format
    }

    pub fn protocol_binding(&self) -> ProtocolBinding {
        self.protocol_binding
    }

    pub fn requested_attributes(&self) -> &[String] {
        &self.requested_attributes
    }

    pub fn name_id_attribute(&self) -> Option<&str> {
        self.name_id_attribute.as_deref()
    }

    /// PEM certificate used to check redirect signatures, if any.
    pub fn certificate(&self) -> Option<&[u8]> {
        self.certificate.as_deref()
    }
}

pub struct ServiceProviderBuilder {
    entity_id: Option<String>,
    acs_urls: Vec<String>,
    sign_response: bool,
    require_signed_assertion: bool,
    default_relay_state: String,
    default_consent: String,
    default_name_id_format: String,
    protocol_binding: ProtocolBinding,
    requested_attributes: Vec<String>,
    name_id_attribute: Option<String>,
    certificate: Option<Vec<u8>>,
}

impl Default for ServiceProviderBuilder {
    fn default() -> Self {
        Self {
            entity_id: None,
            acs_urls: Vec::new(),
            sign_response: true,
            require_signed_assertion: false,
            default_relay_state: String::new(),
            default_consent: CONSENT_UNSPECIFIED.into(),
            default_name_id_format: NAME_ID_FORMAT_TRANSIENT.into(),
            protocol_binding: ProtocolBinding::Post,
            requested_attributes: vec!["uid".into()],
            name_id_attribute: None,
            certificate: None,
        }
    }
}

impl ServiceProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_id(self, entity_id: &str) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..self
        }
    }

    pub fn acs_url(mut self, url: &str) -> Self {
        self.acs_urls.push(url.into());
        self
    }

    pub fn sign_response(self, sign: bool) -> Self {
        Self {
            sign_response: sign,
            ..self
        }
    }

    pub fn require_signed_assertion(self, require: bool) -> Self {
        Self {
            require_signed_assertion: require,
            ..self
        }
    }

    pub fn default_relay_state(self, relay_state: &str) -> Self {
        Self {
            default_relay_state: relay_state.into(),
            ..self
        }
    }

    pub fn default_consent(self, consent: &str) -> Self {
        Self {
            default_consent: consent.into(),
            ..self
        }
    }

    pub fn default_name_id_format(self, format: &str) -> Self {
        Self {
            default_name_id_format: format.into(),
            ..self
        }
    }

    pub fn protocol_binding(self, binding: ProtocolBinding) -> Self {
        Self {
            protocol_binding: binding,
            ..self
        }
    }

    pub fn requested_attributes<I, S>(self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            requested_attributes: attributes.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn name_id_attribute(self, attribute: &str) -> Self {
        Self {
            name_id_attribute: Some(attribute.into()),
            ..self
        }
    }

    pub fn certificate(self, cert_pem: &[u8]) -> Self {
        Self {
            certificate: Some(cert_pem.to_vec()),
            ..self
        }
    }

    pub fn build(self) -> Result<ServiceProvider, SamlError> {
        let entity_id = self
            .entity_id
            .filter(|id| !id.is_empty())
            .ok_or(SamlError::MissingField("SP entity id"))?;
        if self.acs_urls.is_empty() {
            return Err(SamlError::InvalidConfig(format!(
                "{entity_id}: no Assertion Consumer Service URL"
            )));
        }
        if self.sign_response == self.require_signed_assertion {
            return Err(SamlError::InvalidConfig(format!(
                "{entity_id}: exactly one of sign_response and require_signed_assertion must be set"
            )));
        }

        let mut requested_attributes: Vec<String> = Vec::new();
        for attribute in self.requested_attributes {
            if !requested_attributes.contains(&attribute) {
                requested_attributes.push(attribute);
            }
        }

        Ok(ServiceProvider {
            entity_id,
            acs_urls: self.acs_urls,
            sign_response: self.sign_response,
            require_signed_assertion: self.require_signed_assertion,
            default_relay_state: self.default_relay_state,
            default_consent: self.default_consent,
            default_name_id_format: self.default_name_id_format,
            protocol_binding: self.protocol_binding,
            requested_attributes,
            name_id_attribute: self.name_id_attribute,
            certificate: self.certificate,
        })
    }
}

impl TryFrom<SpConfig> for ServiceProvider {
    type Error = SamlError;

    fn try_from(config: SpConfig) -> Result<Self, Self::Error> {
        let mut builder = ServiceProviderBuilder::new()
            .entity_id(&config.entity_id)
            .sign_response(config.sign_response)
            .require_signed_assertion(config.require_signed_assertion)
            .default_relay_state(&config.relay_state)
            .default_consent(&config.default_consent)
            .default_name_id_format(&config.default_name_id_format)
            .protocol_binding(config.protocol_binding)
            .requested_attributes(config.requested_attributes);
        for url in &config.acs_urls {
            builder = builder.acs_url(url);
        }
        if let Some(attribute) = &config.name_id_attribute {
            builder = builder.name_id_attribute(attribute);
        }
        if let Some(cert) = &config.sp_cert {
            builder = builder.certificate(cert.as_bytes());
        }
        builder.build()
    }
}

/// The IdP and the Service Providers it trusts.
///
/// Populated once at startup and read-only afterwards, so it can be shared
/// between request handlers without locking.
#[derive(Debug)]
pub struct Registry {
    idp: IdentityProvider,
    service_providers: HashMap<String, ServiceProvider>,
}

impl Registry {
    pub fn new(idp: IdentityProvider) -> Self {
        Self {
            idp,
            service_providers: HashMap::new(),
        }
    }

    pub fn from_config(config: IdpConfig) -> Result<Self, SamlError> {
        let credentials = SigningCredentials::new(config.private_key, config.x509_cert)
            .with_password(config.private_key_password);
        let idp = IdentityProviderBuilder::new()
            .entity_id(&config.entity_id)
            .destination_url(&config.destination)
            .credentials(credentials)
            .permit_force_authn(config.permit_force_authn)
            .assertion_lifetime(Duration::minutes(config.assertion_lifetime_minutes.into()))
            .build()?;

        let mut registry = Registry::new(idp);
        for sp in config.service_providers {
            registry.register(sp.try_into()?)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, sp: ServiceProvider) -> Result<(), SamlError> {
        if self.service_providers.contains_key(sp.entity_id()) {
            return Err(SamlError::DuplicateServiceProvider(sp.entity_id.clone()));
        }
        tracing::info!(
            idp = %self.idp.entity_id,
            sp = %sp.entity_id,
            "added service provider"
        );
        self.service_providers.insert(sp.entity_id.clone(), sp);
        Ok(())
    }

    pub fn identity_provider(&self) -> &IdentityProvider {
        &self.idp
    }

    pub fn service_provider(&self, entity_id: &str) -> Option<&ServiceProvider> {
        self.service_providers.get(entity_id)
    }

    pub fn service_providers(&self) -> impl Iterator<Item = &ServiceProvider> {
        self.service_providers.values()
    }
}
