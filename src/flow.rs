//! Decide, suspend and resume: the request lifecycle around primary
//! authentication.

use std::{collections::HashMap, sync::Arc};

use time::OffsetDateTime;

use crate::{
    continuation::{new_continuation_key, Continuation, ContinuationStore},
    validation::validate,
    AuthnRequest, Registry, ResponseBuilder, SamlError, ServiceProvider, StatusCode,
    ValidationOutcome,
};

/// Identifies this engine's resume entry point to the authenticator.
pub const RESUME_HOOK: &str = "SA";

/// Attributes of the authenticated user, by name.
pub type SessionAttributes = HashMap<String, Vec<String>>;

/// Hand-off to the primary authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// Key of the frozen request; must come back to [`FlowController::resume`].
    pub continuation_key: String,
    pub force_reauth: bool,
    /// Correlates the primary login with the SAML request for tracing.
    pub correlation_id: String,
    pub resume_hook: &'static str,
}

/// The primary authenticator, bound to the current user's session.
pub trait Authenticator {
    fn is_authenticated(&self) -> bool;

    fn unauthenticate(&mut self) -> Result<(), SamlError>;

    fn attributes(&self) -> SessionAttributes;

    /// Starts a login and returns the URL to redirect the browser to.
    fn initiate_login(&mut self, login: LoginRequest) -> Result<String, SamlError>;
}

/// What the HTTP layer should answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Auto-submit `SAMLResponse` to the SP.
    Post(PostResponse),
    /// Send the browser to the authenticator.
    Redirect(String),
}

/// Contents of the HTTP-POST binding form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResponse {
    pub acs_url: String,
    pub saml_response: String,
    pub relay_state: Option<String>,
    pub response_id: String,
    pub status: StatusCode,
}

pub struct FlowController<S> {
    registry: Arc<Registry>,
    store: S,
}

impl<S: ContinuationStore> FlowController<S> {
    pub fn new(registry: Arc<Registry>, store: S) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handles an HTTP-Redirect binding request.
    pub fn handle<A: Authenticator>(
        &self,
        raw_url: &str,
        authenticator: &mut A,
    ) -> Result<FlowOutcome, SamlError> {
        let mut request = AuthnRequest::decode(raw_url).map_err(|e| {
            tracing::info!(error = %e, "failed to decode SAMLRequest");
            e
        })?;
        let outcome = validate(
            &mut request,
            &self.registry,
            authenticator,
            OffsetDateTime::now_utc(),
        )?;
        self.decide(request, outcome, authenticator)
    }

    /// Picks up a request frozen by [`handle`](Self::handle) once the
    /// authenticator is done.
    ///
    /// The key is consumed; a missing, expired or already used key is fatal.
    pub fn resume<A: Authenticator>(
        &self,
        continuation_key: &str,
        authenticator: &mut A,
    ) -> Result<FlowOutcome, SamlError> {
        let frozen = self.store.take(continuation_key)?.ok_or_else(|| {
            tracing::warn!(key = %continuation_key, "failed to restore frozen request");
            SamlError::ContinuationNotFound(continuation_key.to_string())
        })?;
        let Continuation {
            request,
            mut outcome,
            ..
        } = Continuation::thaw(&frozen)?;

        tracing::info!(request_id = %request.request_id, "thawed request after primary authentication");

        if !authenticator.is_authenticated() {
            outcome = ValidationOutcome::failure(
                StatusCode::AuthnFailed,
                "Primary authentication failed",
            );
        }
        self.decide(request, outcome, authenticator)
    }

    fn decide<A: Authenticator>(
        &self,
        mut request: AuthnRequest,
        outcome: ValidationOutcome,
        authenticator: &mut A,
    ) -> Result<FlowOutcome, SamlError> {
        let sp = self
            .registry
            .service_provider(&request.issuer)
            .ok_or_else(|| SamlError::UnknownServiceProvider(request.issuer.clone()))?;
        let force_authn =
            request.force_authn && self.registry.identity_provider().permit_force_authn();

        tracing::info!(
            request_id = %request.request_id,
            issuer = %request.issuer,
            status = %outcome.status,
            "authn request"
        );

        if !outcome.is_success() {
            return self.send_error(&request, sp, &outcome);
        }
        if authenticator.is_authenticated() && !force_authn {
            tracing::info!(
                request_id = %request.request_id,
                "request satisfied by previous authentication"
            );
            return self.send_success(&request, sp, authenticator);
        }

        if force_authn {
            authenticator.unauthenticate()?;
            // One-shot: the resumed request must not force again.
            request.force_authn = false;
        }

        let request_id = request.request_id.clone();
        let continuation_key = new_continuation_key();
        self.store
            .put(&continuation_key, Continuation::new(request, outcome).freeze()?)?;

        tracing::info!(request_id = %request_id, "froze request for primary authentication");

        let location = authenticator.initiate_login(LoginRequest {
            continuation_key,
            force_reauth: force_authn,
            correlation_id: format!("Pri{request_id}"),
            resume_hook: RESUME_HOOK,
        })?;
        Ok(FlowOutcome::Redirect(location))
    }

    fn send_success<A: Authenticator>(
        &self,
        request: &AuthnRequest,
        sp: &ServiceProvider,
        authenticator: &A,
    ) -> Result<FlowOutcome, SamlError> {
        let builder = ResponseBuilder::new(self.registry.identity_provider());
        let response = builder.build_success(request, sp, &authenticator.attributes());

        tracing::info!(
            response_id = %response.id,
            request_id = %request.request_id,
            "creating success response"
        );

        Ok(FlowOutcome::Post(PostResponse {
            acs_url: response.destination.clone(),
            saml_response: builder.serialize(&response, sp)?,
            relay_state: relay_state(request, sp),
            response_id: response.id,
            status: StatusCode::Success,
        }))
    }

    fn send_error(
        &self,
        request: &AuthnRequest,
        sp: &ServiceProvider,
        outcome: &ValidationOutcome,
    ) -> Result<FlowOutcome, SamlError> {
        let builder = ResponseBuilder::new(self.registry.identity_provider());
        let response = builder.build_error(request, sp, outcome);

        tracing::info!(
            response_id = %response.id,
            request_id = %request.request_id,
            status = %outcome.status,
            message = %outcome.message,
            "creating error response"
        );

        Ok(FlowOutcome::Post(PostResponse {
            acs_url: response.destination.clone(),
            saml_response: builder.serialize(&response, sp)?,
            relay_state: relay_state(request, sp),
            response_id: response.id,
            status: outcome.status,
        }))
    }
}

fn relay_state(request: &AuthnRequest, sp: &ServiceProvider) -> Option<String> {
    request.relay_state.clone().or_else(|| {
        Some(sp.default_relay_state())
            .filter(|relay_state| !relay_state.is_empty())
            .map(str::to_string)
    })
}
