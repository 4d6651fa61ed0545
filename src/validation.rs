use time::{Duration, OffsetDateTime};

use crate::{
    binding::RedirectQuery, flow::Authenticator, signature::verify_redirect_signature,
    AuthnRequest, ProtocolBinding, Registry, SamlError, StatusCode, ValidationOutcome,
};

/// How far `IssueInstant` may stray from our clock in either direction.
pub const MAX_CLOCK_SKEW: Duration = Duration::minutes(5);

/// Runs the request through the trust and sanity checks, in order, stopping
/// at the first failure.
///
/// Defaults the ACS URL, NameID format and protocol binding from the SP's
/// configuration when the request leaves them out. Only an issuer we have
/// never heard of is an error: there is no trusted ACS to answer it on.
pub fn validate<A: Authenticator + ?Sized>(
    req: &mut AuthnRequest,
    registry: &Registry,
    authenticator: &A,
    now: OffsetDateTime,
) -> Result<ValidationOutcome, SamlError> {
    if req.version != "2.0" {
        return Ok(ValidationOutcome::failure(
            StatusCode::VersionMismatch,
            "Version 2.0 is required",
        ));
    }

    let sp = registry
        .service_provider(&req.issuer)
        .ok_or_else(|| SamlError::UnknownServiceProvider(req.issuer.clone()))?;
    let idp = registry.identity_provider();

    if let Some(cert) = sp.certificate() {
        let verified = RedirectQuery::parse(&req.raw_query_string)
            .and_then(|query| verify_redirect_signature(&query, cert));
        if let Err(e) = verified {
            tracing::info!(request_id = %req.request_id, error = %e, "request verification failed");
            return Ok(ValidationOutcome::failure(
                StatusCode::RequesterError,
                "Signature verification failed",
            ));
        }
    }

    if let Some(destination) = &req.destination {
        if destination != idp.destination_url() {
            return Ok(ValidationOutcome::failure(
                StatusCode::RequestDenied,
                "Incorrect Destination",
            ));
        }
    }

    if req.issue_instant > now + MAX_CLOCK_SKEW {
        return Ok(ValidationOutcome::failure(
            StatusCode::AuthnFailed,
            "Request is in the future",
        ));
    } else if req.issue_instant < now - MAX_CLOCK_SKEW {
        return Ok(ValidationOutcome::failure(
            StatusCode::AuthnFailed,
            "Request has expired",
        ));
    }

    if req.is_passive && !authenticator.is_authenticated() {
        return Ok(ValidationOutcome::failure(
            StatusCode::NoPassive,
            "Passive authentication failed",
        ));
    }

    let acs_url = req
        .acs_url
        .get_or_insert_with(|| sp.default_acs_url().to_string());
    if !sp.accepts_acs_url(acs_url) {
        return Ok(ValidationOutcome::failure(
            StatusCode::RequesterError,
            "Invalid Assertion Consumer Service",
        ));
    }

    if req.name_id_format.is_none() {
        req.name_id_format = Some(sp.default_name_id_format().to_string());
    }

    match &req.protocol_binding {
        None => req.protocol_binding = Some(sp.protocol_binding().to_string()),
        Some(binding) if binding.parse::<ProtocolBinding>() != Ok(sp.protocol_binding()) => {
            return Ok(ValidationOutcome::failure(
                StatusCode::UnsupportedBinding,
                format!("{binding} is unsupported"),
            ));
        }
        Some(_) => {}
    }

    Ok(ValidationOutcome::success())
}
