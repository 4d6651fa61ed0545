//! Suspended requests waiting on primary authentication.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};

use crate::{utils::random_hex, AuthnRequest, SamlError, ValidationOutcome};

/// Bumped whenever the snapshot layout changes; older snapshots are refused.
pub const SNAPSHOT_SCHEMA: u32 = 1;

const KEY_PREFIX: &str = "SA";

/// Fresh unguessable continuation key.
pub fn new_continuation_key() -> String {
    format!("{KEY_PREFIX}{}", random_hex(16))
}

/// Everything needed to finish a request after the authenticator hands
/// control back. The RelayState travels inside the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Continuation {
    pub schema: u32,
    pub request: AuthnRequest,
    pub outcome: ValidationOutcome,
}

impl Continuation {
    pub fn new(request: AuthnRequest, outcome: ValidationOutcome) -> Self {
        Self {
            schema: SNAPSHOT_SCHEMA,
            request,
            outcome,
        }
    }

    pub fn freeze(&self) -> Result<String, SamlError> {
        serde_json::to_string(self).map_err(|e| SamlError::Serialization(e.to_string()))
    }

    pub fn thaw(frozen: &str) -> Result<Self, SamlError> {
        let continuation: Continuation = serde_json::from_str(frozen)
            .map_err(|e| SamlError::CorruptContinuation(e.to_string()))?;
        if continuation.schema != SNAPSHOT_SCHEMA {
            return Err(SamlError::CorruptContinuation(format!(
                "unsupported snapshot schema {}",
                continuation.schema
            )));
        }
        Ok(continuation)
    }
}

/// Key-value store holding frozen continuations, typically the user's
/// session. Expiry is the store's business.
pub trait ContinuationStore {
    fn put(&self, key: &str, frozen: String) -> Result<(), SamlError>;

    /// Removes and returns the entry. A key is handed out at most once.
    fn take(&self, key: &str) -> Result<Option<String>, SamlError>;
}

#[derive(Debug, Default)]
pub struct MemoryContinuationStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryContinuationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, SamlError> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, SamlError> {
        Ok(self.entries()?.is_empty())
    }

    /// Reads an entry without consuming it.
    pub fn get(&self, key: &str) -> Result<Option<String>, SamlError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, SamlError> {
        self.entries
            .lock()
            .map_err(|e| SamlError::Store(e.to_string()))
    }
}

impl ContinuationStore for MemoryContinuationStore {
    fn put(&self, key: &str, frozen: String) -> Result<(), SamlError> {
        self.entries()?.insert(key.to_string(), frozen);
        Ok(())
    }

    fn take(&self, key: &str) -> Result<Option<String>, SamlError> {
        Ok(self.entries()?.remove(key))
    }
}

impl<S: ContinuationStore + ?Sized> ContinuationStore for &S {
    fn put(&self, key: &str, frozen: String) -> Result<(), SamlError> {
        (**self).put(key, frozen)
    }

    fn take(&self, key: &str) -> Result<Option<String>, SamlError> {
        (**self).take(key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::{Duration, OffsetDateTime};

    use crate::{StatusCode, NAME_ID_FORMAT_TRANSIENT};

    use super::*;

    fn request() -> AuthnRequest {
        AuthnRequest {
            version: "2.0".into(),
            request_id: "_abc".into(),
            issue_instant: OffsetDateTime::now_utc() - Duration::seconds(3),
            destination: Some("https://idp.example.com/saml2".into()),
            acs_url: Some("https://sp.example.com/acs".into()),
            force_authn: false,
            issuer: "https://sp.example.com".into(),
            is_passive: false,
            name_id_format: Some(NAME_ID_FORMAT_TRANSIENT.into()),
            name_id_allow_create: true,
            protocol_binding: None,
            consent: Some("urn:oasis:names:tc:SAML:2.0:consent:obtained".into()),
            relay_state: Some("relay &\"state\"".into()),
            raw_xml: "<samlp:AuthnRequest/>".into(),
            raw_query_string: "SAMLRequest=abc&RelayState=x".into(),
        }
    }

    #[test]
    fn snapshot_restores_every_field() {
        let continuation = Continuation::new(
            request(),
            ValidationOutcome::failure(StatusCode::NoPassive, "Passive authentication failed"),
        );
        let thawed = Continuation::thaw(&continuation.freeze().unwrap()).unwrap();
        assert_eq!(thawed, continuation);
    }

    #[test]
    fn refuses_foreign_schema() {
        let mut continuation = Continuation::new(request(), ValidationOutcome::success());
        continuation.schema = SNAPSHOT_SCHEMA + 1;
        assert!(matches!(
            Continuation::thaw(&continuation.freeze().unwrap()),
            Err(SamlError::CorruptContinuation(_))
        ));
        assert!(matches!(
            Continuation::thaw("{not json"),
            Err(SamlError::CorruptContinuation(_))
        ));
    }

    #[test]
    fn keys_are_unguessable() {
        let a = new_continuation_key();
        assert!(a.starts_with(KEY_PREFIX));
        assert_eq!(a.len(), KEY_PREFIX.len() + 32);
        assert_ne!(a, new_continuation_key());
    }

    #[test]
    fn take_consumes_once() {
        let store = MemoryContinuationStore::new();
        store.put("SA1", "frozen".into()).unwrap();
        assert_eq!(store.take("SA1").unwrap().as_deref(), Some("frozen"));
        assert_eq!(store.take("SA1").unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn poisoned_store_reports_errors_everywhere() {
        let store = Arc::new(MemoryContinuationStore::new());
        store.put("SA1", "frozen".into()).unwrap();

        let holder = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = holder.entries.lock().unwrap();
            panic!("poisoning the store");
        })
        .join();

        assert!(matches!(store.len(), Err(SamlError::Store(_))));
        assert!(matches!(store.is_empty(), Err(SamlError::Store(_))));
        assert!(matches!(store.get("SA1"), Err(SamlError::Store(_))));
        assert!(matches!(store.put("SA2", "x".into()), Err(SamlError::Store(_))));
        assert!(matches!(store.take("SA1"), Err(SamlError::Store(_))));
    }
}
