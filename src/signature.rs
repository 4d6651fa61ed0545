//! XML-DSig signing and verification, and HTTP-Redirect query signatures.

use std::fmt::Debug;

use base64::{prelude::BASE64_STANDARD, Engine};
use libxml::tree::SaveOptions;
use openssl::{
    hash::MessageDigest,
    pkey::PKey,
    sign::{Signer, Verifier},
    x509::X509,
};
use xmlsec::{XmlSecDocumentExt as _, XmlSecKey, XmlSecKeyFormat, XmlSecSignatureContext};
use yaserde::YaSerialize;

use crate::{
    binding::{RedirectQuery, SIGNATURE, SIG_ALG},
    utils::parse_xml,
    SamlError, NS_ASSERTION, NS_PROTOCOL,
};

pub const SIG_ALG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const SIG_ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const SIG_ALG_RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const SIG_ALG_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

const C14N_EXCLUSIVE: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const TRANSFORM_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

const ID_NAMESPACES: [(&str, &str); 2] = [("samlp", NS_PROTOCOL), ("saml", NS_ASSERTION)];

/// The IdP's private key and certificate, both PEM.
#[derive(Clone)]
pub struct SigningCredentials {
    key_pem: Vec<u8>,
    cert_pem: Vec<u8>,
    password: Option<String>,
}

impl SigningCredentials {
    pub fn new(key_pem: impl Into<Vec<u8>>, cert_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            key_pem: key_pem.into(),
            cert_pem: cert_pem.into(),
            password: None,
        }
    }

    pub fn with_password(self, password: Option<String>) -> Self {
        Self { password, ..self }
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    fn key(&self) -> Result<XmlSecKey, SamlError> {
        let mut key = XmlSecKey::from_memory(
            &self.key_pem,
            XmlSecKeyFormat::Pem,
            self.password.as_deref(),
        )
        .map_err(|e| {
            tracing::error!(error = ?e, "failed to load signing key");
            SamlError::InvalidKey
        })?;
        key.load_cert_from_memory(&self.cert_pem, XmlSecKeyFormat::CertPem)
            .map_err(|e| {
                tracing::error!(error = ?e, "failed to load signing certificate");
                SamlError::InvalidKey
            })?;
        Ok(key)
    }
}

impl Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("key_pem", &"<redacted>")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Which element carries the enveloped signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureTarget {
    Response,
    Assertion,
}

impl SignatureTarget {
    fn xpath(self) -> &'static str {
        match self {
            SignatureTarget::Response => "//samlp:Response",
            SignatureTarget::Assertion => "//saml:Assertion",
        }
    }
}

/// Signs the `ds:Signature` template embedded in `xml`.
///
/// The template's reference must point at the `ID` of `target`.
pub fn sign_xml(
    xml: &[u8],
    credentials: &SigningCredentials,
    target: SignatureTarget,
) -> Result<Vec<u8>, SamlError> {
    let document = parse_xml(xml)?;

    document
        .specify_idattr(target.xpath(), "ID", Some(&ID_NAMESPACES[..]))
        .map_err(|e| {
            tracing::error!(error = ?e, ?target, "signature target not found");
            SamlError::SigningFailed
        })?;

    let mut sigctx = XmlSecSignatureContext::new();
    sigctx.insert_key(credentials.key()?);
    sigctx.sign_document(&document).map_err(|e| {
        tracing::error!(error = ?e, "xmlsec signing failed");
        SamlError::SigningFailed
    })?;

    Ok(document
        .to_string_with_options(SaveOptions::default())
        .into_bytes())
}

/// Verifies the first enveloped signature in `xml` against a PEM certificate.
pub fn verify_xml(xml: &[u8], cert_pem: &[u8]) -> Result<(), SamlError> {
    let document = parse_xml(xml)?;

    // Either element may be absent.
    for target in [SignatureTarget::Response, SignatureTarget::Assertion] {
        document
            .specify_idattr(target.xpath(), "ID", Some(&ID_NAMESPACES[..]))
            .ok();
    }

    let key = XmlSecKey::from_memory(cert_pem, XmlSecKeyFormat::CertPem, None)
        .map_err(|_| SamlError::InvalidKey)?;
    let mut sigctx = XmlSecSignatureContext::new();
    sigctx.insert_key(key);

    let valid = sigctx
        .verify_document(&document)
        .map_err(|_| SamlError::InvalidSignature)?;
    if !valid {
        return Err(SamlError::InvalidSignature);
    }
    Ok(())
}

fn message_digest(sig_alg: &str) -> Option<MessageDigest> {
    match sig_alg {
        SIG_ALG_RSA_SHA1 => Some(MessageDigest::sha1()),
        SIG_ALG_RSA_SHA256 => Some(MessageDigest::sha256()),
        SIG_ALG_RSA_SHA384 => Some(MessageDigest::sha384()),
        SIG_ALG_RSA_SHA512 => Some(MessageDigest::sha512()),
        _ => None,
    }
}

/// Verifies the HTTP-Redirect binding signature of `query`.
pub fn verify_redirect_signature(query: &RedirectQuery, cert_pem: &[u8]) -> Result<(), SamlError> {
    let content = query.signed_content().ok_or(SamlError::InvalidSignature)?;
    let signature = query.signature()?.ok_or(SamlError::InvalidSignature)?;
    let sig_alg = query.sig_alg().ok_or(SamlError::InvalidSignature)?;
    let digest = message_digest(&sig_alg).ok_or_else(|| {
        tracing::info!(%sig_alg, "unsupported redirect signature algorithm");
        SamlError::InvalidSignature
    })?;

    let public_key = X509::from_pem(cert_pem)
        .and_then(|cert| cert.public_key())
        .map_err(|_| SamlError::InvalidKey)?;

    let mut verifier =
        Verifier::new(digest, &public_key).map_err(|_| SamlError::InvalidSignature)?;
    verifier
        .update(content.as_bytes())
        .map_err(|_| SamlError::InvalidSignature)?;
    match verifier.verify(&signature) {
        Ok(true) => Ok(()),
        _ => Err(SamlError::InvalidSignature),
    }
}

/// Appends `SigAlg` and an RSA-SHA256 `Signature` to an encoded redirect query.
pub fn sign_redirect_query(query: &str, key_pem: &[u8]) -> Result<String, SamlError> {
    let key = PKey::private_key_from_pem(key_pem).map_err(|_| SamlError::InvalidKey)?;
    let signed = format!(
        "{query}&{SIG_ALG}={}",
        urlencoding::encode(SIG_ALG_RSA_SHA256)
    );

    let signature = Signer::new(MessageDigest::sha256(), &key)
        .and_then(|mut signer| {
            signer.update(signed.as_bytes())?;
            signer.sign_to_vec()
        })
        .map_err(|_| SamlError::SigningFailed)?;

    Ok(format!(
        "{signed}&{SIGNATURE}={}",
        urlencoding::encode(&BASE64_STANDARD.encode(signature))
    ))
}

#[derive(YaSerialize)]
pub(crate) struct SignatureTemplate {
    #[yaserde(rename = "SignedInfo", prefix = "ds")]
    signed_info: SignedInfo,
    #[yaserde(rename = "SignatureValue", prefix = "ds")]
    signature_value: String,
    #[yaserde(rename = "KeyInfo", prefix = "ds")]
    key_info: KeyInfo,
}

#[derive(YaSerialize)]
struct SignedInfo {
    #[yaserde(rename = "CanonicalizationMethod", prefix = "ds")]
    canonicalization_method: Algorithm,
    #[yaserde(rename = "SignatureMethod", prefix = "ds")]
    signature_method: Algorithm,
    #[yaserde(rename = "Reference", prefix = "ds")]
    reference: Reference,
}

#[derive(YaSerialize)]
struct Reference {
    #[yaserde(attribute = true, rename = "URI")]
    uri: String,
    #[yaserde(rename = "Transforms", prefix = "ds")]
    transforms: Transforms,
    #[yaserde(rename = "DigestMethod", prefix = "ds")]
    digest_method: Algorithm,
    #[yaserde(rename = "DigestValue", prefix = "ds")]
    digest_value: String,
}

#[derive(YaSerialize)]
struct Transforms {
    #[yaserde(rename = "Transform", prefix = "ds")]
    transform: Vec<Algorithm>,
}

#[derive(YaSerialize)]
struct Algorithm {
    #[yaserde(attribute = true, rename = "Algorithm")]
    algorithm: String,
}

#[derive(YaSerialize)]
struct KeyInfo {
    #[yaserde(rename = "X509Data", prefix = "ds")]
    x509_data: X509Data,
}

// Left empty; xmlsec writes the certificate of the signing key into it.
#[derive(YaSerialize)]
struct X509Data {
    #[yaserde(rename = "X509Certificate", prefix = "ds")]
    certificate: Option<String>,
}

impl SignatureTemplate {
    /// Enveloped exc-c14n RSA-SHA256 template referencing `#id`.
    pub(crate) fn enveloped(id: &str) -> Self {
        let algorithm = |uri: &str| Algorithm {
            algorithm: uri.to_string(),
        };
        SignatureTemplate {
            signed_info: SignedInfo {
                canonicalization_method: algorithm(C14N_EXCLUSIVE),
                signature_method: algorithm(SIG_ALG_RSA_SHA256),
                reference: Reference {
                    uri: format!("#{id}"),
                    transforms: Transforms {
                        transform: vec![algorithm(TRANSFORM_ENVELOPED), algorithm(C14N_EXCLUSIVE)],
                    },
                    digest_method: algorithm(DIGEST_SHA256),
                    digest_value: String::new(),
                },
            },
            signature_value: String::new(),
            key_info: KeyInfo {
                x509_data: X509Data { certificate: None },
            },
        }
    }
}
