use yaserde::YaSerialize;

use crate::{
    authn_request::ProtocolBinding, utils::pem_body, IdentityProvider, SamlError,
    NAME_ID_FORMAT_TRANSIENT, NS_PROTOCOL,
};

#[derive(YaSerialize)]
#[yaserde(
  namespaces = {
    "md" = "urn:oasis:names:tc:SAML:2.0:metadata",
    "ds" = "http://www.w3.org/2000/09/xmldsig#",
  },
  prefix = "md"
)]
struct EntityDescriptor {
    #[yaserde(attribute = true, rename = "entityID")]
    entity_id: String,
    #[yaserde(rename = "IDPSSODescriptor", prefix = "md")]
    idp_sso_descriptor: IDPSSODescriptor,
}

#[derive(YaSerialize)]
struct IDPSSODescriptor {
    #[yaserde(attribute = true, rename = "WantAuthnRequestsSigned")]
    want_authn_requests_signed: bool,
    #[yaserde(attribute = true, rename = "protocolSupportEnumeration")]
    protocol_support_enumeration: String,
    #[yaserde(rename = "KeyDescriptor", prefix = "md")]
    key_descriptor: KeyDescriptor,
    #[yaserde(rename = "NameIDFormat", prefix = "md")]
    name_id_format: NameIdFormat,
    #[yaserde(rename = "SingleSignOnService", prefix = "md")]
    single_sign_on_service: SingleSignOnService,
}

#[derive(YaSerialize)]
struct KeyDescriptor {
    #[yaserde(attribute = true, rename = "use")]
    key_use: String,
    #[yaserde(rename = "KeyInfo", prefix = "ds")]
    key_info: KeyInfo,
}

#[derive(YaSerialize)]
struct KeyInfo {
    #[yaserde(rename = "X509Data", prefix = "ds")]
    x509_data: X509Data,
}

#[derive(YaSerialize)]
struct X509Data {
    #[yaserde(rename = "X509Certificate", prefix = "ds")]
    certificate: String,
}

#[derive(YaSerialize)]
struct NameIdFormat {
    #[yaserde(text = true)]
    content: String,
}

#[derive(YaSerialize)]
struct SingleSignOnService {
    #[yaserde(attribute = true, rename = "Binding")]
    binding: String,
    #[yaserde(attribute = true, rename = "Location")]
    location: String,
}

/// Renders the IdP's `md:EntityDescriptor` for SPs to import.
#[derive(Default)]
pub struct IdpMetadataBuilder {
    entity_id: Option<String>,
    sso_url: Option<String>,
    certificate_pem: Option<String>,
    name_id_format: Option<String>,
    want_authn_requests_signed: bool,
}

impl IdpMetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefilled from a configured IdP; its destination URL is the SSO endpoint.
    pub fn from_identity_provider(idp: &IdentityProvider) -> Self {
        Self::new()
            .entity_id(idp.entity_id())
            .sso_url(idp.destination_url())
            .certificate_pem(&String::from_utf8_lossy(idp.credentials().cert_pem()))
    }

    pub fn entity_id(self, entity_id: &str) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
            ..self
        }
    }

    pub fn sso_url(self, sso_url: &str) -> Self {
        Self {
            sso_url: Some(sso_url.into()),
            ..self
        }
    }

    pub fn certificate_pem(self, pem: &str) -> Self {
        Self {
            certificate_pem: Some(pem.into()),
            ..self
        }
    }

    pub fn name_id_format(self, name_id_format: &str) -> Self {
        Self {
            name_id_format: Some(name_id_format.into()),
            ..self
        }
    }

    pub fn want_authn_requests_signed(self, want: bool) -> Self {
        Self {
            want_authn_requests_signed: want,
            ..self
        }
    }

    pub fn build(self) -> Result<String, SamlError> {
        let metadata = EntityDescriptor {
            entity_id: self.entity_id.ok_or(SamlError::MissingField("entity_id"))?,
            idp_sso_descriptor: IDPSSODescriptor {
                want_authn_requests_signed: self.want_authn_requests_signed,
                protocol_support_enumeration: NS_PROTOCOL.into(),
                key_descriptor: KeyDescriptor {
                    key_use: "signing".into(),
                    key_info: KeyInfo {
                        x509_data: X509Data {
                            certificate: pem_body(
                                &self
                                    .certificate_pem
                                    .ok_or(SamlError::MissingField("certificate"))?,
                            ),
                        },
                    },
                },
                name_id_format: NameIdFormat {
                    content: self
                        .name_id_format
                        .unwrap_or_else(|| NAME_ID_FORMAT_TRANSIENT.into()),
                },
                single_sign_on_service: SingleSignOnService {
                    binding: ProtocolBinding::Redirect.to_string(),
                    location: self.sso_url.ok_or(SamlError::MissingField("sso_url"))?,
                },
            },
        };
        yaserde::ser::to_string(&metadata).map_err(SamlError::Serialization)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        testing,
        utils::{find_value, parse_xml, xpath_context},
        NS_METADATA, NS_XMLDSIG,
    };

    use super::*;

    #[test]
    fn can_build_idp_metadata() {
        let idp = testing::identity_provider();
        let xml = IdpMetadataBuilder::from_identity_provider(&idp)
            .build()
            .unwrap();

        let document = parse_xml(xml.as_bytes()).unwrap();
        let mut context =
            xpath_context(&document, &[("md", NS_METADATA), ("ds", NS_XMLDSIG)]).unwrap();

        assert_eq!(
            find_value(&mut context, "/md:EntityDescriptor/@entityID").as_deref(),
            Some(testing::IDP_ENTITY_ID)
        );
        assert_eq!(
            find_value(
                &mut context,
                "//md:IDPSSODescriptor/md:SingleSignOnService/@Location"
            )
            .as_deref(),
            Some(testing::IDP_SSO_URL)
        );
        assert_eq!(
            find_value(&mut context, "//md:IDPSSODescriptor/md:NameIDFormat").as_deref(),
            Some(NAME_ID_FORMAT_TRANSIENT)
        );

        let certificate = find_value(
            &mut context,
            "//md:KeyDescriptor[@use=\"signing\"]/ds:KeyInfo/ds:X509Data/ds:X509Certificate",
        )
        .unwrap();
        let cert_pem = String::from_utf8(idp.credentials().cert_pem().to_vec()).unwrap();
        assert_eq!(certificate, pem_body(&cert_pem));
        assert!(!certificate.contains("BEGIN"));
    }

    #[test]
    fn requires_sso_url() {
        let err = IdpMetadataBuilder::new()
            .entity_id("https://idp.example.com")
            .certificate_pem("-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n")
            .build()
            .unwrap_err();
        assert!(matches!(err, SamlError::MissingField("sso_url")));
    }
}
