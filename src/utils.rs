use base64::{prelude::BASE64_STANDARD, Engine};
use libxml::{
    parser::{Parser as XmlParser, ParserOptions},
    tree::{Document, Node},
    xpath::{Context, Object},
};
use rand::{
    distributions::{Alphanumeric, DistString},
    RngCore,
};
use time::{format_description::well_known::Iso8601, OffsetDateTime};

use crate::{SamlError, DATE_TIME_FORMAT};

pub fn random_string(len: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), len)
}

/// Hex token over `bytes` random bytes.
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Fresh XML ID. Some SPs reject IDs starting with a digit.
pub fn random_id() -> String {
    format!("_{}", random_hex(16))
}

pub fn single_node(object: &Object) -> Result<Node, SamlError> {
    let mut nodes = object.get_nodes_as_vec();
    if nodes.len() != 1 {
        return Err(SamlError::MalformedRequest(format!(
            "expected exactly one element, found {}",
            nodes.len()
        )));
    }
    Ok(nodes.remove(0))
}

pub fn decode_xml_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let stripped = input.replace([' ', '\n', '\r', '\t'], "");
    BASE64_STANDARD.decode(stripped)
}

/// Base64 body of a PEM block, as embedded in `ds:X509Certificate`.
pub fn pem_body(pem: &str) -> String {
    pem.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect()
}

/// Parses well-formed XML only; libxml's default recover mode is off.
pub fn parse_xml(input: &[u8]) -> Result<Document, SamlError> {
    let options = ParserOptions {
        recover: false,
        no_net: true,
        ..Default::default()
    };
    XmlParser::default()
        .parse_string_with_options(input, options)
        .map_err(SamlError::InvalidXml)
}

pub fn xpath_context(document: &Document, namespaces: &[(&str, &str)]) -> Result<Context, SamlError> {
    let mut context = Context::new(document)
        .map_err(|_| SamlError::MalformedRequest("failed to create XPath context".into()))?;
    for (prefix, href) in namespaces {
        context
            .register_namespace(prefix, href)
            .map_err(|_| SamlError::MalformedRequest(format!("failed to register {prefix}")))?;
    }
    Ok(context)
}

/// XPath string value, with the empty string treated as absent.
pub fn find_value(context: &mut Context, xpath: &str) -> Option<String> {
    context
        .findvalue(xpath, None)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn format_instant(instant: OffsetDateTime) -> Result<String, SamlError> {
    instant
        .format(&DATE_TIME_FORMAT)
        .map_err(|e| SamlError::Serialization(e.to_string()))
}

/// Accepts `xs:dateTime` values with or without fractional seconds.
pub fn parse_instant(value: &str) -> Result<OffsetDateTime, SamlError> {
    OffsetDateTime::parse(value, &Iso8601::DEFAULT)
        .map_err(|e| SamlError::MalformedRequest(format!("bad timestamp {value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = random_id();
        let b = random_id();
        assert!(a.starts_with('_'));
        assert_eq!(a.len(), 33);
        assert_ne!(a, b);
    }

    #[test]
    fn pem_body_strips_armour() {
        let pem = "-----BEGIN CERTIFICATE-----\nAAAA\nBBBB\n-----END CERTIFICATE-----\n";
        assert_eq!(pem_body(pem), "AAAABBBB");
    }

    #[test]
    fn rejects_truncated_xml() {
        assert!(parse_xml(b"<a xmlns=\"urn:x\"><b/></a>").is_ok());
        assert!(matches!(
            parse_xml(b"<a xmlns=\"urn:x\"><b/>"),
            Err(SamlError::InvalidXml(_))
        ));
    }

    #[test]
    fn parses_fractional_and_whole_seconds() {
        let whole = parse_instant("2025-01-08T16:31:18Z").unwrap();
        let fractional = parse_instant("2025-01-08T16:31:18.814Z").unwrap();
        assert_eq!(whole.unix_timestamp(), fractional.unix_timestamp());
        assert_eq!(format_instant(whole).unwrap(), "2025-01-08T16:31:18Z");
    }
}
