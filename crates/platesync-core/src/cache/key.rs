//! Cache key derivation
//!
//! Read requests are keyed by endpoint plus canonical query string. Results
//! derived from binary content (images) are keyed by a SHA-256 of the raw
//! decoded bytes, so re-encoding the same image maps to the same key and a
//! single changed byte does not.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use url::form_urlencoded;

/// Length of the params digest embedded in content keys
const PARAMS_DIGEST_LEN: usize = 16;

/// Key for a content-addressed result, plus the hash it was derived from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKey {
    pub key: String,
    pub content_hash: String,
}

/// Hex SHA-256 of `bytes`
pub fn hash_content(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Canonical `name=value&...` form, sorted by name then value
pub fn canonical_query<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect();
    pairs.sort();

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

/// Key for a read request
///
/// A query string already present on `endpoint` is merged with `params`
/// before canonicalizing, so `/meals?b=2&a=1` and `/meals` with
/// `[("a", "1"), ("b", "2")]` share a key.
pub fn request_key<K, V>(endpoint: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let (path, inline) = match endpoint.split_once('?') {
        Some((path, query)) => (path, query),
        None => (endpoint, ""),
    };

    let mut all: Vec<(String, String)> = form_urlencoded::parse(inline.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    all.extend(
        params
            .iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string())),
    );

    let query = canonical_query(&all);
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query)
    }
}

/// Key for a result computed from binary content
///
/// Layout: `operation|identity|content-hash[|params-digest]`. The identity
/// segment is percent-encoded so [`identity_pattern`] matches it exactly.
pub fn content_key<K, V>(
    operation: &str,
    content: &[u8],
    identity: &str,
    params: &[(K, V)],
) -> ContentKey
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let content_hash = hash_content(content);
    let mut key = format!("{}|{}|{}", operation, encode_segment(identity), content_hash);

    let query = canonical_query(params);
    if !query.is_empty() {
        let digest = hash_content(query.as_bytes());
        key.push('|');
        key.push_str(&digest[..PARAMS_DIGEST_LEN]);
    }

    ContentKey { key, content_hash }
}

/// Substring that matches every content key for `identity`
pub fn identity_pattern(identity: &str) -> String {
    format!("|{}|", encode_segment(identity))
}

fn encode_segment(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Decode a base64 image, with or without a `data:<mime>;base64,` prefix
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_PARAMS: &[(&str, &str)] = &[];

    #[test]
    fn test_request_key_is_order_independent() {
        let a = request_key("/meals", &[("date", "2024-05-01"), ("user", "7")]);
        let b = request_key("/meals", &[("user", "7"), ("date", "2024-05-01")]);
        let c = request_key("/meals?user=7", &[("date", "2024-05-01")]);

        assert_eq!(a, "/meals?date=2024-05-01&user=7");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(request_key("/meals", NO_PARAMS), "/meals");
    }

    #[test]
    fn test_request_key_encodes_values() {
        let key = request_key("/search", &[("q", "rice & beans")]);
        assert_eq!(key, "/search?q=rice+%26+beans");
    }

    #[test]
    fn test_identical_content_maps_to_same_key() {
        let image = vec![7u8; 1024];
        let first = content_key("analyze", &image, "user-1", &[("prompt", "estimate calories")]);
        let second = content_key("analyze", &image.clone(), "user-1", &[("prompt", "estimate calories")]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_single_byte_change_changes_key() {
        let image = vec![7u8; 1024];
        let mut altered = image.clone();
        altered[512] = 8;

        let a = content_key("analyze", &image, "user-1", NO_PARAMS);
        let b = content_key("analyze", &altered, "user-1", NO_PARAMS);
        assert_ne!(a.key, b.key);
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_identity_and_params_separate_keys() {
        let image = b"jpeg bytes";
        let base = content_key("analyze", image, "user-1", &[("prompt", "a")]);

        assert_ne!(base.key, content_key("analyze", image, "user-2", &[("prompt", "a")]).key);
        assert_ne!(base.key, content_key("analyze", image, "user-1", &[("prompt", "b")]).key);
        assert_ne!(base.key, content_key("describe", image, "user-1", &[("prompt", "a")]).key);
    }

    #[test]
    fn test_identity_pattern_is_exact() {
        let key = content_key("analyze", b"x", "user-10", NO_PARAMS).key;
        assert!(key.contains(&identity_pattern("user-10")));
        assert!(!key.contains(&identity_pattern("user-1")));

        let odd = content_key("analyze", b"x", "a|b", NO_PARAMS).key;
        assert_eq!(odd.matches('|').count(), 2);
    }

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_content(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_decode_image_accepts_data_urls() {
        let raw = b"\x89PNG\r\n";
        let encoded = STANDARD.encode(raw);

        assert_eq!(decode_image(&encoded).unwrap(), raw);
        assert_eq!(
            decode_image(&format!("data:image/png;base64,{}", encoded)).unwrap(),
            raw
        );
        assert_eq!(decode_image(&format!("{}\n", encoded)).unwrap(), raw);
        assert!(decode_image("not base64!").is_err());
    }
}
