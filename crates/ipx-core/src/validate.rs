//! Request input validation and path sanitization.
//!
//! The validators are the only defense against path traversal through the
//! cache key. [`sanitize_path_component`] is applied again when the disk
//! cache builds paths, as a second layer.

use std::sync::LazyLock;

use regex::Regex;

use crate::{PresetRegistry, ValidationError};

/// Maximum DID length accepted.
const MAX_DID_LEN: usize = 2048;

/// `did:{method}:{method-specific-id}` with a lowercase method name.
static DID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^did:[a-z]+:[a-zA-Z0-9._:%-]*[a-zA-Z0-9._-]$").expect("valid DID regex")
});

/// Multibase-encoded CID, v0 (`Qm...`) or v1 (`baf...`).
static CID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9+=]{8,256}$").expect("valid CID regex"));

/// Whether `s` contains a sequence usable for directory escape.
fn has_unsafe_sequence(s: &str) -> bool {
    s.contains("..") || s.contains(['/', '\\', '\0'])
}

/// Validate a decentralized identifier.
pub fn validate_did(did: &str) -> Result<(), ValidationError> {
    if has_unsafe_sequence(did) {
        return Err(ValidationError::InvalidDid);
    }
    if did.is_empty() || did.len() > MAX_DID_LEN || !DID_RE.is_match(did) {
        return Err(ValidationError::InvalidDid);
    }
    Ok(())
}

/// Validate a content identifier.
pub fn validate_cid(cid: &str) -> Result<(), ValidationError> {
    if has_unsafe_sequence(cid) {
        return Err(ValidationError::InvalidCid);
    }
    if !CID_RE.is_match(cid) {
        return Err(ValidationError::InvalidCid);
    }
    Ok(())
}

/// Validate a preset name and check that it exists in `registry`.
pub fn validate_preset(name: &str, registry: &PresetRegistry) -> Result<(), ValidationError> {
    if name.is_empty() || name.contains("..") || name.contains(['/', '\\']) {
        return Err(ValidationError::InvalidPreset);
    }
    registry.get(name).map(|_| ())
}

/// Project a key component onto a filesystem-safe path component.
///
/// Colons become underscores; `/`, `\`, NUL and `..` are deleted. The
/// result never contains any of those sequences, even when deleting one
/// separator would join two dots.
#[must_use]
pub fn sanitize_path_component(s: &str) -> String {
    let mut out: String = s
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .map(|c| if c == ':' { '_' } else { c })
        .collect();
    while out.contains("..") {
        out = out.replace("..", "");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_validate_did_accepts_known_methods() {
        for did in [
            "did:plc:z72i7hdynmk6r22z27h6tvur",
            "did:web:example.com",
            "did:web:bsky.social",
            "did:web:example.com:user:alice",
            "did:key:z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK",
        ] {
            assert_eq!(validate_did(did), Ok(()), "{did} should be valid");
        }
    }

    #[test]
    fn test_validate_did_rejects_invalid() {
        for did in [
            "",
            "plc:z72i7hdynmk6r22z27h6tvur",
            "did:plc:../../../etc/passwd",
            "did:plc:abc\0def",
            "did:plc:abc/def",
            "did:plc:abc\\def",
            "did:",
            "did:PLC:abc",
            "did:plc:abc:",
            "not-a-did-at-all",
        ] {
            assert_eq!(
                validate_did(did),
                Err(ValidationError::InvalidDid),
                "{did:?} should be invalid"
            );
        }
    }

    #[test]
    fn test_validate_did_rejects_overlong() {
        let did = format!("did:plc:{}", "a".repeat(MAX_DID_LEN));
        assert_eq!(validate_did(&did), Err(ValidationError::InvalidDid));
    }

    #[test]
    fn test_validate_cid_accepts_v0_and_v1() {
        for cid in [
            "bafyreihgdyzzpkkzq2izfnhcmm77ycuacvkuziwbnqxfxtqsz7tmxwhnshi",
            "bafkreihgdyzzpkkzq2izfnhcmm77ycuacvkuziwbnqxfxtqsz7tmxwhnshi",
            "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG",
        ] {
            assert_eq!(validate_cid(cid), Ok(()), "{cid} should be valid");
        }
    }

    #[test]
    fn test_validate_cid_rejects_invalid() {
        let too_long = format!("bafyrei{}", "a".repeat(256));
        for cid in [
            "",
            "bafyabc",
            "../../../etc/passwd",
            "bafyrei/abc/def",
            "bafyrei\\abc",
            "bafyrei..abc",
            "bafyreihgdyzzpkkzq2izfnhcmm77ycuacvkuziwbnqxfxtqsz7tmxwhnshi!@#",
            "this_is_not_a_valid_cid_at_all_12345",
            too_long.as_str(),
        ] {
            assert_eq!(
                validate_cid(cid),
                Err(ValidationError::InvalidCid),
                "{cid:?} should be invalid"
            );
        }
    }

    #[test]
    fn test_validate_preset() {
        let registry = PresetRegistry::builtin();
        assert_eq!(validate_preset("avatar", &registry), Ok(()));
        for name in ["", "invalid_preset", "../avatar", "avatar/x", "a\\b", ".."] {
            assert_eq!(
                validate_preset(name, &registry),
                Err(ValidationError::InvalidPreset),
                "{name:?} should be invalid"
            );
        }
    }

    #[test]
    fn test_sanitize_path_component() {
        let cases = [
            ("abc123", "abc123"),
            ("did:plc:abc123", "did_plc_abc123"),
            ("path/to/file", "pathtofile"),
            ("path\\to\\file", "pathtofile"),
            ("../../../etc/passwd", "etcpasswd"),
            ("abc\0def", "abcdef"),
            ("../path:to\\file\0.txt", "path_tofile.txt"),
        ];
        for (input, expected) in cases {
            assert_eq!(sanitize_path_component(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn test_sanitize_never_leaves_dangerous_sequences() {
        for input in [".../...", "./.", ".\\.", "....", ". ./..", "a.\0.b", "x/./../y"] {
            let out = sanitize_path_component(input);
            assert!(!out.contains(".."), "{input:?} -> {out:?}");
            assert!(!out.contains(['/', '\\', '\0']), "{input:?} -> {out:?}");
        }
    }
}
