//! Item metadata and the reserved key policy.
//!
//! Metadata is a plain string-to-string map. Two key prefixes belong to the
//! system: `Payload-` (transport) and `Mvr` (engine). Callers may put anything
//! they like in an item's metadata, but reserved keys are replaced by
//! [`sanitize`] when the item is serialized for the network. The only
//! exception is [`ORIGINAL_FILENAME_KEY`], which callers are allowed to set.

use std::collections::BTreeMap;

/// String-to-string metadata map
pub type Metadata = BTreeMap<String, String>;

/// Prefix reserved for the transport protocol
pub const PAYLOAD_PREFIX: &str = "Payload-";

/// Prefix reserved for the engine
pub const ENGINE_PREFIX: &str = "Mvr";

/// Item title, written by the engine
pub const TITLE_KEY: &str = "MvrTitle";

/// Item type, written by the engine
pub const TYPE_KEY: &str = "MvrType";

/// Original file name; callers may set this one
pub const ORIGINAL_FILENAME_KEY: &str = "MvrOriginalFilename";

/// Content length in bytes, written by the engine
pub const LENGTH_KEY: &str = "Payload-Length";

/// Reserved keys that callers are still allowed to supply
const CALLER_WRITABLE_KEYS: &[&str] = &[ORIGINAL_FILENAME_KEY];

/// Title used when a received item carries none
const UNTITLED: &str = "Untitled";

/// Returns true if `key` uses a reserved prefix
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(PAYLOAD_PREFIX) || key.starts_with(ENGINE_PREFIX)
}

/// Build the metadata sent over the wire for an item.
///
/// Caller-supplied reserved keys are dropped (except the caller-writable
/// ones) and the system keys are written from `title`, `item_type` and
/// `length`. This is applied exactly once, at the outgoing boundary.
#[must_use]
pub fn sanitize(metadata: &Metadata, title: &str, item_type: &str, length: Option<u64>) -> Metadata {
    let mut wire: Metadata = metadata
        .iter()
        .filter(|(key, _)| !is_reserved(key) || CALLER_WRITABLE_KEYS.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    wire.insert(TITLE_KEY.to_string(), title.to_string());
    wire.insert(TYPE_KEY.to_string(), item_type.to_string());
    match length {
        Some(len) => {
            wire.insert(LENGTH_KEY.to_string(), len.to_string());
        }
        None => {
            wire.remove(LENGTH_KEY);
        }
    }

    wire
}

/// Item description recovered from received wire metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireDescription {
    /// Item title
    pub title: String,
    /// Declared item type, if the sender supplied one
    pub item_type: Option<String>,
    /// Announced content length
    pub length: Option<u64>,
    /// User metadata with system keys removed
    pub metadata: Metadata,
}

/// Split received wire metadata into system fields and user metadata.
///
/// The inverse of [`sanitize`]: title, type and length are read from their
/// system keys, which are then stripped. Caller-writable reserved keys stay
/// in the user metadata.
#[must_use]
pub fn describe(wire: &Metadata) -> WireDescription {
    let item_type = wire.get(TYPE_KEY).filter(|t| !t.is_empty()).cloned();
    let length = wire.get(LENGTH_KEY).and_then(|l| l.parse().ok());
    let title = wire
        .get(TITLE_KEY)
        .or_else(|| wire.get(ORIGINAL_FILENAME_KEY))
        .cloned()
        .unwrap_or_else(|| UNTITLED.to_string());

    let metadata = wire
        .iter()
        .filter(|(key, _)| !is_reserved(key) || CALLER_WRITABLE_KEYS.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    WireDescription {
        title,
        item_type,
        length,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_is_reserved() {
        assert!(is_reserved("MvrTitle"));
        assert!(is_reserved("MvrAnything"));
        assert!(is_reserved("Payload-Length"));
        assert!(!is_reserved("payload-length"));
        assert!(!is_reserved("Author"));
    }

    #[test]
    fn test_sanitize_overwrites_reserved_keys() {
        let user = meta(&[
            ("Author", "ada"),
            ("MvrTitle", "spoofed"),
            ("MvrSecret", "x"),
            ("Payload-Length", "999"),
        ]);

        let wire = sanitize(&user, "Report", "public.plain-text", Some(12));

        assert_eq!(wire.get("Author").map(String::as_str), Some("ada"));
        assert_eq!(wire.get(TITLE_KEY).map(String::as_str), Some("Report"));
        assert_eq!(
            wire.get(TYPE_KEY).map(String::as_str),
            Some("public.plain-text")
        );
        assert_eq!(wire.get(LENGTH_KEY).map(String::as_str), Some("12"));
        assert!(!wire.contains_key("MvrSecret"));
    }

    #[test]
    fn test_sanitize_keeps_original_filename() {
        let user = meta(&[(ORIGINAL_FILENAME_KEY, "notes.txt")]);
        let wire = sanitize(&user, "Notes", "text/plain", None);

        assert_eq!(
            wire.get(ORIGINAL_FILENAME_KEY).map(String::as_str),
            Some("notes.txt")
        );
        assert!(!wire.contains_key(LENGTH_KEY));
    }

    #[test]
    fn test_describe_recovers_fields() {
        let user = meta(&[("Author", "ada"), (ORIGINAL_FILENAME_KEY, "a.png")]);
        let wire = sanitize(&user, "Picture", "image/png", Some(2048));

        let desc = describe(&wire);
        assert_eq!(desc.title, "Picture");
        assert_eq!(desc.item_type.as_deref(), Some("image/png"));
        assert_eq!(desc.length, Some(2048));
        assert_eq!(desc.metadata, user);
    }

    #[test]
    fn test_describe_without_system_keys() {
        let desc = describe(&meta(&[(ORIGINAL_FILENAME_KEY, "a.bin")]));
        assert_eq!(desc.title, "a.bin");
        assert_eq!(desc.item_type, None);
        assert_eq!(desc.length, None);

        let desc = describe(&Metadata::new());
        assert_eq!(desc.title, "Untitled");
    }
}
