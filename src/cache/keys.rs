use uuid::Uuid;

use crate::domain::{IndexField, ListFilter};

// ============================================================================
// Cache Key Scheme
// ============================================================================
//
//   primary:{kind}:{id}              -> full entity blob
//   index:{kind}:{field}:{value}     -> entity id
//   list:{kind}:{f1=v1}:{f2=v2}      -> serialized collection
//
// List filter pairs are sorted by field name so the same filter always maps
// to the same key. A filter with nothing set renders as `list:{kind}:all`.
// Filter values are percent-encoded (`%`, `:`, `=`) so two different filters
// never render to the same key.
//
// ============================================================================

const LIST_PREFIX: &str = "list:";
const TRACKING_PREFIX: &str = "tracking:";

pub fn primary_key(kind: &str, id: Uuid) -> String {
    format!("primary:{}:{}", kind, id)
}

pub fn index_key<F: IndexField>(kind: &str, field: F, value: &str) -> String {
    format!("index:{}:{}:{}", kind, field.name(), value)
}

pub fn list_key<L: ListFilter>(kind: &str, filter: &L) -> String {
    let mut pairs = filter.pairs();
    if pairs.is_empty() {
        return format!("{}{}:all", LIST_PREFIX, kind);
    }

    pairs.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(&b.1)));
    let joined = pairs
        .iter()
        .map(|(field, value)| format!("{}={}", field, encode_value(value)))
        .collect::<Vec<_>>()
        .join(":");

    format!("{}{}:{}", LIST_PREFIX, kind, joined)
}

fn encode_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            ':' => encoded.push_str("%3A"),
            '=' => encoded.push_str("%3D"),
            _ => encoded.push(c),
        }
    }
    encoded
}

/// Pattern matching every list entry of a kind
pub fn list_pattern(kind: &str) -> String {
    format!("{}{}:*", LIST_PREFIX, kind)
}

/// Trailing-wildcard match. A pattern without `*` must match exactly.
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

/// Redis set that records the list keys of one kind.
/// Returns `None` for keys that are not list entries.
pub fn tracking_key_for(key: &str) -> Option<String> {
    let rest = key.strip_prefix(LIST_PREFIX)?;
    let (kind, _) = rest.split_once(':')?;
    Some(format!("{}{}{}", TRACKING_PREFIX, LIST_PREFIX, kind))
}

/// Tracking set for a `list:{kind}:*` pattern
pub fn tracking_key_for_pattern(pattern: &str) -> Option<String> {
    let prefix = pattern.strip_suffix('*')?;
    let kind = prefix.strip_prefix(LIST_PREFIX)?.strip_suffix(':')?;
    if kind.is_empty() || kind.contains(':') {
        return None;
    }
    Some(format!("{}{}{}", TRACKING_PREFIX, LIST_PREFIX, kind))
}
