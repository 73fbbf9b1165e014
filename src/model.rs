use serde_json::Value;
use std::fmt;

/// Identity under which repeat-detection is performed. Composite (item+realm,
/// or listing-name+server) and deterministic for a given match; used only for
/// equality, never ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for a listed item observed on a specific realm/server.
    pub fn item_on_realm(item_id: &Value, realm: &str) -> Self {
        Self(format!("{}:{}", display_value(item_id), realm))
    }

    /// Key for a named sale listing on a specific server (retainer data).
    pub fn listing(real_name: &str, server: &str) -> Self {
        Self(format!("{}-{}", real_name, server))
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One formatted alert entry, ready for batching. `section` carries the
/// optional secondary grouping label (the owning retainer); `name`/`value`
/// map onto an embed field, with `name` left empty for content-style output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedEntry {
    pub section: Option<String>,
    pub name: String,
    pub value: String,
}

impl FormattedEntry {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            section: None,
            name: String::new(),
            value: value.into(),
        }
    }

    pub fn field(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            section: None,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn in_section(mut self, label: impl Into<String>) -> Self {
        self.section = Some(label.into());
        self
    }

    /// Character weight counted against a batch's character budget.
    pub fn chars(&self) -> usize {
        self.name.len() + self.value.len()
    }
}

/// One candidate alert produced by parsing a scan response: the identity it
/// is deduplicated under, the tracked-attribute snapshot compared across
/// cycles, and the presentation entry emitted when it is fresh.
#[derive(Debug, Clone)]
pub struct AlertItem {
    pub key: DedupKey,
    pub attrs: Value,
    pub entry: FormattedEntry,
}

/// How a group of entries is rendered for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    /// Rich embed with a title/description header and one field per entry
    /// (or per labeled section).
    Embed {
        title: String,
        description: String,
        color: u32,
    },
    /// Plain message content, entries joined by newlines.
    Content,
}

/// One message series parsed out of a single scan response: all items share
/// a header and a delivery style. A response may yield several groups (one
/// per realm, or undercuts and not-found separately).
#[derive(Debug, Clone)]
pub struct AlertGroup {
    pub presentation: Presentation,
    pub items: Vec<AlertItem>,
}

/// Upload-timer dataset classification used when resolving the upstream
/// refresh minute for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSelector {
    /// Fixed dataset id: -2 for the EU region, -1 otherwise.
    Simple,
    /// Any non-simple dataset id whose record matches the region.
    Full,
}

/// When a watch's fetch pass is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Poll inside the minute window `[refresh + low, refresh + high]`
    /// relative to the upstream refresh minute for (region, selector).
    UploadWindow {
        selector: TimerSelector,
        offset_low: u32,
        offset_high: u32,
    },
    /// Poll whenever at least this many seconds elapsed since the last pass.
    FixedInterval { secs: u64 },
}

/// Render a JSON value the way it appears in a human-facing message: bare
/// strings without quotes, everything else in its JSON form.
pub fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dedup_key_from_item_and_realm() {
        let key = DedupKey::item_on_realm(&json!(168487), "Thrall");
        assert_eq!(key, DedupKey::new("168487:Thrall"));

        let key = DedupKey::item_on_realm(&json!("168487"), "Thrall");
        assert_eq!(key, DedupKey::new("168487:Thrall"));
    }

    #[test]
    fn dedup_key_from_listing() {
        let key = DedupKey::listing("Vorpal Tachi", "Famfrit");
        assert_eq!(key, DedupKey::new("Vorpal Tachi-Famfrit"));
    }

    #[test]
    fn entry_chars_counts_name_and_value() {
        let entry = FormattedEntry::field("abc", "defg");
        assert_eq!(entry.chars(), 7);
    }

    #[test]
    fn display_value_strips_string_quotes() {
        assert_eq!(display_value(&json!("Proudmoore")), "Proudmoore");
        assert_eq!(display_value(&json!(1250)), "1250");
        assert_eq!(display_value(&json!(["A", "B"])), r#"["A","B"]"#);
    }
}
