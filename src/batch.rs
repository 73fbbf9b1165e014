//! Splits formatted entries into delivery-sized batches.
//!
//! Entries are first grouped by their section label (first-seen order, the
//! way retainer listings are folded together), each group is cut to fit the
//! limits, and the resulting sections are packed greedily into batches. A
//! batch never splits a single entry; an entry larger than the whole budget
//! ships alone in an oversized batch of one.

use std::mem;

use crate::model::FormattedEntry;

/// Caps applied to one outgoing message. Entry count is the primary mode
/// (embed fields), the character budget the secondary one (content bodies).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_entries: usize,
    pub max_chars: usize,
}

impl BatchLimits {
    pub const fn count_only(max_entries: usize) -> Self {
        Self {
            max_entries,
            max_chars: usize::MAX,
        }
    }

    pub const fn chars_only(max_chars: usize) -> Self {
        Self {
            max_entries: usize::MAX,
            max_chars,
        }
    }
}

/// A run of entries sharing one section label. Ungrouped entries live in a
/// `label: None` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSection {
    pub label: Option<String>,
    pub entries: Vec<FormattedEntry>,
}

impl BatchSection {
    fn label_chars(&self) -> usize {
        self.label.as_deref().map_or(0, str::len)
    }

    fn entry_chars(&self) -> usize {
        self.entries.iter().map(FormattedEntry::chars).sum()
    }

    pub fn chars(&self) -> usize {
        self.label_chars() + self.entry_chars()
    }
}

/// One outgoing message worth of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationBatch {
    pub sections: Vec<BatchSection>,
}

impl NotificationBatch {
    pub fn entry_count(&self) -> usize {
        self.sections.iter().map(|s| s.entries.len()).sum()
    }

    pub fn chars(&self) -> usize {
        self.sections.iter().map(BatchSection::chars).sum()
    }

    pub fn entries(&self) -> impl Iterator<Item = &FormattedEntry> {
        self.sections.iter().flat_map(|s| s.entries.iter())
    }
}

/// Split `entries` into the minimum number of in-order batches that respect
/// `limits`. Empty input yields no batches.
pub fn split_batches(entries: Vec<FormattedEntry>, limits: BatchLimits) -> Vec<NotificationBatch> {
    let mut pieces = Vec::new();
    for (label, group) in group_by_section(entries) {
        pieces.extend(split_section(label, group, limits));
    }

    let mut batches = Vec::new();
    let mut current = NotificationBatch::default();
    for section in pieces {
        let over_entries = current.entry_count() + section.entries.len() > limits.max_entries;
        let over_chars = current.chars() + section.chars() > limits.max_chars;
        if !current.sections.is_empty() && (over_entries || over_chars) {
            batches.push(mem::take(&mut current));
        }
        current.sections.push(section);
    }
    if !current.sections.is_empty() {
        batches.push(current);
    }
    batches
}

/// Fold entries into per-label runs, labels ordered by first appearance.
fn group_by_section(entries: Vec<FormattedEntry>) -> Vec<(Option<String>, Vec<FormattedEntry>)> {
    let mut groups: Vec<(Option<String>, Vec<FormattedEntry>)> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|(label, _)| *label == entry.section) {
            Some((_, members)) => members.push(entry),
            None => groups.push((entry.section.clone(), vec![entry])),
        }
    }
    groups
}

/// Cut one section into pieces that each fit the limits on their own. The
/// label repeats on every piece and its length counts against the character
/// budget each time.
fn split_section(
    label: Option<String>,
    entries: Vec<FormattedEntry>,
    limits: BatchLimits,
) -> Vec<BatchSection> {
    let label_chars = label.as_deref().map_or(0, str::len);
    let mut pieces = Vec::new();
    let mut current = Vec::new();
    let mut chars = label_chars;
    for entry in entries {
        let over_entries = current.len() + 1 > limits.max_entries;
        let over_chars = chars + entry.chars() > limits.max_chars;
        if !current.is_empty() && (over_entries || over_chars) {
            pieces.push(BatchSection {
                label: label.clone(),
                entries: mem::take(&mut current),
            });
            chars = label_chars;
        }
        chars += entry.chars();
        current.push(entry);
    }
    if !current.is_empty() {
        pieces.push(BatchSection {
            label,
            entries: current,
        });
    }
    pieces
}
