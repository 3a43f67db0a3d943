//! Message Composer
//!
//! Turns the watch-list into the one-line WTB message:
//! `WTB RIVENS FOR [Soma][Tigris]30 [Braton]15`.
//!
//! Entries sharing a price render next to each other, groups run from the
//! highest price down and entries inside a group keep their list order.
//! Output depends only on the inputs.

use crate::models::{ComposedMessage, MessageTemplate, WatchEntry};

/// Message composer
pub struct MessageComposer;

impl MessageComposer {
    /// Price groups joined by single spaces, e.g. `[C]20 [A][B]10`
    pub fn price_groups(entries: &[WatchEntry]) -> String {
        let mut sorted: Vec<&WatchEntry> = entries.iter().collect();
        // Stable, so equal prices keep list order
        sorted.sort_by(|a, b| price_key(b.price).total_cmp(&price_key(a.price)));

        let mut groups: Vec<(f64, String)> = Vec::new();
        for entry in sorted {
            let price = price_key(entry.price);
            match groups.last_mut() {
                Some((group_price, names)) if *group_price == price => {
                    names.push_str(&format!("[{}]", entry.name));
                }
                _ => groups.push((price, format!("[{}]", entry.name))),
            }
        }

        groups
            .into_iter()
            .map(|(price, names)| format!("{}{}", names, price))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Substitute the price groups into `template`
    ///
    /// A template without the placeholder comes back unchanged.
    pub fn compose(entries: &[WatchEntry], template: &MessageTemplate) -> String {
        template.render(&Self::price_groups(entries))
    }

    /// Compose and check the result against the chat line ceiling
    pub fn compose_checked(
        entries: &[WatchEntry],
        template: &MessageTemplate,
        max_length: usize,
    ) -> ComposedMessage {
        let text = Self::compose(entries, template);
        let length = text.chars().count();
        ComposedMessage {
            exceeds_limit: length > max_length,
            placeholder_found: template.has_placeholder(),
            length,
            max_length,
            text,
        }
    }
}

/// Folds -0.0 into 0.0 so both land in one group
fn price_key(price: f64) -> f64 {
    price + 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, price: f64) -> WatchEntry {
        WatchEntry::new(name.to_lowercase(), name, "", price)
    }

    #[test]
    fn test_groups_descend_by_price() {
        let entries = vec![entry("A", 10.0), entry("B", 10.0), entry("C", 20.0)];
        let template = MessageTemplate::parse("WTB [WTB]").unwrap();

        assert_eq!(MessageComposer::compose(&entries, &template), "WTB [C]20 [A][B]10");
    }

    #[test]
    fn test_same_price_entries_are_adjacent() {
        let entries = vec![
            entry("Soma", 30.0),
            entry("Braton", 15.0),
            entry("Tigris", 30.0),
            entry("Kunai", 12.5),
        ];

        assert_eq!(
            MessageComposer::price_groups(&entries),
            "[Soma][Tigris]30 [Braton]15 [Kunai]12.5"
        );
    }

    #[test]
    fn test_default_template_and_empty_list() {
        let template = MessageTemplate::default();
        assert_eq!(MessageComposer::compose(&[], &template), "WTB RIVENS FOR ");
        assert_eq!(
            MessageComposer::compose(&[entry("Soma", 0.0)], &template),
            "WTB RIVENS FOR [Soma]0"
        );
    }

    #[test]
    fn test_negative_zero_joins_zero_group() {
        let entries = vec![entry("A", 0.0), entry("B", -0.0), entry("C", 0.0)];
        assert_eq!(MessageComposer::price_groups(&entries), "[A][B][C]0");
    }

    #[test]
    fn test_is_deterministic_and_leaves_inputs_alone() {
        let entries = vec![entry("B", 5.0), entry("A", 7.0), entry("C", 5.0)];
        let snapshot = entries.clone();
        let template = MessageTemplate::parse("[WTB] pm").unwrap();

        let first = MessageComposer::compose(&entries, &template);
        let second = MessageComposer::compose(&entries, &template);

        assert_eq!(first, second);
        assert_eq!(first, "[A]7 [B][C]5 pm");
        assert_eq!(entries, snapshot);
        assert_eq!(template.as_str(), "[WTB] pm");
    }

    #[test]
    fn test_placeholder_free_template_passes_through() {
        let template = MessageTemplate::unchecked("WTB rivens");
        let message = MessageComposer::compose_checked(&[entry("A", 1.0)], &template, 181);
        assert_eq!(message.text, "WTB rivens");
        assert!(!message.placeholder_found);
    }

    #[test]
    fn test_length_is_flagged_not_truncated() {
        let entries: Vec<WatchEntry> = (0..40).map(|i| entry(&format!("Weapon{}", i), i as f64)).collect();
        let message = MessageComposer::compose_checked(&entries, &MessageTemplate::default(), 181);

        assert!(message.exceeds_limit);
        assert_eq!(message.length, message.text.chars().count());
        assert!(message.length > 181);

        let short = MessageComposer::compose_checked(&entries[..2], &MessageTemplate::default(), 181);
        assert!(!short.exceeds_limit);
    }
}
