//! Line-oriented knowledge source parser.
//!
//! Each line holds `title<delimiter>description`. The line is split at the
//! first delimiter only, so the description may contain the delimiter.

use llamart_core::knowledge::KnowledgeEntry;
use tracing::debug;

/// Parse a knowledge source into entries, in line order.
///
/// Blank lines, lines without a delimiter, and lines with an empty title are
/// skipped. Both fields are trimmed.
pub fn parse_entries(content: &str, delimiter: char) -> Vec<KnowledgeEntry> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| {
            let Some((title, description)) = line.split_once(delimiter) else {
                debug!(line = index + 1, "Skipping knowledge line without delimiter");
                return None;
            };
            let title = title.trim();
            if title.is_empty() {
                debug!(line = index + 1, "Skipping knowledge line with empty title");
                return None;
            }
            Some(KnowledgeEntry::new(title, description.trim()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_at_first_delimiter_only() {
        let entries = parse_entries("Water Lilies,Monet, 1914, oil on canvas", ',');
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Water Lilies");
        assert_eq!(entries[0].description, "Monet, 1914, oil on canvas");
    }

    #[test]
    fn trims_both_fields() {
        let entries = parse_entries("  Olympia  ,   Manet 1863  \r\n", ',');
        assert_eq!(entries[0], KnowledgeEntry::new("Olympia", "Manet 1863"));
    }

    #[test]
    fn skips_blank_and_delimiterless_lines() {
        let content = "\n   \nno delimiter here\nOlympia,Manet\n";
        let entries = parse_entries(content, ',');
        assert_eq!(entries, vec![KnowledgeEntry::new("Olympia", "Manet")]);
    }

    #[test]
    fn skips_empty_titles() {
        let entries = parse_entries(" ,orphan description\nOlympia,", ',');
        assert_eq!(entries, vec![KnowledgeEntry::new("Olympia", "")]);
    }

    #[test]
    fn custom_delimiter() {
        let entries = parse_entries("Les Nymphéas;Monet, Orangerie", ';');
        assert_eq!(entries[0].description, "Monet, Orangerie");
    }
}
