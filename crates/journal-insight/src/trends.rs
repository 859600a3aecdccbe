//! Emotion tag frequency over a set of entries.

use std::collections::HashMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use journal_core::entry::Entry;

/// How many tags a digest reports when the caller does not say.
pub const DEFAULT_TREND_COUNT: usize = 5;

/// One tag and the number of entries carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Tags ordered by descending count. Equal counts keep the order in which
/// the tags were first met.
///
/// Serializes as a JSON object in that order, e.g. `{"joy": 2, "fear": 2}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmotionTrend {
    counts: Vec<TagCount>,
}

impl EmotionTrend {
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TagCount> {
        self.counts.iter()
    }

    /// Count for `tag`, if it made the cut.
    pub fn get(&self, tag: &str) -> Option<usize> {
        self.counts.iter().find(|c| c.tag == tag).map(|c| c.count)
    }

    pub fn into_vec(self) -> Vec<TagCount> {
        self.counts
    }
}

impl Serialize for EmotionTrend {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counts.len()))?;
        for c in &self.counts {
            map.serialize_entry(&c.tag, &c.count)?;
        }
        map.end()
    }
}

/// Counts emotion tags across entries.
pub struct TrendAggregator;

impl TrendAggregator {
    pub fn new() -> Self {
        Self
    }

    /// The `n` most frequent tags across `entries`.
    ///
    /// A tag repeated within one entry counts once for that entry.
    pub fn top_trends<'a, I>(&self, entries: I, n: usize) -> EmotionTrend
    where
        I: IntoIterator<Item = &'a Entry>,
    {
        if n == 0 {
            return EmotionTrend::default();
        }

        let mut counts: Vec<TagCount> = Vec::new();
        let mut slots: HashMap<&'a str, usize> = HashMap::new();

        for entry in entries {
            for (i, tag) in entry.emotion_tags.iter().enumerate() {
                if entry.emotion_tags[..i].contains(tag) {
                    continue;
                }
                let slot = *slots.entry(tag.as_str()).or_insert_with(|| {
                    counts.push(TagCount {
                        tag: tag.clone(),
                        count: 0,
                    });
                    counts.len() - 1
                });
                counts[slot].count += 1;
            }
        }

        // Stable sort keeps first-seen order among equal counts.
        counts.sort_by(|a, b| b.count.cmp(&a.count));
        counts.truncate(n);
        EmotionTrend { counts }
    }
}

impl Default for TrendAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(tags: &[&str]) -> Entry {
        Entry::new("u", "text").with_tags(tags.iter().copied())
    }

    #[test]
    fn test_counts_and_tie_order() {
        let entries = vec![tagged(&["joy"]), tagged(&["fear", "joy"]), tagged(&["fear"])];
        let trend = TrendAggregator::new().top_trends(&entries, 5);

        let pairs: Vec<(&str, usize)> = trend.iter().map(|c| (c.tag.as_str(), c.count)).collect();
        assert_eq!(pairs, vec![("joy", 2), ("fear", 2)]);
    }

    #[test]
    fn test_sorted_descending_and_truncated() {
        let entries = vec![
            tagged(&["calm"]),
            tagged(&["anxious", "tired"]),
            tagged(&["anxious", "tired"]),
            tagged(&["anxious"]),
        ];
        let trend = TrendAggregator::new().top_trends(&entries, 2);

        assert_eq!(trend.len(), 2);
        assert_eq!(trend.get("anxious"), Some(3));
        assert_eq!(trend.get("tired"), Some(2));
        assert_eq!(trend.get("calm"), None);
    }

    #[test]
    fn test_repeated_tag_counts_once_per_entry() {
        let mut entry = Entry::new("u", "text");
        entry.emotion_tags = vec!["sad".into(), "sad".into()];
        let trend = TrendAggregator::new().top_trends([&entry], 5);
        assert_eq!(trend.get("sad"), Some(1));
    }

    #[test]
    fn test_no_tags_or_zero_n() {
        let entries = vec![tagged(&[]), tagged(&[])];
        assert!(TrendAggregator::new().top_trends(&entries, 5).is_empty());

        let entries = vec![tagged(&["joy"])];
        assert!(TrendAggregator::new().top_trends(&entries, 0).is_empty());
    }

    #[test]
    fn test_serializes_as_ordered_object() {
        let entries = vec![tagged(&["joy"]), tagged(&["fear", "joy"]), tagged(&["fear"])];
        let trend = TrendAggregator::new().top_trends(&entries, 5);
        let json = serde_json::to_string(&trend).unwrap();
        assert_eq!(json, r#"{"joy":2,"fear":2}"#);
    }
}
