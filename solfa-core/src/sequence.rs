//! Expected-note sequences and the page queries the matcher needs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SolfaError};
use crate::tuning::NoteName;

fn first_page() -> u32 {
    1
}

/// One note the performer is expected to play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedNote {
    pub name: NoteName,
    /// Position on the rendered page, for the host's markers.
    pub x: f32,
    pub y: f32,
    /// 1-based page number; missing pages mean page 1.
    #[serde(default = "first_page")]
    pub page: u32,
    /// Position in the sequence, assigned by [`NoteSequence::new`].
    #[serde(default, skip_serializing)]
    pub index: usize,
}

impl ExpectedNote {
    pub fn new(name: NoteName, x: f32, y: f32, page: u32) -> Self {
        Self { name, x, y, page, index: 0 }
    }
}

/// The ordered, immutable note list of one loaded score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteSequence {
    notes: Vec<ExpectedNote>,
}

impl<'de> Deserialize<'de> for NoteSequence {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            notes: Vec<ExpectedNote>,
        }
        let raw = Raw::deserialize(deserializer)?;
        NoteSequence::new(raw.notes).map_err(serde::de::Error::custom)
    }
}

impl NoteSequence {
    /// Builds a sequence, numbering the notes by position.
    ///
    /// # Errors
    /// * `InvalidSequence` - the list is empty
    pub fn new(mut notes: Vec<ExpectedNote>) -> Result<Self> {
        if notes.is_empty() {
            return Err(SolfaError::InvalidSequence("expected-note list is empty".into()));
        }
        for (i, note) in notes.iter_mut().enumerate() {
            note.index = i;
        }
        Ok(Self { notes })
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ExpectedNote> {
        self.notes.get(index)
    }

    pub fn notes(&self) -> &[ExpectedNote] {
        &self.notes
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.notes.len()
    }

    /// Index of the first note on `page`.
    pub fn first_index_on_page(&self, page: u32) -> Option<usize> {
        self.notes.iter().position(|n| n.page == page)
    }

    /// Index of the last note on `page`.
    pub fn last_index_on_page(&self, page: u32) -> Option<usize> {
        self.notes.iter().rposition(|n| n.page == page)
    }

    /// The page of the first note after `index`, if that note is on a different page.
    pub fn next_page_after(&self, index: usize) -> Option<u32> {
        let current = self.notes.get(index)?.page;
        self.notes
            .get(index + 1)
            .map(|n| n.page)
            .filter(|&page| page != current)
    }
}

/// Source of expected-note sequences, keyed by score.
pub trait SequenceProvider {
    /// The sequence for `score_id`, or `None` when that score has no note data.
    fn expected_sequence(&self, score_id: &str) -> Option<Arc<NoteSequence>>;
}

impl SequenceProvider for std::collections::HashMap<String, Arc<NoteSequence>> {
    fn expected_sequence(&self, score_id: &str) -> Option<Arc<NoteSequence>> {
        self.get(score_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn three_notes() -> NoteSequence {
        NoteSequence::new(vec![
            ExpectedNote::new(NoteName::Do, 10.0, 20.0, 1),
            ExpectedNote::new(NoteName::Re, 30.0, 20.0, 1),
            ExpectedNote::new(NoteName::Mi, 10.0, 20.0, 2),
        ])
        .unwrap()
    }

    #[test]
    fn indices_follow_position() {
        let seq = three_notes();
        let indices: Vec<usize> = seq.notes().iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(seq.is_last(2));
        assert!(!seq.is_last(1));
    }

    #[test]
    fn page_queries() {
        let seq = three_notes();
        assert_eq!(seq.first_index_on_page(1), Some(0));
        assert_eq!(seq.last_index_on_page(1), Some(1));
        assert_eq!(seq.first_index_on_page(2), Some(2));
        assert_eq!(seq.first_index_on_page(3), None);
        assert_eq!(seq.next_page_after(0), None);
        assert_eq!(seq.next_page_after(1), Some(2));
        assert_eq!(seq.next_page_after(2), None);
    }

    #[test]
    fn empty_sequence_is_invalid() {
        assert!(matches!(NoteSequence::new(Vec::new()), Err(SolfaError::InvalidSequence(_))));
        let parsed: std::result::Result<NoteSequence, _> = serde_json::from_str(r#"{ "notes": [] }"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn deserializes_with_default_page() {
        let seq: NoteSequence = serde_json::from_str(
            r#"{ "notes": [
                { "name": "Do", "x": 1.0, "y": 2.0 },
                { "name": "so", "x": 3.0, "y": 2.0, "page": 2 }
            ] }"#,
        )
        .unwrap();
        assert_eq!(seq.get(0).unwrap().page, 1);
        assert_eq!(seq.get(1).unwrap().name, NoteName::So);
        assert_eq!(seq.get(1).unwrap().index, 1);
    }

    #[test]
    fn map_provider_looks_up_by_score() {
        let mut provider: HashMap<String, Arc<NoteSequence>> = HashMap::new();
        provider.insert("etude".into(), Arc::new(three_notes()));
        assert_eq!(provider.expected_sequence("etude").map(|s| s.len()), Some(3));
        assert!(provider.expected_sequence("missing").is_none());
    }
}
