use std::collections::HashMap;
use uuid::Uuid;

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Lowercase alphanumeric words longer than one character.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Clone)]
struct DocStats {
    length: usize,
    term_counts: HashMap<String, u32>,
}

/// BM25 index over record contents.
///
/// Documents are scored in insertion order and ties keep that order, so
/// results are deterministic for equal scores.
#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    order: Vec<Uuid>,
    docs: HashMap<Uuid, DocStats>,
    doc_freq: HashMap<String, usize>,
    total_length: usize,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: Uuid, text: &str) {
        if self.docs.contains_key(&id) {
            self.remove(id);
        }
        let tokens = tokenize(text);
        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *term_counts.entry(token.clone()).or_default() += 1;
        }
        for term in term_counts.keys() {
            *self.doc_freq.entry(term.clone()).or_default() += 1;
        }
        self.total_length += tokens.len();
        self.order.push(id);
        self.docs.insert(
            id,
            DocStats {
                length: tokens.len(),
                term_counts,
            },
        );
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        let Some(stats) = self.docs.remove(&id) else {
            return false;
        };
        for term in stats.term_counts.keys() {
            if let Some(df) = self.doc_freq.get_mut(term) {
                *df -= 1;
                if *df == 0 {
                    self.doc_freq.remove(term);
                }
            }
        }
        self.total_length -= stats.length;
        self.order.retain(|d| *d != id);
        true
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Up to `limit` matching document ids, best first. Documents sharing no
    /// term with the query are omitted.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(Uuid, f64)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.docs.is_empty() || limit == 0 {
            return Vec::new();
        }

        let n = self.docs.len() as f64;
        let avg_len = (self.total_length as f64 / n).max(1.0);

        let mut scored: Vec<(Uuid, f64)> = self
            .order
            .iter()
            .filter_map(|id| {
                let stats = self.docs.get(id)?;
                let score: f64 = query_terms
                    .iter()
                    .filter_map(|term| {
                        let tf = f64::from(*stats.term_counts.get(term)?);
                        let df = *self.doc_freq.get(term)? as f64;
                        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                        let norm = 1.0 - B + B * stats.length as f64 / avg_len;
                        Some(idf * tf * (K1 + 1.0) / (tf + K1 * norm))
                    })
                    .sum();
                (score > 0.0).then_some((*id, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}
