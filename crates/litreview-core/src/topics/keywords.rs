//! Class-based TF-IDF keyword extraction.
//!
//! All unit texts of a cluster form one document. Terms are 1- to 3-grams
//! of lowercase words with English stop words removed. A term's weight in
//! a cluster is its in-cluster frequency (L1-normalized) times
//! `ln(1 + avg_words_per_cluster / total_frequency)`.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Frequent English function words excluded from keywords.
const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "either",
    "etc", "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
    "hers", "him", "his", "how", "however", "i", "if", "in", "into", "is", "it", "its", "itself",
    "just", "may", "me", "might", "more", "most", "much", "must", "my", "no", "nor", "not", "of",
    "off", "on", "once", "only", "or", "other", "our", "ours", "out", "over", "own", "same",
    "she", "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "then", "there", "these", "they", "this", "those", "through", "thus", "to", "too", "under",
    "until", "up", "upon", "us", "very", "was", "we", "were", "what", "when", "where", "whether",
    "which", "while", "who", "whom", "why", "will", "with", "within", "without", "would", "yes",
    "yet", "you", "your", "yours",
];

#[derive(Debug, Clone, Copy)]
pub struct KeywordSettings {
    pub top_n: usize,
    pub max_ngram: usize,
    /// Minimum number of clusters a term must appear in.
    pub min_df: usize,
    /// Maximum share of clusters a term may appear in (applied with two or more clusters).
    pub max_df: f64,
}

fn tokens(text: &str, stop: &HashSet<&str>) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|t| t.trim_matches('-').to_lowercase())
        .filter(|t| t.chars().count() > 1 && !stop.contains(t.as_str()))
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .collect()
}

fn ngrams(words: &[String], max_n: usize) -> Vec<String> {
    let mut out = Vec::new();
    for n in 1..=max_n.max(1) {
        for window in words.windows(n) {
            out.push(window.join(" "));
        }
    }
    out
}

/// Top keywords per cluster, highest weight first.
///
/// `documents` maps a cluster id to the texts of its units.
pub fn class_tfidf(
    documents: &BTreeMap<i64, Vec<String>>,
    settings: &KeywordSettings,
) -> BTreeMap<i64, Vec<(String, f64)>> {
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();

    let counts: BTreeMap<i64, HashMap<String, usize>> = documents
        .iter()
        .map(|(id, texts)| {
            let mut c: HashMap<String, usize> = HashMap::new();
            for text in texts {
                for term in ngrams(&tokens(text, &stop), settings.max_ngram) {
                    *c.entry(term).or_default() += 1;
                }
            }
            (*id, c)
        })
        .collect();

    let n_docs = counts.len();
    let mut df: HashMap<&str, usize> = HashMap::new();
    let mut total: HashMap<&str, usize> = HashMap::new();
    for c in counts.values() {
        for (term, n) in c {
            *df.entry(term.as_str()).or_default() += 1;
            *total.entry(term.as_str()).or_default() += n;
        }
    }

    let keep = |term: &str| {
        let d = df.get(term).copied().unwrap_or(0);
        if d < settings.min_df {
            return false;
        }
        n_docs < 2 || (d as f64) / (n_docs as f64) <= settings.max_df
    };

    let avg_words = if n_docs == 0 {
        0.0
    } else {
        counts
            .values()
            .map(|c| c.values().sum::<usize>())
            .sum::<usize>() as f64
            / n_docs as f64
    };

    counts
        .iter()
        .map(|(id, c)| {
            let doc_total: usize = c.values().sum();
            let mut scored: Vec<(String, f64)> = c
                .iter()
                .filter(|(term, _)| keep(term))
                .map(|(term, n)| {
                    let tf = *n as f64 / doc_total.max(1) as f64;
                    let freq = total.get(term.as_str()).copied().unwrap_or(1) as f64;
                    let idf = (1.0 + avg_words / freq).ln();
                    (term.clone(), tf * idf)
                })
                .collect();
            scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            scored.truncate(settings.top_n);
            (*id, scored)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> KeywordSettings {
        KeywordSettings {
            top_n: 5,
            max_ngram: 3,
            min_df: 1,
            max_df: 0.8,
        }
    }

    #[test]
    fn test_tokens_drop_stop_words_and_numbers() {
        let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();
        assert_eq!(
            tokens("The effect of peer-review on 2020 grades.", &stop),
            vec!["effect", "peer-review", "grades"]
        );
    }

    #[test]
    fn test_ngrams() {
        let words: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(ngrams(&words, 2), vec!["a", "b", "c", "a b", "b c"]);
    }

    #[test]
    fn test_distinctive_terms_rank_first() {
        let mut docs = BTreeMap::new();
        docs.insert(
            0,
            vec![
                "coral reef bleaching".to_string(),
                "reef bleaching events".to_string(),
                "study methods".to_string(),
            ],
        );
        docs.insert(
            1,
            vec![
                "programming course feedback".to_string(),
                "course feedback loops".to_string(),
                "study methods".to_string(),
            ],
        );
        let keywords = class_tfidf(&docs, &settings());
        let top0: Vec<&str> = keywords[&0].iter().map(|(t, _)| t.as_str()).collect();
        let top1: Vec<&str> = keywords[&1].iter().map(|(t, _)| t.as_str()).collect();
        assert!(top0.contains(&"reef bleaching") || top0.contains(&"reef"));
        assert!(top1.contains(&"course feedback") || top1.contains(&"course"));
        // Present in every cluster, removed by max_df.
        assert!(!top0.contains(&"study"));
        assert!(!top1.contains(&"methods"));
    }

    #[test]
    fn test_single_cluster_keeps_terms() {
        let mut docs = BTreeMap::new();
        docs.insert(0, vec!["motivation motivation grades".to_string()]);
        let keywords = class_tfidf(&docs, &settings());
        assert_eq!(keywords[&0][0].0, "motivation");
    }
}
