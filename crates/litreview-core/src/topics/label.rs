//! Topic labelling through the generator.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::llm::ChatMessage;

/// Maximum number of characters of topic descriptions sent for labelling.
pub const MAX_LABEL_INPUT_CHARS: usize = 10_000;

const LABEL_SYSTEM_PROMPT: &str = "You are a helpful assistant.\n\
Using the information below, find a label for each of the topics presented.\n\
Give your answer as JSON with the numbers of the topic as the keys:";

fn json_object() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"))
}

/// What the labeller sees of one topic.
pub struct TopicDigest<'a> {
    pub id: i64,
    pub keywords: &'a [String],
    pub examples: &'a [String],
}

/// Build the labelling conversation for a set of topics.
pub fn label_messages(topics: &[TopicDigest<'_>]) -> Vec<ChatMessage> {
    let body = topics
        .iter()
        .map(|t| {
            let mut block = format!("Topic {}\nKeywords: {}\n\nExamples:", t.id, t.keywords.join(", "));
            for example in t.examples {
                block.push_str("\n- ");
                block.push_str(example.trim());
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let body: String = body.chars().take(MAX_LABEL_INPUT_CHARS).collect();
    vec![ChatMessage::system(LABEL_SYSTEM_PROMPT), ChatMessage::user(body)]
}

/// Parse `{"0": "label", ...}` out of a generator answer.
///
/// Keys that are not integers and values that are not non-empty strings are
/// ignored. Returns an empty map when no JSON object can be found.
pub fn parse_labels(answer: &str) -> BTreeMap<i64, String> {
    let Some(m) = json_object().find(answer) else {
        return BTreeMap::new();
    };
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(m.as_str())
    else {
        return BTreeMap::new();
    };
    map.into_iter()
        .filter_map(|(k, v)| {
            let id = k.trim().parse::<i64>().ok()?;
            let label = v.as_str()?.trim().to_string();
            (!label.is_empty()).then_some((id, label))
        })
        .collect()
}

/// Label used when the generator gives none.
pub fn fallback_label(id: i64, keywords: &[String]) -> String {
    if keywords.is_empty() {
        format!("Topic {id}")
    } else {
        format!(
            "{id}_{}",
            keywords.iter().take(4).cloned().collect::<Vec<_>>().join("_")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_messages_layout() {
        let keywords = vec!["reef".to_string(), "bleaching".to_string()];
        let examples = vec!["Coral reefs bleach.".to_string()];
        let msgs = label_messages(&[TopicDigest {
            id: 0,
            keywords: &keywords,
            examples: &examples,
        }]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[0].content.ends_with("numbers of the topic as the keys:"));
        assert_eq!(
            msgs[1].content,
            "Topic 0\nKeywords: reef, bleaching\n\nExamples:\n- Coral reefs bleach."
        );
    }

    #[test]
    fn test_label_messages_truncated() {
        let keywords = vec!["x".repeat(20_000)];
        let msgs = label_messages(&[TopicDigest {
            id: 1,
            keywords: &keywords,
            examples: &[],
        }]);
        assert_eq!(msgs[1].content.chars().count(), MAX_LABEL_INPUT_CHARS);
    }

    #[test]
    fn test_parse_labels() {
        let answer = "Sure! ```json\n{\"0\": \"Coral bleaching\", \"1\": \"Course feedback\", \"x\": \"bad\", \"2\": 3}\n```";
        let labels = parse_labels(answer);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&0], "Coral bleaching");
        assert_eq!(labels[&1], "Course feedback");
    }

    #[test]
    fn test_parse_labels_garbage() {
        assert!(parse_labels("no json here").is_empty());
        assert!(parse_labels("{not json}").is_empty());
    }

    #[test]
    fn test_fallback_label() {
        assert_eq!(fallback_label(3, &[]), "Topic 3");
        let kw: Vec<String> = ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect();
        assert_eq!(fallback_label(0, &kw), "0_a_b_c_d");
    }
}
