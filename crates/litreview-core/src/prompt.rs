//! Prompt contracts.
//!
//! A [`Prompt`] pairs a question with a variant-specific system
//! instruction and a parser that turns free-text model output into a
//! typed [`PromptValue`]. Prompt kinds form the closed set
//! [`PromptKind`]; each carries its own parameters.
//!
//! Parsing never fails: answers that do not match the expected shape
//! yield `None` and the raw text stays available on the stored response.
//!
//! # Committed form
//!
//! Queries persist prompts as a [`PromptSpec`] triple
//! `(question, type tag, canonical parameter JSON)`. Any change to the
//! triple invalidates the query's stored responses.
//!
//! ```rust
//! use litreview_core::prompt::{Prompt, PromptKind, PromptValue};
//!
//! let prompt = Prompt::new("Is the study empirical?", PromptKind::YesNo);
//! assert_eq!(prompt.parse_value("Yes, it reports a survey."), Some(PromptValue::Bool(true)));
//! assert_eq!(prompt.parse_value("Maybe"), None);
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::llm::ChatMessage;
use crate::models::PromptSpec;

const PREAMBLE: &str = "You are a meticulous research assistant supporting a systematic literature review.\n\
Base your answer only on the context extracted from the publication.";

const YES_NO_TEMPLATE: &str = "{preamble}\n\
Start your answer with \"Yes\" or \"No\", followed by one sentence of justification.\n\
If the context does not allow a decision, answer \"Unknown\".";

const LIST_TEMPLATE: &str = "{preamble}\n\
Answer with a bulleted list of at most {n} items, one item per line, each line starting with \"- \".\n\
Keep every item short. If the context mentions nothing relevant, answer \"None\".";

const OPTIONS_TEMPLATE: &str = "{preamble}\n\
Choose the one option that best answers the question:\n\
{options}\n\n\
Start your answer with the name of the chosen option, followed by one sentence of justification.";

const LIKERT_TEMPLATE: &str = "{preamble}\n\
Rate how strongly the context supports the statement, using this scale:\n\
{scale}\n\n\
Start your answer with the number of the chosen level, followed by one sentence of justification.";

const OPEN_TEMPLATE: &str = "{preamble}\n\
Answer the question in at most {n_sentences} sentences.";

const CRITERIA_TEMPLATE: &str = "{preamble}\n\
Assess the publication against each of these criteria:\n\
{criteria}\n\n\
Answer with a single JSON object that has one key per criterion name and a short assessment as the value.";

/// One named choice of an options or criteria prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub key: String,
    #[serde(default)]
    pub description: String,
}

impl Choice {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
        }
    }
}

/// One level of a Likert scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikertLevel {
    pub value: i64,
    pub label: String,
}

fn default_list_n() -> usize {
    5
}

fn default_n_sentences() -> usize {
    3
}

/// Seven-point agreement scale from -3 to 3.
pub fn default_likert_scale() -> Vec<LikertLevel> {
    [
        (-3, "Strongly Disagree"),
        (-2, "Disagree"),
        (-1, "Somewhat Disagree"),
        (0, "Neutral"),
        (1, "Somewhat Agree"),
        (2, "Agree"),
        (3, "Strongly Agree"),
    ]
    .into_iter()
    .map(|(value, label)| LikertLevel {
        value,
        label: label.to_string(),
    })
    .collect()
}

/// The closed set of prompt kinds with their parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptKind {
    YesNo,
    List {
        #[serde(default = "default_list_n")]
        n: usize,
    },
    Options {
        options: Vec<Choice>,
    },
    Likert {
        #[serde(default = "default_likert_scale")]
        scale: Vec<LikertLevel>,
    },
    Open {
        #[serde(default = "default_n_sentences")]
        n_sentences: usize,
    },
    Criteria {
        criteria: Vec<Choice>,
    },
    Custom {
        system_prompt: String,
    },
}

impl PromptKind {
    pub fn list() -> Self {
        PromptKind::List { n: default_list_n() }
    }

    pub fn likert() -> Self {
        PromptKind::Likert {
            scale: default_likert_scale(),
        }
    }

    pub fn open() -> Self {
        PromptKind::Open {
            n_sentences: default_n_sentences(),
        }
    }

    /// The stable type tag stored with queries.
    pub fn tag(&self) -> &'static str {
        match self {
            PromptKind::YesNo => "yes_no",
            PromptKind::List { .. } => "list",
            PromptKind::Options { .. } => "options",
            PromptKind::Likert { .. } => "likert",
            PromptKind::Open { .. } => "open",
            PromptKind::Criteria { .. } => "criteria",
            PromptKind::Custom { .. } => "custom",
        }
    }
}

/// A question plus its prompt kind and optional guidance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub question: String,
    #[serde(flatten)]
    pub kind: PromptKind,
    /// Definition of the concept the question is about.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    /// Example answers or example instances of the concept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examples: Option<String>,
    /// Retrieval phrase used instead of the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_phrase: Option<String>,
}

/// A parsed answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PromptValue {
    Bool(bool),
    List(Vec<String>),
    Choice(String),
    Integer(i64),
    Object(serde_json::Value),
    Text(String),
}

impl PromptValue {
    /// Texts fed to topic aggregation. Lists yield one text per element.
    pub fn unit_texts(&self) -> Vec<String> {
        match self {
            PromptValue::Bool(b) => vec![if *b { "yes" } else { "no" }.to_string()],
            PromptValue::List(items) => items.clone(),
            PromptValue::Choice(s) | PromptValue::Text(s) => vec![s.clone()],
            PromptValue::Integer(n) => vec![n.to_string()],
            PromptValue::Object(v) => vec![v.to_string()],
        }
    }

    /// Whether this value equals a filter value given as text.
    ///
    /// Booleans accept `yes`/`no`/`true`/`false`; lists match when any
    /// element equals the expected value. Comparisons ignore case.
    pub fn matches_filter(&self, expected: &str) -> bool {
        let expected = expected.trim();
        match self {
            PromptValue::Bool(b) => match expected.to_lowercase().as_str() {
                "yes" | "true" => *b,
                "no" | "false" => !*b,
                _ => false,
            },
            PromptValue::Integer(n) => expected.parse::<i64>().is_ok_and(|e| e == *n),
            PromptValue::Choice(s) | PromptValue::Text(s) => s.trim().eq_ignore_ascii_case(expected),
            PromptValue::List(items) => items.iter().any(|i| i.trim().eq_ignore_ascii_case(expected)),
            PromptValue::Object(v) => serde_json::from_str::<serde_json::Value>(expected)
                .is_ok_and(|e| &e == v),
        }
    }
}

impl Prompt {
    pub fn new(question: impl Into<String>, kind: PromptKind) -> Self {
        Self {
            question: question.into(),
            kind,
            concept: None,
            examples: None,
            search_phrase: None,
        }
    }

    pub fn with_concept(mut self, concept: impl Into<String>) -> Self {
        self.concept = Some(concept.into());
        self
    }

    pub fn with_examples(mut self, examples: impl Into<String>) -> Self {
        self.examples = Some(examples.into());
        self
    }

    pub fn with_search_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.search_phrase = Some(phrase.into());
        self
    }

    /// Load a prompt definition from TOML.
    ///
    /// ```toml
    /// question = "Which learning outcomes are reported?"
    /// type = "list"
    /// n = 5
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml_prompt(content)
    }

    pub fn type_tag(&self) -> &'static str {
        self.kind.tag()
    }

    /// Phrase used for retrieval: `search_phrase` if set, else the question.
    pub fn search_phrase(&self) -> &str {
        self.search_phrase
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.question)
    }

    /// Render the committed `(question, type, params)` triple.
    pub fn to_spec(&self) -> Result<PromptSpec> {
        let mut value = serde_json::to_value(self)?;
        let map = value
            .as_object_mut()
            .ok_or_else(|| Error::InvalidPrompt("prompt did not serialize to an object".into()))?;
        map.remove("question");
        map.remove("type");
        Ok(PromptSpec {
            question: self.question.clone(),
            prompt_type: self.type_tag().to_string(),
            params_json: serde_json::to_string(map)?,
        })
    }

    /// Rebuild a prompt from its committed triple.
    pub fn from_spec(spec: &PromptSpec) -> Result<Self> {
        let mut map: serde_json::Map<String, serde_json::Value> =
            if spec.params_json.trim().is_empty() {
                serde_json::Map::new()
            } else {
                serde_json::from_str(&spec.params_json).map_err(|e| {
                    Error::InvalidPrompt(format!("stored parameters are not a JSON object: {e}"))
                })?
            };
        map.insert("question".into(), spec.question.clone().into());
        map.insert("type".into(), spec.prompt_type.clone().into());
        serde_json::from_value(serde_json::Value::Object(map)).map_err(|e| {
            Error::InvalidPrompt(format!(
                "cannot decode '{}' prompt: {e}",
                spec.prompt_type
            ))
        })
    }

    /// SHA-256 over the committed triple, hex encoded.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(spec_fingerprint(&self.to_spec()?))
    }

    /// Fill the kind's instruction template.
    ///
    /// Fails with [`Error::InvalidPrompt`] when a required parameter is
    /// missing or empty.
    pub fn render_system_instruction(&self) -> Result<String> {
        let mut vars: HashMap<&str, String> = HashMap::new();
        vars.insert("preamble", PREAMBLE.to_string());

        let template = match &self.kind {
            PromptKind::YesNo => YES_NO_TEMPLATE,
            PromptKind::List { n } => {
                if *n > 0 {
                    vars.insert("n", n.to_string());
                }
                LIST_TEMPLATE
            }
            PromptKind::Options { options } => {
                vars.insert("options", render_choices(options, "options")?);
                OPTIONS_TEMPLATE
            }
            PromptKind::Likert { scale } => {
                let lines: Vec<String> = scale
                    .iter()
                    .map(|l| format!("- **{}**: {}", l.value, l.label))
                    .collect();
                vars.insert("scale", lines.join("\n"));
                LIKERT_TEMPLATE
            }
            PromptKind::Open { n_sentences } => {
                if *n_sentences > 0 {
                    vars.insert("n_sentences", n_sentences.to_string());
                }
                OPEN_TEMPLATE
            }
            PromptKind::Criteria { criteria } => {
                vars.insert("criteria", render_choices(criteria, "criteria")?);
                CRITERIA_TEMPLATE
            }
            PromptKind::Custom { system_prompt } => {
                if system_prompt.trim().is_empty() {
                    return Err(Error::InvalidPrompt(
                        "custom prompt requires a non-empty system_prompt".into(),
                    ));
                }
                return Ok(self.append_guidance(system_prompt.clone()));
            }
        };

        let rendered = render_template(template, &vars)?;
        Ok(self.append_guidance(rendered))
    }

    fn append_guidance(&self, mut instruction: String) -> String {
        if let Some(concept) = self.concept.as_deref().filter(|c| !c.trim().is_empty()) {
            instruction.push_str(&format!("\nConsider the following definition: {concept}\n"));
        }
        if let Some(examples) = self.examples.as_deref().filter(|e| !e.trim().is_empty()) {
            instruction.push_str(&format!("\nConsider the following examples: {examples}\n"));
        }
        instruction
    }

    /// The two-message chat: system instruction, then question and context.
    pub fn build_messages(&self, context: &str) -> Result<Vec<ChatMessage>> {
        let label = match self.kind {
            PromptKind::Likert { .. } => "Statement",
            _ => "Question",
        };
        Ok(vec![
            ChatMessage::system(self.render_system_instruction()?),
            ChatMessage::user(format!(
                "{label}: {}\n\nContext: {context}",
                self.question
            )),
        ])
    }

    /// Map a raw answer to a typed value; `None` when it does not fit.
    pub fn parse_value(&self, raw: &str) -> Option<PromptValue> {
        match &self.kind {
            PromptKind::YesNo => parse_yes_no(raw),
            PromptKind::List { .. } => Some(PromptValue::List(parse_list(raw))),
            PromptKind::Options { options } => parse_option(options, raw),
            PromptKind::Likert { .. } => first_integer(raw).map(PromptValue::Integer),
            PromptKind::Criteria { .. } => first_object(raw).map(PromptValue::Object),
            PromptKind::Open { .. } | PromptKind::Custom { .. } => {
                Some(PromptValue::Text(raw.to_string()))
            }
        }
    }
}

/// SHA-256 hex digest identifying a committed prompt triple.
pub fn spec_fingerprint(spec: &PromptSpec) -> String {
    let mut hasher = Sha256::new();
    hasher.update(spec.question.as_bytes());
    hasher.update([0u8]);
    hasher.update(spec.prompt_type.as_bytes());
    hasher.update([0u8]);
    hasher.update(spec.params_json.as_bytes());
    format!("{:x}", hasher.finalize())
}

// Goes through serde_json::Value so flattened, internally tagged kinds
// decode the same way from TOML files and from stored specs.
fn toml_prompt(content: &str) -> Result<Prompt> {
    let table: toml::Value =
        toml::from_str(content).map_err(|e| Error::InvalidPrompt(e.to_string()))?;
    let value = serde_json::to_value(table)?;
    serde_json::from_value(value).map_err(|e| Error::InvalidPrompt(e.to_string()))
}

fn render_choices(choices: &[Choice], what: &str) -> Result<String> {
    if choices.is_empty() {
        return Err(Error::InvalidPrompt(format!("{what} must not be empty")));
    }
    if choices.iter().any(|c| c.key.trim().is_empty()) {
        return Err(Error::InvalidPrompt(format!("{what} contain an empty key")));
    }
    Ok(choices
        .iter()
        .map(|c| format!("- **{}**: {}", c.key, c.description))
        .collect::<Vec<_>>()
        .join("\n"))
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([a-z_]+)\}").expect("static regex"))
}

/// Replace `{name}` placeholders; every placeholder needs a non-empty value.
fn render_template(template: &str, vars: &HashMap<&str, String>) -> Result<String> {
    for cap in placeholder().captures_iter(template) {
        let name = &cap[1];
        match vars.get(name) {
            Some(v) if !v.trim().is_empty() => {}
            _ => {
                return Err(Error::InvalidPrompt(format!(
                    "template parameter '{name}' is missing or empty"
                )))
            }
        }
    }
    Ok(placeholder()
        .replace_all(template, |cap: &regex::Captures| {
            vars.get(&cap[1]).cloned().unwrap_or_default()
        })
        .into_owned())
}

fn parse_yes_no(raw: &str) -> Option<PromptValue> {
    let answer = raw
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if answer.starts_with("yes") {
        Some(PromptValue::Bool(true))
    } else if answer.starts_with("no") {
        Some(PromptValue::Bool(false))
    } else {
        None
    }
}

fn list_item() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:[-*+•]|\d+[.)])[ \t]+(.+?)[ \t]*\r?$").expect("static regex")
    })
}

fn parse_list(raw: &str) -> Vec<String> {
    list_item()
        .captures_iter(raw)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// First option (in declaration order) whose key occurs in the answer as
/// a standalone token, ignoring case.
fn parse_option(options: &[Choice], raw: &str) -> Option<PromptValue> {
    let answer = raw.to_lowercase();
    options
        .iter()
        .find(|opt| contains_token(&answer, &opt.key.to_lowercase()))
        .map(|opt| PromptValue::Choice(opt.key.clone()))
}

fn contains_token(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(i, m)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + m.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn first_integer(raw: &str) -> Option<i64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"-?[0-9]+").expect("static regex"));
    re.find(raw).and_then(|m| m.as_str().parse().ok())
}

fn first_object(raw: &str) -> Option<serde_json::Value> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));
    let m = re.find(raw)?;
    match serde_json::from_str::<serde_json::Value>(m.as_str()) {
        Ok(v) if v.is_object() => Some(v),
        _ => None,
    }
}
