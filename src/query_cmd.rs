//! `litrev query` subcommands and `litrev ask`.
//!
//! Prompts come from a TOML definition file (`--prompt`) or, for kinds
//! without required parameters, from `--question` plus `--type`:
//!
//! ```toml
//! question = "Which learning outcomes are reported?"
//! type = "list"
//! n = 5
//! search_phrase = "learning outcomes results"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;

use litreview_core::context::Scope;
use litreview_core::models::Query;
use litreview_core::prompt::{Prompt, PromptKind};

use crate::app::App;
use crate::config::Config;
use crate::progress::ProgressMode;
use crate::project_cmd::{print_summary, rng};

/// Where a prompt definition comes from.
#[derive(Debug, Clone, Args)]
pub struct PromptSource {
    /// TOML prompt definition file
    #[arg(long, conflicts_with = "question")]
    pub prompt: Option<PathBuf>,

    /// Question text (for yes_no, list, likert and open prompts)
    #[arg(long)]
    pub question: Option<String>,

    /// Prompt type used with --question
    #[arg(long = "type", default_value = "yes_no")]
    pub kind: String,

    /// Retrieval phrase used instead of the question
    #[arg(long)]
    pub search_phrase: Option<String>,
}

impl PromptSource {
    pub fn load(&self) -> Result<Prompt> {
        let mut prompt = match (&self.prompt, &self.question) {
            (Some(path), _) => load_prompt_file(path)?,
            (None, Some(question)) => Prompt::new(question.clone(), simple_kind(&self.kind)?),
            (None, None) => bail!("Provide --prompt <file> or --question <text>"),
        };
        if let Some(phrase) = &self.search_phrase {
            prompt = prompt.with_search_phrase(phrase.clone());
        }
        Ok(prompt)
    }
}

pub fn load_prompt_file(path: &Path) -> Result<Prompt> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
    Prompt::from_toml_str(&content)
        .with_context(|| format!("Invalid prompt file: {}", path.display()))
}

fn simple_kind(tag: &str) -> Result<PromptKind> {
    Ok(match tag {
        "yes_no" => PromptKind::YesNo,
        "list" => PromptKind::list(),
        "likert" => PromptKind::likert(),
        "open" => PromptKind::open(),
        "options" | "criteria" | "custom" => {
            bail!("Prompt type '{}' needs parameters; use --prompt <file>", tag)
        }
        other => bail!(
            "Unknown prompt type: '{}'. Must be yes_no, list, options, likert, open, criteria, or custom.",
            other
        ),
    })
}

pub async fn run_create(
    config: &Config,
    project: &str,
    name: &str,
    source: &PromptSource,
    exists_ok: bool,
) -> Result<()> {
    let prompt = source.load()?;
    let app = App::open(config).await?;
    let project = app.project(project).await?;
    let query = app
        .engine()
        .create_query(&project.id, name, &prompt, exists_ok)
        .await;
    app.close().await;
    let query = query?;
    println!("query {} ({}) in {}", query.name, query.prompt.prompt_type, project.name);
    println!("ok");
    Ok(())
}

pub async fn run_update(
    config: &Config,
    project: &str,
    name: &str,
    source: &PromptSource,
) -> Result<()> {
    let prompt = source.load()?;
    let app = App::open(config).await?;
    let (_, query) = app.query(project, name).await?;
    let changed = app.engine().update_prompt(&query.id, &prompt).await;
    app.close().await;
    if changed? {
        println!("updated query {}; previous responses were cleared", name);
    } else {
        println!("query {} unchanged", name);
    }
    Ok(())
}

pub async fn run_delete(config: &Config, project: &str, name: &str) -> Result<()> {
    let app = App::open(config).await?;
    let (_, query) = app.query(project, name).await?;
    let deleted = app.engine().store().delete_query(&query.id).await;
    app.close().await;
    if !deleted? {
        bail!("query not found: {}", name);
    }
    println!("deleted query {}", name);
    Ok(())
}

pub async fn run_list(config: &Config, project: &str) -> Result<()> {
    let app = App::open(config).await?;
    let project = app.project(project).await?;
    let store = app.engine().store();
    let queries = store.list_queries(&project.id).await?;
    let total_items = store.project_item_keys(&project.id).await?.len();

    if queries.is_empty() {
        println!("No queries in {}.", project.name);
    } else {
        println!("{:<24} {:<10} {:>10}  QUESTION", "QUERY", "TYPE", "ANSWERED");
        for query in &queries {
            let answered = store.responses_for_query(&query.id).await?.len();
            println!(
                "{:<24} {:<10} {:>10}  {}",
                query.name,
                query.prompt.prompt_type,
                format!("{}/{}", answered, total_items),
                query.prompt.question
            );
        }
    }
    app.close().await;
    Ok(())
}

fn print_query(query: &Query, prompt: &Prompt) -> Result<()> {
    println!("--- Query ---");
    println!("name:         {}", query.name);
    println!("type:         {}", query.prompt.prompt_type);
    println!("question:     {}", query.prompt.question);
    println!("search:       {}", prompt.search_phrase());
    println!("params:       {}", query.prompt.params_json);
    println!("fingerprint:  {}", prompt.fingerprint()?);
    println!();
    println!("--- System instruction ---");
    println!("{}", prompt.render_system_instruction()?);
    Ok(())
}

pub async fn run_show(config: &Config, project: &str, name: &str) -> Result<()> {
    let app = App::open(config).await?;
    let (_, query) = app.query(project, name).await?;
    app.close().await;
    let prompt = Prompt::from_spec(&query.prompt)?;
    print_query(&query, &prompt)
}

pub async fn run_run(
    config: &Config,
    project: &str,
    name: &str,
    include: &[String],
    progress: ProgressMode,
) -> Result<()> {
    let app = App::open(config).await?;
    let (_, query) = app.query(project, name).await?;
    let reporter = progress.reporter();
    let include = (!include.is_empty()).then_some(include);
    let summary = app
        .engine()
        .run_query(&query.id, include, reporter.as_ref())
        .await;
    app.close().await;

    print_summary(&format!("query {}", name), &summary?);
    println!("ok");
    Ok(())
}

pub async fn run_test(
    config: &Config,
    project: &str,
    name: &str,
    persist: bool,
    seed: Option<u64>,
) -> Result<()> {
    let app = App::open(config).await?;
    let (_, query) = app.query(project, name).await?;
    let mut rng = rng(seed);
    let run = app.engine().test_query(&query.id, persist, &mut rng).await;
    app.close().await;
    let run = run?;

    println!("--- Item {} ---", run.response.item_key);
    println!("--- Context ---");
    println!("{}", run.response.context);
    println!();
    println!("--- Answer ---");
    println!("{}", run.response.text);
    println!();
    match &run.value {
        Some(value) => println!("parsed: {}", serde_json::to_string(value)?),
        None => println!("parsed: (no valid value)"),
    }
    if persist {
        println!(
            "stored: {}",
            if run.persisted { "yes" } else { "no (already answered)" }
        );
    }
    Ok(())
}

pub async fn run_responses(config: &Config, project: &str, name: &str, json: bool) -> Result<()> {
    let app = App::open(config).await?;
    let (_, query) = app.query(project, name).await?;
    let responses = app.engine().responses(&query.id).await;
    app.close().await;
    let responses = responses?;

    if json {
        println!("{}", serde_json::to_string_pretty(&responses)?);
        return Ok(());
    }
    for parsed in &responses {
        let value = match &parsed.value {
            Some(v) => serde_json::to_string(v)?,
            None => "(unparsed)".to_string(),
        };
        println!("{:<24} {}", parsed.response.item_key, value);
    }
    println!();
    println!("{} responses", responses.len());
    Ok(())
}

pub async fn run_clear(config: &Config, project: &str, name: &str) -> Result<()> {
    let app = App::open(config).await?;
    let (_, query) = app.query(project, name).await?;
    let removed = app.engine().clear_responses(&query.id).await;
    app.close().await;
    println!("cleared {} responses of {}", removed?, name);
    Ok(())
}

/// Print the keys of items whose parsed answer equals `value`.
pub async fn run_filter(config: &Config, project: &str, name: &str, value: &str) -> Result<()> {
    let app = App::open(config).await?;
    let (_, query) = app.query(project, name).await?;
    let keys = app.engine().filter_keys(&query.id, value).await;
    app.close().await;
    for key in keys? {
        println!("{}", key);
    }
    Ok(())
}

/// Ask a one-off prompt over a project, a single item, or the whole index.
pub async fn run_ask(
    config: &Config,
    source: &PromptSource,
    project: Option<&str>,
    item: Option<&str>,
    show_context: bool,
) -> Result<()> {
    let prompt = source.load()?;
    let app = App::open(config).await?;
    let scope = match (project, item) {
        (_, Some(item)) => Scope::Item(item.to_string()),
        (Some(project), None) => {
            let project = app.project(project).await?;
            Scope::Items(app.engine().store().project_item_keys(&project.id).await?)
        }
        (None, None) => Scope::All,
    };
    let answer = app.engine().rag(&prompt, &scope, &[]).await;
    app.close().await;
    let answer = answer?;

    if show_context {
        println!("--- Context ---");
        println!("{}", answer.context);
        println!();
        println!("--- Answer ---");
    }
    println!("{}", answer.answer);
    if let Some(value) = &answer.value {
        println!();
        println!("parsed: {}", serde_json::to_string(value)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(question: Option<&str>, kind: &str) -> PromptSource {
        PromptSource {
            prompt: None,
            question: question.map(str::to_string),
            kind: kind.to_string(),
            search_phrase: None,
        }
    }

    #[test]
    fn test_question_with_simple_kind() {
        let prompt = source(Some("Is it empirical?"), "yes_no").load().unwrap();
        assert_eq!(prompt.type_tag(), "yes_no");

        let list = source(Some("Which methods?"), "list").load().unwrap();
        assert_eq!(list.kind, PromptKind::List { n: 5 });
    }

    #[test]
    fn test_parameterised_kind_needs_file() {
        let err = source(Some("Which design?"), "options").load().unwrap_err();
        assert!(err.to_string().contains("--prompt"));
        assert!(source(None, "yes_no").load().is_err());
    }

    #[test]
    fn test_prompt_file_and_search_phrase_override() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("design.toml");
        std::fs::write(
            &path,
            r#"
question = "Which study design is used?"
type = "options"

[[options]]
key = "RCT"
description = "randomised controlled trial"

[[options]]
key = "Survey"
"#,
        )
        .unwrap();

        let mut src = source(None, "yes_no");
        src.prompt = Some(path);
        src.search_phrase = Some("study design methodology".into());
        let prompt = src.load().unwrap();
        assert_eq!(prompt.type_tag(), "options");
        assert_eq!(prompt.search_phrase(), "study design methodology");
    }
}
