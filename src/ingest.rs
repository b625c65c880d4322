//! Import and indexing commands.
//!
//! `litrev import` reads bibliographic records and upserts them into the
//! record store, optionally adding them to a project and a collection and
//! indexing them right away. Three input shapes are accepted:
//!
//! - a `.json` file holding an array of records (or a single record),
//! - a `.jsonl` / `.ndjson` file with one record per line,
//! - a directory of plain-text files (one item per file, key = file stem).
//!
//! A record carries its full text inline (`text`) or points at a file
//! (`text_path`, resolved relative to the import file).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use litreview_core::engine::{IndexOutcome, QueryEngine};
use litreview_core::models::BibliographyItem;

use crate::app::App;
use crate::config::Config;
use crate::progress::ProgressMode;

/// One record of an import file.
#[derive(Debug, Deserialize)]
pub struct ImportRecord {
    #[serde(flatten)]
    pub item: BibliographyItem,
    /// Path to a UTF-8 file with the full text, used when `text` is absent.
    #[serde(default)]
    pub text_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub project: Option<String>,
    pub collection: Option<String>,
    pub index: bool,
    /// Include patterns for directory imports.
    pub include_globs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub items: usize,
    pub with_text: usize,
    pub indexed: usize,
    pub already_indexed: usize,
    pub passages: usize,
    /// Re-imported items whose differing text was ignored.
    pub text_kept: usize,
}

/// Parse the records at `path` into items, resolving `text_path` references.
pub fn load_items(path: &Path, include_globs: &[String]) -> Result<Vec<BibliographyItem>> {
    if path.is_dir() {
        return scan_directory(path, include_globs);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let records = match path.extension().and_then(|e| e.to_str()) {
        Some("jsonl") | Some("ndjson") => parse_json_lines(&content)?,
        _ => parse_json(&content)
            .with_context(|| format!("Failed to parse import file: {}", path.display()))?,
    };

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let items = records
        .into_iter()
        .map(|record| resolve_text(record, base))
        .collect::<Result<Vec<_>>>()?;
    check_keys(&items)?;
    Ok(items)
}

fn parse_json(content: &str) -> Result<Vec<ImportRecord>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let records = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        _ => vec![serde_json::from_value(value)?],
    };
    Ok(records)
}

fn parse_json_lines(content: &str) -> Result<Vec<ImportRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid record on line {}", i + 1))
        })
        .collect()
}

fn resolve_text(record: ImportRecord, base: &Path) -> Result<BibliographyItem> {
    let mut item = record.item;
    if item.text.is_none() {
        if let Some(rel) = record.text_path {
            let full = base.join(&rel);
            let text = std::fs::read_to_string(&full).with_context(|| {
                format!("Failed to read text of {}: {}", item.key, full.display())
            })?;
            item.text = Some(text);
        }
    }
    Ok(item)
}

fn check_keys(items: &[BibliographyItem]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for item in items {
        if item.key.trim().is_empty() {
            bail!("Import record without a key");
        }
        if !seen.insert(item.key.as_str()) {
            bail!("Duplicate key in import: {}", item.key);
        }
    }
    Ok(())
}

fn scan_directory(root: &Path, include_globs: &[String]) -> Result<Vec<BibliographyItem>> {
    let patterns = if include_globs.is_empty() {
        vec!["**/*.txt".to_string(), "**/*.md".to_string()]
    } else {
        include_globs.to_vec()
    };
    let include_set = build_globset(&patterns)?;
    let exclude_set = build_globset(&["**/.git/**".to_string()])?;

    let mut items = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let Some(key) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
            continue;
        };
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                continue;
            }
        };
        items.push(BibliographyItem::new(key.clone()).with_title(key).with_text(text));
    }

    items.sort_by(|a, b| a.key.cmp(&b.key));
    check_keys(&items)?;
    Ok(items)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Upsert `items` and apply the requested memberships and indexing.
pub async fn import_items(
    engine: &QueryEngine,
    items: &[BibliographyItem],
    opts: &ImportOptions,
) -> Result<ImportSummary> {
    let store = engine.store();
    let mut text_kept = 0;
    for item in items {
        if let Some(existing) = store.get_item(&item.key).await? {
            if existing.has_text() && item.has_text() && existing.text != item.text {
                warn!(key = %item.key, "Item already has full text; keeping the stored text");
                text_kept += 1;
            }
        }
        store.upsert_item(item).await?;
    }
    let keys: Vec<String> = items.iter().map(|i| i.key.clone()).collect();

    if let Some(collection) = &opts.collection {
        store.add_items_to_collection(collection, &keys).await?;
    }
    if let Some(project) = &opts.project {
        let project = engine.create_project(project, true).await?;
        store.add_items_to_project(&project.id, &keys).await?;
    }

    let mut summary = ImportSummary {
        items: items.len(),
        with_text: items.iter().filter(|i| i.has_text()).count(),
        text_kept,
        ..Default::default()
    };
    if opts.index {
        for item in items {
            // Index what the store holds, which may be an earlier text.
            let Some(stored) = store.get_item(&item.key).await? else {
                continue;
            };
            match engine.index_item(&stored).await? {
                IndexOutcome::Indexed { passages } => {
                    summary.indexed += 1;
                    summary.passages += passages;
                }
                IndexOutcome::AlreadyIndexed => summary.already_indexed += 1,
                IndexOutcome::NoText => {}
            }
        }
    }

    info!(
        items = summary.items,
        indexed = summary.indexed,
        "Import complete"
    );
    Ok(summary)
}

pub async fn run_import(config: &Config, path: &Path, opts: &ImportOptions) -> Result<()> {
    let items = load_items(path, &opts.include_globs)?;
    let app = App::open(config).await?;
    let summary = import_items(app.engine(), &items, opts).await?;

    println!("import {}", path.display());
    println!("  items: {}", summary.items);
    println!("  with full text: {}", summary.with_text);
    if summary.text_kept > 0 {
        println!("  text kept (already stored): {}", summary.text_kept);
    }
    if let Some(project) = &opts.project {
        println!("  project: {}", project);
    }
    if let Some(collection) = &opts.collection {
        println!("  collection: {}", collection);
    }
    if opts.index {
        println!(
            "  indexed: {} items ({} passages)",
            summary.indexed, summary.passages
        );
        println!("  already indexed: {}", summary.already_indexed);
    }
    println!("ok");

    app.close().await;
    Ok(())
}

pub async fn run_index(config: &Config, redo: bool, progress: ProgressMode) -> Result<()> {
    let app = App::open(config).await?;
    let reporter = progress.reporter();
    let summary = app.engine().update_index(redo, reporter.as_ref()).await?;

    println!("index{}", if redo { " (rebuilt)" } else { "" });
    println!(
        "  indexed: {} items ({} passages)",
        summary.indexed, summary.passages
    );
    println!("  already indexed: {}", summary.already_indexed);
    println!("  without text: {}", summary.without_text);
    println!("ok");

    app.close().await;
    Ok(())
}
