//! `litrev topics`: cluster the answers of a query into topics.
//!
//! List answers are split into one unit per element, so a paper naming
//! three outcomes contributes to up to three topics.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use litreview_core::store::RecordStore;
use litreview_core::topics::{TopicAggregator, TopicModel, TopicSettings, NOISE};

use crate::app::App;
use crate::config::Config;

#[derive(Debug, Clone, Default)]
pub struct TopicOptions {
    pub min_cluster_size: Option<usize>,
    pub seed: Option<u64>,
    pub no_label: bool,
    /// Print the member items of one topic instead of the overview.
    pub topic: Option<i64>,
    pub matrix: bool,
    /// Report topic presence (0/1) per item instead of unit counts.
    pub presence: bool,
    /// Mean topic share per publication year.
    pub by_year: bool,
    /// Topics whose units are dropped before a refit.
    pub exclude: Vec<i64>,
    pub json: bool,
}

impl TopicOptions {
    fn settings(&self, base: &TopicSettings) -> TopicSettings {
        let mut settings = base.clone();
        if let Some(n) = self.min_cluster_size {
            settings.min_cluster_size = n.max(2);
        }
        if let Some(seed) = self.seed {
            settings.seed = seed;
        }
        if self.no_label {
            settings.label = false;
        }
        settings
    }
}

pub async fn fit_topics(app: &App, config: &Config, project: &str, query: &str, opts: &TopicOptions) -> Result<TopicModel> {
    let (_, query) = app.query(project, query).await?;
    let settings = opts.settings(&config.topics);
    let aggregator = TopicAggregator::new(app.embedder(), app.generator())
        .with_params(config.llm.generation_params());
    let model = aggregator
        .fit_query(app.engine().store(), &query.id, &settings)
        .await?;
    if opts.exclude.is_empty() {
        return Ok(model);
    }
    let exclude: BTreeSet<i64> = opts.exclude.iter().copied().collect();
    Ok(aggregator.refit_without(&model, &exclude, &settings).await?)
}

/// Publication years of the items in `model`. Items without a year are left out.
pub async fn item_years(store: &dyn RecordStore, model: &TopicModel) -> Result<BTreeMap<String, i32>> {
    let keys: BTreeSet<&str> = model.assignments.iter().map(|a| a.unit.item_key.as_str()).collect();
    let mut years = BTreeMap::new();
    for key in keys {
        if let Some(year) = store.get_item(key).await?.and_then(|item| item.year) {
            years.insert(key.to_string(), year);
        }
    }
    Ok(years)
}

pub async fn run_topics(config: &Config, project: &str, query: &str, opts: &TopicOptions) -> Result<()> {
    let app = App::open(config).await?;
    let fitted = match fit_topics(&app, config, project, query, opts).await {
        Ok(model) if opts.by_year => item_years(app.engine().store(), &model)
            .await
            .map(|years| (model, years)),
        Ok(model) => Ok((model, BTreeMap::new())),
        Err(e) => Err(e),
    };
    app.close().await;
    let (model, years) = fitted?;

    if opts.json {
        if opts.by_year {
            println!("{}", serde_json::to_string_pretty(&model.topics_by_year(&years))?);
        } else {
            println!("{}", serde_json::to_string_pretty(&model)?);
        }
        return Ok(());
    }
    if model.assignments.is_empty() {
        println!("No parsed answers to cluster. Run the query first.");
        return Ok(());
    }

    if let Some(id) = opts.topic {
        print_topic_items(&model, id);
    } else if opts.by_year {
        print_by_year(&model, &years);
    } else if opts.matrix {
        print_matrix(&model, opts.presence);
    } else {
        print_overview(&model);
    }
    Ok(())
}

fn print_overview(model: &TopicModel) {
    println!("{:>5} {:>6}  LABEL", "TOPIC", "COUNT");
    for row in model.summary() {
        println!("{:>5} {:>6}  {}", row.id, row.count, row.label);
    }
    for topic in &model.topics {
        println!();
        println!("--- Topic {}: {} ---", topic.id, topic.label);
        println!("keywords: {}", topic.keywords.join(", "));
        for example in &topic.examples {
            println!("  - {}", example.replace('\n', " "));
        }
    }
}

fn print_topic_items(model: &TopicModel, id: i64) {
    let label = if id == NOISE {
        "Outliers".to_string()
    } else {
        model
            .topic(id)
            .map(|t| t.label.clone())
            .unwrap_or_else(|| "(unknown topic)".to_string())
    };
    println!("--- Topic {}: {} ---", id, label);
    for assignment in model.assignments.iter().filter(|a| a.topic == id) {
        println!("{:<28} {}", assignment.unit.to_string(), assignment.text.replace('\n', " "));
    }
    println!();
    println!("{} items", model.items_for_topic(id).len());
}

fn print_matrix(model: &TopicModel, presence_only: bool) {
    let mut ids: Vec<i64> = model.topics.iter().map(|t| t.id).collect();
    if model.noise > 0 {
        ids.push(NOISE);
    }
    let header: Vec<String> = ids.iter().map(|id| format!("{:>5}", id)).collect();
    println!("{:<24} {}", "ITEM", header.join(" "));
    for (item, counts) in model.item_topic_matrix(presence_only) {
        let cells: Vec<String> = ids
            .iter()
            .map(|id| format!("{:>5}", counts.get(id).copied().unwrap_or(0)))
            .collect();
        println!("{:<24} {}", item, cells.join(" "));
    }
}

fn print_by_year(model: &TopicModel, years: &BTreeMap<String, i32>) {
    let by_year = model.topics_by_year(years);
    if by_year.is_empty() {
        println!("No items with a publication year.");
        return;
    }
    let header: Vec<String> = model.topics.iter().map(|t| format!("{:>7}", t.id)).collect();
    println!("{:<6} {}", "YEAR", header.join(" "));
    for (year, shares) in &by_year {
        let cells: Vec<String> = model
            .topics
            .iter()
            .map(|t| format!("{:>6.1}%", shares.get(&t.id).copied().unwrap_or(0.0)))
            .collect();
        println!("{:<6} {}", year, cells.join(" "));
    }
}
