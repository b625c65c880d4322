//! Topic aggregation over the answers to one query.
//!
//! Responses are parsed with their prompt; list answers are exploded into
//! one unit per element. Units are embedded, reduced with [`cluster::project`],
//! clustered with [`cluster::hdbscan`], and described by c-TF-IDF keywords
//! plus the examples closest to each cluster centroid. When a generator is
//! available it is asked for a short label per topic.
//!
//! The resulting [`TopicModel`] is derived data. Fitting again replaces it.

pub mod cluster;
pub mod keywords;
pub mod label;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::embedding::{cosine_similarity, normalize, Embedder};
use crate::error::{Error, Result};
use crate::llm::{GenerationParams, Generator};
use crate::models::Response;
use crate::prompt::{Prompt, PromptValue};
use crate::store::RecordStore;

pub use self::cluster::NOISE;
use self::keywords::KeywordSettings;
use self::label::TopicDigest;

/// Clustering and description parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TopicSettings {
    pub min_cluster_size: usize,
    /// Neighbourhood size for core distances. Defaults to `min_cluster_size`.
    pub min_samples: Option<usize>,
    pub n_components: usize,
    pub seed: u64,
    pub top_n_words: usize,
    pub n_examples: usize,
    pub min_df: usize,
    pub max_df: f64,
    /// Ask the generator for topic labels when one is configured.
    pub label: bool,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            min_cluster_size: 5,
            min_samples: None,
            n_components: 32,
            seed: 42,
            top_n_words: 10,
            n_examples: 3,
            min_df: 1,
            max_df: 0.8,
            label: true,
        }
    }
}

/// Provenance of an aggregation unit: the item, plus the element index
/// when the answer was a list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct UnitId {
    pub item_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_index: Option<usize>,
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_index {
            Some(i) => write!(f, "{}#{}", self.item_key, i),
            None => f.write_str(&self.item_key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationUnit {
    pub id: UnitId,
    pub text: String,
}

/// Turn stored responses into aggregation units.
///
/// Responses whose answer does not parse are dropped, as are blank texts.
pub fn collect_units(prompt: &Prompt, responses: &[Response]) -> Vec<AggregationUnit> {
    let mut units = Vec::new();
    for response in responses {
        let Some(value) = prompt.parse_value(&response.text) else {
            continue;
        };
        let texts = value.unit_texts();
        let exploded = matches!(value, PromptValue::List(_));
        for (i, text) in texts.into_iter().enumerate() {
            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }
            units.push(AggregationUnit {
                id: UnitId {
                    item_key: response.item_key.clone(),
                    sub_index: exploded.then_some(i),
                },
                text,
            });
        }
    }
    units
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicAssignment {
    pub unit: UnitId,
    pub text: String,
    pub topic: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Topic {
    pub id: i64,
    pub label: String,
    pub keywords: Vec<String>,
    pub examples: Vec<String>,
    pub size: usize,
}

/// One row of [`TopicModel::summary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicCount {
    pub id: i64,
    pub label: String,
    pub count: usize,
}

/// A fitted partition of aggregation units into topics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TopicModel {
    /// One entry per unit, in input order.
    pub assignments: Vec<TopicAssignment>,
    /// Non-noise topics, largest first.
    pub topics: Vec<Topic>,
    pub noise: usize,
}

impl TopicModel {
    /// Unit counts per topic, with outliers last when there are any.
    pub fn summary(&self) -> Vec<TopicCount> {
        let mut rows: Vec<TopicCount> = self
            .topics
            .iter()
            .map(|t| TopicCount {
                id: t.id,
                label: t.label.clone(),
                count: t.size,
            })
            .collect();
        if self.noise > 0 {
            rows.push(TopicCount {
                id: NOISE,
                label: "Outliers".to_string(),
                count: self.noise,
            });
        }
        rows
    }

    /// Distinct item keys with at least one unit in `topic`, in input order.
    pub fn items_for_topic(&self, topic: i64) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for a in self.assignments.iter().filter(|a| a.topic == topic) {
            if !keys.contains(&a.unit.item_key.as_str()) {
                keys.push(&a.unit.item_key);
            }
        }
        keys
    }

    /// Per item, how many of its units fell into each topic.
    ///
    /// With `presence_only` every non-zero count is reported as 1.
    pub fn item_topic_matrix(&self, presence_only: bool) -> BTreeMap<String, BTreeMap<i64, usize>> {
        let mut matrix: BTreeMap<String, BTreeMap<i64, usize>> = BTreeMap::new();
        for a in &self.assignments {
            let cell = matrix
                .entry(a.unit.item_key.clone())
                .or_default()
                .entry(a.topic)
                .or_default();
            *cell = if presence_only { 1 } else { *cell + 1 };
        }
        matrix
    }

    /// Mean topic share per publication year, in percent.
    ///
    /// Each item's units are turned into shares per topic (outliers count
    /// toward the item's total but are not reported). Shares are averaged
    /// over the items of a year. Items without a year are skipped.
    pub fn topics_by_year(&self, years: &BTreeMap<String, i32>) -> BTreeMap<i32, BTreeMap<i64, f64>> {
        let mut sums: BTreeMap<i32, BTreeMap<i64, f64>> = BTreeMap::new();
        let mut items_per_year: BTreeMap<i32, usize> = BTreeMap::new();

        for (item, counts) in self.item_topic_matrix(false) {
            let Some(&year) = years.get(&item) else {
                continue;
            };
            let total: usize = counts.values().sum();
            if total == 0 {
                continue;
            }
            *items_per_year.entry(year).or_default() += 1;
            let row = sums.entry(year).or_default();
            for topic in &self.topics {
                let n = counts.get(&topic.id).copied().unwrap_or(0);
                *row.entry(topic.id).or_default() += n as f64 / total as f64;
            }
        }

        sums.into_iter()
            .map(|(year, row)| {
                let n = items_per_year.get(&year).copied().unwrap_or(1) as f64;
                let row = row
                    .into_iter()
                    .map(|(topic, sum)| (topic, sum / n * 100.0))
                    .collect();
                (year, row)
            })
            .collect()
    }

    /// The units of every topic except those in `exclude`, ready for a refit.
    pub fn without_topics(&self, exclude: &BTreeSet<i64>) -> Vec<AggregationUnit> {
        self.assignments
            .iter()
            .filter(|a| !exclude.contains(&a.topic))
            .map(|a| AggregationUnit {
                id: a.unit.clone(),
                text: a.text.clone(),
            })
            .collect()
    }

    pub fn without_topic(&self, id: i64) -> Vec<AggregationUnit> {
        self.without_topics(&BTreeSet::from([id]))
    }

    pub fn topic(&self, id: i64) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }
}

/// Fits [`TopicModel`]s with an embedder and an optional labelling generator.
pub struct TopicAggregator {
    embedder: Arc<dyn Embedder>,
    generator: Option<Arc<dyn Generator>>,
    params: GenerationParams,
}

impl TopicAggregator {
    pub fn new(embedder: Arc<dyn Embedder>, generator: Option<Arc<dyn Generator>>) -> Self {
        Self {
            embedder,
            generator,
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Load a query's responses from `store` and fit them.
    pub async fn fit_query(
        &self,
        store: &dyn RecordStore,
        query_id: &str,
        settings: &TopicSettings,
    ) -> Result<TopicModel> {
        let query = store
            .get_query_by_id(query_id)
            .await?
            .ok_or_else(|| Error::InvalidScope(format!("query not found: {query_id}")))?;
        let prompt = Prompt::from_spec(&query.prompt)?;
        let responses = store.responses_for_query(query_id).await?;
        let units = collect_units(&prompt, &responses);
        info!(
            query = %query.name,
            responses = responses.len(),
            units = units.len(),
            "Fitting topics"
        );
        self.fit(units, settings).await
    }

    /// Drop the units of the `exclude` topics from `model` and fit the rest again.
    pub async fn refit_without(
        &self,
        model: &TopicModel,
        exclude: &BTreeSet<i64>,
        settings: &TopicSettings,
    ) -> Result<TopicModel> {
        let units = model.without_topics(exclude);
        info!(
            excluded = model.assignments.len() - units.len(),
            remaining = units.len(),
            "Refitting topics"
        );
        self.fit(units, settings).await
    }

    pub async fn fit(
        &self,
        units: Vec<AggregationUnit>,
        settings: &TopicSettings,
    ) -> Result<TopicModel> {
        if units.is_empty() {
            return Ok(TopicModel::default());
        }

        let texts: Vec<String> = units.iter().map(|u| u.text.clone()).collect();
        let mut vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != units.len() {
            return Err(Error::embedding(format!(
                "expected {} embeddings, got {}",
                units.len(),
                vectors.len()
            )));
        }
        for v in vectors.iter_mut() {
            normalize(v);
        }

        let reduced = cluster::project(&vectors, settings.n_components, settings.seed);
        let min_samples = settings.min_samples.unwrap_or(settings.min_cluster_size);
        let labels = cluster::hdbscan(&reduced, settings.min_cluster_size, min_samples);

        let mut members: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, &topic) in labels.iter().enumerate() {
            if topic != NOISE {
                members.entry(topic).or_default().push(i);
            }
        }
        debug!(topics = members.len(), units = units.len(), "Clustered units");

        let documents: BTreeMap<i64, Vec<String>> = members
            .iter()
            .map(|(id, idx)| (*id, idx.iter().map(|&i| texts[i].clone()).collect()))
            .collect();
        let keywords = keywords::class_tfidf(
            &documents,
            &KeywordSettings {
                top_n: settings.top_n_words,
                max_ngram: 3,
                min_df: settings.min_df,
                max_df: settings.max_df,
            },
        );

        let mut topics: Vec<Topic> = members
            .iter()
            .map(|(id, idx)| Topic {
                id: *id,
                label: String::new(),
                keywords: keywords
                    .get(id)
                    .map(|k| k.iter().map(|(term, _)| term.clone()).collect())
                    .unwrap_or_default(),
                examples: representatives(&vectors, idx, settings.n_examples)
                    .into_iter()
                    .map(|i| texts[i].clone())
                    .collect(),
                size: idx.len(),
            })
            .collect();

        let labels_by_id = if settings.label {
            self.label_topics(&topics).await?
        } else {
            BTreeMap::new()
        };
        for topic in topics.iter_mut() {
            topic.label = labels_by_id
                .get(&topic.id)
                .cloned()
                .unwrap_or_else(|| label::fallback_label(topic.id, &topic.keywords));
        }

        let noise = labels.iter().filter(|&&l| l == NOISE).count();
        let assignments = units
            .into_iter()
            .zip(labels)
            .map(|(unit, topic)| TopicAssignment {
                unit: unit.id,
                text: unit.text,
                topic,
            })
            .collect();

        Ok(TopicModel {
            assignments,
            topics,
            noise,
        })
    }

    async fn label_topics(&self, topics: &[Topic]) -> Result<BTreeMap<i64, String>> {
        if topics.is_empty() {
            return Ok(BTreeMap::new());
        }
        let Some(generator) = &self.generator else {
            warn!("No generator configured; topics keep keyword labels");
            return Ok(BTreeMap::new());
        };
        let digests: Vec<TopicDigest<'_>> = topics
            .iter()
            .map(|t| TopicDigest {
                id: t.id,
                keywords: &t.keywords,
                examples: &t.examples,
            })
            .collect();
        let answer = generator
            .generate(&label::label_messages(&digests), &self.params)
            .await?;
        let labels = label::parse_labels(&answer);
        if labels.is_empty() {
            warn!(answer_len = answer.len(), "Could not parse topic labels");
        }
        Ok(labels)
    }
}

/// Indices of the `n` members closest to the members' centroid.
fn representatives(vectors: &[Vec<f32>], members: &[usize], n: usize) -> Vec<usize> {
    let Some(&first) = members.first() else {
        return Vec::new();
    };
    let mut centroid = vec![0.0f32; vectors[first].len()];
    for &i in members {
        for (c, x) in centroid.iter_mut().zip(&vectors[i]) {
            *c += x;
        }
    }
    normalize(&mut centroid);

    let mut scored: Vec<(usize, f32)> = members
        .iter()
        .map(|&i| (i, cosine_similarity(&vectors[i], &centroid)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().take(n).map(|(i, _)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::prompt::PromptKind;

    fn response(key: &str, text: &str) -> Response {
        Response::new("q", key, text.to_string(), String::new())
    }

    #[test]
    fn test_unit_id_display() {
        let plain = UnitId {
            item_key: "smith2020".into(),
            sub_index: None,
        };
        let sub = UnitId {
            item_key: "smith2020".into(),
            sub_index: Some(2),
        };
        assert_eq!(plain.to_string(), "smith2020");
        assert_eq!(sub.to_string(), "smith2020#2");
    }

    #[test]
    fn test_collect_units_explodes_lists() {
        let prompt = Prompt::new("What methods?", PromptKind::list());
        let responses = vec![
            response("a", "- survey\n- interviews"),
            response("b", "none listed"),
        ];
        let units = collect_units(&prompt, &responses);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].id.to_string(), "a#0");
        assert_eq!(units[1].id.to_string(), "a#1");
        assert_eq!(units[1].text, "interviews");
    }

    #[test]
    fn test_collect_units_drops_unparsed() {
        let prompt = Prompt::new("Is it empirical?", PromptKind::YesNo);
        let responses = vec![response("a", "Yes."), response("b", "Maybe")];
        let units = collect_units(&prompt, &responses);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].id.sub_index, None);
        assert_eq!(units[0].text, "yes");
    }

    #[test]
    fn test_representatives_prefers_centroid() {
        let vectors = vec![
            vec![1.0, 0.0],
            vec![0.7071, 0.7071],
            vec![0.0, 1.0],
        ];
        assert_eq!(representatives(&vectors, &[0, 1, 2], 1), vec![1]);
        assert!(representatives(&vectors, &[], 3).is_empty());
    }

    fn units(groups: &[(&str, &[&str])]) -> Vec<AggregationUnit> {
        groups
            .iter()
            .flat_map(|(prefix, texts)| {
                texts.iter().enumerate().map(move |(i, t)| AggregationUnit {
                    id: UnitId {
                        item_key: format!("{prefix}{i}"),
                        sub_index: None,
                    },
                    text: t.to_string(),
                })
            })
            .collect()
    }

    fn settings() -> TopicSettings {
        TopicSettings {
            min_cluster_size: 3,
            n_components: 64,
            label: false,
            ..TopicSettings::default()
        }
    }

    const REEF: &[&str] = &[
        "coral reef bleaching ocean",
        "reef bleaching coral ocean warming",
        "coral reef ocean bleaching",
        "ocean coral reef bleaching events",
    ];
    const COURSE: &[&str] = &[
        "programming course student feedback",
        "student feedback programming course",
        "course feedback student programming",
        "programming student course feedback loops",
    ];

    #[tokio::test]
    async fn test_fit_partitions_every_unit() {
        let aggregator = TopicAggregator::new(Arc::new(HashingEmbedder::new(64)), None);
        let input = units(&[("reef", REEF), ("course", COURSE)]);
        let model = aggregator.fit(input.clone(), &settings()).await.unwrap();

        assert_eq!(model.assignments.len(), input.len());
        let assigned: usize = model.topics.iter().map(|t| t.size).sum::<usize>() + model.noise;
        assert_eq!(assigned, input.len());

        let reef_topic = model.assignments[0].topic;
        assert_ne!(reef_topic, NOISE);
        assert!(model.assignments[..4].iter().all(|a| a.topic == reef_topic));
        let course_topic = model.assignments[4].topic;
        assert_ne!(course_topic, reef_topic);
        assert!(model.assignments[4..].iter().all(|a| a.topic == course_topic));

        let topic = model.topic(reef_topic).unwrap();
        assert!(topic.label.starts_with(&reef_topic.to_string()));
        assert!(!topic.examples.is_empty());
        assert_eq!(model.items_for_topic(course_topic).len(), 4);
    }

    #[tokio::test]
    async fn test_fit_is_deterministic() {
        let aggregator = TopicAggregator::new(Arc::new(HashingEmbedder::new(64)), None);
        let input = units(&[("reef", REEF), ("course", COURSE)]);
        let a = aggregator.fit(input.clone(), &settings()).await.unwrap();
        let b = aggregator.fit(input, &settings()).await.unwrap();
        let ta: Vec<i64> = a.assignments.iter().map(|x| x.topic).collect();
        let tb: Vec<i64> = b.assignments.iter().map(|x| x.topic).collect();
        assert_eq!(ta, tb);
    }

    #[tokio::test]
    async fn test_fit_empty() {
        let aggregator = TopicAggregator::new(Arc::new(HashingEmbedder::new(16)), None);
        let model = aggregator.fit(Vec::new(), &settings()).await.unwrap();
        assert!(model.assignments.is_empty());
        assert!(model.summary().is_empty());
    }

    #[test]
    fn test_summary_and_matrix() {
        let model = TopicModel {
            assignments: vec![
                TopicAssignment {
                    unit: UnitId { item_key: "a".into(), sub_index: Some(0) },
                    text: "x".into(),
                    topic: 0,
                },
                TopicAssignment {
                    unit: UnitId { item_key: "a".into(), sub_index: Some(1) },
                    text: "y".into(),
                    topic: 0,
                },
                TopicAssignment {
                    unit: UnitId { item_key: "b".into(), sub_index: None },
                    text: "z".into(),
                    topic: NOISE,
                },
            ],
            topics: vec![Topic {
                id: 0,
                label: "Things".into(),
                keywords: vec![],
                examples: vec![],
                size: 2,
            }],
            noise: 1,
        };
        let summary = model.summary();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[1].id, NOISE);
        assert_eq!(model.items_for_topic(0), vec!["a"]);
        let matrix = model.item_topic_matrix(false);
        assert_eq!(matrix["a"][&0], 2);
        assert_eq!(matrix["b"][&NOISE], 1);
        let presence = model.item_topic_matrix(true);
        assert_eq!(presence["a"][&0], 1);
    }

    fn assignment(key: &str, sub: usize, topic: i64) -> TopicAssignment {
        TopicAssignment {
            unit: UnitId { item_key: key.into(), sub_index: Some(sub) },
            text: format!("{key}-{sub}"),
            topic,
        }
    }

    fn topic(id: i64) -> Topic {
        Topic {
            id,
            label: format!("T{id}"),
            keywords: vec![],
            examples: vec![],
            size: 0,
        }
    }

    #[test]
    fn test_topics_by_year() {
        let model = TopicModel {
            assignments: vec![
                assignment("a", 0, 0),
                assignment("a", 1, 1),
                assignment("b", 0, 0),
                assignment("c", 0, 1),
                assignment("c", 1, NOISE),
                assignment("d", 0, 0),
            ],
            topics: vec![topic(0), topic(1)],
            noise: 1,
        };
        let years = BTreeMap::from([
            ("a".to_string(), 2019),
            ("b".to_string(), 2019),
            ("c".to_string(), 2020),
        ]);

        let by_year = model.topics_by_year(&years);
        assert_eq!(by_year.len(), 2);
        // a: 50% / 50%, b: 100% / 0%.
        assert!((by_year[&2019][&0] - 75.0).abs() < 1e-9);
        assert!((by_year[&2019][&1] - 25.0).abs() < 1e-9);
        // The outlier unit of c still counts toward its total.
        assert!((by_year[&2020][&0] - 0.0).abs() < 1e-9);
        assert!((by_year[&2020][&1] - 50.0).abs() < 1e-9);
        assert!(!by_year[&2020].contains_key(&NOISE));
    }

    #[test]
    fn test_without_topic() {
        let model = TopicModel {
            assignments: vec![assignment("a", 0, 0), assignment("b", 0, NOISE), assignment("c", 0, 1)],
            topics: vec![topic(0), topic(1)],
            noise: 1,
        };
        let kept = model.without_topic(NOISE);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|u| u.id.item_key != "b"));
        assert_eq!(kept[1].text, "c-0");

        let kept = model.without_topics(&BTreeSet::from([0, 1]));
        assert_eq!(kept.len(), 1);
    }

    #[tokio::test]
    async fn test_refit_without_drops_a_cluster() {
        let aggregator = TopicAggregator::new(Arc::new(HashingEmbedder::new(64)), None);
        let input = units(&[("reef", REEF), ("course", COURSE)]);
        let model = aggregator.fit(input, &settings()).await.unwrap();
        let reef_topic = model.assignments[0].topic;

        let refit = aggregator
            .refit_without(&model, &BTreeSet::from([reef_topic]), &settings())
            .await
            .unwrap();
        assert_eq!(refit.assignments.len(), COURSE.len());
        assert!(refit.assignments.iter().all(|a| a.unit.item_key.starts_with("course")));
    }
}
