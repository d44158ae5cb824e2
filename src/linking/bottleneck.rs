use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::batch::{run_batch, BatchOptions, BatchReport};
use crate::funnel::{Article, FunnelError, FunnelStage, PointerField};
use crate::linking::suggestions::link_articles;
use crate::store::ArticleStore;
use crate::TARGET_LINKING;

/// Default ceiling on inbound funnel links before an article counts as a bottleneck
pub const MAX_INCOMING_LINKS: usize = 5;

#[derive(Clone, Debug)]
pub struct BottleneckConfig {
    pub max_incoming_links: usize,
    pub critical_at: usize,
    pub high_at: usize,
    pub medium_at: usize,
    /// Cap on redistribution suggestions generated per bottleneck
    pub max_suggestions: usize,
}

impl Default for BottleneckConfig {
    fn default() -> Self {
        BottleneckConfig {
            max_incoming_links: MAX_INCOMING_LINKS,
            critical_at: 20,
            high_at: 15,
            medium_at: 10,
            max_suggestions: 10,
        }
    }
}

impl BottleneckConfig {
    pub fn classify(&self, incoming: usize) -> Severity {
        if incoming >= self.critical_at {
            Severity::Critical
        } else if incoming >= self.high_at {
            Severity::High
        } else if incoming >= self.medium_at {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(FunnelError::InvalidSeverity(s.to_string())),
        }
    }
}

/// An upstream article pointing at a bottleneck, and the pointer it uses
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkingArticle {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub funnel_stage: FunnelStage,
    pub topic: String,
    pub via: PointerField,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bottleneck {
    pub target_article_id: String,
    pub target_title: String,
    pub target_slug: String,
    pub target_stage: FunnelStage,
    pub target_topic: String,
    pub incoming_link_count: usize,
    pub linking_articles: Vec<LinkingArticle>,
    pub severity: Severity,
    pub recommended_actions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Prerequisite,
    NextStep,
    Alternative,
    Related,
}

/// A proposal to move one source's pointer off a bottleneck
#[derive(Debug, Clone, Serialize)]
pub struct SmartLinkSuggestion {
    pub from_article_id: String,
    pub from_title: String,
    pub to_article_id: String,
    pub to_title: String,
    pub bottleneck_id: String,
    pub field: PointerField,
    /// 0.0 to 1.0
    pub relevance_score: f64,
    pub link_type: LinkType,
    pub suggested_anchor_text: String,
    pub reasoning: String,
}

/// Upstream articles per target id. Self-links are ignored.
fn inbound_links(articles: &[Article]) -> HashMap<&str, Vec<(&Article, PointerField)>> {
    let mut inbound: HashMap<&str, Vec<(&Article, PointerField)>> = HashMap::new();
    for article in articles {
        for field in [PointerField::PointsToMofu, PointerField::PointsToBofu] {
            if let Some(target) = article.pointer(field) {
                if target != article.id {
                    inbound.entry(target).or_default().push((article, field));
                }
            }
        }
    }
    inbound
}

/// Number of other articles whose funnel pointers reference each article id.
pub fn inbound_counts(articles: &[Article]) -> HashMap<String, usize> {
    inbound_links(articles)
        .into_iter()
        .map(|(id, sources)| (id.to_string(), sources.len()))
        .collect()
}

/// Flags every article whose inbound link count exceeds the configured ceiling,
/// most-linked first.
pub fn detect_bottlenecks(articles: &[Article], config: &BottleneckConfig) -> Vec<Bottleneck> {
    let inbound = inbound_links(articles);
    let ceiling = config.max_incoming_links;

    let mut bottlenecks: Vec<Bottleneck> = articles
        .iter()
        .filter_map(|target| {
            let sources = inbound.get(target.id.as_str())?;
            let count = sources.len();
            if count <= ceiling {
                return None;
            }

            let linking_articles = sources
                .iter()
                .map(|(source, via)| LinkingArticle {
                    id: source.id.clone(),
                    title: source.title.clone(),
                    slug: source.slug.clone(),
                    funnel_stage: source.funnel_stage,
                    topic: source.topic.clone(),
                    via: *via,
                })
                .collect();

            let divisor = ceiling.max(1);
            Some(Bottleneck {
                target_article_id: target.id.clone(),
                target_title: target.title.clone(),
                target_slug: target.slug.clone(),
                target_stage: target.funnel_stage,
                target_topic: target.topic.clone(),
                incoming_link_count: count,
                linking_articles,
                severity: config.classify(count),
                recommended_actions: vec![
                    format!(
                        "Redistribute {} links to alternative articles",
                        count - ceiling
                    ),
                    format!(
                        "Create {} alternative {} articles",
                        (count + divisor - 1) / divisor,
                        target.funnel_stage
                    ),
                ],
            })
        })
        .collect();

    bottlenecks.sort_by(|a, b| b.incoming_link_count.cmp(&a.incoming_link_count));

    info!(
        target: TARGET_LINKING,
        "Detected {} bottleneck(s) across {} articles (ceiling {})",
        bottlenecks.len(),
        articles.len(),
        ceiling
    );

    bottlenecks
}

/// Proposes moving the sources beyond the ceiling onto alternative targets of
/// the same stage and topic that have fewer inbound links.
///
/// Each source goes to the alternative with the lowest projected inbound count;
/// an alternative is never filled up to the ceiling itself. Returns nothing when
/// no alternative has room.
pub fn generate_suggestions(
    bottleneck: &Bottleneck,
    articles: &[Article],
    config: &BottleneckConfig,
) -> Vec<SmartLinkSuggestion> {
    let ceiling = config.max_incoming_links;
    let counts = inbound_counts(articles);
    let count_of = |id: &str| counts.get(id).copied().unwrap_or(0);

    let mut alternatives: Vec<(&Article, usize)> = articles
        .iter()
        .filter(|a| {
            a.id != bottleneck.target_article_id
                && a.funnel_stage == bottleneck.target_stage
                && a.topic == bottleneck.target_topic
                && count_of(&a.id) < bottleneck.incoming_link_count
        })
        .map(|a| (a, count_of(&a.id)))
        .collect();

    if alternatives.is_empty() {
        debug!(
            target: TARGET_LINKING,
            "No alternative {} {} articles for bottleneck {}",
            bottleneck.target_topic,
            bottleneck.target_stage,
            bottleneck.target_article_id
        );
        return Vec::new();
    }

    let mut suggestions = Vec::new();
    let over_linked = bottleneck
        .linking_articles
        .iter()
        .skip(ceiling)
        .take(config.max_suggestions);

    for source in over_linked {
        let Some((alternative, projected)) = alternatives
            .iter_mut()
            .filter(|(_, projected)| *projected < ceiling)
            .min_by_key(|(_, projected)| *projected)
        else {
            break;
        };

        let base = if source.topic == alternative.topic { 1.0 } else { 0.8 };
        let spare = (ceiling - *projected) as f64 / ceiling.max(1) as f64;
        let relevance = (base * (0.5 + 0.5 * spare) * 100.0).round() / 100.0;

        suggestions.push(SmartLinkSuggestion {
            from_article_id: source.id.clone(),
            from_title: source.title.clone(),
            to_article_id: alternative.id.clone(),
            to_title: alternative.title.clone(),
            bottleneck_id: bottleneck.target_article_id.clone(),
            field: source.via,
            relevance_score: relevance.clamp(0.0, 1.0),
            link_type: LinkType::Alternative,
            suggested_anchor_text: format!("Learn about {}", alternative.title.to_lowercase()),
            reasoning: format!(
                "\"{}\" has {} inbound links (ceiling {}); \"{}\" covers the same {} {} step with {}",
                bottleneck.target_title,
                bottleneck.incoming_link_count,
                ceiling,
                alternative.title,
                alternative.topic,
                alternative.funnel_stage,
                projected
            ),
        });
        *projected += 1;
    }

    debug!(
        target: TARGET_LINKING,
        "Generated {} redistribution suggestion(s) for bottleneck {}",
        suggestions.len(),
        bottleneck.target_article_id
    );

    suggestions
}

/// Repoints each suggested source at its alternative target.
pub async fn apply_rebalance<S>(
    store: &S,
    suggestions: Vec<SmartLinkSuggestion>,
    options: BatchOptions,
) -> BatchReport
where
    S: ArticleStore + ?Sized,
{
    run_batch(
        "rebalance-bottlenecks",
        suggestions,
        options,
        |s| s.from_article_id.clone(),
        |s| async move { link_articles(store, &s.from_article_id, &s.to_article_id, s.field).await },
    )
    .await
}
