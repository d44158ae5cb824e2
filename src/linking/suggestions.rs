use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::rejections::RejectionStore;
use crate::batch::{run_batch, BatchOptions, BatchReport};
use crate::funnel::{Article, ArticleUpdate, PointerField};
use crate::store::ArticleStore;
use crate::TARGET_LINKING;

/// Confidence when the candidate's topic equals the source's topic
pub const PERFECT_MATCH_CONFIDENCE: u8 = 95;

/// Confidence for any other candidate of the next stage
pub const FALLBACK_CONFIDENCE: u8 = 60;

/// Minimum confidence for a suggestion to be applied without review
pub const AUTO_APPLY_THRESHOLD: u8 = 90;

/// Maximum number of suggestions kept per source article
pub const MAX_SUGGESTIONS_PER_ARTICLE: usize = 3;

pub const PERFECT_MATCH_REASON: &str = "Perfect topic match";
pub const FALLBACK_REASON: &str = "General fallback option";

#[derive(Clone, Debug, Default)]
pub struct SuggestionConfig {
    /// When set, fallback candidates are limited to this catch-all topic
    /// instead of every article of the next stage.
    pub fallback_topic: Option<String>,
}

/// A candidate target for a missing funnel pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmartSuggestion {
    pub target_id: String,
    pub title: String,
    pub topic: String,
    pub confidence: u8,
    pub reason: String,
}

/// A pointer write chosen for a source article
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkAssignment {
    pub source_id: String,
    pub target_id: String,
    pub field: PointerField,
    pub confidence: u8,
    pub reason: String,
}

pub type SuggestionMap = BTreeMap<String, Vec<SmartSuggestion>>;

/// Proposes targets for every TOFU article without a MOFU pointer and every
/// MOFU article without a BOFU pointer.
///
/// Candidates are ranked by confidence (stable, so ties keep input order) and
/// truncated to [`MAX_SUGGESTIONS_PER_ARTICLE`]. Sources with no candidate are
/// left out of the map.
pub fn suggest_links(articles: &[Article], config: &SuggestionConfig) -> SuggestionMap {
    let mut suggestions = SuggestionMap::new();

    for source in articles {
        let Some(next_stage) = source.funnel_stage.next() else {
            continue;
        };
        if source.funnel_target().is_some() {
            continue;
        }

        let mut candidates: Vec<SmartSuggestion> = articles
            .iter()
            .filter(|candidate| candidate.funnel_stage == next_stage)
            .filter(|candidate| match config.fallback_topic.as_deref() {
                Some(general) => candidate.topic == source.topic || candidate.topic == general,
                None => true,
            })
            .map(|candidate| {
                let perfect = candidate.topic == source.topic;
                SmartSuggestion {
                    target_id: candidate.id.clone(),
                    title: candidate.title.clone(),
                    topic: candidate.topic.clone(),
                    confidence: if perfect {
                        PERFECT_MATCH_CONFIDENCE
                    } else {
                        FALLBACK_CONFIDENCE
                    },
                    reason: if perfect {
                        PERFECT_MATCH_REASON
                    } else {
                        FALLBACK_REASON
                    }
                    .to_string(),
                }
            })
            .collect();

        if candidates.is_empty() {
            continue;
        }

        candidates.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        candidates.truncate(MAX_SUGGESTIONS_PER_ARTICLE);
        suggestions.insert(source.id.clone(), candidates);
    }

    debug!(
        target: TARGET_LINKING,
        "Generated suggestions for {} of {} articles",
        suggestions.len(),
        articles.len()
    );

    suggestions
}

/// The suggestions for `source_id` minus every pair the editor rejected.
pub fn filtered_suggestions<R>(
    source_id: &str,
    suggestions: &[SmartSuggestion],
    rejections: &R,
) -> Vec<SmartSuggestion>
where
    R: RejectionStore + ?Sized,
{
    suggestions
        .iter()
        .filter(|s| !rejections.is_rejected(source_id, &s.target_id))
        .cloned()
        .collect()
}

/// Counts non-rejected suggestions at or above [`AUTO_APPLY_THRESHOLD`].
pub fn high_confidence_count<R>(suggestions: &SuggestionMap, rejections: &R) -> usize
where
    R: RejectionStore + ?Sized,
{
    suggestions
        .iter()
        .map(|(source_id, list)| {
            filtered_suggestions(source_id, list, rejections)
                .iter()
                .filter(|s| s.confidence >= AUTO_APPLY_THRESHOLD)
                .count()
        })
        .sum()
}

/// Chooses at most one pointer write per source: its top-ranked suggestion that
/// meets [`AUTO_APPLY_THRESHOLD`] and was not rejected.
pub fn plan_bulk_apply<R>(
    suggestions: &SuggestionMap,
    articles: &[Article],
    rejections: &R,
) -> Vec<LinkAssignment>
where
    R: RejectionStore + ?Sized,
{
    let by_id: HashMap<&str, &Article> = articles.iter().map(|a| (a.id.as_str(), a)).collect();

    suggestions
        .iter()
        .filter_map(|(source_id, list)| {
            let source = by_id.get(source_id.as_str())?;
            let field = PointerField::for_source(source.funnel_stage)?;
            let best = list.iter().find(|s| {
                s.confidence >= AUTO_APPLY_THRESHOLD
                    && !rejections.is_rejected(source_id, &s.target_id)
            })?;
            Some(LinkAssignment {
                source_id: source_id.clone(),
                target_id: best.target_id.clone(),
                field,
                confidence: best.confidence,
                reason: best.reason.clone(),
            })
        })
        .collect()
}

/// Writes one funnel pointer on the source article.
pub async fn link_articles<S>(
    store: &S,
    source_id: &str,
    target_id: &str,
    field: PointerField,
) -> Result<()>
where
    S: ArticleStore + ?Sized,
{
    store
        .update_article(source_id, &ArticleUpdate::pointer(field, target_id))
        .await?;
    info!(
        target: TARGET_LINKING,
        "Linked {} → {} via {}", source_id, target_id, field.column()
    );
    Ok(())
}

/// Writes every planned assignment through the batch runner.
pub async fn apply_assignments<S>(
    store: &S,
    assignments: Vec<LinkAssignment>,
    options: BatchOptions,
) -> BatchReport
where
    S: ArticleStore + ?Sized,
{
    run_batch(
        "apply-suggestions",
        assignments,
        options,
        |assignment| assignment.source_id.clone(),
        |assignment| async move {
            link_articles(
                store,
                &assignment.source_id,
                &assignment.target_id,
                assignment.field,
            )
            .await
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funnel::FunnelStage;
    use crate::linking::rejections::MemoryRejectionStore;
    use crate::testing::MemoryStore;

    fn catalog() -> Vec<Article> {
        vec![
            Article::new("t-legal", "Buying legally", "t-legal", "Legal", FunnelStage::Tofu),
            Article::new("t-fin", "Mortgage basics", "t-fin", "Finance", FunnelStage::Tofu),
            Article::new("t-done", "Linked", "t-done", "Legal", FunnelStage::Tofu)
                .pointing_to_mofu("m-legal"),
            Article::new("m-general", "General guide", "m-general", "general", FunnelStage::Mofu),
            Article::new("m-fin", "Finance deep dive", "m-fin", "Finance", FunnelStage::Mofu),
            Article::new("m-legal", "Legal deep dive", "m-legal", "Legal", FunnelStage::Mofu),
            Article::new("m-life", "Lifestyle guide", "m-life", "Lifestyle", FunnelStage::Mofu),
            Article::new("b-legal", "Book a lawyer", "b-legal", "Legal", FunnelStage::Bofu),
        ]
    }

    #[test]
    fn test_two_tier_confidence_and_truncation() {
        let suggestions = suggest_links(&catalog(), &SuggestionConfig::default());

        let legal = &suggestions["t-legal"];
        assert_eq!(legal.len(), MAX_SUGGESTIONS_PER_ARTICLE);
        assert_eq!(legal[0].target_id, "m-legal");
        assert_eq!(legal[0].confidence, 95);
        assert_eq!(legal[0].reason, "Perfect topic match");
        // Ties keep catalog order
        assert_eq!(legal[1].target_id, "m-general");
        assert_eq!(legal[2].target_id, "m-fin");

        for list in suggestions.values() {
            assert!(list.len() <= 3);
            assert!(list.iter().all(|s| s.confidence == 95 || s.confidence == 60));
        }
    }

    #[test]
    fn test_linked_and_terminal_sources_are_skipped() {
        let suggestions = suggest_links(&catalog(), &SuggestionConfig::default());
        assert!(!suggestions.contains_key("t-done"));
        assert!(!suggestions.contains_key("b-legal"));
        // MOFU sources without a BOFU pointer get BOFU candidates
        assert_eq!(suggestions["m-fin"][0].target_id, "b-legal");
        assert_eq!(suggestions["m-fin"][0].confidence, 60);
    }

    #[test]
    fn test_sources_without_candidates_are_omitted() {
        let articles = vec![Article::new("t1", "Lonely", "t1", "Legal", FunnelStage::Tofu)];
        assert!(suggest_links(&articles, &SuggestionConfig::default()).is_empty());
    }

    #[test]
    fn test_fallback_topic_restricts_pool() {
        let config = SuggestionConfig {
            fallback_topic: Some("general".to_string()),
        };
        let suggestions = suggest_links(&catalog(), &config);
        let ids: Vec<&str> = suggestions["t-legal"]
            .iter()
            .map(|s| s.target_id.as_str())
            .collect();
        assert_eq!(ids, vec!["m-legal", "m-general"]);
    }

    #[test]
    fn test_rejected_pair_never_reappears() {
        let suggestions = suggest_links(&catalog(), &SuggestionConfig::default());
        let mut rejections = MemoryRejectionStore::new();
        rejections.reject("t-legal", "m-legal", "admin").unwrap();

        let filtered = filtered_suggestions("t-legal", &suggestions["t-legal"], &rejections);
        assert!(filtered.iter().all(|s| s.target_id != "m-legal"));
        assert_eq!(filtered.len(), 2);

        // Recomputing does not bring it back through the accessor either
        let again = suggest_links(&catalog(), &SuggestionConfig::default());
        let filtered = filtered_suggestions("t-legal", &again["t-legal"], &rejections);
        assert!(filtered.iter().all(|s| s.target_id != "m-legal"));
    }

    #[test]
    fn test_bulk_plan_takes_top_eligible_per_source() {
        let articles = catalog();
        let suggestions = suggest_links(&articles, &SuggestionConfig::default());
        let rejections = MemoryRejectionStore::new();

        let plan = plan_bulk_apply(&suggestions, &articles, &rejections);
        // t-fin → m-fin, t-legal → m-legal, m-legal → b-legal; m-fin etc. only have 60s
        let pairs: Vec<(&str, &str)> = plan
            .iter()
            .map(|a| (a.source_id.as_str(), a.target_id.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("m-legal", "b-legal"),
                ("t-fin", "m-fin"),
                ("t-legal", "m-legal")
            ]
        );
        assert!(plan.iter().all(|a| a.confidence >= AUTO_APPLY_THRESHOLD));
        assert_eq!(plan[0].field, PointerField::PointsToBofu);
        assert_eq!(plan[1].field, PointerField::PointsToMofu);
        assert_eq!(high_confidence_count(&suggestions, &rejections), 3);
    }

    #[test]
    fn test_bulk_plan_skips_rejected_pairs() {
        let articles = catalog();
        let suggestions = suggest_links(&articles, &SuggestionConfig::default());
        let mut rejections = MemoryRejectionStore::new();
        rejections.reject("t-legal", "m-legal", "admin").unwrap();

        let plan = plan_bulk_apply(&suggestions, &articles, &rejections);
        // The only 95 for t-legal is rejected and 60s never qualify
        assert!(plan.iter().all(|a| a.source_id != "t-legal"));
        assert_eq!(high_confidence_count(&suggestions, &rejections), 2);
    }

    #[tokio::test]
    async fn test_apply_writes_pointer_fields_only() {
        let articles = catalog();
        let store = MemoryStore::new(articles.clone()).failing_on("t-fin");
        let suggestions = suggest_links(&articles, &SuggestionConfig::default());
        let plan = plan_bulk_apply(&suggestions, &articles, &MemoryRejectionStore::new());

        let report = apply_assignments(&store, plan, BatchOptions::default()).await;
        assert_eq!(report.succeeded, vec!["m-legal", "t-legal"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].item_id, "t-fin");

        let t_legal = store.article("t-legal").unwrap();
        assert_eq!(t_legal.points_to_mofu_id.as_deref(), Some("m-legal"));
        assert_eq!(t_legal.points_to_bofu_id, None);
        assert_eq!(t_legal.title, "Buying legally");
        let m_legal = store.article("m-legal").unwrap();
        assert_eq!(m_legal.points_to_bofu_id.as_deref(), Some("b-legal"));
        assert_eq!(store.article("t-fin").unwrap().points_to_mofu_id, None);
    }
}
