//! Read-only rollups for the funnel dashboards.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::funnel::{Article, ClusterHealth, FunnelStage};
use crate::linking::Bottleneck;

/// Each clustered article is expected to carry this many funnel links
const LINKS_PER_ARTICLE: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterStats {
    pub total_clusters: usize,
    pub complete_clusters: usize,
    pub incomplete_clusters: usize,
    pub clustered_articles: usize,
    pub unclustered_articles: usize,
    pub healthy_links: usize,
    pub broken_links: usize,
    pub completion_percentage: f64,
    pub clustering_percentage: f64,
    pub link_health_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicAnalysis {
    pub topic: String,
    pub tofu_count: usize,
    pub mofu_count: usize,
    pub bofu_count: usize,
    pub missing_stages: Vec<FunnelStage>,
    /// Bottleneck targets touching this topic, either as target or as a source
    pub bottleneck_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LinkCoverage {
    pub tofu_with_mofu: usize,
    pub tofu_without_mofu: usize,
    pub mofu_with_bofu: usize,
    pub mofu_without_bofu: usize,
    pub topic_aligned_links: usize,
    pub coverage_percentage: f64,
}

/// Percentage rounded to one decimal; zero when `whole` is zero.
fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 1000.0 / whole as f64).round() / 10.0
}

pub fn cluster_stats(healths: &[ClusterHealth], total_articles: usize) -> ClusterStats {
    let complete_clusters = healths.iter().filter(|h| h.is_complete).count();
    let clustered_articles: usize = healths.iter().map(|h| h.article_count).sum();
    let broken_links: usize = healths.iter().map(|h| h.broken_links.len()).sum();
    let healthy_links = (clustered_articles * LINKS_PER_ARTICLE).saturating_sub(broken_links);

    ClusterStats {
        total_clusters: healths.len(),
        complete_clusters,
        incomplete_clusters: healths.len() - complete_clusters,
        clustered_articles,
        unclustered_articles: total_articles.saturating_sub(clustered_articles),
        healthy_links,
        broken_links,
        completion_percentage: percentage(complete_clusters, healths.len()),
        clustering_percentage: percentage(clustered_articles, total_articles),
        link_health_percentage: percentage(healthy_links, healthy_links + broken_links),
    }
}

/// Stage counts and bottlenecks per topic, alphabetical by topic.
pub fn analyze_topics(articles: &[Article], bottlenecks: &[Bottleneck]) -> Vec<TopicAnalysis> {
    let mut counts: BTreeMap<&str, [usize; 3]> = BTreeMap::new();
    for article in articles {
        let slot = match article.funnel_stage {
            FunnelStage::Tofu => 0,
            FunnelStage::Mofu => 1,
            FunnelStage::Bofu => 2,
        };
        counts.entry(article.topic.as_str()).or_default()[slot] += 1;
    }

    counts
        .into_iter()
        .map(|(topic, [tofu, mofu, bofu])| {
            let missing_stages = FunnelStage::ALL
                .into_iter()
                .zip([tofu, mofu, bofu])
                .filter(|(_, count)| *count == 0)
                .map(|(stage, _)| stage)
                .collect();

            let bottleneck_ids = bottlenecks
                .iter()
                .filter(|b| {
                    b.target_topic == topic || b.linking_articles.iter().any(|l| l.topic == topic)
                })
                .map(|b| b.target_article_id.clone())
                .collect();

            TopicAnalysis {
                topic: topic.to_string(),
                tofu_count: tofu,
                mofu_count: mofu,
                bofu_count: bofu,
                missing_stages,
                bottleneck_ids,
            }
        })
        .collect()
}

pub fn link_coverage(articles: &[Article]) -> LinkCoverage {
    let by_id: HashMap<&str, &Article> = articles.iter().map(|a| (a.id.as_str(), a)).collect();
    let mut coverage = LinkCoverage::default();

    for article in articles {
        let target = article.funnel_target();
        match (article.funnel_stage, target.is_some()) {
            (FunnelStage::Tofu, true) => coverage.tofu_with_mofu += 1,
            (FunnelStage::Tofu, false) => coverage.tofu_without_mofu += 1,
            (FunnelStage::Mofu, true) => coverage.mofu_with_bofu += 1,
            (FunnelStage::Mofu, false) => coverage.mofu_without_bofu += 1,
            (FunnelStage::Bofu, _) => {}
        }

        if target
            .and_then(|id| by_id.get(id))
            .is_some_and(|t| t.topic == article.topic)
        {
            coverage.topic_aligned_links += 1;
        }
    }

    let linked = coverage.tofu_with_mofu + coverage.mofu_with_bofu;
    let linkable = linked + coverage.tofu_without_mofu + coverage.mofu_without_bofu;
    coverage.coverage_percentage = percentage(linked, linkable);
    coverage
}
