use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;

use super::types::{Article, ArticleUpdate, FunnelError, FunnelStage, PointerField};
use super::validator::{validate_structure, ValidationResult};
use crate::batch::{run_batch, BatchOptions, BatchReport};
use crate::store::ArticleStore;
use crate::TARGET_LINKING;

/// A funnel pointer that has to be written for a cluster's journey to converge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JourneyLink {
    pub source_id: String,
    pub target_id: String,
    pub field: PointerField,
}

fn first_of(articles: &[Article], stage: FunnelStage) -> Option<&Article> {
    articles
        .iter()
        .filter(|a| a.funnel_stage == stage)
        .min_by_key(|a| a.cluster_position.unwrap_or(i64::MAX))
}

/// Pointer writes that wire a cluster's members into one journey: every TOFU
/// article to the lowest-positioned MOFU, every MOFU article to the BOFU.
///
/// Pointers that already hold the right target are left out. A stage with no
/// target in the cluster produces no writes for its sources.
pub fn plan_journey_links(articles: &[Article]) -> Vec<JourneyLink> {
    let mut links = Vec::new();

    for (source_stage, target_stage) in [
        (FunnelStage::Tofu, FunnelStage::Mofu),
        (FunnelStage::Mofu, FunnelStage::Bofu),
    ] {
        let Some(target) = first_of(articles, target_stage) else {
            continue;
        };
        let Some(field) = PointerField::for_source(source_stage) else {
            continue;
        };

        let mut sources: Vec<&Article> = articles
            .iter()
            .filter(|a| a.funnel_stage == source_stage)
            .filter(|a| a.pointer(field) != Some(target.id.as_str()))
            .collect();
        sources.sort_by_key(|a| a.cluster_position.unwrap_or(i64::MAX));

        links.extend(sources.into_iter().map(|source| JourneyLink {
            source_id: source.id.clone(),
            target_id: target.id.clone(),
            field,
        }));
    }

    links
}

/// Pointer integrity plus convergence: all TOFU articles lead to the same MOFU
/// and all MOFU articles lead to the same BOFU.
pub fn validate_journey(articles: &[Article]) -> ValidationResult {
    let mut errors = validate_structure(articles).errors;

    for (source_stage, target_stage) in [
        (FunnelStage::Tofu, FunnelStage::Mofu),
        (FunnelStage::Mofu, FunnelStage::Bofu),
    ] {
        let sources: Vec<&Article> = articles
            .iter()
            .filter(|a| a.funnel_stage == source_stage)
            .collect();
        if sources.is_empty() {
            continue;
        }

        let targets: BTreeSet<&str> = sources.iter().filter_map(|a| a.funnel_target()).collect();
        match targets.len() {
            0 => errors.push(format!(
                "{} articles are not linked to {}",
                source_stage, target_stage
            )),
            1 => {}
            _ => errors.push(format!(
                "{} articles point to different {} articles ({}); they should all point to the same one",
                source_stage,
                target_stage,
                targets.into_iter().collect::<Vec<_>>().join(", ")
            )),
        }
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// Fetches a cluster and writes the pointers [`plan_journey_links`] asks for.
pub async fn link_cluster<S>(
    store: &S,
    cluster_id: &str,
    options: BatchOptions,
) -> Result<BatchReport>
where
    S: ArticleStore + ?Sized,
{
    let cluster = store
        .get_cluster_with_articles(cluster_id)
        .await?
        .ok_or_else(|| FunnelError::ClusterNotFound(cluster_id.to_string()))?;

    let links = plan_journey_links(&cluster.articles);
    info!(
        target: TARGET_LINKING,
        "Cluster {} needs {} journey link(s)", cluster.title, links.len()
    );

    let report = run_batch(
        "link-cluster",
        links,
        options,
        |link| link.source_id.clone(),
        |link| async move {
            store
                .update_article(&link.source_id, &ArticleUpdate::pointer(link.field, &link.target_id))
                .await
        },
    )
    .await;

    Ok(report)
}
