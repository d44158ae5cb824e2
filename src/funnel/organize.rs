use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info};

use super::journey::link_cluster;
use crate::batch::BatchOptions;
use crate::funnel::{Article, FunnelStage, NewCluster};
use crate::store::{add_article_to_cluster, ArticleStore};
use crate::TARGET_LINKING;

#[derive(Debug, Clone, Serialize)]
pub struct PlannedPlacement {
    pub article_id: String,
    pub title: String,
    pub funnel_stage: FunnelStage,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedCluster {
    pub title: String,
    pub topic: String,
    pub placements: Vec<PlannedPlacement>,
}

/// Clusters that can be filled from unclustered articles, grouped by topic
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrganizePlan {
    pub clusters: Vec<PlannedCluster>,
    /// Unclustered articles that no planned cluster could absorb
    pub leftover: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrganizeReport {
    pub clusters_created: Vec<String>,
    pub articles_assigned: usize,
    pub links_written: usize,
    pub errors: Vec<String>,
}

/// Groups unclustered articles by topic and carves out as many complete 3-2-1
/// clusters as each topic's stage counts allow.
pub fn plan_auto_organize(articles: &[Article]) -> OrganizePlan {
    let mut by_topic: BTreeMap<&str, [Vec<&Article>; 3]> = BTreeMap::new();
    let mut unclustered = 0;

    for article in articles.iter().filter(|a| a.cluster_id.is_none()) {
        unclustered += 1;
        let stages = by_topic.entry(article.topic.as_str()).or_default();
        let slot = match article.funnel_stage {
            FunnelStage::Tofu => 0,
            FunnelStage::Mofu => 1,
            FunnelStage::Bofu => 2,
        };
        stages[slot].push(article);
    }

    let mut plan = OrganizePlan::default();
    for (topic, [tofu, mofu, bofu]) in by_topic {
        let possible = (tofu.len() / 3).min(mofu.len() / 2).min(bofu.len());

        for n in 0..possible {
            let members = tofu[n * 3..n * 3 + 3]
                .iter()
                .chain(&mofu[n * 2..n * 2 + 2])
                .chain(std::iter::once(&bofu[n]));

            let placements = members
                .zip(1i64..)
                .map(|(article, position)| PlannedPlacement {
                    article_id: article.id.clone(),
                    title: article.title.clone(),
                    funnel_stage: article.funnel_stage,
                    position,
                })
                .collect();

            plan.clusters.push(PlannedCluster {
                title: format!("{} - Cluster {}", topic, n + 1),
                topic: topic.to_string(),
                placements,
            });
        }
    }

    let placed: usize = plan.clusters.iter().map(|c| c.placements.len()).sum();
    plan.leftover = unclustered - placed;
    plan
}

/// Creates every planned cluster, places its articles and wires the journey
/// links between them. Failures are collected and the remaining work carries on.
pub async fn execute_organize_plan<S>(
    store: &S,
    plan: &OrganizePlan,
    language: &str,
    options: BatchOptions,
) -> OrganizeReport
where
    S: ArticleStore + ?Sized,
{
    let mut report = OrganizeReport::default();

    for planned in &plan.clusters {
        let new_cluster = NewCluster {
            title: planned.title.clone(),
            topic: planned.topic.clone(),
            language: language.to_string(),
            description: Some(format!("Auto-organized {} funnel", planned.topic)),
        };

        let cluster_id = match store.create_cluster(&new_cluster).await {
            Ok(id) => id,
            Err(e) => {
                error!(target: TARGET_LINKING, "Failed to create cluster {}: {:#}", planned.title, e);
                report
                    .errors
                    .push(format!("{}: failed to create cluster: {:#}", planned.title, e));
                continue;
            }
        };

        for placement in &planned.placements {
            match add_article_to_cluster(store, &placement.article_id, &cluster_id, placement.position)
                .await
            {
                Ok(()) => report.articles_assigned += 1,
                Err(e) => report.errors.push(format!(
                    "{}: failed to place {} at position {}: {:#}",
                    planned.title, placement.article_id, placement.position, e
                )),
            }
        }

        match link_cluster(store, &cluster_id, options).await {
            Ok(links) => {
                report.links_written += links.applied();
                report.errors.extend(links.failed.into_iter().map(|failure| {
                    format!(
                        "{}: failed to link {}: {}",
                        planned.title, failure.item_id, failure.error
                    )
                }));
            }
            Err(e) => report
                .errors
                .push(format!("{}: failed to link cluster: {:#}", planned.title, e)),
        }

        info!(target: TARGET_LINKING, "Created cluster {} ({})", planned.title, cluster_id);
        report.clusters_created.push(cluster_id);
    }

    report
}
