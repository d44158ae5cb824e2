use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::types::{Article, Cluster, FunnelError, FunnelStage, PointerField};
use super::CLUSTER_SIZE;
use crate::store::ArticleStore;
use crate::TARGET_LINKING;

/// Advisory outcome of a validation pass. Callers must check `is_valid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Checks pointer integrity within a set of articles claimed to form one cluster.
///
/// Every TOFU article must point at a MOFU article of the same set and every MOFU
/// article must point at a BOFU article of the same set. Stage counts are not
/// checked here; see [`check_completeness`].
pub fn validate_structure(articles: &[Article]) -> ValidationResult {
    let by_id: HashMap<&str, &Article> = articles.iter().map(|a| (a.id.as_str(), a)).collect();
    let mut errors = Vec::new();

    for article in articles {
        let Some(field) = PointerField::for_source(article.funnel_stage) else {
            continue;
        };
        let expected = match field {
            PointerField::PointsToMofu => FunnelStage::Mofu,
            PointerField::PointsToBofu => FunnelStage::Bofu,
        };
        let label = format!("missing {} link", expected.as_str().to_lowercase());

        match article.pointer(field) {
            None => errors.push(format!(
                "{}: {} article \"{}\" ({}) has no {} set",
                label,
                article.funnel_stage,
                article.title,
                article.id,
                field.column()
            )),
            Some(target_id) => match by_id.get(target_id) {
                Some(target) if target.funnel_stage == expected => {}
                Some(target) => errors.push(format!(
                    "{}: {} article \"{}\" ({}) points to {} article {} instead of {}",
                    label,
                    article.funnel_stage,
                    article.title,
                    article.id,
                    target.funnel_stage,
                    target_id,
                    expected
                )),
                None => errors.push(format!(
                    "{}: {} article \"{}\" ({}) points to {} which is not in this cluster",
                    label, article.funnel_stage, article.title, article.id, target_id
                )),
            },
        }
    }

    ValidationResult::from_errors(errors)
}

/// Checks the 3-2-1 shape: six articles, stage counts, canonical positions and
/// appointment booking on the BOFU article.
pub fn check_completeness(articles: &[Article]) -> ValidationResult {
    let mut errors = Vec::new();

    if articles.len() != CLUSTER_SIZE {
        errors.push(format!(
            "Cluster must have exactly {} articles, found {}",
            CLUSTER_SIZE,
            articles.len()
        ));
    }

    for stage in FunnelStage::ALL {
        let mut staged: Vec<&Article> =
            articles.iter().filter(|a| a.funnel_stage == stage).collect();
        let required = stage.required_in_cluster();

        if staged.len() != required {
            errors.push(format!(
                "Must have exactly {} {} article{}, found {}",
                required,
                stage,
                if required == 1 { "" } else { "s" },
                staged.len()
            ));
        }

        // Missing positions sort first, matching how an editor sees unplaced articles
        staged.sort_by_key(|a| a.cluster_position.unwrap_or(0));
        let expected = stage.cluster_positions();
        let misplaced = staged
            .iter()
            .enumerate()
            .any(|(i, a)| expected.get(i).copied() != a.cluster_position);
        if misplaced {
            let positions = expected
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            errors.push(format!(
                "{} articles must be in position{} {}",
                stage,
                if expected.len() == 1 { "" } else { "s" },
                positions
            ));
        }
    }

    for bofu in articles
        .iter()
        .filter(|a| a.funnel_stage == FunnelStage::Bofu && !a.appointment_booking_enabled)
    {
        errors.push(format!(
            "BOFU article \"{}\" ({}) must have appointment booking enabled",
            bofu.title, bofu.id
        ));
    }

    ValidationResult::from_errors(errors)
}

/// Both validation reports for one stored cluster
#[derive(Debug, Clone, Serialize)]
pub struct ClusterValidation {
    pub cluster_id: String,
    pub structure: ValidationResult,
    pub completeness: ValidationResult,
}

/// Fetches a cluster with its articles and validates it.
pub async fn validate_cluster<S>(store: &S, cluster_id: &str) -> Result<ClusterValidation>
where
    S: ArticleStore + ?Sized,
{
    let cluster = store
        .get_cluster_with_articles(cluster_id)
        .await?
        .ok_or_else(|| FunnelError::ClusterNotFound(cluster_id.to_string()))?;

    let structure = validate_structure(&cluster.articles);
    let completeness = check_completeness(&cluster.articles);

    info!(
        target: TARGET_LINKING,
        "Validated cluster {} ({} articles): structure {} error(s), completeness {} error(s)",
        cluster_id,
        cluster.articles.len(),
        structure.errors.len(),
        completeness.errors.len()
    );

    Ok(ClusterValidation {
        cluster_id: cluster_id.to_string(),
        structure,
        completeness,
    })
}

/// Independently reportable health properties of a cluster
#[derive(Debug, Clone, Serialize)]
pub struct ClusterHealth {
    pub cluster_id: String,
    pub cluster_title: String,
    pub article_count: usize,
    pub is_complete: bool,
    pub has_valid_structure: bool,
    pub missing_positions: Vec<i64>,
    pub broken_links: Vec<String>,
}

pub fn cluster_health(cluster: &Cluster) -> ClusterHealth {
    let articles = &cluster.articles;
    let ids: HashSet<&str> = articles.iter().map(|a| a.id.as_str()).collect();

    let positions: HashSet<i64> = articles.iter().filter_map(|a| a.cluster_position).collect();
    let missing_positions = (1..=CLUSTER_SIZE as i64)
        .filter(|p| !positions.contains(p))
        .collect();

    let mut broken_links = Vec::new();
    for article in articles {
        if let Some(target) = article.points_to_mofu_id.as_deref() {
            if !ids.contains(target) {
                broken_links.push(format!("{} → Missing MOFU", article.title));
            }
        }
        if let Some(target) = article.points_to_bofu_id.as_deref() {
            if !ids.contains(target) {
                broken_links.push(format!("{} → Missing BOFU", article.title));
            }
        }
    }

    let health = ClusterHealth {
        cluster_id: cluster.id.clone(),
        cluster_title: cluster.title.clone(),
        article_count: articles.len(),
        is_complete: check_completeness(articles).is_valid,
        has_valid_structure: validate_structure(articles).is_valid,
        missing_positions,
        broken_links,
    };

    debug!(
        target: TARGET_LINKING,
        "Cluster {} health: complete={}, valid={}, broken_links={}",
        health.cluster_id,
        health.is_complete,
        health.has_valid_structure,
        health.broken_links.len()
    );

    health
}
