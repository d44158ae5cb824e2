use anyhow::Context;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::HashSet;
use tracing::info;

use super::duplicates::title_similarity;
use super::types::{Article, ArticleUpdate};
use crate::batch::{run_batch, BatchOptions, BatchReport};
use crate::store::ArticleStore;
use crate::TARGET_LINKING;

/// Titles at or above this similarity are treated as the same article
pub const CLEANUP_THRESHOLD: f64 = 0.9;

/// Articles sharing one title; `keep_id` survives and the rest are merged into it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub title: String,
    pub article_ids: Vec<String>,
    pub keep_id: String,
    pub delete_ids: Vec<String>,
}

fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect()
}

/// Groups articles of the same language whose normalized titles are at least
/// `threshold` similar.
///
/// `articles` is expected in creation order. The kept article is the first
/// that is clustered, then one carrying a funnel pointer, then the one with
/// the longest content, then the earliest.
pub fn find_duplicate_groups(articles: &[Article], threshold: f64) -> Vec<DuplicateGroup> {
    let titles: Vec<String> = articles.iter().map(|a| normalize_title(&a.title)).collect();
    let mut processed = vec![false; articles.len()];
    let mut groups = Vec::new();

    for i in 0..articles.len() {
        if processed[i] {
            continue;
        }

        let members: Vec<usize> = std::iter::once(i)
            .chain((i + 1..articles.len()).filter(|&j| {
                !processed[j]
                    && articles[j].language == articles[i].language
                    && title_similarity(&titles[i], &titles[j]) >= threshold
            }))
            .collect();
        if members.len() < 2 {
            continue;
        }

        let Some(&keep) = members.iter().max_by_key(|&&idx| {
            let article = &articles[idx];
            (
                article.cluster_id.is_some(),
                article.outgoing_links().next().is_some(),
                article.content.chars().count(),
                Reverse(idx),
            )
        }) else {
            continue;
        };

        for &idx in &members {
            processed[idx] = true;
        }

        groups.push(DuplicateGroup {
            title: articles[i].title.clone(),
            article_ids: members.iter().map(|&idx| articles[idx].id.clone()).collect(),
            keep_id: articles[keep].id.clone(),
            delete_ids: members
                .iter()
                .filter(|&&idx| idx != keep)
                .map(|&idx| articles[idx].id.clone())
                .collect(),
        });
    }

    groups
}

/// Updates that move every funnel pointer and `parent_id` aimed at one of the
/// group's duplicates onto the kept article. A reference from the kept article
/// to its own duplicate is cleared instead of becoming a self-link.
pub fn plan_repoints(group: &DuplicateGroup, articles: &[Article]) -> Vec<(String, ArticleUpdate)> {
    let doomed: HashSet<&str> = group.delete_ids.iter().map(String::as_str).collect();

    articles
        .iter()
        .filter(|a| !doomed.contains(a.id.as_str()))
        .filter_map(|article| {
            let replacement = if article.id == group.keep_id {
                None
            } else {
                Some(group.keep_id.clone())
            };
            let redirect = |current: Option<&str>| {
                current
                    .filter(|id| doomed.contains(id))
                    .map(|_| replacement.clone())
            };

            let update = ArticleUpdate {
                points_to_mofu_id: redirect(article.points_to_mofu_id.as_deref()),
                points_to_bofu_id: redirect(article.points_to_bofu_id.as_deref()),
                parent_id: redirect(article.parent_id.as_deref()),
                ..Default::default()
            };
            (!update.is_empty()).then(|| (article.id.clone(), update))
        })
        .collect()
}

/// Repoints references to each group's duplicates, then deletes them.
///
/// Each group is one batch item keyed by its kept article. References held by
/// articles that are themselves being deleted are not rewritten.
pub async fn merge_duplicate_groups<S>(
    store: &S,
    groups: Vec<DuplicateGroup>,
    articles: &[Article],
    options: BatchOptions,
) -> BatchReport
where
    S: ArticleStore + ?Sized,
{
    let deleted: HashSet<&str> = groups
        .iter()
        .flat_map(|g| g.delete_ids.iter().map(String::as_str))
        .collect();
    let survivors: Vec<Article> = articles
        .iter()
        .filter(|a| !deleted.contains(a.id.as_str()))
        .cloned()
        .collect();

    let work: Vec<(DuplicateGroup, Vec<(String, ArticleUpdate)>)> = groups
        .into_iter()
        .map(|group| {
            let repoints = plan_repoints(&group, &survivors);
            (group, repoints)
        })
        .collect();

    run_batch(
        "merge-duplicates",
        work,
        options,
        |(group, _)| group.keep_id.clone(),
        |(group, repoints)| async move {
            for (article_id, update) in &repoints {
                store
                    .update_article(article_id, update)
                    .await
                    .with_context(|| format!("Failed to repoint {}", article_id))?;
            }
            for duplicate_id in &group.delete_ids {
                store
                    .delete_article(duplicate_id)
                    .await
                    .with_context(|| format!("Failed to delete duplicate {}", duplicate_id))?;
            }
            info!(
                target: TARGET_LINKING,
                "Merged {} duplicate(s) of \"{}\" into {} ({} reference(s) moved)",
                group.delete_ids.len(),
                group.title,
                group.keep_id,
                repoints.len()
            );
            Ok::<(), anyhow::Error>(())
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funnel::FunnelStage;
    use crate::testing::MemoryStore;

    fn article(id: &str, title: &str, stage: FunnelStage) -> Article {
        Article::new(id, title, id, "Legal", stage)
    }

    #[test]
    fn test_groups_ignore_case_and_punctuation() {
        let articles = vec![
            article("a", "How to buy property in Spain", FunnelStage::Tofu),
            article("b", "Spain property taxes", FunnelStage::Tofu),
            article("c", "How to Buy Property in Spain?", FunnelStage::Tofu),
        ];
        let groups = find_duplicate_groups(&articles, CLEANUP_THRESHOLD);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].article_ids, vec!["a", "c"]);
        // Nothing distinguishes them, so the earliest stays
        assert_eq!(groups[0].keep_id, "a");
        assert_eq!(groups[0].delete_ids, vec!["c"]);
    }

    #[test]
    fn test_keep_prefers_clustered_then_linked_then_longer() {
        let articles = vec![
            article("plain", "Notary fees", FunnelStage::Mofu).with_content("a much longer body"),
            article("linked", "Notary fees", FunnelStage::Mofu).pointing_to_bofu("b1"),
            article("clustered", "Notary fees", FunnelStage::Mofu).in_cluster("c1", 4),
        ];
        let groups = find_duplicate_groups(&articles, CLEANUP_THRESHOLD);
        assert_eq!(groups[0].keep_id, "clustered");

        let groups = find_duplicate_groups(&articles[..2], CLEANUP_THRESHOLD);
        assert_eq!(groups[0].keep_id, "linked");

        let shorter = article("short", "Notary fees", FunnelStage::Mofu).with_content("x");
        let groups = find_duplicate_groups(&[shorter, articles[0].clone()], CLEANUP_THRESHOLD);
        assert_eq!(groups[0].keep_id, "plain");
    }

    #[test]
    fn test_translations_are_not_duplicates() {
        let articles = vec![
            article("en", "Notary fees", FunnelStage::Mofu),
            article("es", "Notary fees", FunnelStage::Mofu).with_language("es"),
        ];
        assert!(find_duplicate_groups(&articles, CLEANUP_THRESHOLD).is_empty());
    }

    #[test]
    fn test_repoints_clear_self_reference() {
        let group = DuplicateGroup {
            title: "Notary fees".to_string(),
            article_ids: vec!["keep".to_string(), "dup".to_string()],
            keep_id: "keep".to_string(),
            delete_ids: vec!["dup".to_string()],
        };
        let articles = vec![
            article("keep", "Notary fees", FunnelStage::Mofu).translated_from("dup"),
            article("dup", "Notary fees", FunnelStage::Mofu),
            article("t1", "Intro", FunnelStage::Tofu).pointing_to_mofu("dup"),
            article("t2", "Other", FunnelStage::Tofu).pointing_to_mofu("m9"),
        ];

        let repoints = plan_repoints(&group, &articles);
        assert_eq!(repoints.len(), 2);
        assert_eq!(repoints[0].0, "keep");
        assert_eq!(repoints[0].1.parent_id, Some(None));
        assert_eq!(repoints[1].0, "t1");
        assert_eq!(repoints[1].1.points_to_mofu_id, Some(Some("keep".to_string())));
        assert_eq!(repoints[1].1.points_to_bofu_id, None);
    }

    #[tokio::test]
    async fn test_merge_keeps_pointers_on_the_survivor() {
        let articles = vec![
            article("m-keep", "Notary fees explained", FunnelStage::Mofu).in_cluster("c1", 4),
            article("m-dup", "Notary Fees Explained!", FunnelStage::Mofu),
            article("t1", "Buying a home", FunnelStage::Tofu).pointing_to_mofu("m-dup"),
            article("es", "Honorarios notariales", FunnelStage::Mofu)
                .with_language("es")
                .translated_from("m-dup"),
            article("b-dup", "Book a consultation", FunnelStage::Bofu),
            article("b-keep", "Book a consultation", FunnelStage::Bofu)
                .with_content("Talk to a lawyer today"),
            article("m2", "Closing costs", FunnelStage::Mofu).pointing_to_bofu("b-dup"),
        ];
        let store = MemoryStore::new(articles.clone());

        let groups = find_duplicate_groups(&articles, CLEANUP_THRESHOLD);
        assert_eq!(groups.len(), 2);
        let report = merge_duplicate_groups(&store, groups, &articles, BatchOptions::default()).await;
        assert!(report.is_clean(), "{:?}", report.failed);
        assert_eq!(report.succeeded, vec!["m-keep", "b-keep"]);

        assert!(store.article("m-dup").is_none());
        assert!(store.article("b-dup").is_none());
        assert_eq!(store.article("t1").unwrap().points_to_mofu_id.as_deref(), Some("m-keep"));
        assert_eq!(store.article("es").unwrap().parent_id.as_deref(), Some("m-keep"));
        assert_eq!(store.article("m2").unwrap().points_to_bofu_id.as_deref(), Some("b-keep"));
    }

    #[tokio::test]
    async fn test_merge_failure_keeps_the_duplicate() {
        let articles = vec![
            article("keep", "Notary fees", FunnelStage::Mofu).in_cluster("c1", 4),
            article("dup", "Notary fees", FunnelStage::Mofu),
            article("t1", "Intro", FunnelStage::Tofu).pointing_to_mofu("dup"),
        ];
        let store = MemoryStore::new(articles.clone()).failing_on("t1");

        let groups = find_duplicate_groups(&articles, CLEANUP_THRESHOLD);
        let report = merge_duplicate_groups(&store, groups, &articles, BatchOptions::default()).await;
        assert_eq!(report.errors(), 1);
        assert!(report.failed[0].error.contains("Failed to repoint t1"));
        // The reference was not moved, so the duplicate must still exist
        assert!(store.article("dup").is_some());
        assert_eq!(store.article("t1").unwrap().points_to_mofu_id.as_deref(), Some("dup"));
    }
}
