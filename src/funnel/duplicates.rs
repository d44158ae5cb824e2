use serde::Serialize;
use std::collections::HashSet;

use crate::funnel::{Article, FunnelStage};

/// Titles at or below this word-set similarity are not reported
pub const DUPLICATE_THRESHOLD: f64 = 0.7;
const MERGE_THRESHOLD: f64 = 0.8;
const UPDATE_THRESHOLD: f64 = 0.9;

const BUTTON_TITLE_LIMIT: usize = 50;
const BUTTON_TITLE_KEEP: usize = 47;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateAction {
    /// Near-identical article on the same topic and stage; update it in place
    Update,
    Merge,
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCandidate {
    pub article_id: String,
    pub title: String,
    pub topic: String,
    pub funnel_stage: FunnelStage,
    pub similarity: f64,
    pub action: DuplicateAction,
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Jaccard similarity of the lowercased whitespace-separated words.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = word_set(a);
    let b = word_set(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Existing articles of the same stage whose titles look like `title`, most
/// similar first.
pub fn find_duplicate_candidates(
    title: &str,
    topic: &str,
    stage: FunnelStage,
    existing: &[Article],
) -> Vec<DuplicateCandidate> {
    let mut candidates: Vec<DuplicateCandidate> = existing
        .iter()
        .filter(|article| article.funnel_stage == stage)
        .filter_map(|article| {
            let similarity = title_similarity(title, &article.title);
            if similarity <= DUPLICATE_THRESHOLD {
                return None;
            }

            let action = if similarity > UPDATE_THRESHOLD && article.topic == topic {
                DuplicateAction::Update
            } else if similarity > MERGE_THRESHOLD {
                DuplicateAction::Merge
            } else {
                DuplicateAction::Skip
            };

            Some(DuplicateCandidate {
                article_id: article.id.clone(),
                title: article.title.clone(),
                topic: article.topic.clone(),
                funnel_stage: article.funnel_stage,
                similarity,
                action,
            })
        })
        .collect();

    candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    candidates
}

/// Label for a funnel call-to-action button: "<topic>: <title>", with long
/// titles cut to 47 characters plus an ellipsis.
pub fn button_preview(title: &str, topic: &str) -> String {
    if title.chars().count() > BUTTON_TITLE_LIMIT {
        let short: String = title.chars().take(BUTTON_TITLE_KEEP).collect();
        format!("{}: {}...", topic, short)
    } else {
        format!("{}: {}", topic, title)
    }
}
