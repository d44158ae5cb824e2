use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::funnel::{Article, FunnelStage};
use crate::linking::markdown::{escape_attribute, render_markdown};
use crate::TARGET_LINKING;

/// Candidates scoring at or below this are never linked
pub const MIN_CONTEXT_SCORE: f64 = 0.3;

/// Maximum contextual links injected into one body
pub const MAX_CONTEXTUAL_LINKS: usize = 6;

const TOPIC_WEIGHT: f64 = 0.4;
const RELATED_TOPIC_WEIGHT: f64 = 0.2;
const KEYWORD_WEIGHT: f64 = 0.35;
const TITLE_WEIGHT: f64 = 0.25;

/// Anchor phrases per topic, in preference order.
static TOPIC_KEYWORDS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        (
            "Legal",
            &[
                "legal requirements",
                "property law",
                "legal process",
                "documentation",
                "contracts",
                "notary",
                "legal fees",
                "due diligence",
            ][..],
        ),
        (
            "Finance",
            &[
                "mortgage",
                "financing",
                "banking",
                "costs",
                "taxes",
                "budget",
                "currency",
                "payments",
                "financial planning",
            ][..],
        ),
        (
            "Investment",
            &[
                "investment opportunities",
                "ROI",
                "rental yield",
                "property investment",
                "market trends",
                "appreciation",
            ][..],
        ),
        (
            "Location",
            &[
                "areas",
                "neighborhoods",
                "locations",
                "regions",
                "districts",
                "zones",
                "communities",
            ][..],
        ),
        (
            "Lifestyle",
            &[
                "lifestyle",
                "amenities",
                "community",
                "culture",
                "activities",
                "quality of life",
            ][..],
        ),
        (
            "Property Types",
            &[
                "villas",
                "apartments",
                "penthouses",
                "townhouses",
                "new builds",
                "resale properties",
            ][..],
        ),
    ])
});

static RELATED_TOPICS: &[(&str, &str)] = &[
    ("Legal", "Finance"),
    ("Legal", "Investment"),
    ("Finance", "Investment"),
    ("Investment", "Location"),
    ("Location", "Lifestyle"),
    ("Lifestyle", "Property Types"),
];

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").unwrap());
static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static ANCHOR_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^<a[\s>]").unwrap());
static ANCHOR_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^</a\s*>").unwrap());

/// An article that may be linked from another article's body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedArticle {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub topic: String,
    pub funnel_stage: FunnelStage,
    pub excerpt: String,
}

impl From<&Article> for RelatedArticle {
    fn from(article: &Article) -> Self {
        RelatedArticle {
            id: article.id.clone(),
            slug: article.slug.clone(),
            title: article.title.clone(),
            topic: article.topic.clone(),
            funnel_stage: article.funnel_stage,
            excerpt: article.content.chars().take(160).collect(),
        }
    }
}

pub fn topic_keywords(topic: &str) -> &'static [&'static str] {
    TOPIC_KEYWORDS.get(topic).copied().unwrap_or(&[])
}

/// Symmetric topic adjacency; a topic is not related to itself.
pub fn is_related_topic(a: &str, b: &str) -> bool {
    RELATED_TOPICS
        .iter()
        .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
}

/// Stages a body of `stage` may link to: its own and the adjacent step
/// (decision content links back to research).
pub fn allowed_stages(stage: FunnelStage) -> [FunnelStage; 2] {
    match stage {
        FunnelStage::Tofu => [FunnelStage::Tofu, FunnelStage::Mofu],
        FunnelStage::Mofu => [FunnelStage::Mofu, FunnelStage::Bofu],
        FunnelStage::Bofu => [FunnelStage::Bofu, FunnelStage::Mofu],
    }
}

/// Relevance of `candidate` to a body about `current_topic`, capped at 1.0.
pub fn context_score(candidate: &RelatedArticle, current_topic: &str, body: &str) -> f64 {
    let body_lower = body.to_lowercase();
    let mut score = 0.0;

    if candidate.topic == current_topic {
        score += TOPIC_WEIGHT;
    } else if is_related_topic(&candidate.topic, current_topic) {
        score += RELATED_TOPIC_WEIGHT;
    }

    let keywords = topic_keywords(&candidate.topic);
    let keyword_hits = keywords
        .iter()
        .filter(|k| body_lower.contains(&k.to_lowercase()))
        .count();
    score += KEYWORD_WEIGHT * keyword_hits as f64 / keywords.len().max(1) as f64;

    let title_lower = candidate.title.to_lowercase();
    let title_words: Vec<&str> = NON_WORD
        .split(&title_lower)
        .filter(|w| w.chars().count() > 3)
        .collect();
    let title_hits = title_words
        .iter()
        .filter(|w| body_lower.contains(**w))
        .count();
    score += TITLE_WEIGHT * title_hits as f64 / title_words.len().max(1) as f64;

    score.min(1.0)
}

/// Candidates eligible for linking from a body, best first.
pub fn rank_contextual_links<'a>(
    body: &str,
    candidates: &'a [RelatedArticle],
    current_topic: &str,
    current_stage: FunnelStage,
) -> Vec<(&'a RelatedArticle, f64)> {
    let allowed = allowed_stages(current_stage);
    let mut ranked: Vec<(&RelatedArticle, f64)> = candidates
        .iter()
        .filter(|c| allowed.contains(&c.funnel_stage))
        .map(|c| (c, context_score(c, current_topic, body)))
        .filter(|(_, score)| *score > MIN_CONTEXT_SCORE)
        .collect();

    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(MAX_CONTEXTUAL_LINKS);
    ranked
}

/// Renders `body` to HTML and links the first whole-word occurrence of a
/// topic keyword for each of the top-ranked candidates.
pub fn inject_contextual_links(
    body: &str,
    candidates: &[RelatedArticle],
    current_topic: &str,
    current_stage: FunnelStage,
) -> String {
    let mut html = render_markdown(body);
    if candidates.is_empty() {
        return html;
    }

    let ranked = rank_contextual_links(body, candidates, current_topic, current_stage);
    let mut injected = 0;

    for (candidate, score) in ranked {
        let linked = topic_keywords(&candidate.topic).iter().find_map(|keyword| {
            let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword))).ok()?;
            link_first_match(&html, &pattern, &candidate.slug)
        });

        match linked {
            Some(updated) => {
                html = updated;
                injected += 1;
            }
            None => debug!(
                target: TARGET_LINKING,
                "No anchor phrase for {} (score {:.2})", candidate.slug, score
            ),
        }
    }

    debug!(target: TARGET_LINKING, "Injected {} contextual link(s)", injected);
    html
}

/// Wraps the first match of `pattern` in text content (outside tags and
/// outside existing anchors) in a link to `/qa/{slug}`.
fn link_first_match(html: &str, pattern: &Regex, slug: &str) -> Option<String> {
    let mut in_anchor = false;
    let mut cursor = 0;

    let tags = HTML_TAG
        .find_iter(html)
        .map(|m| (m.start(), m.end()))
        .chain(std::iter::once((html.len(), html.len())));

    for (tag_start, tag_end) in tags {
        if !in_anchor {
            if let Some(m) = pattern.find(&html[cursor..tag_start]) {
                let start = cursor + m.start();
                let end = cursor + m.end();
                return Some(format!(
                    "{}<a href=\"/qa/{}\" class=\"contextual-link\">{}</a>{}",
                    &html[..start],
                    escape_attribute(slug),
                    &html[start..end],
                    &html[end..]
                ));
            }
        }

        let tag = &html[tag_start..tag_end];
        if ANCHOR_OPEN.is_match(tag) {
            in_anchor = true;
        } else if ANCHOR_CLOSE.is_match(tag) {
            in_anchor = false;
        }
        cursor = tag_end;
    }

    None
}
