use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Domain errors raised when building or resolving funnel records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FunnelError {
    #[error("invalid funnel stage: {0:?}")]
    InvalidStage(String),

    #[error("invalid bottleneck severity: {0:?}")]
    InvalidSeverity(String),

    #[error("cluster position {0} is outside 1-6")]
    InvalidPosition(i64),

    #[error("article not found: {0}")]
    ArticleNotFound(String),

    #[error("cluster not found: {0}")]
    ClusterNotFound(String),
}

/// Funnel stage enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FunnelStage {
    Tofu,
    Mofu,
    Bofu,
}

impl FunnelStage {
    pub const ALL: [FunnelStage; 3] = [FunnelStage::Tofu, FunnelStage::Mofu, FunnelStage::Bofu];

    /// The stage a funnel pointer from this stage leads to. BOFU is terminal.
    pub fn next(self) -> Option<FunnelStage> {
        match self {
            FunnelStage::Tofu => Some(FunnelStage::Mofu),
            FunnelStage::Mofu => Some(FunnelStage::Bofu),
            FunnelStage::Bofu => None,
        }
    }

    /// Number of articles of this stage in a complete 3-2-1 cluster.
    pub fn required_in_cluster(self) -> usize {
        match self {
            FunnelStage::Tofu => 3,
            FunnelStage::Mofu => 2,
            FunnelStage::Bofu => 1,
        }
    }

    /// Canonical cluster positions for this stage.
    pub fn cluster_positions(self) -> &'static [i64] {
        match self {
            FunnelStage::Tofu => &[1, 2, 3],
            FunnelStage::Mofu => &[4, 5],
            FunnelStage::Bofu => &[6],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FunnelStage::Tofu => "TOFU",
            FunnelStage::Mofu => "MOFU",
            FunnelStage::Bofu => "BOFU",
        }
    }
}

impl fmt::Display for FunnelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunnelStage {
    type Err = FunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TOFU" => Ok(FunnelStage::Tofu),
            "MOFU" => Ok(FunnelStage::Mofu),
            "BOFU" => Ok(FunnelStage::Bofu),
            _ => Err(FunnelError::InvalidStage(s.to_string())),
        }
    }
}

/// Which of an article's two funnel pointers a link occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerField {
    PointsToMofu,
    PointsToBofu,
}

impl PointerField {
    /// The pointer a source of `stage` is allowed to set.
    pub fn for_source(stage: FunnelStage) -> Option<PointerField> {
        match stage {
            FunnelStage::Tofu => Some(PointerField::PointsToMofu),
            FunnelStage::Mofu => Some(PointerField::PointsToBofu),
            FunnelStage::Bofu => None,
        }
    }

    /// The pointer that leads into an article of `stage`.
    pub fn for_target(stage: FunnelStage) -> Option<PointerField> {
        match stage {
            FunnelStage::Mofu => Some(PointerField::PointsToMofu),
            FunnelStage::Bofu => Some(PointerField::PointsToBofu),
            FunnelStage::Tofu => None,
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            PointerField::PointsToMofu => "points_to_mofu_id",
            PointerField::PointsToBofu => "points_to_bofu_id",
        }
    }
}

/// A single piece of funnel content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub content: String,
    pub topic: String,
    pub funnel_stage: FunnelStage,
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub cluster_position: Option<i64>,
    #[serde(default)]
    pub points_to_mofu_id: Option<String>,
    #[serde(default)]
    pub points_to_bofu_id: Option<String>,
    #[serde(default)]
    pub appointment_booking_enabled: bool,
    pub language: String,
    // Original article this one was translated from
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl Article {
    pub fn new(id: &str, title: &str, slug: &str, topic: &str, funnel_stage: FunnelStage) -> Self {
        Article {
            id: id.to_string(),
            title: title.to_string(),
            slug: slug.to_string(),
            content: String::new(),
            topic: topic.to_string(),
            funnel_stage,
            cluster_id: None,
            cluster_position: None,
            points_to_mofu_id: None,
            points_to_bofu_id: None,
            appointment_booking_enabled: false,
            language: "en".to_string(),
            parent_id: None,
        }
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn in_cluster(mut self, cluster_id: &str, position: i64) -> Self {
        self.cluster_id = Some(cluster_id.to_string());
        self.cluster_position = Some(position);
        self
    }

    pub fn pointing_to_mofu(mut self, mofu_id: &str) -> Self {
        self.points_to_mofu_id = Some(mofu_id.to_string());
        self
    }

    pub fn pointing_to_bofu(mut self, bofu_id: &str) -> Self {
        self.points_to_bofu_id = Some(bofu_id.to_string());
        self
    }

    pub fn with_booking(mut self, enabled: bool) -> Self {
        self.appointment_booking_enabled = enabled;
        self
    }

    pub fn translated_from(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self
    }

    pub fn pointer(&self, field: PointerField) -> Option<&str> {
        match field {
            PointerField::PointsToMofu => self.points_to_mofu_id.as_deref(),
            PointerField::PointsToBofu => self.points_to_bofu_id.as_deref(),
        }
    }

    /// The funnel pointer this article's stage is expected to carry, if it is set.
    pub fn funnel_target(&self) -> Option<&str> {
        PointerField::for_source(self.funnel_stage).and_then(|field| self.pointer(field))
    }

    /// Both pointers, whichever are set, regardless of stage.
    pub fn outgoing_links(&self) -> impl Iterator<Item = &str> {
        self.points_to_mofu_id
            .as_deref()
            .into_iter()
            .chain(self.points_to_bofu_id.as_deref())
    }
}

/// Fields required to insert a new article; the store assigns the id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,
    pub slug: String,
    pub content: String,
    pub topic: String,
    pub funnel_stage: FunnelStage,
    pub language: String,
    pub parent_id: Option<String>,
}

impl From<&Article> for NewArticle {
    fn from(article: &Article) -> Self {
        NewArticle {
            title: article.title.clone(),
            slug: article.slug.clone(),
            content: article.content.clone(),
            topic: article.topic.clone(),
            funnel_stage: article.funnel_stage,
            language: article.language.clone(),
            parent_id: article.parent_id.clone(),
        }
    }
}

/// Partial article update. `None` leaves a field untouched; for the nullable
/// fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub topic: Option<String>,
    pub cluster_id: Option<Option<String>>,
    pub cluster_position: Option<Option<i64>>,
    pub points_to_mofu_id: Option<Option<String>>,
    pub points_to_bofu_id: Option<Option<String>>,
    pub appointment_booking_enabled: Option<bool>,
    pub parent_id: Option<Option<String>>,
}

impl ArticleUpdate {
    /// An update that sets exactly one funnel pointer.
    pub fn pointer(field: PointerField, target_id: &str) -> Self {
        let target = Some(Some(target_id.to_string()));
        match field {
            PointerField::PointsToMofu => ArticleUpdate {
                points_to_mofu_id: target,
                ..Default::default()
            },
            PointerField::PointsToBofu => ArticleUpdate {
                points_to_bofu_id: target,
                ..Default::default()
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ArticleUpdate::default()
    }
}

/// Filter for bulk article fetches; unset fields do not constrain
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub language: Option<String>,
    pub funnel_stage: Option<FunnelStage>,
    pub topic: Option<String>,
    pub cluster_id: Option<String>,
    pub unclustered_only: bool,
}

impl ArticleFilter {
    pub fn language(language: &str) -> Self {
        ArticleFilter {
            language: Some(language.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, article: &Article) -> bool {
        self.language.as_deref().map_or(true, |l| article.language == l)
            && self.funnel_stage.map_or(true, |s| article.funnel_stage == s)
            && self.topic.as_deref().map_or(true, |t| article.topic == t)
            && self
                .cluster_id
                .as_deref()
                .map_or(true, |c| article.cluster_id.as_deref() == Some(c))
            && (!self.unclustered_only || article.cluster_id.is_none())
    }
}

/// A named 3-2-1 grouping of articles forming one funnel journey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub topic: String,
    pub language: String,
    pub sort_order: i64,
    pub is_active: bool,
    #[serde(default)]
    pub articles: Vec<Article>,
}

/// Fields required to create a cluster
#[derive(Debug, Clone)]
pub struct NewCluster {
    pub title: String,
    pub topic: String,
    pub language: String,
    pub description: Option<String>,
}
