use anyhow::Result;
use async_trait::async_trait;

use crate::funnel::{
    Article, ArticleFilter, ArticleUpdate, Cluster, FunnelError, NewArticle, NewCluster,
    BOFU_POSITION, CLUSTER_SIZE,
};

/// Record store holding articles and clusters.
///
/// Deleting a cluster orphans its articles and deleting an article clears every
/// pointer that referenced it; nothing cascades.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn fetch_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>>;

    async fn get_article(&self, article_id: &str) -> Result<Option<Article>>;

    async fn count_articles(&self, language: &str) -> Result<usize>;

    /// Fails with [`FunnelError::ArticleNotFound`] when no row matches.
    async fn update_article(&self, article_id: &str, update: &ArticleUpdate) -> Result<()>;

    async fn insert_article(&self, article: &NewArticle) -> Result<Article>;

    async fn delete_article(&self, article_id: &str) -> Result<()>;

    async fn create_cluster(&self, cluster: &NewCluster) -> Result<String>;

    /// Articles come back ordered by cluster position.
    async fn get_cluster_with_articles(&self, cluster_id: &str) -> Result<Option<Cluster>>;

    /// Active clusters of a language, by sort order.
    async fn list_clusters_with_articles(&self, language: &str) -> Result<Vec<Cluster>>;

    /// Returns the number of articles orphaned.
    async fn delete_cluster(&self, cluster_id: &str) -> Result<u64>;
}

/// Places an article at a cluster position. Position 6 is the BOFU slot and
/// enables appointment booking; every other position disables it.
pub async fn add_article_to_cluster<S>(
    store: &S,
    article_id: &str,
    cluster_id: &str,
    position: i64,
) -> Result<()>
where
    S: ArticleStore + ?Sized,
{
    if !(1..=CLUSTER_SIZE as i64).contains(&position) {
        return Err(FunnelError::InvalidPosition(position).into());
    }

    let update = ArticleUpdate {
        cluster_id: Some(Some(cluster_id.to_string())),
        cluster_position: Some(Some(position)),
        appointment_booking_enabled: Some(position == BOFU_POSITION),
        ..Default::default()
    };
    store.update_article(article_id, &update).await
}
