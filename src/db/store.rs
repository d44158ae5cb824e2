use anyhow::{Context, Result};
use async_trait::async_trait;

use super::core::Database;
use crate::funnel::{
    Article, ArticleFilter, ArticleUpdate, Cluster, FunnelError, NewArticle, NewCluster,
};
use crate::store::ArticleStore;

#[async_trait]
impl ArticleStore for Database {
    async fn fetch_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>> {
        self.list_articles(filter)
            .await
            .context("Failed to fetch articles")
    }

    async fn get_article(&self, article_id: &str) -> Result<Option<Article>> {
        Ok(self.find_article(article_id).await?)
    }

    async fn count_articles(&self, language: &str) -> Result<usize> {
        Ok(self.count_language_articles(language).await?)
    }

    async fn update_article(&self, article_id: &str, update: &ArticleUpdate) -> Result<()> {
        let touched = self
            .apply_article_update(article_id, update)
            .await
            .with_context(|| format!("Failed to update article {}", article_id))?;
        if touched == 0 {
            return Err(FunnelError::ArticleNotFound(article_id.to_string()).into());
        }
        Ok(())
    }

    async fn insert_article(&self, article: &NewArticle) -> Result<Article> {
        self.create_article(article)
            .await
            .with_context(|| format!("Failed to insert article {}", article.slug))
    }

    async fn delete_article(&self, article_id: &str) -> Result<()> {
        if !self.remove_article(article_id).await? {
            return Err(FunnelError::ArticleNotFound(article_id.to_string()).into());
        }
        Ok(())
    }

    async fn create_cluster(&self, cluster: &NewCluster) -> Result<String> {
        self.insert_cluster(cluster)
            .await
            .with_context(|| format!("Failed to create cluster {}", cluster.title))
    }

    async fn get_cluster_with_articles(&self, cluster_id: &str) -> Result<Option<Cluster>> {
        Ok(self.find_cluster(cluster_id).await?)
    }

    async fn list_clusters_with_articles(&self, language: &str) -> Result<Vec<Cluster>> {
        Ok(self.clusters_for_language(language).await?)
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<u64> {
        Ok(self.remove_cluster(cluster_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchOptions;
    use crate::funnel::cleanup::CLEANUP_THRESHOLD;
    use crate::funnel::{
        check_completeness, find_duplicate_groups, link_cluster, merge_duplicate_groups,
        validate_journey, validate_structure, FunnelStage, PointerField,
    };
    use crate::linking::suggestions::link_articles;
    use crate::store::add_article_to_cluster;

    fn new_article(slug: &str, topic: &str, stage: FunnelStage) -> NewArticle {
        NewArticle {
            title: slug.replace('-', " "),
            slug: slug.to_string(),
            content: String::new(),
            topic: topic.to_string(),
            funnel_stage: stage,
            language: "en".to_string(),
            parent_id: None,
        }
    }

    /// Inserts a linked 3-2-1 cluster and returns (cluster id, article ids by position).
    async fn seed_cluster(db: &Database) -> (String, Vec<String>) {
        let cluster_id = db
            .create_cluster(&NewCluster {
                title: "Legal - Cluster 1".to_string(),
                topic: "Legal".to_string(),
                language: "en".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let layout = [
            ("tofu-1", FunnelStage::Tofu),
            ("tofu-2", FunnelStage::Tofu),
            ("tofu-3", FunnelStage::Tofu),
            ("mofu-1", FunnelStage::Mofu),
            ("mofu-2", FunnelStage::Mofu),
            ("bofu-1", FunnelStage::Bofu),
        ];
        let mut ids = Vec::new();
        for (position, (slug, stage)) in layout.into_iter().enumerate() {
            let article = db.insert_article(&new_article(slug, "Legal", stage)).await.unwrap();
            add_article_to_cluster(db, &article.id, &cluster_id, position as i64 + 1)
                .await
                .unwrap();
            ids.push(article.id);
        }

        for tofu in &ids[0..3] {
            link_articles(db, tofu, &ids[3], PointerField::PointsToMofu).await.unwrap();
        }
        for mofu in &ids[3..5] {
            link_articles(db, mofu, &ids[5], PointerField::PointsToBofu).await.unwrap();
        }

        (cluster_id, ids)
    }

    #[tokio::test]
    async fn test_seeded_cluster_is_complete_and_valid() {
        let db = Database::in_memory().await.unwrap();
        let (cluster_id, ids) = seed_cluster(&db).await;

        let cluster = db.get_cluster_with_articles(&cluster_id).await.unwrap().unwrap();
        let positions: Vec<Option<i64>> =
            cluster.articles.iter().map(|a| a.cluster_position).collect();
        assert_eq!(positions, (1..=6).map(Some).collect::<Vec<_>>());
        assert!(validate_structure(&cluster.articles).is_valid);
        assert!(check_completeness(&cluster.articles).is_valid);
        assert!(cluster.articles[5].appointment_booking_enabled);
        assert_eq!(cluster.articles[0].points_to_mofu_id.as_deref(), Some(ids[3].as_str()));
    }

    #[tokio::test]
    async fn test_fetch_articles_applies_filter() {
        let db = Database::in_memory().await.unwrap();
        seed_cluster(&db).await;
        db.insert_article(&new_article("loose-finance", "Finance", FunnelStage::Tofu))
            .await
            .unwrap();

        let unclustered = db
            .fetch_articles(&ArticleFilter {
                unclustered_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(unclustered.len(), 1);
        assert_eq!(unclustered[0].slug, "loose-finance");

        let tofu = db
            .fetch_articles(&ArticleFilter {
                funnel_stage: Some(FunnelStage::Tofu),
                topic: Some("Legal".to_string()),
                ..ArticleFilter::language("en")
            })
            .await
            .unwrap();
        let slugs: Vec<&str> = tofu.iter().map(|a| a.slug.as_str()).collect();
        assert_eq!(slugs, vec!["tofu-1", "tofu-2", "tofu-3"]);
        assert_eq!(db.count_articles("en").await.unwrap(), 7);
        assert_eq!(db.count_articles("es").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_missing_article_is_not_found() {
        let db = Database::in_memory().await.unwrap();
        let err = db
            .update_article("nope", &ArticleUpdate::pointer(PointerField::PointsToMofu, "m1"))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<FunnelError>(),
            Some(&FunnelError::ArticleNotFound("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_slug_is_unique_per_language() {
        let db = Database::in_memory().await.unwrap();
        db.insert_article(&new_article("notary-fees", "Legal", FunnelStage::Tofu))
            .await
            .unwrap();
        assert!(db
            .insert_article(&new_article("notary-fees", "Legal", FunnelStage::Mofu))
            .await
            .is_err());

        let mut spanish = new_article("notary-fees", "Legal", FunnelStage::Tofu);
        spanish.language = "es".to_string();
        assert!(db.insert_article(&spanish).await.is_ok());
    }

    #[tokio::test]
    async fn test_deleting_article_clears_pointers_to_it() {
        let db = Database::in_memory().await.unwrap();
        let (_, ids) = seed_cluster(&db).await;

        db.delete_article(&ids[3]).await.unwrap();

        assert!(db.get_article(&ids[3]).await.unwrap().is_none());
        for tofu in &ids[0..3] {
            let article = db.get_article(tofu).await.unwrap().unwrap();
            assert_eq!(article.points_to_mofu_id, None);
        }
        let mofu = db.get_article(&ids[4]).await.unwrap().unwrap();
        assert_eq!(mofu.points_to_bofu_id.as_deref(), Some(ids[5].as_str()));
    }

    #[tokio::test]
    async fn test_translation_parent_is_cleared_on_delete() {
        let db = Database::in_memory().await.unwrap();
        let original = db
            .insert_article(&new_article("notary-fees", "Legal", FunnelStage::Tofu))
            .await
            .unwrap();
        let mut translated = NewArticle::from(&original);
        translated.language = "es".to_string();
        translated.parent_id = Some(original.id.clone());
        let translated = db.insert_article(&translated).await.unwrap();

        db.delete_article(&original.id).await.unwrap();
        let stored = db.get_article(&translated.id).await.unwrap().unwrap();
        assert_eq!(stored.parent_id, None);
    }

    #[tokio::test]
    async fn test_link_cluster_converges_divergent_tofu() {
        let db = Database::in_memory().await.unwrap();
        let (cluster_id, ids) = seed_cluster(&db).await;
        link_articles(&db, &ids[1], &ids[4], PointerField::PointsToMofu).await.unwrap();

        let cluster = db.get_cluster_with_articles(&cluster_id).await.unwrap().unwrap();
        assert!(validate_structure(&cluster.articles).is_valid);
        assert!(!validate_journey(&cluster.articles).is_valid);

        let report = link_cluster(&db, &cluster_id, BatchOptions::default()).await.unwrap();
        assert_eq!(report.succeeded, vec![ids[1].clone()]);

        let cluster = db.get_cluster_with_articles(&cluster_id).await.unwrap().unwrap();
        assert!(validate_journey(&cluster.articles).is_valid);
    }

    #[tokio::test]
    async fn test_merging_duplicates_moves_references() {
        let db = Database::in_memory().await.unwrap();
        let (_, ids) = seed_cluster(&db).await;

        let mut copy = new_article("mofu-1-copy", "Legal", FunnelStage::Mofu);
        copy.title = "Mofu 1!".to_string();
        let copy = db.insert_article(&copy).await.unwrap();
        let reader = db
            .insert_article(&new_article("reader", "Legal", FunnelStage::Tofu))
            .await
            .unwrap();
        link_articles(&db, &reader.id, &copy.id, PointerField::PointsToMofu).await.unwrap();
        let mut translated = new_article("mofu-1-es", "Legal", FunnelStage::Mofu);
        translated.language = "es".to_string();
        translated.parent_id = Some(copy.id.clone());
        let translated = db.insert_article(&translated).await.unwrap();

        let articles = db.fetch_articles(&ArticleFilter::default()).await.unwrap();
        let groups = find_duplicate_groups(&articles, CLEANUP_THRESHOLD);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keep_id, ids[3]);
        assert_eq!(groups[0].delete_ids, vec![copy.id.clone()]);

        let report = merge_duplicate_groups(&db, groups, &articles, BatchOptions::default()).await;
        assert!(report.is_clean(), "{:?}", report.failed);

        assert!(db.get_article(&copy.id).await.unwrap().is_none());
        let reader = db.get_article(&reader.id).await.unwrap().unwrap();
        assert_eq!(reader.points_to_mofu_id.as_deref(), Some(ids[3].as_str()));
        let translated = db.get_article(&translated.id).await.unwrap().unwrap();
        assert_eq!(translated.parent_id.as_deref(), Some(ids[3].as_str()));
    }

    #[tokio::test]
    async fn test_deleting_cluster_orphans_articles() {
        let db = Database::in_memory().await.unwrap();
        let (cluster_id, ids) = seed_cluster(&db).await;

        assert_eq!(db.delete_cluster(&cluster_id).await.unwrap(), 6);
        assert!(db.get_cluster_with_articles(&cluster_id).await.unwrap().is_none());

        let article = db.get_article(&ids[0]).await.unwrap().unwrap();
        assert_eq!(article.cluster_id, None);
        assert_eq!(article.cluster_position, None);
        assert_eq!(db.count_articles("en").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_clusters_listed_in_sort_order_with_members() {
        let db = Database::in_memory().await.unwrap();
        let (first, _) = seed_cluster(&db).await;
        let second = db
            .create_cluster(&NewCluster {
                title: "Finance - Cluster 1".to_string(),
                topic: "Finance".to_string(),
                language: "en".to_string(),
                description: Some("empty".to_string()),
            })
            .await
            .unwrap();

        let clusters = db.list_clusters_with_articles("en").await.unwrap();
        let summary: Vec<(&str, i64, usize)> = clusters
            .iter()
            .map(|c| (c.id.as_str(), c.sort_order, c.articles.len()))
            .collect();
        assert_eq!(summary, vec![(first.as_str(), 0, 6), (second.as_str(), 1, 0)]);
        assert!(db.list_clusters_with_articles("es").await.unwrap().is_empty());
        assert_eq!(db.collect_stats().await.unwrap(), "2:6:0");
    }
}
