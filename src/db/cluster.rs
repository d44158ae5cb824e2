use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::article::{article_from_row, ARTICLE_COLUMNS};
use super::core::Database;
use crate::funnel::{Article, Cluster, NewCluster};
use crate::TARGET_DB;

const CLUSTER_COLUMNS: &str = "id, title, description, topic, language, sort_order, is_active";

fn cluster_from_row(row: &SqliteRow) -> Result<Cluster, sqlx::Error> {
    Ok(Cluster {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        topic: row.try_get("topic")?,
        language: row.try_get("language")?,
        sort_order: row.try_get("sort_order")?,
        is_active: row.try_get("is_active")?,
        articles: Vec::new(),
    })
}

impl Database {
    /// Creates an active cluster at the end of its language's sort order.
    #[instrument(target = "db", level = "info", skip(self, new), fields(title = %new.title))]
    pub async fn insert_cluster(&self, new: &NewCluster) -> Result<String, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO qa_clusters (id, title, description, topic, language, sort_order, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5,
                    (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM qa_clusters WHERE language = ?5),
                    1, ?6, ?6)
            "#,
        )
        .bind(&id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.topic)
        .bind(&new.language)
        .bind(&now)
        .execute(self.pool())
        .await?;

        info!(target: TARGET_DB, "Created cluster {} ({})", new.title, id);
        Ok(id)
    }

    /// A cluster with its articles ordered by position.
    pub async fn find_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM qa_clusters WHERE id = ?",
            CLUSTER_COLUMNS
        ))
        .bind(cluster_id)
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut cluster = cluster_from_row(&row)?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM qa_articles WHERE cluster_id = ? ORDER BY cluster_position, rowid",
            ARTICLE_COLUMNS
        ))
        .bind(cluster_id)
        .fetch_all(self.pool())
        .await?;

        cluster.articles = rows
            .iter()
            .map(article_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(cluster))
    }

    /// Active clusters of a language with their articles, by sort order.
    #[instrument(target = "db", level = "debug", skip(self))]
    pub async fn clusters_for_language(&self, language: &str) -> Result<Vec<Cluster>, sqlx::Error> {
        let cluster_rows = sqlx::query(&format!(
            "SELECT {} FROM qa_clusters WHERE language = ? AND is_active = 1 ORDER BY sort_order, rowid",
            CLUSTER_COLUMNS
        ))
        .bind(language)
        .fetch_all(self.pool())
        .await?;

        let article_rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM qa_articles
            WHERE cluster_id IN (SELECT id FROM qa_clusters WHERE language = ? AND is_active = 1)
            ORDER BY cluster_position, rowid
            "#,
            ARTICLE_COLUMNS
        ))
        .bind(language)
        .fetch_all(self.pool())
        .await?;

        let mut members: HashMap<String, Vec<Article>> = HashMap::new();
        for row in &article_rows {
            let article = article_from_row(row)?;
            if let Some(cluster_id) = article.cluster_id.clone() {
                members.entry(cluster_id).or_default().push(article);
            }
        }

        let clusters = cluster_rows
            .iter()
            .map(|row| {
                let mut cluster = cluster_from_row(row)?;
                cluster.articles = members.remove(&cluster.id).unwrap_or_default();
                Ok(cluster)
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        debug!(
            target: TARGET_DB,
            "Loaded {} cluster(s) for language {}", clusters.len(), language
        );
        Ok(clusters)
    }

    /// Deletes a cluster and orphans its articles. Returns the number orphaned.
    #[instrument(target = "db", level = "info", skip(self))]
    pub async fn remove_cluster(&self, cluster_id: &str) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        let orphaned = sqlx::query(
            r#"
            UPDATE qa_articles
            SET cluster_id = NULL, cluster_position = NULL, updated_at = ?
            WHERE cluster_id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cluster_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("DELETE FROM qa_clusters WHERE id = ?")
            .bind(cluster_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            target: TARGET_DB,
            "Deleted cluster {}, orphaned {} article(s)", cluster_id, orphaned
        );
        Ok(orphaned)
    }
}
