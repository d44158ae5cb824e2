use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::core::{Database, DbLockErrorExt};
use crate::funnel::{Article, ArticleFilter, ArticleUpdate, FunnelStage, NewArticle};
use crate::TARGET_DB;

pub(crate) const ARTICLE_COLUMNS: &str = "id, title, slug, content, topic, funnel_stage, \
     cluster_id, cluster_position, points_to_mofu_id, points_to_bofu_id, \
     appointment_booking_enabled, language, parent_id";

pub(crate) fn article_from_row(row: &SqliteRow) -> Result<Article, sqlx::Error> {
    let stage: String = row.try_get("funnel_stage")?;
    let funnel_stage = stage
        .parse::<FunnelStage>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(Article {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        slug: row.try_get("slug")?,
        content: row.try_get("content")?,
        topic: row.try_get("topic")?,
        funnel_stage,
        cluster_id: row.try_get("cluster_id")?,
        cluster_position: row.try_get("cluster_position")?,
        points_to_mofu_id: row.try_get("points_to_mofu_id")?,
        points_to_bofu_id: row.try_get("points_to_bofu_id")?,
        appointment_booking_enabled: row.try_get("appointment_booking_enabled")?,
        language: row.try_get("language")?,
        parent_id: row.try_get("parent_id")?,
    })
}

impl Database {
    /// Articles matching `filter`, in insertion order.
    #[instrument(target = "db", level = "debug", skip(self))]
    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>, sqlx::Error> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM qa_articles WHERE 1 = 1", ARTICLE_COLUMNS));

        if let Some(language) = &filter.language {
            query.push(" AND language = ").push_bind(language.clone());
        }
        if let Some(stage) = filter.funnel_stage {
            query.push(" AND funnel_stage = ").push_bind(stage.as_str());
        }
        if let Some(topic) = &filter.topic {
            query.push(" AND topic = ").push_bind(topic.clone());
        }
        if let Some(cluster_id) = &filter.cluster_id {
            query.push(" AND cluster_id = ").push_bind(cluster_id.clone());
        }
        if filter.unclustered_only {
            query.push(" AND cluster_id IS NULL");
        }
        query.push(" ORDER BY rowid");

        let rows = query.build().fetch_all(self.pool()).await?;
        let articles = rows
            .iter()
            .map(article_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(target: TARGET_DB, "Fetched {} article(s)", articles.len());
        Ok(articles)
    }

    pub async fn find_article(&self, article_id: &str) -> Result<Option<Article>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM qa_articles WHERE id = ?",
            ARTICLE_COLUMNS
        ))
        .bind(article_id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(article_from_row).transpose()
    }

    pub async fn count_language_articles(&self, language: &str) -> Result<usize, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM qa_articles WHERE language = ?")
            .bind(language)
            .fetch_one(self.pool())
            .await?;
        Ok(count as usize)
    }

    /// Applies the set fields of `update`; returns the number of rows touched.
    #[instrument(target = "db", level = "info", skip(self, update))]
    pub async fn apply_article_update(
        &self,
        article_id: &str,
        update: &ArticleUpdate,
    ) -> Result<u64, sqlx::Error> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE qa_articles SET updated_at = ");
        query.push_bind(Utc::now().to_rfc3339());

        if let Some(title) = &update.title {
            query.push(", title = ").push_bind(title.clone());
        }
        if let Some(content) = &update.content {
            query.push(", content = ").push_bind(content.clone());
        }
        if let Some(topic) = &update.topic {
            query.push(", topic = ").push_bind(topic.clone());
        }
        if let Some(cluster_id) = &update.cluster_id {
            query.push(", cluster_id = ").push_bind(cluster_id.clone());
        }
        if let Some(position) = update.cluster_position {
            query.push(", cluster_position = ").push_bind(position);
        }
        if let Some(mofu) = &update.points_to_mofu_id {
            query.push(", points_to_mofu_id = ").push_bind(mofu.clone());
        }
        if let Some(bofu) = &update.points_to_bofu_id {
            query.push(", points_to_bofu_id = ").push_bind(bofu.clone());
        }
        if let Some(enabled) = update.appointment_booking_enabled {
            query.push(", appointment_booking_enabled = ").push_bind(enabled);
        }
        if let Some(parent_id) = &update.parent_id {
            query.push(", parent_id = ").push_bind(parent_id.clone());
        }

        query.push(" WHERE id = ").push_bind(article_id.to_string());

        let result = query.build().execute(self.pool()).await?;
        debug!(
            target: TARGET_DB,
            "Updated article {} ({} row(s))", article_id, result.rows_affected()
        );
        Ok(result.rows_affected())
    }

    /// Inserts an article under a fresh id, retrying while the database is locked.
    #[instrument(target = "db", level = "info", skip(self, new), fields(slug = %new.slug))]
    pub async fn create_article(&self, new: &NewArticle) -> Result<Article, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        let mut backoff = 100; // initial delay in milliseconds
        let max_retries = 5;

        for attempt in 1..=max_retries {
            let result = sqlx::query(
                r#"
                INSERT INTO qa_articles (id, title, slug, content, topic, funnel_stage, language, parent_id, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                "#,
            )
            .bind(&id)
            .bind(&new.title)
            .bind(&new.slug)
            .bind(&new.content)
            .bind(&new.topic)
            .bind(new.funnel_stage.as_str())
            .bind(&new.language)
            .bind(&new.parent_id)
            .bind(&now)
            .execute(self.pool())
            .await;

            match result {
                Ok(_) => {
                    debug!(target: TARGET_DB, "Article {} inserted as {}", new.slug, id);
                    let mut article =
                        Article::new(&id, &new.title, &new.slug, &new.topic, new.funnel_stage)
                            .with_content(&new.content)
                            .with_language(&new.language);
                    article.parent_id = new.parent_id.clone();
                    return Ok(article);
                }
                Err(err) if err.is_database_lock_error() => {
                    info!(
                        target: TARGET_DB,
                        "Database is locked, waiting {}ms before retrying attempt {}/{}: {}",
                        backoff, attempt, max_retries, new.slug
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => {
                    error!(target: TARGET_DB, "Failed to insert article {}: {}", new.slug, err);
                    return Err(err);
                }
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded for inserting article".into(),
        ))
    }

    /// Deletes an article and clears every pointer and parent reference to it.
    #[instrument(target = "db", level = "info", skip(self))]
    pub async fn remove_article(&self, article_id: &str) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool().begin().await?;
        let now = Utc::now().to_rfc3339();

        for column in ["points_to_mofu_id", "points_to_bofu_id", "parent_id"] {
            let cleared = sqlx::query(&format!(
                "UPDATE qa_articles SET {column} = NULL, updated_at = ? WHERE {column} = ?"
            ))
            .bind(&now)
            .bind(article_id)
            .execute(&mut *tx)
            .await?;
            if cleared.rows_affected() > 0 {
                debug!(
                    target: TARGET_DB,
                    "Cleared {} on {} article(s) referencing {}",
                    column,
                    cleared.rows_affected(),
                    article_id
                );
            }
        }

        let deleted = sqlx::query("DELETE FROM qa_articles WHERE id = ?")
            .bind(article_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }
}
