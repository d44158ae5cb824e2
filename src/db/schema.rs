use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS qa_clusters (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                topic TEXT NOT NULL,
                language TEXT NOT NULL DEFAULT 'en',
                sort_order INTEGER NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_qa_clusters_language ON qa_clusters (language, is_active, sort_order);

            -- Funnel pointers and parent_id reference qa_articles.id; they are
            -- cleared explicitly when the target is deleted.
            CREATE TABLE IF NOT EXISTS qa_articles (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                slug TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                topic TEXT NOT NULL,
                funnel_stage TEXT NOT NULL CHECK (funnel_stage IN ('TOFU', 'MOFU', 'BOFU')),
                cluster_id TEXT,
                cluster_position INTEGER CHECK (cluster_position BETWEEN 1 AND 6),
                points_to_mofu_id TEXT,
                points_to_bofu_id TEXT,
                appointment_booking_enabled BOOLEAN NOT NULL DEFAULT 0,
                language TEXT NOT NULL DEFAULT 'en',
                parent_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (language, slug)
            );
            CREATE INDEX IF NOT EXISTS idx_qa_articles_language_stage ON qa_articles (language, funnel_stage);
            CREATE INDEX IF NOT EXISTS idx_qa_articles_topic ON qa_articles (topic);
            CREATE INDEX IF NOT EXISTS idx_qa_articles_cluster_id ON qa_articles (cluster_id);
            CREATE INDEX IF NOT EXISTS idx_qa_articles_points_to_mofu ON qa_articles (points_to_mofu_id);
            CREATE INDEX IF NOT EXISTS idx_qa_articles_points_to_bofu ON qa_articles (points_to_bofu_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_qa_articles_cluster_position
                ON qa_articles (cluster_id, cluster_position)
                WHERE cluster_id IS NOT NULL AND cluster_position IS NOT NULL;
            "#,
        )
        .execute(&mut *conn)
        .await?;

        info!(target: TARGET_DB, "Database schema initialized");
        Ok(())
    }
}
