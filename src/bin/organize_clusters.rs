use anyhow::Result;
use funnelmap::batch::BatchOptions;
use funnelmap::db::Database;
use funnelmap::funnel::{execute_organize_plan, plan_auto_organize, ArticleFilter};
use funnelmap::logging::configure_logging;
use funnelmap::{ArticleStore, FunnelConfig};
use std::env;
use tokio::time::Instant;
use tracing::{error, info};

/// Utility to group unclustered articles into 3-2-1 funnel clusters.
///
/// This tool:
/// 1. Loads every unclustered article of each configured language
/// 2. Carves out as many complete clusters per topic as the stage counts allow
/// 3. Creates the clusters and assigns positions (booking on position 6)
/// 4. Points every TOFU at the first MOFU and both MOFU at the BOFU
///
/// Usage:
///    cargo run --bin organize_clusters -- [--dry-run]
///
/// Languages come from LANGUAGES (";"-separated, default "en").

#[tokio::main]
async fn main() -> Result<()> {
    let config = FunnelConfig::from_env();
    configure_logging(&config.log_dir);

    let dry_run = env::args().skip(1).any(|arg| arg == "--dry-run");
    let start_time = Instant::now();

    let db = Database::instance().await?;

    let mut clusters_created = 0;
    let mut articles_assigned = 0;
    let mut links_written = 0;
    let mut errors = 0;

    for language in &config.languages {
        let articles = db
            .fetch_articles(&ArticleFilter {
                unclustered_only: true,
                ..ArticleFilter::language(language)
            })
            .await?;
        info!("[{}] Found {} unclustered articles", language, articles.len());

        let plan = plan_auto_organize(&articles);
        for cluster in &plan.clusters {
            info!(
                "[{}] Planned \"{}\" with {} articles",
                language,
                cluster.title,
                cluster.placements.len()
            );
        }
        info!(
            "[{}] {} cluster(s) planned, {} article(s) left over",
            language,
            plan.clusters.len(),
            plan.leftover
        );

        if dry_run {
            continue;
        }

        let report = execute_organize_plan(db, &plan, language, BatchOptions::from(&config)).await;
        for message in &report.errors {
            error!("[{}] {}", language, message);
        }
        clusters_created += report.clusters_created.len();
        articles_assigned += report.articles_assigned;
        links_written += report.links_written;
        errors += report.errors.len();
    }

    let elapsed = start_time.elapsed();
    info!("Organizing completed in {:.2?}", elapsed);
    info!("Clusters created: {}", clusters_created);
    info!("Articles assigned: {}", articles_assigned);
    info!("Journey links written: {}", links_written);
    info!("Errors: {}", errors);

    Ok(())
}
