use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use prettytable::{Cell, Row as PrettyRow, Table};
use std::io::{self, Write};
use tracing::{info, Level};

use funnelmap::batch::{BatchOptions, BatchReport};
use funnelmap::dashboard::{analyze_topics, cluster_stats, link_coverage};
use funnelmap::db::Database;
use funnelmap::funnel::cleanup::CLEANUP_THRESHOLD;
use funnelmap::funnel::{
    button_preview, cluster_health, find_duplicate_candidates, find_duplicate_groups,
    link_cluster, merge_duplicate_groups, plan_journey_links, validate_cluster, validate_journey,
    ArticleFilter, ClusterHealth, FunnelStage, ValidationResult,
};
use funnelmap::linking::suggestions::{
    filtered_suggestions, high_confidence_count, AUTO_APPLY_THRESHOLD,
};
use funnelmap::linking::{
    apply_assignments, apply_rebalance, detect_bottlenecks, generate_suggestions,
    inject_contextual_links, plan_bulk_apply, suggest_links, JsonRejectionStore, RejectionStore,
    RelatedArticle,
};
use funnelmap::{ArticleStore, FunnelConfig};

#[derive(Parser)]
#[clap(name = "funnelmap", about = "Validate, link and rebalance funnel clusters")]
struct Cli {
    /// Language to operate on (defaults to the first of LANGUAGES)
    #[clap(short, long, global = true)]
    language: Option<String>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one cluster, or every active cluster
    Validate {
        /// Cluster ID
        cluster_id: Option<String>,
    },

    /// Show the health of every active cluster
    Health,

    /// Point every TOFU of a cluster at its first MOFU and both MOFU at the BOFU
    LinkCluster {
        /// Cluster ID
        cluster_id: String,

        /// Print the links without writing anything
        #[clap(long)]
        dry_run: bool,
    },

    /// List link suggestions for articles missing a funnel pointer
    Suggest {
        /// Only show suggestions for this source article
        #[clap(short, long)]
        source: Option<String>,
    },

    /// Reject a suggested link so it is never proposed again
    Reject {
        source_id: String,
        target_id: String,

        /// Who rejected the suggestion
        #[clap(short, long, default_value = "admin")]
        by: String,
    },

    /// Apply every high-confidence, non-rejected suggestion
    Apply {
        /// Print the plan without writing anything
        #[clap(long)]
        dry_run: bool,
    },

    /// List articles with too many inbound funnel links
    Bottlenecks,

    /// Move over-linked sources onto alternative targets
    Rebalance {
        /// Only rebalance this target article
        #[clap(short, long)]
        target: Option<String>,

        /// Print the suggestions without writing anything
        #[clap(long)]
        dry_run: bool,
    },

    /// Render an article body with contextual links injected
    Inject {
        /// Article ID
        article_id: String,
    },

    /// Cluster and link coverage statistics
    Stats,

    /// Per-topic stage counts and bottlenecks
    Topics,

    /// Find existing articles similar to a proposed title
    Duplicates {
        #[clap(short, long)]
        title: String,

        #[clap(long)]
        topic: String,

        /// TOFU, MOFU or BOFU
        #[clap(short, long, default_value = "TOFU")]
        stage: FunnelStage,
    },

    /// Merge articles with duplicate titles into one, moving references to it
    CleanupDuplicates {
        /// Minimum title similarity for two articles to count as duplicates
        #[clap(short, long, default_value_t = CLEANUP_THRESHOLD)]
        threshold: f64,

        /// Print the groups without writing anything
        #[clap(long)]
        dry_run: bool,
    },

    /// Delete a cluster, leaving its articles unclustered
    DeleteCluster {
        /// Cluster ID
        cluster_id: String,

        /// Skip the confirmation prompt
        #[clap(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    funnelmap::logging::setup_logging("funnelmap", Level::INFO)?;

    let args = Cli::parse();
    let config = FunnelConfig::from_env();
    let language = args
        .language
        .clone()
        .unwrap_or_else(|| config.default_language().to_string());

    let db = Database::new(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path))?;

    match args.command {
        Commands::Validate { cluster_id } => validate(&db, cluster_id, &language).await?,
        Commands::Health => health(&db, &language).await?,
        Commands::LinkCluster {
            cluster_id,
            dry_run,
        } => link(&db, &config, &cluster_id, dry_run).await?,
        Commands::Suggest { source } => suggest(&db, &config, &language, source).await?,
        Commands::Reject {
            source_id,
            target_id,
            by,
        } => {
            let mut rejections = JsonRejectionStore::open(&config.rejections_path)?;
            rejections.reject(&source_id, &target_id, &by)?;
            println!("{} {} → {}", "Rejected".yellow(), source_id, target_id);
        }
        Commands::Apply { dry_run } => apply(&db, &config, &language, dry_run).await?,
        Commands::Bottlenecks => bottlenecks(&db, &config, &language).await?,
        Commands::Rebalance { target, dry_run } => {
            rebalance(&db, &config, &language, target, dry_run).await?
        }
        Commands::Inject { article_id } => inject(&db, &article_id).await?,
        Commands::Stats => stats(&db, &language).await?,
        Commands::Topics => topics(&db, &config, &language).await?,
        Commands::Duplicates {
            title,
            topic,
            stage,
        } => duplicates(&db, &language, &title, &topic, stage).await?,
        Commands::CleanupDuplicates { threshold, dry_run } => {
            cleanup_duplicates(&db, &config, &language, threshold, dry_run).await?
        }
        Commands::DeleteCluster { cluster_id, yes } => {
            delete_cluster(&db, &cluster_id, yes).await?
        }
    }

    Ok(())
}

fn print_validation(label: &str, result: &ValidationResult) {
    if result.is_valid {
        println!("  {}: {}", label, "valid".green());
    } else {
        println!("  {}: {}", label, "invalid".red());
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}

fn print_report(action: &str, report: &BatchReport) {
    println!(
        "{}: {} applied, {} failed",
        action,
        report.applied().to_string().green(),
        report.errors().to_string().red()
    );
    for failure in &report.failed {
        println!("  {} {}: {}", "✗".red(), failure.item_id, failure.error);
    }
}

async fn validate(db: &Database, cluster_id: Option<String>, language: &str) -> Result<()> {
    let ids = match cluster_id {
        Some(id) => vec![id],
        None => db
            .list_clusters_with_articles(language)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect(),
    };

    for id in ids {
        let validation = validate_cluster(db, &id).await?;
        println!("=== CLUSTER {} ===", validation.cluster_id);
        print_validation("Structure", &validation.structure);
        print_validation("Completeness", &validation.completeness);
        if let Some(cluster) = db.get_cluster_with_articles(&id).await? {
            print_validation("Journey", &validate_journey(&cluster.articles));
        }
    }
    Ok(())
}

async fn link(db: &Database, config: &FunnelConfig, cluster_id: &str, dry_run: bool) -> Result<()> {
    if dry_run {
        let Some(cluster) = db.get_cluster_with_articles(cluster_id).await? else {
            bail!("Cluster {} not found", cluster_id);
        };
        let links = plan_journey_links(&cluster.articles);
        for l in &links {
            println!("  {} → {} ({})", l.source_id, l.target_id, l.field.column());
        }
        println!("Dry run: {} link(s) not written", links.len());
        return Ok(());
    }

    let report = link_cluster(db, cluster_id, BatchOptions::from(config)).await?;
    print_report("Link cluster", &report);
    Ok(())
}

fn yes_no(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".red().to_string()
    }
}

async fn health(db: &Database, language: &str) -> Result<()> {
    let clusters = db.list_clusters_with_articles(language).await?;
    let healths: Vec<ClusterHealth> = clusters.iter().map(cluster_health).collect();

    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("ID"),
        Cell::new("Title"),
        Cell::new("Articles"),
        Cell::new("Complete"),
        Cell::new("Valid Links"),
        Cell::new("Missing Positions"),
        Cell::new("Broken Links"),
    ]));

    for health in &healths {
        let missing = health
            .missing_positions
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(PrettyRow::new(vec![
            Cell::new(&health.cluster_id),
            Cell::new(&health.cluster_title),
            Cell::new(&health.article_count.to_string()),
            Cell::new(&yes_no(health.is_complete)),
            Cell::new(&yes_no(health.has_valid_structure)),
            Cell::new(&missing),
            Cell::new(&health.broken_links.join("\n")),
        ]));
    }

    table.printstd();
    Ok(())
}

async fn suggest(
    db: &Database,
    config: &FunnelConfig,
    language: &str,
    source: Option<String>,
) -> Result<()> {
    let articles = db.fetch_articles(&ArticleFilter::language(language)).await?;
    let rejections = JsonRejectionStore::open(&config.rejections_path)?;
    let suggestions = suggest_links(&articles, &config.suggestions);

    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("Source"),
        Cell::new("Target"),
        Cell::new("Title"),
        Cell::new("Confidence"),
        Cell::new("Reason"),
    ]));

    for (source_id, list) in &suggestions {
        if source.as_deref().is_some_and(|s| s != source_id) {
            continue;
        }
        for suggestion in filtered_suggestions(source_id, list, &rejections) {
            let confidence = if suggestion.confidence >= AUTO_APPLY_THRESHOLD {
                suggestion.confidence.to_string().green().to_string()
            } else {
                suggestion.confidence.to_string().yellow().to_string()
            };
            table.add_row(PrettyRow::new(vec![
                Cell::new(source_id),
                Cell::new(&suggestion.target_id),
                Cell::new(&suggestion.title),
                Cell::new(&confidence),
                Cell::new(&suggestion.reason),
            ]));
        }
    }

    table.printstd();
    println!(
        "{} high-confidence suggestion(s) ready to apply",
        high_confidence_count(&suggestions, &rejections)
    );
    Ok(())
}

async fn apply(db: &Database, config: &FunnelConfig, language: &str, dry_run: bool) -> Result<()> {
    let articles = db.fetch_articles(&ArticleFilter::language(language)).await?;
    let rejections = JsonRejectionStore::open(&config.rejections_path)?;
    let suggestions = suggest_links(&articles, &config.suggestions);
    let plan = plan_bulk_apply(&suggestions, &articles, &rejections);

    if plan.is_empty() {
        println!("No high-confidence suggestions to apply");
        return Ok(());
    }

    for assignment in &plan {
        println!(
            "  {} → {} ({}, {})",
            assignment.source_id,
            assignment.target_id,
            assignment.field.column(),
            assignment.confidence
        );
    }
    if dry_run {
        println!("Dry run: {} assignment(s) not written", plan.len());
        return Ok(());
    }

    let report = apply_assignments(db, plan, BatchOptions::from(config)).await;
    print_report("Apply suggestions", &report);
    Ok(())
}

async fn bottlenecks(db: &Database, config: &FunnelConfig, language: &str) -> Result<()> {
    let articles = db.fetch_articles(&ArticleFilter::language(language)).await?;
    let found = detect_bottlenecks(&articles, &config.bottlenecks);

    if found.is_empty() {
        println!("{}", "No bottlenecks found".green());
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("Target"),
        Cell::new("Title"),
        Cell::new("Stage"),
        Cell::new("Topic"),
        Cell::new("Inbound"),
        Cell::new("Severity"),
        Cell::new("Recommendations"),
    ]));

    for bottleneck in &found {
        table.add_row(PrettyRow::new(vec![
            Cell::new(&bottleneck.target_article_id),
            Cell::new(&bottleneck.target_title),
            Cell::new(bottleneck.target_stage.as_str()),
            Cell::new(&bottleneck.target_topic),
            Cell::new(&bottleneck.incoming_link_count.to_string()),
            Cell::new(&bottleneck.severity.to_string()),
            Cell::new(&bottleneck.recommended_actions.join("\n")),
        ]));
    }

    table.printstd();
    Ok(())
}

async fn rebalance(
    db: &Database,
    config: &FunnelConfig,
    language: &str,
    target: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let filter = ArticleFilter::language(language);
    let mut articles = db.fetch_articles(&filter).await?;
    let targets: Vec<String> = detect_bottlenecks(&articles, &config.bottlenecks)
        .into_iter()
        .map(|b| b.target_article_id)
        .filter(|id| target.as_deref().map_or(true, |t| t == id))
        .collect();

    if targets.is_empty() {
        println!("{}", "Nothing to rebalance".green());
        return Ok(());
    }

    // Each pass sees the links written by the previous one
    for target_id in targets {
        let Some(bottleneck) = detect_bottlenecks(&articles, &config.bottlenecks)
            .into_iter()
            .find(|b| b.target_article_id == target_id)
        else {
            continue;
        };

        let suggestions = generate_suggestions(&bottleneck, &articles, &config.bottlenecks);
        println!(
            "=== {} ({} inbound, {}) ===",
            bottleneck.target_title, bottleneck.incoming_link_count, bottleneck.severity
        );
        if suggestions.is_empty() {
            println!("  No alternative targets available");
            continue;
        }
        for s in &suggestions {
            println!(
                "  {} → {} [{:.2}] \"{}\"",
                s.from_title, s.to_title, s.relevance_score, s.suggested_anchor_text
            );
        }
        if dry_run {
            continue;
        }

        let report = apply_rebalance(db, suggestions, BatchOptions::from(config)).await;
        print_report("Rebalance", &report);
        articles = db.fetch_articles(&filter).await?;
    }

    Ok(())
}

async fn inject(db: &Database, article_id: &str) -> Result<()> {
    let Some(article) = db.get_article(article_id).await? else {
        bail!("Article {} not found", article_id);
    };

    let candidates: Vec<RelatedArticle> = db
        .fetch_articles(&ArticleFilter::language(&article.language))
        .await?
        .iter()
        .filter(|a| a.id != article.id)
        .map(RelatedArticle::from)
        .collect();

    let html = inject_contextual_links(
        &article.content,
        &candidates,
        &article.topic,
        article.funnel_stage,
    );
    println!("{}", html);
    Ok(())
}

async fn stats(db: &Database, language: &str) -> Result<()> {
    let clusters = db.list_clusters_with_articles(language).await?;
    let healths: Vec<ClusterHealth> = clusters.iter().map(cluster_health).collect();
    let total = db.count_articles(language).await?;
    let stats = cluster_stats(&healths, total);

    let articles = db.fetch_articles(&ArticleFilter::language(language)).await?;
    let coverage = link_coverage(&articles);

    println!("=== CLUSTERS ({}) ===", language);
    println!(
        "Clusters: {} total, {} complete, {} incomplete ({:.1}% complete)",
        stats.total_clusters,
        stats.complete_clusters.to_string().green(),
        stats.incomplete_clusters.to_string().red(),
        stats.completion_percentage
    );
    println!(
        "Articles: {} clustered, {} unclustered ({:.1}% clustered)",
        stats.clustered_articles, stats.unclustered_articles, stats.clustering_percentage
    );
    println!(
        "Links: {}/{} healthy ({:.1}%)",
        stats.healthy_links,
        stats.healthy_links + stats.broken_links,
        stats.link_health_percentage
    );

    println!("\n=== LINK COVERAGE ===");
    println!(
        "TOFU → MOFU: {} linked, {} missing",
        coverage.tofu_with_mofu, coverage.tofu_without_mofu
    );
    println!(
        "MOFU → BOFU: {} linked, {} missing",
        coverage.mofu_with_bofu, coverage.mofu_without_bofu
    );
    println!("Topic-aligned links: {}", coverage.topic_aligned_links);
    println!("Coverage: {:.1}%", coverage.coverage_percentage);

    info!("Row counts (clusters:articles:unclustered) {}", db.collect_stats().await?);
    Ok(())
}

async fn topics(db: &Database, config: &FunnelConfig, language: &str) -> Result<()> {
    let articles = db.fetch_articles(&ArticleFilter::language(language)).await?;
    let found = detect_bottlenecks(&articles, &config.bottlenecks);

    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("Topic"),
        Cell::new("TOFU"),
        Cell::new("MOFU"),
        Cell::new("BOFU"),
        Cell::new("Missing"),
        Cell::new("Bottlenecks"),
    ]));

    for topic in analyze_topics(&articles, &found) {
        let missing = topic
            .missing_stages
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(PrettyRow::new(vec![
            Cell::new(&topic.topic),
            Cell::new(&topic.tofu_count.to_string()),
            Cell::new(&topic.mofu_count.to_string()),
            Cell::new(&topic.bofu_count.to_string()),
            Cell::new(&missing),
            Cell::new(&topic.bottleneck_ids.len().to_string()),
        ]));
    }

    table.printstd();
    Ok(())
}

async fn duplicates(
    db: &Database,
    language: &str,
    title: &str,
    topic: &str,
    stage: FunnelStage,
) -> Result<()> {
    let articles = db.fetch_articles(&ArticleFilter::language(language)).await?;
    let candidates = find_duplicate_candidates(title, topic, stage, &articles);

    println!("Button preview: {}", button_preview(title, topic));
    if candidates.is_empty() {
        println!("{}", "No similar articles found".green());
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("ID"),
        Cell::new("Title"),
        Cell::new("Topic"),
        Cell::new("Stage"),
        Cell::new("Similarity"),
        Cell::new("Action"),
    ]));
    for candidate in &candidates {
        table.add_row(PrettyRow::new(vec![
            Cell::new(&candidate.article_id),
            Cell::new(&candidate.title),
            Cell::new(&candidate.topic),
            Cell::new(candidate.funnel_stage.as_str()),
            Cell::new(&format!("{:.0}%", candidate.similarity * 100.0)),
            Cell::new(&format!("{:?}", candidate.action)),
        ]));
    }
    table.printstd();
    Ok(())
}

async fn cleanup_duplicates(
    db: &Database,
    config: &FunnelConfig,
    language: &str,
    threshold: f64,
    dry_run: bool,
) -> Result<()> {
    let articles = db.fetch_articles(&ArticleFilter::language(language)).await?;
    let groups = find_duplicate_groups(&articles, threshold);

    if groups.is_empty() {
        println!("{}", "No duplicate articles found".green());
        return Ok(());
    }

    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("Title"),
        Cell::new("Keep"),
        Cell::new("Delete"),
    ]));
    for group in &groups {
        table.add_row(PrettyRow::new(vec![
            Cell::new(&group.title),
            Cell::new(&group.keep_id),
            Cell::new(&group.delete_ids.join("\n")),
        ]));
    }
    table.printstd();

    if dry_run {
        let doomed: usize = groups.iter().map(|g| g.delete_ids.len()).sum();
        println!("Dry run: {} duplicate(s) not deleted", doomed);
        return Ok(());
    }

    let report = merge_duplicate_groups(db, groups, &articles, BatchOptions::from(config)).await;
    print_report("Merge duplicates", &report);
    Ok(())
}

async fn delete_cluster(db: &Database, cluster_id: &str, yes: bool) -> Result<()> {
    let Some(cluster) = db.get_cluster_with_articles(cluster_id).await? else {
        println!("❌ Cluster {} not found", cluster_id);
        return Ok(());
    };

    if !yes {
        print!(
            "Delete cluster \"{}\" and unassign its {} article(s)? [y/N] ",
            cluster.title,
            cluster.articles.len()
        );
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Aborted");
            return Ok(());
        }
    }

    let orphaned = db.delete_cluster(cluster_id).await?;
    println!(
        "{} cluster {}; {} article(s) are now unclustered",
        "Deleted".green(),
        cluster.title,
        orphaned
    );
    Ok(())
}
