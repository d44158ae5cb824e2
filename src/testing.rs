//! In-memory fixtures shared by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::funnel::{
    Article, ArticleFilter, ArticleUpdate, Cluster, FunnelError, FunnelStage, NewArticle,
    NewCluster,
};
use crate::store::ArticleStore;

/// The well-formed "Legal" cluster: A1..A3 → M1, M1 and M2 → B1, booking on B1.
pub fn legal_cluster(cluster_id: &str) -> Vec<Article> {
    vec![
        Article::new("a1", "A1", "a1", "Legal", FunnelStage::Tofu)
            .in_cluster(cluster_id, 1)
            .pointing_to_mofu("m1"),
        Article::new("a2", "A2", "a2", "Legal", FunnelStage::Tofu)
            .in_cluster(cluster_id, 2)
            .pointing_to_mofu("m1"),
        Article::new("a3", "A3", "a3", "Legal", FunnelStage::Tofu)
            .in_cluster(cluster_id, 3)
            .pointing_to_mofu("m1"),
        Article::new("m1", "M1", "m1", "Legal", FunnelStage::Mofu)
            .in_cluster(cluster_id, 4)
            .pointing_to_bofu("b1"),
        Article::new("m2", "M2", "m2", "Legal", FunnelStage::Mofu)
            .in_cluster(cluster_id, 5)
            .pointing_to_bofu("b1"),
        Article::new("b1", "B1", "b1", "Legal", FunnelStage::Bofu)
            .in_cluster(cluster_id, 6)
            .with_booking(true),
    ]
}

#[derive(Default)]
struct State {
    articles: Vec<Article>,
    clusters: Vec<Cluster>,
    next_id: usize,
}

/// Store double; updates to ids in `failing` return an error.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing: HashSet<String>,
}

impl MemoryStore {
    pub fn new(articles: Vec<Article>) -> Self {
        MemoryStore {
            state: Mutex::new(State {
                articles,
                ..Default::default()
            }),
            failing: HashSet::new(),
        }
    }

    pub fn with_cluster(cluster_id: &str, topic: &str, articles: Vec<Article>) -> Self {
        let store = MemoryStore::new(articles);
        store.state.lock().unwrap().clusters.push(Cluster {
            id: cluster_id.to_string(),
            title: format!("{} - Cluster 1", topic),
            description: None,
            topic: topic.to_string(),
            language: "en".to_string(),
            sort_order: 0,
            is_active: true,
            articles: Vec::new(),
        });
        store
    }

    pub fn failing_on(mut self, article_id: &str) -> Self {
        self.failing.insert(article_id.to_string());
        self
    }

    pub fn article(&self, article_id: &str) -> Option<Article> {
        self.state
            .lock()
            .unwrap()
            .articles
            .iter()
            .find(|a| a.id == article_id)
            .cloned()
    }

    pub fn clusters(&self) -> Vec<Cluster> {
        self.state.lock().unwrap().clusters.clone()
    }

    fn attach(state: &State, cluster: &Cluster) -> Cluster {
        let mut articles: Vec<Article> = state
            .articles
            .iter()
            .filter(|a| a.cluster_id.as_deref() == Some(cluster.id.as_str()))
            .cloned()
            .collect();
        articles.sort_by_key(|a| a.cluster_position);
        Cluster {
            articles,
            ..cluster.clone()
        }
    }
}

fn apply_update(article: &mut Article, update: &ArticleUpdate) {
    if let Some(title) = &update.title {
        article.title = title.clone();
    }
    if let Some(content) = &update.content {
        article.content = content.clone();
    }
    if let Some(topic) = &update.topic {
        article.topic = topic.clone();
    }
    if let Some(cluster_id) = &update.cluster_id {
        article.cluster_id = cluster_id.clone();
    }
    if let Some(position) = update.cluster_position {
        article.cluster_position = position;
    }
    if let Some(mofu) = &update.points_to_mofu_id {
        article.points_to_mofu_id = mofu.clone();
    }
    if let Some(bofu) = &update.points_to_bofu_id {
        article.points_to_bofu_id = bofu.clone();
    }
    if let Some(enabled) = update.appointment_booking_enabled {
        article.appointment_booking_enabled = enabled;
    }
    if let Some(parent_id) = &update.parent_id {
        article.parent_id = parent_id.clone();
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn fetch_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .articles
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect())
    }

    async fn get_article(&self, article_id: &str) -> Result<Option<Article>> {
        Ok(self.article(article_id))
    }

    async fn count_articles(&self, language: &str) -> Result<usize> {
        let state = self.state.lock().unwrap();
        Ok(state.articles.iter().filter(|a| a.language == language).count())
    }

    async fn update_article(&self, article_id: &str, update: &ArticleUpdate) -> Result<()> {
        if self.failing.contains(article_id) {
            return Err(anyhow!("simulated write failure for {}", article_id));
        }
        let mut state = self.state.lock().unwrap();
        let article = state
            .articles
            .iter_mut()
            .find(|a| a.id == article_id)
            .ok_or_else(|| FunnelError::ArticleNotFound(article_id.to_string()))?;
        apply_update(article, update);
        Ok(())
    }

    async fn insert_article(&self, new: &NewArticle) -> Result<Article> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let mut article = Article::new(
            &format!("new-{}", state.next_id),
            &new.title,
            &new.slug,
            &new.topic,
            new.funnel_stage,
        )
        .with_content(&new.content)
        .with_language(&new.language);
        article.parent_id = new.parent_id.clone();
        state.articles.push(article.clone());
        Ok(article)
    }

    async fn delete_article(&self, article_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.articles.retain(|a| a.id != article_id);
        for article in state.articles.iter_mut() {
            if article.points_to_mofu_id.as_deref() == Some(article_id) {
                article.points_to_mofu_id = None;
            }
            if article.points_to_bofu_id.as_deref() == Some(article_id) {
                article.points_to_bofu_id = None;
            }
            if article.parent_id.as_deref() == Some(article_id) {
                article.parent_id = None;
            }
        }
        Ok(())
    }

    async fn create_cluster(&self, new: &NewCluster) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("cluster-{}", state.next_id);
        let sort_order = state.clusters.len() as i64;
        state.clusters.push(Cluster {
            id: id.clone(),
            title: new.title.clone(),
            description: new.description.clone(),
            topic: new.topic.clone(),
            language: new.language.clone(),
            sort_order,
            is_active: true,
            articles: Vec::new(),
        });
        Ok(id)
    }

    async fn get_cluster_with_articles(&self, cluster_id: &str) -> Result<Option<Cluster>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .clusters
            .iter()
            .find(|c| c.id == cluster_id)
            .map(|c| Self::attach(&state, c)))
    }

    async fn list_clusters_with_articles(&self, language: &str) -> Result<Vec<Cluster>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .clusters
            .iter()
            .filter(|c| c.language == language && c.is_active)
            .map(|c| Self::attach(&state, c))
            .collect())
    }

    async fn delete_cluster(&self, cluster_id: &str) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.clusters.retain(|c| c.id != cluster_id);
        let mut orphaned = 0;
        for article in state.articles.iter_mut() {
            if article.cluster_id.as_deref() == Some(cluster_id) {
                article.cluster_id = None;
                article.cluster_position = None;
                orphaned += 1;
            }
        }
        Ok(orphaned)
    }
}
