//! The hydrated item collection and its search/filter interface.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::types::{ContentItem, ContentType, EngagementCounts, SkyResult};

/// Sort order for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchSort {
    /// Most recently created first.
    #[default]
    Newest,
    Oldest,
    /// Highest engagement score first.
    TopEngagement,
    MostLiked,
}

/// Parameters for [`ContentCollection::search`].
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Filter by content type(s). Empty = all types.
    pub content_types: Vec<ContentType>,
    /// Case-insensitive substring of the item text.
    pub text_contains: Option<String>,
    /// Minimum engagement score (inclusive).
    pub min_score: Option<f64>,
    /// Minimum like count (inclusive).
    pub min_likes: Option<u64>,
    /// Filter by creation time: at or after this epoch second.
    pub created_after: Option<i64>,
    /// Filter by creation time: at or before this epoch second.
    pub created_before: Option<i64>,
    pub sort: SearchSort,
    /// Maximum number of results.
    pub limit: usize,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            content_types: Vec::new(),
            text_contains: None,
            min_score: None,
            min_likes: None,
            created_after: None,
            created_before: None,
            sort: SearchSort::Newest,
            limit: usize::MAX,
        }
    }
}

/// Aggregate numbers over a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionStats {
    pub total: usize,
    pub posts: usize,
    pub likes: usize,
    pub reposts: usize,
    /// Summed counts across all posts.
    pub engagement: EngagementCounts,
    /// Summed engagement score across all posts.
    pub total_score: f64,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

#[derive(Serialize)]
struct ExportedItem<'a> {
    #[serde(flatten)]
    item: &'a ContentItem,
    engagement_score: f64,
}

/// Owns the normalized items of one load. A new load replaces the whole
/// collection; items are never merged.
#[derive(Debug, Clone, Default)]
pub struct ContentCollection {
    items: Vec<ContentItem>,
    by_uri: HashMap<String, usize>,
}

impl ContentCollection {
    pub fn new(items: Vec<ContentItem>) -> Self {
        let mut collection = Self::default();
        collection.replace(items);
        collection
    }

    /// Swap in a freshly loaded item set.
    pub fn replace(&mut self, items: Vec<ContentItem>) {
        self.by_uri = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.uri.clone(), i))
            .collect();
        self.items = items;
    }

    pub fn items(&self) -> &[ContentItem] {
        &self.items
    }

    /// Mutable access for the hydrator; uris and types must not change.
    pub fn items_mut(&mut self) -> &mut [ContentItem] {
        &mut self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, uri: &str) -> Option<&ContentItem> {
        self.by_uri.get(uri).map(|&i| &self.items[i])
    }

    pub fn into_items(self) -> Vec<ContentItem> {
        self.items
    }

    /// Filter and sort items.
    pub fn search(&self, params: &SearchParams) -> Vec<&ContentItem> {
        let mut candidates: Vec<&ContentItem> = self.items.iter().collect();

        if !params.content_types.is_empty() {
            let type_set: HashSet<ContentType> = params.content_types.iter().copied().collect();
            candidates.retain(|item| type_set.contains(&item.content_type));
        }
        if let Some(needle) = &params.text_contains {
            let needle = needle.to_lowercase();
            candidates.retain(|item| item.text.to_lowercase().contains(&needle));
        }
        if let Some(min_score) = params.min_score {
            candidates.retain(|item| item.engagement_score() >= min_score);
        }
        if let Some(min_likes) = params.min_likes {
            candidates.retain(|item| item.like_count >= min_likes);
        }
        if let Some(after) = params.created_after {
            candidates.retain(|item| item.created_at >= after);
        }
        if let Some(before) = params.created_before {
            candidates.retain(|item| item.created_at <= before);
        }

        match params.sort {
            SearchSort::Newest => candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SearchSort::Oldest => candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SearchSort::TopEngagement => candidates.sort_by(|a, b| {
                b.engagement_score()
                    .total_cmp(&a.engagement_score())
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
            SearchSort::MostLiked => candidates.sort_by(|a, b| {
                b.like_count
                    .cmp(&a.like_count)
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
        }

        candidates.truncate(params.limit);
        candidates
    }

    pub fn stats(&self) -> CollectionStats {
        let mut stats = CollectionStats {
            total: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            match item.content_type {
                ContentType::Post => {
                    stats.posts += 1;
                    stats.engagement.likes += item.like_count;
                    stats.engagement.reposts += item.repost_count;
                    stats.engagement.replies += item.reply_count;
                    stats.total_score += item.engagement_score();
                }
                ContentType::Like => stats.likes += 1,
                ContentType::Repost => stats.reposts += 1,
            }
            stats.oldest = Some(stats.oldest.map_or(item.created_at, |t| t.min(item.created_at)));
            stats.newest = Some(stats.newest.map_or(item.created_at, |t| t.max(item.created_at)));
        }
        stats
    }

    /// Serialize every item, with its computed engagement score, as a JSON array.
    pub fn export_json(&self) -> SkyResult<String> {
        let exported: Vec<ExportedItem<'_>> = self
            .items
            .iter()
            .map(|item| ExportedItem {
                item,
                engagement_score: item.engagement_score(),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&exported)?)
    }
}
