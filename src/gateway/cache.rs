//! Cache keys for gateway resources.

use crate::cache::QueryKey;

use super::types::{RecordId, StoryFilter};

/// Key prefix shared by the story feed and all of its filtered views.
pub const STORIES_PREFIX: &str = "stories-list";
/// Key prefix of single-story entries.
pub const STORY_PREFIX: &str = "story:";

/// Logical resources the cache holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceKey {
  /// The feed, optionally filtered
  Stories(StoryFilter),
  /// One story by id
  Story(RecordId),
  /// NGO registrations
  Ngos,
  /// Moderation view of the feed
  AdminStories,
}

impl QueryKey for ResourceKey {
  fn cache_key(&self) -> String {
    match self {
      Self::Stories(filter) if filter.is_empty() => STORIES_PREFIX.to_string(),
      Self::Stories(filter) => format!(
        "{}:{}:{}:{}",
        STORIES_PREFIX,
        filter.category.map(|c| c.as_str()).unwrap_or(""),
        filter.state.as_deref().unwrap_or(""),
        filter.search.as_deref().unwrap_or("")
      ),
      Self::Story(id) => format!("{}{}", STORY_PREFIX, id),
      Self::Ngos => "ngos-list".to_string(),
      Self::AdminStories => "admin-stories".to_string(),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Stories(filter) if filter.is_empty() => "all stories".to_string(),
      Self::Stories(_) => format!("filtered stories ({})", self.cache_key()),
      Self::Story(id) => format!("story {}", id),
      Self::Ngos => "ngo registrations".to_string(),
      Self::AdminStories => "stories for moderation".to_string(),
    }
  }
}
