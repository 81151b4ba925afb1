//! Row shapes in the storage-side (snake_case) naming convention.
//!
//! These types are separate from domain types so that storage defaults
//! (missing flags, null photo URLs) are resolved in one place.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

use super::types::{Category, NewNgo, NewStory, Ngo, RecordId, Story};

/// Decode a raw JSON row into a typed row.
pub fn decode<T: DeserializeOwned>(row: Value) -> Result<T> {
  Ok(serde_json::from_value(row)?)
}

// ============================================================================
// stories
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StoryRow {
  pub id: RecordId,
  pub name: String,
  pub email: String,
  pub city: String,
  pub state: String,
  pub category: String,
  pub title: String,
  pub story: String,
  #[serde(default)]
  pub photo_url: Option<String>,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub featured: Option<bool>,
  #[serde(default)]
  pub verified: Option<bool>,
  #[serde(default)]
  pub help_approved: Option<bool>,
}

impl StoryRow {
  pub fn into_story(self) -> Story {
    let category = self.category.parse().unwrap_or_else(|_| {
      tracing::warn!(
        id = %self.id,
        category = %self.category,
        "Unknown story category in storage, treating as other"
      );
      Category::Other
    });

    Story {
      id: self.id,
      name: self.name,
      email: self.email,
      city: self.city,
      state: self.state,
      category,
      title: self.title,
      story: self.story,
      photo_url: self.photo_url,
      created_at: self.created_at,
      updated_at: self.updated_at.unwrap_or(self.created_at),
      featured: self.featured.unwrap_or(false),
      verified: self.verified.unwrap_or(false),
      help_approved: self.help_approved.unwrap_or(false),
    }
  }
}

#[derive(Debug, Serialize)]
pub struct StoryInsert<'a> {
  pub name: &'a str,
  pub email: &'a str,
  pub city: &'a str,
  pub state: &'a str,
  pub category: Category,
  pub title: &'a str,
  pub story: &'a str,
  pub photo_url: Option<&'a str>,
}

impl<'a> From<&'a NewStory> for StoryInsert<'a> {
  fn from(s: &'a NewStory) -> Self {
    Self {
      name: &s.name,
      email: &s.email,
      city: &s.city,
      state: &s.state,
      category: s.category,
      title: &s.title,
      story: &s.story,
      photo_url: s.photo_url.as_deref(),
    }
  }
}

#[derive(Debug, Serialize)]
pub struct HelpApprovalPatch {
  pub help_approved: bool,
}

// ============================================================================
// ngos
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NgoRow {
  pub id: RecordId,
  pub name: String,
  pub email: String,
  pub phone: String,
  #[serde(default)]
  pub website: Option<String>,
  pub description: String,
  #[serde(default)]
  pub focus_areas: Option<Vec<String>>,
  pub city: String,
  pub state: String,
  #[serde(default)]
  pub verified: Option<bool>,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub updated_at: Option<DateTime<Utc>>,
}

impl NgoRow {
  pub fn into_ngo(self) -> Ngo {
    Ngo {
      id: self.id,
      name: self.name,
      email: self.email,
      phone: self.phone,
      website: self.website,
      description: self.description,
      focus_areas: self.focus_areas.unwrap_or_default(),
      city: self.city,
      state: self.state,
      verified: self.verified.unwrap_or(false),
      created_at: self.created_at,
      updated_at: self.updated_at.unwrap_or(self.created_at),
    }
  }
}

#[derive(Debug, Serialize)]
pub struct NgoInsert<'a> {
  pub name: &'a str,
  pub email: &'a str,
  pub phone: &'a str,
  pub website: Option<&'a str>,
  pub description: &'a str,
  pub focus_areas: &'a [String],
  pub city: &'a str,
  pub state: &'a str,
}

impl<'a> From<&'a NewNgo> for NgoInsert<'a> {
  fn from(n: &'a NewNgo) -> Self {
    Self {
      name: &n.name,
      email: &n.email,
      phone: &n.phone,
      website: n.website.as_deref(),
      description: &n.description,
      focus_areas: &n.focus_areas,
      city: &n.city,
      state: &n.state,
    }
  }
}
