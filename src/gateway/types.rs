//! Domain types in the application-side (camelCase) naming convention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::error::{Error, FieldErrors, Result};

/// Opaque server-assigned identifier.
///
/// Story ids come back as integers and NGO ids as UUID strings; both are
/// carried as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for RecordId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(&self.0)
  }
}

impl From<&str> for RecordId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for RecordId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl<'de> Deserialize<'de> for RecordId {
  fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
      Int(i64),
      Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
      Raw::Int(n) => RecordId(n.to_string()),
      Raw::Text(s) => RecordId(s),
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Education,
  Health,
  Livelihood,
  Other,
}

impl Category {
  pub const ALL: [Category; 4] = [
    Category::Education,
    Category::Health,
    Category::Livelihood,
    Category::Other,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Category::Education => "education",
      Category::Health => "health",
      Category::Livelihood => "livelihood",
      Category::Other => "other",
    }
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Category {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let wanted = s.trim().to_lowercase();
    Category::ALL
      .into_iter()
      .find(|c| c.as_str() == wanted)
      .ok_or_else(|| {
        Error::field(
          "category",
          format!(
            "Category must be one of education, health, livelihood, other (got '{}')",
            s
          ),
        )
      })
  }
}

/// A story as seen by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
  pub id: RecordId,
  pub name: String,
  pub email: String,
  pub city: String,
  pub state: String,
  pub category: Category,
  pub title: String,
  pub story: String,
  pub photo_url: Option<String>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub featured: bool,
  pub verified: bool,
  pub help_approved: bool,
}

/// An NGO / volunteer registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ngo {
  pub id: RecordId,
  pub name: String,
  pub email: String,
  pub phone: String,
  pub website: Option<String>,
  pub description: String,
  pub focus_areas: Vec<String>,
  pub city: String,
  pub state: String,
  pub verified: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Fields submitted when sharing a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewStory {
  #[validate(length(min = 1, message = "Name is required"))]
  pub name: String,
  #[validate(email(message = "Valid email is required"))]
  pub email: String,
  #[validate(length(min = 1, message = "City is required"))]
  pub city: String,
  #[validate(length(min = 1, message = "State is required"))]
  pub state: String,
  pub category: Category,
  #[validate(length(min = 1, message = "Title is required"))]
  pub title: String,
  #[validate(length(min = 1, message = "Story is required"))]
  pub story: String,
  #[serde(default)]
  #[validate(url(message = "Photo URL must be a valid URL"))]
  pub photo_url: Option<String>,
}

impl NewStory {
  /// Check the shape constraints and return the submission ready to send.
  ///
  /// An empty photo URL counts as no photo.
  pub fn prepared(mut self) -> Result<Self> {
    self.photo_url = self.photo_url.filter(|u| !u.trim().is_empty());

    let mut errors: FieldErrors = match self.validate() {
      Ok(()) => FieldErrors::new(),
      Err(e) => e.into(),
    };
    for (field, value, message) in [
      ("name", &self.name, "Name is required"),
      ("city", &self.city, "City is required"),
      ("state", &self.state, "State is required"),
      ("title", &self.title, "Title is required"),
      ("story", &self.story, "Story is required"),
    ] {
      if value.trim().is_empty() && !errors.contains(field) {
        errors.add(field, message);
      }
    }
    errors.into_result()?;

    Ok(self)
  }
}

/// Fields submitted when an NGO registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewNgo {
  #[validate(length(min = 1, message = "NGO name is required"))]
  pub name: String,
  #[validate(email(message = "Valid email is required"))]
  pub email: String,
  #[validate(length(min = 10, message = "Valid phone number is required"))]
  pub phone: String,
  #[serde(default)]
  #[validate(url(message = "Website must be a valid URL"))]
  pub website: Option<String>,
  #[validate(length(min = 1, message = "Description is required"))]
  pub description: String,
  #[serde(default)]
  #[validate(length(min = 1, message = "At least one focus area is required"))]
  pub focus_areas: Vec<String>,
  #[validate(length(min = 1, message = "City is required"))]
  pub city: String,
  #[validate(length(min = 1, message = "State is required"))]
  pub state: String,
}

impl NewNgo {
  /// Check the shape constraints and return the registration ready to send.
  ///
  /// Focus areas are treated as a set of lowercase tags: blanks are
  /// dropped and repeats collapse onto their first occurrence.
  pub fn prepared(mut self) -> Result<Self> {
    self.website = self.website.filter(|w| !w.trim().is_empty());

    let mut seen = BTreeSet::new();
    self.focus_areas = self
      .focus_areas
      .into_iter()
      .map(|area| area.trim().to_lowercase())
      .filter(|area| !area.is_empty() && seen.insert(area.clone()))
      .collect();

    let mut errors: FieldErrors = match self.validate() {
      Ok(()) => FieldErrors::new(),
      Err(e) => e.into(),
    };
    for (field, value, message) in [
      ("name", &self.name, "NGO name is required"),
      ("description", &self.description, "Description is required"),
      ("city", &self.city, "City is required"),
      ("state", &self.state, "State is required"),
    ] {
      if value.trim().is_empty() && !errors.contains(field) {
        errors.add(field, message);
      }
    }
    errors.into_result()?;

    Ok(self)
  }
}

/// Turn a state name into the slug form used by filters ("Tamil Nadu" -> "tamil-nadu").
pub fn state_slug(state: &str) -> String {
  state
    .split_whitespace()
    .collect::<Vec<_>>()
    .join("-")
    .to_lowercase()
}

/// Feed filters. `None` means "all".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct StoryFilter {
  pub category: Option<Category>,
  pub state: Option<String>,
  pub search: Option<String>,
}

impl StoryFilter {
  /// Build a filter, treating blank values and "all" as no filter.
  pub fn new(category: Option<Category>, state: Option<&str>, search: Option<&str>) -> Self {
    let state = state
      .map(state_slug)
      .filter(|s| !s.is_empty() && s != "all");
    let search = search
      .map(|s| s.trim().to_lowercase())
      .filter(|s| !s.is_empty());

    Self {
      category,
      state,
      search,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.category.is_none() && self.state.is_none() && self.search.is_none()
  }

  pub fn matches(&self, story: &Story) -> bool {
    if let Some(category) = self.category {
      if story.category != category {
        return false;
      }
    }

    if let Some(state) = &self.state {
      if state_slug(&story.state) != *state {
        return false;
      }
    }

    if let Some(search) = &self.search {
      let haystacks = [&story.title, &story.story, &story.city, &story.state];
      if !haystacks
        .iter()
        .any(|h| h.to_lowercase().contains(search.as_str()))
      {
        return false;
      }
    }

    true
  }

  /// Keep only matching stories, preserving order.
  pub fn apply(&self, stories: Vec<Story>) -> Vec<Story> {
    if self.is_empty() {
      return stories;
    }
    stories.into_iter().filter(|s| self.matches(s)).collect()
  }
}

/// Headline numbers for the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
  pub stories_shared: usize,
  pub families_helped: usize,
  pub ngos_connected: usize,
  pub cities_covered: usize,
}

impl FeedStats {
  pub fn from_feed(stories: &[Story], ngos: &[Ngo]) -> Self {
    let cities: BTreeSet<String> = stories
      .iter()
      .map(|s| s.city.trim().to_lowercase())
      .filter(|c| !c.is_empty())
      .collect();

    Self {
      stories_shared: stories.len(),
      families_helped: stories.iter().filter(|s| s.help_approved).count(),
      ngos_connected: ngos.len(),
      cities_covered: cities.len(),
    }
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use chrono::TimeZone;

  pub(crate) fn new_story() -> NewStory {
    NewStory {
      name: "Asha".to_string(),
      email: "asha@x.com".to_string(),
      city: "Pune".to_string(),
      state: "maharashtra".to_string(),
      category: Category::Education,
      title: "Need books".to_string(),
      story: "Our village school has no library.".to_string(),
      photo_url: None,
    }
  }

  pub(crate) fn new_ngo() -> NewNgo {
    NewNgo {
      name: "Pustak Mitra".to_string(),
      email: "hello@pustak.org".to_string(),
      phone: "9876543210".to_string(),
      website: Some("https://pustak.org".to_string()),
      description: "Books for rural schools".to_string(),
      focus_areas: vec!["education".to_string()],
      city: "Pune".to_string(),
      state: "maharashtra".to_string(),
    }
  }

  pub(crate) fn story(id: &str, title: &str, city: &str, state: &str) -> Story {
    let at = Utc.with_ymd_and_hms(2024, 8, 15, 10, 0, 0).unwrap();
    Story {
      id: RecordId::new(id),
      name: "Asha".to_string(),
      email: "asha@x.com".to_string(),
      city: city.to_string(),
      state: state.to_string(),
      category: Category::Education,
      title: title.to_string(),
      story: "body".to_string(),
      photo_url: None,
      created_at: at,
      updated_at: at,
      featured: false,
      verified: false,
      help_approved: false,
    }
  }

  #[test]
  fn test_record_id_from_number_or_string() {
    let n: RecordId = serde_json::from_str("42").unwrap();
    let s: RecordId = serde_json::from_str("\"a1b2\"").unwrap();
    assert_eq!(n.as_str(), "42");
    assert_eq!(s.as_str(), "a1b2");
    assert_eq!(serde_json::to_string(&n).unwrap(), "\"42\"");
  }

  #[test]
  fn test_category_parse() {
    assert_eq!("Health".parse::<Category>().unwrap(), Category::Health);
    let err = "sports".parse::<Category>().unwrap_err();
    assert!(matches!(err, Error::Validation(ref f) if f.contains("category")));
  }

  #[test]
  fn test_valid_story_passes() {
    let prepared = new_story().prepared().unwrap();
    assert_eq!(prepared, new_story());
  }

  #[test]
  fn test_blank_title_and_bad_email_rejected() {
    let mut story = new_story();
    story.title = "   ".to_string();
    story.email = "not-an-email".to_string();

    match story.prepared() {
      Err(Error::Validation(errors)) => {
        assert_eq!(errors.messages("title"), ["Title is required"]);
        assert_eq!(errors.messages("email"), ["Valid email is required"]);
      }
      other => panic!("expected validation error, got {:?}", other),
    }
  }

  #[test]
  fn test_empty_photo_url_means_none() {
    let mut story = new_story();
    story.photo_url = Some(String::new());
    assert_eq!(story.prepared().unwrap().photo_url, None);
  }

  #[test]
  fn test_invalid_photo_url_rejected() {
    let mut story = new_story();
    story.photo_url = Some("not a url".to_string());
    let err = story.prepared().unwrap_err();
    assert!(matches!(err, Error::Validation(ref f) if f.contains("photo_url")));
  }

  #[test]
  fn test_ngo_requires_focus_area() {
    let mut ngo = new_ngo();
    ngo.focus_areas = vec![];
    match ngo.prepared() {
      Err(Error::Validation(errors)) => {
        assert_eq!(
          errors.messages("focus_areas"),
          ["At least one focus area is required"]
        );
      }
      other => panic!("expected validation error, got {:?}", other),
    }
  }

  #[test]
  fn test_ngo_focus_areas_are_a_set() {
    let mut ngo = new_ngo();
    ngo.focus_areas = vec![
      "health".to_string(),
      " education ".to_string(),
      "health".to_string(),
      "".to_string(),
    ];
    let prepared = ngo.prepared().unwrap();
    assert_eq!(prepared.focus_areas, vec!["health", "education"]);
  }

  #[test]
  fn test_ngo_focus_areas_lowercased() {
    let mut ngo = new_ngo();
    ngo.focus_areas = vec!["Education".to_string(), "education".to_string(), "Sports".to_string()];
    let ngo = ngo.prepared().unwrap();
    assert_eq!(ngo.focus_areas, vec!["education", "sports"]);
  }

  #[test]
  fn test_ngo_short_phone_rejected() {
    let mut ngo = new_ngo();
    ngo.phone = "12345".to_string();
    let err = ngo.prepared().unwrap_err();
    assert!(matches!(err, Error::Validation(ref f) if f.contains("phone")));
  }

  #[test]
  fn test_state_slug() {
    assert_eq!(state_slug("Tamil Nadu"), "tamil-nadu");
    assert_eq!(state_slug("  Jammu and  Kashmir "), "jammu-and-kashmir");
    assert_eq!(state_slug("tamil-nadu"), "tamil-nadu");
  }

  #[test]
  fn test_filter_all_is_empty() {
    let filter = StoryFilter::new(None, Some("all"), Some("  "));
    assert!(filter.is_empty());
  }

  #[test]
  fn test_filter_matches_state_and_search() {
    let stories = vec![
      story("1", "Need books", "Pune", "maharashtra"),
      story("2", "Clean water", "Chennai", "Tamil Nadu"),
      story("3", "Books for girls", "Madurai", "tamil-nadu"),
    ];

    let filter = StoryFilter::new(None, Some("Tamil Nadu"), Some("BOOKS"));
    let ids: Vec<_> = filter
      .apply(stories)
      .into_iter()
      .map(|s| s.id.to_string())
      .collect();
    assert_eq!(ids, vec!["3"]);
  }

  #[test]
  fn test_feed_stats() {
    let mut helped = story("1", "a", "Pune", "maharashtra");
    helped.help_approved = true;
    let stories = vec![
      helped,
      story("2", "b", "pune", "maharashtra"),
      story("3", "c", "Nagpur", "maharashtra"),
    ];

    let stats = FeedStats::from_feed(&stories, &[]);
    assert_eq!(stats.stories_shared, 3);
    assert_eq!(stats.families_helped, 1);
    assert_eq!(stats.cities_covered, 2);
    assert_eq!(stats.ngos_connected, 0);
  }
}
