//! Plain-text rendering for the CLI.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use crate::cache::CacheSource;
use crate::error::Error;
use crate::gateway::types::{FeedStats, Ngo, Story};

pub const PREVIEW_LEN: usize = 120;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let cut: String = s.chars().take(max_len).collect();
    format!("{}...", cut.trim_end())
  }
}

fn capitalize(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().chain(chars).collect(),
    None => String::new(),
  }
}

/// "1 day ago", "N days ago", "1 week ago", "N weeks ago" (whole days rounded up).
pub fn relative_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let millis = (now - at).num_milliseconds().unsigned_abs();
  let days = millis.div_ceil(86_400_000);

  match days {
    0 => "today".to_string(),
    1 => "1 day ago".to_string(),
    2..=6 => format!("{} days ago", days),
    7..=13 => "1 week ago".to_string(),
    _ => format!("{} weeks ago", days.div_ceil(7)),
  }
}

pub fn location(story: &Story) -> String {
  format!("{}, {}", story.city, capitalize(&story.state))
}

fn flags(story: &Story) -> String {
  let mut out = Vec::new();
  if story.featured {
    out.push("featured");
  }
  if story.verified {
    out.push("verified");
  }
  if story.help_approved {
    out.push("helped");
  }
  if out.is_empty() {
    String::new()
  } else {
    format!(" [{}]", out.join(", "))
  }
}

/// One-line feed entry followed by an indented preview.
pub fn story_line(story: &Story, now: DateTime<Utc>) -> String {
  format!(
    "#{:<6} {:<11} {}  ({}, {}){}\n        {}",
    story.id,
    capitalize(story.category.as_str()),
    story.title,
    location(story),
    relative_age(story.created_at, now),
    flags(story),
    truncate(story.story.trim(), PREVIEW_LEN)
  )
}

pub fn word_count(text: &str) -> usize {
  text.split_whitespace().count()
}

pub fn story_detail(story: &Story, now: DateTime<Utc>) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{}", story.title);
  let _ = writeln!(
    out,
    "{} | {} | shared by {} {}{}",
    capitalize(story.category.as_str()),
    location(story),
    story.name,
    relative_age(story.created_at, now),
    flags(story)
  );
  if let Some(photo) = &story.photo_url {
    let _ = writeln!(out, "Photo: {}", photo);
  }
  let _ = writeln!(out);
  let _ = writeln!(out, "{}", story.story.trim());
  let _ = writeln!(out);
  let _ = write!(out, "{} words", word_count(&story.story));
  out
}

pub fn ngo_line(ngo: &Ngo) -> String {
  let verified = if ngo.verified { " [verified]" } else { "" };
  let website = ngo
    .website
    .as_deref()
    .map(|w| format!(" {}", w))
    .unwrap_or_default();
  format!(
    "{}{}  ({}, {})\n        focus: {} | {} {}{}",
    ngo.name,
    verified,
    ngo.city,
    capitalize(&ngo.state),
    ngo.focus_areas.join(", "),
    ngo.email,
    ngo.phone,
    website
  )
}

pub fn stats(stats: &FeedStats) -> String {
  format!(
    "Stories shared:   {}\nFamilies helped:  {}\nNGOs connected:   {}\nCities covered:   {}",
    stats.stories_shared, stats.families_helped, stats.ngos_connected, stats.cities_covered
  )
}

/// Footer noting where the data came from, if not live.
pub fn source_note(source: CacheSource, cached_at: Option<DateTime<Utc>>) -> Option<String> {
  match (source, cached_at) {
    (CacheSource::Network, _) => None,
    (other, Some(at)) => Some(format!(
      "({}, fetched {})",
      other.label(),
      at.format("%H:%M:%S")
    )),
    (other, None) => Some(format!("({})", other.label())),
  }
}

/// User-facing message for a failed command.
pub fn error_message(error: &Error) -> String {
  match error {
    Error::Validation(fields) => {
      let mut out = String::from("Please fix the following:");
      for (field, messages) in fields.iter() {
        for message in messages {
          let _ = write!(out, "\n  {}: {}", field, message);
        }
      }
      out
    }
    Error::NotFound { resource, id } => {
      format!("No {} with id {}. It may have been removed.", resource, id)
    }
    other => format!("Error: {}", other),
  }
}
