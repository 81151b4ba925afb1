//! Command-line surface: subcommands and their arguments.

use clap::{Args, Subcommand};

use crate::gateway::types::{Category, NewNgo, NewStory, RecordId, StoryFilter};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// List the story feed, newest first
  Stories {
    #[command(flatten)]
    filter: FilterArgs,
    /// Show at most this many stories
    #[arg(short, long)]
    limit: Option<usize>,
  },
  /// Show one story in full
  Story {
    id: String,
  },
  /// Share a story
  Submit(SubmitArgs),
  /// Register an NGO as a potential helper
  RegisterNgo(RegisterNgoArgs),
  /// List stories still waiting for help (moderation)
  Review,
  /// Mark a story as helped (moderation)
  ApproveHelp {
    id: String,
  },
  /// List registered NGOs
  Ngos,
  /// Headline numbers for the feed
  Stats,
  /// Call an API endpoint directly, e.g. `request GET /api/stories`
  Request {
    method: String,
    endpoint: String,
    /// JSON request body
    #[arg(long)]
    body: Option<String>,
  },
  /// Keep the feed on screen and refresh it as stories change
  Watch {
    #[command(flatten)]
    filter: FilterArgs,
    #[arg(short, long)]
    limit: Option<usize>,
  },
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
  #[arg(short, long, value_enum)]
  pub category: Option<Category>,
  /// State name or slug ("all" for every state)
  #[arg(short, long)]
  pub state: Option<String>,
  /// Match title, story text, city or state
  #[arg(short = 'q', long)]
  pub search: Option<String>,
}

impl FilterArgs {
  pub fn to_filter(&self) -> StoryFilter {
    StoryFilter::new(
      self.category,
      self.state.as_deref(),
      self.search.as_deref(),
    )
  }
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
  #[arg(long)]
  pub name: String,
  #[arg(long)]
  pub email: String,
  #[arg(long)]
  pub city: String,
  #[arg(long)]
  pub state: String,
  #[arg(long, value_enum)]
  pub category: Category,
  #[arg(long)]
  pub title: String,
  #[arg(long)]
  pub story: String,
  #[arg(long)]
  pub photo_url: Option<String>,
}

impl From<SubmitArgs> for NewStory {
  fn from(args: SubmitArgs) -> Self {
    NewStory {
      name: args.name,
      email: args.email,
      city: args.city,
      state: args.state,
      category: args.category,
      title: args.title,
      story: args.story,
      photo_url: args.photo_url,
    }
  }
}

#[derive(Args, Debug, Clone)]
pub struct RegisterNgoArgs {
  #[arg(long)]
  pub name: String,
  #[arg(long)]
  pub email: String,
  #[arg(long)]
  pub phone: String,
  #[arg(long)]
  pub website: Option<String>,
  #[arg(long)]
  pub description: String,
  /// Repeat for several areas: education, health, livelihood, infrastructure,
  /// women-empowerment, child-welfare, environmental, other
  #[arg(long = "focus-area")]
  pub focus_areas: Vec<String>,
  #[arg(long)]
  pub city: String,
  #[arg(long)]
  pub state: String,
}

impl From<RegisterNgoArgs> for NewNgo {
  fn from(args: RegisterNgoArgs) -> Self {
    NewNgo {
      name: args.name,
      email: args.email,
      phone: args.phone,
      website: args.website,
      description: args.description,
      focus_areas: args.focus_areas,
      city: args.city,
      state: args.state,
    }
  }
}

pub fn record_id(raw: &str) -> RecordId {
  RecordId::new(raw.trim())
}
