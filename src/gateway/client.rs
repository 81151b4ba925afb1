use serde_json::Value;
use std::sync::Arc;

use crate::backend::{Select, TableBackend, NGOS_TABLE, STORIES_TABLE};
use crate::error::{Error, Result};
use crate::gateway::api_types::{
  decode, HelpApprovalPatch, NgoInsert, NgoRow, StoryInsert, StoryRow,
};
use crate::gateway::operation::Operation;
use crate::gateway::types::{NewNgo, NewStory, Ngo, RecordId, Story};

/// Remote data gateway: logical operations over the table API.
///
/// One round trip per call and no retries; rows come back normalized.
pub struct Gateway<B> {
  backend: Arc<B>,
}

impl<B> Clone for Gateway<B> {
  fn clone(&self) -> Self {
    Self {
      backend: Arc::clone(&self.backend),
    }
  }
}

impl<B: TableBackend> Gateway<B> {
  pub fn new(backend: B) -> Self {
    Self {
      backend: Arc::new(backend),
    }
  }

  /// All stories, newest first
  pub async fn list_stories(&self) -> Result<Vec<Story>> {
    let rows = self
      .backend
      .select(STORIES_TABLE, &Select::all().order_desc("created_at"))
      .await?;

    rows
      .into_iter()
      .map(|row| decode::<StoryRow>(row).map(StoryRow::into_story))
      .collect()
  }

  /// A single story by id
  pub async fn get_story(&self, id: &RecordId) -> Result<Story> {
    let rows = self
      .backend
      .select(STORIES_TABLE, &Select::all().eq("id", id).limit(1))
      .await
      .map_err(|e| unreadable_id(id, e))?;

    let row = rows.into_iter().next().ok_or_else(|| Error::NotFound {
      resource: "story",
      id: id.to_string(),
    })?;

    Ok(decode::<StoryRow>(row)?.into_story())
  }

  /// Validate and insert a story; returns the stored record
  pub async fn create_story(&self, fields: NewStory) -> Result<Story> {
    let fields = fields.prepared()?;
    let row = serde_json::to_value(StoryInsert::from(&fields))?;

    let stored = self.backend.insert(STORIES_TABLE, row).await?;
    let story = decode::<StoryRow>(stored)?.into_story();

    tracing::info!(id = %story.id, category = %story.category, "Story submitted");
    Ok(story)
  }

  /// Validate and insert an NGO registration
  pub async fn create_ngo(&self, fields: NewNgo) -> Result<Ngo> {
    let fields = fields.prepared()?;
    let row = serde_json::to_value(NgoInsert::from(&fields))?;

    let stored = self.backend.insert(NGOS_TABLE, row).await?;
    let ngo = decode::<NgoRow>(stored)?.into_ngo();

    tracing::info!(id = %ngo.id, "NGO registered");
    Ok(ngo)
  }

  /// All NGO registrations, newest first
  pub async fn list_ngos(&self) -> Result<Vec<Ngo>> {
    let rows = self
      .backend
      .select(NGOS_TABLE, &Select::all().order_desc("created_at"))
      .await?;

    rows
      .into_iter()
      .map(|row| decode::<NgoRow>(row).map(NgoRow::into_ngo))
      .collect()
  }

  /// Administrative action: mark a story as helped
  pub async fn approve_help(&self, id: &RecordId) -> Result<Story> {
    let patch = serde_json::to_value(HelpApprovalPatch {
      help_approved: true,
    })?;

    let rows = self
      .backend
      .update(STORIES_TABLE, &Select::all().eq("id", id), patch)
      .await
      .map_err(|e| unreadable_id(id, e))?;

    let row = rows.into_iter().next().ok_or_else(|| Error::NotFound {
      resource: "story",
      id: id.to_string(),
    })?;

    tracing::info!(%id, "Help approved");
    Ok(decode::<StoryRow>(row)?.into_story())
  }

  /// Execute a routed operation and return the normalized record(s) as JSON.
  pub async fn request(&self, operation: Operation) -> Result<Value> {
    let value = match operation {
      Operation::ListStories => serde_json::to_value(self.list_stories().await?)?,
      Operation::GetStory(id) => serde_json::to_value(self.get_story(&id).await?)?,
      Operation::CreateStory(fields) => serde_json::to_value(self.create_story(fields).await?)?,
      Operation::ListNgos => serde_json::to_value(self.list_ngos().await?)?,
      Operation::CreateNgo(fields) => serde_json::to_value(self.create_ngo(fields).await?)?,
      Operation::ApproveHelp(id) => serde_json::to_value(self.approve_help(&id).await?)?,
    };
    Ok(value)
  }
}

/// An id the backend cannot even parse matches no story.
fn unreadable_id(id: &RecordId, error: Error) -> Error {
  match error {
    Error::InvalidValue(_) => Error::NotFound {
      resource: "story",
      id: id.to_string(),
    },
    other => other,
  }
}
