use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{Select, TableBackend};
use crate::error::{Error, Result};

/// PostgREST table API client (`{base}/rest/v1/{table}`).
#[derive(Clone)]
pub struct PostgrestBackend {
  client: reqwest::Client,
  rest_url: Url,
  api_key: String,
}

/// Error body returned by PostgREST on failure.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  /// Postgres SQLSTATE or a `PGRST` code
  code: Option<String>,
  message: String,
}

/// SQLSTATE for a value that cannot be cast to the column type.
const INVALID_TEXT_REPRESENTATION: &str = "22P02";

impl PostgrestBackend {
  pub fn new(base_url: &Url, api_key: String) -> Result<Self> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let rest_url = base
      .join("rest/v1/")
      .map_err(|e| Error::Remote(format!("Invalid backend URL {}: {}", base_url, e)))?;

    Ok(Self {
      client: reqwest::Client::new(),
      rest_url,
      api_key,
    })
  }

  /// Build the URL for a table request, encoding filters the PostgREST way.
  fn table_url(&self, table: &str, query: &Select) -> Result<Url> {
    let mut url = self
      .rest_url
      .join(table)
      .map_err(|e| Error::Remote(format!("Invalid table name {}: {}", table, e)))?;

    {
      let mut pairs = url.query_pairs_mut();
      pairs.append_pair("select", "*");
      for (column, value) in &query.filters {
        pairs.append_pair(column, &format!("eq.{}", value));
      }
      if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        pairs.append_pair("order", &format!("{}.{}", order.column, direction));
      }
      if let Some(limit) = query.limit {
        pairs.append_pair("limit", &limit.to_string());
      }
    }

    Ok(url)
  }

  fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
    self
      .client
      .request(method, url)
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
  }

  async fn read_rows(response: Response) -> Result<Vec<Value>> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
      return Err(remote_error(status, &body));
    }

    Ok(serde_json::from_str(&body)?)
  }
}

/// Prefer the backend's own message; fall back to status and raw body.
fn remote_error(status: StatusCode, body: &str) -> Error {
  match serde_json::from_str::<ApiErrorBody>(body) {
    Ok(api) if api.code.as_deref() == Some(INVALID_TEXT_REPRESENTATION) => {
      Error::InvalidValue(api.message)
    }
    Ok(api) => Error::Remote(api.message),
    Err(_) => Error::Remote(format!("Backend returned {}: {}", status, body.trim())),
  }
}

impl TableBackend for PostgrestBackend {
  async fn select(&self, table: &str, query: &Select) -> Result<Vec<Value>> {
    let url = self.table_url(table, query)?;
    tracing::debug!(table, %url, "Selecting rows");

    let response = self.request(reqwest::Method::GET, url).send().await?;
    Self::read_rows(response).await
  }

  async fn insert(&self, table: &str, row: Value) -> Result<Value> {
    let url = self.table_url(table, &Select::all())?;
    tracing::debug!(table, "Inserting row");

    let response = self
      .request(reqwest::Method::POST, url)
      .header("Prefer", "return=representation")
      .json(&[row])
      .send()
      .await?;

    Self::read_rows(response)
      .await?
      .into_iter()
      .next()
      .ok_or_else(|| Error::Remote(format!("Insert into {} returned no row", table)))
  }

  async fn update(&self, table: &str, query: &Select, patch: Value) -> Result<Vec<Value>> {
    let url = self.table_url(table, query)?;
    tracing::debug!(table, %url, "Updating rows");

    let response = self
      .request(reqwest::Method::PATCH, url)
      .header("Prefer", "return=representation")
      .json(&patch)
      .send()
      .await?;

    Self::read_rows(response).await
  }
}
