//! The remote resource a list view reads from and mutates.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use shared::{
    domain::{Entity, EntityId, FieldName, ParsedValue, ResourceName},
    error::ApiError,
    protocol::{BulkDeleteRequest, BulkDeleteResponse, PageQuery, PageResponse},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// Nothing reached the server.
    #[error("resource api unavailable: {0}")]
    Unavailable(String),
    #[error("request timed out")]
    Timeout,
    #[error("entity not found")]
    NotFound,
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<PageResponse, ResourceError>;
    async fn bulk_delete(&self, ids: &[EntityId]) -> Result<BulkDeleteResponse, ResourceError>;
    async fn update_field(
        &self,
        id: &EntityId,
        field: &FieldName,
        value: &ParsedValue,
    ) -> Result<Entity, ResourceError>;
}

pub struct MissingResourceApi;

#[async_trait]
impl ResourceApi for MissingResourceApi {
    async fn fetch_page(&self, _query: &PageQuery) -> Result<PageResponse, ResourceError> {
        Err(ResourceError::Unavailable(
            "no resource api configured".to_string(),
        ))
    }

    async fn bulk_delete(&self, _ids: &[EntityId]) -> Result<BulkDeleteResponse, ResourceError> {
        Err(ResourceError::Unavailable(
            "no resource api configured".to_string(),
        ))
    }

    async fn update_field(
        &self,
        id: &EntityId,
        _field: &FieldName,
        _value: &ParsedValue,
    ) -> Result<Entity, ResourceError> {
        Err(ResourceError::Unavailable(format!(
            "no resource api configured for entity {id}"
        )))
    }
}

/// REST binding:
/// `GET {base}/{resource}`, `POST {base}/{resource}/bulk-delete`,
/// `PATCH {base}/{resource}/{id}`.
pub struct HttpResourceApi {
    http: Client,
    base_url: Url,
    resource: ResourceName,
}

impl HttpResourceApi {
    pub fn new(server_url: &str, resource: ResourceName) -> Result<Self, ResourceError> {
        Self::with_client(Client::new(), server_url, resource)
    }

    pub fn with_client(
        http: Client,
        server_url: &str,
        resource: ResourceName,
    ) -> Result<Self, ResourceError> {
        let base_url = Url::parse(server_url).map_err(|err| {
            ResourceError::Unavailable(format!("invalid server url '{server_url}': {err}"))
        })?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(ResourceError::Unavailable(format!(
                "server_url must start with http:// or https://, got '{server_url}'"
            )));
        }
        Ok(Self {
            http,
            base_url,
            resource,
        })
    }

    pub fn resource(&self) -> &ResourceName {
        &self.resource
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push(self.resource.as_str())
                .extend(segments);
        }
        url
    }
}

#[async_trait]
impl ResourceApi for HttpResourceApi {
    async fn fetch_page(&self, query: &PageQuery) -> Result<PageResponse, ResourceError> {
        let mut params = vec![
            ("page".to_string(), query.page.to_string()),
            ("page_size".to_string(), query.page_size.to_string()),
        ];
        params.extend(
            query
                .filters
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        let res = self
            .http
            .get(self.endpoint(&[]))
            .query(&params)
            .send()
            .await
            .map_err(map_transport_error)?;
        let res = check_status(res).await?;
        res.json::<PageResponse>()
            .await
            .map_err(|err| ResourceError::Decode(err.to_string()))
    }

    async fn bulk_delete(&self, ids: &[EntityId]) -> Result<BulkDeleteResponse, ResourceError> {
        debug!(
            "resource: bulk delete resource={} ids={}",
            self.resource,
            ids.len()
        );
        let res = self
            .http
            .post(self.endpoint(&["bulk-delete"]))
            .json(&BulkDeleteRequest { ids: ids.to_vec() })
            .send()
            .await
            .map_err(map_transport_error)?;
        let res = check_status(res).await?;
        res.json::<BulkDeleteResponse>()
            .await
            .map_err(|err| ResourceError::Decode(err.to_string()))
    }

    async fn update_field(
        &self,
        id: &EntityId,
        field: &FieldName,
        value: &ParsedValue,
    ) -> Result<Entity, ResourceError> {
        let mut body = serde_json::Map::new();
        body.insert(field.to_string(), value.clone());
        let id_segment = id.to_string();

        let res = self
            .http
            .patch(self.endpoint(&[id_segment.as_str()]))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        let res = check_status(res).await?;
        res.json::<Entity>()
            .await
            .map_err(|err| ResourceError::Decode(err.to_string()))
    }
}

fn map_transport_error(err: reqwest::Error) -> ResourceError {
    if err.is_timeout() {
        ResourceError::Timeout
    } else if err.is_connect() {
        ResourceError::Unavailable(err.to_string())
    } else {
        ResourceError::Transport(err.to_string())
    }
}

async fn check_status(res: Response) -> Result<Response, ResourceError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ResourceError::NotFound);
    }

    let body = res.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiError>(&body) {
        Ok(api_error) => api_error.message,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body,
    };
    Err(ResourceError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
#[path = "tests/resource_tests.rs"]
mod tests;
