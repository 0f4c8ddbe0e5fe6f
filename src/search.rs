//! HTTP client for the travel inventory service.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::ports::TravelSearch;
use crate::types::{SearchOption, SearchQuery, SearchResults};

pub struct HttpTravelSearch {
    http: reqwest::Client,
    config: SearchConfig,
}

impl HttpTravelSearch {
    pub fn new(http: reqwest::Client, config: SearchConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{route}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.api_key.trim().is_empty() {
            request
        } else {
            request.bearer_auth(&self.config.api_key)
        }
    }

    async fn read(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                service: "search",
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }
}

#[async_trait]
impl TravelSearch for HttpTravelSearch {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResults> {
        let request = self.authorize(self.http.post(self.url("search")).json(query));
        let body = Self::read(request.send().await?).await?;
        match body {
            Value::Array(_) => Ok(SearchResults {
                options: serde_json::from_value(body)?,
            }),
            other => Ok(serde_json::from_value(other)?),
        }
    }

    async fn option_media(&self, option: &SearchOption) -> Result<Vec<String>> {
        let request = self.authorize(
            self.http
                .get(self.url("media"))
                .query(&[("hotel", option.hotel.as_str())]),
        );
        let body = Self::read(request.send().await?).await?;
        let items = match &body {
            Value::Array(items) => items.as_slice(),
            other => other
                .get("images")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
        };
        Ok(items
            .iter()
            .filter_map(|item| item.as_str().or_else(|| item.get("url").and_then(Value::as_str)))
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect())
    }
}
