use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::registry::schema::{ensure_len, ensure_present, ensure_range, ensure_url, parse_params};
use crate::registry::{
    endpoint, ActionError, BuildRequest, HttpMethod, ServiceActions, UpstreamRequest, Validate,
    ValidationError,
};

pub const BASE_URL: &str = "https://api.tavily.com";

const ACTIONS: &[&str] = &["search", "crawl", "extract"];

fn default_max_results() -> u64 {
    5
}

fn default_max_depth() -> u64 {
    1
}

fn default_max_breadth() -> u64 {
    10
}

fn default_crawl_limit() -> u64 {
    10
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    #[default]
    Basic,
    Advanced,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Search {
    pub query: String,
    #[serde(default)]
    pub search_depth: SearchDepth,
    #[serde(default = "default_max_results")]
    pub max_results: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_domains: Option<Vec<String>>,
    #[serde(default)]
    pub include_raw_content: bool,
    #[serde(default)]
    pub include_images: bool,
}

impl Validate for Search {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("query", &self.query)?;
        ensure_range("max_results", self.max_results, 1, 20)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Crawl {
    pub url: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: u64,
    #[serde(default = "default_max_breadth")]
    pub max_breadth: u64,
    #[serde(default = "default_crawl_limit")]
    pub limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select_domains: Option<Vec<String>>,
}

impl Validate for Crawl {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_url("url", &self.url)?;
        ensure_range("max_depth", self.max_depth, 1, 5)?;
        ensure_range("max_breadth", self.max_breadth, 1, 20)?;
        ensure_range("limit", self.limit, 1, 50)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Extract {
    pub urls: Vec<String>,
    #[serde(default)]
    pub include_images: bool,
}

impl Validate for Extract {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_len("urls", &self.urls, 1, 20)?;
        self.urls.iter().try_for_each(|url| ensure_url("urls", url))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TavilyAction {
    Search(Search),
    Crawl(Crawl),
    Extract(Extract),
}

impl TavilyAction {
    pub fn parse(action: &str, params: &Value) -> Result<Self, ActionError> {
        let parsed = match action {
            "search" => Self::Search(parse_params(params)?),
            "crawl" => Self::Crawl(parse_params(params)?),
            "extract" => Self::Extract(parse_params(params)?),
            other => return Err(ActionError::UnknownAction(other.to_string())),
        };
        Ok(parsed)
    }
}

fn tavily_post(base_url: &Url, path: &str, body: Value) -> UpstreamRequest {
    UpstreamRequest::new(HttpMethod::Post, endpoint(base_url, &[path], &[]))
        .with_header("Content-Type", "application/json")
        .with_json(body)
}

impl BuildRequest for TavilyAction {
    // The api key is merged into these bodies by the registry's body-field strategy.
    fn build(&self, base_url: &Url) -> UpstreamRequest {
        let (path, body) = match self {
            Self::Search(params) => ("search", serde_json::to_value(params)),
            Self::Crawl(params) => ("crawl", serde_json::to_value(params)),
            Self::Extract(params) => ("extract", serde_json::to_value(params)),
        };
        tavily_post(base_url, path, body.unwrap_or(Value::Null))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TavilyActions;

impl ServiceActions for TavilyActions {
    fn action_names(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn prepare(&self, action: &str, params: &Value) -> Result<Box<dyn BuildRequest>, ActionError> {
        Ok(Box::new(TavilyAction::parse(action, params)?))
    }
}
