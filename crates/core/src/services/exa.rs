use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::registry::schema::{ensure_len, ensure_present, ensure_range, ensure_url, parse_params};
use crate::registry::{
    endpoint, ActionError, BuildRequest, HttpMethod, ServiceActions, UpstreamRequest, Validate,
    ValidationError,
};

pub const BASE_URL: &str = "https://api.exa.ai";

const ACTIONS: &[&str] = &["search", "find_similar", "get_contents"];

fn default_num_results() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Auto,
    Keyword,
    Neural,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TextOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_characters: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct HighlightOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_sentences: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ContentOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlights: Option<HighlightOptions>,
}

/// Date and domain filters shared by search and find_similar.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Filters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_domains: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_published_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_published_date: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Search {
    pub query: String,
    #[serde(default = "default_num_results")]
    pub num_results: u64,
    #[serde(default, rename = "type")]
    pub search_type: SearchType,
    #[serde(default = "default_true")]
    pub use_autoprompt: bool,
    #[serde(flatten)]
    pub filters: Filters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_crawl_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_crawl_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<ContentOptions>,
}

impl Validate for Search {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("query", &self.query)?;
        ensure_range("num_results", self.num_results, 1, 100)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FindSimilar {
    pub url: String,
    #[serde(default = "default_num_results")]
    pub num_results: u64,
    #[serde(flatten)]
    pub filters: Filters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<ContentOptions>,
}

impl Validate for FindSimilar {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_url("url", &self.url)?;
        ensure_range("num_results", self.num_results, 1, 100)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GetContents {
    pub ids: Vec<String>,
    #[serde(flatten)]
    pub options: ContentOptions,
}

impl Validate for GetContents {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_len("ids", &self.ids, 1, usize::MAX)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExaAction {
    Search(Search),
    FindSimilar(FindSimilar),
    GetContents(GetContents),
}

impl ExaAction {
    pub fn parse(action: &str, params: &Value) -> Result<Self, ActionError> {
        let parsed = match action {
            "search" => Self::Search(parse_params(params)?),
            "find_similar" => Self::FindSimilar(parse_params(params)?),
            "get_contents" => Self::GetContents(parse_params(params)?),
            other => return Err(ActionError::UnknownAction(other.to_string())),
        };
        Ok(parsed)
    }
}

impl BuildRequest for ExaAction {
    fn build(&self, base_url: &Url) -> UpstreamRequest {
        let (path, body) = match self {
            Self::Search(params) => ("search", serde_json::to_value(params)),
            Self::FindSimilar(params) => ("findSimilar", serde_json::to_value(params)),
            Self::GetContents(params) => ("contents", serde_json::to_value(params)),
        };
        UpstreamRequest::new(HttpMethod::Post, endpoint(base_url, &[path], &[]))
            .with_header("Content-Type", "application/json")
            .with_json(body.unwrap_or(Value::Null))
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ExaActions;

impl ServiceActions for ExaActions {
    fn action_names(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn prepare(&self, action: &str, params: &Value) -> Result<Box<dyn BuildRequest>, ActionError> {
        Ok(Box::new(ExaAction::parse(action, params)?))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::{ExaAction, BASE_URL};
    use crate::registry::BuildRequest;

    fn base() -> Url {
        Url::parse(BASE_URL).expect("base url")
    }

    #[test]
    fn find_similar_maps_to_camel_case_path() {
        let action = ExaAction::parse("find_similar", &json!({"url": "https://grove.place"}))
            .expect("parse");
        let request = action.build(&base());
        assert_eq!(request.url.as_str(), "https://api.exa.ai/findSimilar");
        assert_eq!(request.body, Some(json!({"url": "https://grove.place", "num_results": 10})));
    }

    #[test]
    fn search_flattens_filters_and_keeps_defaults() {
        let action = ExaAction::parse(
            "search",
            &json!({"query": "q", "include_domains": ["grove.place"], "bogus": 1}),
        )
        .expect("parse");
        assert_eq!(
            action.build(&base()).body,
            Some(json!({
                "query": "q",
                "num_results": 10,
                "type": "auto",
                "use_autoprompt": true,
                "include_domains": ["grove.place"]
            }))
        );
    }

    #[test]
    fn get_contents_requires_ids() {
        assert!(ExaAction::parse("get_contents", &json!({"ids": []})).is_err());
        let action = ExaAction::parse(
            "get_contents",
            &json!({"ids": ["doc-1"], "text": {"max_characters": 500}}),
        )
        .expect("parse");
        let request = action.build(&base());
        assert_eq!(request.url.as_str(), "https://api.exa.ai/contents");
        assert_eq!(request.body, Some(json!({"ids": ["doc-1"], "text": {"max_characters": 500.0}})));
    }
}
