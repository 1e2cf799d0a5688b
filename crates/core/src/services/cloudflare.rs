use serde::Deserialize;
use serde_json::{json, Map, Value};
use url::Url;

use crate::registry::schema::{ensure_min, ensure_present, ensure_range, parse_params};
use crate::registry::{
    endpoint, ActionError, BuildRequest, HttpMethod, ServiceActions, UpstreamRequest, Validate,
    ValidationError,
};

pub const BASE_URL: &str = "https://api.cloudflare.com/client/v4";

const ACTIONS: &[&str] = &[
    "list_workers",
    "get_worker",
    "list_kv_namespaces",
    "list_d1_databases",
    "list_dns_records",
    "create_dns_record",
    "purge_cache",
];

fn default_page() -> u64 {
    1
}

fn default_storage_per_page() -> u64 {
    20
}

fn default_dns_per_page() -> u64 {
    50
}

fn default_ttl() -> u64 {
    1
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AccountRef {
    pub account_id: String,
}

impl Validate for AccountRef {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("account_id", &self.account_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct WorkerRef {
    pub account_id: String,
    pub script_name: String,
}

impl Validate for WorkerRef {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("account_id", &self.account_id)?;
        ensure_present("script_name", &self.script_name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AccountListing {
    pub account_id: String,
    #[serde(default = "default_storage_per_page")]
    pub per_page: u64,
    #[serde(default = "default_page")]
    pub page: u64,
}

impl Validate for AccountListing {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("account_id", &self.account_id)?;
        ensure_range("per_page", self.per_page, 1, 100)?;
        ensure_min("page", self.page, 1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ListDnsRecords {
    pub zone_id: String,
    #[serde(rename = "type")]
    pub record_type: Option<String>,
    pub name: Option<String>,
    #[serde(default = "default_dns_per_page")]
    pub per_page: u64,
    #[serde(default = "default_page")]
    pub page: u64,
}

impl Validate for ListDnsRecords {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("zone_id", &self.zone_id)?;
        ensure_range("per_page", self.per_page, 1, 100)?;
        ensure_min("page", self.page, 1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CreateDnsRecord {
    pub zone_id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub content: String,
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    #[serde(default)]
    pub proxied: bool,
}

impl Validate for CreateDnsRecord {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("zone_id", &self.zone_id)?;
        ensure_min("ttl", self.ttl, 1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PurgeCache {
    pub zone_id: String,
    #[serde(default)]
    pub purge_everything: bool,
    pub files: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub hosts: Option<Vec<String>>,
}

impl Validate for PurgeCache {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("zone_id", &self.zone_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloudflareAction {
    ListWorkers(AccountRef),
    GetWorker(WorkerRef),
    ListKvNamespaces(AccountListing),
    ListD1Databases(AccountListing),
    ListDnsRecords(ListDnsRecords),
    CreateDnsRecord(CreateDnsRecord),
    PurgeCache(PurgeCache),
}

impl CloudflareAction {
    pub fn parse(action: &str, params: &Value) -> Result<Self, ActionError> {
        let parsed = match action {
            "list_workers" => Self::ListWorkers(parse_params(params)?),
            "get_worker" => Self::GetWorker(parse_params(params)?),
            "list_kv_namespaces" => Self::ListKvNamespaces(parse_params(params)?),
            "list_d1_databases" => Self::ListD1Databases(parse_params(params)?),
            "list_dns_records" => Self::ListDnsRecords(parse_params(params)?),
            "create_dns_record" => Self::CreateDnsRecord(parse_params(params)?),
            "purge_cache" => Self::PurgeCache(parse_params(params)?),
            other => return Err(ActionError::UnknownAction(other.to_string())),
        };
        Ok(parsed)
    }
}

fn cloudflare_request(method: HttpMethod, url: Url) -> UpstreamRequest {
    UpstreamRequest::new(method, url).with_header("Content-Type", "application/json")
}

fn paging(per_page: u64, page: u64) -> Vec<(&'static str, String)> {
    vec![("per_page", per_page.to_string()), ("page", page.to_string())]
}

impl BuildRequest for CloudflareAction {
    fn build(&self, base_url: &Url) -> UpstreamRequest {
        match self {
            Self::ListWorkers(params) => cloudflare_request(
                HttpMethod::Get,
                endpoint(base_url, &["accounts", &params.account_id, "workers", "scripts"], &[]),
            ),
            Self::GetWorker(params) => {
                let segments: [&str; 5] =
                    ["accounts", &params.account_id, "workers", "scripts", &params.script_name];
                cloudflare_request(HttpMethod::Get, endpoint(base_url, &segments, &[]))
            }
            Self::ListKvNamespaces(params) => {
                let segments: [&str; 5] =
                    ["accounts", &params.account_id, "storage", "kv", "namespaces"];
                cloudflare_request(
                    HttpMethod::Get,
                    endpoint(base_url, &segments, &paging(params.per_page, params.page)),
                )
            }
            Self::ListD1Databases(params) => cloudflare_request(
                HttpMethod::Get,
                endpoint(
                    base_url,
                    &["accounts", &params.account_id, "d1", "database"],
                    &paging(params.per_page, params.page),
                ),
            ),
            Self::ListDnsRecords(params) => {
                let mut query = paging(params.per_page, params.page);
                if let Some(record_type) = &params.record_type {
                    query.push(("type", record_type.clone()));
                }
                if let Some(name) = &params.name {
                    query.push(("name", name.clone()));
                }
                cloudflare_request(
                    HttpMethod::Get,
                    endpoint(base_url, &["zones", &params.zone_id, "dns_records"], &query),
                )
            }
            Self::CreateDnsRecord(params) => cloudflare_request(
                HttpMethod::Post,
                endpoint(base_url, &["zones", &params.zone_id, "dns_records"], &[]),
            )
            .with_json(json!({
                "type": params.record_type,
                "name": params.name,
                "content": params.content,
                "ttl": params.ttl,
                "proxied": params.proxied,
            })),
            Self::PurgeCache(params) => {
                let mut body = Map::new();
                if params.purge_everything {
                    body.insert("purge_everything".to_string(), Value::Bool(true));
                } else {
                    for (field, values) in
                        [("files", &params.files), ("tags", &params.tags), ("hosts", &params.hosts)]
                    {
                        if let Some(values) = values {
                            body.insert(field.to_string(), json!(values));
                        }
                    }
                }
                cloudflare_request(
                    HttpMethod::Post,
                    endpoint(base_url, &["zones", &params.zone_id, "purge_cache"], &[]),
                )
                .with_json(Value::Object(body))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CloudflareActions;

impl ServiceActions for CloudflareActions {
    fn action_names(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn prepare(&self, action: &str, params: &Value) -> Result<Box<dyn BuildRequest>, ActionError> {
        Ok(Box::new(CloudflareAction::parse(action, params)?))
    }
}
