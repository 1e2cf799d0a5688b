use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use crate::registry::schema::{ensure_min, ensure_present, ensure_range, parse_params};
use crate::registry::{
    endpoint, ActionError, BuildRequest, HttpMethod, ServiceActions, UpstreamRequest, Validate,
    ValidationError,
};

pub const BASE_URL: &str = "https://api.github.com";

const ACTIONS: &[&str] = &[
    "list_repos",
    "get_repo",
    "get_issue",
    "list_issues",
    "create_issue",
    "create_comment",
    "list_workflow_runs",
    "trigger_workflow",
];

fn default_per_page() -> u64 {
    30
}

fn default_runs_per_page() -> u64 {
    10
}

fn default_page() -> u64 {
    1
}

fn default_ref() -> String {
    "main".to_string()
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    #[default]
    Open,
    Closed,
    All,
}

impl IssueState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::All => "all",
        }
    }
}

/// Workflows are addressed by numeric id or file name.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum WorkflowId {
    Id(u64),
    File(String),
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::File(name) => f.write_str(name),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ListRepos {
    pub owner: Option<String>,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    #[serde(default = "default_page")]
    pub page: u64,
}

impl Validate for ListRepos {
    fn validate(&self) -> Result<(), ValidationError> {
        if let Some(owner) = &self.owner {
            ensure_present("owner", owner)?;
        }
        ensure_range("per_page", self.per_page, 1, 100)?;
        ensure_min("page", self.page, 1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl Validate for RepoRef {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("owner", &self.owner)?;
        ensure_present("repo", &self.repo)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IssueRef {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
}

impl Validate for IssueRef {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("owner", &self.owner)?;
        ensure_present("repo", &self.repo)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ListIssues {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub state: IssueState,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
    #[serde(default = "default_page")]
    pub page: u64,
}

impl Validate for ListIssues {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("owner", &self.owner)?;
        ensure_present("repo", &self.repo)?;
        ensure_range("per_page", self.per_page, 1, 100)?;
        ensure_min("page", self.page, 1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CreateIssue {
    pub owner: String,
    pub repo: String,
    pub title: String,
    pub body: Option<String>,
    pub labels: Option<Vec<String>>,
    pub assignees: Option<Vec<String>>,
}

impl Validate for CreateIssue {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("owner", &self.owner)?;
        ensure_present("repo", &self.repo)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct CreateComment {
    pub owner: String,
    pub repo: String,
    pub issue_number: u64,
    pub body: String,
}

impl Validate for CreateComment {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("owner", &self.owner)?;
        ensure_present("repo", &self.repo)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ListWorkflowRuns {
    pub owner: String,
    pub repo: String,
    pub workflow_id: Option<WorkflowId>,
    #[serde(default = "default_runs_per_page")]
    pub per_page: u64,
}

impl Validate for ListWorkflowRuns {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("owner", &self.owner)?;
        ensure_present("repo", &self.repo)?;
        ensure_range("per_page", self.per_page, 1, 100)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct TriggerWorkflow {
    pub owner: String,
    pub repo: String,
    pub workflow_id: WorkflowId,
    #[serde(default = "default_ref", rename = "ref")]
    pub git_ref: String,
    pub inputs: Option<BTreeMap<String, String>>,
}

impl Validate for TriggerWorkflow {
    fn validate(&self) -> Result<(), ValidationError> {
        ensure_present("owner", &self.owner)?;
        ensure_present("repo", &self.repo)?;
        ensure_present("ref", &self.git_ref)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GithubAction {
    ListRepos(ListRepos),
    GetRepo(RepoRef),
    GetIssue(IssueRef),
    ListIssues(ListIssues),
    CreateIssue(CreateIssue),
    CreateComment(CreateComment),
    ListWorkflowRuns(ListWorkflowRuns),
    TriggerWorkflow(TriggerWorkflow),
}

impl GithubAction {
    pub fn parse(action: &str, params: &Value) -> Result<Self, ActionError> {
        let parsed = match action {
            "list_repos" => Self::ListRepos(parse_params(params)?),
            "get_repo" => Self::GetRepo(parse_params(params)?),
            "get_issue" => Self::GetIssue(parse_params(params)?),
            "list_issues" => Self::ListIssues(parse_params(params)?),
            "create_issue" => Self::CreateIssue(parse_params(params)?),
            "create_comment" => Self::CreateComment(parse_params(params)?),
            "list_workflow_runs" => Self::ListWorkflowRuns(parse_params(params)?),
            "trigger_workflow" => Self::TriggerWorkflow(parse_params(params)?),
            other => return Err(ActionError::UnknownAction(other.to_string())),
        };
        Ok(parsed)
    }
}

fn github_request(method: HttpMethod, url: Url) -> UpstreamRequest {
    UpstreamRequest::new(method, url)
        .with_header("Accept", "application/vnd.github+json")
        .with_header("X-GitHub-Api-Version", "2022-11-28")
        .with_header("User-Agent", concat!("warden/", env!("CARGO_PKG_VERSION")))
}

fn paging(per_page: u64, page: u64) -> Vec<(&'static str, String)> {
    vec![("per_page", per_page.to_string()), ("page", page.to_string())]
}

impl BuildRequest for GithubAction {
    fn build(&self, base_url: &Url) -> UpstreamRequest {
        match self {
            Self::ListRepos(params) => {
                let query = paging(params.per_page, params.page);
                let url = match &params.owner {
                    Some(owner) => endpoint(base_url, &["users", owner, "repos"], &query),
                    None => endpoint(base_url, &["user", "repos"], &query),
                };
                github_request(HttpMethod::Get, url)
            }
            Self::GetRepo(params) => github_request(
                HttpMethod::Get,
                endpoint(base_url, &["repos", &params.owner, &params.repo], &[]),
            ),
            Self::GetIssue(params) => {
                let number = params.issue_number.to_string();
                github_request(
                    HttpMethod::Get,
                    endpoint(
                        base_url,
                        &["repos", &params.owner, &params.repo, "issues", &number],
                        &[],
                    ),
                )
            }
            Self::ListIssues(params) => {
                let mut query = vec![("state", params.state.as_str().to_string())];
                query.extend(paging(params.per_page, params.page));
                github_request(
                    HttpMethod::Get,
                    endpoint(base_url, &["repos", &params.owner, &params.repo, "issues"], &query),
                )
            }
            Self::CreateIssue(params) => github_request(
                HttpMethod::Post,
                endpoint(base_url, &["repos", &params.owner, &params.repo, "issues"], &[]),
            )
            .with_header("Content-Type", "application/json")
            .with_json(json!({
                "title": params.title,
                "body": params.body,
                "labels": params.labels,
                "assignees": params.assignees,
            })),
            Self::CreateComment(params) => {
                let number = params.issue_number.to_string();
                let segments: [&str; 6] =
                    ["repos", &params.owner, &params.repo, "issues", &number, "comments"];
                github_request(HttpMethod::Post, endpoint(base_url, &segments, &[]))
                    .with_header("Content-Type", "application/json")
                    .with_json(json!({ "body": params.body }))
            }
            Self::ListWorkflowRuns(params) => {
                let query = vec![("per_page", params.per_page.to_string())];
                let url = match &params.workflow_id {
                    Some(workflow) => {
                        let workflow = workflow.to_string();
                        let segments: [&str; 7] = [
                            "repos",
                            &params.owner,
                            &params.repo,
                            "actions",
                            "workflows",
                            &workflow,
                            "runs",
                        ];
                        endpoint(base_url, &segments, &query)
                    }
                    None => endpoint(
                        base_url,
                        &["repos", &params.owner, &params.repo, "actions", "runs"],
                        &query,
                    ),
                };
                github_request(HttpMethod::Get, url)
            }
            Self::TriggerWorkflow(params) => {
                let workflow = params.workflow_id.to_string();
                let segments: [&str; 7] = [
                    "repos",
                    &params.owner,
                    &params.repo,
                    "actions",
                    "workflows",
                    &workflow,
                    "dispatches",
                ];
                github_request(HttpMethod::Post, endpoint(base_url, &segments, &[]))
                    .with_header("Content-Type", "application/json")
                    .with_json(json!({ "ref": params.git_ref, "inputs": params.inputs }))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GithubActions;

impl ServiceActions for GithubActions {
    fn action_names(&self) -> &'static [&'static str] {
        ACTIONS
    }

    fn prepare(&self, action: &str, params: &Value) -> Result<Box<dyn BuildRequest>, ActionError> {
        Ok(Box::new(GithubAction::parse(action, params)?))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::{GithubAction, BASE_URL};
    use crate::registry::{ActionError, BuildRequest, HttpMethod};

    fn base() -> Url {
        Url::parse(BASE_URL).expect("base url")
    }

    #[test]
    fn list_repos_defaults_paging_and_switches_on_owner() {
        let action = GithubAction::parse("list_repos", &json!({})).expect("parse");
        let request = action.build(&base());
        assert_eq!(request.url.as_str(), "https://api.github.com/user/repos?per_page=30&page=1");
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.header("X-GitHub-Api-Version"), Some("2022-11-28"));

        let action =
            GithubAction::parse("list_repos", &json!({"owner": "grove", "per_page": 5})).expect("parse");
        assert_eq!(
            action.build(&base()).url.as_str(),
            "https://api.github.com/users/grove/repos?per_page=5&page=1"
        );
    }

    #[test]
    fn per_page_outside_range_is_rejected() {
        let error = GithubAction::parse("list_issues", &json!({"owner": "o", "repo": "r", "per_page": 0}))
            .expect_err("range");
        assert!(matches!(error, ActionError::Validation(ref e) if e.field == "per_page"));

        let error = GithubAction::parse("list_issues", &json!({"owner": "o", "repo": "r", "state": "merged"}))
            .expect_err("enum");
        assert!(matches!(error, ActionError::Validation(_)));
    }

    #[test]
    fn path_segments_are_encoded() {
        let action =
            GithubAction::parse("get_repo", &json!({"owner": "a/b", "repo": "../etc"})).expect("parse");
        assert_eq!(action.build(&base()).url.as_str(), "https://api.github.com/repos/a%2Fb/..%2Fetc");
    }

    #[test]
    fn create_issue_posts_json_body() {
        let action = GithubAction::parse(
            "create_issue",
            &json!({"owner": "o", "repo": "r", "title": "Broken", "labels": ["bug"]}),
        )
        .expect("parse");
        let request = action.build(&base());

        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(request.url.as_str(), "https://api.github.com/repos/o/r/issues");
        assert_eq!(
            request.body,
            Some(json!({"title": "Broken", "body": null, "labels": ["bug"], "assignees": null}))
        );
    }

    #[test]
    fn workflow_ids_accept_numbers_or_file_names() {
        let action = GithubAction::parse(
            "trigger_workflow",
            &json!({"owner": "o", "repo": "r", "workflow_id": "deploy.yml"}),
        )
        .expect("parse");
        let request = action.build(&base());
        assert_eq!(
            request.url.as_str(),
            "https://api.github.com/repos/o/r/actions/workflows/deploy.yml/dispatches"
        );
        assert_eq!(request.body, Some(json!({"ref": "main", "inputs": null})));

        let action = GithubAction::parse(
            "list_workflow_runs",
            &json!({"owner": "o", "repo": "r", "workflow_id": 42}),
        )
        .expect("parse");
        assert_eq!(
            action.build(&base()).url.as_str(),
            "https://api.github.com/repos/o/r/actions/workflows/42/runs?per_page=10"
        );
    }

    #[test]
    fn unknown_action_is_reported() {
        assert_eq!(
            GithubAction::parse("delete_repo", &json!({})),
            Err(ActionError::UnknownAction("delete_repo".to_string()))
        );
    }
}
