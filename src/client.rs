//! Typed client for the LinkedIn MCP tools.
//!
//! Each method normalizes its arguments, issues a `tools/call` through the
//! session and hands the decoded payload back unchanged.
//!
//! ```no_run
//! use linkedin_mcp_client::{JobSearch, LinkedInClient, ProcessConfig};
//!
//! # async fn run() -> linkedin_mcp_client::Result<()> {
//! let client = LinkedInClient::stdio(ProcessConfig::default());
//! client.connect().await?;
//! let jobs = client
//!     .search_jobs(&JobSearch::new("rust engineer").with_location("Berlin"))
//!     .await?;
//! println!("{jobs}");
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::{codes, Error, Result};
use crate::protocol::{first_text, parse_tool_payload, ListToolsResult, ToolDefinition};
use crate::session::McpSession;
use crate::transport::{HttpConfig, HttpTransport, ProcessConfig, StdioTransport, Transport, TransportConfig};

/// Pause between consecutive searches of a batch.
pub const DEFAULT_SEARCH_PAUSE: Duration = Duration::from_secs(1);

const PERSON_MARKER: &str = "linkedin.com/in/";
const COMPANY_MARKER: &str = "linkedin.com/company/";
const JOB_MARKER: &str = "/jobs/view/";

/// Job search filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSearch {
    /// Search keywords.
    pub keywords: String,
    /// Location filter.
    pub location: Option<String>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Posting age window such as `past_24_hours`. Only sent to servers that
    /// declare support for it.
    pub time_posted: Option<String>,
}

impl JobSearch {
    /// Search for `keywords` with no other filter.
    pub fn new(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            ..Self::default()
        }
    }

    /// Restrict to a location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Cap the number of results.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restrict to recent postings.
    pub fn with_time_posted(mut self, window: impl Into<String>) -> Self {
        self.time_posted = Some(window.into());
        self
    }
}

/// Outcome of one keyword in [`LinkedInClient::search_jobs_batch`].
#[derive(Debug)]
pub struct KeywordSearch {
    /// The keyword searched.
    pub keyword: String,
    /// Payload or failure for this keyword.
    pub outcome: Result<Value>,
}

/// Client for the LinkedIn tool server.
pub struct LinkedInClient {
    session: McpSession,
    search_pause: Duration,
    search_arguments: OnceCell<HashSet<String>>,
}

impl LinkedInClient {
    /// Client over an existing transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            session: McpSession::new(transport),
            search_pause: DEFAULT_SEARCH_PAUSE,
            search_arguments: OnceCell::new(),
        }
    }

    /// Client spawning the server as a child process.
    pub fn stdio(config: ProcessConfig) -> Self {
        Self::new(Arc::new(StdioTransport::new(config)))
    }

    /// Client posting to an HTTP endpoint.
    pub fn http(config: HttpConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Client for either transport.
    pub fn from_config(config: TransportConfig) -> Result<Self> {
        Ok(Self::new(config.build()?))
    }

    /// Override the pause between batch searches.
    pub fn with_search_pause(mut self, pause: Duration) -> Self {
        self.search_pause = pause;
        self
    }

    /// The underlying protocol session.
    pub fn session(&self) -> &McpSession {
        &self.session
    }

    /// Open the connection and run the handshake.
    pub async fn connect(&self) -> Result<()> {
        self.session.connect().await
    }

    /// Close the connection. Idempotent.
    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Round-trip an MCP `ping`.
    pub async fn ping(&self) -> Result<()> {
        self.session.call("ping", json!({})).await.map(|_| ())
    }

    /// Tools offered by the server.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let result = self.session.call("tools/list", json!({})).await?;
        if result.get("tools").is_none() {
            return Ok(Vec::new());
        }
        let list: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| Error::Connection(format!("malformed tools/list result: {e}")))?;
        Ok(list.tools)
    }

    /// Invoke `name` and return the raw `tools/call` result.
    ///
    /// A result flagged `isError` fails with [`Error::Tool`] carrying the
    /// server's text.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        debug!(tool = name, "calling tool");
        let result = self
            .session
            .call("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            let message = first_text(&result)
                .unwrap_or("tool reported an error")
                .to_string();
            return Err(Error::Tool {
                code: codes::TOOL_FAILED,
                message,
                data: Some(result),
            });
        }
        Ok(result)
    }

    async fn call_decoded(&self, name: &str, arguments: Value) -> Result<Value> {
        let result = self.call_tool(name, arguments).await?;
        Ok(parse_tool_payload(&result).unwrap_or(result))
    }

    /// Profile of a member, by URL or username.
    pub async fn get_person_profile(&self, profile: &str) -> Result<Value> {
        let username = person_identifier(profile)?;
        self.call_decoded("get_person_profile", json!({"linkedin_username": username}))
            .await
    }

    /// Company overview, by URL or company slug.
    pub async fn get_company_profile(&self, company: &str) -> Result<Value> {
        let name = company_identifier(company)?;
        self.call_decoded("get_company_profile", json!({"company_name": name}))
            .await
    }

    /// Recent company posts.
    pub async fn get_company_posts(&self, company: &str, limit: Option<u32>) -> Result<Value> {
        let mut arguments = Map::new();
        arguments.insert("company_name".into(), company_identifier(company)?.into());
        if let Some(limit) = limit {
            arguments.insert("limit".into(), limit.into());
        }
        self.call_decoded("get_company_posts", Value::Object(arguments))
            .await
    }

    /// Run one job search.
    pub async fn search_jobs(&self, search: &JobSearch) -> Result<Value> {
        let keywords = search.keywords.trim();
        if keywords.is_empty() {
            return Err(Error::InvalidParams("keywords must not be empty".into()));
        }

        let mut arguments = Map::new();
        arguments.insert("keywords".into(), keywords.into());
        if let Some(location) = &search.location {
            arguments.insert("location".into(), location.clone().into());
        }
        if let Some(limit) = search.limit {
            arguments.insert("limit".into(), limit.into());
        }
        if let Some(window) = &search.time_posted {
            if self.search_accepts("time_posted").await? {
                arguments.insert("time_posted".into(), window.clone().into());
            } else {
                warn!(time_posted = %window, "server does not accept time_posted; filter dropped");
            }
        }

        self.call_decoded("search_jobs", Value::Object(arguments))
            .await
    }

    /// Search each keyword in turn with the filters of `template`.
    ///
    /// Searches never overlap and are spaced by the search pause. A failing
    /// keyword is reported in its own outcome without stopping the batch.
    pub async fn search_jobs_batch<I, S>(&self, keywords: I, template: &JobSearch) -> Vec<KeywordSearch>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut results = Vec::new();
        for keyword in keywords {
            let keyword = keyword.into();
            if !results.is_empty() && !self.search_pause.is_zero() {
                tokio::time::sleep(self.search_pause).await;
            }

            info!(%keyword, "searching jobs");
            let search = JobSearch {
                keywords: keyword.clone(),
                ..template.clone()
            };
            let outcome = self.search_jobs(&search).await;
            if let Err(e) = &outcome {
                warn!(%keyword, "job search failed: {}", e);
            }
            results.push(KeywordSearch { keyword, outcome });
        }
        results
    }

    /// Details of one job posting, by URL or numeric id.
    pub async fn get_job_details(&self, job: &str) -> Result<Value> {
        let job_id = job_identifier(job)?;
        self.call_decoded("get_job_details", json!({"job_id": job_id}))
            .await
    }

    /// Ask the server to close its browser session.
    pub async fn close_session(&self) -> Result<Value> {
        self.call_decoded("close_session", json!({})).await
    }

    async fn search_accepts(&self, argument: &str) -> Result<bool> {
        let accepted = self
            .search_arguments
            .get_or_try_init(|| async {
                let tools = self.list_tools().await?;
                let names: HashSet<String> = tools
                    .iter()
                    .find(|tool| tool.name == "search_jobs")
                    .map(|tool| tool.argument_names().into_iter().collect())
                    .unwrap_or_default();
                debug!(?names, "search_jobs arguments");
                Ok::<_, Error>(names)
            })
            .await?;
        Ok(accepted.contains(argument))
    }
}

/// Username from a profile URL such as `https://www.linkedin.com/in/jdoe/`.
pub fn person_identifier(input: &str) -> Result<String> {
    non_empty(path_segment_after(input, PERSON_MARKER), "profile")
}

/// Company slug from a URL such as `https://www.linkedin.com/company/acme/`.
pub fn company_identifier(input: &str) -> Result<String> {
    non_empty(path_segment_after(input, COMPANY_MARKER), "company")
}

/// Numeric id from a URL such as `https://www.linkedin.com/jobs/view/4252026496/`.
pub fn job_identifier(input: &str) -> Result<String> {
    let segment = path_segment_after(input, JOB_MARKER);
    let id = if input.contains(JOB_MARKER) {
        let digits = segment.len() - segment.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        &segment[..digits]
    } else {
        segment
    };
    non_empty(id, "job")
}

fn path_segment_after<'a>(input: &'a str, marker: &str) -> &'a str {
    let input = input.trim();
    match input.find(marker) {
        Some(pos) => input[pos + marker.len()..]
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default(),
        None => input.trim_matches('/'),
    }
}

fn non_empty(id: &str, what: &str) -> Result<String> {
    if id.is_empty() {
        Err(Error::InvalidParams(format!("no {what} identifier found")))
    } else {
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcRequest;
    use crate::transport::TransportKind;
    use std::sync::Mutex;
    use std::time::Instant;

    /// In-memory tool server answering every tool call with its arguments.
    struct ToolServer {
        search_schema: Value,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ToolServer {
        fn new(search_properties: Value) -> Arc<Self> {
            Arc::new(Self {
                search_schema: json!({"type": "object", "properties": search_properties}),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }

        fn tool_calls(&self) -> Vec<(String, Value)> {
            self.calls()
                .into_iter()
                .filter(|(method, _)| method == "tools/call")
                .map(|(_, params)| (params["name"].as_str().unwrap().to_string(), params["arguments"].clone()))
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Transport for ToolServer {
        fn kind(&self) -> TransportKind {
            TransportKind::Http
        }

        async fn open(&self) -> Result<()> {
            Ok(())
        }

        async fn send(&self, request: &JsonRpcRequest) -> Result<Value> {
            let params = request.params.clone().unwrap_or(Value::Null);
            self.calls.lock().unwrap().push((request.method.clone(), params.clone()));

            let result = match request.method.as_str() {
                "tools/list" => json!({"tools": [
                    {"name": "search_jobs", "inputSchema": self.search_schema},
                    {"name": "get_job_details"}
                ]}),
                "tools/call" if params["arguments"]["keywords"] == "broken" => json!({
                    "content": [{"type": "text", "text": "Search failed: timeout"}],
                    "isError": true
                }),
                "tools/call" => json!({
                    "content": [{"type": "text", "text": params["arguments"].to_string()}],
                    "isError": false
                }),
                _ => json!({}),
            };
            Ok(json!({"jsonrpc": "2.0", "id": request.id, "result": result}))
        }

        async fn notify(&self, _notification: &JsonRpcRequest) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    async fn connected(server: &Arc<ToolServer>) -> LinkedInClient {
        let client = LinkedInClient::new(server.clone()).with_search_pause(Duration::ZERO);
        client.connect().await.unwrap();
        client
    }

    #[test]
    fn test_person_identifier() {
        assert_eq!(person_identifier("https://www.linkedin.com/in/jdoe/").unwrap(), "jdoe");
        assert_eq!(
            person_identifier("https://linkedin.com/in/jane-doe-123?trk=x").unwrap(),
            "jane-doe-123"
        );
        assert_eq!(person_identifier("jdoe").unwrap(), "jdoe");
        assert!(matches!(
            person_identifier("https://www.linkedin.com/in/"),
            Err(Error::InvalidParams(_))
        ));
        assert!(person_identifier("   ").is_err());
    }

    #[test]
    fn test_company_identifier() {
        assert_eq!(
            company_identifier("https://www.linkedin.com/company/apple/about/").unwrap(),
            "apple"
        );
        assert_eq!(company_identifier("/anthropic/").unwrap(), "anthropic");
    }

    #[test]
    fn test_job_identifier() {
        assert_eq!(
            job_identifier("https://www.linkedin.com/jobs/view/4252026496/").unwrap(),
            "4252026496"
        );
        assert_eq!(
            job_identifier("https://www.linkedin.com/jobs/view/3856789012?refId=abc").unwrap(),
            "3856789012"
        );
        assert_eq!(job_identifier("3856789012").unwrap(), "3856789012");
        assert!(job_identifier("https://www.linkedin.com/jobs/view/abc/").is_err());
    }

    #[tokio::test]
    async fn test_optional_arguments_are_omitted() {
        let server = ToolServer::new(json!({"keywords": {}}));
        let client = connected(&server).await;

        let payload = client.search_jobs(&JobSearch::new("rust")).await.unwrap();
        assert_eq!(payload, json!({"keywords": "rust"}));

        client.get_company_posts("acme", None).await.unwrap();
        let calls = server.tool_calls();
        assert_eq!(calls[1], ("get_company_posts".to_string(), json!({"company_name": "acme"})));
    }

    #[tokio::test]
    async fn test_typed_arguments() {
        let server = ToolServer::new(json!({}));
        let client = connected(&server).await;

        client.get_person_profile("https://www.linkedin.com/in/jdoe/").await.unwrap();
        client.get_company_profile("https://www.linkedin.com/company/acme").await.unwrap();
        client.get_company_posts("acme", Some(3)).await.unwrap();
        client.get_job_details("https://www.linkedin.com/jobs/view/42/").await.unwrap();
        client.close_session().await.unwrap();

        assert_eq!(
            server.tool_calls(),
            vec![
                ("get_person_profile".to_string(), json!({"linkedin_username": "jdoe"})),
                ("get_company_profile".to_string(), json!({"company_name": "acme"})),
                ("get_company_posts".to_string(), json!({"company_name": "acme", "limit": 3})),
                ("get_job_details".to_string(), json!({"job_id": "42"})),
                ("close_session".to_string(), json!({})),
            ]
        );
    }

    #[tokio::test]
    async fn test_time_posted_negotiated_once() {
        let server = ToolServer::new(json!({"keywords": {}, "location": {}, "time_posted": {}}));
        let client = connected(&server).await;

        let search = JobSearch::new("rust")
            .with_location("Remote")
            .with_limit(5)
            .with_time_posted("past_week");
        let payload = client.search_jobs(&search).await.unwrap();
        assert_eq!(payload["time_posted"], "past_week");
        assert_eq!(payload["limit"], 5);

        client.search_jobs(&search).await.unwrap();
        let lists = server.calls().iter().filter(|(m, _)| m == "tools/list").count();
        assert_eq!(lists, 1);
    }

    #[tokio::test]
    async fn test_time_posted_dropped_when_unsupported() {
        let server = ToolServer::new(json!({"keywords": {}, "location": {}, "limit": {}}));
        let client = connected(&server).await;

        let payload = client
            .search_jobs(&JobSearch::new("rust").with_time_posted("past_24_hours"))
            .await
            .unwrap();
        assert_eq!(payload, json!({"keywords": "rust"}));
    }

    #[tokio::test]
    async fn test_is_error_result_becomes_tool_error() {
        let server = ToolServer::new(json!({}));
        let client = connected(&server).await;

        let err = client.search_jobs(&JobSearch::new("broken")).await.unwrap_err();
        match err {
            Error::Tool { code, message, .. } => {
                assert_eq!(code, codes::TOOL_FAILED);
                assert_eq!(message, "Search failed: timeout");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_keywords_rejected_locally() {
        let server = ToolServer::new(json!({}));
        let client = connected(&server).await;

        assert!(matches!(
            client.search_jobs(&JobSearch::new("  ")).await,
            Err(Error::InvalidParams(_))
        ));
        assert!(server.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_is_sequential_and_isolates_failures() {
        let server = ToolServer::new(json!({}));
        let client = connected(&server).await;

        let template = JobSearch::new("").with_location("India").with_limit(10);
        let results = client
            .search_jobs_batch(["rust", "broken", "go"], &template)
            .await;

        let keywords: Vec<_> = results.iter().map(|r| r.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["rust", "broken", "go"]);
        assert!(results[0].outcome.is_ok());
        assert!(results[1].outcome.is_err());
        assert_eq!(results[2].outcome.as_ref().unwrap()["location"], "India");

        let searched: Vec<_> = server
            .tool_calls()
            .into_iter()
            .map(|(_, args)| args["keywords"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(searched, vec!["rust", "broken", "go"]);
    }

    #[tokio::test]
    async fn test_batch_pauses_between_searches() {
        let server = ToolServer::new(json!({}));
        let client = LinkedInClient::new(server.clone()).with_search_pause(Duration::from_millis(30));
        client.connect().await.unwrap();

        let started = Instant::now();
        let results = client.search_jobs_batch(["a", "b", "c"], &JobSearch::default()).await;
        assert_eq!(results.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_list_tools_and_ping() {
        let server = ToolServer::new(json!({}));
        let client = connected(&server).await;
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1].name, "get_job_details");

        client.ping().await.unwrap();
    }
}
