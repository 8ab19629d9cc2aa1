//! Tool definitions and registry for the worker.
//!
//! Every scraping tool waits for an authenticated browser first and checks
//! the page for throttling after the scrape.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::browser::{BrowserPage, BrowserSession};
use crate::error::{Error, Result};
use crate::protocol::{ToolCallResult, ToolDefinition};
use crate::scraper::{JobQuery, Scraper};

/// Default number of job URLs returned by `search_jobs`.
pub const DEFAULT_SEARCH_LIMIT: u32 = 25;

/// Default number of posts returned by `get_company_posts`.
pub const DEFAULT_POSTS_LIMIT: u32 = 10;

/// Tool trait for implementing MCP tools.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult>;
}

/// Context passed to tools during execution.
pub struct ToolContext {
    /// Shared browser resource.
    pub browser: Arc<BrowserSession>,
    /// Page extraction.
    pub scraper: Arc<dyn Scraper>,
}

impl ToolContext {
    /// Create a new tool context.
    pub fn new(browser: Arc<BrowserSession>, scraper: Arc<dyn Scraper>) -> Self {
        Self { browser, scraper }
    }

    async fn page(&self) -> Result<Arc<dyn BrowserPage>> {
        self.browser.ensure_authenticated().await
    }

    /// Throttling reported by the page wins over the scrape outcome.
    async fn finish<T>(&self, scraped: Result<T>) -> Result<T> {
        self.browser.check_rate_limit().await?;
        scraped
    }
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    context: Arc<ToolContext>,
}

impl ToolRegistry {
    /// Registry holding the six LinkedIn tools.
    pub fn new(context: ToolContext) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
            context: Arc::new(context),
        };

        registry.register(Arc::new(PersonProfileTool));
        registry.register(Arc::new(CompanyProfileTool));
        registry.register(Arc::new(CompanyPostsTool));
        registry.register(Arc::new(SearchJobsTool));
        registry.register(Arc::new(JobDetailsTool));
        registry.register(Arc::new(CloseSessionTool));

        registry
    }

    /// Get tool definitions, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<_> = self.tools.values().map(|t| t.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        tool.execute(arguments, &self.context).await
    }

    /// Register a custom tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    /// Shared tool context.
    pub fn context(&self) -> &ToolContext {
        &self.context
    }
}

fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() { json!({}) } else { arguments };
    serde_json::from_value(arguments).map_err(|e| Error::InvalidParams(e.to_string()))
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidParams(format!("{field} must not be empty")));
    }
    Ok(())
}

fn definition(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: Some(description.into()),
        input_schema,
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// Scrapes a member profile.
pub struct PersonProfileTool;

#[derive(Debug, Deserialize)]
struct PersonProfileArgs {
    linkedin_username: String,
}

#[async_trait::async_trait]
impl Tool for PersonProfileTool {
    fn definition(&self) -> ToolDefinition {
        definition(
            "get_person_profile",
            "Get a LinkedIn member's profile: experience, education, skills and contact details.",
            json!({
                "type": "object",
                "properties": {
                    "linkedin_username": {
                        "type": "string",
                        "description": "Username from the profile URL (e.g. \"williamhgates\")"
                    }
                },
                "required": ["linkedin_username"]
            }),
        )
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: PersonProfileArgs = parse_args(arguments)?;
        require(&args.linkedin_username, "linkedin_username")?;

        let page = context.page().await?;
        info!(username = %args.linkedin_username, "scraping person profile");
        let scraped = context
            .scraper
            .person_profile(page.as_ref(), &args.linkedin_username)
            .await;
        ToolCallResult::json(&context.finish(scraped).await?)
    }
}

/// Scrapes a company overview.
pub struct CompanyProfileTool;

#[derive(Debug, Deserialize)]
struct CompanyArgs {
    company_name: String,
}

#[async_trait::async_trait]
impl Tool for CompanyProfileTool {
    fn definition(&self) -> ToolDefinition {
        definition(
            "get_company_profile",
            "Get a LinkedIn company page: overview, industry, size and headquarters.",
            json!({
                "type": "object",
                "properties": {
                    "company_name": {
                        "type": "string",
                        "description": "Company slug from the URL (e.g. \"microsoft\")"
                    }
                },
                "required": ["company_name"]
            }),
        )
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: CompanyArgs = parse_args(arguments)?;
        require(&args.company_name, "company_name")?;

        let page = context.page().await?;
        info!(company = %args.company_name, "scraping company profile");
        let scraped = context
            .scraper
            .company_profile(page.as_ref(), &args.company_name)
            .await;
        ToolCallResult::json(&context.finish(scraped).await?)
    }
}

/// Scrapes recent company posts.
pub struct CompanyPostsTool;

#[derive(Debug, Deserialize)]
struct CompanyPostsArgs {
    company_name: String,
    #[serde(default = "default_posts_limit")]
    limit: u32,
}

fn default_posts_limit() -> u32 {
    DEFAULT_POSTS_LIMIT
}

#[async_trait::async_trait]
impl Tool for CompanyPostsTool {
    fn definition(&self) -> ToolDefinition {
        definition(
            "get_company_posts",
            "Get recent posts from a LinkedIn company page.",
            json!({
                "type": "object",
                "properties": {
                    "company_name": {
                        "type": "string",
                        "description": "Company slug from the URL"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of posts",
                        "default": DEFAULT_POSTS_LIMIT
                    }
                },
                "required": ["company_name"]
            }),
        )
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: CompanyPostsArgs = parse_args(arguments)?;
        require(&args.company_name, "company_name")?;

        let page = context.page().await?;
        let scraped = context
            .scraper
            .company_posts(page.as_ref(), &args.company_name, args.limit)
            .await;
        ToolCallResult::json(&context.finish(scraped).await?)
    }
}

/// Searches job postings.
pub struct SearchJobsTool;

#[derive(Debug, Deserialize)]
struct SearchJobsArgs {
    keywords: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default = "default_search_limit")]
    limit: u32,
}

fn default_search_limit() -> u32 {
    DEFAULT_SEARCH_LIMIT
}

#[async_trait::async_trait]
impl Tool for SearchJobsTool {
    fn definition(&self) -> ToolDefinition {
        definition(
            "search_jobs",
            "Search LinkedIn jobs. Returns job URLs; use get_job_details for full postings.",
            json!({
                "type": "object",
                "properties": {
                    "keywords": {
                        "type": "string",
                        "description": "Search keywords (e.g. \"software engineer\")"
                    },
                    "location": {
                        "type": "string",
                        "description": "Location filter (e.g. \"Remote\")"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of job URLs",
                        "default": DEFAULT_SEARCH_LIMIT
                    }
                },
                "required": ["keywords"]
            }),
        )
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: SearchJobsArgs = parse_args(arguments)?;
        require(&args.keywords, "keywords")?;

        let query = JobQuery {
            keywords: args.keywords,
            location: args.location,
            limit: args.limit,
        };

        let page = context.page().await?;
        info!(keywords = %query.keywords, location = ?query.location, "searching jobs");
        let scraped = context.scraper.search_jobs(page.as_ref(), &query).await;
        let job_urls = context.finish(scraped).await?;

        ToolCallResult::json(&json!({
            "job_urls": job_urls,
            "count": job_urls.len(),
        }))
    }
}

/// Scrapes one job posting.
pub struct JobDetailsTool;

#[derive(Debug, Deserialize)]
struct JobDetailsArgs {
    job_id: String,
}

#[async_trait::async_trait]
impl Tool for JobDetailsTool {
    fn definition(&self) -> ToolDefinition {
        definition(
            "get_job_details",
            "Get a LinkedIn job posting: title, company, location, posting date and description.",
            json!({
                "type": "object",
                "properties": {
                    "job_id": {
                        "type": "string",
                        "description": "Numeric job id (e.g. \"4252026496\")"
                    }
                },
                "required": ["job_id"]
            }),
        )
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: JobDetailsArgs = parse_args(arguments)?;
        require(&args.job_id, "job_id")?;

        let page = context.page().await?;
        info!(job_id = %args.job_id, "scraping job");
        let scraped = context.scraper.job_details(page.as_ref(), &args.job_id).await;
        ToolCallResult::json(&context.finish(scraped).await?)
    }
}

/// Shuts the browser down.
pub struct CloseSessionTool;

#[async_trait::async_trait]
impl Tool for CloseSessionTool {
    fn definition(&self) -> ToolDefinition {
        definition(
            "close_session",
            "Close the browser session and release its resources.",
            json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        )
    }

    async fn execute(&self, _arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let message = if context.browser.close().await? {
            "Browser session closed"
        } else {
            "No active browser session to close"
        };
        ToolCallResult::json(&json!({"status": "success", "message": message}))
    }
}
