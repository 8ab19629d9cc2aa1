//! # linkedin-mcp-client
//!
//! Client and browser-session worker for the LinkedIn MCP (Model Context
//! Protocol) tools.
//!
//! The client side talks JSON-RPC 2.0 to a tool server, either over a child
//! process's stdin/stdout or over HTTP, and wraps the remote tools in typed
//! methods. The worker side serves the same tools from one shared,
//! authenticated browser.
//!
//! ## Available Tools
//!
//! - `get_person_profile`: scrape a member profile
//! - `get_company_profile`: scrape a company page
//! - `get_company_posts`: recent posts of a company
//! - `search_jobs`: job URLs for a keyword search
//! - `get_job_details`: one job posting
//! - `close_session`: shut the worker's browser down
//!
//! ## Client usage
//!
//! ```no_run
//! use linkedin_mcp_client::{HttpConfig, LinkedInClient};
//!
//! # async fn run() -> linkedin_mcp_client::Result<()> {
//! let client = LinkedInClient::http(HttpConfig::new("http://127.0.0.1:8000/mcp"))?;
//! client.connect().await?;
//! for tool in client.list_tools().await? {
//!     println!("{}", tool.name);
//! }
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Failures are split into connection, authentication, tool and rate-limit
//! errors (see [`Error`]). The reserved JSON-RPC code `-32000` always means
//! authentication. Nothing is retried automatically.
//!
//! ## Worker
//!
//! [`McpServer`] exposes the tools over stdio (or HTTP with the `http`
//! feature). Browser automation and page extraction are plugged in through
//! [`BrowserLauncher`] and [`Scraper`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod browser;
pub mod client;
pub mod correlator;
pub mod credentials;
pub mod error;
pub mod protocol;
pub mod scraper;
pub mod server;
pub mod session;
pub mod tools;
pub mod transport;

pub use browser::{AuthState, BrowserConfig, BrowserLauncher, BrowserPage, BrowserSession};
pub use client::{JobSearch, KeywordSearch, LinkedInClient};
pub use credentials::{CredentialProvider, FileCredentialProvider, StaticCredentials};
pub use error::{Error, Result};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpMessage, ToolDefinition};
pub use scraper::{DiagnosticScraper, Scraper};
pub use server::McpServer;
pub use session::{McpSession, SessionState};
pub use tools::{Tool, ToolContext, ToolRegistry};
pub use transport::{HttpConfig, ProcessConfig, Transport, TransportConfig};
