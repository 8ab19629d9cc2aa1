//! Page extraction interface and its diagnostic decorator.
//!
//! Turning a rendered page into structured data is the job of a [`Scraper`]
//! implementation supplied by the embedding application. The worker only
//! relies on this interface, and wraps whatever it is given in a
//! [`DiagnosticScraper`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::browser::BrowserPage;
use crate::error::Result;

/// Base URL of the scraped site.
pub const LINKEDIN_BASE_URL: &str = "https://www.linkedin.com";

/// Profile page of a member.
pub fn person_url(username: &str) -> String {
    format!("{LINKEDIN_BASE_URL}/in/{username}/")
}

/// Company page.
pub fn company_url(company: &str) -> String {
    format!("{LINKEDIN_BASE_URL}/company/{company}/")
}

/// Job posting page.
pub fn job_url(job_id: &str) -> String {
    format!("{LINKEDIN_BASE_URL}/jobs/view/{job_id}/")
}

/// Job search parameters handed to the scraper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQuery {
    /// Search keywords.
    pub keywords: String,
    /// Location filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Maximum number of job URLs.
    pub limit: u32,
}

/// Extracts structured data from an authenticated page.
#[async_trait::async_trait]
pub trait Scraper: Send + Sync {
    /// Profile of the member `username`.
    async fn person_profile(&self, page: &dyn BrowserPage, username: &str) -> Result<Value>;

    /// Company overview.
    async fn company_profile(&self, page: &dyn BrowserPage, company: &str) -> Result<Value>;

    /// Recent company posts, at most `limit`.
    async fn company_posts(&self, page: &dyn BrowserPage, company: &str, limit: u32) -> Result<Value>;

    /// Job posting URLs matching `query`.
    async fn search_jobs(&self, page: &dyn BrowserPage, query: &JobQuery) -> Result<Vec<String>>;

    /// Details of one job posting.
    async fn job_details(&self, page: &dyn BrowserPage, job_id: &str) -> Result<Value>;
}

/// Why a page came back without content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageBlockage {
    /// Login wall.
    AuthWall,
    /// Captcha / security check.
    SecurityCheck,
}

/// Classify a page that produced no results.
pub fn detect_blockage(title: &str, content: &str) -> Option<PageBlockage> {
    let title = title.to_lowercase();
    if content.to_lowercase().contains("authwall") || title.contains("sign in") {
        Some(PageBlockage::AuthWall)
    } else if title.contains("security check") {
        Some(PageBlockage::SecurityCheck)
    } else {
        None
    }
}

/// Adds title fallbacks and zero-result diagnostics to another scraper.
pub struct DiagnosticScraper<S> {
    inner: S,
}

impl<S: Scraper> DiagnosticScraper<S> {
    /// Wrap `inner`.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped scraper.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn fill_title(&self, page: &dyn BrowserPage, data: &mut Value) {
        let Some(map) = data.as_object_mut() else {
            return;
        };
        if map.get("title").and_then(Value::as_str).is_some_and(|t| !t.trim().is_empty()) {
            return;
        }

        if let Some(title) = map.get("job_title").and_then(Value::as_str) {
            let title = title.trim().to_string();
            if !title.is_empty() {
                map.insert("title".into(), Value::String(title));
                return;
            }
        }

        match page.title().await {
            Ok(page_title) => {
                let title = page_title.split('|').next().unwrap_or_default().trim();
                if !title.is_empty() {
                    map.insert("title".into(), Value::String(title.to_string()));
                }
            }
            Err(e) => warn!("could not read page title: {}", e),
        }
    }

    async fn diagnose_empty_search(&self, page: &dyn BrowserPage, query: &JobQuery) {
        let title = page.title().await.unwrap_or_default();
        let content = page.content().await.unwrap_or_default();
        error!(keywords = %query.keywords, page_title = %title, "job search found 0 results");
        match detect_blockage(&title, &content) {
            Some(PageBlockage::AuthWall) => error!("job search hit the login wall"),
            Some(PageBlockage::SecurityCheck) => error!("job search hit a security check"),
            None => {}
        }
    }
}

#[async_trait::async_trait]
impl<S: Scraper> Scraper for DiagnosticScraper<S> {
    async fn person_profile(&self, page: &dyn BrowserPage, username: &str) -> Result<Value> {
        self.inner.person_profile(page, username).await
    }

    async fn company_profile(&self, page: &dyn BrowserPage, company: &str) -> Result<Value> {
        self.inner.company_profile(page, company).await
    }

    async fn company_posts(&self, page: &dyn BrowserPage, company: &str, limit: u32) -> Result<Value> {
        self.inner.company_posts(page, company, limit).await
    }

    async fn search_jobs(&self, page: &dyn BrowserPage, query: &JobQuery) -> Result<Vec<String>> {
        let urls = self.inner.search_jobs(page, query).await?;
        if urls.is_empty() {
            self.diagnose_empty_search(page, query).await;
        }
        Ok(urls)
    }

    async fn job_details(&self, page: &dyn BrowserPage, job_id: &str) -> Result<Value> {
        let mut data = self.inner.job_details(page, job_id).await?;
        self.fill_title(page, &mut data).await;
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Viewport;
    use serde_json::json;
    use std::time::Duration;

    struct TitledPage(&'static str);

    #[async_trait::async_trait]
    impl BrowserPage for TitledPage {
        async fn set_viewport(&self, _: Viewport) -> Result<()> {
            Ok(())
        }
        async fn set_default_timeout(&self, _: Duration) -> Result<()> {
            Ok(())
        }
        async fn block_resource_types(&self, _: &[&str]) -> Result<()> {
            Ok(())
        }
        async fn load_storage_state(&self, _: &Value) -> Result<()> {
            Ok(())
        }
        async fn add_session_cookie(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn navigate(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn is_logged_in(&self) -> Result<bool> {
            Ok(true)
        }
        async fn rate_limit_signal(&self) -> Result<Option<String>> {
            Ok(None)
        }
        async fn title(&self) -> Result<String> {
            Ok(self.0.into())
        }
        async fn content(&self) -> Result<String> {
            Ok("<html></html>".into())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct CannedScraper {
        details: Value,
    }

    #[async_trait::async_trait]
    impl Scraper for CannedScraper {
        async fn person_profile(&self, _: &dyn BrowserPage, username: &str) -> Result<Value> {
            Ok(json!({"username": username}))
        }
        async fn company_profile(&self, _: &dyn BrowserPage, company: &str) -> Result<Value> {
            Ok(json!({"name": company}))
        }
        async fn company_posts(&self, _: &dyn BrowserPage, _: &str, limit: u32) -> Result<Value> {
            Ok(json!({"posts": [], "limit": limit}))
        }
        async fn search_jobs(&self, _: &dyn BrowserPage, _: &JobQuery) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn job_details(&self, _: &dyn BrowserPage, _: &str) -> Result<Value> {
            Ok(self.details.clone())
        }
    }

    fn wrap(details: Value) -> DiagnosticScraper<CannedScraper> {
        DiagnosticScraper::new(CannedScraper { details })
    }

    #[tokio::test]
    async fn test_title_kept_when_present() {
        let scraper = wrap(json!({"title": "Rust Engineer", "job_title": "Other"}));
        let data = scraper.job_details(&TitledPage("X | LinkedIn"), "1").await.unwrap();
        assert_eq!(data["title"], "Rust Engineer");
    }

    #[tokio::test]
    async fn test_title_from_job_title() {
        let scraper = wrap(json!({"job_title": " Data Engineer "}));
        let data = scraper.job_details(&TitledPage("X | LinkedIn"), "1").await.unwrap();
        assert_eq!(data["title"], "Data Engineer");
    }

    #[tokio::test]
    async fn test_title_from_page_title() {
        let scraper = wrap(json!({"company": "Acme"}));
        let data = scraper
            .job_details(&TitledPage("Platform Engineer | Acme | LinkedIn"), "1")
            .await
            .unwrap();
        assert_eq!(data["title"], "Platform Engineer");
        assert_eq!(data["company"], "Acme");
    }

    #[tokio::test]
    async fn test_non_object_details_untouched() {
        let scraper = wrap(json!(["a"]));
        let data = scraper.job_details(&TitledPage("T"), "1").await.unwrap();
        assert_eq!(data, json!(["a"]));
    }

    #[tokio::test]
    async fn test_empty_search_passes_through() {
        let scraper = wrap(json!({}));
        let query = JobQuery {
            keywords: "rust".into(),
            location: None,
            limit: 5,
        };
        let urls = scraper.search_jobs(&TitledPage("Sign In | LinkedIn"), &query).await.unwrap();
        assert!(urls.is_empty());
    }

    #[test]
    fn test_detect_blockage() {
        assert_eq!(detect_blockage("Sign In | LinkedIn", ""), Some(PageBlockage::AuthWall));
        assert_eq!(
            detect_blockage("Jobs", "<a href=\"/authwall?trk=x\">"),
            Some(PageBlockage::AuthWall)
        );
        assert_eq!(
            detect_blockage("Security Check - LinkedIn", ""),
            Some(PageBlockage::SecurityCheck)
        );
        assert_eq!(detect_blockage("Jobs | LinkedIn", "<ul></ul>"), None);
    }

    #[test]
    fn test_urls() {
        assert_eq!(person_url("jdoe"), "https://www.linkedin.com/in/jdoe/");
        assert_eq!(company_url("acme"), "https://www.linkedin.com/company/acme/");
        assert_eq!(job_url("4252026496"), "https://www.linkedin.com/jobs/view/4252026496/");
    }
}
