//! GitHub loader: fetches a single policies file from a raw GitHub URL.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use crate::config::{ServiceConfig, parse_service_config};
use crate::{Error, Result};

use super::Loader;

fn repo_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^https://[^/]*github[^/]*/.*$").unwrap())
}

fn yaml_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.ya?ml$").unwrap())
}

/// Loads a policies file from a GitHub URL, optionally authenticated.
pub struct GithubLoader {
    token: Option<String>,
    http: reqwest::Client,
}

impl GithubLoader {
    /// A loader sending `Authorization: token <token>` when one is set.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Loader for GithubLoader {
    fn can_load(&self, source: &str) -> bool {
        repo_url().is_match(source)
    }

    async fn load(&self, source: &str) -> Result<Vec<ServiceConfig>> {
        info!(source = %source, "Load policies from Github");

        if !yaml_url().is_match(source) {
            // Folder on a remote repo.
            return Err(Error::Config(format!(
                "loading from a Github folder is not supported ({source:?})"
            )));
        }

        let mut request = self.http.get(source);
        if let Some(ref token) = self.token {
            request = request.header(reqwest::header::AUTHORIZATION, format!("token {token}"));
        }
        let response = request.send().await?.error_for_status()?;
        let content = response.text().await?;

        Ok(vec![parse_service_config(&content, source)?])
    }
}
