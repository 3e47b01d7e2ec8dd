//! Policies sources: local files and folders, GitHub raw URLs.
//!
//! Sources come from the `POLICIES` environment variable (or CLI flag) as a
//! space-separated list. Each source is claimed by the first loader that
//! recognizes it; a source nothing claims fails the whole load, exactly like
//! any other configuration error.

mod file;
mod github;

pub use file::FileLoader;
pub use github::GithubLoader;

use async_trait::async_trait;

use crate::config::ServiceConfig;
use crate::{Error, Result};

/// Loads service configurations from one kind of source.
#[async_trait]
pub trait Loader: Send + Sync {
    /// Whether this loader recognizes the source string.
    fn can_load(&self, source: &str) -> bool;

    /// Fetch and parse every service configuration in the source.
    async fn load(&self, source: &str) -> Result<Vec<ServiceConfig>>;
}

/// The ordered collection of available loaders.
pub struct LoaderSet {
    loaders: Vec<Box<dyn Loader>>,
}

impl LoaderSet {
    /// The default loaders: GitHub URLs, then the local filesystem.
    #[must_use]
    pub fn new(github_token: Option<String>) -> Self {
        Self {
            loaders: vec![
                Box::new(GithubLoader::new(github_token)),
                Box::new(FileLoader),
            ],
        }
    }

    /// Load and concatenate the configurations of all sources, in order.
    ///
    /// # Errors
    ///
    /// Fails when a source is claimed by no loader, or when any single
    /// source fails to load or parse.
    pub async fn load(&self, sources: &[String]) -> Result<Vec<ServiceConfig>> {
        let mut configs = Vec::new();
        for source in sources {
            let loader = self
                .loaders
                .iter()
                .find(|loader| loader.can_load(source))
                .ok_or_else(|| Error::NoLoader(source.clone()))?;
            configs.extend(loader.load(source).await?);
        }
        Ok(configs)
    }
}
