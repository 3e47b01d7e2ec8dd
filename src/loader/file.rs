//! Local filesystem loader: a single file, or every file in a folder.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{ServiceConfig, parse_service_config};
use crate::Result;

use super::Loader;

/// Loads policies files from local disk.
pub struct FileLoader;

#[async_trait]
impl Loader for FileLoader {
    fn can_load(&self, source: &str) -> bool {
        Path::new(source).exists()
    }

    async fn load(&self, source: &str) -> Result<Vec<ServiceConfig>> {
        info!(source = %source, "Load policies locally");

        let metadata = tokio::fs::metadata(source).await?;
        let filenames = if metadata.is_dir() {
            list_files(source).await?
        } else {
            vec![PathBuf::from(source)]
        };

        let mut configs = Vec::with_capacity(filenames.len());
        for filename in filenames {
            debug!(file = %filename.display(), "Parse policies file");
            let content = tokio::fs::read_to_string(&filename).await?;
            configs.push(parse_service_config(
                &content,
                &filename.display().to_string(),
            )?);
        }
        Ok(configs)
    }
}

/// Regular files directly inside `folder`, sorted for a stable load order.
async fn list_files(folder: &str) -> Result<Vec<PathBuf>> {
    let mut filenames = Vec::new();
    let mut entries = tokio::fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            continue;
        }
        filenames.push(entry.path());
    }
    filenames.sort();
    Ok(filenames)
}
