// OneDrive photo rotation through Microsoft Graph

use crate::config::PhotosConfig;
use crate::credentials::CredentialBinding;
use crate::error::{BoardError, Result};
use crate::services::{ApiDescriptor, ServiceClientFactory};
use parking_lot::RwLock;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on followed `@odata.nextLink` pages.
const MAX_PAGES: usize = 20;

#[derive(Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<Value>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

/// Download URL of a drive item if it is an image.
fn image_download_url(item: &Value) -> Option<String> {
    let is_image = item.get("image").is_some()
        || item
            .get("file")
            .and_then(|f| f.get("mimeType"))
            .and_then(Value::as_str)
            .map_or(false, |mime| mime.starts_with("image/"));

    if !is_image {
        return None;
    }
    item.get("@microsoft.graph.downloadUrl")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub struct PhotoService {
    factory: ServiceClientFactory,
    descriptor: ApiDescriptor,
    binding: CredentialBinding,
    config: PhotosConfig,
    urls: RwLock<Vec<String>>,
    rng: SystemRandom,
}

impl PhotoService {
    pub fn new(
        factory: ServiceClientFactory,
        descriptor: ApiDescriptor,
        binding: CredentialBinding,
        config: PhotosConfig,
    ) -> Self {
        let urls = load_cache(Path::new(&config.cache_path));
        Self {
            factory,
            descriptor,
            binding,
            config,
            urls: RwLock::new(urls),
            rng: SystemRandom::new(),
        }
    }

    pub fn binding(&self) -> &CredentialBinding {
        &self.binding
    }

    fn children_path(&self) -> Result<String> {
        let user = self.config.drive_user.trim();
        if user.is_empty() {
            return Err(BoardError::Config(
                "photos.drive_user must name the OneDrive owner".to_string(),
            ));
        }

        let folder = self
            .config
            .folder
            .trim_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Ok(format!(
            "users/{}/drive/root:/{}:/children",
            urlencoding::encode(user),
            folder
        ))
    }

    /// Lists image download URLs in the configured folder.
    pub async fn list_images(&self) -> Result<Vec<String>> {
        let path = self.children_path()?;
        let client = self.factory.build_client(&self.descriptor, &self.binding).await?;

        let mut page: ChildrenPage = client.get_json(&path, &[]).await?;
        let mut urls: Vec<String> = page.value.iter().filter_map(image_download_url).collect();

        for _ in 1..MAX_PAGES {
            let Some(next) = page.next_link.take() else { break };
            page = client.get_json_absolute(&next).await?;
            urls.extend(page.value.iter().filter_map(image_download_url));
        }

        debug!("Found {} images in OneDrive folder {}", urls.len(), self.config.folder);
        Ok(urls)
    }

    /// Re-reads the folder and replaces the cached URL list.
    pub async fn refresh(&self) -> Result<usize> {
        let urls = self.list_images().await?;
        if let Err(e) = save_cache(Path::new(&self.config.cache_path), &urls) {
            warn!("Could not write image cache: {}", e);
        }
        let count = urls.len();
        *self.urls.write() = urls;
        Ok(count)
    }

    /// A random cached image URL. An empty cache is filled from OneDrive
    /// first; `None` means the folder has no images.
    pub async fn next_photo(&self) -> Result<Option<String>> {
        let empty = self.urls.read().is_empty();
        if empty {
            info!("Image cache empty; listing OneDrive folder");
            self.refresh().await?;
        }

        let urls = self.urls.read();
        if urls.is_empty() {
            return Ok(None);
        }

        let mut bytes = [0u8; 8];
        self.rng
            .fill(&mut bytes)
            .map_err(|_| BoardError::Internal("System RNG unavailable".to_string()))?;
        let index = (u64::from_le_bytes(bytes) % urls.len() as u64) as usize;
        Ok(Some(urls[index].clone()))
    }

    pub fn spawn_refresher(self: Arc<Self>) -> JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config.refresh_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match self.refresh().await {
                    Ok(count) => debug!("Photo refresh cached {} images", count),
                    Err(e) => warn!("Photo refresh failed: {}", e),
                }
            }
        })
    }
}

fn load_cache(path: &Path) -> Vec<String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return Vec::new();
    };
    serde_json::from_str(&contents).unwrap_or_else(|e| {
        warn!("Ignoring unreadable image cache {}: {}", path.display(), e);
        Vec::new()
    })
}

fn save_cache(path: &Path, urls: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&tmp, serde_json::to_vec(urls)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_images_selected() {
        let items = vec![
            json!({"name":"a.jpg","image":{"width":10},"file":{"mimeType":"image/jpeg"},"@microsoft.graph.downloadUrl":"https://dl/a"}),
            json!({"name":"b.heic","file":{"mimeType":"image/heic"},"@microsoft.graph.downloadUrl":"https://dl/b"}),
            json!({"name":"notes.txt","file":{"mimeType":"text/plain"},"@microsoft.graph.downloadUrl":"https://dl/c"}),
            json!({"name":"Sub","folder":{"childCount":3}}),
        ];

        let urls: Vec<String> = items.iter().filter_map(image_download_url).collect();
        assert_eq!(urls, vec!["https://dl/a".to_string(), "https://dl/b".to_string()]);
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image_cache.json");
        let urls = vec!["https://dl/a".to_string()];

        save_cache(&path, &urls).unwrap();
        assert_eq!(load_cache(&path), urls);
        assert!(load_cache(&dir.path().join("missing.json")).is_empty());
    }
}
