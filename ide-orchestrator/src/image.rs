use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub image_ref: String,
    pub image_url: String,
}

/// Read-only lookup of workspace images.
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Fails with [`OrchestratorError::NotFound`] for unknown references.
    async fn lookup(&self, image_ref: &str) -> Result<ImageInfo>;
}

/// Catalog backed by the `images` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticImageCatalog {
    images: HashMap<String, String>,
}

impl StaticImageCatalog {
    pub fn new(images: HashMap<String, String>) -> Self {
        Self { images }
    }
}

#[async_trait]
impl ImageCatalog for StaticImageCatalog {
    async fn lookup(&self, image_ref: &str) -> Result<ImageInfo> {
        self.images
            .get(image_ref)
            .map(|url| ImageInfo {
                image_ref: image_ref.to_string(),
                image_url: url.clone(),
            })
            .ok_or_else(|| OrchestratorError::NotFound(format!("Image not found: {}", image_ref)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_known_and_unknown() {
        let catalog = StaticImageCatalog::new(HashMap::from([(
            "img-py312".to_string(),
            "registry.local/ide/jupyter-py312:1.4".to_string(),
        )]));

        let info = catalog.lookup("img-py312").await.unwrap();
        assert_eq!(info.image_url, "registry.local/ide/jupyter-py312:1.4");

        let err = catalog.lookup("img-missing").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }
}
