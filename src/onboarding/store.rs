//! Per-visitor onboarding progress on disk

use super::{validate_visitor, OnboardingError, OnboardingProgress};
use std::path::{Path, PathBuf};

/// One JSON document per visitor under `<data_dir>/onboarding`
#[derive(Debug, Clone)]
pub struct OnboardingStore {
    dir: PathBuf,
}

impl OnboardingStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            dir: data_dir.join("onboarding"),
        }
    }

    fn path_for(&self, visitor: &str) -> Result<PathBuf, OnboardingError> {
        validate_visitor(visitor)?;
        Ok(self.dir.join(format!("{visitor}.json")))
    }

    /// Stored progress, or a fresh wizard if none was saved
    pub async fn load(&self, visitor: &str) -> Result<OnboardingProgress, OnboardingError> {
        let path = self.path_for(visitor)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(OnboardingProgress::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(
        &self,
        visitor: &str,
        progress: &OnboardingProgress,
    ) -> Result<(), OnboardingError> {
        let path = self.path_for(visitor)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write-then-rename so readers never see a partial document
        let tmp = self
            .dir
            .join(format!(".{visitor}.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(progress)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn clear(&self, visitor: &str) -> Result<(), OnboardingError> {
        let path = self.path_for(visitor)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
