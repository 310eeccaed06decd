//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::GatewayError;
use crate::filesys::dir::Dir;

/// On-disk layout for the gateway
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// State-store documents
    pub fn state_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("state"))
    }

    /// Graph template documents shipped with the gateway
    pub fn content_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("content"))
    }

    /// Log files
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Gateway settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("settings.json")
    }

    /// Create the directories the gateway writes to.
    ///
    /// The content directory is deployed with the image and is not created
    /// here.
    pub async fn setup(&self) -> Result<(), GatewayError> {
        self.state_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        // Use /var/lib/lensgate on Linux, or user home directory on other
        // platforms
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/lensgate");

        #[cfg(not(target_os = "linux"))]
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".lensgate");

        Self::new(base_dir)
    }
}

// Add dirs crate functionality inline for cross-platform support
#[cfg(not(target_os = "linux"))]
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths_nest_under_base() {
        let layout = StorageLayout::new("/data/lensgate");

        assert_eq!(
            layout.state_dir().path(),
            PathBuf::from("/data/lensgate/state")
        );
        assert_eq!(
            layout.content_dir().path(),
            PathBuf::from("/data/lensgate/content")
        );
        assert_eq!(
            layout.logs_dir().path(),
            PathBuf::from("/data/lensgate/logs")
        );
        assert_eq!(
            layout.settings_file(),
            PathBuf::from("/data/lensgate/settings.json")
        );
    }
}
