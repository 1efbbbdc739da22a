use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

/// Local directory holding subject photographs, addressed by opaque file-name references.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    root: PathBuf,
    public_base_url: String,
}

impl PhotoStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, reference: &str) -> String {
        format!("{}/uploads/{}", self.public_base_url, reference)
    }

    /// Only bare file names are resolvable; anything that could walk out of the root is refused.
    fn path_for(&self, reference: &str) -> Option<PathBuf> {
        let name = Path::new(reference).file_name()?;
        if name != reference {
            return None;
        }
        Some(self.root.join(name))
    }

    /// Removes a photo asset. Failures are logged, never returned: callers run this
    /// after their transaction has committed.
    #[instrument(skip(self))]
    pub async fn remove(&self, reference: &str) {
        let Some(path) = self.path_for(reference) else {
            warn!("Refusing to remove photo with unsafe reference");
            return;
        };

        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!(path = %path.display(), "Photo removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Photo already absent")
            }
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove photo"),
        }
    }
}
