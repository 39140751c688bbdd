use crate::common::error::Seq2SeqError;
use crate::resources::ResourceProvider;
use std::path::PathBuf;

/// # Local resource
#[derive(Debug, PartialEq, Clone)]
pub struct LocalResource {
    /// Local path for the resource
    pub local_path: PathBuf,
}

impl ResourceProvider for LocalResource {
    /// Gets the path for a local resource. The file is expected to exist.
    ///
    /// # Returns
    ///
    /// * `PathBuf` pointing to the resource file
    fn get_local_path(&self) -> Result<PathBuf, Seq2SeqError> {
        if self.local_path.exists() {
            Ok(self.local_path.clone())
        } else {
            Err(Seq2SeqError::IOError(format!(
                "Local resource {} does not exist",
                self.local_path.display()
            )))
        }
    }
}

impl From<PathBuf> for LocalResource {
    fn from(local_path: PathBuf) -> Self {
        LocalResource { local_path }
    }
}
