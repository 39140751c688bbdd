//! # Resource definitions for training corpora
//!
//! Datasets used to train translation models are accessed through the `ResourceProvider` trait.
//! Two types of resources are pre-defined:
//! - LocalResource: points to a local file
//! - RemoteResource: points to a remote archive via a URL, downloaded and extracted on demand
//!   (requires the `remote` feature)
//!
//! For both types of resources, the local location of the file can be retrieved using
//! `get_local_path`, allowing to reference the corpus location regardless if it is a remote
//! or local resource.

mod local;

use crate::common::error::Seq2SeqError;
pub use local::LocalResource;
use std::path::PathBuf;

/// # Resource Trait that can provide the location of a corpus or configuration file
pub trait ResourceProvider {
    /// Provides the local path for a resource.
    ///
    /// # Returns
    ///
    /// * `PathBuf` pointing to the resource file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use seq2seq_nmt::resources::{LocalResource, ResourceProvider};
    /// use std::path::PathBuf;
    /// let corpus_resource = LocalResource {
    ///     local_path: PathBuf::from("path/to/spa.txt"),
    /// };
    /// let corpus_path = corpus_resource.get_local_path();
    /// ```
    fn get_local_path(&self) -> Result<PathBuf, Seq2SeqError>;
}

#[cfg(feature = "remote")]
mod remote;
#[cfg(feature = "remote")]
pub use remote::{RemoteResource, CACHE_DIRECTORY};
