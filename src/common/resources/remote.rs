use super::*;
use crate::common::error::Seq2SeqError;
use cached_path::{Cache, Options, ProgressBar};
use dirs::cache_dir;
use lazy_static::lazy_static;
use std::path::PathBuf;

/// # Remote resource that will be downloaded and cached locally on demand
#[derive(Debug, PartialEq, Clone)]
pub struct RemoteResource {
    /// Remote path/url for the resource
    pub url: String,
    /// Local subdirectory of the cache root where this resource is saved
    pub cache_subdir: String,
    /// Archive member to return once the download has been extracted. `None` for
    /// plain (non-archive) files.
    pub archive_member: Option<PathBuf>,
}

impl RemoteResource {
    /// Creates a new RemoteResource from an URL and a custom local path. Note that this does not
    /// download the resource (only declares the remote and local locations)
    ///
    /// # Arguments
    ///
    /// * `url` - `&str` Location of the remote resource
    /// * `cache_subdir` - `&str` Local subdirectory of the cache root to save the resource to
    ///
    /// # Example
    ///
    /// ```no_run
    /// use seq2seq_nmt::resources::RemoteResource;
    /// let corpus_resource = RemoteResource::new("http://corpus_location/spa.txt", "spa-eng");
    /// ```
    pub fn new(url: &str, cache_subdir: &str) -> RemoteResource {
        RemoteResource {
            url: url.to_string(),
            cache_subdir: cache_subdir.to_string(),
            archive_member: None,
        }
    }

    /// Creates a new RemoteResource pointing to a file inside a remote archive. The archive is
    /// downloaded and extracted under `~/.cache/.seq2seq_nmt/{name}` on first access.
    ///
    /// # Arguments
    ///
    /// * `name_url_member` - `(&str, &str, &str)` cache name, archive URL and archive member path
    ///
    /// # Example
    ///
    /// ```no_run
    /// use seq2seq_nmt::dataset::DatasetResources;
    /// use seq2seq_nmt::resources::RemoteResource;
    /// let corpus_resource = RemoteResource::from_archive(DatasetResources::SPA_ENG);
    /// ```
    pub fn from_archive(name_url_member: (&str, &str, &str)) -> RemoteResource {
        let (cache_subdir, url, member) = name_url_member;
        RemoteResource {
            url: url.to_string(),
            cache_subdir: cache_subdir.to_string(),
            archive_member: Some(PathBuf::from(member)),
        }
    }
}

impl ResourceProvider for RemoteResource {
    /// Gets the local path for a remote resource.
    ///
    /// The remote resource is downloaded and cached (and extracted for archives). Then the path
    /// to the local cache is returned.
    fn get_local_path(&self) -> Result<PathBuf, Seq2SeqError> {
        let cache = Cache::builder()
            .dir((*CACHE_DIRECTORY).clone())
            .progress_bar(Some(ProgressBar::Light))
            .build()?;
        let mut options = Options::default().subdir(&self.cache_subdir);
        if self.archive_member.is_some() {
            options = options.extract();
        }
        let cached_path = cache.cached_path_with_options(&self.url, &options)?;
        Ok(match &self.archive_member {
            Some(member) => cached_path.join(member),
            None => cached_path,
        })
    }
}

lazy_static! {
    #[derive(Copy, Clone, Debug)]
/// # Global cache directory
/// If the environment variable `SEQ2SEQ_NMT_CACHE` is set, will save the downloaded corpora at
/// that location. Otherwise defaults to `$XDG_CACHE_HOME/.seq2seq_nmt`, or corresponding user
/// cache for the current system.
    pub static ref CACHE_DIRECTORY: PathBuf = _get_cache_directory();
}

fn _get_cache_directory() -> PathBuf {
    match std::env::var("SEQ2SEQ_NMT_CACHE") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let mut home = cache_dir().unwrap_or_else(|| PathBuf::from("."));
            home.push(".seq2seq_nmt");
            home
        }
    }
}
