//! On-disk cache layout
//!
//! Cache files are named `<key>.<ext>` inside a directory chosen by media
//! type. Quality thumbnails share the root cache directory and are named
//! `q_<volumeId>_<localId>.jpg`.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Marker file that opts the cache directory out of media scanning
pub const NOMEDIA_MARKER: &str = ".nomedia";

/// Kind of media stored in a cache directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaDir {
    Cache,
    Image,
    Video,
    Document,
}

impl MediaDir {
    fn subdir(self) -> Option<&'static str> {
        match self {
            MediaDir::Cache => None,
            MediaDir::Image => Some("images"),
            MediaDir::Video => Some("video"),
            MediaDir::Document => Some("documents"),
        }
    }
}

/// Resolves cache paths below a root directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDirs {
    root: PathBuf,
}

impl MediaDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: MediaDir) -> PathBuf {
        match kind.subdir() {
            Some(sub) => self.root.join(sub),
            None => self.root.clone(),
        }
    }

    /// Path of `name` inside the directory for `kind`
    pub fn path(&self, kind: MediaDir, name: &str) -> PathBuf {
        self.dir(kind).join(name)
    }

    /// Quality thumbnail for a file location
    pub fn quality_thumb_path(&self, volume_id: i64, local_id: i32) -> PathBuf {
        self.root.join(format!("q_{}_{}.jpg", volume_id, local_id))
    }

    /// Quality thumbnail for an already derived cache file name
    pub fn quality_thumb_for_name(&self, name: &str) -> PathBuf {
        self.root.join(format!("q_{}", name))
    }

    /// Create every media directory and the `.nomedia` marker.
    ///
    /// An existing marker is left untouched.
    pub fn ensure(&self) -> io::Result<()> {
        for kind in [MediaDir::Cache, MediaDir::Image, MediaDir::Video, MediaDir::Document] {
            fs::create_dir_all(self.dir(kind))?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.root.join(NOMEDIA_MARKER))
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e),
        }
    }
}
