//! Mapping request URLs onto files under the document root.
//!
//! URLs are appended to the root verbatim: there is no normalisation and no
//! traversal protection, so `/../etc/passwd` resolves outside the root.

use memmap2::Mmap;
use std::ffi::OsString;
use std::fs::{File, Metadata};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use thiserror::Error;

/// World-read permission bit (`S_IROTH`).
const WORLD_READABLE: u32 = 0o004;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no such file")]
    Missing,
    #[error("file is not world-readable")]
    Forbidden,
    #[error("target is not a regular file")]
    NotAFile,
    #[error("failed to map file: {0}")]
    Io(#[from] io::Error),
}

/// A resolved target. Owns the read-only mapping of a non-empty file.
#[derive(Debug)]
pub struct Resource {
    metadata: Metadata,
    map: Option<Mmap>,
}

impl Resource {
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mapped contents; empty for a zero-length file.
    pub fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRoot {
    root: PathBuf,
    default_document: String,
}

impl DocumentRoot {
    pub fn new(root: impl Into<PathBuf>, default_document: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            default_document: default_document.into(),
        }
    }

    /// Filesystem path for a request URL.
    pub fn path_for(&self, url: &str) -> PathBuf {
        if url == "/" {
            return self.root.join(&self.default_document);
        }
        let mut path = OsString::from(self.root.as_os_str());
        path.push(url);
        PathBuf::from(path)
    }

    pub fn resolve(&self, url: &str) -> Result<Resource, ResolveError> {
        let path = self.path_for(url);
        let metadata = std::fs::metadata(&path).map_err(|_| ResolveError::Missing)?;

        if metadata.permissions().mode() & WORLD_READABLE == 0 {
            return Err(ResolveError::Forbidden);
        }
        if !metadata.is_file() {
            return Err(ResolveError::NotAFile);
        }
        if metadata.len() == 0 {
            return Ok(Resource {
                metadata,
                map: None,
            });
        }

        let file = File::open(&path)?;
        // SAFETY: the mapping is read-only and private to this process. A file
        // truncated underneath us is a documented hazard of serving from mmap.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Resource {
            metadata,
            map: Some(map),
        })
    }
}
