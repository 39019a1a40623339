//! The file sink.
//!
//! `prepare` turns a response-plus-name into an open target, applying the
//! refusal ladder (spider, directory, quota, patterns), extension
//! adjustment, clobber/backup/timestamping policy and the unique-name
//! fallback. All naming decisions happen under one lock so two workers
//! cannot race the same conflict resolution.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use trawl_config::Config;

use crate::error::{ErrorKind, FetchError};
use crate::filename::adjusted_extension;
use crate::filters::FilterSet;

/// Cap for the `.1`, `.2`, ... unique-name fallback.
const MAX_UNIQUE_SUFFIX: u32 = 999;

/// Why the sink refused to open a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Spider,
    IsDirectory,
    QuotaExceeded,
    PatternExcluded,
    AlreadyExists,
    DeleteAfter,
}

/// Where the body goes.
#[derive(Debug)]
pub enum SaveTarget {
    File { file: File, path: PathBuf },
    Stdout,
    Null,
    Skip(SkipReason),
}

impl SaveTarget {
    pub fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            SaveTarget::File { file, .. } => file.write_all(data),
            SaveTarget::Stdout => std::io::stdout().write_all(data),
            SaveTarget::Null | SaveTarget::Skip(_) => Ok(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            SaveTarget::File { path, .. } => Some(path),
            _ => None,
        }
    }
}

/// What the caller wants opened.
#[derive(Debug)]
pub struct SinkRequest<'a> {
    pub name: &'a Path,
    pub content_type: Option<&'a str>,
    /// 206 continuation: append instead of truncate.
    pub append: bool,
    /// Plugin verdict: skip the pattern filters.
    pub ignore_patterns: bool,
}

/// Origin metadata handed to the extended-attribute writer.
#[derive(Debug)]
pub struct FileOrigin<'a> {
    pub origin_url: &'a str,
    pub referer: Option<&'a str>,
    pub mime_type: Option<&'a str>,
    pub charset: Option<&'a str>,
}

/// The extended-attribute writer seam.
///
/// Platform xattr support is a collaborator, not engine business; the
/// default implementation records nothing.
pub trait XattrWriter: Send + Sync {
    fn write(&self, path: &Path, origin: &FileOrigin<'_>) -> std::io::Result<()>;
}

/// The do-nothing default.
pub struct NoXattr;

impl XattrWriter for NoXattr {
    fn write(&self, _path: &Path, _origin: &FileOrigin<'_>) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct Sink {
    config: std::sync::Arc<Config>,
    filters: std::sync::Arc<FilterSet>,
    xattr: Box<dyn XattrWriter>,
    /// Serializes naming decisions (rotation, unique suffixes).
    naming: Mutex<()>,
}

impl Sink {
    #[must_use]
    pub fn new(config: std::sync::Arc<Config>, filters: std::sync::Arc<FilterSet>) -> Self {
        Self::with_xattr_writer(config, filters, Box::new(NoXattr))
    }

    #[must_use]
    pub fn with_xattr_writer(
        config: std::sync::Arc<Config>,
        filters: std::sync::Arc<FilterSet>,
        xattr: Box<dyn XattrWriter>,
    ) -> Self {
        Self {
            config,
            filters,
            xattr,
            naming: Mutex::new(()),
        }
    }

    /// Record origin metadata for a saved file, when `xattr` is on.
    pub fn write_origin(&self, path: &Path, origin: &FileOrigin<'_>) {
        if !self.config.xattr {
            return;
        }
        if let Err(e) = self.xattr.write(path, origin) {
            tracing::error!(path = %path.display(), "failed to save extended attributes: {e}");
        }
    }

    /// Open the save target for a response.
    ///
    /// `quota_reached` is sampled by the caller from the stats counter
    /// before headers are processed.
    pub fn prepare(
        &self,
        request: &SinkRequest<'_>,
        quota_reached: bool,
    ) -> Result<SaveTarget, FetchError> {
        let config = &self.config;

        if config.spider {
            tracing::debug!(name = %request.name.display(), "not saved (spider mode)");
            return Ok(SaveTarget::Skip(SkipReason::Spider));
        }

        let name_str = request.name.to_string_lossy();
        if name_str.ends_with('/') {
            tracing::debug!(name = %name_str, "not saved (file is a directory)");
            return Ok(SaveTarget::Skip(SkipReason::IsDirectory));
        }

        if quota_reached {
            tracing::debug!(name = %name_str, quota = config.quota, "not saved (quota reached)");
            return Ok(SaveTarget::Skip(SkipReason::QuotaExceeded));
        }

        // Special names route past the filesystem entirely.
        if let Some(output) = &config.output_document {
            if output == "-" {
                return Ok(SaveTarget::Stdout);
            }
            if is_null_device(output) {
                return Ok(SaveTarget::Null);
            }
            if config.delete_after {
                return Ok(SaveTarget::Skip(SkipReason::DeleteAfter));
            }

            let path = PathBuf::from(output);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(io_error)?;
            return Ok(SaveTarget::File { file, path });
        }

        if is_null_device(&name_str) {
            return Ok(SaveTarget::Null);
        }

        // Extension adjustment before pattern filtering, so the filters see
        // the final name.
        let mut name = request.name.to_path_buf();
        if config.adjust_extension
            && let Some(content_type) = request.content_type
            && let Some(ext) = adjusted_extension(content_type, &name_str)
        {
            let mut s = name.into_os_string();
            s.push(ext);
            name = PathBuf::from(s);
        }

        if !request.ignore_patterns && self.filters.excluded(&name.to_string_lossy()) {
            tracing::debug!(name = %name.display(), "not saved (excluded by accept/reject rules)");
            return Ok(SaveTarget::Skip(SkipReason::PatternExcluded));
        }

        let _guard = self.naming.lock().expect("sink naming lock");

        if let Some(parent) = name.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        if request.append {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&name)
                .map_err(io_error)?;
            return Ok(SaveTarget::File { file, path: name });
        }

        if config.timestamping || (config.recursive && config.host_directories) {
            // Deterministic names: truncate in place.
            let file = File::create(&name).map_err(io_error)?;
            return Ok(SaveTarget::File { file, path: name });
        }

        if !config.clobber {
            match OpenOptions::new().write(true).create_new(true).open(&name) {
                Ok(file) => return Ok(SaveTarget::File { file, path: name }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::info!(name = %name.display(), "file already there; not retrieving");
                    return Ok(SaveTarget::Skip(SkipReason::AlreadyExists));
                }
                Err(e) => return Err(io_error(e)),
            }
        }

        if config.backups > 0 {
            rotate_backups(&name, config.backups);
            let file = File::create(&name).map_err(io_error)?;
            return Ok(SaveTarget::File { file, path: name });
        }

        // Clobber with unique suffixes: name, name.1, name.2, ...
        open_unique(&name)
    }

    /// Finish a file target: optional fsync, then mtime restore.
    pub fn finish(
        &self,
        target: SaveTarget,
        modified: Option<SystemTime>,
    ) -> Result<Option<PathBuf>, FetchError> {
        match target {
            SaveTarget::File { mut file, path } => {
                file.flush().map_err(io_error)?;
                if self.config.fsync {
                    file.sync_all().map_err(io_error)?;
                }
                drop(file);
                if let Some(modified) = modified {
                    set_file_mtime(&path, modified);
                }
                Ok(Some(path))
            }
            _ => Ok(None),
        }
    }
}

/// Open the assembled file of a multi-part download positioned at `offset`.
pub fn open_part(path: &Path, offset: u64) -> Result<File, FetchError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(io_error)?;
    file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
    Ok(file)
}

/// Size of an existing local file, for Range continuation and
/// timestamping decisions.
#[must_use]
pub fn existing_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

#[must_use]
pub fn existing_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

fn is_null_device(name: &str) -> bool {
    if name == "/dev/null" {
        return true;
    }
    #[cfg(windows)]
    if name.eq_ignore_ascii_case("NUL") {
        return true;
    }
    false
}

/// Rotate `name.1 .. name.backups`, oldest falling off the end.
fn rotate_backups(name: &Path, backups: u32) {
    let base = name.to_string_lossy().into_owned();
    for it in (1..=backups).rev() {
        let src = if it > 1 {
            format!("{base}.{}", it - 1)
        } else {
            base.clone()
        };
        let dst = format!("{base}.{it}");
        match std::fs::rename(&src, &dst) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!("failed to rename {src} to {dst}: {e}"),
        }
    }
}

/// Try `name`, then `name.1` .. `name.999`.
fn open_unique(name: &Path) -> Result<SaveTarget, FetchError> {
    let base = name.to_string_lossy().into_owned();
    for suffix in 0..=MAX_UNIQUE_SUFFIX {
        let candidate = if suffix == 0 {
            name.to_path_buf()
        } else {
            PathBuf::from(format!("{base}.{suffix}"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => {
                return Ok(SaveTarget::File {
                    file,
                    path: candidate,
                });
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::IsADirectory
                ) => {}
            Err(e) => return Err(io_error(e)),
        }
    }
    Err(FetchError::new(
        ErrorKind::Io,
        format!("no unique name available for '{base}'"),
    ))
}

fn io_error(e: std::io::Error) -> FetchError {
    FetchError::new(ErrorKind::Io, e.to_string())
}

/// Best-effort mtime restore from `Last-Modified`.
#[cfg(unix)]
fn set_file_mtime(path: &Path, modified: SystemTime) {
    use std::os::unix::ffi::OsStrExt;

    let Ok(duration) = modified.duration_since(std::time::UNIX_EPOCH) else {
        return;
    };
    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return;
    };
    let times = [
        libc::timeval {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_usec: 0,
        },
        libc::timeval {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_usec: 0,
        },
    ];
    // SAFETY: cpath is a valid NUL-terminated path, times points at two
    // initialized timevals.
    unsafe {
        libc::utimes(cpath.as_ptr(), times.as_ptr());
    }
}

#[cfg(not(unix))]
fn set_file_mtime(_path: &Path, _modified: SystemTime) {}
