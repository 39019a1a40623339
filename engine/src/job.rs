//! Retrieval jobs and multi-part download state.
//!
//! A [`Job`] is one retrieval unit plus its retry/auth/redirect state. A
//! worker owns the job exclusively between acquire and release. Chunked and
//! metalink downloads are N part-jobs sharing one [`PartSet`], which holds
//! the completion flags and integrity data; the shared set is the only
//! thing two part workers ever touch concurrently.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use trawl_types::CanonicalUrl;

use crate::auth::Challenge;

#[derive(Debug)]
pub struct Job {
    pub url: CanonicalUrl,
    /// The URL the chain started from; differs after redirects.
    pub original_url: CanonicalUrl,
    pub referer: Option<CanonicalUrl>,
    pub redirection_level: u32,
    /// Recursion depth; seeds are level 0.
    pub level: u32,
    /// Probe with HEAD before deciding whether to GET.
    pub head_first: bool,
    pub sitemap: bool,
    pub robotstxt: bool,
    /// Seed jobs bypass recursion-only filters.
    pub requested_by_user: bool,
    /// Plugin said: accept regardless of accept/reject rules.
    pub ignore_patterns: bool,
    pub local_filename: Option<PathBuf>,
    /// Challenges captured from a 401, consumed by the next attempt.
    pub challenges: Vec<Challenge>,
    /// Challenges captured from a 407.
    pub proxy_challenges: Vec<Challenge>,
    pub auth_failure_count: u32,
    /// Set on part-jobs of a chunked or metalink download.
    pub part: Option<PartHandle>,
}

impl Job {
    #[must_use]
    pub fn new(url: CanonicalUrl) -> Self {
        Self {
            original_url: url.clone(),
            url,
            referer: None,
            redirection_level: 0,
            level: 0,
            head_first: false,
            sitemap: false,
            robotstxt: false,
            requested_by_user: false,
            ignore_patterns: false,
            local_filename: None,
            challenges: Vec::new(),
            proxy_challenges: Vec::new(),
            auth_failure_count: 0,
            part: None,
        }
    }
}

/// A part-job's view into the shared download.
#[derive(Debug, Clone)]
pub struct PartHandle {
    pub set: Arc<PartSet>,
    pub index: usize,
}

impl PartHandle {
    #[must_use]
    pub fn range(&self) -> (u64, u64) {
        let parts = self.set.parts.lock().expect("part lock");
        let part = &parts[self.index];
        (part.position, part.length)
    }
}

/// One byte range of the target file.
#[derive(Debug, Clone)]
pub struct PartState {
    pub position: u64,
    pub length: u64,
    /// Expected lowercase hex hash of the piece, when declared.
    pub hash: Option<String>,
    pub done: bool,
}

/// Shared state of one chunked/metalink download.
#[derive(Debug)]
pub struct PartSet {
    /// Local file all parts write into (at disjoint offsets).
    pub name: PathBuf,
    /// Total size; the sum of part lengths equals this by construction.
    pub size: u64,
    /// Whole-file hash, when declared: `(algorithm, lowercase hex)`.
    pub global_hash: Option<(String, String)>,
    /// Mirror URLs, best first. Part i downloads from mirror i mod len.
    pub mirrors: Vec<CanonicalUrl>,
    pub parts: Mutex<Vec<PartState>>,
    /// Hash algorithm for the pieces (`sha-256` is the one we verify).
    pub piece_type: Option<String>,
    /// Integrity-failure retries already spent on this download.
    pub validation_retries: std::sync::atomic::AtomicU32,
}

impl PartSet {
    /// Build equal pieces covering `size` bytes.
    #[must_use]
    pub fn synthesize(name: PathBuf, size: u64, chunk_size: u64, origin: CanonicalUrl) -> Arc<Self> {
        let mut parts = Vec::new();
        let mut position = 0;
        while position < size {
            let length = chunk_size.min(size - position);
            parts.push(PartState {
                position,
                length,
                hash: None,
                done: false,
            });
            position += chunk_size;
        }
        Arc::new(Self {
            name,
            size,
            global_hash: None,
            mirrors: vec![origin],
            parts: Mutex::new(parts),
            piece_type: None,
            validation_retries: std::sync::atomic::AtomicU32::new(0),
        })
    }

    /// Reset all parts for one more integrity-driven attempt. Returns
    /// false when the retry budget is spent.
    pub fn reset_for_revalidation(&self) -> bool {
        use std::sync::atomic::Ordering;

        if self.validation_retries.fetch_add(1, Ordering::Relaxed) >= 1 {
            return false;
        }
        let mut parts = self.parts.lock().expect("part lock");
        for part in parts.iter_mut() {
            part.done = false;
        }
        true
    }

    #[must_use]
    pub fn part_count(&self) -> usize {
        self.parts.lock().expect("part lock").len()
    }

    /// The mirror a part downloads from.
    #[must_use]
    pub fn mirror_for(&self, index: usize) -> CanonicalUrl {
        self.mirrors[index % self.mirrors.len()].clone()
    }

    /// Mark one part done; true when that completed the whole set.
    pub fn mark_done(&self, index: usize) -> bool {
        let mut parts = self.parts.lock().expect("part lock");
        parts[index].done = true;
        parts.iter().all(|p| p.done)
    }

    /// Verify the assembled file: length, then piece hashes, then the
    /// whole-file hash, whichever are present.
    pub fn validate_file(&self) -> std::io::Result<bool> {
        let meta = match std::fs::metadata(&self.name) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if meta.len() != self.size {
            return Ok(false);
        }

        let supported = |algo: &str| algo.eq_ignore_ascii_case("sha-256") || algo.eq_ignore_ascii_case("sha256");

        if let Some(piece_type) = &self.piece_type
            && supported(piece_type)
        {
            let parts = self.parts.lock().expect("part lock").clone();
            for part in &parts {
                let Some(expected) = &part.hash else { continue };
                let actual = hash_file_range(&self.name, part.position, part.length)?;
                if actual != *expected {
                    return Ok(false);
                }
            }
        }

        if let Some((algo, expected)) = &self.global_hash
            && supported(algo)
        {
            let actual = hash_file_range(&self.name, 0, self.size)?;
            if actual != *expected {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn hash_file_range(path: &Path, position: u64, length: u64) -> std::io::Result<String> {
    use std::io::{Seek, SeekFrom};

    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(position))?;

    let mut hasher = Sha256::new();
    let mut remaining = length;
    let mut buf = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = buf.len().min(remaining as usize);
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use trawl_types::CanonicalUrl;

    use super::PartSet;

    fn origin() -> CanonicalUrl {
        CanonicalUrl::parse("http://h/big").unwrap()
    }

    #[test]
    fn synthesis_covers_the_size_exactly() {
        let set = PartSet::synthesize(PathBuf::from("big"), 3_000_000, 1_000_000, origin());
        let parts = set.parts.lock().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].position, 0);
        assert_eq!(parts[1].position, 1_000_000);
        assert_eq!(parts[2].position, 2_000_000);
        assert_eq!(parts.iter().map(|p| p.length).sum::<u64>(), 3_000_000);
    }

    #[test]
    fn chunk_size_equal_to_length_gives_one_part() {
        let set = PartSet::synthesize(PathBuf::from("f"), 500, 500, origin());
        assert_eq!(set.part_count(), 1);
    }

    #[test]
    fn uneven_tail_part_is_short() {
        let set = PartSet::synthesize(PathBuf::from("f"), 2_500_000, 1_000_000, origin());
        let parts = set.parts.lock().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].length, 500_000);
    }

    #[test]
    fn mark_done_reports_completion_once_all_parts_finish() {
        let set = PartSet::synthesize(PathBuf::from("f"), 30, 10, origin());
        assert!(!set.mark_done(0));
        assert!(!set.mark_done(2));
        assert!(set.mark_done(1));
    }

    #[test]
    fn validate_checks_length_and_sha256() {
        use sha2::{Digest, Sha256};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let digest = Sha256::digest(b"0123456789");
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();

        let set = PartSet {
            name: path,
            size: 10,
            global_hash: Some(("sha-256".to_string(), hex)),
            mirrors: vec![origin()],
            parts: std::sync::Mutex::new(Vec::new()),
            piece_type: None,
            validation_retries: std::sync::atomic::AtomicU32::new(0),
        };
        assert!(set.validate_file().unwrap());

        let bad = PartSet {
            global_hash: Some(("sha-256".to_string(), "00".repeat(32))),
            name: set.name.clone(),
            size: 10,
            mirrors: vec![origin()],
            parts: std::sync::Mutex::new(Vec::new()),
            piece_type: None,
            validation_retries: std::sync::atomic::AtomicU32::new(0),
        };
        assert!(!bad.validate_file().unwrap());
    }

    #[test]
    fn validate_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"abc").unwrap();

        let set = PartSet::synthesize(path, 10, 5, origin());
        assert!(!set.validate_file().unwrap());
    }
}
