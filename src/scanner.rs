//! Folder scanner: walk a directory tree, extract and score every supported
//! file against a clause catalog, and aggregate the results.
//!
//! Extraction and scoring are CPU-bound, so each file runs on tokio's
//! blocking pool. A [`Semaphore`] caps how many run at once
//! (`[scan] workers`). Results are collected back in path order, so the
//! output is deterministic regardless of completion order.
//!
//! A file that fails extraction (corrupt, too large, unreadable, or a
//! panicking parser) is still scored on its file name alone.

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{Config, MatchingConfig};
use crate::error::{ExtractError, ScanError};
use crate::extract::{extract_file, Extraction};
use crate::matcher::{file_stem, match_document};
use crate::models::{Clause, DocumentKind, FileMatches, ScanResult, UnmatchedFile};
use crate::progress::{ScanProgressEvent, ScanProgressReporter};

/// Always excluded, in addition to `[scan] exclude_globs`.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/node_modules/**", "**/~$*"];

/// Everything the scanner needs from configuration.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub matching: MatchingConfig,
    pub workers: usize,
    pub max_extract_bytes: u64,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

impl ScanOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            matching: config.matching.clone(),
            workers: config.scan.workers,
            max_extract_bytes: config.scan.max_extract_bytes,
            exclude_globs: config.scan.exclude_globs.clone(),
            follow_symlinks: config.scan.follow_symlinks,
        }
    }

    /// Same options, keeping only each file's best match.
    pub fn best_match_only(mut self) -> Self {
        self.matching.max_matches_per_doc = 1;
        self
    }
}

/// One supported file found under the scanned folder.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

/// Outcome of extracting and scoring one file.
#[derive(Debug, Clone)]
pub struct FileAnalysis {
    pub file: FileMatches,
    pub extraction_failed: bool,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| ScanError::Options(format!("bad exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ScanError::Options(e.to_string()))
}

/// Walks `folder` and returns every file with a supported extension that
/// survives the exclude globs, sorted by path.
///
/// Unreadable subdirectories are logged and skipped. An unreadable root is
/// an error.
pub fn discover_files(folder: &Path, options: &ScanOptions) -> Result<Vec<Candidate>, ScanError> {
    if !folder.is_dir() {
        return Err(ScanError::FolderNotFound(folder.to_path_buf()));
    }

    let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    patterns.extend(options.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&patterns)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(folder)
        .follow_links(options.follow_symlinks)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(ScanError::Walk {
                    folder: folder.to_path_buf(),
                    message: e.to_string(),
                });
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(folder).unwrap_or(path);
        if exclude_set.is_match(relative) {
            debug!(path = %relative.display(), "excluded");
            continue;
        }

        if let Some(kind) = DocumentKind::from_path(path) {
            files.push(Candidate {
                path: path.to_path_buf(),
                kind,
            });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// [`content_hash`] of the file at `path`, streamed without buffering the
/// whole file.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hashes and extracts one file. Files over `max_bytes` are only
/// stream-hashed; their content is never held in memory.
fn read_and_extract(path: &Path, max_bytes: u64) -> (Option<String>, Extraction) {
    let read_failed = |e: std::io::Error| Extraction::Failed {
        reason: format!("read failed: {}", e),
    };
    let size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => return (None, read_failed(e)),
    };
    if size > max_bytes {
        let extraction = Extraction::from(Err::<String, _>(ExtractError::TooLarge {
            size,
            limit: max_bytes,
        }));
        return match hash_file(path) {
            Ok(hash) => (Some(hash), extraction),
            Err(e) => (None, read_failed(e)),
        };
    }
    match std::fs::read(path) {
        Ok(bytes) => (
            Some(content_hash(&bytes)),
            extract_file(path, &bytes, max_bytes),
        ),
        Err(e) => (None, read_failed(e)),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reads, hashes, extracts, and scores one file. Blocking.
pub fn analyze_file(
    candidate: &Candidate,
    clauses: &[Clause],
    options: &ScanOptions,
) -> FileAnalysis {
    let path = &candidate.path;
    let (hash, extraction) = read_and_extract(path, options.max_extract_bytes);

    if let Extraction::Failed { reason } = &extraction {
        warn!(path = %path.display(), reason = %reason, "extraction failed, scoring file name only");
    }

    let matches = match_document(
        &file_stem(path),
        extraction.text(),
        clauses,
        &options.matching,
    );

    FileAnalysis {
        file: FileMatches {
            file_path: path.clone(),
            file_name: file_name(path),
            kind: candidate.kind,
            content_hash: hash,
            matches,
        },
        extraction_failed: extraction.is_failed(),
    }
}

/// Used when a worker dies before returning: file name signal only.
fn filename_only(candidate: &Candidate, clauses: &[Clause], options: &ScanOptions) -> FileAnalysis {
    let hash = hash_file(&candidate.path).ok();
    FileAnalysis {
        file: FileMatches {
            file_path: candidate.path.clone(),
            file_name: file_name(&candidate.path),
            kind: candidate.kind,
            content_hash: hash,
            matches: match_document(
                &file_stem(&candidate.path),
                "",
                clauses,
                &options.matching,
            ),
        },
        extraction_failed: true,
    }
}

/// Runs [`analyze_file`] over `files` on a bounded pool of blocking
/// workers. Output order matches `files`.
pub async fn analyze_files(
    files: &[Candidate],
    clauses: Arc<Vec<Clause>>,
    options: &ScanOptions,
    progress: &dyn ScanProgressReporter,
) -> Vec<FileAnalysis> {
    let total = files.len() as u64;
    let semaphore = Arc::new(Semaphore::new(options.workers.max(1)));
    let shared_options = Arc::new(options.clone());
    let mut tasks = JoinSet::new();

    for (index, candidate) in files.iter().cloned().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let clauses = Arc::clone(&clauses);
        let options = Arc::clone(&shared_options);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let result = tokio::task::spawn_blocking(move || {
                analyze_file(&candidate, &clauses, &options)
            })
            .await;
            (index, result)
        });
    }

    let mut slots: Vec<Option<FileAnalysis>> = vec![None; files.len()];
    let mut done = 0u64;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(analysis))) => slots[index] = Some(analysis),
            Ok((index, Err(e))) => {
                warn!(path = %files[index].path.display(), error = %e, "file worker failed");
            }
            Err(e) => warn!(error = %e, "scan task failed"),
        }
        done += 1;
        progress.report(ScanProgressEvent::Analyzing { n: done, total });
    }

    slots
        .into_iter()
        .zip(files)
        .map(|(slot, candidate)| {
            slot.unwrap_or_else(|| filename_only(candidate, &clauses, options))
        })
        .collect()
}

/// Folds per-file analyses into a [`ScanResult`].
pub fn aggregate(analyses: Vec<FileAnalysis>) -> ScanResult {
    let mut result = ScanResult::default();
    for analysis in analyses {
        result.documents_scanned += 1;
        if analysis.extraction_failed {
            result.extraction_failures += 1;
        }
        if analysis.file.matches.is_empty() {
            result.unmatched.push(UnmatchedFile {
                file_path: analysis.file.file_path,
                file_name: analysis.file.file_name,
            });
        } else {
            result.documents_matched += 1;
            result.total_matches += analysis.file.matches.len() as u64;
            result.matches.push(analysis.file);
        }
    }
    result
}

/// Scans `folder` against `clauses`.
///
/// Fails with [`ScanError::FolderNotFound`] before any file I/O when the
/// folder is missing. Per-file failures never fail the scan.
pub async fn scan_folder(
    folder: &Path,
    clauses: &[Clause],
    options: &ScanOptions,
    progress: &dyn ScanProgressReporter,
) -> Result<ScanResult, ScanError> {
    if !folder.is_dir() {
        return Err(ScanError::FolderNotFound(folder.to_path_buf()));
    }
    progress.report(ScanProgressEvent::Discovering {
        folder: folder.display().to_string(),
    });

    let walk_root = folder.to_path_buf();
    let walk_options = options.clone();
    let files = tokio::task::spawn_blocking(move || discover_files(&walk_root, &walk_options))
        .await
        .map_err(|e| ScanError::Walk {
            folder: folder.to_path_buf(),
            message: e.to_string(),
        })??;
    debug!(folder = %folder.display(), files = files.len(), "discovered files");

    let analyses = analyze_files(&files, Arc::new(clauses.to_vec()), options, progress).await;
    Ok(aggregate(analyses))
}
