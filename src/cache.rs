// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::os::unix::prelude::MetadataExt;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::walker::PackageTask;
use crate::{utils, ChecksumType, MetadataError, Package, PackageIterator, RepomdXml};

/// Result of consulting the cache for one task.
pub enum CacheLookup {
    /// A cached record matched; its location fields still carry the old run's values.
    Hit(Package),
    /// No usable record, the package must be parsed fresh.
    Miss,
    /// The package exists in the cache but could not be stat'ed on disk.
    StatError(std::io::Error),
}

/// Previously-computed package records, keyed by archive basename.
///
/// Loaded once before the worker pool starts and immutable afterwards, so workers
/// can read it without locking. Two packages with the same basename in different
/// subdirectories collide; the last one loaded wins.
#[derive(Default)]
pub struct MetadataCache {
    records: IndexMap<String, Package>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert(&mut self, filename: String, package: Package) {
        self.records.insert(filename, package);
    }

    /// Load old metadata from a repository root (a directory containing `repodata/`).
    ///
    /// Best-effort: a source which cannot be read logs a warning and contributes
    /// nothing. Records loaded later overwrite earlier ones with the same basename.
    pub fn load_repository(&mut self, repo_path: &Path) {
        match self.try_load_repository(repo_path) {
            Ok(count) => info!(
                "loaded {} cached package records from {}",
                count,
                repo_path.display()
            ),
            Err(e) => warn!(
                "could not load old metadata from {}: {}",
                repo_path.display(),
                e
            ),
        }
    }

    fn try_load_repository(&mut self, repo_path: &Path) -> Result<usize, MetadataError> {
        let (base, repomd_path) = locate_repomd(repo_path)?;
        let repomd = RepomdXml::read_data(utils::xml_reader_from_file(&repomd_path)?)?;

        let mut count = 0;
        for package in PackageIterator::from_repodata(&base, &repomd)? {
            let package = package?;
            let filename = Path::new(package.location_href())
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| package.location_href().to_owned());
            self.records.insert(filename, package);
            count += 1;
        }
        Ok(count)
    }

    /// Look up a task by filename and validate the record against the file on disk.
    ///
    /// With `skip_stat` the record is trusted unconditionally. Otherwise the file's
    /// mtime and size must match the record, and the record's checksum must already
    /// be of the configured type - anything else forces a fresh parse.
    pub fn lookup(
        &self,
        task: &PackageTask,
        checksum_type: ChecksumType,
        skip_stat: bool,
    ) -> CacheLookup {
        let cached = match self.records.get(&task.filename) {
            Some(record) => record,
            None => return CacheLookup::Miss,
        };

        if !skip_stat {
            let metadata = match std::fs::metadata(&task.full_path) {
                Ok(metadata) => metadata,
                Err(e) => return CacheLookup::StatError(e),
            };
            if metadata.mtime() as u64 != cached.time_file()
                || metadata.size() != cached.size_package()
            {
                debug!("cached record for {} is stale", task.filename);
                return CacheLookup::Miss;
            }
            if cached.checksum().checksum_type() != Some(checksum_type) {
                debug!(
                    "cached record for {} has the wrong checksum type",
                    task.filename
                );
                return CacheLookup::Miss;
            }
        }

        CacheLookup::Hit(cached.clone())
    }
}

/// Find `repomd.xml` under a repository root, tolerating a path that points
/// directly at the `repodata/` directory. Returns the root the metadata's
/// location hrefs are relative to, along with the manifest path.
fn locate_repomd(repo_path: &Path) -> Result<(PathBuf, PathBuf), MetadataError> {
    let candidate = repo_path.join("repodata").join(RepomdXml::filename());
    if candidate.exists() {
        return Ok((repo_path.to_owned(), candidate));
    }
    let candidate = repo_path.join(RepomdXml::filename());
    if candidate.exists() {
        let base = repo_path.parent().unwrap_or(repo_path).to_owned();
        return Ok((base, candidate));
    }
    Err(MetadataError::IoError(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no repomd.xml found under {}", repo_path.display()),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Checksum;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn task_for(root: &Path, filename: &str) -> PackageTask {
        PackageTask {
            full_path: root.join(filename),
            filename: filename.to_owned(),
            location_href: filename.to_owned(),
        }
    }

    fn cached_package(filename: &str, time_file: u64, size: u64) -> Package {
        let mut pkg = Package::default();
        pkg.set_name("horse")
            .set_arch("noarch")
            .set_epoch(0)
            .set_version("4.1")
            .set_release("1")
            .set_checksum(Checksum::Sha256("aa".repeat(32)))
            .set_location_href(filename)
            .set_time_file(time_file)
            .set_size_package(size);
        pkg
    }

    #[test]
    fn test_lookup_validates_stat() -> Result<(), MetadataError> {
        let dir = tempdir::TempDir::new("test_cache_lookup")?;
        let root = dir.path();
        let filename = "horse-4.1-1.noarch.rpm";
        std::fs::File::create(root.join(filename))?.write_all(b"not really an rpm")?;
        let metadata = std::fs::metadata(root.join(filename))?;

        let mut cache = MetadataCache::new();
        cache.insert(
            filename.to_owned(),
            cached_package(filename, metadata.mtime() as u64, metadata.size()),
        );

        let task = task_for(root, filename);

        // matching mtime + size + checksum type
        assert!(matches!(
            cache.lookup(&task, ChecksumType::Sha256, false),
            CacheLookup::Hit(_)
        ));

        // checksum type mismatch
        assert!(matches!(
            cache.lookup(&task, ChecksumType::Sha1, false),
            CacheLookup::Miss
        ));

        // unknown filename
        assert!(matches!(
            cache.lookup(&task_for(root, "other.rpm"), ChecksumType::Sha256, false),
            CacheLookup::Miss
        ));
        Ok(())
    }

    #[test]
    fn test_lookup_stale_mtime() -> Result<(), MetadataError> {
        let dir = tempdir::TempDir::new("test_cache_stale")?;
        let root = dir.path();
        let filename = "horse-4.1-1.noarch.rpm";
        std::fs::File::create(root.join(filename))?.write_all(b"not really an rpm")?;
        let metadata = std::fs::metadata(root.join(filename))?;

        let mut cache = MetadataCache::new();
        cache.insert(
            filename.to_owned(),
            cached_package(filename, metadata.mtime() as u64 + 1, metadata.size()),
        );

        let task = task_for(root, filename);
        assert!(matches!(
            cache.lookup(&task, ChecksumType::Sha256, false),
            CacheLookup::Miss
        ));

        // skip_stat trusts the record unconditionally
        assert!(matches!(
            cache.lookup(&task, ChecksumType::Sha256, true),
            CacheLookup::Hit(_)
        ));
        Ok(())
    }

    #[test]
    fn test_lookup_stat_error() {
        let mut cache = MetadataCache::new();
        cache.insert(
            "gone.rpm".to_owned(),
            cached_package("gone.rpm", 1000, 1000),
        );

        let task = task_for(Path::new("/nonexistent"), "gone.rpm");
        assert!(matches!(
            cache.lookup(&task, ChecksumType::Sha256, false),
            CacheLookup::StatError(_)
        ));
        // with skip_stat the file is never touched
        assert!(matches!(
            cache.lookup(&task, ChecksumType::Sha256, true),
            CacheLookup::Hit(_)
        ));
    }

    #[test]
    fn test_last_writer_wins() {
        let mut cache = MetadataCache::new();
        let mut first = cached_package("horse-4.1-1.noarch.rpm", 1, 1);
        first.set_summary("first");
        let mut second = cached_package("horse-4.1-1.noarch.rpm", 2, 2);
        second.set_summary("second");

        cache.insert("horse-4.1-1.noarch.rpm".to_owned(), first);
        cache.insert("horse-4.1-1.noarch.rpm".to_owned(), second);

        assert_eq!(cache.len(), 1);
        let task = task_for(Path::new("/nonexistent"), "horse-4.1-1.noarch.rpm");
        match cache.lookup(&task, ChecksumType::Sha256, true) {
            CacheLookup::Hit(pkg) => assert_eq!(pkg.summary, "second"),
            _ => panic!("expected a cache hit"),
        }
    }
}
