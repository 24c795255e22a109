// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::debug;

use crate::MetadataError;

const PACKAGE_SUFFIX: &str = ".rpm";

/// One unit of work: a package archive to be indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageTask {
    /// Absolute (or root-joined) path of the archive on disk.
    pub full_path: PathBuf,
    /// Basename of the archive, the key used for cache lookups.
    pub filename: String,
    /// Path relative to the scanned root, stored as the package's location.
    pub location_href: String,
}

impl PackageTask {
    fn new(root: &Path, relative: &Path) -> Self {
        let location_href = relative.to_string_lossy().into_owned();
        let filename = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            full_path: root.join(relative),
            filename,
            location_href,
        }
    }
}

fn compile_excludes(excludes: &[String]) -> Result<Vec<glob::Pattern>, MetadataError> {
    excludes
        .iter()
        .map(|p| glob::Pattern::new(p).map_err(MetadataError::from))
        .collect()
}

fn is_excluded(relative: &Path, excludes: &[glob::Pattern]) -> bool {
    let relative = relative.to_string_lossy();
    excludes.iter().any(|pattern| pattern.matches(&relative))
}

/// Enumerate package archives under `root` breadth-first.
///
/// Symbolic links (to directories or files) are skipped entirely when `skip_symlinks`
/// is set. Directory entries are visited in name order so that repeated runs see
/// the same task order.
pub fn walk_tree(
    root: &Path,
    excludes: &[String],
    skip_symlinks: bool,
) -> Result<Vec<PackageTask>, MetadataError> {
    let excludes = compile_excludes(excludes)?;
    let mut tasks = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(root.to_owned());

    while let Some(dir) = queue.pop_front() {
        let mut entries: Vec<_> = std::fs::read_dir(&dir)?.collect::<Result<_, _>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            let file_type = entry.file_type()?;

            if skip_symlinks && file_type.is_symlink() {
                debug!("skipping symlink {}", path.display());
                continue;
            }

            // resolve symlinks we do follow, so linked directories still get walked
            let resolved_type = if file_type.is_symlink() {
                match path.metadata() {
                    Ok(metadata) => metadata.file_type(),
                    Err(_) => continue, // dangling link
                }
            } else {
                file_type
            };

            if resolved_type.is_dir() {
                queue.push_back(path);
                continue;
            }

            if !entry.file_name().to_string_lossy().ends_with(PACKAGE_SUFFIX) {
                continue;
            }

            let relative = path
                .strip_prefix(root)
                .expect("walked path is always under the root")
                .to_owned();
            if is_excluded(&relative, &excludes) {
                debug!("excluding {}", relative.display());
                continue;
            }

            tasks.push(PackageTask::new(root, &relative));
        }
    }

    Ok(tasks)
}

/// Build the task list from an explicit file of repo-relative package paths,
/// one per line. No traversal is performed; the files must exist by the time
/// workers open them.
pub fn tasks_from_pkglist(
    root: &Path,
    pkglist: &Path,
    excludes: &[String],
) -> Result<Vec<PackageTask>, MetadataError> {
    let excludes = compile_excludes(excludes)?;
    let mut tasks = Vec::new();

    for line in BufReader::new(File::open(pkglist)?).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let relative = PathBuf::from(line);
        if is_excluded(&relative, &excludes) {
            debug!("excluding {}", relative.display());
            continue;
        }
        tasks.push(PackageTask::new(root, &relative));
    }

    Ok(tasks)
}
