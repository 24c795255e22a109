// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, error, info, warn};
use rayon::prelude::*;

use crate::cache::{CacheLookup, MetadataCache};
use crate::cleanup;
use crate::metadata::{
    ChecksumType, CompressionType, MetadataError, RepomdData, RepomdRecord, RepomdXml,
    METADATA_FILELISTS, METADATA_FILELISTS_DB, METADATA_GROUP, METADATA_GROUP_GZ,
    METADATA_OTHER, METADATA_OTHER_DB, METADATA_PRIMARY, METADATA_PRIMARY_DB,
};
use crate::package::load_rpm_package;
use crate::sink::{
    SinkTrio, FILELISTS_DB_FILE, FILELISTS_XML_FILE, OTHER_DB_FILE, OTHER_XML_FILE,
    PRIMARY_DB_FILE, PRIMARY_XML_FILE,
};
use crate::sqlite::{self, DB_VERSION};
use crate::walker::{self, PackageTask};
use crate::{utils, Checksum};

const REPODATA_DIR: &str = "repodata";
const STAGING_DIR: &str = ".repodata";

/// Options controlling one indexing run. See the CLI for the meaning of each knob.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub outputdir: Option<PathBuf>,
    pub workers: usize,
    pub changelog_limit: usize,
    pub checksum_type: ChecksumType,
    pub unique_md_filenames: bool,
    pub with_databases: bool,
    pub groupfile: Option<PathBuf>,
    pub compression: CompressionType,
    pub update: bool,
    pub update_md_paths: Vec<PathBuf>,
    pub skip_stat: bool,
    pub skip_symlinks: bool,
    pub pkglist: Option<PathBuf>,
    pub excludes: Vec<String>,
    pub location_base: Option<String>,
    pub revision: Option<String>,
    pub distro_tags: Vec<(String, Option<String>)>,
    pub content_tags: Vec<String>,
    pub repo_tags: Vec<String>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            outputdir: None,
            workers: num_cpus::get(),
            changelog_limit: 10,
            checksum_type: ChecksumType::Sha256,
            unique_md_filenames: false,
            with_databases: true,
            groupfile: None,
            compression: CompressionType::Bz2,
            update: false,
            update_md_paths: Vec::new(),
            skip_stat: false,
            skip_symlinks: false,
            pkglist: None,
            excludes: Vec::new(),
            location_base: None,
            revision: None,
            distro_tags: Vec::new(),
            content_tags: Vec::new(),
            repo_tags: Vec::new(),
        }
    }
}

/// Counters reported after a run.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct IndexSummary {
    /// Packages present in the published metadata.
    pub num_packages: usize,
    /// How many of those were served from the cache instead of parsed.
    pub from_cache: usize,
    /// Tasks dropped because the package could not be read.
    pub dropped: usize,
}

/// The orchestrator: owns the staging directory, cache, sinks and worker pool for
/// one indexing run, and publishes the result atomically.
pub struct Indexer {
    input_dir: PathBuf,
    options: IndexOptions,
}

impl Indexer {
    pub fn new(input_dir: &Path, options: IndexOptions) -> Self {
        Self {
            input_dir: input_dir.to_owned(),
            options,
        }
    }

    pub fn run(&self) -> Result<IndexSummary, MetadataError> {
        if !self.input_dir.is_dir() {
            return Err(MetadataError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", self.input_dir.display()),
            )));
        }

        let output_dir = self
            .options
            .outputdir
            .clone()
            .unwrap_or_else(|| self.input_dir.clone());
        fs::create_dir_all(&output_dir)?;

        // creating the staging directory doubles as the cross-process lock
        let staging = output_dir.join(STAGING_DIR);
        if let Err(e) = fs::create_dir(&staging) {
            return match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    Err(MetadataError::StagingDirExists(staging))
                }
                _ => Err(e.into()),
            };
        }

        cleanup::install_signal_handler();
        cleanup::guard_staging(&staging);

        // failures past this point intentionally leave the staging directory on disk
        // for postmortem - only an interrupt removes it
        let summary = self.run_in_staging(&staging, &output_dir)?;

        info!(
            "{} packages indexed ({} from cache, {} dropped)",
            summary.num_packages, summary.from_cache, summary.dropped
        );
        Ok(summary)
    }

    fn run_in_staging(
        &self,
        staging: &Path,
        output_dir: &Path,
    ) -> Result<IndexSummary, MetadataError> {
        if let Some(groupfile) = &self.options.groupfile {
            let name = groupfile
                .file_name()
                .ok_or(MetadataError::MissingFieldError("groupfile"))?;
            fs::copy(groupfile, staging.join(name))?;
        }

        let cache = self.load_cache(output_dir);
        let tasks = self.gather_tasks()?;
        info!("found {} packages to index", tasks.len());

        let sink = SinkTrio::open(staging, tasks.len(), self.options.with_databases)?;

        let from_cache = AtomicUsize::new(0);
        let dropped = AtomicUsize::new(0);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers)
            .build()?;
        pool.install(|| {
            tasks
                .par_iter()
                .for_each(|task| self.process_task(task, &sink, &cache, &from_cache, &dropped));
        });

        let num_written = sink.close()?;

        self.finalize(staging, output_dir)?;

        Ok(IndexSummary {
            num_packages: num_written,
            from_cache: from_cache.into_inner(),
            dropped: dropped.into_inner(),
        })
    }

    /// Old metadata sources, merged in order: the output repository (when distinct
    /// from the input), the input repository, then each extra update path. Later
    /// sources overwrite earlier ones.
    fn load_cache(&self, output_dir: &Path) -> MetadataCache {
        let mut cache = MetadataCache::new();
        if !self.options.update {
            return cache;
        }

        if output_dir != self.input_dir {
            cache.load_repository(output_dir);
        }
        cache.load_repository(&self.input_dir);
        for path in &self.options.update_md_paths {
            cache.load_repository(path);
        }
        cache
    }

    fn gather_tasks(&self) -> Result<Vec<PackageTask>, MetadataError> {
        match &self.options.pkglist {
            Some(pkglist) => {
                walker::tasks_from_pkglist(&self.input_dir, pkglist, &self.options.excludes)
            }
            None => walker::walk_tree(
                &self.input_dir,
                &self.options.excludes,
                self.options.skip_symlinks,
            ),
        }
    }

    fn process_task(
        &self,
        task: &PackageTask,
        sink: &SinkTrio,
        cache: &MetadataCache,
        from_cache: &AtomicUsize,
        dropped: &AtomicUsize,
    ) {
        let package = match cache.lookup(task, self.options.checksum_type, self.options.skip_stat)
        {
            CacheLookup::Hit(mut package) => {
                // everything but the location fields is reused verbatim
                package.set_location_href(task.location_href.as_str());
                package.set_location_base(self.options.location_base.as_deref());
                from_cache.fetch_add(1, Ordering::Relaxed);
                package
            }
            CacheLookup::StatError(e) => {
                error!("cannot stat {}: {}", task.full_path.display(), e);
                dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            CacheLookup::Miss => {
                match load_rpm_package(
                    &task.full_path,
                    self.options.checksum_type,
                    &task.location_href,
                    self.options.location_base.as_deref(),
                    self.options.changelog_limit,
                ) {
                    Ok(package) => package,
                    Err(e) => {
                        warn!("failed to read {}: {}", task.full_path.display(), e);
                        dropped.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                }
            }
        };

        if let Err(e) = sink.write(&package) {
            warn!("failed to serialize {}: {}", task.location_href, e);
            dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        debug!("indexed {}", package.nevra_short());
    }

    /// Publish the staged artifacts: swap the staging directory into place, then
    /// fill out and write the repomd manifest describing the final bytes.
    fn finalize(&self, staging: &Path, output_dir: &Path) -> Result<(), MetadataError> {
        let final_dir = output_dir.join(REPODATA_DIR);

        if final_dir.exists() {
            remove_old_metadata(&final_dir)?;
            // whatever the user left in the old repodata survives the swap
            for entry in fs::read_dir(&final_dir)? {
                let entry = entry?;
                let target = staging.join(entry.file_name());
                if target.exists() {
                    fs::remove_file(entry.path())?;
                } else {
                    fs::rename(entry.path(), target)?;
                }
            }
            fs::remove_dir(&final_dir)?;
        }

        // the publish-commit point - everything before this is invisible to consumers
        fs::rename(staging, &final_dir)?;
        cleanup::clear_staging();

        let mut repomd = RepomdData::default();
        if let Some(revision) = &self.options.revision {
            repomd.set_revision(revision);
        }
        for tag in &self.options.repo_tags {
            repomd.add_repo_tag(tag.clone());
        }
        for tag in &self.options.content_tags {
            repomd.add_content_tag(tag.clone());
        }
        for (name, cpeid) in &self.options.distro_tags {
            repomd.add_distro_tag(name.clone(), cpeid.clone());
        }

        // checksums are computed from the published files so they describe the final bytes
        let xml_artifacts = [
            (METADATA_PRIMARY, PRIMARY_XML_FILE),
            (METADATA_FILELISTS, FILELISTS_XML_FILE),
            (METADATA_OTHER, OTHER_XML_FILE),
        ];
        let mut xml_checksums: Vec<Checksum> = Vec::new();
        for (name, filename) in xml_artifacts {
            let record = RepomdRecord::new(
                name,
                &Path::new(REPODATA_DIR).join(filename),
                output_dir,
                self.options.checksum_type,
            )?;
            xml_checksums.push(record.checksum.clone());
            repomd.add_record(record);
        }

        if self.options.with_databases {
            let db_artifacts = [
                (METADATA_PRIMARY_DB, PRIMARY_DB_FILE),
                (METADATA_FILELISTS_DB, FILELISTS_DB_FILE),
                (METADATA_OTHER_DB, OTHER_DB_FILE),
            ];
            for ((name, filename), xml_checksum) in db_artifacts.iter().zip(&xml_checksums) {
                let db_path = final_dir.join(filename);
                // couple the database to its XML document for consumers that check
                sqlite::update_db_checksum(&db_path, xml_checksum)?;
                let compressed = utils::compress_file(&db_path, self.options.compression)?;
                fs::remove_file(&db_path)?;

                let compressed_name = compressed
                    .file_name()
                    .ok_or(MetadataError::MissingFieldError("location_href"))?;
                let mut record = RepomdRecord::new(
                    name,
                    &Path::new(REPODATA_DIR).join(compressed_name),
                    output_dir,
                    self.options.checksum_type,
                )?;
                record.database_version = Some(DB_VERSION);
                repomd.add_record(record);
            }
        }

        if let Some(groupfile) = &self.options.groupfile {
            let name = groupfile
                .file_name()
                .ok_or(MetadataError::MissingFieldError("groupfile"))?;
            let group_path = final_dir.join(name);
            repomd.add_record(RepomdRecord::new(
                METADATA_GROUP,
                &Path::new(REPODATA_DIR).join(name),
                output_dir,
                self.options.checksum_type,
            )?);

            let compressed = utils::compress_file(&group_path, self.options.compression)?;
            let compressed_name = compressed
                .file_name()
                .ok_or(MetadataError::MissingFieldError("groupfile"))?;
            repomd.add_record(RepomdRecord::new(
                METADATA_GROUP_GZ,
                &Path::new(REPODATA_DIR).join(compressed_name),
                output_dir,
                self.options.checksum_type,
            )?);
        }

        if self.options.unique_md_filenames {
            for record in repomd.records_mut() {
                record.prepend_checksum()?;
            }
        }

        repomd.sort_records();
        let (_, mut writer) = utils::xml_writer_for_path(
            &final_dir.join(RepomdXml::filename()),
            CompressionType::None,
        )?;
        RepomdXml::write_data(&repomd, &mut writer)?;
        writer.inner().flush()?;

        Ok(())
    }
}

/// Delete the previous run's metadata artifacts from an existing `repodata/`
/// directory: everything the old manifest references, the manifest itself, and
/// any artifact with a well-known name the manifest forgot to mention.
fn remove_old_metadata(final_dir: &Path) -> Result<(), MetadataError> {
    let repomd_path = final_dir.join(RepomdXml::filename());
    if repomd_path.exists() {
        if let Ok(reader) = utils::xml_reader_from_file(&repomd_path) {
            if let Ok(repomd) = RepomdXml::read_data(reader) {
                for record in repomd.records() {
                    if let Some(name) = record.location_href.file_name() {
                        let _ = fs::remove_file(final_dir.join(name));
                    }
                }
            }
        }
        fs::remove_file(&repomd_path)?;
    }

    for entry in fs::read_dir(final_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_metadata_filename(&name) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn is_metadata_filename(name: &str) -> bool {
    // tolerate `<checksum>-primary.xml.gz` style names
    let name = match name.split_once('-') {
        Some((prefix, rest))
            if prefix.len() >= 32 && prefix.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            rest
        }
        _ => name,
    };

    const STEMS: [&str; 6] = [
        "primary.xml",
        "filelists.xml",
        "other.xml",
        "primary.sqlite",
        "filelists.sqlite",
        "other.sqlite",
    ];
    STEMS.iter().any(|stem| {
        name == *stem
            || [".gz", ".bz2", ".xz"]
                .iter()
                .any(|ext| name.strip_suffix(ext) == Some(stem))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_metadata_filename() {
        assert!(is_metadata_filename("primary.xml.gz"));
        assert!(is_metadata_filename("filelists.sqlite.bz2"));
        assert!(is_metadata_filename("other.sqlite"));
        assert!(is_metadata_filename(
            "6d0fd7f08cef63677726973d327e0b99f819b1983f90c2b656bb27cd2112cb7f-primary.xml.gz"
        ));
        assert!(!is_metadata_filename("repomd.xml"));
        assert!(!is_metadata_filename("comps.xml"));
        assert!(!is_metadata_filename("horse-4.1-1.noarch.rpm"));
    }
}
