// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::BufReader;
use std::path::Path;

use crate::filelist::FilelistsXmlReader;
use crate::other::OtherXmlReader;
use crate::primary::PrimaryXmlReader;
use crate::{FilelistsXml, MetadataError, OtherXml, Package, PrimaryXml};
use crate::{utils, RepomdData};

#[cfg(feature = "read_rpm")]
pub mod rpm_parsing {
    use std::fs::File;
    use std::time::SystemTime;

    use crate::{Changelog, ChecksumType, PackageFile, Requirement, EVR};

    use super::*;

    impl TryFrom<rpm::Dependency> for Requirement {
        type Error = MetadataError;

        fn try_from(d: rpm::Dependency) -> Result<Self, Self::Error> {
            let flags = if d.flags.contains(rpm::DependencyFlags::GE) {
                Some("GE".to_owned())
            } else if d.flags.contains(rpm::DependencyFlags::LE) {
                Some("LE".to_owned())
            } else if d.flags.contains(rpm::DependencyFlags::EQUAL) {
                Some("EQ".to_owned())
            } else if d.flags.contains(rpm::DependencyFlags::LESS) {
                Some("LT".to_owned())
            } else if d.flags.contains(rpm::DependencyFlags::GREATER) {
                Some("GT".to_owned())
            } else {
                None
            };

            let pre = d.flags
                & (rpm::DependencyFlags::SCRIPT_PRE
                    | rpm::DependencyFlags::SCRIPT_POST
                    | rpm::DependencyFlags::PREREQ);

            let evr = EVR::parse(&d.version);

            let epoch = if evr.epoch().is_empty() {
                if d.version.is_empty() {
                    None
                } else {
                    Some("0".to_string())
                }
            } else {
                Some(evr.epoch.to_string())
            };
            let version = if evr.version().is_empty() && d.version.is_empty() {
                None
            } else {
                Some(evr.version.to_string())
            };
            let release = if evr.release().is_empty() {
                None
            } else {
                Some(evr.release.to_string())
            };

            Ok(Requirement {
                name: d.name,
                flags,
                epoch,
                version,
                release,
                preinstall: !pre.is_empty(),
            })
        }
    }

    impl From<rpm::ChangelogEntry> for Changelog {
        fn from(value: rpm::ChangelogEntry) -> Self {
            Changelog {
                author: value.name,
                timestamp: value.timestamp,
                description: value.description,
            }
        }
    }

    impl From<rpm::FileEntry> for PackageFile {
        fn from(value: rpm::FileEntry) -> Self {
            let ft = if value.flags.contains(rpm::FileFlags::GHOST) {
                crate::FileType::Ghost
            } else {
                match value.mode.file_type() {
                    rpm::FileType::Dir => crate::FileType::Dir,
                    _ => crate::FileType::File,
                }
            };
            let path = value.path.to_string_lossy().into_owned();
            PackageFile { filetype: ft, path }
        }
    }

    /// Read one RPM file's header and produce the full metadata record for it.
    ///
    /// `location_href` and `location_base` are stored verbatim. At most `changelog_limit`
    /// changelog entries are retained, oldest entries dropped first.
    pub fn load_rpm_package(
        path: &Path,
        checksum_type: ChecksumType,
        location_href: &str,
        location_base: Option<&str>,
        changelog_limit: usize,
    ) -> Result<Package, MetadataError> {
        let file = File::open(path)?;
        let file_metadata = file.metadata()?;

        let pkg = rpm::PackageMetadata::parse(&mut BufReader::new(&file))?;

        let mut pkg_metadata = Package::default();

        pkg_metadata.set_name(pkg.get_name()?);

        let arch = if pkg.is_source_package() {
            "src"
        } else {
            pkg.get_arch()?
        };

        pkg_metadata.set_arch(arch);
        pkg_metadata.set_epoch(pkg.get_epoch().unwrap_or(0) as u64);
        pkg_metadata.set_version(pkg.get_version()?);
        pkg_metadata.set_release(pkg.get_release()?);

        pkg_metadata.set_summary(pkg.get_summary()?);
        pkg_metadata.set_description(pkg.get_description()?);
        pkg_metadata.set_packager(pkg.get_packager().unwrap_or_default());
        pkg_metadata.set_url(pkg.get_url().unwrap_or_default());
        pkg_metadata.set_time_build(pkg.get_build_time()?);
        pkg_metadata.set_rpm_license(pkg.get_license()?);
        pkg_metadata.set_rpm_vendor(pkg.get_vendor().unwrap_or_default());
        pkg_metadata.set_rpm_group(pkg.get_group()?);
        pkg_metadata.set_rpm_buildhost(pkg.get_build_host()?);
        pkg_metadata.set_rpm_sourcerpm(pkg.get_source_rpm().unwrap_or_default());

        let archive_size = pkg
            .signature
            .get_entry_data_as_u64(rpm::IndexSignatureTag::RPMSIGTAG_LONGARCHIVESIZE)
            .unwrap_or_else(|_| {
                pkg.signature
                    .get_entry_data_as_u32(rpm::IndexSignatureTag::RPMSIGTAG_PAYLOADSIZE)
                    .unwrap_or(0) as u64
            });
        pkg_metadata.set_size_archive(archive_size);
        pkg_metadata.set_size_installed(pkg.get_installed_size()?);

        fn convert_deps(
            requirements: Vec<rpm::Dependency>,
            filter_rpmlib: bool,
        ) -> Result<Vec<Requirement>, MetadataError> {
            let mut out = Vec::new();
            for r in requirements.into_iter() {
                if filter_rpmlib && r.name.starts_with("rpmlib(") {
                    continue;
                }
                out.push(r.try_into()?)
            }
            Ok(out)
        }
        pkg_metadata.set_requires(convert_deps(pkg.get_requires()?, true)?);
        pkg_metadata.set_provides(convert_deps(pkg.get_provides()?, false)?);
        pkg_metadata.set_conflicts(convert_deps(pkg.get_conflicts()?, false)?);
        pkg_metadata.set_obsoletes(convert_deps(pkg.get_obsoletes()?, false)?);
        pkg_metadata.set_suggests(convert_deps(pkg.get_suggests()?, false)?);
        pkg_metadata.set_enhances(convert_deps(pkg.get_enhances()?, false)?);
        pkg_metadata.set_recommends(convert_deps(pkg.get_recommends()?, false)?);
        pkg_metadata.set_supplements(convert_deps(pkg.get_supplements()?, false)?);

        let mut changelogs: Vec<Changelog> = pkg
            .get_changelog_entries()?
            .into_iter()
            .map(|c| c.into())
            .collect();
        changelogs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        truncate_changelogs(&mut changelogs, changelog_limit);
        pkg_metadata.set_changelogs(changelogs);

        let mut files: Vec<PackageFile> = Vec::new();
        for f in pkg.get_file_entries()?.into_iter() {
            files.push(f.into())
        }
        pkg_metadata.set_files(files);

        pkg_metadata.set_checksum(utils::checksum_file(path, checksum_type)?);
        pkg_metadata.set_location_href(location_href);
        pkg_metadata.set_location_base(location_base);

        let file_size = file_metadata.len();
        let unix_timestamp = file_metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        pkg_metadata.set_size_package(file_size);
        pkg_metadata.set_time_file(unix_timestamp);

        let offsets = pkg.get_package_segment_offsets();
        pkg_metadata.set_rpm_header_range(offsets.header, offsets.payload);

        Ok(pkg_metadata)
    }
}

#[cfg(feature = "read_rpm")]
pub use rpm_parsing::load_rpm_package;

/// Keep the newest `limit` changelog entries of an ascending-by-time list.
pub(crate) fn truncate_changelogs(changelogs: &mut Vec<crate::Changelog>, limit: usize) {
    if changelogs.len() > limit {
        changelogs.drain(..changelogs.len() - limit);
    }
}

/// Reads primary.xml, filelists.xml and other.xml in lockstep, yielding one complete
/// [`Package`] at a time without holding the whole repository in memory.
pub struct PackageIterator {
    primary_xml: PrimaryXmlReader<BufReader<Box<dyn std::io::Read + Send>>>,
    filelists_xml: FilelistsXmlReader<BufReader<Box<dyn std::io::Read + Send>>>,
    other_xml: OtherXmlReader<BufReader<Box<dyn std::io::Read + Send>>>,

    num_packages: usize,
    num_remaining: usize,
    in_progress_package: Option<Package>,
}

impl PackageIterator {
    pub fn from_repodata(base: &Path, repomd: &RepomdData) -> Result<Self, MetadataError> {
        let primary_href = repomd
            .get_record(crate::metadata::METADATA_PRIMARY)
            .ok_or(MetadataError::MissingFieldError("primary"))?;
        let filelists_href = repomd
            .get_record(crate::metadata::METADATA_FILELISTS)
            .ok_or(MetadataError::MissingFieldError("filelists"))?;
        let other_href = repomd
            .get_record(crate::metadata::METADATA_OTHER)
            .ok_or(MetadataError::MissingFieldError("other"))?;

        Self::from_files(
            &base.join(&primary_href.location_href),
            &base.join(&filelists_href.location_href),
            &base.join(&other_href.location_href),
        )
    }

    pub fn from_files(
        primary_path: &Path,
        filelists_path: &Path,
        other_path: &Path,
    ) -> Result<Self, MetadataError> {
        let primary_xml = PrimaryXml::new_reader(utils::xml_reader_from_file(primary_path)?);
        let filelists_xml = FilelistsXml::new_reader(utils::xml_reader_from_file(filelists_path)?);
        let other_xml = OtherXml::new_reader(utils::xml_reader_from_file(other_path)?);

        let mut parser = Self {
            primary_xml,
            filelists_xml,
            other_xml,
            num_packages: 0,
            num_remaining: 0,
            in_progress_package: None,
        };
        parser.parse_headers()?;

        Ok(parser)
    }

    fn parse_headers(&mut self) -> Result<(), MetadataError> {
        let primary_pkg_count = self.primary_xml.read_header()?;
        let filelists_pkg_count = self.filelists_xml.read_header()?;
        let other_pkg_count = self.other_xml.read_header()?;

        if primary_pkg_count != filelists_pkg_count || primary_pkg_count != other_pkg_count {
            return Err(MetadataError::InconsistentMetadataError(
                "Metadata package counts don't match".to_owned(),
            ));
        }

        self.num_packages = primary_pkg_count;
        self.num_remaining = self.num_packages;

        Ok(())
    }

    pub fn parse_package(&mut self) -> Result<Option<Package>, MetadataError> {
        self.primary_xml
            .read_package(&mut self.in_progress_package)?;
        self.filelists_xml
            .read_package(&mut self.in_progress_package)?;
        self.other_xml.read_package(&mut self.in_progress_package)?;

        let package = self.in_progress_package.take();

        // some repos declare fewer packages in the header than they carry - don't trust it blindly
        if package.is_some() {
            self.num_remaining = self.num_remaining.saturating_sub(1);
        }

        Ok(package)
    }

    pub fn remaining_packages(&self) -> usize {
        self.num_remaining
    }

    pub fn total_packages(&self) -> usize {
        self.num_packages
    }
}

impl Iterator for PackageIterator {
    type Item = Result<Package, MetadataError>;
    fn next(&mut self) -> Option<Self::Item> {
        self.parse_package().transpose()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining_packages()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Changelog;

    fn changelog(timestamp: u64) -> Changelog {
        Changelog {
            author: format!("author {}", timestamp),
            timestamp,
            description: String::new(),
        }
    }

    #[test]
    fn test_truncate_changelogs_keeps_newest() {
        let mut changelogs = vec![changelog(100), changelog(200), changelog(300)];
        truncate_changelogs(&mut changelogs, 2);
        assert_eq!(
            changelogs.iter().map(|c| c.timestamp).collect::<Vec<_>>(),
            vec![200, 300]
        );

        let mut changelogs = vec![changelog(100)];
        truncate_changelogs(&mut changelogs, 10);
        assert_eq!(changelogs.len(), 1);

        let mut changelogs = vec![changelog(100), changelog(200)];
        truncate_changelogs(&mut changelogs, 0);
        assert!(changelogs.is_empty());
    }
}
