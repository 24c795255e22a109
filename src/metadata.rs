// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::convert::TryInto;
use std::os::unix::prelude::MetadataExt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::utils;

pub struct PrimaryXml;
pub struct FilelistsXml;
pub struct OtherXml;
pub struct RepomdXml;

pub const METADATA_PRIMARY: &str = "primary";
pub const METADATA_FILELISTS: &str = "filelists";
pub const METADATA_OTHER: &str = "other";
pub const METADATA_PRIMARY_DB: &str = "primary_db";
pub const METADATA_FILELISTS_DB: &str = "filelists_db";
pub const METADATA_OTHER_DB: &str = "other_db";
pub const METADATA_GROUP: &str = "group";
pub const METADATA_GROUP_GZ: &str = "group_gz";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[cfg(feature = "read_rpm")]
    #[error(transparent)]
    RpmReadError(#[from] rpm::Error),
    #[error(transparent)]
    XmlParseError(#[from] quick_xml::Error),
    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    IntFieldParseError(#[from] std::num::ParseIntError),
    #[error(transparent)]
    UnsupportedCompressionTypeError(#[from] niffler::Error),
    #[error(transparent)]
    DatabaseError(#[from] rusqlite::Error),
    #[error(transparent)]
    InvalidExcludePattern(#[from] glob::PatternError),
    #[error(transparent)]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    #[error("Checksum type {0} is not supported")]
    UnsupportedChecksumTypeError(String),
    #[error("\"{0}\" is not a valid checksum of type \"{1:?}\"")]
    InvalidChecksumError(String, ChecksumType),
    #[error("Metadata files are inconsistent: {0}")]
    InconsistentMetadataError(String),
    #[error("Missing metadata field: {0}")]
    MissingFieldError(&'static str),
    #[error("Missing metadata attribute: {0}")]
    MissingAttributeError(&'static str),
    #[error("Missing metadata header")]
    MissingHeaderError,
    #[error("Staging directory {0:?} already exists - is another process writing this repository?")]
    StagingDirExists(PathBuf),
}

/// Default namespace for primary.xml
pub const XML_NS_COMMON: &str = "http://linux.duke.edu/metadata/common";
/// Default namespace for filelists.xml
pub const XML_NS_FILELISTS: &str = "http://linux.duke.edu/metadata/filelists";
/// Default namespace for other.xml
pub const XML_NS_OTHER: &str = "http://linux.duke.edu/metadata/other";
/// Default namespace for repomd.xml
pub const XML_NS_REPO: &str = "http://linux.duke.edu/metadata/repo";
/// Namespace for rpm (used in primary.xml and repomd.xml)
pub const XML_NS_RPM: &str = "http://linux.duke.edu/metadata/rpm";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressionType {
    None,
    Gzip,
    Xz,
    Bz2,
}

impl CompressionType {
    pub fn to_file_extension(&self) -> &str {
        match self {
            CompressionType::None => "",
            CompressionType::Gzip => ".gz",
            CompressionType::Xz => ".xz",
            CompressionType::Bz2 => ".bz2",
        }
    }
}

impl TryInto<CompressionType> for &str {
    type Error = MetadataError;

    fn try_into(self) -> Result<CompressionType, Self::Error> {
        match self {
            "gz" | "gzip" => Ok(CompressionType::Gzip),
            "bz2" => Ok(CompressionType::Bz2),
            "xz" => Ok(CompressionType::Xz),
            "none" => Ok(CompressionType::None),
            _ => Err(MetadataError::UnsupportedChecksumTypeError(self.to_owned())),
        }
    }
}

/// The epoch, version and release of a package, kept as the strings they are
/// serialized as.
///
/// An absent epoch and an explicit epoch of "0" mean the same thing to consumers;
/// packages read from an RPM header always carry an explicit one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EVR {
    pub epoch: String,
    pub version: String,
    pub release: String,
}

impl EVR {
    pub fn new<T: Into<String>>(epoch: T, version: T, release: T) -> EVR {
        EVR {
            epoch: epoch.into(),
            version: version.into(),
            release: release.into(),
        }
    }

    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn values(&self) -> (&str, &str, &str) {
        (&self.epoch, &self.version, &self.release)
    }

    /// Split an `[epoch:]version[-release]` string, as found in dependency entries.
    /// Missing segments come back empty.
    pub fn parse(evr: &str) -> Self {
        let (epoch, rest) = match evr.split_once(':') {
            Some((epoch, rest)) => (epoch, rest),
            None => ("", evr),
        };
        let (version, release) = match rest.split_once('-') {
            Some((version, release)) => (version, release),
            None => (rest, ""),
        };
        EVR::new(epoch, version, release)
    }
}

/// The metadata of one package, as carried by primary.xml, filelists.xml and other.xml.
///
/// Produced either by reading the header of an RPM file on disk or by parsing existing
/// repository metadata back in.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Package {
    pub name: String,
    pub arch: String,
    pub evr: EVR,
    pub checksum: Checksum,
    pub location_href: String,
    pub location_base: Option<String>,
    pub summary: String,
    pub description: String,
    pub packager: String,
    pub url: String,
    pub time_file: u64,
    pub time_build: u64,
    pub size_package: u64,
    pub size_installed: u64,
    pub size_archive: u64,

    pub rpm_license: String,           // rpm:license
    pub rpm_vendor: String,            // rpm:vendor
    pub rpm_group: String,             // rpm:group
    pub rpm_buildhost: String,         // rpm:buildhost
    pub rpm_sourcerpm: String,         // rpm:sourcerpm
    pub rpm_header_range: HeaderRange, // rpm:header-range

    pub rpm_provides: Vec<Requirement>,    // rpm:provides
    pub rpm_requires: Vec<Requirement>,    // rpm:requires
    pub rpm_conflicts: Vec<Requirement>,   // rpm:conflicts
    pub rpm_obsoletes: Vec<Requirement>,   // rpm:obsoletes
    pub rpm_suggests: Vec<Requirement>,    // rpm:suggests
    pub rpm_enhances: Vec<Requirement>,    // rpm:enhances
    pub rpm_recommends: Vec<Requirement>,  // rpm:recommends
    pub rpm_supplements: Vec<Requirement>, // rpm:supplements

    pub rpm_changelogs: Vec<Changelog>,
    pub rpm_files: Vec<PackageFile>,
}

impl Package {
    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_epoch(&mut self, epoch: u64) -> &mut Self {
        self.evr.epoch = epoch.to_string();
        self
    }

    pub fn set_version(&mut self, version: impl Into<String>) -> &mut Self {
        self.evr.version = version.into();
        self
    }

    pub fn set_release(&mut self, release: impl Into<String>) -> &mut Self {
        self.evr.release = release.into();
        self
    }

    pub fn set_arch(&mut self, arch: impl Into<String>) -> &mut Self {
        self.arch = arch.into();
        self
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn set_evr(&mut self, evr: EVR) -> &mut Self {
        self.evr = evr;
        self
    }

    pub fn evr(&self) -> &EVR {
        &self.evr
    }

    pub fn nvra(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            self.name, self.evr.version, self.evr.release, self.arch
        )
    }

    pub fn nevra_short(&self) -> String {
        if self.evr.epoch == "0" || self.evr.epoch.is_empty() {
            self.nvra()
        } else {
            format!(
                "{}-{}:{}-{}.{}",
                self.name, self.evr.epoch, self.evr.version, self.evr.release, self.arch
            )
        }
    }

    pub fn set_checksum(&mut self, checksum: Checksum) -> &mut Self {
        self.checksum = checksum;
        self
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn pkgid(&self) -> &str {
        &self.checksum.to_values().unwrap().1
    }

    pub fn set_location_href(&mut self, location_href: impl Into<String>) -> &mut Self {
        self.location_href = location_href.into();
        self
    }

    pub fn location_href(&self) -> &str {
        &self.location_href
    }

    pub fn set_location_base(&mut self, location_base: Option<impl Into<String>>) -> &mut Self {
        self.location_base = location_base.map(|a| a.into());
        self
    }

    pub fn location_base(&self) -> Option<&str> {
        self.location_base.as_deref()
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) -> &mut Self {
        self.summary = summary.into();
        self
    }

    pub fn set_description(&mut self, description: impl Into<String>) -> &mut Self {
        self.description = description.into();
        self
    }

    pub fn set_packager(&mut self, packager: impl Into<String>) -> &mut Self {
        self.packager = packager.into();
        self
    }

    pub fn set_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.url = url.into();
        self
    }

    pub fn set_time_file(&mut self, time_file: u64) -> &mut Self {
        self.time_file = time_file;
        self
    }

    pub fn time_file(&self) -> u64 {
        self.time_file
    }

    pub fn set_time_build(&mut self, time_build: u64) -> &mut Self {
        self.time_build = time_build;
        self
    }

    pub fn set_size_package(&mut self, size_package: u64) -> &mut Self {
        self.size_package = size_package;
        self
    }

    pub fn size_package(&self) -> u64 {
        self.size_package
    }

    pub fn set_size_installed(&mut self, size_installed: u64) -> &mut Self {
        self.size_installed = size_installed;
        self
    }

    pub fn set_size_archive(&mut self, size_archive: u64) -> &mut Self {
        self.size_archive = size_archive;
        self
    }

    pub fn set_rpm_license(&mut self, license: impl Into<String>) -> &mut Self {
        self.rpm_license = license.into();
        self
    }

    pub fn set_rpm_vendor(&mut self, vendor: impl Into<String>) -> &mut Self {
        self.rpm_vendor = vendor.into();
        self
    }

    pub fn set_rpm_group(&mut self, group: impl Into<String>) -> &mut Self {
        self.rpm_group = group.into();
        self
    }

    pub fn set_rpm_buildhost(&mut self, rpm_buildhost: impl Into<String>) -> &mut Self {
        self.rpm_buildhost = rpm_buildhost.into();
        self
    }

    pub fn set_rpm_sourcerpm(&mut self, rpm_sourcerpm: impl Into<String>) -> &mut Self {
        self.rpm_sourcerpm = rpm_sourcerpm.into();
        self
    }

    pub fn set_rpm_header_range(&mut self, start: u64, end: u64) -> &mut Self {
        self.rpm_header_range = HeaderRange { start, end };
        self
    }

    pub fn set_requires(&mut self, requires: Vec<Requirement>) -> &mut Self {
        self.rpm_requires = requires;
        self
    }

    pub fn requires(&self) -> &[Requirement] {
        &self.rpm_requires
    }

    pub fn set_provides(&mut self, provides: Vec<Requirement>) -> &mut Self {
        self.rpm_provides = provides;
        self
    }

    pub fn provides(&self) -> &[Requirement] {
        &self.rpm_provides
    }

    pub fn set_conflicts(&mut self, conflicts: Vec<Requirement>) -> &mut Self {
        self.rpm_conflicts = conflicts;
        self
    }

    pub fn set_obsoletes(&mut self, obsoletes: Vec<Requirement>) -> &mut Self {
        self.rpm_obsoletes = obsoletes;
        self
    }

    pub fn set_suggests(&mut self, suggests: Vec<Requirement>) -> &mut Self {
        self.rpm_suggests = suggests;
        self
    }

    pub fn set_enhances(&mut self, enhances: Vec<Requirement>) -> &mut Self {
        self.rpm_enhances = enhances;
        self
    }

    pub fn set_recommends(&mut self, recommends: Vec<Requirement>) -> &mut Self {
        self.rpm_recommends = recommends;
        self
    }

    pub fn set_supplements(&mut self, supplements: Vec<Requirement>) -> &mut Self {
        self.rpm_supplements = supplements;
        self
    }

    pub fn add_file(&mut self, filetype: FileType, path: &str) -> &mut Self {
        self.rpm_files.push(PackageFile {
            filetype,
            path: path.to_owned(),
        });
        self
    }

    pub fn set_files(&mut self, files: Vec<PackageFile>) -> &mut Self {
        self.rpm_files = files;
        self
    }

    pub fn files(&self) -> &[PackageFile] {
        &self.rpm_files
    }

    pub fn add_changelog(&mut self, author: &str, description: &str, timestamp: u64) -> &mut Self {
        self.rpm_changelogs.push(Changelog {
            author: author.to_owned(),
            timestamp,
            description: description.to_owned(),
        });
        self
    }

    pub fn set_changelogs(&mut self, changelogs: Vec<Changelog>) -> &mut Self {
        self.rpm_changelogs = changelogs;
        self
    }

    pub fn changelogs(&self) -> &[Changelog] {
        &self.rpm_changelogs
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Default for ChecksumType {
    fn default() -> Self {
        ChecksumType::Sha256
    }
}

impl TryInto<ChecksumType> for &str {
    type Error = MetadataError;

    fn try_into(self) -> Result<ChecksumType, Self::Error> {
        match self {
            "md5" => Ok(ChecksumType::Md5),
            "sha1" => Ok(ChecksumType::Sha1),
            "sha256" => Ok(ChecksumType::Sha256),
            "sha512" => Ok(ChecksumType::Sha512),
            _ => Err(MetadataError::UnsupportedChecksumTypeError(self.to_owned())),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Checksum {
    Md5(String),
    Sha1(String),
    Sha256(String),
    Sha512(String),
    // `Unknown` exists because filelists.xml and other.xml carry a pkgid without its type
    Unknown(String),
    Empty,
}

impl Default for Checksum {
    fn default() -> Self {
        Checksum::Empty
    }
}

impl Checksum {
    pub fn try_create<N: AsRef<[u8]> + Sized>(
        checksum_type: N,
        checksum: N,
    ) -> Result<Self, MetadataError> {
        let bytes_to_str = |value| std::str::from_utf8(value).unwrap().to_owned();

        match checksum_type.as_ref() {
            b"md5" => {
                let digest = bytes_to_str(checksum.as_ref());
                if digest.len() != 32 {
                    Err(MetadataError::InvalidChecksumError(
                        digest,
                        ChecksumType::Md5,
                    ))
                } else {
                    Ok(Checksum::Md5(digest))
                }
            }
            b"sha" | b"sha1" => {
                let digest = bytes_to_str(checksum.as_ref());
                if digest.len() != 40 {
                    Err(MetadataError::InvalidChecksumError(
                        digest,
                        ChecksumType::Sha1,
                    ))
                } else {
                    Ok(Checksum::Sha1(digest))
                }
            }
            b"sha256" => {
                let digest = bytes_to_str(checksum.as_ref());
                if digest.len() != 64 {
                    Err(MetadataError::InvalidChecksumError(
                        digest,
                        ChecksumType::Sha256,
                    ))
                } else {
                    Ok(Checksum::Sha256(digest))
                }
            }
            b"sha512" => {
                let digest = bytes_to_str(checksum.as_ref());
                if digest.len() != 128 {
                    Err(MetadataError::InvalidChecksumError(
                        digest,
                        ChecksumType::Sha512,
                    ))
                } else {
                    Ok(Checksum::Sha512(digest))
                }
            }
            _ => Err(MetadataError::UnsupportedChecksumTypeError(bytes_to_str(
                checksum_type.as_ref(),
            ))),
        }
    }

    pub fn to_values<'a>(&'a self) -> Result<(&str, &'a str), MetadataError> {
        let values = match self {
            Checksum::Md5(c) => ("md5", c.as_str()),
            Checksum::Sha1(c) => ("sha1", c.as_str()),
            Checksum::Sha256(c) => ("sha256", c.as_str()),
            Checksum::Sha512(c) => ("sha512", c.as_str()),
            Checksum::Unknown(c) => ("unknown", c.as_str()),
            Checksum::Empty => panic!("Cannot take value of empty checksum"),
        };
        Ok(values)
    }

    pub fn checksum_type(&self) -> Option<ChecksumType> {
        match self {
            Checksum::Md5(_) => Some(ChecksumType::Md5),
            Checksum::Sha1(_) => Some(ChecksumType::Sha1),
            Checksum::Sha256(_) => Some(ChecksumType::Sha256),
            Checksum::Sha512(_) => Some(ChecksumType::Sha512),
            Checksum::Unknown(_) | Checksum::Empty => None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Changelog {
    pub author: String,
    pub timestamp: u64,
    pub description: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct HeaderRange {
    pub start: u64,
    pub end: u64,
}

// Requirement (Provides, Conflicts, Obsoletes, Requires and the weak variants).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Requirement {
    pub name: String,
    pub flags: Option<String>,
    pub epoch: Option<String>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub preinstall: bool,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FileType {
    File,
    Dir,
    Ghost,
}

impl FileType {
    pub fn try_create<N: AsRef<[u8]> + Sized>(val: N) -> Result<Self, MetadataError> {
        let ftype = match val.as_ref() {
            b"dir" => FileType::Dir,
            b"ghost" => FileType::Ghost,
            _ => FileType::File,
        };
        Ok(ftype)
    }

    pub fn to_values(&self) -> &[u8] {
        match self {
            FileType::File => b"file",
            FileType::Dir => b"dir",
            FileType::Ghost => b"ghost",
        }
    }
}

impl Default for FileType {
    fn default() -> Self {
        FileType::File
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PackageFile {
    pub filetype: FileType,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MetadataType {
    Primary,
    Filelists,
    Other,

    PrimaryDb,
    FilelistsDb,
    OtherDb,

    Group,
    GroupGz,

    Unknown,
}

impl From<&str> for MetadataType {
    fn from(name: &str) -> Self {
        match name {
            METADATA_PRIMARY => MetadataType::Primary,
            METADATA_FILELISTS => MetadataType::Filelists,
            METADATA_OTHER => MetadataType::Other,

            METADATA_PRIMARY_DB => MetadataType::PrimaryDb,
            METADATA_FILELISTS_DB => MetadataType::FilelistsDb,
            METADATA_OTHER_DB => MetadataType::OtherDb,

            METADATA_GROUP => MetadataType::Group,
            METADATA_GROUP_GZ => MetadataType::GroupGz,

            _ => MetadataType::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct DistroTag {
    pub cpeid: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct RepomdData {
    revision: Option<String>,
    metadata_files: Vec<RepomdRecord>,

    repo_tags: Vec<String>,
    content_tags: Vec<String>,
    distro_tags: Vec<DistroTag>,
}

impl RepomdData {
    pub fn add_record(&mut self, record: RepomdRecord) {
        self.metadata_files.push(record);
    }

    pub fn get_record(&self, rectype: &str) -> Option<&RepomdRecord> {
        self.metadata_files
            .iter()
            .find(|r| r.metadata_name == rectype)
    }

    pub fn records(&self) -> &Vec<RepomdRecord> {
        &self.metadata_files
    }

    pub fn records_mut(&mut self) -> &mut Vec<RepomdRecord> {
        &mut self.metadata_files
    }

    pub fn add_repo_tag(&mut self, repo: String) {
        self.repo_tags.push(repo)
    }

    pub fn repo_tags(&self) -> &Vec<String> {
        &self.repo_tags
    }

    pub fn add_content_tag(&mut self, content: String) {
        self.content_tags.push(content)
    }

    pub fn content_tags(&self) -> &Vec<String> {
        &self.content_tags
    }

    pub fn add_distro_tag(&mut self, name: String, cpeid: Option<String>) {
        let distro = DistroTag { name, cpeid };
        self.distro_tags.push(distro)
    }

    pub fn distro_tags(&self) -> &Vec<DistroTag> {
        &self.distro_tags
    }

    pub fn set_revision(&mut self, revision: &str) {
        self.revision = Some(revision.to_owned());
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn sort_records(&mut self) {
        fn value(item: &RepomdRecord) -> u32 {
            let mdtype = MetadataType::from(item.metadata_name.as_str());
            match mdtype {
                MetadataType::Primary => 1,
                MetadataType::Filelists => 2,
                MetadataType::Other => 3,
                MetadataType::PrimaryDb => 4,
                MetadataType::FilelistsDb => 5,
                MetadataType::OtherDb => 6,
                MetadataType::Group => 7,
                MetadataType::GroupGz => 8,
                MetadataType::Unknown => 10,
            }
        }
        self.metadata_files.sort_by(|a, b| value(a).cmp(&value(b)));
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepomdRecord {
    base_path: Option<PathBuf>,

    /// Record type
    pub metadata_name: String,
    /// Relative location of the file in a repository
    pub location_href: PathBuf,
    /// URL at which the location_href is relative - if it is not the current one
    pub location_base: Option<String>,
    /// Mtime of the file
    pub timestamp: i64,
    /// Size of the file
    pub size: Option<u64>,
    /// Checksum of the file
    pub checksum: Checksum,

    /// Size of the archive content
    pub open_size: Option<u64>,
    /// Checksum of the archive content
    pub open_checksum: Option<Checksum>,

    /// Database version (used only for sqlite databases like primary.sqlite etc.)
    pub database_version: Option<u32>,
}

impl RepomdRecord {
    pub fn new(
        name: &str,
        href: &Path,
        base: &Path,
        checksum_type: ChecksumType,
    ) -> Result<Self, MetadataError> {
        let mut record = RepomdRecord::default();
        record.metadata_name = name.to_owned();
        record.location_href = href.to_owned();
        record.base_path = Some(base.to_owned());
        record.fill(checksum_type)?;
        Ok(record)
    }

    pub fn fill(&mut self, checksum_type: ChecksumType) -> Result<(), MetadataError> {
        let file_path = self
            .base_path
            .as_ref()
            .ok_or(MetadataError::MissingFieldError("base_path"))?
            .join(&self.location_href);
        let file_metadata = file_path.metadata()?;
        self.timestamp = file_metadata.mtime();
        self.size = Some(file_metadata.size());
        self.checksum = utils::checksum_file(&file_path, checksum_type)?;
        self.open_checksum = utils::checksum_inner_file(&file_path, checksum_type)?;
        self.open_size = utils::size_inner_file(&file_path)?;

        Ok(())
    }

    /// Rename the record's file on disk to `<checksum>-<basename>` and update `location_href`.
    pub fn prepend_checksum(&mut self) -> Result<(), MetadataError> {
        let base = self
            .base_path
            .as_ref()
            .ok_or(MetadataError::MissingFieldError("base_path"))?;
        let (_, checksum_value) = self.checksum.to_values()?;
        let old_path = base.join(&self.location_href);
        let filename = old_path
            .file_name()
            .ok_or(MetadataError::MissingFieldError("location_href"))?
            .to_string_lossy()
            .to_string();
        let new_href = self
            .location_href
            .with_file_name(format!("{}-{}", checksum_value, filename));
        std::fs::rename(&old_path, base.join(&new_href))?;
        self.location_href = new_href;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evr_parse() {
        assert_eq!(EVR::parse("1.2.3-45"), EVR::new("", "1.2.3", "45"));
        assert_eq!(EVR::parse("2:9.0-1.el9"), EVR::new("2", "9.0", "1.el9"));
        assert_eq!(EVR::parse("4.1"), EVR::new("", "4.1", ""));
        assert_eq!(EVR::parse(""), EVR::new("", "", ""));
        assert_eq!(EVR::parse("0:"), EVR::new("0", "", ""));
        assert_eq!(EVR::parse(":4.1-1"), EVR::new("", "4.1", "1"));
    }

    #[test]
    fn test_checksum_try_create_rejects_bad_lengths() {
        let digest = "ab".repeat(32);
        assert!(Checksum::try_create("sha256", digest.as_str()).is_ok());
        assert!(Checksum::try_create("sha256", "abcd").is_err());
        assert!(Checksum::try_create("crc32", "abcd").is_err());
    }
}
