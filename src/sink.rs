// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use log::warn;

use crate::metadata::{CompressionType, MetadataError, Package};
use crate::sqlite::{FilelistsDatabase, OtherDatabase, PrimaryDatabase};
use crate::{utils, FilelistsXml, OtherXml, PrimaryXml};

/// Filenames created inside the staging `repodata/` directory.
pub const PRIMARY_XML_FILE: &str = "primary.xml.gz";
pub const FILELISTS_XML_FILE: &str = "filelists.xml.gz";
pub const OTHER_XML_FILE: &str = "other.xml.gz";
pub const PRIMARY_DB_FILE: &str = "primary.sqlite";
pub const FILELISTS_DB_FILE: &str = "filelists.sqlite";
pub const OTHER_DB_FILE: &str = "other.sqlite";

trait PackageDatabase {
    fn add_package(&mut self, pkg: &Package) -> Result<(), MetadataError>;
    fn finish(self) -> Result<(), MetadataError>;
}

impl PackageDatabase for PrimaryDatabase {
    fn add_package(&mut self, pkg: &Package) -> Result<(), MetadataError> {
        PrimaryDatabase::add_package(self, pkg)
    }
    fn finish(self) -> Result<(), MetadataError> {
        PrimaryDatabase::finish(self)
    }
}

impl PackageDatabase for FilelistsDatabase {
    fn add_package(&mut self, pkg: &Package) -> Result<(), MetadataError> {
        FilelistsDatabase::add_package(self, pkg)
    }
    fn finish(self) -> Result<(), MetadataError> {
        FilelistsDatabase::finish(self)
    }
}

impl PackageDatabase for OtherDatabase {
    fn add_package(&mut self, pkg: &Package) -> Result<(), MetadataError> {
        OtherDatabase::add_package(self, pkg)
    }
    fn finish(self) -> Result<(), MetadataError> {
        OtherDatabase::finish(self)
    }
}

/// One output stream: a compressed XML document plus an optional database, along
/// with the first error encountered while appending to either.
struct SinkState<D: PackageDatabase> {
    document: &'static str,
    stream: Box<dyn Write + Send>,
    database: Option<D>,
    error: Option<MetadataError>,
    num_written: usize,
}

impl<D: PackageDatabase> SinkState<D> {
    fn append(&mut self, fragment: &[u8], pkg: &Package) {
        if self.error.is_some() {
            // the stream is already broken, don't make the damage worse
            return;
        }
        let result = self
            .stream
            .write_all(b"\n")
            .and_then(|_| self.stream.write_all(fragment))
            .map_err(MetadataError::from)
            .and_then(|_| match self.database.as_mut() {
                Some(db) => db.add_package(pkg),
                None => Ok(()),
            });
        match result {
            Ok(()) => self.num_written += 1,
            Err(e) => {
                warn!(
                    "failed to write {} entry for {}: {}",
                    self.document,
                    pkg.location_href(),
                    e
                );
                self.error = Some(e);
            }
        }
    }

    fn close(mut self, footer: &[u8], num_declared: usize) -> Result<usize, MetadataError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.stream.write_all(b"\n")?;
        self.stream.write_all(footer)?;
        self.stream.flush()?;
        // the compression encoder finishes its stream when dropped
        drop(self.stream);

        if let Some(db) = self.database {
            db.finish()?;
        }

        if self.num_written != num_declared {
            warn!(
                "{} declares {} packages but contains {}",
                self.document, num_declared, self.num_written
            );
        }
        Ok(self.num_written)
    }
}

/// The three append-only output streams, each guarded by its own mutex.
///
/// Workers serialize a package's XML fragments up front, then take the three locks one
/// at a time in a fixed order (primary, filelists, other). The locks are never held
/// together - each stream is an independent critical section, so a worker can append
/// to filelists while another is still appending to primary.
pub struct SinkTrio {
    num_declared: usize,
    primary: Mutex<SinkState<PrimaryDatabase>>,
    filelists: Mutex<SinkState<FilelistsDatabase>>,
    other: Mutex<SinkState<OtherDatabase>>,
}

impl SinkTrio {
    /// Open the three compressed XML streams (and databases, unless disabled) inside
    /// `repodata_dir` and write each preamble with `packages="num_pkgs"`.
    pub fn open(
        repodata_dir: &Path,
        num_pkgs: usize,
        with_databases: bool,
    ) -> Result<Self, MetadataError> {
        let (_, mut primary_stream) = utils::compressed_writer(
            &repodata_dir.join(PrimaryXml::filename()),
            CompressionType::Gzip,
        )?;
        let (_, mut filelists_stream) = utils::compressed_writer(
            &repodata_dir.join(FilelistsXml::filename()),
            CompressionType::Gzip,
        )?;
        let (_, mut other_stream) = utils::compressed_writer(
            &repodata_dir.join(OtherXml::filename()),
            CompressionType::Gzip,
        )?;

        primary_stream.write_all(&PrimaryXml::header_bytes(num_pkgs)?)?;
        filelists_stream.write_all(&FilelistsXml::header_bytes(num_pkgs)?)?;
        other_stream.write_all(&OtherXml::header_bytes(num_pkgs)?)?;

        let (primary_db, filelists_db, other_db) = if with_databases {
            (
                Some(PrimaryDatabase::create(&repodata_dir.join(PRIMARY_DB_FILE))?),
                Some(FilelistsDatabase::create(
                    &repodata_dir.join(FILELISTS_DB_FILE),
                )?),
                Some(OtherDatabase::create(&repodata_dir.join(OTHER_DB_FILE))?),
            )
        } else {
            (None, None, None)
        };

        Ok(Self {
            num_declared: num_pkgs,
            primary: Mutex::new(SinkState {
                document: "primary",
                stream: primary_stream,
                database: primary_db,
                error: None,
                num_written: 0,
            }),
            filelists: Mutex::new(SinkState {
                document: "filelists",
                stream: filelists_stream,
                database: filelists_db,
                error: None,
                num_written: 0,
            }),
            other: Mutex::new(SinkState {
                document: "other",
                stream: other_stream,
                database: other_db,
                error: None,
                num_written: 0,
            }),
        })
    }

    /// Fan one package record out into all three streams.
    ///
    /// Serialization happens outside the locks; IO and database errors are recorded
    /// against the affected stream and surfaced by [`SinkTrio::close`].
    pub fn write(&self, pkg: &Package) -> Result<(), MetadataError> {
        let primary_fragment = PrimaryXml::package_bytes(pkg)?;
        let filelists_fragment = FilelistsXml::package_bytes(pkg)?;
        let other_fragment = OtherXml::package_bytes(pkg)?;

        self.primary.lock().unwrap().append(&primary_fragment, pkg);
        self.filelists
            .lock()
            .unwrap()
            .append(&filelists_fragment, pkg);
        self.other.lock().unwrap().append(&other_fragment, pkg);

        Ok(())
    }

    /// Write the closing tags, finish the compressed streams and databases, and
    /// surface the first error recorded against any stream.
    ///
    /// Returns the number of packages actually written.
    pub fn close(self) -> Result<usize, MetadataError> {
        let num_declared = self.num_declared;

        let written = self
            .primary
            .into_inner()
            .unwrap()
            .close(&PrimaryXml::footer_bytes()?, num_declared)?;
        self.filelists
            .into_inner()
            .unwrap()
            .close(&FilelistsXml::footer_bytes()?, num_declared)?;
        self.other
            .into_inner()
            .unwrap()
            .close(&OtherXml::footer_bytes()?, num_declared)?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Checksum;
    use crate::PackageIterator;
    use pretty_assertions::assert_eq;

    fn numbered_package(n: usize) -> Package {
        let mut pkg = Package::default();
        pkg.set_name(format!("pkg-{}", n))
            .set_arch("noarch")
            .set_epoch(0)
            .set_version("1.0")
            .set_release("1")
            .set_checksum(Checksum::Sha256(format!("{:064x}", n)))
            .set_location_href(format!("pkg-{}-1.0-1.noarch.rpm", n))
            .add_file(crate::FileType::File, "/usr/bin/pkg")
            .add_changelog("somebody", "- something", 1331831374);
        pkg
    }

    #[test]
    fn test_concurrent_writes_roundtrip() -> Result<(), MetadataError> {
        let dir = tempdir::TempDir::new("test_sink_trio")?;

        let sink = SinkTrio::open(dir.path(), 8, true)?;
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let sink = &sink;
                scope.spawn(move || {
                    for n in 0..2 {
                        sink.write(&numbered_package(worker * 2 + n)).unwrap();
                    }
                });
            }
        });
        assert_eq!(sink.close()?, 8);

        let packages = PackageIterator::from_files(
            &dir.path().join(PRIMARY_XML_FILE),
            &dir.path().join(FILELISTS_XML_FILE),
            &dir.path().join(OTHER_XML_FILE),
        )?;
        assert_eq!(packages.total_packages(), 8);
        let packages: Result<Vec<_>, _> = packages.collect();
        let mut packages = packages?;
        packages.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(packages.len(), 8);
        assert_eq!(packages[0].name(), "pkg-0");
        assert_eq!(packages[0].files().len(), 1);
        assert_eq!(packages[0].changelogs().len(), 1);

        let conn = rusqlite::Connection::open(dir.path().join(PRIMARY_DB_FILE))?;
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM packages", [], |r| r.get(0))?;
        assert_eq!(rows, 8);
        Ok(())
    }

    #[test]
    fn test_empty_documents() -> Result<(), MetadataError> {
        let dir = tempdir::TempDir::new("test_sink_trio_empty")?;

        let sink = SinkTrio::open(dir.path(), 0, false)?;
        assert_eq!(sink.close()?, 0);

        let mut packages = PackageIterator::from_files(
            &dir.path().join(PRIMARY_XML_FILE),
            &dir.path().join(FILELISTS_XML_FILE),
            &dir.path().join(OTHER_XML_FILE),
        )?;
        assert_eq!(packages.total_packages(), 0);
        assert!(packages.parse_package()?.is_none());
        assert!(!dir.path().join(PRIMARY_DB_FILE).exists());
        Ok(())
    }
}
