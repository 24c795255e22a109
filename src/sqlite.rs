// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::metadata::{Checksum, FileType, MetadataError, Package, PackageFile, Requirement};
use crate::primary::include_file;

/// Schema version carried in each database's `db_info` row.
pub const DB_VERSION: u32 = 10;

fn open_database(path: &Path) -> Result<Connection, MetadataError> {
    let conn = Connection::open(path)?;
    // metadata databases are write-once artifacts, crash safety buys nothing here
    conn.execute_batch(
        "PRAGMA synchronous = OFF;
         PRAGMA journal_mode = MEMORY;",
    )?;
    Ok(conn)
}

fn create_db_info(conn: &Connection) -> Result<(), MetadataError> {
    conn.execute_batch(
        "CREATE TABLE db_info (dbversion INTEGER, checksum TEXT);",
    )?;
    conn.execute(
        "INSERT INTO db_info (dbversion, checksum) VALUES (?1, '')",
        params![DB_VERSION],
    )?;
    Ok(())
}

/// Store the checksum of the corresponding XML document into an existing database's
/// `db_info` row, so consumers can validate that the SQL and XML views belong together.
pub fn update_db_checksum(path: &Path, checksum: &Checksum) -> Result<(), MetadataError> {
    let conn = Connection::open(path)?;
    let (_, checksum_value) = checksum.to_values()?;
    conn.execute("UPDATE db_info SET checksum = ?1", params![checksum_value])?;
    conn.close().map_err(|(_, e)| e)?;
    Ok(())
}

pub struct PrimaryDatabase {
    conn: Connection,
}

impl PrimaryDatabase {
    pub fn create(path: &Path) -> Result<Self, MetadataError> {
        let conn = open_database(path)?;
        create_db_info(&conn)?;
        conn.execute_batch(
            "CREATE TABLE packages (
                pkgKey INTEGER PRIMARY KEY,
                pkgId TEXT,
                name TEXT,
                arch TEXT,
                version TEXT,
                epoch TEXT,
                release TEXT,
                summary TEXT,
                description TEXT,
                url TEXT,
                time_file INTEGER,
                time_build INTEGER,
                rpm_license TEXT,
                rpm_vendor TEXT,
                rpm_group TEXT,
                rpm_buildhost TEXT,
                rpm_sourcerpm TEXT,
                rpm_header_start INTEGER,
                rpm_header_end INTEGER,
                rpm_packager TEXT,
                size_package INTEGER,
                size_installed INTEGER,
                size_archive INTEGER,
                location_href TEXT,
                location_base TEXT,
                checksum_type TEXT);
             CREATE TABLE provides (name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);
             CREATE TABLE requires (name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER, pre BOOLEAN DEFAULT FALSE);
             CREATE TABLE conflicts (name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);
             CREATE TABLE obsoletes (name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);
             CREATE TABLE suggests (name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);
             CREATE TABLE enhances (name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);
             CREATE TABLE recommends (name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);
             CREATE TABLE supplements (name TEXT, flags TEXT, epoch TEXT, version TEXT, release TEXT, pkgKey INTEGER);
             CREATE TABLE files (name TEXT, type TEXT, pkgKey INTEGER);",
        )?;
        Ok(Self { conn })
    }

    pub fn add_package(&mut self, pkg: &Package) -> Result<(), MetadataError> {
        let (checksum_type, pkgid) = pkg.checksum().to_values()?;
        self.conn
            .prepare_cached(
                "INSERT INTO packages (
                    pkgId, name, arch, version, epoch, release, summary, description, url,
                    time_file, time_build, rpm_license, rpm_vendor, rpm_group, rpm_buildhost,
                    rpm_sourcerpm, rpm_header_start, rpm_header_end, rpm_packager,
                    size_package, size_installed, size_archive,
                    location_href, location_base, checksum_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
            )?
            .execute(params![
                pkgid,
                pkg.name,
                pkg.arch,
                pkg.evr.version,
                pkg.evr.epoch,
                pkg.evr.release,
                pkg.summary,
                pkg.description,
                pkg.url,
                pkg.time_file,
                pkg.time_build,
                pkg.rpm_license,
                pkg.rpm_vendor,
                pkg.rpm_group,
                pkg.rpm_buildhost,
                pkg.rpm_sourcerpm,
                pkg.rpm_header_range.start,
                pkg.rpm_header_range.end,
                pkg.packager,
                pkg.size_package,
                pkg.size_installed,
                pkg.size_archive,
                pkg.location_href,
                pkg.location_base,
                checksum_type,
            ])?;
        let pkg_key = self.conn.last_insert_rowid();

        self.add_requirements("provides", &pkg.rpm_provides, pkg_key)?;
        self.add_requirements("conflicts", &pkg.rpm_conflicts, pkg_key)?;
        self.add_requirements("obsoletes", &pkg.rpm_obsoletes, pkg_key)?;
        self.add_requirements("suggests", &pkg.rpm_suggests, pkg_key)?;
        self.add_requirements("enhances", &pkg.rpm_enhances, pkg_key)?;
        self.add_requirements("recommends", &pkg.rpm_recommends, pkg_key)?;
        self.add_requirements("supplements", &pkg.rpm_supplements, pkg_key)?;

        for entry in &pkg.rpm_requires {
            self.conn
                .prepare_cached(
                    "INSERT INTO requires (name, flags, epoch, version, release, pkgKey, pre)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?
                .execute(params![
                    entry.name,
                    entry.flags,
                    entry.epoch,
                    entry.version,
                    entry.release,
                    pkg_key,
                    entry.preinstall,
                ])?;
        }

        // same filtered subset as primary.xml - the full file list belongs to the filelists database
        for file in pkg.rpm_files.iter().filter(|f| include_file(f)) {
            let ftype = std::str::from_utf8(file.filetype.to_values()).unwrap_or("file");
            self.conn
                .prepare_cached("INSERT INTO files (name, type, pkgKey) VALUES (?1, ?2, ?3)")?
                .execute(params![file.path, ftype, pkg_key])?;
        }

        Ok(())
    }

    fn add_requirements(
        &mut self,
        table: &str,
        entries: &[Requirement],
        pkg_key: i64,
    ) -> Result<(), MetadataError> {
        for entry in entries {
            self.conn
                .prepare_cached(&format!(
                    "INSERT INTO {} (name, flags, epoch, version, release, pkgKey)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    table
                ))?
                .execute(params![
                    entry.name,
                    entry.flags,
                    entry.epoch,
                    entry.version,
                    entry.release,
                    pkg_key,
                ])?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<(), MetadataError> {
        self.conn.execute_batch(
            "CREATE INDEX packagename ON packages (name);
             CREATE INDEX packageId ON packages (pkgId);
             CREATE INDEX filenames ON files (name);
             CREATE INDEX pkgfiles ON files (pkgKey);
             CREATE INDEX pkgprovides ON provides (pkgKey);
             CREATE INDEX providesname ON provides (name);
             CREATE INDEX pkgrequires ON requires (pkgKey);
             CREATE INDEX requiresname ON requires (name);",
        )?;
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

pub struct FilelistsDatabase {
    conn: Connection,
}

impl FilelistsDatabase {
    pub fn create(path: &Path) -> Result<Self, MetadataError> {
        let conn = open_database(path)?;
        create_db_info(&conn)?;
        conn.execute_batch(
            "CREATE TABLE packages (pkgKey INTEGER PRIMARY KEY, pkgId TEXT);
             CREATE TABLE filelist (pkgKey INTEGER, dirname TEXT, filenames TEXT, filetypes TEXT);",
        )?;
        Ok(Self { conn })
    }

    pub fn add_package(&mut self, pkg: &Package) -> Result<(), MetadataError> {
        let (_, pkgid) = pkg.checksum().to_values()?;
        self.conn
            .prepare_cached("INSERT INTO packages (pkgId) VALUES (?1)")?
            .execute(params![pkgid])?;
        let pkg_key = self.conn.last_insert_rowid();

        for (dirname, filenames, filetypes) in encode_filelist_rows(&pkg.rpm_files) {
            self.conn
                .prepare_cached(
                    "INSERT INTO filelist (pkgKey, dirname, filenames, filetypes)
                     VALUES (?1, ?2, ?3, ?4)",
                )?
                .execute(params![pkg_key, dirname, filenames, filetypes])?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<(), MetadataError> {
        self.conn.execute_batch(
            "CREATE INDEX keyfile ON filelist (pkgKey);
             CREATE INDEX pkgId ON packages (pkgId);
             CREATE INDEX dirnames ON filelist (dirname);",
        )?;
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

pub struct OtherDatabase {
    conn: Connection,
}

impl OtherDatabase {
    pub fn create(path: &Path) -> Result<Self, MetadataError> {
        let conn = open_database(path)?;
        create_db_info(&conn)?;
        conn.execute_batch(
            "CREATE TABLE packages (pkgKey INTEGER PRIMARY KEY, pkgId TEXT);
             CREATE TABLE changelog (pkgKey INTEGER, author TEXT, date INTEGER, changelog TEXT);",
        )?;
        Ok(Self { conn })
    }

    pub fn add_package(&mut self, pkg: &Package) -> Result<(), MetadataError> {
        let (_, pkgid) = pkg.checksum().to_values()?;
        self.conn
            .prepare_cached("INSERT INTO packages (pkgId) VALUES (?1)")?
            .execute(params![pkgid])?;
        let pkg_key = self.conn.last_insert_rowid();

        for changelog in &pkg.rpm_changelogs {
            self.conn
                .prepare_cached(
                    "INSERT INTO changelog (pkgKey, author, date, changelog)
                     VALUES (?1, ?2, ?3, ?4)",
                )?
                .execute(params![
                    pkg_key,
                    changelog.author,
                    changelog.timestamp,
                    changelog.description,
                ])?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<(), MetadataError> {
        self.conn.execute_batch(
            "CREATE INDEX keychange ON changelog (pkgKey);
             CREATE INDEX pkgId ON packages (pkgId);",
        )?;
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}

/// Group a package's files by parent directory the way the filelists database stores
/// them: one row per directory, names joined by `/`, one type char (`f`/`d`/`g`) per name.
fn encode_filelist_rows(files: &[PackageFile]) -> Vec<(String, String, String)> {
    let mut rows: Vec<(String, String, String)> = Vec::new();

    for file in files {
        let (dirname, basename) = match file.path.rfind('/') {
            Some(0) => ("/", &file.path[1..]),
            Some(idx) => (&file.path[..idx], &file.path[idx + 1..]),
            None => ("", file.path.as_str()),
        };
        let type_char = match file.filetype {
            FileType::File => 'f',
            FileType::Dir => 'd',
            FileType::Ghost => 'g',
        };

        match rows.iter_mut().find(|(d, _, _)| d == dirname) {
            Some((_, filenames, filetypes)) => {
                filenames.push('/');
                filenames.push_str(basename);
                filetypes.push(type_char);
            }
            None => {
                rows.push((
                    dirname.to_owned(),
                    basename.to_owned(),
                    type_char.to_string(),
                ));
            }
        }
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Checksum;
    use pretty_assertions::assert_eq;

    fn test_package() -> Package {
        let mut pkg = Package::default();
        pkg.set_name("horse")
            .set_arch("noarch")
            .set_epoch(0)
            .set_version("4.1")
            .set_release("1")
            .set_checksum(Checksum::Sha256(
                "6d0fd7f08cef63677726973d327e0b99f819b1983f90c2b656bb27cd2112cb7f".to_owned(),
            ))
            .set_location_href("horse-4.1-1.noarch.rpm")
            .set_provides(vec![Requirement {
                name: "horse".to_owned(),
                flags: Some("EQ".to_owned()),
                epoch: Some("0".to_owned()),
                version: Some("4.1".to_owned()),
                release: Some("1".to_owned()),
                ..Requirement::default()
            }])
            .set_requires(vec![Requirement {
                name: "/usr/sbin/useradd".to_owned(),
                preinstall: true,
                ..Requirement::default()
            }])
            .add_file(FileType::Dir, "/etc/horse")
            .add_file(FileType::File, "/etc/horse/horse.cfg")
            .add_file(FileType::Ghost, "/etc/horse/horse.log")
            .add_file(FileType::File, "/usr/bin/horse")
            .add_file(FileType::File, "/usr/share/doc/horse/README")
            .add_changelog("Bojack Horseman - 4.1-1", "- neigh", 1331831374);
        pkg
    }

    #[test]
    fn test_primary_database() -> Result<(), MetadataError> {
        let dir = tempdir::TempDir::new("test_primary_database")?;
        let path = dir.path().join("primary.sqlite");

        let mut db = PrimaryDatabase::create(&path)?;
        db.add_package(&test_package())?;
        db.finish()?;

        update_db_checksum(
            &path,
            &Checksum::Sha256("c0ffee".repeat(10) + "beef"),
        )?;

        let conn = Connection::open(&path)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM packages", [], |r| r.get(0))?;
        assert_eq!(count, 1);
        let name: String =
            conn.query_row("SELECT name FROM packages WHERE pkgKey = 1", [], |r| {
                r.get(0)
            })?;
        assert_eq!(name, "horse");
        let pre: bool = conn.query_row(
            "SELECT pre FROM requires WHERE name = '/usr/sbin/useradd'",
            [],
            |r| r.get(0),
        )?;
        assert!(pre);
        let provides: i64 = conn.query_row("SELECT COUNT(*) FROM provides", [], |r| r.get(0))?;
        assert_eq!(provides, 1);
        // the non-primary /usr/share path is filtered out
        let files: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        assert_eq!(files, 4);
        let doc_files: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE name LIKE '/usr/share/%'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(doc_files, 0);
        let (dbversion, checksum): (u32, String) = conn.query_row(
            "SELECT dbversion, checksum FROM db_info",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        assert_eq!(dbversion, DB_VERSION);
        assert_eq!(checksum, "c0ffee".repeat(10) + "beef");
        Ok(())
    }

    #[test]
    fn test_filelists_database() -> Result<(), MetadataError> {
        let dir = tempdir::TempDir::new("test_filelists_database")?;
        let path = dir.path().join("filelists.sqlite");

        let mut db = FilelistsDatabase::create(&path)?;
        db.add_package(&test_package())?;
        db.finish()?;

        let conn = Connection::open(&path)?;
        let (filenames, filetypes): (String, String) = conn.query_row(
            "SELECT filenames, filetypes FROM filelist WHERE dirname = '/etc/horse'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        assert_eq!(filenames, "horse.cfg/horse.log");
        assert_eq!(filetypes, "fg");

        // unlike the primary database, the filelists database keeps the full manifest
        let readme: String = conn.query_row(
            "SELECT filenames FROM filelist WHERE dirname = '/usr/share/doc/horse'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(readme, "README");
        Ok(())
    }

    #[test]
    fn test_other_database() -> Result<(), MetadataError> {
        let dir = tempdir::TempDir::new("test_other_database")?;
        let path = dir.path().join("other.sqlite");

        let mut db = OtherDatabase::create(&path)?;
        db.add_package(&test_package())?;
        db.finish()?;

        let conn = Connection::open(&path)?;
        let (author, date): (String, i64) = conn.query_row(
            "SELECT author, date FROM changelog WHERE pkgKey = 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        assert_eq!(author, "Bojack Horseman - 4.1-1");
        assert_eq!(date, 1331831374);
        Ok(())
    }

    #[test]
    fn test_encode_filelist_rows() {
        let files = vec![
            PackageFile {
                filetype: FileType::Dir,
                path: "/etc/horse".to_owned(),
            },
            PackageFile {
                filetype: FileType::File,
                path: "/etc/horse/horse.cfg".to_owned(),
            },
            PackageFile {
                filetype: FileType::File,
                path: "/usr/bin/horse".to_owned(),
            },
        ];
        assert_eq!(
            encode_filelist_rows(&files),
            vec![
                ("/etc".to_owned(), "horse".to_owned(), "d".to_owned()),
                ("/etc/horse".to_owned(), "horse.cfg".to_owned(), "f".to_owned()),
                ("/usr/bin".to_owned(), "horse".to_owned(), "f".to_owned()),
            ]
        );
    }
}
