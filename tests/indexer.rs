// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;
use std::path::Path;

use pretty_assertions::assert_eq;
use tempdir::TempDir;

use rpmindex::{
    utils, ChecksumType, CompressionType, IndexOptions, Indexer, MetadataError, PackageIterator,
    RepomdXml, FILELISTS_XML_FILE, OTHER_XML_FILE, PRIMARY_XML_FILE,
};

mod common;
use common::{build_package, decompressed, dir_listing};

fn single_threaded_options() -> IndexOptions {
    IndexOptions {
        workers: 1,
        ..IndexOptions::default()
    }
}

fn read_repomd(repo: &Path) -> rpmindex::RepomdData {
    let reader = utils::xml_reader_from_file(&repo.join("repodata/repomd.xml"))
        .expect("repomd.xml should exist");
    RepomdXml::read_data(reader).expect("repomd.xml should parse")
}

fn read_packages(repo: &Path) -> Vec<rpmindex::Package> {
    let repomd = read_repomd(repo);
    let packages: Result<Vec<_>, MetadataError> =
        PackageIterator::from_repodata(repo, &repomd)
            .expect("metadata should be readable")
            .collect();
    packages.expect("packages should parse")
}

#[test]
fn test_empty_tree() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_empty_tree")?;

    let summary = Indexer::new(dir.path(), single_threaded_options()).run()?;
    assert_eq!(summary.num_packages, 0);

    let repodata = dir.path().join("repodata");
    assert!(repodata.join("repomd.xml").exists());

    let primary = decompressed(&repodata.join(PRIMARY_XML_FILE));
    let primary = String::from_utf8(primary).unwrap();
    assert!(primary.contains("packages=\"0\""));

    let repomd = read_repomd(dir.path());
    // three xml documents and three databases
    assert_eq!(repomd.records().len(), 6);
    assert!(read_packages(dir.path()).is_empty());
    Ok(())
}

#[test]
fn test_two_packages_fresh() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_two_packages")?;
    let a = build_package(dir.path(), "a", "1", "x86_64");
    build_package(dir.path(), "b", "2", "noarch");

    let summary = Indexer::new(dir.path(), single_threaded_options()).run()?;
    assert_eq!(summary.num_packages, 2);
    assert_eq!(summary.from_cache, 0);
    assert_eq!(summary.dropped, 0);

    let packages = read_packages(dir.path());
    assert_eq!(packages.len(), 2);
    assert_eq!(packages[0].name(), "a");
    assert_eq!(packages[1].name(), "b");
    assert_eq!(packages[0].location_href(), "a-1-1.x86_64.rpm");

    // the pkgId in the metadata is the checksum of the archive itself
    assert_eq!(
        packages[0].checksum(),
        &utils::checksum_file(&a, ChecksumType::Sha256)?
    );

    // repomd.xml lists 6 artifacts and references exactly the files that exist
    let repomd = read_repomd(dir.path());
    assert_eq!(repomd.records().len(), 6);
    let mut referenced: Vec<String> = repomd
        .records()
        .iter()
        .map(|r| {
            r.location_href
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    referenced.push("repomd.xml".to_owned());
    referenced.sort();
    assert_eq!(referenced, dir_listing(&dir.path().join("repodata")));

    // the sqlite databases are compressed with the default algorithm and carry both rows
    let primary_db = dir.path().join("repodata/primary.sqlite.bz2");
    assert!(primary_db.exists());
    let unpacked = dir.path().join("primary.sqlite");
    std::fs::write(&unpacked, decompressed(&primary_db))?;
    let conn = rusqlite::Connection::open(&unpacked)?;
    let rows: i64 = conn.query_row("SELECT COUNT(*) FROM packages", [], |r| r.get(0))?;
    assert_eq!(rows, 2);
    let db_checksum: String = conn.query_row("SELECT checksum FROM db_info", [], |r| r.get(0))?;
    let (_, primary_checksum) = repomd.get_record("primary").unwrap().checksum.to_values()?;
    assert_eq!(db_checksum, primary_checksum);
    Ok(())
}

#[test]
fn test_primary_carries_only_primary_files() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_primary_files")?;
    build_package(dir.path(), "a", "1", "x86_64");

    Indexer::new(dir.path(), single_threaded_options()).run()?;

    let repodata = dir.path().join("repodata");
    let primary =
        String::from_utf8(decompressed(&repodata.join(PRIMARY_XML_FILE))).unwrap();
    let filelists =
        String::from_utf8(decompressed(&repodata.join(FILELISTS_XML_FILE))).unwrap();

    // /etc/ paths are "primary" files; /usr/share/ paths belong only in filelists
    assert!(primary.contains("/etc/a.conf"));
    assert!(!primary.contains("/usr/share/doc/a/README"));
    assert!(filelists.contains("/etc/a.conf"));
    assert!(filelists.contains("/usr/share/doc/a/README"));

    // the primary database holds the same filtered subset
    let unpacked = dir.path().join("primary.sqlite");
    std::fs::write(
        &unpacked,
        decompressed(&repodata.join("primary.sqlite.bz2")),
    )?;
    let conn = rusqlite::Connection::open(&unpacked)?;
    let names: Vec<String> = conn
        .prepare("SELECT name FROM files ORDER BY name")?
        .query_map([], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    assert_eq!(names, vec!["/etc/a.conf".to_owned()]);

    // while the parsed-back package (fed by filelists) still carries everything
    let packages = read_packages(dir.path());
    assert_eq!(packages[0].files().len(), 2);
    Ok(())
}

#[test]
fn test_update_is_a_noop() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_update_noop")?;
    build_package(dir.path(), "a", "1", "x86_64");
    build_package(dir.path(), "b", "2", "noarch");

    Indexer::new(dir.path(), single_threaded_options()).run()?;
    let repodata = dir.path().join("repodata");
    let primary_before = decompressed(&repodata.join(PRIMARY_XML_FILE));
    let filelists_before = decompressed(&repodata.join(FILELISTS_XML_FILE));
    let other_before = decompressed(&repodata.join(OTHER_XML_FILE));

    let options = IndexOptions {
        update: true,
        ..single_threaded_options()
    };
    let summary = Indexer::new(dir.path(), options).run()?;
    assert_eq!(summary.num_packages, 2);
    assert_eq!(summary.from_cache, 2);

    assert_eq!(primary_before, decompressed(&repodata.join(PRIMARY_XML_FILE)));
    assert_eq!(
        filelists_before,
        decompressed(&repodata.join(FILELISTS_XML_FILE))
    );
    assert_eq!(other_before, decompressed(&repodata.join(OTHER_XML_FILE)));
    Ok(())
}

#[test]
fn test_update_reparses_touched_package() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_update_touched")?;
    let a = build_package(dir.path(), "a", "1", "x86_64");
    build_package(dir.path(), "b", "2", "noarch");

    Indexer::new(dir.path(), single_threaded_options()).run()?;

    // rewrite one package with identical contents - only the mtime changes.
    // mtime granularity can be a full second on some filesystems.
    let contents = std::fs::read(&a)?;
    std::thread::sleep(std::time::Duration::from_millis(1100));
    std::fs::write(&a, contents)?;

    let options = IndexOptions {
        update: true,
        ..single_threaded_options()
    };
    let summary = Indexer::new(dir.path(), options).run()?;
    assert_eq!(summary.num_packages, 2);
    assert_eq!(summary.from_cache, 1);
    Ok(())
}

#[test]
fn test_update_skip_stat_trusts_cache() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_update_skip_stat")?;
    let a = build_package(dir.path(), "a", "1", "x86_64");
    build_package(dir.path(), "b", "2", "noarch");

    Indexer::new(dir.path(), single_threaded_options()).run()?;

    // grow the file - with --skip-stat the stale record is reused anyway
    std::fs::OpenOptions::new()
        .append(true)
        .open(&a)?
        .write_all(b"garbage")?;

    let options = IndexOptions {
        update: true,
        skip_stat: true,
        ..single_threaded_options()
    };
    let summary = Indexer::new(dir.path(), options).run()?;
    assert_eq!(summary.from_cache, 2);
    Ok(())
}

#[test]
fn test_exclude_glob() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_exclude_glob")?;
    build_package(dir.path(), "app", "1", "x86_64");
    build_package(dir.path(), "app-debug", "1", "x86_64");

    let options = IndexOptions {
        excludes: vec!["*-debug-*.rpm".to_owned()],
        ..single_threaded_options()
    };
    let summary = Indexer::new(dir.path(), options).run()?;
    assert_eq!(summary.num_packages, 1);

    let primary = decompressed(&dir.path().join("repodata").join(PRIMARY_XML_FILE));
    let primary = String::from_utf8(primary).unwrap();
    assert!(primary.contains("packages=\"1\""));
    assert!(!primary.contains("app-debug"));
    Ok(())
}

#[test]
fn test_skip_symlinks() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_skip_symlinks")?;
    let input = dir.path().join("packages");
    std::fs::create_dir(&input)?;
    let real = build_package(dir.path(), "real", "1", "noarch");
    std::os::unix::fs::symlink(&real, input.join("link-1-1.noarch.rpm"))?;

    let options = IndexOptions {
        skip_symlinks: true,
        ..single_threaded_options()
    };
    let summary = Indexer::new(&input, options).run()?;
    assert_eq!(summary.num_packages, 0);

    // without the option the symlink is indexed
    let staging_free = TempDir::new("test_follow_symlinks")?;
    let input2 = staging_free.path().join("packages");
    std::fs::create_dir(&input2)?;
    std::os::unix::fs::symlink(&real, input2.join("link-1-1.noarch.rpm"))?;
    let summary = Indexer::new(&input2, single_threaded_options()).run()?;
    assert_eq!(summary.num_packages, 1);
    Ok(())
}

#[test]
fn test_group_file() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_group_file")?;
    let input = dir.path().join("packages");
    std::fs::create_dir(&input)?;
    build_package(&input, "a", "1", "x86_64");

    let groupfile = dir.path().join("comps.xml");
    std::fs::write(&groupfile, b"<comps><group/></comps>\n")?;

    let options = IndexOptions {
        groupfile: Some(groupfile.clone()),
        ..single_threaded_options()
    };
    Indexer::new(&input, options).run()?;

    let repodata = input.join("repodata");
    assert!(repodata.join("comps.xml").exists());
    assert!(repodata.join("comps.xml.bz2").exists());

    let repomd = read_repomd(&input);
    assert_eq!(repomd.records().len(), 8);
    let group = repomd.get_record("group").expect("group record missing");
    assert_eq!(
        group.checksum,
        utils::checksum_file(&groupfile, ChecksumType::Sha256)?
    );
    let group_gz = repomd.get_record("group_gz").expect("group_gz record missing");
    assert_eq!(
        group_gz.open_checksum.as_ref(),
        Some(&utils::checksum_file(&groupfile, ChecksumType::Sha256)?)
    );
    Ok(())
}

#[test]
fn test_staging_conflict() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_staging_conflict")?;
    build_package(dir.path(), "a", "1", "x86_64");
    std::fs::create_dir(dir.path().join(".repodata"))?;

    let result = Indexer::new(dir.path(), single_threaded_options()).run();
    assert!(matches!(result, Err(MetadataError::StagingDirExists(_))));

    // the output directory was not touched
    assert!(!dir.path().join("repodata").exists());
    Ok(())
}

#[test]
fn test_unique_md_filenames() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_unique_md_filenames")?;
    build_package(dir.path(), "a", "1", "x86_64");

    let options = IndexOptions {
        unique_md_filenames: true,
        ..single_threaded_options()
    };
    Indexer::new(dir.path(), options).run()?;

    let repomd = read_repomd(dir.path());
    for record in repomd.records() {
        let filename = record
            .location_href
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let (_, checksum) = record.checksum.to_values()?;
        assert!(
            filename.starts_with(checksum),
            "{} should be prefixed with its checksum",
            filename
        );
        assert!(dir.path().join("repodata").join(&filename).exists());
    }

    // the metadata itself is still readable through the manifest
    assert_eq!(read_packages(dir.path()).len(), 1);
    Ok(())
}

#[test]
fn test_pkglist_mode() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_pkglist_mode")?;
    build_package(dir.path(), "a", "1", "x86_64");
    build_package(dir.path(), "b", "2", "noarch");

    let pkglist = dir.path().join("pkglist.txt");
    std::fs::write(&pkglist, "b-2-1.noarch.rpm\n")?;

    let options = IndexOptions {
        pkglist: Some(pkglist),
        ..single_threaded_options()
    };
    let summary = Indexer::new(dir.path(), options).run()?;
    assert_eq!(summary.num_packages, 1);

    let packages = read_packages(dir.path());
    assert_eq!(packages[0].name(), "b");
    Ok(())
}

#[test]
fn test_no_database() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_no_database")?;
    build_package(dir.path(), "a", "1", "x86_64");

    let options = IndexOptions {
        with_databases: false,
        ..single_threaded_options()
    };
    Indexer::new(dir.path(), options).run()?;

    let repomd = read_repomd(dir.path());
    assert_eq!(repomd.records().len(), 3);
    assert!(repomd.get_record("primary_db").is_none());
    assert!(!dir.path().join("repodata/primary.sqlite.bz2").exists());
    Ok(())
}

#[test]
fn test_outputdir_and_compression() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_outputdir")?;
    let input = dir.path().join("packages");
    let output = dir.path().join("publish");
    std::fs::create_dir(&input)?;
    build_package(&input, "a", "1", "x86_64");

    let options = IndexOptions {
        outputdir: Some(output.clone()),
        compression: CompressionType::Xz,
        ..single_threaded_options()
    };
    Indexer::new(&input, options).run()?;

    assert!(!input.join("repodata").exists());
    assert!(output.join("repodata/repomd.xml").exists());
    assert!(output.join("repodata/primary.sqlite.xz").exists());

    let repomd = read_repomd(&output);
    let db_record = repomd.get_record("primary_db").unwrap();
    assert_eq!(db_record.database_version, Some(10));
    Ok(())
}

#[test]
fn test_repomd_tags_and_revision() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_repomd_tags")?;
    build_package(dir.path(), "a", "1", "x86_64");

    let options = IndexOptions {
        revision: Some("20260801".to_owned()),
        repo_tags: vec!["Fedora".to_owned()],
        content_tags: vec!["binary-x86_64".to_owned()],
        distro_tags: vec![(
            "Fedora 33".to_owned(),
            Some("cpe:/o:fedoraproject:fedora:33".to_owned()),
        )],
        ..single_threaded_options()
    };
    Indexer::new(dir.path(), options).run()?;

    let repomd = read_repomd(dir.path());
    assert_eq!(repomd.revision(), Some("20260801"));
    assert_eq!(repomd.repo_tags(), &vec!["Fedora".to_owned()]);
    assert_eq!(repomd.content_tags(), &vec!["binary-x86_64".to_owned()]);
    assert_eq!(repomd.distro_tags().len(), 1);
    Ok(())
}

#[test]
fn test_reindex_replaces_old_metadata() -> Result<(), MetadataError> {
    let dir = TempDir::new("test_reindex")?;
    build_package(dir.path(), "a", "1", "x86_64");

    Indexer::new(dir.path(), single_threaded_options()).run()?;
    build_package(dir.path(), "b", "2", "noarch");
    Indexer::new(dir.path(), single_threaded_options()).run()?;

    // old artifacts are gone, repomd references exactly what is on disk
    let repomd = read_repomd(dir.path());
    let mut referenced: Vec<String> = repomd
        .records()
        .iter()
        .map(|r| {
            r.location_href
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    referenced.push("repomd.xml".to_owned());
    referenced.sort();
    assert_eq!(referenced, dir_listing(&dir.path().join("repodata")));

    assert_eq!(read_packages(dir.path()).len(), 2);
    Ok(())
}
