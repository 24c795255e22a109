// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::convert::TryInto;
use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;

use rpmindex::{CompressionType, IndexOptions, Indexer};

#[derive(FromArgs, PartialEq, Debug)]
/// Index a directory of RPM packages and write repository metadata for it.
pub struct IndexCommand {
    /// directory containing the packages to index
    #[argh(positional)]
    indir: Option<PathBuf>,

    /// directory the repodata/ is written to (defaults to the input directory)
    #[argh(option)]
    outputdir: Option<PathBuf>,

    /// number of parallel workers (defaults to the number of cpus)
    #[argh(option)]
    workers: Option<usize>,

    /// keep at most this many changelog entries per package
    #[argh(option)]
    changelog_limit: Option<usize>,

    /// checksum type for packages and metadata: md5, sha1, sha256, sha512
    #[argh(option)]
    checksum: Option<String>,

    /// prefix metadata filenames with their checksum
    #[argh(switch)]
    unique_md_filenames: bool,

    /// do not generate sqlite databases
    #[argh(switch)]
    no_database: bool,

    /// path to a group (comps) file to publish alongside the metadata
    #[argh(option)]
    groupfile: Option<PathBuf>,

    /// compression for databases and the group file: gz, bz2, xz
    #[argh(option)]
    compression: Option<String>,

    /// force xz compression (same as --compression xz)
    #[argh(switch)]
    xz: bool,

    /// reuse metadata from a previous run for unchanged packages
    #[argh(switch)]
    update: bool,

    /// additional repository path to read old metadata from (repeatable)
    #[argh(option)]
    update_md_path: Vec<PathBuf>,

    /// with --update, trust cached entries without checking file timestamps
    #[argh(switch)]
    skip_stat: bool,

    /// ignore symbolic links while scanning
    #[argh(switch)]
    skip_symlinks: bool,

    /// file listing the repo-relative package paths to index, one per line
    #[argh(option)]
    pkglist: Option<PathBuf>,

    /// glob pattern of packages to skip (repeatable)
    #[argh(option)]
    excludes: Vec<String>,

    /// base URL recorded in package locations
    #[argh(option)]
    location_base: Option<String>,

    /// revision string written to repomd.xml (defaults to the current time)
    #[argh(option)]
    revision: Option<String>,

    /// distro tag for repomd.xml, NAME or NAME,CPEID (repeatable)
    #[argh(option)]
    distro_tag: Vec<String>,

    /// content tag for repomd.xml (repeatable)
    #[argh(option)]
    content_tag: Vec<String>,

    /// repo tag for repomd.xml (repeatable)
    #[argh(option)]
    repo_tag: Vec<String>,

    /// only print warnings and errors
    #[argh(switch)]
    quiet: bool,

    /// print per-package progress
    #[argh(switch)]
    verbose: bool,

    /// print the version and exit
    #[argh(switch)]
    version: bool,
}

pub fn handle_command() -> Result<()> {
    let command: IndexCommand = argh::from_env();

    if command.version {
        println!("rpmindex {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let level = if command.quiet {
        "warn"
    } else if command.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let indir = command
        .indir
        .context("an input directory is required")?;

    let mut options = IndexOptions::default();
    options.outputdir = command.outputdir;
    if let Some(workers) = command.workers {
        options.workers = workers.max(1);
    }
    if let Some(changelog_limit) = command.changelog_limit {
        options.changelog_limit = changelog_limit;
    }
    if let Some(checksum) = command.checksum.as_deref() {
        options.checksum_type = checksum
            .try_into()
            .with_context(|| format!("unsupported checksum type {:?}", checksum))?;
    }
    options.unique_md_filenames = command.unique_md_filenames;
    options.with_databases = !command.no_database;
    options.groupfile = command.groupfile;
    if let Some(compression) = command.compression.as_deref() {
        options.compression = compression
            .try_into()
            .with_context(|| format!("unsupported compression type {:?}", compression))?;
    }
    if command.xz {
        options.compression = CompressionType::Xz;
    }
    options.update = command.update;
    options.update_md_paths = command.update_md_path;
    options.skip_stat = command.skip_stat;
    options.skip_symlinks = command.skip_symlinks;
    options.pkglist = command.pkglist;
    options.excludes = command.excludes;
    options.location_base = command.location_base;
    options.revision = command.revision;
    options.distro_tags = command
        .distro_tag
        .into_iter()
        .map(|tag| match tag.split_once(',') {
            Some((name, cpeid)) => (name.to_owned(), Some(cpeid.to_owned())),
            None => (tag, None),
        })
        .collect();
    options.content_tags = command.content_tag;
    options.repo_tags = command.repo_tag;

    Indexer::new(&indir, options).run()?;

    Ok(())
}
