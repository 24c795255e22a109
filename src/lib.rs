// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod cache;
mod cleanup;
mod filelist;
#[cfg(feature = "read_rpm")]
mod index;
mod metadata;
mod other;
mod package;
mod primary;
mod repomd;
mod sink;
mod sqlite;
mod walker;
pub mod utils;

pub use cache::{CacheLookup, MetadataCache};
#[cfg(feature = "read_rpm")]
pub use index::{IndexOptions, IndexSummary, Indexer};
pub use metadata::{
    Changelog, Checksum, ChecksumType, CompressionType, DistroTag, FileType, FilelistsXml,
    HeaderRange, MetadataError, OtherXml, Package, PackageFile, PrimaryXml, RepomdData,
    RepomdRecord, RepomdXml, Requirement, EVR,
};
#[cfg(feature = "read_rpm")]
pub use package::load_rpm_package;
pub use package::PackageIterator;
pub use sink::{
    SinkTrio, FILELISTS_DB_FILE, FILELISTS_XML_FILE, OTHER_DB_FILE, OTHER_XML_FILE,
    PRIMARY_DB_FILE, PRIMARY_XML_FILE,
};
pub use sqlite::DB_VERSION;
pub use walker::{tasks_from_pkglist, walk_tree, PackageTask};
