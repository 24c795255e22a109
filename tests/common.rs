// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Read;
use std::path::{Path, PathBuf};

/// Build a small but real RPM package into `dir` and return its path.
///
/// Every package carries one "primary" file (`/etc/<name>.conf`) and one file that
/// belongs only in the filelists metadata (`/usr/share/doc/<name>/README`).
pub fn build_package(dir: &Path, name: &str, version: &str, arch: &str) -> PathBuf {
    let filename = format!("{}-{}-1.{}.rpm", name, version, arch);
    let path = dir.join(&filename);

    let payload = dir.join(format!(".{}-payload.txt", name));
    std::fs::write(&payload, format!("{} payload\n", name)).expect("failed to write payload");

    let pkg = rpm::PackageBuilder::new(name, version, "MIT", arch, &format!("the {} package", name))
        .with_file(
            &payload,
            rpm::FileOptions::new(format!("/etc/{}.conf", name)),
        )
        .expect("failed to add config file")
        .with_file(
            &payload,
            rpm::FileOptions::new(format!("/usr/share/doc/{}/README", name)),
        )
        .expect("failed to add doc file")
        .build()
        .expect("failed to build fixture package");
    pkg.write_file(&path).expect("failed to write fixture package");

    path
}

/// Decompressed contents of a (possibly compressed) file.
pub fn decompressed(path: &Path) -> Vec<u8> {
    let (mut reader, _format) = niffler::from_path(path).expect("failed to open file");
    let mut contents = Vec::new();
    reader
        .read_to_end(&mut contents)
        .expect("failed to read file");
    contents
}

/// The basenames present in a directory, sorted.
pub fn dir_listing(path: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(path)
        .expect("failed to list directory")
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
