// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use log::warn;
use once_cell::sync::Lazy;

/// The staging directory of the in-flight run, if any.
///
/// Set right after the directory is created and cleared once it has been renamed
/// into place, so an interrupt can never leave a half-written `.repodata/` behind.
static STAGING_DIR: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

static INSTALL: Once = Once::new();

/// Arm the interrupt handler. Safe to call repeatedly; the handler is installed once
/// per process.
pub fn install_signal_handler() {
    INSTALL.call_once(|| {
        let result = ctrlc::set_handler(|| {
            remove_staging_dir();
            std::process::exit(1);
        });
        if let Err(e) = result {
            warn!("could not install interrupt handler: {}", e);
        }
    });
}

pub fn guard_staging(path: &Path) {
    *STAGING_DIR.lock().unwrap() = Some(path.to_owned());
}

pub fn clear_staging() {
    *STAGING_DIR.lock().unwrap() = None;
}

/// Best-effort removal of the guarded staging directory.
fn remove_staging_dir() {
    if let Some(path) = STAGING_DIR.lock().unwrap().take() {
        eprintln!("interrupted, removing {}", path.display());
        let _ = std::fs::remove_dir_all(&path);
    }
}
