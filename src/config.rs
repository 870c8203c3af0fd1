use std::path::{Path, PathBuf};

use regex::Regex;

/// The configuration for one synced project.
#[derive(Debug)]
pub struct SyncInfo {
    /// The local directory mirrored to the peer.
    pub root: PathBuf,
    pub ignore: Ignore,
    /// Upper-case the first letter of component file names.
    pub capitalize_names: bool,
    /// Ask the peer before it deletes files that were removed locally.
    pub require_delete_confirmation: bool,
}

impl SyncInfo {
    pub fn new(root: PathBuf) -> Self {
        SyncInfo {
            root,
            ignore: Ignore::defaults(),
            capitalize_names: true,
            require_delete_confirmation: true,
        }
    }
}

#[derive(Debug)]
/// Determines which local files are never offered to the peer.
pub struct Ignore {
    pub regexes: Vec<Regex>,
    pub paths: Vec<String>,
    /// Skip any path with a component starting with `.`
    pub hidden: bool,
}

impl Ignore {
    /// An `Ignore` struct that ignores nothing
    pub fn nothing() -> Self {
        Ignore {
            regexes: Vec::new(),
            paths: Vec::new(),
            hidden: false,
        }
    }

    /// Ignores dependency folders and every dot-file or dot-directory, which
    /// includes the baseline archive.
    pub fn defaults() -> Self {
        Ignore {
            regexes: Vec::new(),
            paths: vec!["node_modules".to_owned()],
            hidden: true,
        }
    }

    /// checks if the relative path is on the ignore list
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.hidden
            && path
                .components()
                .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        {
            return true;
        }
        for ignore in &self.paths {
            if path.starts_with(ignore) {
                return true;
            }
        }
        let path = path.to_string_lossy();
        self.regexes.iter().any(|ignore| ignore.is_match(&path))
    }
}
