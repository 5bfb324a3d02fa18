use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

const OVERRIDE_EXTENSIONS: [&str; 2] = ["conf", "config"];

/// Settings declared by one override file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryOverrides {
    pub video: Option<Vec<u32>>,
    pub audio: Option<Vec<u32>>,
    pub skip: HashSet<String>,
}

impl DirectoryOverrides {
    /// Parses `video <indices...>`, `audio <indices...>` and `skip|ignore <names...>` lines.
    pub fn parse(content: &str) -> Self {
        let mut overrides = Self::default();
        for line in content.lines() {
            let words: Vec<&str> = line.split_whitespace().collect();
            if words.len() < 2 {
                continue;
            }
            match words[0] {
                "video" => overrides.video = parse_indices(&words[1..]),
                "audio" => overrides.audio = parse_indices(&words[1..]),
                "skip" | "ignore" => {
                    overrides
                        .skip
                        .extend(words[1..].iter().map(|word| word.to_string()));
                }
                other => debug!(key = other, "unknown override key"),
            }
        }
        overrides
    }

    pub fn read(path: &Path) -> Option<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Some(Self::parse(&content)),
            Err(error) => {
                warn!(path = %path.display(), %error, "ignoring unreadable override file");
                None
            }
        }
    }
}

fn parse_indices(words: &[&str]) -> Option<Vec<u32>> {
    let indices: Vec<u32> = words.iter().filter_map(|word| word.parse().ok()).collect();
    if indices.is_empty() {
        None
    } else {
        Some(indices)
    }
}

pub fn is_override_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| OVERRIDE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Stream selection and skip names in effect for one directory of the asset tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedSettings {
    pub video: Vec<u32>,
    pub audio: Vec<u32>,
    pub skip: Arc<HashSet<String>>,
}

impl Default for InheritedSettings {
    fn default() -> Self {
        Self {
            video: vec![0],
            audio: vec![0],
            skip: Arc::new(HashSet::new()),
        }
    }
}

impl InheritedSettings {
    pub fn apply(&self, overrides: DirectoryOverrides) -> Self {
        let mut next = self.clone();
        if let Some(video) = overrides.video {
            next.video = video;
        }
        if let Some(audio) = overrides.audio {
            next.audio = audio;
        }
        if !overrides.skip.is_empty() {
            next.skip = Arc::new(overrides.skip);
        }
        next
    }

    /// Settings for `dir`: these, overlaid with every override file found directly in it.
    pub fn for_directory(&self, dir: &Path) -> Self {
        let Ok(entries) = fs::read_dir(dir) else {
            return self.clone();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|kind| !kind.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .filter(|path| is_override_file(path))
            .collect();
        files.sort();
        files
            .iter()
            .filter_map(|path| DirectoryOverrides::read(path))
            .fold(self.clone(), |settings, overrides| settings.apply(overrides))
    }

    pub fn skips(&self, name: &str) -> bool {
        self.skip.contains(name)
    }
}
