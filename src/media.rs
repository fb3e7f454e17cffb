// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Media catalog: maps a DMX select value to a file in a media folder.
//!
//! Files are matched by a zero-padded three digit prefix (`001_intro.mp4`,
//! `005.png`). The prefix must be followed by a non-digit so that `0010.mp4`
//! is never mistaken for selector 1.

use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi", "m4v"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// The kind of media a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Determines the media kind from a file extension. Case insensitive.
    pub fn from_extension(extension: &str) -> Option<MediaKind> {
        let extension = extension.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            Some(MediaKind::Video)
        } else if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            Some(MediaKind::Image)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Image => write!(f, "image"),
        }
    }
}

/// A reference to a single media file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MediaRef {
    /// The file name within the media folder.
    filename: String,
    /// The full path to the file.
    path: PathBuf,
    /// Video or image.
    kind: MediaKind,
}

impl MediaRef {
    pub fn new(filename: &str, path: PathBuf, kind: MediaKind) -> MediaRef {
        MediaRef {
            filename: filename.to_string(),
            path,
            kind,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.filename, self.kind)
    }
}

/// Parses the selector prefix of a file name. Returns None if the name does not
/// start with three digits followed by a non-digit, or if the prefix is outside 1-255.
pub fn selector_prefix(filename: &str) -> Option<u8> {
    let bytes = filename.as_bytes();
    if bytes.len() < 4 || !bytes[..3].iter().all(u8::is_ascii_digit) || bytes[3].is_ascii_digit()
    {
        return None;
    }

    match filename[..3].parse::<u16>() {
        Ok(value) if (1..=255).contains(&value) => Some(value as u8),
        _ => None,
    }
}

/// A single catalog entry.
#[derive(Debug, Clone)]
struct Entry {
    selector: u8,
    media: MediaRef,
}

/// A cached, sorted listing of a media folder.
#[derive(Debug, Clone)]
pub struct Catalog {
    /// The folder this catalog lists.
    folder: PathBuf,
    /// Entries sorted ascending by file name.
    entries: Vec<Entry>,
    /// Selector to the index of the first matching entry.
    index: HashMap<u8, usize>,
}

impl Catalog {
    /// Creates an empty catalog for the given folder.
    pub fn empty(folder: &Path) -> Catalog {
        Catalog {
            folder: folder.to_path_buf(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Lists the folder. Fails if the folder can't be read.
    pub fn try_scan(folder: &Path) -> Result<Catalog, io::Error> {
        let mut entries: Vec<Entry> = Vec::new();
        for dir_entry in fs::read_dir(folder)? {
            let path = dir_entry?.path();
            if !path.is_file() {
                continue;
            }

            let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(selector) = selector_prefix(filename) else {
                continue;
            };
            let Some(kind) = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(MediaKind::from_extension)
            else {
                debug!(file = filename, "Skipping file with unsupported extension");
                continue;
            };

            entries.push(Entry {
                selector,
                media: MediaRef::new(filename, path.clone(), kind),
            });
        }

        entries.sort_by(|a, b| a.media.filename.cmp(&b.media.filename));

        let mut index = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            index.entry(entry.selector).or_insert(i);
        }

        Ok(Catalog {
            folder: folder.to_path_buf(),
            entries,
            index,
        })
    }

    /// Lists the folder. An unreadable folder yields an empty catalog and a warning.
    pub fn scan(folder: &Path) -> Catalog {
        match Catalog::try_scan(folder) {
            Ok(catalog) => {
                debug!(
                    folder = %folder.display(),
                    entries = catalog.len(),
                    "Scanned media folder"
                );
                catalog
            }
            Err(e) => {
                warn!(
                    folder = %folder.display(),
                    err = e.to_string(),
                    "Unable to read media folder, treating it as empty"
                );
                Catalog::empty(folder)
            }
        }
    }

    /// Resolves a select value to a media file. Selector 0 never resolves.
    pub fn resolve(&self, select: u8) -> Option<&MediaRef> {
        if select == 0 {
            return None;
        }
        self.index
            .get(&select)
            .map(|position| &self.entries[*position].media)
    }

    /// The folder this catalog was listed from.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Selectors matched by more than one file, with every match in listing order.
    pub fn duplicates(&self) -> Vec<(u8, Vec<&MediaRef>)> {
        let mut by_selector: HashMap<u8, Vec<&MediaRef>> = HashMap::new();
        for entry in self.entries.iter() {
            by_selector
                .entry(entry.selector)
                .or_default()
                .push(&entry.media);
        }

        let mut duplicates: Vec<(u8, Vec<&MediaRef>)> = by_selector
            .into_iter()
            .filter(|(_, media)| media.len() > 1)
            .collect();
        duplicates.sort_by_key(|(selector, _)| *selector);
        duplicates
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Media in {} ({} files):",
            self.folder.display(),
            self.entries.len()
        )?;
        for entry in self.entries.iter() {
            writeln!(f, "  - {:03}: {}", entry.selector, entry.media)?;
        }
        Ok(())
    }
}

/// Catalogs keyed by folder, shared by every output. A folder is listed on first
/// use and only re-listed when explicitly refreshed.
#[derive(Default)]
pub struct Catalogs {
    by_folder: RwLock<HashMap<PathBuf, Arc<Catalog>>>,
}

impl Catalogs {
    pub fn new() -> Catalogs {
        Catalogs::default()
    }

    /// Gets the cached catalog for the folder, listing it if it hasn't been seen.
    pub fn get(&self, folder: &Path) -> Arc<Catalog> {
        if let Some(catalog) = self.by_folder.read().get(folder) {
            return catalog.clone();
        }

        let mut by_folder = self.by_folder.write();
        by_folder
            .entry(folder.to_path_buf())
            .or_insert_with(|| Arc::new(Catalog::scan(folder)))
            .clone()
    }

    /// Re-lists the folder in full, replacing the cached catalog.
    pub fn refresh(&self, folder: &Path) -> Arc<Catalog> {
        let catalog = Arc::new(Catalog::scan(folder));
        self.by_folder
            .write()
            .insert(folder.to_path_buf(), catalog.clone());
        catalog
    }

    /// Resolves the select value against the folder's cached listing.
    pub fn resolve(&self, folder: &Path, select: u8) -> Option<MediaRef> {
        self.get(folder).resolve(select).cloned()
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs::File, path::Path};

    use tempfile::tempdir;

    use super::{selector_prefix, Catalog, Catalogs, MediaKind};

    fn touch(folder: &Path, name: &str) -> Result<(), Box<dyn Error>> {
        File::create(folder.join(name))?;
        Ok(())
    }

    #[test]
    fn test_selector_prefix() {
        assert_eq!(Some(1), selector_prefix("001_intro.mp4"));
        assert_eq!(Some(5), selector_prefix("005.mp4"));
        assert_eq!(Some(255), selector_prefix("255 finale.mov"));
        assert_eq!(None, selector_prefix("000_blank.mp4"));
        assert_eq!(None, selector_prefix("256_overflow.mp4"));
        assert_eq!(None, selector_prefix("0010.mp4"));
        assert_eq!(None, selector_prefix("01_short.mp4"));
        assert_eq!(None, selector_prefix("001"));
        assert_eq!(None, selector_prefix("intro.mp4"));
    }

    #[test]
    fn test_resolve_scenario() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        touch(dir.path(), "001_intro.mp4")?;
        touch(dir.path(), "002_logo.png")?;

        let catalog = Catalog::try_scan(dir.path())?;
        let intro = catalog.resolve(1).expect("selector 1 should resolve");
        assert_eq!("001_intro.mp4", intro.filename());
        assert_eq!(MediaKind::Video, intro.kind());
        assert_eq!(dir.path().join("001_intro.mp4"), intro.path());

        let logo = catalog.resolve(2).expect("selector 2 should resolve");
        assert_eq!("002_logo.png", logo.filename());
        assert_eq!(MediaKind::Image, logo.kind());

        assert!(catalog.resolve(3).is_none());
        Ok(())
    }

    #[test]
    fn test_select_zero_never_resolves() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        touch(dir.path(), "000_black.mp4")?;
        touch(dir.path(), "000.png")?;

        let catalog = Catalog::try_scan(dir.path())?;
        assert!(catalog.resolve(0).is_none());
        assert!(catalog.is_empty());
        Ok(())
    }

    #[test]
    fn test_digit_after_prefix_is_not_a_match() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        touch(dir.path(), "0010_ten.mp4")?;

        let catalog = Catalog::try_scan(dir.path())?;
        assert!(catalog.resolve(1).is_none());
        assert!(catalog.resolve(10).is_none());
        Ok(())
    }

    #[test]
    fn test_duplicates_pick_first_sorted() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        touch(dir.path(), "007_zulu.mp4")?;
        touch(dir.path(), "007-alpha.png")?;
        touch(dir.path(), "007_mike.jpg")?;

        let catalog = Catalog::try_scan(dir.path())?;
        // '-' sorts before '_'.
        assert_eq!(
            "007-alpha.png",
            catalog.resolve(7).expect("should resolve").filename()
        );

        let duplicates = catalog.duplicates();
        assert_eq!(1, duplicates.len());
        assert_eq!(7, duplicates[0].0);
        assert_eq!(3, duplicates[0].1.len());
        Ok(())
    }

    #[test]
    fn test_extensions() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        touch(dir.path(), "010_loud.MP4")?;
        touch(dir.path(), "011_notes.txt")?;
        touch(dir.path(), "012_still.JPEG")?;
        std::fs::create_dir(dir.path().join("013_folder.mp4"))?;

        let catalog = Catalog::try_scan(dir.path())?;
        assert_eq!(
            MediaKind::Video,
            catalog.resolve(10).expect("should resolve").kind()
        );
        assert!(catalog.resolve(11).is_none());
        assert_eq!(
            MediaKind::Image,
            catalog.resolve(12).expect("should resolve").kind()
        );
        assert!(catalog.resolve(13).is_none());
        Ok(())
    }

    #[test]
    fn test_unreadable_folder_is_empty() {
        let catalog = Catalog::scan(Path::new("/this/folder/does/not/exist"));
        assert!(catalog.is_empty());
        for select in 0..=255u8 {
            assert!(catalog.resolve(select).is_none());
        }
    }

    #[test]
    fn test_resolve_is_stable() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        touch(dir.path(), "042_answer.webm")?;

        let catalogs = Catalogs::new();
        let first = catalogs.resolve(dir.path(), 42);
        let second = catalogs.resolve(dir.path(), 42);
        assert!(first.is_some());
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_refresh_relists() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        touch(dir.path(), "001_a.mp4")?;

        let catalogs = Catalogs::new();
        assert!(catalogs.resolve(dir.path(), 2).is_none());

        touch(dir.path(), "002_b.mp4")?;
        // Cached until refreshed.
        assert!(catalogs.resolve(dir.path(), 2).is_none());

        let refreshed = catalogs.refresh(dir.path());
        assert_eq!(2, refreshed.len());
        assert_eq!(
            "002_b.mp4",
            catalogs
                .resolve(dir.path(), 2)
                .expect("should resolve")
                .filename()
        );
        Ok(())
    }
}
