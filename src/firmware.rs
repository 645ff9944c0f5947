//! Firmware images from disk

use std::fs;
use std::path::{Path, PathBuf};

use navcard_core::error::{Error, Result};
use navcard_core::firmware::{FirmwareImage, FirmwareSource};

const DEFAULT_DIRS: [&str; 3] = [
    "firmware",
    "/usr/share/navcard/firmware",
    "/usr/local/share/navcard/firmware",
];

/// Looks up images by file name in an ordered list of directories
#[derive(Debug, Clone)]
pub struct FirmwareDir {
    dirs: Vec<PathBuf>,
}

impl FirmwareDir {
    /// Search `explicit` first if given, then the default locations
    pub fn new(explicit: Option<&Path>) -> Self {
        let dirs = explicit
            .map(Path::to_path_buf)
            .into_iter()
            .chain(DEFAULT_DIRS.iter().map(PathBuf::from))
            .collect();
        Self { dirs }
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        self.dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }
}

impl FirmwareSource for FirmwareDir {
    fn load(&mut self, name: &str) -> Result<FirmwareImage> {
        let Some(path) = self.find(name) else {
            log::error!("Firmware {} not found, searched:", name);
            for dir in &self.dirs {
                log::error!("  {}", dir.display());
            }
            return Err(Error::FirmwareMissing);
        };

        let bytes = fs::read(&path).map_err(|e| {
            log::error!("Failed to read {}: {}", path.display(), e);
            Error::FirmwareMissing
        })?;
        log::debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
        FirmwareImage::parse(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_searched_first() {
        let dir = std::env::temp_dir().join(format!("navcard-fw-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("grmn0300.dat"), [0x00, 0x00, 0x01, 0x00, 0xAA]).unwrap();

        let mut source = FirmwareDir::new(Some(&dir));
        let image = source.load("grmn0300.dat").unwrap();
        assert_eq!(image.len(), 1);
        assert_eq!(source.load("grmn9999.dat"), Err(Error::FirmwareMissing));

        fs::remove_dir_all(&dir).unwrap();
    }
}
