use crate::core::traits::PinReader;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const VERSION_FILE: &str = ".gitshu-version";
pub const BOOK_FILE: &str = "book.json";
const BOOK_KEY: &str = "gitshu";

/// Reads `.gitshu-version`, then the `gitshu` field of `book.json`
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePinReader;

impl PinReader for FilePinReader {
    fn read_pin(&self, dir: &Path) -> Result<Option<String>> {
        let version_file = dir.join(VERSION_FILE);
        if version_file.is_file() {
            let contents = std::fs::read_to_string(&version_file)?;
            let specifier = contents.trim();
            if !specifier.is_empty() {
                return Ok(Some(specifier.to_string()));
            }
        }

        let book_file = dir.join(BOOK_FILE);
        if book_file.is_file() {
            let contents = std::fs::read_to_string(&book_file)?;
            let book: serde_json::Value = match serde_json::from_str(&contents) {
                Ok(book) => book,
                Err(e) => {
                    warn!("Ignoring unparseable {}: {}", book_file.display(), e);
                    return Ok(None);
                }
            };

            if let Some(specifier) = book.get(BOOK_KEY).and_then(|v| v.as_str()) {
                let specifier = specifier.trim();
                if !specifier.is_empty() {
                    return Ok(Some(specifier.to_string()));
                }
            }
        }

        Ok(None)
    }
}

/// Nearest pin in `start` or its ancestors, with the directory declaring it
pub fn find_pin(reader: &dyn PinReader, start: &Path) -> Result<Option<(PathBuf, String)>> {
    for dir in start.ancestors() {
        if let Some(specifier) = reader.read_pin(dir)? {
            debug!("Found version pin {} in {}", specifier, dir.display());
            return Ok(Some((dir.to_path_buf(), specifier)));
        }
    }
    Ok(None)
}

/// Write a `.gitshu-version` pin into `dir`
pub fn write_pin(dir: &Path, specifier: &str) -> Result<PathBuf> {
    let path = dir.join(VERSION_FILE);
    std::fs::write(&path, format!("{}\n", specifier.trim()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_write_version_file() {
        let temp_dir = TempDir::new().unwrap();
        write_pin(temp_dir.path(), " 3.2.1 ").unwrap();

        let pin = FilePinReader.read_pin(temp_dir.path()).unwrap();
        assert_eq!(pin.as_deref(), Some("3.2.1"));
    }

    #[test]
    fn test_book_json_pin() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(BOOK_FILE),
            r#"{ "title": "Guide", "gitshu": "beta" }"#,
        )
        .unwrap();

        let pin = FilePinReader.read_pin(temp_dir.path()).unwrap();
        assert_eq!(pin.as_deref(), Some("beta"));
    }

    #[test]
    fn test_unparseable_or_empty_pins_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(VERSION_FILE), "\n").unwrap();
        std::fs::write(temp_dir.path().join(BOOK_FILE), "{ broken").unwrap();

        assert_eq!(FilePinReader.read_pin(temp_dir.path()).unwrap(), None);
    }

    #[test]
    fn test_find_pin_walks_ancestors() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("book").join("chapter");
        std::fs::create_dir_all(&nested).unwrap();
        write_pin(&temp_dir.path().join("book"), "3.1.0").unwrap();

        let (dir, specifier) = find_pin(&FilePinReader, &nested).unwrap().unwrap();
        assert_eq!(dir, temp_dir.path().join("book"));
        assert_eq!(specifier, "3.1.0");
    }
}
