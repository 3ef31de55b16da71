use std::path::{Path, PathBuf};

use crate::grammar::is_filename;
use crate::{Error, Result};

pub const SESSION_EXTENSION: &str = "chil";
pub const DATA_EXTENSION: &str = "log";
pub const INDEX_EXTENSION: &str = "idx";
pub const CATALOG_FILE: &str = "catalog";

/// Paths inside one recording session directory (`<name>.chil/`).
#[derive(Debug, Clone)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    /// Appends the `.chil` suffix when `root` does not already carry it.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = if root.extension().is_some_and(|ext| ext == SESSION_EXTENSION) {
            root.to_path_buf()
        } else {
            let mut name = root.as_os_str().to_os_string();
            name.push(".");
            name.push(SESSION_EXTENSION);
            PathBuf::from(name)
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_path(&self, component: &str) -> Result<PathBuf> {
        Ok(self.root.join(data_filename(component)?))
    }

    pub fn index_path(&self, component: &str) -> Result<PathBuf> {
        validate_component(component)?;
        Ok(self.root.join(format!("{component}.{INDEX_EXTENSION}")))
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    /// Component names of every `<name>.log` in the directory, sorted.
    pub fn discover_components(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !file_name.ends_with(&format!(".{DATA_EXTENSION}")) {
                continue;
            }
            if let Some(component) = component_from_filename(file_name) {
                names.push(component.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

pub fn validate_component(component: &str) -> Result<()> {
    if !is_filename(component) || component.starts_with('.') {
        return Err(Error::InvalidName(component.to_string()));
    }
    Ok(())
}

pub fn data_filename(component: &str) -> Result<String> {
    validate_component(component)?;
    Ok(format!("{component}.{DATA_EXTENSION}"))
}

/// Inverse of [`data_filename`]; accepts a bare component name too.
pub fn component_from_filename(filename: &str) -> Option<&str> {
    let base = filename
        .strip_suffix(DATA_EXTENSION)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(filename);
    validate_component(base).ok().map(|_| base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_suffix_is_added_once() {
        assert_eq!(SessionLayout::new("/tmp/dive").root(), Path::new("/tmp/dive.chil"));
        assert_eq!(SessionLayout::new("/tmp/dive.chil").root(), Path::new("/tmp/dive.chil"));
    }

    #[test]
    fn component_names_are_validated() {
        let layout = SessionLayout::new("/tmp/x");
        assert!(layout.data_path("nav").is_ok());
        assert!(layout.data_path("sonar-2_b").is_ok());
        for bad in ["", "a/b", "a b", ".hidden", "naïve"] {
            assert!(matches!(layout.data_path(bad), Err(Error::InvalidName(_))), "{bad}");
        }
    }

    #[test]
    fn filename_round_trip() {
        assert_eq!(component_from_filename("nav.log"), Some("nav"));
        assert_eq!(component_from_filename("nav"), Some("nav"));
        assert_eq!(component_from_filename("nav.idx"), Some("nav.idx"));
        assert_eq!(component_from_filename("../nav.log"), None);
    }
}
