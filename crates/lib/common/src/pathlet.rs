// Copyright (C) 2023 gigablaster

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::{
    fmt::{self, Display},
    path::{Component, Path, PathBuf},
    str::FromStr,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathletError {
    #[error("Unable to construct a pathlet from an empty path")]
    Empty,
    #[error("Unable to construct a pathlet from \"{0}\": path must not be a directory name")]
    DirectoryName(String),
}

/// A path fragment relative to a root that is only known at the point of
/// use. Pathlets are the canonical key of every storage in the engine: two
/// pathlets are the same key iff their normalized strings are equal.
///
/// Construction rejects empty paths, `.`, and anything ending in a
/// separator. A root component is stripped, `.` and `..` components are
/// folded lexically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pathlet(String);

impl Pathlet {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PathletError> {
        let path = path.as_ref();
        let raw = path.to_string_lossy();
        if raw.is_empty() {
            return Err(PathletError::Empty);
        }
        if raw == "." || raw.ends_with('/') || raw.ends_with(std::path::MAIN_SEPARATOR) {
            return Err(PathletError::DirectoryName(raw.into_owned()));
        }

        let mut parts: Vec<String> = Vec::new();
        for component in path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if parts.last().map(|p| p != "..").unwrap_or(false) {
                        parts.pop();
                    } else {
                        parts.push("..".into());
                    }
                }
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            }
        }

        let normalized = parts.join("/");
        if normalized.is_empty() {
            return Err(PathletError::DirectoryName(raw.into_owned()));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The final path component.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap()
    }

    /// The final component stripped of its outermost extension.
    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(index) => &name[..index],
        }
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(index) => Some(&name[index + 1..]),
        }
    }

    /// Replace the outermost extension. `ext` may carry a leading dot.
    pub fn replace_extension(&self, ext: &str) -> Pathlet {
        let ext = ext.strip_prefix('.').unwrap_or(ext);
        let stem_len = self.0.len() - (self.file_name().len() - self.file_stem().len());
        let mut string = self.0[..stem_len].to_string();
        if !ext.is_empty() {
            string.push('.');
            string.push_str(ext);
        }
        Pathlet(string)
    }

    /// Append a raw suffix, e.g. `".meta"`.
    pub fn with_suffix(&self, suffix: &str) -> Pathlet {
        Pathlet(format!("{}{}", self.0, suffix))
    }

    /// Strip a raw suffix previously appended with [`Pathlet::with_suffix`].
    pub fn strip_suffix(&self, suffix: &str) -> Option<Pathlet> {
        self.0.strip_suffix(suffix).and_then(|stripped| {
            if stripped.is_empty() {
                None
            } else {
                Some(Pathlet(stripped.to_string()))
            }
        })
    }

    /// The concatenation `parent / pathlet`.
    pub fn filesystem_path(&self, parent: impl AsRef<Path>) -> PathBuf {
        parent.as_ref().join(&self.0)
    }
}

impl Display for Pathlet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Pathlet {
    type Err = PathletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pathlet::new(s)
    }
}

impl AsRef<str> for Pathlet {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::{Pathlet, PathletError};

    #[test]
    fn rejects_empty_and_directories() {
        assert_eq!(Err(PathletError::Empty), Pathlet::new(""));
        assert!(matches!(
            Pathlet::new("."),
            Err(PathletError::DirectoryName(_))
        ));
        assert!(matches!(
            Pathlet::new("foo/"),
            Err(PathletError::DirectoryName(_))
        ));
        assert!(matches!(
            Pathlet::new("a/.."),
            Err(PathletError::DirectoryName(_))
        ));
    }

    #[test]
    fn strips_root() {
        assert_eq!("foo/bar", Pathlet::new("/foo/bar").unwrap().as_str());
    }

    #[test]
    fn folds_dot_components() {
        assert_eq!("foo/baz", Pathlet::new("foo/./bar/../baz").unwrap().as_str());
        assert_eq!("../foo", Pathlet::new("../foo").unwrap().as_str());
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["/foo/bar", "foo/./bar", "a/b/../c/d.png"] {
            let once = Pathlet::new(raw).unwrap();
            let twice = Pathlet::new(once.as_str()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn equality_is_string_based() {
        assert_eq!(
            Pathlet::new("foo//bar").unwrap(),
            Pathlet::new("foo/bar").unwrap()
        );
        assert_ne!(
            Pathlet::new("foo/bar").unwrap(),
            Pathlet::new("foo/baz").unwrap()
        );
    }

    #[test]
    fn filename_and_extension() {
        let path = Pathlet::new("foo/bar/image.png").unwrap();
        assert_eq!("image.png", path.file_name());
        assert_eq!("image", path.file_stem());
        assert_eq!(Some("png"), path.extension());
    }

    #[test]
    fn replace_and_append_extension() {
        let path = Pathlet::new("foo/image.png").unwrap();
        assert_eq!("foo/image.ktx", path.replace_extension("ktx").as_str());
        assert_eq!("foo/image.ktx", path.replace_extension(".ktx").as_str());
        assert_eq!("foo/image.png.meta", path.with_suffix(".meta").as_str());
        assert_eq!(
            Some(path.clone()),
            path.with_suffix(".meta").strip_suffix(".meta")
        );
    }

    #[test]
    fn concatenates_onto_parent() {
        let path = Pathlet::new("foo/bar.png").unwrap();
        assert_eq!(
            std::path::Path::new("/assets/foo/bar.png"),
            path.filesystem_path("/assets")
        );
    }

    #[test]
    fn hidden_files_keep_their_name() {
        let path = Pathlet::new("dir/.hidden").unwrap();
        assert_eq!(".hidden", path.file_stem());
        assert_eq!(None, path.extension());
    }
}
