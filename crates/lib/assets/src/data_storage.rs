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
    collections::HashMap,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use log::warn;
use parking_lot::Mutex;
use torch_common::Pathlet;

/// A key -> byte-stream map. All asset storage sits on top of this; the
/// engine never touches the filesystem for assets directly.
pub trait DataStorage: Send + Sync {
    /// None if no value exists at `path` or it cannot be read.
    fn read(&self, path: &Pathlet) -> Option<Box<dyn Read + Send>>;

    /// Overwrites any existing value. None if the location is unwritable.
    /// The value is committed when the writer is dropped.
    fn write(&self, path: &Pathlet) -> Option<Box<dyn Write + Send>>;

    /// True if a value at `path` was erased.
    fn remove(&self, path: &Pathlet) -> bool;

    /// Every key currently present, in unspecified order.
    fn keys(&self) -> Vec<Pathlet>;
}

/// Stores each value as a file under a root directory.
pub struct FilesystemDataStorage {
    root: PathBuf,
}

impl FilesystemDataStorage {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn collect_keys(&self, dir: &Path, out: &mut Vec<Pathlet>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.collect_keys(&path, out);
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                if let Ok(pathlet) = Pathlet::new(relative) {
                    out.push(pathlet);
                }
            }
        }
    }
}

impl DataStorage for FilesystemDataStorage {
    fn read(&self, path: &Pathlet) -> Option<Box<dyn Read + Send>> {
        let file = File::open(path.filesystem_path(&self.root)).ok()?;
        Some(Box::new(file))
    }

    fn write(&self, path: &Pathlet) -> Option<Box<dyn Write + Send>> {
        let full = path.filesystem_path(&self.root);
        if let Some(parent) = full.parent() {
            if parent.is_file() {
                return None;
            }
            if fs::create_dir_all(parent).is_err() {
                warn!("Unable to create directory {:?}", parent);
                return None;
            }
        }
        let file = File::create(full).ok()?;
        Some(Box::new(file))
    }

    fn remove(&self, path: &Pathlet) -> bool {
        fs::remove_file(path.filesystem_path(&self.root)).is_ok()
    }

    fn keys(&self) -> Vec<Pathlet> {
        let mut out = Vec::new();
        self.collect_keys(&self.root, &mut out);
        out
    }
}

/// Storage that holds nothing and accepts nothing. Useful for tools that
/// must not touch asset data and for tests.
#[derive(Debug, Default)]
pub struct NullDataStorage;

impl DataStorage for NullDataStorage {
    fn read(&self, _path: &Pathlet) -> Option<Box<dyn Read + Send>> {
        None
    }

    fn write(&self, _path: &Pathlet) -> Option<Box<dyn Write + Send>> {
        None
    }

    fn remove(&self, _path: &Pathlet) -> bool {
        false
    }

    fn keys(&self) -> Vec<Pathlet> {
        Vec::new()
    }
}

/// In-memory storage. Values become visible when their writer is dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryDataStorage {
    entries: Arc<Mutex<HashMap<Pathlet, Bytes>>>,
}

impl MemoryDataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Pathlet) -> bool {
        self.entries.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

struct MemoryWriter {
    path: Pathlet,
    buffer: Vec<u8>,
    entries: Arc<Mutex<HashMap<Pathlet, Bytes>>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        let bytes = Bytes::from(std::mem::take(&mut self.buffer));
        self.entries.lock().insert(self.path.clone(), bytes);
    }
}

impl DataStorage for MemoryDataStorage {
    fn read(&self, path: &Pathlet) -> Option<Box<dyn Read + Send>> {
        let bytes = self.entries.lock().get(path)?.clone();
        Some(Box::new(io::Cursor::new(bytes)))
    }

    fn write(&self, path: &Pathlet) -> Option<Box<dyn Write + Send>> {
        Some(Box::new(MemoryWriter {
            path: path.clone(),
            buffer: Vec::new(),
            entries: self.entries.clone(),
        }))
    }

    fn remove(&self, path: &Pathlet) -> bool {
        self.entries.lock().remove(path).is_some()
    }

    fn keys(&self) -> Vec<Pathlet> {
        self.entries.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};

    use torch_common::Pathlet;

    use super::{DataStorage, FilesystemDataStorage, MemoryDataStorage, NullDataStorage};

    fn roundtrip(storage: &dyn DataStorage) {
        let path = Pathlet::new("dir/value.bin").unwrap();
        {
            let mut writer = storage.write(&path).unwrap();
            writer.write_all(b"payload").unwrap();
        }
        let mut reader = storage.read(&path).unwrap();
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        assert_eq!(b"payload".as_slice(), data.as_slice());

        assert!(storage.keys().contains(&path));
        assert!(storage.remove(&path));
        assert!(storage.read(&path).is_none());
        assert!(!storage.remove(&path));
    }

    #[test]
    fn memory_roundtrip() {
        roundtrip(&MemoryDataStorage::new());
    }

    #[test]
    fn filesystem_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        roundtrip(&FilesystemDataStorage::new(dir.path()).unwrap());
    }

    #[test]
    fn null_storage_holds_nothing() {
        let storage = NullDataStorage;
        let path = Pathlet::new("anything").unwrap();
        assert!(storage.read(&path).is_none());
        assert!(storage.write(&path).is_none());
        assert!(!storage.remove(&path));
        assert!(storage.keys().is_empty());
    }

    #[test]
    fn memory_write_commits_on_drop() {
        let storage = MemoryDataStorage::new();
        let path = Pathlet::new("value").unwrap();
        let mut writer = storage.write(&path).unwrap();
        writer.write_all(b"x").unwrap();
        assert!(!storage.contains(&path));
        drop(writer);
        assert!(storage.contains(&path));
    }
}
