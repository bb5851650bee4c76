// Copyright (C) 2023-2024 gigablaster

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
    collections::{BTreeMap, HashMap},
    fs,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::Arc,
};

use ash::vk;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use siphasher::sip128::{Hasher128, SipHasher13};
use torch_common::Pathlet;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEval,
    Compute,
    Task,
    Mesh,
}

impl ShaderKind {
    pub fn from_stage(stage: vk::ShaderStageFlags) -> Option<Self> {
        match stage {
            vk::ShaderStageFlags::VERTEX => Some(Self::Vertex),
            vk::ShaderStageFlags::FRAGMENT => Some(Self::Fragment),
            vk::ShaderStageFlags::GEOMETRY => Some(Self::Geometry),
            vk::ShaderStageFlags::TESSELLATION_CONTROL => Some(Self::TessControl),
            vk::ShaderStageFlags::TESSELLATION_EVALUATION => Some(Self::TessEval),
            vk::ShaderStageFlags::COMPUTE => Some(Self::Compute),
            vk::ShaderStageFlags::TASK_EXT => Some(Self::Task),
            vk::ShaderStageFlags::MESH_EXT => Some(Self::Mesh),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "geom" => Some(Self::Geometry),
            "tesc" => Some(Self::TessControl),
            "tese" => Some(Self::TessEval),
            "comp" => Some(Self::Compute),
            "task" => Some(Self::Task),
            "mesh" => Some(Self::Mesh),
            _ => None,
        }
    }
}

/// The SPIR-V compiler as the engine sees it. The concrete compiler
/// (shaderc, glslang, a test stub) is injected by the application.
pub trait ShaderCompiler: Send + Sync {
    fn compile(&self, source: &str, kind: ShaderKind, name: &str) -> Result<Vec<u32>>;
}

const GLSL_OUTPUT: u32 = 0;
const SPIRV_OUTPUT: u32 = 1;

/// One entry of the shader database emitted by the pipeline compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderDatabaseEntry {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// 0 = glsl, 1 = spirv. Carried for compatibility with the pipeline
    /// compiler's output; the loader compiles either way.
    #[serde(rename = "outputType", default)]
    pub output_type: u32,
}

/// JSON cache mapping logical shader paths to source/target pairs plus
/// substitution variables. The file's writer is the pipeline compiler;
/// here it is read-only and parse failures count as cache misses.
#[derive(Debug, Clone, Default)]
pub struct ShaderDatabase {
    entries: HashMap<String, ShaderDatabaseEntry>,
}

impl ShaderDatabase {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let entries: HashMap<String, ShaderDatabaseEntry> = serde_json::from_str(&text)
            .map_err(|err| Error::ShaderDatabase(err.to_string()))?;
        for entry in entries.values() {
            if entry.output_type != GLSL_OUTPUT && entry.output_type != SPIRV_OUTPUT {
                return Err(Error::ShaderDatabase(format!(
                    "invalid outputType {}",
                    entry.output_type
                )));
            }
        }

        Ok(Self { entries })
    }

    /// Exact logical-path match.
    pub fn get(&self, path: &str) -> Option<&ShaderDatabaseEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replace `$name` tokens in shader source with the database variables.
fn substitute_variables(source: &str, variables: &BTreeMap<String, String>) -> String {
    let mut result = source.to_string();
    for (name, replacement) in variables {
        result = result.replace(&format!("${}", name), replacement);
    }
    result
}

fn variables_hash(variables: &BTreeMap<String, String>) -> String {
    let mut hasher = SipHasher13::default();
    for (name, value) in variables {
        name.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    format!("{:032x}", hasher.finish128().as_u128())
}

fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn is_stale(src: &Path, bin: &Path) -> bool {
    let Ok(bin_meta) = fs::metadata(bin) else {
        return true;
    };
    let (Ok(src_time), Ok(bin_time)) = (
        fs::metadata(src).and_then(|m| m.modified()),
        bin_meta.modified(),
    ) else {
        return true;
    };
    src_time > bin_time
}

/// Loads compiled shader binaries, recompiling GLSL sources when they
/// are newer than the cached SPIR-V.
///
/// The staleness check compares the named source file only; edits to
/// transitively included headers do not invalidate the cache.
pub struct ShaderLoader {
    compiler: Arc<dyn ShaderCompiler>,
    include_paths: Vec<PathBuf>,
    out_dir: PathBuf,
    database: Option<ShaderDatabase>,
}

impl ShaderLoader {
    pub fn new(
        compiler: Arc<dyn ShaderCompiler>,
        include_paths: Vec<PathBuf>,
        out_dir: PathBuf,
        database: Option<ShaderDatabase>,
    ) -> Result<Self> {
        if out_dir.exists() && !out_dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{:?} exists but is not a directory", out_dir),
            )));
        }
        fs::create_dir_all(&out_dir)?;

        Ok(Self {
            compiler,
            include_paths,
            out_dir,
            database,
        })
    }

    /// Resolve `path` against the include paths, then against the shader
    /// database, and return the compiled binary. The first include path
    /// containing the source wins.
    pub fn load(&self, path: &Pathlet) -> Result<Vec<u32>> {
        for include in &self.include_paths {
            let src = path.filesystem_path(include);
            if src.is_file() {
                let bin = path.with_suffix(".spv").filesystem_path(&self.out_dir);
                return self.load_or_compile(&src, &bin, None);
            }
        }

        if let Some(entry) = self.database.as_ref().and_then(|db| db.get(path.as_str())) {
            for include in &self.include_paths {
                let src = include.join(&entry.source);
                if src.is_file() {
                    let bin = self.out_dir.join(&entry.target).with_extension("spv");
                    return self.load_or_compile(&src, &bin, Some(&entry.variables));
                }
            }
        }

        Err(Error::ShaderNotFound(path.as_str().to_string()))
    }

    fn load_or_compile(
        &self,
        src: &Path,
        bin: &Path,
        variables: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<u32>> {
        let vars_path = bin.with_extension("spv.vars");
        let mut stale = is_stale(src, bin);
        if let Some(variables) = variables {
            // A changed variable set invalidates the binary even when the
            // source is unchanged.
            let current = variables_hash(variables);
            let stored = fs::read_to_string(&vars_path).unwrap_or_default();
            stale |= stored != current;
        }

        if !stale {
            debug!("Loading cached shader binary {:?}", bin);
            return Ok(bytes_to_words(&fs::read(bin)?));
        }

        let mut source = fs::read_to_string(src)?;
        if let Some(variables) = variables {
            source = substitute_variables(&source, variables);
        }
        let kind = src
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(ShaderKind::from_extension)
            .ok_or_else(|| Error::ShaderCompile {
                name: src.to_string_lossy().into_owned(),
                message: "cannot derive the shader kind from the file extension".into(),
            })?;

        debug!("Compiling shader {:?} to {:?}", src, bin);
        let words = self
            .compiler
            .compile(&source, kind, &src.to_string_lossy())?;

        if let Some(parent) = bin.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(bin, words_to_bytes(&words))?;
        if let Some(variables) = variables {
            if fs::write(&vars_path, variables_hash(variables)).is_err() {
                warn!("Unable to write variables stamp next to {:?}", bin);
            }
        }

        Ok(words)
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::BTreeMap,
        fs,
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc,
        },
        time::{Duration, SystemTime},
    };

    use parking_lot::Mutex;
    use torch_common::Pathlet;

    use super::{ShaderCompiler, ShaderDatabase, ShaderKind, ShaderLoader};
    use crate::Result;

    #[derive(Default)]
    struct CountingCompiler {
        count: AtomicU32,
        last_source: Mutex<String>,
    }

    impl ShaderCompiler for CountingCompiler {
        fn compile(&self, source: &str, _kind: ShaderKind, _name: &str) -> Result<Vec<u32>> {
            self.count.fetch_add(1, Ordering::SeqCst);
            *self.last_source.lock() = source.to_string();
            let mut words = vec![0x0723_0203u32];
            words.extend(source.bytes().map(u32::from));
            Ok(words)
        }
    }

    fn touch_newer(path: &std::path::Path, than: &std::path::Path) {
        let base = fs::metadata(than).unwrap().modified().unwrap();
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(base + Duration::from_secs(10)).unwrap();
    }

    #[test]
    fn compiles_once_and_reuses_the_cached_binary() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("shaders");
        let out_dir = dir.path().join("spv");
        fs::create_dir_all(&src_dir).unwrap();
        fs::write(src_dir.join("foo.frag"), "void main() {}").unwrap();

        let compiler = Arc::new(CountingCompiler::default());
        let loader = ShaderLoader::new(
            compiler.clone(),
            vec![src_dir.clone()],
            out_dir.clone(),
            None,
        )
        .unwrap();

        let path = Pathlet::new("foo.frag").unwrap();
        let first = loader.load(&path).unwrap();
        assert_eq!(1, compiler.count.load(Ordering::SeqCst));
        assert!(out_dir.join("foo.frag.spv").is_file());

        let second = loader.load(&path).unwrap();
        assert_eq!(1, compiler.count.load(Ordering::SeqCst));
        assert_eq!(first, second);
    }

    #[test]
    fn newer_source_invalidates_the_binary() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("shaders");
        let out_dir = dir.path().join("spv");
        fs::create_dir_all(&src_dir).unwrap();
        let src = src_dir.join("foo.vert");
        fs::write(&src, "void main() {}").unwrap();

        let compiler = Arc::new(CountingCompiler::default());
        let loader =
            ShaderLoader::new(compiler.clone(), vec![src_dir], out_dir.clone(), None).unwrap();

        let path = Pathlet::new("foo.vert").unwrap();
        loader.load(&path).unwrap();
        assert_eq!(1, compiler.count.load(Ordering::SeqCst));

        fs::write(&src, "void main() { /* edited */ }").unwrap();
        touch_newer(&src, &out_dir.join("foo.vert.spv"));

        let words = loader.load(&path).unwrap();
        assert_eq!(2, compiler.count.load(Ordering::SeqCst));
        // The binary now matches the current source.
        let expected = {
            let mut w = vec![0x0723_0203u32];
            w.extend("void main() { /* edited */ }".bytes().map(u32::from));
            w
        };
        assert_eq!(expected, words);
    }

    #[test]
    fn missing_shader_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ShaderLoader::new(
            Arc::new(CountingCompiler::default()),
            vec![dir.path().to_path_buf()],
            dir.path().join("spv"),
            None,
        )
        .unwrap();
        assert!(loader.load(&Pathlet::new("nope.frag").unwrap()).is_err());
    }

    #[test]
    fn database_entries_substitute_variables_and_invalidate_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let src_dir = dir.path().join("shaders");
        let out_dir = dir.path().join("spv");
        fs::create_dir_all(&src_dir).unwrap();
        fs::write(
            src_dir.join("color.frag"),
            "void main() { color = $COLOR; }",
        )
        .unwrap();

        let db_path = dir.path().join("shaders.json");
        fs::write(
            &db_path,
            r##"{
                "materials/red": {
                    "source": "color.frag",
                    "target": "materials/red.frag",
                    "variables": { "COLOR": "vec4(1, 0, 0, 1)" },
                    "outputType": 0
                }
            }"##,
        )
        .unwrap();
        let database = ShaderDatabase::load(&db_path).unwrap();
        assert_eq!(1, database.len());

        let compiler = Arc::new(CountingCompiler::default());
        let loader = ShaderLoader::new(
            compiler.clone(),
            vec![src_dir.clone()],
            out_dir.clone(),
            Some(database),
        )
        .unwrap();

        let path = Pathlet::new("materials/red").unwrap();
        loader.load(&path).unwrap();
        assert_eq!(1, compiler.count.load(Ordering::SeqCst));
        assert!(compiler.last_source.lock().contains("vec4(1, 0, 0, 1)"));

        // Unchanged variables hit the cache.
        loader.load(&path).unwrap();
        assert_eq!(1, compiler.count.load(Ordering::SeqCst));

        // A changed variable set forces recompilation.
        let mut variables = BTreeMap::new();
        variables.insert("COLOR".to_string(), "vec4(0, 1, 0, 1)".to_string());
        let mut database = ShaderDatabase::load(&db_path).unwrap();
        database
            .entries
            .get_mut("materials/red")
            .unwrap()
            .variables = variables;
        let loader = ShaderLoader::new(compiler.clone(), vec![src_dir], out_dir, Some(database))
            .unwrap();
        loader.load(&path).unwrap();
        assert_eq!(2, compiler.count.load(Ordering::SeqCst));
        assert!(compiler.last_source.lock().contains("vec4(0, 1, 0, 1)"));
    }

    #[test]
    fn malformed_database_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("broken.json");
        fs::write(&db_path, "{ not json").unwrap();
        assert!(ShaderDatabase::load(&db_path).is_err());
    }
}
