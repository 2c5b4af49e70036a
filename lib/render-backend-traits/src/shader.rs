use std::collections::HashMap;
use std::path::{Path, PathBuf};

use render_types::capabilities::ShaderStageFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderFileType {
    Vertex,
    Fragment,
    Compute,
    Task,
    Mesh,
    RtRaygen,
    RtClosestHit,
    RtAnyHit,
    RtMiss,
    RtIntersection,
}

impl ShaderFileType {
    pub fn stage_flag(&self) -> ShaderStageFlags {
        match self {
            Self::Vertex => ShaderStageFlags::VERTEX,
            Self::Fragment => ShaderStageFlags::FRAGMENT,
            Self::Compute => ShaderStageFlags::COMPUTE,
            Self::Task => ShaderStageFlags::TASK,
            Self::Mesh => ShaderStageFlags::MESH,
            Self::RtRaygen => ShaderStageFlags::RT_RAY_GEN,
            Self::RtClosestHit => ShaderStageFlags::RT_CLOSEST_HIT,
            Self::RtAnyHit => ShaderStageFlags::RT_ANY_HIT,
            Self::RtMiss => ShaderStageFlags::RT_MISS,
            Self::RtIntersection => ShaderStageFlags::RT_INTERSECTION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderFile {
    path: PathBuf,
    ty: ShaderFileType,
}

impl ShaderFile {
    pub fn new(path: impl AsRef<Path>, ty: ShaderFileType) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ty,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ty(&self) -> ShaderFileType {
        self.ty
    }
}

/// A preprocessor define passed to shader compilation. A `None` value is a
/// flag-style define.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderDefine {
    pub name: String,
    pub value: Option<String>,
}

impl ShaderDefine {
    pub fn make_bool(name: &str, value: bool) -> Self {
        Self {
            name: name.to_string(),
            value: Some(if value { "true" } else { "false" }.to_string()),
        }
    }

    pub fn make_int(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }

    pub fn make_flag(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderType {
    Raster,
    Compute,
    RayTrace,
}

/// A shader is purely a description: which files at which stages, with
/// which defines. Compilation to SPIR-V and reflection happen in the
/// backend, addressed by [`Shader::identity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shader {
    files: Vec<ShaderFile>,
    ty: ShaderType,
    defines: Vec<ShaderDefine>,
}

impl Shader {
    pub fn create_vertex_only(vertex_path: impl AsRef<Path>, defines: Vec<ShaderDefine>) -> Self {
        Self {
            files: vec![ShaderFile::new(vertex_path, ShaderFileType::Vertex)],
            ty: ShaderType::Raster,
            defines,
        }
    }

    pub fn create_basic_rasterize(
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
        defines: Vec<ShaderDefine>,
    ) -> Self {
        Self {
            files: vec![
                ShaderFile::new(vertex_path, ShaderFileType::Vertex),
                ShaderFile::new(fragment_path, ShaderFileType::Fragment),
            ],
            ty: ShaderType::Raster,
            defines,
        }
    }

    pub fn create_compute(compute_path: impl AsRef<Path>, defines: Vec<ShaderDefine>) -> Self {
        Self {
            files: vec![ShaderFile::new(compute_path, ShaderFileType::Compute)],
            ty: ShaderType::Compute,
            defines,
        }
    }

    pub fn create_mesh_shading(
        task_path: Option<&Path>,
        mesh_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
        defines: Vec<ShaderDefine>,
    ) -> Self {
        let mut files = Vec::new();
        if let Some(task_path) = task_path {
            files.push(ShaderFile::new(task_path, ShaderFileType::Task));
        }
        files.push(ShaderFile::new(mesh_path, ShaderFileType::Mesh));
        files.push(ShaderFile::new(fragment_path, ShaderFileType::Fragment));
        Self {
            files,
            ty: ShaderType::Raster,
            defines,
        }
    }

    pub fn create_ray_tracing(files: Vec<ShaderFile>, defines: Vec<ShaderDefine>) -> Self {
        Self {
            files,
            ty: ShaderType::RayTrace,
            defines,
        }
    }

    pub fn files(&self) -> &[ShaderFile] {
        &self.files
    }

    pub fn ty(&self) -> ShaderType {
        self.ty
    }

    pub fn defines(&self) -> &[ShaderDefine] {
        &self.defines
    }

    /// Stable key for compiled-module caches: file paths, stages & defines.
    pub fn identity(&self) -> String {
        let mut identity = String::new();
        for file in &self.files {
            identity.push_str(&format!("{:?}:{};", file.ty(), file.path().display()));
        }
        for define in &self.defines {
            match &define.value {
                Some(value) => identity.push_str(&format!("{}={};", define.name, value)),
                None => identity.push_str(&format!("{};", define.name)),
            }
        }
        identity
    }
}

/// One member of the reserved named-uniform constant buffer, as reported
/// by shader reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedConstant {
    pub offset: u32,
    pub size: u32,
}

/// `name -> (offset, size)` lookup for named-uniform dispatch, merged from
/// the reflection data of every stage in a pipeline.
#[derive(Debug, Default, Clone)]
pub struct NamedConstantLookup {
    constants: HashMap<String, NamedConstant>,
    total_size: u32,
}

impl NamedConstantLookup {
    pub fn register(&mut self, name: &str, constant: NamedConstant) {
        self.constants.insert(name.to_string(), constant);
        self.total_size = self.total_size.max(constant.offset + constant.size);
    }

    pub fn merge(&mut self, other: &NamedConstantLookup) {
        for (name, constant) in &other.constants {
            self.register(name, *constant);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<NamedConstant> {
        self.constants.get(name).copied()
    }

    /// Byte size of the backing constant buffer.
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_distinguishes_defines() {
        let a = Shader::create_compute("culling.wgsl", vec![]);
        let b = Shader::create_compute(
            "culling.wgsl",
            vec![ShaderDefine::make_bool("FRUSTUM_ONLY", true)],
        );
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.identity(), a.clone().identity());
    }

    #[test]
    fn named_constant_lookup_tracks_total_size() {
        let mut lookup = NamedConstantLookup::default();
        lookup.register(
            "exposure",
            NamedConstant {
                offset: 0,
                size: 4,
            },
        );
        lookup.register(
            "view_matrix",
            NamedConstant {
                offset: 16,
                size: 64,
            },
        );
        assert_eq!(lookup.total_size(), 80);
        assert_eq!(lookup.lookup("exposure").unwrap().size, 4);
        assert!(lookup.lookup("missing").is_none());
    }
}
