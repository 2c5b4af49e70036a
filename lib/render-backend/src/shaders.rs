//! Runtime shader compilation: WGSL sources (with naga_oil preprocessing
//! for defines) are compiled and validated to SPIR-V, and the set-0 uniform
//! struct is reflected into the named-constant lookup the command list
//! uses for named-uniform dispatch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use log::debug;
use parking_lot::Mutex;
use render_backend_traits::shader::{
    NamedConstant, NamedConstantLookup, Shader, ShaderDefine, ShaderFile, ShaderFileType,
};

#[derive(Debug)]
pub struct CompiledShaderStage {
    pub ty: ShaderFileType,
    pub spirv: Vec<u32>,
    pub entry_point: String,
}

#[derive(Debug)]
pub struct CompiledShader {
    pub stages: Vec<CompiledShaderStage>,
    pub named_constants: NamedConstantLookup,
}

/// Compiles & caches shaders by their [`Shader::identity`]. The cache is
/// wiped when shaders recompile on disk so the next pipeline construction
/// picks up fresh binaries.
pub struct ShaderCompiler {
    base_dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<CompiledShader>>>,
}

impl std::fmt::Debug for ShaderCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderCompiler")
            .field("base_dir", &self.base_dir)
            .finish()
    }
}

impl ShaderCompiler {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    pub fn compile(&self, shader: &Shader) -> anyhow::Result<Arc<CompiledShader>> {
        let identity = shader.identity();
        if let Some(compiled) = self.cache.lock().get(&identity) {
            return Ok(compiled.clone());
        }

        let mut stages = Vec::with_capacity(shader.files().len());
        let mut named_constants = NamedConstantLookup::default();

        for file in shader.files() {
            let stage = if file.path().extension().and_then(|e| e.to_str()) == Some("spv") {
                // stages WGSL cannot express (ray tracing, mesh) arrive as
                // precompiled blobs with a JSON reflection side table
                self.load_precompiled(file, &mut named_constants)?
            } else {
                let module = self.load_module(file, shader.defines())?;
                reflect_named_constants(&module, &mut named_constants);
                let entry_point = wgsl_entry_point(&module, file.ty());
                let spirv = compile_spv(&module)
                    .with_context(|| format!("compiling '{}'", file.path().display()))?;
                CompiledShaderStage {
                    ty: file.ty(),
                    spirv,
                    entry_point,
                }
            };
            stages.push(stage);
        }

        let compiled = Arc::new(CompiledShader {
            stages,
            named_constants,
        });
        self.cache.lock().insert(identity, compiled.clone());
        Ok(compiled)
    }

    fn load_precompiled(
        &self,
        file: &ShaderFile,
        named_constants: &mut NamedConstantLookup,
    ) -> anyhow::Result<CompiledShaderStage> {
        let path = self.base_dir.join(file.path());
        let bytes = std::fs::read(&path)
            .with_context(|| format!("reading shader binary '{}'", path.display()))?;
        anyhow::ensure!(
            bytes.len() % 4 == 0,
            "SPIR-V binary '{}' is not a whole number of words",
            path.display()
        );
        let spirv: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("chunked by 4")))
            .collect();
        anyhow::ensure!(
            spirv.first() == Some(&0x0723_0203),
            "'{}' does not look like SPIR-V",
            path.display()
        );

        // the build step emits `<shader>.spv.refl.json` next to the blob
        let reflection_path = path.with_extension("spv.refl.json");
        if let Ok(reflection_text) = std::fs::read_to_string(&reflection_path) {
            #[derive(serde::Deserialize)]
            struct ReflectedConstant {
                offset: u32,
                size: u32,
            }
            let table: HashMap<String, ReflectedConstant> = serde_json::from_str(&reflection_text)
                .with_context(|| format!("parsing '{}'", reflection_path.display()))?;
            for (name, constant) in table {
                named_constants.register(
                    &name,
                    NamedConstant {
                        offset: constant.offset,
                        size: constant.size,
                    },
                );
            }
        }

        Ok(CompiledShaderStage {
            ty: file.ty(),
            spirv,
            entry_point: "main".to_string(),
        })
    }

    fn load_module(
        &self,
        file: &ShaderFile,
        defines: &[ShaderDefine],
    ) -> anyhow::Result<naga::Module> {
        let path = self.base_dir.join(file.path());
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("reading shader source '{}'", path.display()))?;
        debug!("compiling shader '{}'", path.display());
        shader_module_with_preprocessor(&path.display().to_string(), &source, defines)
    }
}

fn shader_def_value(define: &ShaderDefine) -> naga_oil::compose::ShaderDefValue {
    use naga_oil::compose::ShaderDefValue;
    match define.value.as_deref() {
        None => ShaderDefValue::Bool(true),
        Some("true") => ShaderDefValue::Bool(true),
        Some("false") => ShaderDefValue::Bool(false),
        Some(other) => match other.parse::<i32>() {
            Ok(value) => ShaderDefValue::Int(value),
            Err(_) => ShaderDefValue::Bool(true),
        },
    }
}

fn shader_module_with_preprocessor(
    name: &str,
    source: &str,
    defines: &[ShaderDefine],
) -> anyhow::Result<naga::Module> {
    let mut composer = naga_oil::compose::Composer::default()
        .with_capabilities(naga::valid::Capabilities::all());
    composer
        .make_naga_module(naga_oil::compose::NagaModuleDescriptor {
            source,
            file_path: name,
            shader_type: naga_oil::compose::ShaderType::Wgsl,
            shader_defs: defines
                .iter()
                .map(|define| (define.name.clone(), shader_def_value(define)))
                .collect(),
            additional_imports: &[],
        })
        .map_err(|err| anyhow!("shader preprocessing of '{name}' failed: {err}"))
}

/// Entry-point name of the stage within a WGSL module; `main` by
/// convention, but respect whatever the module actually declares.
fn wgsl_entry_point(module: &naga::Module, ty: ShaderFileType) -> String {
    let naga_stage = match ty {
        ShaderFileType::Vertex => Some(naga::ShaderStage::Vertex),
        ShaderFileType::Fragment => Some(naga::ShaderStage::Fragment),
        ShaderFileType::Compute => Some(naga::ShaderStage::Compute),
        _ => None,
    };
    naga_stage
        .and_then(|stage| {
            module
                .entry_points
                .iter()
                .find(|entry| entry.stage == stage)
                .map(|entry| entry.name.clone())
        })
        .unwrap_or_else(|| "main".to_string())
}

fn compile_spv(module: &naga::Module) -> anyhow::Result<Vec<u32>> {
    use naga::back::spv;
    Ok(spv::write_vec(
        module,
        &naga::valid::Validator::new(
            naga::valid::ValidationFlags::empty(),
            naga::valid::Capabilities::all(),
        )
        .validate(module)?,
        &spv::Options {
            flags: spv::WriterFlags::empty(),
            ..Default::default()
        },
        None,
    )?)
}

/// Collects the members of the `@group(0) @binding(0)` uniform struct,
/// the slot reserved for named-uniform dispatch.
pub fn reflect_named_constants(module: &naga::Module, lookup: &mut NamedConstantLookup) {
    for (_, variable) in module.global_variables.iter() {
        if variable.space != naga::AddressSpace::Uniform {
            continue;
        }
        let Some(binding) = &variable.binding else {
            continue;
        };
        if binding.group != 0 || binding.binding != 0 {
            continue;
        }
        let ty = &module.types[variable.ty];
        let naga::TypeInner::Struct { members, .. } = &ty.inner else {
            continue;
        };
        for member in members {
            let Some(name) = &member.name else { continue };
            let size = module.types[member.ty].inner.size(module.to_ctx());
            lookup.register(
                name,
                NamedConstant {
                    offset: member.offset,
                    size,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_DATA_WGSL: &str = r#"
struct FrameData {
    exposure: f32,
    frame_index: u32,
    sun_direction: vec4<f32>,
    view_from_world: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> frame_data: FrameData;

@fragment
fn main() -> @location(0) vec4<f32> {
    return vec4<f32>(frame_data.exposure);
}
"#;

    const TINTABLE_WGSL: &str = r#"
@fragment
fn main() -> @location(0) vec4<f32> {
#ifdef TINTED
    return vec4<f32>(1.0, 0.5, 0.0, 1.0);
#else
    return vec4<f32>(1.0);
#endif
}
"#;

    #[test]
    fn reflects_set0_uniform_struct_members() {
        let module =
            shader_module_with_preprocessor("frame_data_test", FRAME_DATA_WGSL, &[]).unwrap();
        let mut lookup = NamedConstantLookup::default();
        reflect_named_constants(&module, &mut lookup);

        let exposure = lookup.lookup("exposure").unwrap();
        assert_eq!(exposure.offset, 0);
        assert_eq!(exposure.size, 4);

        let sun = lookup.lookup("sun_direction").unwrap();
        assert_eq!(sun.offset, 16);
        assert_eq!(sun.size, 16);

        let view = lookup.lookup("view_from_world").unwrap();
        assert_eq!(view.offset, 32);
        assert_eq!(view.size, 64);

        assert_eq!(lookup.total_size(), 96);
        assert!(lookup.lookup("missing").is_none());
    }

    #[test]
    fn compiles_wgsl_to_spirv_with_defines() {
        for tinted in [true, false] {
            let module = shader_module_with_preprocessor(
                "tintable_test",
                TINTABLE_WGSL,
                &[ShaderDefine::make_bool("TINTED", tinted)],
            )
            .unwrap();
            let spirv = compile_spv(&module).unwrap();
            // SPIR-V magic number
            assert_eq!(spirv[0], 0x0723_0203);
        }
    }
}
