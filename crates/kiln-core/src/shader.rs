//! WGSL preprocessing.
//!
//! Shader sources use `naga_oil` directives (`#ifdef`, `#{NAME}`). Before a
//! pipeline is created the source is preprocessed with the program's shader
//! defs, validated with `naga`, and written back out as plain WGSL.

use crate::{Error, Result};
use naga_oil::compose::{Composer, NagaModuleDescriptor, ShaderDefValue};
use std::collections::HashMap;

/// Preprocess and validate a WGSL source, returning plain WGSL.
pub fn preprocess_wgsl(
    label: &str,
    source: &str,
    defines: &HashMap<String, String>,
) -> Result<String> {
    tracing::trace!(label, defines = defines.len(), "Preprocessing WGSL");
    let mut composer = Composer::default();

    let shader_defs: HashMap<String, ShaderDefValue> = defines
        .iter()
        .map(|(k, v)| (k.clone(), parse_shader_def(v)))
        .collect();

    let module = composer
        .make_naga_module(NagaModuleDescriptor {
            source,
            file_path: label,
            shader_defs,
            ..Default::default()
        })
        .map_err(|e| {
            Error::ShaderCompilation(format!("Shader compilation failed for '{label}': {e}"))
        })?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| Error::ShaderCompilation(format!("Shader validation failed for '{label}': {e}")))?;

    naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
        .map_err(|e| Error::ShaderCompilation(format!("WGSL output failed for '{label}': {e}")))
}

fn parse_shader_def(value: &str) -> ShaderDefValue {
    if let Ok(int_val) = value.parse::<i32>() {
        ShaderDefValue::Int(int_val)
    } else if let Ok(uint_val) = value.parse::<u32>() {
        ShaderDefValue::UInt(uint_val)
    } else {
        ShaderDefValue::Bool(value == "true")
    }
}
