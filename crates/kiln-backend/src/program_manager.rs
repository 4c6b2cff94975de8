//! Compiled program cache and dispatch recording.

use kiln_core::{
    DispatchBindings, DispatchGroup, Error, GpuDevice, ProgramInfo, ProgramSignature, Result,
    preprocess_wgsl,
};
use moka::sync::Cache;
use std::sync::Arc;
use tracing::debug;

/// A built program: its resolved descriptor and the device pipeline.
pub struct ProgramArtifact<P> {
    pub program_info: Arc<ProgramInfo>,
    pub pipeline: P,
}

/// Builds compute pipelines and caches them by [`ProgramSignature`].
///
/// The cache is bounded; when full, the least useful entries are evicted
/// and rebuilt on their next use.
pub struct ProgramManager<D: GpuDevice> {
    device: Arc<D>,
    artifacts: Cache<ProgramSignature, Arc<ProgramArtifact<D::Pipeline>>>,
    builds: u64,
}

impl<D: GpuDevice> ProgramManager<D> {
    pub fn new(device: Arc<D>, capacity: u64) -> Self {
        Self {
            device,
            artifacts: Cache::builder().max_capacity(capacity).build(),
            builds: 0,
        }
    }

    pub fn get(&self, signature: &ProgramSignature) -> Option<Arc<ProgramArtifact<D::Pipeline>>> {
        self.artifacts.get(signature)
    }

    pub fn set(&self, signature: ProgramSignature, artifact: Arc<ProgramArtifact<D::Pipeline>>) {
        self.artifacts.insert(signature, artifact);
    }

    /// Compile a program into a pipeline.
    ///
    /// The workgroup size is injected as the `WORKGROUP_SIZE_X`,
    /// `WORKGROUP_SIZE_Y` and `WORKGROUP_SIZE_Z` shader defs.
    pub fn build(&mut self, info: Arc<ProgramInfo>) -> Result<ProgramArtifact<D::Pipeline>> {
        let mut defines = info.shader_defs.clone();
        for (axis, size) in ["X", "Y", "Z"].iter().zip(info.workgroup_size) {
            defines.insert(format!("WORKGROUP_SIZE_{axis}"), size.to_string());
        }

        let wgsl = preprocess_wgsl(info.name(), &info.shader_source, &defines)?;
        let pipeline = self
            .device
            .create_pipeline(info.name(), &wgsl, &info.entry_point)?;

        self.builds += 1;
        debug!(program = info.name(), builds = self.builds, "Built program");

        Ok(ProgramArtifact {
            program_info: info,
            pipeline,
        })
    }

    /// Fit a dispatch into the device's per-dimension workgroup limit.
    ///
    /// Dispatches within the limit are returned unchanged. Otherwise the
    /// total is laid out as a square, then as a cube; shaders must therefore
    /// derive their linear index from all three workgroup coordinates.
    pub fn normalize_dispatch_group_size(&self, groups: DispatchGroup) -> Result<DispatchGroup> {
        let limit = self.device.limits().max_compute_workgroups_per_dimension as u64;
        if groups.x as u64 <= limit && groups.y as u64 <= limit && groups.z as u64 <= limit {
            return Ok(groups);
        }

        let total = groups.total();

        let square = ceil_root(total, 2);
        if square <= limit {
            return Ok(DispatchGroup::new(square as u32, square as u32, 1));
        }

        let cube = ceil_root(total, 3);
        if cube <= limit {
            return Ok(DispatchGroup::new(cube as u32, cube as u32, cube as u32));
        }

        Err(Error::DispatchTooLarge(total))
    }

    /// Record one dispatch of `artifact` into `pass`.
    pub fn run(
        &self,
        pass: &mut D::Pass,
        artifact: &ProgramArtifact<D::Pipeline>,
        inputs: &[D::Buffer],
        outputs: &[Option<D::Buffer>],
        groups: DispatchGroup,
    ) {
        let bindings = DispatchBindings {
            inputs,
            outputs,
            uniforms: &artifact.program_info.uniforms,
        };
        self.device
            .dispatch(pass, &artifact.pipeline, &bindings, groups);
    }

    /// Number of programs built since creation.
    pub fn build_count(&self) -> u64 {
        self.builds
    }

    /// Number of programs currently cached.
    pub fn cached_count(&self) -> u64 {
        self.artifacts.run_pending_tasks();
        self.artifacts.entry_count()
    }

    pub fn clear(&self) {
        self.artifacts.invalidate_all();
    }
}

/// Smallest `r` with `r^n >= value`.
fn ceil_root(value: u64, n: u32) -> u64 {
    let mut root = (value as f64).powf(1.0 / n as f64).ceil() as u64;
    while root > 0 && (root - 1).checked_pow(n).is_some_and(|p| p >= value) {
        root -= 1;
    }
    while root.checked_pow(n).is_some_and(|p| p < value) {
        root += 1;
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use kiln_core::{DataType, DeviceLimits, ProgramMetadata, ProgramOutput};

    const COPY_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> input: array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;

@compute @workgroup_size(#{WORKGROUP_SIZE_X}, #{WORKGROUP_SIZE_Y}, #{WORKGROUP_SIZE_Z})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < arrayLength(&output)) {
        output[gid.x] = input[gid.x];
    }
}
"#;

    fn manager(limit: u32) -> ProgramManager<HeadlessDevice> {
        let limits = DeviceLimits {
            max_compute_workgroups_per_dimension: limit,
            ..DeviceLimits::default()
        };
        ProgramManager::new(Arc::new(HeadlessDevice::new(limits)), 16)
    }

    #[test]
    fn test_ceil_root() {
        assert_eq!(ceil_root(0, 2), 0);
        assert_eq!(ceil_root(1, 2), 1);
        assert_eq!(ceil_root(16, 2), 4);
        assert_eq!(ceil_root(17, 2), 5);
        assert_eq!(ceil_root(27, 3), 3);
        assert_eq!(ceil_root(28, 3), 4);
    }

    #[test]
    fn test_normalize_within_limit_is_unchanged() {
        let programs = manager(100);
        let groups = DispatchGroup::new(100, 3, 1);
        assert_eq!(programs.normalize_dispatch_group_size(groups).unwrap(), groups);
    }

    #[test]
    fn test_normalize_to_square_then_cube() {
        let programs = manager(100);

        let square = programs
            .normalize_dispatch_group_size(DispatchGroup::new(101, 1, 1))
            .unwrap();
        assert_eq!(square, DispatchGroup::new(11, 11, 1));

        let cube = programs
            .normalize_dispatch_group_size(DispatchGroup::new(20_000, 1, 1))
            .unwrap();
        assert_eq!(cube, DispatchGroup::new(28, 28, 28));
        assert!(cube.total() >= 20_000);
    }

    #[test]
    fn test_normalize_too_large() {
        let programs = manager(10);
        let err = programs
            .normalize_dispatch_group_size(DispatchGroup::new(2_000, 1, 1))
            .unwrap_err();
        assert!(matches!(err, Error::DispatchTooLarge(2_000)));
    }

    #[test]
    fn test_build_injects_workgroup_size() {
        let mut programs = manager(65535);
        let info = ProgramInfo::new(
            ProgramMetadata::new("Copy", 1),
            COPY_SHADER,
            vec![ProgramOutput::new(&[4], DataType::F32)],
            |_| Ok(DispatchGroup::new(1, 1, 1)),
        )
        .with_workgroup_size(32, 1, 1);

        let artifact = programs.build(Arc::new(info)).unwrap();
        assert!(artifact.pipeline.wgsl.contains("@workgroup_size(32, 1, 1)"));
        assert_eq!(programs.build_count(), 1);
    }

    #[test]
    fn test_build_reports_shader_errors() {
        let mut programs = manager(65535);
        let info = ProgramInfo::new(
            ProgramMetadata::new("Broken", 0),
            "fn main( {",
            vec![],
            |_| Ok(DispatchGroup::new(1, 1, 1)),
        );

        let err = programs.build(Arc::new(info)).err();
        assert!(matches!(err, Some(Error::ShaderCompilation(_))));
        assert_eq!(programs.build_count(), 0);
    }
}
