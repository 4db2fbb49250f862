//! CPU compute kernels and the named shader library they are built from.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use glam::UVec3;

use super::storage::TextureStorage;
use crate::backend::traits::{BackendError, BackendResult, ComputePipelineDescriptor};

/// A compiled compute shader.
pub trait ComputeKernel: Send + Sync {
    /// Threads per group
    fn group_size(&self) -> [u32; 3];

    /// Run every thread of the dispatch.
    fn execute(&self, ctx: &DispatchContext<'_>) -> BackendResult<()>;
}

/// Everything a kernel can see during one dispatch.
pub struct DispatchContext<'a> {
    pub(crate) label: &'a str,
    pub(crate) textures: &'a [Option<Arc<TextureStorage>>],
    pub(crate) constants: &'a [u8],
    pub(crate) groups: [u32; 3],
    pub(crate) group_size: [u32; 3],
}

impl<'a> DispatchContext<'a> {
    pub fn label(&self) -> &str {
        self.label
    }

    /// Read the constant block at the start of the bound constants.
    pub fn constants<T: Pod>(&self) -> BackendResult<T> {
        self.constants_at(0)
    }

    /// Read a constant block at a byte offset.
    pub fn constants_at<T: Pod>(&self, offset: usize) -> BackendResult<T> {
        let size = std::mem::size_of::<T>();
        let bytes = self
            .constants
            .get(offset..offset + size)
            .ok_or_else(|| self.error(format!("constants too small for {} bytes at {offset}", size)))?;
        bytemuck::try_pod_read_unaligned(bytes).map_err(|e| self.error(e.to_string()))
    }

    /// Read `count` consecutive constant blocks starting at a byte offset.
    pub fn constants_array<T: Pod>(&self, offset: usize, count: usize) -> BackendResult<Vec<T>> {
        let size = std::mem::size_of::<T>();
        (0..count)
            .map(|i| self.constants_at(offset + i * size))
            .collect()
    }

    /// Texture bound at a bindless index.
    pub fn texture(&self, index: u32) -> BackendResult<&'a TextureStorage> {
        self.textures
            .get(index as usize)
            .and_then(|t| t.as_deref())
            .ok_or_else(|| self.error(format!("no texture at bindless index {index}")))
    }

    /// Total thread count along each axis.
    pub fn thread_extent(&self) -> UVec3 {
        UVec3::from(self.groups) * UVec3::from(self.group_size)
    }

    /// Invoke `f` with the global id of every thread, x fastest.
    pub fn for_each_thread<F: FnMut(UVec3)>(&self, mut f: F) {
        let extent = self.thread_extent();
        for z in 0..extent.z {
            for y in 0..extent.y {
                for x in 0..extent.x {
                    f(UVec3::new(x, y, z));
                }
            }
        }
    }

    pub fn error(&self, message: String) -> BackendError {
        BackendError::DispatchFailed(self.label.to_string(), message)
    }
}

/// Builds a kernel for a pipeline descriptor, rejecting unknown defines.
pub type KernelFactory = fn(&ComputePipelineDescriptor) -> BackendResult<Arc<dyn ComputeKernel>>;

/// Named shader sources available to pipelines.
#[derive(Default, Clone)]
pub struct ShaderLibrary {
    shaders: HashMap<String, KernelFactory>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library with every shader the lighting passes use.
    pub fn with_builtin_shaders() -> Self {
        let mut library = Self::new();
        crate::pipeline::register_shaders(&mut library);
        library
    }

    pub fn register(&mut self, name: &str, factory: KernelFactory) {
        self.shaders.insert(name.to_string(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.shaders.contains_key(name)
    }

    pub fn compile(&self, desc: &ComputePipelineDescriptor) -> BackendResult<Arc<dyn ComputeKernel>> {
        let factory = self.shaders.get(&desc.shader).ok_or_else(|| {
            BackendError::ShaderCompilationFailed(format!("unknown shader source '{}'", desc.shader))
        })?;
        factory(desc)
    }
}

/// Fail compilation when `desc` uses a define outside `allowed`.
pub fn check_defines(desc: &ComputePipelineDescriptor, allowed: &[&str]) -> BackendResult<()> {
    match desc.defines.iter().find(|d| !allowed.contains(&d.as_str())) {
        Some(define) => Err(BackendError::ShaderCompilationFailed(format!(
            "{}: unknown define '{}'",
            desc.shader, define
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl ComputeKernel for Noop {
        fn group_size(&self) -> [u32; 3] {
            [4, 2, 1]
        }

        fn execute(&self, _ctx: &DispatchContext<'_>) -> BackendResult<()> {
            Ok(())
        }
    }

    fn noop_factory(desc: &ComputePipelineDescriptor) -> BackendResult<Arc<dyn ComputeKernel>> {
        check_defines(desc, &["FAST"])?;
        Ok(Arc::new(Noop))
    }

    #[test]
    fn test_library_rejects_unknown_shader_and_define() {
        let mut library = ShaderLibrary::new();
        library.register("noop", noop_factory);

        assert!(library.compile(&ComputePipelineDescriptor::new("a", "noop")).is_ok());
        assert!(library
            .compile(&ComputePipelineDescriptor::new("b", "noop").with_define("FAST"))
            .is_ok());
        assert!(matches!(
            library.compile(&ComputePipelineDescriptor::new("c", "noop").with_define("SLOW")),
            Err(BackendError::ShaderCompilationFailed(_))
        ));
        assert!(matches!(
            library.compile(&ComputePipelineDescriptor::new("d", "missing")),
            Err(BackendError::ShaderCompilationFailed(_))
        ));
    }

    #[test]
    fn test_dispatch_context_reads_constants() {
        let data: [u32; 3] = [5, 6, 7];
        let bytes = bytemuck::cast_slice::<u32, u8>(&data);
        let ctx = DispatchContext {
            label: "test",
            textures: &[],
            constants: bytes,
            groups: [2, 1, 1],
            group_size: [4, 2, 1],
        };
        assert_eq!(ctx.constants::<u32>().ok(), Some(5));
        assert_eq!(ctx.constants_array::<u32>(4, 2).ok(), Some(vec![6, 7]));
        assert!(ctx.constants_at::<[u32; 2]>(8).is_err());
        assert!(ctx.texture(0).is_err());

        let mut count = 0;
        ctx.for_each_thread(|_| count += 1);
        assert_eq!(count, 16);
        assert_eq!(ctx.thread_extent(), UVec3::new(8, 2, 1));
    }
}
