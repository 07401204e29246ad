use crate::kernel::{HeightKernel, KernelId, VolumeKernel};

use super::shaders;

/// How a kernel reads one of its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Access {
    Uniform,
    Read,
    ReadWrite,
}

/// Buffers of each kernel in binding order, all in group 0.
pub(super) fn bindings(kernel: KernelId) -> &'static [Access] {
    use Access::*;
    match kernel {
        KernelId::Height(HeightKernel::Init) => &[Uniform, ReadWrite, ReadWrite],
        KernelId::Height(HeightKernel::Accumulate) => &[Uniform, Uniform, Read, ReadWrite],
        KernelId::Height(HeightKernel::Apply) => &[Uniform, ReadWrite, ReadWrite],
        KernelId::Volume(VolumeKernel::Clear) => &[Uniform, ReadWrite],
        KernelId::Volume(VolumeKernel::Scan) => &[Uniform, Uniform, Read, Uniform, ReadWrite],
        KernelId::Volume(VolumeKernel::Raycast) => &[Uniform, Uniform, Read, ReadWrite],
    }
}

pub(super) struct KernelPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub layout: wgpu::BindGroupLayout,
}

impl KernelPipeline {
    fn new(device: &wgpu::Device, kernel: KernelId) -> Self {
        let name = kernel.name();
        let entries: Vec<_> = bindings(kernel)
            .iter()
            .enumerate()
            .map(|(binding, access)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match access {
                        Access::Uniform => wgpu::BufferBindingType::Uniform,
                        Access::Read => wgpu::BufferBindingType::Storage { read_only: true },
                        Access::ReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(name),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(name),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(shaders::source(kernel).into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(name),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        Self { pipeline, layout }
    }
}

/// One compiled pipeline per mapper kernel.
pub(super) struct KernelPipelines {
    init: KernelPipeline,
    accumulate: KernelPipeline,
    apply: KernelPipeline,
    clear: KernelPipeline,
    scan: KernelPipeline,
    raycast: KernelPipeline,
}

impl KernelPipelines {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            init: KernelPipeline::new(device, HeightKernel::Init.into()),
            accumulate: KernelPipeline::new(device, HeightKernel::Accumulate.into()),
            apply: KernelPipeline::new(device, HeightKernel::Apply.into()),
            clear: KernelPipeline::new(device, VolumeKernel::Clear.into()),
            scan: KernelPipeline::new(device, VolumeKernel::Scan.into()),
            raycast: KernelPipeline::new(device, VolumeKernel::Raycast.into()),
        }
    }

    pub fn get(&self, kernel: KernelId) -> &KernelPipeline {
        match kernel {
            KernelId::Height(HeightKernel::Init) => &self.init,
            KernelId::Height(HeightKernel::Accumulate) => &self.accumulate,
            KernelId::Height(HeightKernel::Apply) => &self.apply,
            KernelId::Volume(VolumeKernel::Clear) => &self.clear,
            KernelId::Volume(VolumeKernel::Scan) => &self.scan,
            KernelId::Volume(VolumeKernel::Raycast) => &self.raycast,
        }
    }
}
