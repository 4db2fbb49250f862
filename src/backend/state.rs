//! Resource state tracking and barrier batching.
//!
//! Every texture carries a [`ResourceStateTracker`] holding the current state
//! of each subresource. Transitions return the [`Barrier`] values needed to
//! reach the requested state instead of recording them anywhere, so the
//! emission logic can be tested without a device. Barriers are collected into
//! a [`BarrierBatch`] and submitted together.

use crate::backend::traits::{BackendResult, ComputeDevice, TextureHandle};
use crate::backend::types::{subresource_index, ResourceState, TextureDescriptor};

/// A single subresource state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Barrier {
    pub texture: TextureHandle,
    /// Flat index, `mip + slice * mip_levels`.
    pub subresource: u32,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Per-subresource state machine for one resource.
#[derive(Debug, Clone)]
pub struct ResourceStateTracker {
    mip_levels: u32,
    array_layers: u32,
    states: Vec<ResourceState>,
}

impl ResourceStateTracker {
    /// Create a tracker with every subresource `Undefined`.
    pub fn new(mip_levels: u32, array_layers: u32) -> Self {
        let mip_levels = mip_levels.max(1);
        let array_layers = array_layers.max(1);
        Self {
            mip_levels,
            array_layers,
            states: vec![ResourceState::Undefined; (mip_levels * array_layers) as usize],
        }
    }

    pub fn for_descriptor(desc: &TextureDescriptor) -> Self {
        Self::new(desc.mip_levels, desc.array_layers())
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    /// Current state of a subresource, `None` when out of range.
    pub fn state(&self, mip: u32, slice: u32) -> Option<ResourceState> {
        if mip >= self.mip_levels || slice >= self.array_layers {
            return None;
        }
        self.states
            .get(subresource_index(mip, slice, self.mip_levels) as usize)
            .copied()
    }

    /// The shared state when every subresource agrees.
    pub fn uniform_state(&self) -> Option<ResourceState> {
        let first = *self.states.first()?;
        self.states.iter().all(|s| *s == first).then_some(first)
    }

    /// Move one subresource to `after`.
    ///
    /// Returns `None` when it is already there, out of range, or when the
    /// destination is `Undefined`.
    pub fn transition_subresource(
        &mut self,
        texture: TextureHandle,
        mip: u32,
        slice: u32,
        after: ResourceState,
    ) -> Option<Barrier> {
        if !after.is_valid_destination() {
            log::warn!("Ignoring transition of {:?} to Undefined", texture);
            return None;
        }
        let before = self.state(mip, slice)?;
        if before == after {
            return None;
        }

        let subresource = subresource_index(mip, slice, self.mip_levels);
        self.states[subresource as usize] = after;
        Some(Barrier {
            texture,
            subresource,
            before,
            after,
        })
    }

    /// Move every slice of one mip to `after`.
    pub fn transition_mip(
        &mut self,
        texture: TextureHandle,
        mip: u32,
        after: ResourceState,
    ) -> Vec<Barrier> {
        (0..self.array_layers)
            .filter_map(|slice| self.transition_subresource(texture, mip, slice, after))
            .collect()
    }

    /// Move the whole resource to `after`.
    pub fn transition_all(&mut self, texture: TextureHandle, after: ResourceState) -> Vec<Barrier> {
        let mut barriers = Vec::new();
        for slice in 0..self.array_layers {
            for mip in 0..self.mip_levels {
                barriers.extend(self.transition_subresource(texture, mip, slice, after));
            }
        }
        barriers
    }
}

/// A batch of barriers to submit together.
#[derive(Debug, Default)]
pub struct BarrierBatch {
    barriers: Vec<Barrier>,
}

impl BarrierBatch {
    /// Create a new empty barrier batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a barrier. Transitions where `before == after` are skipped.
    pub fn add(&mut self, barrier: Barrier) {
        if barrier.before == barrier.after {
            return;
        }
        self.barriers.push(barrier);
    }

    pub fn extend<I: IntoIterator<Item = Barrier>>(&mut self, barriers: I) {
        for barrier in barriers {
            self.add(barrier);
        }
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Get the number of barriers in the batch.
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn barriers(&self) -> &[Barrier] {
        &self.barriers
    }

    /// Submit all barriers and empty the batch.
    ///
    /// Does nothing if the batch is empty.
    pub fn submit(&mut self, device: &mut dyn ComputeDevice) {
        if self.is_empty() {
            return;
        }
        log::trace!("Submitting {} barriers", self.barriers.len());
        device.barrier(&self.barriers);
        self.barriers.clear();
    }
}

/// A device texture together with its tracked subresource states.
#[derive(Debug, Clone)]
pub struct TrackedTexture {
    handle: TextureHandle,
    bindless: u32,
    desc: TextureDescriptor,
    states: ResourceStateTracker,
}

impl TrackedTexture {
    pub fn create(device: &mut dyn ComputeDevice, desc: TextureDescriptor) -> BackendResult<Self> {
        let handle = device.create_texture(&desc)?;
        let bindless = device.bindless_index(handle)?;
        Ok(Self {
            handle,
            bindless,
            states: ResourceStateTracker::for_descriptor(&desc),
            desc,
        })
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    /// Index of this texture in the shader-visible table.
    pub fn bindless(&self) -> u32 {
        self.bindless
    }

    pub fn desc(&self) -> &TextureDescriptor {
        &self.desc
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn states(&self) -> &ResourceStateTracker {
        &self.states
    }

    pub fn transition_to(&mut self, state: ResourceState) -> Vec<Barrier> {
        self.states.transition_all(self.handle, state)
    }

    pub fn transition_mip(&mut self, mip: u32, state: ResourceState) -> Vec<Barrier> {
        self.states.transition_mip(self.handle, mip, state)
    }
}
