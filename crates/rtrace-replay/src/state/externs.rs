//! Engine-native callbacks the state transitions rely on.

use ash::vk;
use rtrace_protocol::command::{CommandId, CommandKind};
use rtrace_protocol::handle::{Handle, HandleKind};
use rtrace_protocol::layout::{
    FormatProperties, MemoryRequirements, PhysicalDeviceMemoryProperties, QueueFamilyProperties,
};
use rtrace_protocol::observation::Observations;
use tracing::{debug, trace, warn};

use super::objects::{MappedRange, SubcommandIndex};
use super::watcher::StateWatcher;
use super::{IssueKind, State};
use crate::alloc::align_up;
use crate::error::Result;
use crate::format;
use crate::observations::ObservationApplier;
use crate::replay_builder::CreatedHandle;

/// Alignment reported for every buffer and image memory requirement.
pub const REQUIREMENT_ALIGNMENT: u64 = 256;

/// Chunk size used when mirroring mapped memory.
const COPY_CHUNK: u64 = 1 << 20;

/// Callbacks available to state transitions while one command mutates.
pub trait Externs {
    fn state(&mut self) -> &mut State;
    fn command_id(&self) -> CommandId;

    fn apply_reads(&mut self) -> Result<()>;
    fn apply_writes(&mut self) -> Result<()>;

    /// Record that a command created `handle`.
    fn register(&mut self, kind: HandleKind, handle: Handle);

    // ── Memory ──────────────────────────────────────────────
    fn map_memory(&mut self, memory: Handle, offset: u64, size: u64, location: u64) -> Result<()>;
    fn unmap_memory(&mut self, memory: Handle) -> Result<()>;
    fn track_mapped_coherent_memory(&mut self, memory: Handle);
    fn untrack_mapped_coherent_memory(&mut self, memory: Handle);
    /// Copy the mapped application bytes of `memory` into its shadow contents.
    fn read_mapped_coherent_memory(&mut self, memory: Handle) -> Result<()>;

    // ── Queries ─────────────────────────────────────────────
    fn fetch_buffer_memory_requirements(&mut self, buffer: Handle) -> Option<MemoryRequirements>;
    fn fetch_image_memory_requirements(&mut self, image: Handle) -> Option<MemoryRequirements>;
    fn fetch_physical_device_memory_properties(&mut self, physical_device: Handle)
        -> Option<PhysicalDeviceMemoryProperties>;
    fn fetch_physical_device_queue_properties(&mut self, physical_device: Handle) -> Vec<QueueFamilyProperties>;
    fn fetch_physical_device_format_properties(&mut self, physical_device: Handle, format: i32)
        -> Option<FormatProperties>;
    fn number_of_pnext(&mut self, p_next: u64) -> u32;
    fn has_dynamic_property(&mut self, pipeline: Handle, dynamic_state: vk::DynamicState) -> bool;

    // ── Markers ─────────────────────────────────────────────
    fn push_debug_marker(&mut self, name: String);
    fn pop_debug_marker(&mut self);
    fn push_render_pass_marker(&mut self, render_pass: Handle);
    fn pop_render_pass_marker(&mut self);

    // ── Subcommands ─────────────────────────────────────────
    fn on_pre_subcommand(&mut self, command_buffer: Handle, index: SubcommandIndex);
    fn on_post_subcommand(&mut self, command_buffer: Handle, index: SubcommandIndex);
    fn on_defer_subcommand(&mut self, queue: Handle, submit_index: usize);
    fn on_pre_process_command(&mut self);
    fn on_command_added(&mut self, command_buffer: Handle, index: usize);
    fn notify_pending_command_added(&mut self, queue: Handle, submit_index: usize);

    // ── Recording ───────────────────────────────────────────
    fn record_fence_signal(&mut self, fence: Handle);
    fn record_acquire(&mut self, swapchain: Handle, image_index: u32);
    fn record_present(&mut self, queue: Handle, swapchain: Handle, image_index: u32);

    // ── Validation ──────────────────────────────────────────
    fn vk_err_invalid_handle(&mut self, kind: HandleKind, handle: Handle);
    fn vk_err_image_layout(&mut self, image: Handle, expected: vk::ImageLayout, actual: vk::ImageLayout);
    fn vk_err_image_subresource(&mut self, image: Handle, reason: String);
    fn vk_err_null_pointer(&mut self, what: &str);
    fn vk_err_non_null_pointer(&mut self, what: &str);
    fn vk_err_unrecognized_extension(&mut self, name: String);
}

/// The engine's [`Externs`], bound to one command for its mutation.
pub struct EngineExterns<'s, 'c, 'w> {
    state: &'s mut State,
    applier: ObservationApplier<'c>,
    observations: &'c Observations,
    id: CommandId,
    kind: CommandKind,
    watcher: Option<&'s mut (dyn StateWatcher + 'w)>,
    created: Vec<CreatedHandle>,
}

impl<'s, 'c, 'w> EngineExterns<'s, 'c, 'w> {
    pub fn new(
        state: &'s mut State,
        id: CommandId,
        kind: CommandKind,
        observations: &'c Observations,
        watcher: Option<&'s mut (dyn StateWatcher + 'w)>,
    ) -> Self {
        Self {
            state,
            applier: ObservationApplier::new(observations),
            observations,
            id,
            kind,
            watcher,
            created: Vec::new(),
        }
    }

    /// Handles created by the command, in creation order.
    pub fn finish(mut self) -> Vec<CreatedHandle> {
        if let Some(w) = self.watcher.as_deref_mut() {
            w.on_end_command(self.id, self.kind);
        }
        self.created
    }

    fn mapped(&self, memory: Handle) -> Option<MappedRange> {
        self.state.device_memories.get(&memory).and_then(|m| m.mapped)
    }
}

impl Externs for EngineExterns<'_, '_, '_> {
    fn state(&mut self) -> &mut State {
        self.state
    }

    fn command_id(&self) -> CommandId {
        self.id
    }

    fn apply_reads(&mut self) -> Result<()> {
        if self.applier.reads_applied() {
            return Ok(());
        }
        let state = &mut *self.state;
        self.applier.apply_reads(&mut state.memory, &state.store)?;
        if let Some(w) = self.watcher.as_deref_mut() {
            for o in &self.observations.reads {
                w.on_memory_read(self.id, o.range);
            }
        }
        Ok(())
    }

    fn apply_writes(&mut self) -> Result<()> {
        if self.applier.writes_applied() {
            return Ok(());
        }
        let state = &mut *self.state;
        self.applier.apply_writes(&mut state.memory, &state.store)?;
        if let Some(w) = self.watcher.as_deref_mut() {
            for o in &self.observations.writes {
                w.on_memory_write(self.id, o.range);
            }
        }
        Ok(())
    }

    fn register(&mut self, kind: HandleKind, handle: Handle) {
        trace!("{} created {} {}", self.id, kind, handle);
        self.created.push(CreatedHandle { kind, handle });
    }

    // ── Memory ──────────────────────────────────────────────

    fn map_memory(&mut self, memory: Handle, offset: u64, size: u64, location: u64) -> Result<()> {
        let mem = self.state.device_memory_mut(memory)?;
        let size = if size == vk::WHOLE_SIZE {
            mem.size.saturating_sub(offset)
        } else {
            size
        };
        mem.mapped = Some(MappedRange { offset, size, location });
        let coherent = mem.coherent;

        // The application sees the current contents through the mapping.
        let mut done = 0;
        while done < size {
            let chunk = COPY_CHUNK.min(size - done);
            let mem = self.state.device_memory(memory)?;
            let bytes = mem.contents.read_vec(offset + done, chunk);
            self.state.memory.write(location + done, &bytes);
            done += chunk;
        }

        if coherent {
            self.track_mapped_coherent_memory(memory);
        }
        Ok(())
    }

    fn unmap_memory(&mut self, memory: Handle) -> Result<()> {
        if self.state.device_memory(memory)?.coherent {
            self.read_mapped_coherent_memory(memory)?;
            self.untrack_mapped_coherent_memory(memory);
        }
        self.state.device_memory_mut(memory)?.mapped = None;
        Ok(())
    }

    fn track_mapped_coherent_memory(&mut self, memory: Handle) {
        if !self.state.coherent_memories.contains(&memory) {
            self.state.coherent_memories.push(memory);
        }
    }

    fn untrack_mapped_coherent_memory(&mut self, memory: Handle) {
        self.state.coherent_memories.retain(|m| *m != memory);
    }

    fn read_mapped_coherent_memory(&mut self, memory: Handle) -> Result<()> {
        let Some(range) = self.mapped(memory) else {
            return Ok(());
        };
        let mut done = 0;
        while done < range.size {
            let chunk = COPY_CHUNK.min(range.size - done);
            let bytes = self.state.memory.read_vec(range.location + done, chunk);
            self.state
                .device_memory_mut(memory)?
                .contents
                .write(range.offset + done, &bytes);
            done += chunk;
        }
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────

    fn fetch_buffer_memory_requirements(&mut self, buffer: Handle) -> Option<MemoryRequirements> {
        let buf = self.state.buffers.get(&buffer)?;
        Some(MemoryRequirements {
            size: align_up(buf.size, REQUIREMENT_ALIGNMENT),
            alignment: REQUIREMENT_ALIGNMENT,
            memory_type_bits: self.memory_type_bits(buf.device),
            _pad0: 0,
        })
    }

    fn fetch_image_memory_requirements(&mut self, image: Handle) -> Option<MemoryRequirements> {
        let img = self.state.images.get(&image)?;
        let info = img.info;
        let size = format::image_size(info.format, info.extent, info.mip_levels, info.array_layers)?;
        Some(MemoryRequirements {
            size: align_up(size * u64::from(info.samples.max(1)), REQUIREMENT_ALIGNMENT),
            alignment: REQUIREMENT_ALIGNMENT,
            memory_type_bits: self.memory_type_bits(img.device),
            _pad0: 0,
        })
    }

    fn fetch_physical_device_memory_properties(
        &mut self,
        physical_device: Handle,
    ) -> Option<PhysicalDeviceMemoryProperties> {
        self.state.physical_devices.get(&physical_device)?.memory_properties
    }

    fn fetch_physical_device_queue_properties(&mut self, physical_device: Handle) -> Vec<QueueFamilyProperties> {
        self.state
            .physical_devices
            .get(&physical_device)
            .map(|p| p.queue_families.clone())
            .unwrap_or_default()
    }

    fn fetch_physical_device_format_properties(
        &mut self,
        physical_device: Handle,
        format: i32,
    ) -> Option<FormatProperties> {
        self.state
            .physical_devices
            .get(&physical_device)?
            .format_properties
            .iter()
            .find(|(f, _)| *f == format)
            .map(|(_, p)| *p)
    }

    fn number_of_pnext(&mut self, p_next: u64) -> u32 {
        self.state.pnext_chain(p_next).len() as u32
    }

    fn has_dynamic_property(&mut self, pipeline: Handle, dynamic_state: vk::DynamicState) -> bool {
        self.state
            .pipelines
            .get(&pipeline)
            .is_some_and(|p| p.dynamic_states.contains(&dynamic_state.as_raw()))
    }

    // ── Markers ─────────────────────────────────────────────

    fn push_debug_marker(&mut self, name: String) {
        trace!("debug marker push {:?}", name);
        self.state.debug_markers.push(name);
    }

    fn pop_debug_marker(&mut self) {
        if self.state.debug_markers.pop().is_none() {
            warn!("{}: debug marker end without begin", self.id);
        }
    }

    fn push_render_pass_marker(&mut self, render_pass: Handle) {
        self.state.render_pass_markers.push(render_pass);
    }

    fn pop_render_pass_marker(&mut self) {
        if self.state.render_pass_markers.pop().is_none() {
            warn!("{}: render pass end without begin", self.id);
        }
    }

    // ── Subcommands ─────────────────────────────────────────

    fn on_pre_subcommand(&mut self, command_buffer: Handle, index: SubcommandIndex) {
        if let Some(w) = self.watcher.as_deref_mut() {
            w.on_subcommand(self.id, command_buffer, index);
        }
    }

    fn on_post_subcommand(&mut self, command_buffer: Handle, index: SubcommandIndex) {
        trace!("{}: finished {:?} of {}", self.id, index, command_buffer);
    }

    fn on_defer_subcommand(&mut self, queue: Handle, submit_index: usize) {
        debug!("{}: deferring submit {} on queue {} until its semaphores signal", self.id, submit_index, queue);
    }

    fn on_pre_process_command(&mut self) {
        if let Some(w) = self.watcher.as_deref_mut() {
            w.on_begin_command(self.id, self.kind);
        }
    }

    fn on_command_added(&mut self, command_buffer: Handle, index: usize) {
        trace!("{}: recorded command {} into {}", self.id, index, command_buffer);
    }

    fn notify_pending_command_added(&mut self, queue: Handle, submit_index: usize) {
        debug!("{}: running deferred submit {} on queue {}", self.id, submit_index, queue);
    }

    // ── Recording ───────────────────────────────────────────

    fn record_fence_signal(&mut self, fence: Handle) {
        if fence.is_null() {
            return;
        }
        match self.state.fences.get_mut(&fence) {
            Some(f) => f.signaled = true,
            None => self.vk_err_invalid_handle(HandleKind::Fence, fence),
        }
    }

    fn record_acquire(&mut self, swapchain: Handle, image_index: u32) {
        match self.state.swapchains.get_mut(&swapchain) {
            Some(s) => s.acquired = Some(image_index),
            None => self.vk_err_invalid_handle(HandleKind::Swapchain, swapchain),
        }
    }

    fn record_present(&mut self, queue: Handle, swapchain: Handle, image_index: u32) {
        debug!("present image {} of {} on queue {}", image_index, swapchain, queue);
        match self.state.swapchains.get_mut(&swapchain) {
            Some(s) => s.acquired = None,
            None => self.vk_err_invalid_handle(HandleKind::Swapchain, swapchain),
        }
    }

    // ── Validation ──────────────────────────────────────────

    fn vk_err_invalid_handle(&mut self, kind: HandleKind, handle: Handle) {
        // Rebuilt objects may reference ones recreated later in the same pass.
        if self.state.is_recreating() {
            debug!("{}: {} {} not yet recreated", self.id, kind, handle);
            return;
        }
        warn!("{}: invalid {} {}", self.id, kind, handle);
        self.state.report(self.id, IssueKind::InvalidHandle { kind, handle });
    }

    fn vk_err_image_layout(&mut self, image: Handle, expected: vk::ImageLayout, actual: vk::ImageLayout) {
        warn!("{}: image {} is in {:?}, barrier expects {:?}", self.id, image, actual, expected);
        self.state.report(self.id, IssueKind::ImageLayout { image, expected, actual });
    }

    fn vk_err_image_subresource(&mut self, image: Handle, reason: String) {
        warn!("{}: image {} subresource: {}", self.id, image, reason);
        self.state.report(self.id, IssueKind::ImageSubresource { image, reason });
    }

    fn vk_err_null_pointer(&mut self, what: &str) {
        warn!("{}: {} must not be null", self.id, what);
        self.state.report(self.id, IssueKind::NullPointer { what: what.to_string() });
    }

    fn vk_err_non_null_pointer(&mut self, what: &str) {
        warn!("{}: {} must be null", self.id, what);
        self.state.report(self.id, IssueKind::NonNullPointer { what: what.to_string() });
    }

    fn vk_err_unrecognized_extension(&mut self, name: String) {
        warn!("{}: unrecognized extension {}", self.id, name);
        self.state.report(self.id, IssueKind::UnrecognizedExtension { name });
    }
}

impl EngineExterns<'_, '_, '_> {
    fn memory_type_bits(&self, device: Handle) -> u32 {
        let count = self
            .state
            .devices
            .get(&device)
            .and_then(|d| self.state.physical_devices.get(&d.physical_device))
            .and_then(|p| p.memory_properties)
            .map(|m| m.memory_type_count.min(32))
            .unwrap_or(32);
        if count >= 32 {
            u32::MAX
        } else {
            (1u32 << count) - 1
        }
    }
}
