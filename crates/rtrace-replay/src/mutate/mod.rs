//! The command mutation engine.
//!
//! Every command either runs the default transition, or goes through a
//! handler that rewrites it into one or more replacement commands first.
//! Replacements carry a copy of the original's extras; any memory a handler
//! patches is re-observed after the cloned reads so the patch wins.

pub mod barrier;
pub mod instance;
pub mod memory;
pub mod recreate;
pub mod submit;
pub mod swapchain;
pub mod wait;

use rtrace_protocol::command::{Command, CommandId, CommandKind};
use tracing::trace;

use crate::error::Result;
use crate::observations;
use crate::primer::ImagePrimer;
use crate::replay_builder::ReplayBuilder;
use crate::state::{transitions, EngineExterns, State, StateWatcher};
use crate::transform::Writer;

pub use barrier::rewrite_external_barriers;
pub use submit::SubmitRewriter;
pub use swapchain::inject_virtual_swapchain;

type Handler = fn(&mut Mutator<'_>, CommandId, &Command) -> Result<()>;

/// Mutates commands against one session's shadow state, optionally
/// appending the surviving commands to a replay builder.
pub struct Mutator<'a> {
    pub state: &'a mut State,
    builder: Option<&'a mut dyn ReplayBuilder>,
    primer: Option<&'a mut ImagePrimer>,
    watcher: Option<&'a mut dyn StateWatcher>,
}

impl<'a> Mutator<'a> {
    /// State tracking only; nothing is emitted.
    pub fn new(state: &'a mut State) -> Self {
        Self { state, builder: None, primer: None, watcher: None }
    }

    pub fn with_builder(mut self, builder: &'a mut dyn ReplayBuilder) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_primer(mut self, primer: &'a mut ImagePrimer) -> Self {
        self.primer = Some(primer);
        self
    }

    pub fn with_watcher(mut self, watcher: &'a mut dyn StateWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn has_builder(&self) -> bool {
        self.builder.is_some()
    }

    /// Mutate `cmd`, dispatching to its handler when it has one.
    pub fn mutate(&mut self, id: CommandId, cmd: &Command) -> Result<()> {
        trace!("mutate {} {}", id, cmd.kind());
        match handler(cmd.kind()) {
            Some(h) => h(self, id, cmd),
            None => self.default_mutate(id, cmd),
        }
    }

    /// Run the default transition of `cmd`, then append it to the builder.
    /// Nothing is appended if the transition fails.
    pub fn default_mutate(&mut self, id: CommandId, cmd: &Command) -> Result<()> {
        let mut ext = EngineExterns::new(
            &mut *self.state,
            id,
            cmd.kind(),
            cmd.observations(),
            self.watcher.as_deref_mut(),
        );
        let applied = transitions::apply(&mut ext, cmd);
        let created = ext.finish();
        applied?;
        if let Some(builder) = self.builder.as_deref_mut() {
            builder.append(id, cmd, &created)?;
        }
        Ok(())
    }

    /// Apply the read observations of `cmd` ahead of a hijack that inspects
    /// or patches the memory they cover.
    pub fn apply_reads(&mut self, cmd: &Command) -> Result<()> {
        observations::apply(&cmd.observations().reads, &mut self.state.memory, &self.state.store)
    }

    /// Apply the write observations of `cmd` ahead of its replay call.
    pub fn apply_writes(&mut self, cmd: &Command) -> Result<()> {
        observations::apply(&cmd.observations().writes, &mut self.state.memory, &self.state.store)
    }

    /// Run `f` with the shadow state marked as being rebuilt.
    pub fn recreating<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.state.enter_recreate();
        let result = f(self);
        self.state.exit_recreate();
        result
    }

    pub(crate) fn take_primer(&mut self) -> Option<&'a mut ImagePrimer> {
        self.primer.take()
    }

    pub(crate) fn restore_primer(&mut self, primer: Option<&'a mut ImagePrimer>) {
        self.primer = primer;
    }
}

impl Writer for Mutator<'_> {
    fn state(&mut self) -> &mut State {
        self.state
    }

    fn write(&mut self, id: CommandId, cmd: &Command) -> Result<()> {
        self.mutate(id, cmd)
    }

    fn builder(&mut self) -> Option<&mut dyn ReplayBuilder> {
        match self.builder.as_deref_mut() {
            Some(b) => Some(b),
            None => None,
        }
    }
}

fn handler(kind: CommandKind) -> Option<Handler> {
    match kind {
        CommandKind::CreateInstance => Some(instance::create_instance),
        CommandKind::DestroyInstance => Some(instance::destroy_instance),
        CommandKind::CreateDevice => Some(instance::create_device),
        CommandKind::DestroyDevice => Some(instance::destroy_device),
        CommandKind::CreateSurfaceKhr => Some(swapchain::create_surface),
        CommandKind::CreateSwapchainKhr => Some(swapchain::create_swapchain),
        CommandKind::AcquireNextImageKhr => Some(swapchain::acquire_next_image),
        CommandKind::AllocateMemory => Some(memory::allocate_memory),
        CommandKind::CmdPipelineBarrier => Some(barrier::pipeline_barrier),
        CommandKind::QueueSubmit => Some(submit::queue_submit),
        CommandKind::WaitForFences => Some(wait::wait_for_fences),
        CommandKind::WaitSemaphores => Some(wait::wait_semaphores),
        CommandKind::GetFenceStatus => Some(wait::get_fence_status),
        CommandKind::RecreateInstance => Some(recreate::recreate_instance),
        CommandKind::RecreatePhysicalDevices
        | CommandKind::RecreateQueue
        | CommandKind::RecreateDeviceMemory => Some(recreate::recreate_plain),
        CommandKind::RecreateDevice => Some(recreate::recreate_device),
        CommandKind::RecreateBuffer => Some(recreate::recreate_buffer),
        CommandKind::RecreateImage => Some(recreate::recreate_image),
        CommandKind::RecreateSemaphore => Some(recreate::recreate_semaphore),
        CommandKind::RecreateFence => Some(recreate::recreate_fence),
        CommandKind::RecreateSwapchain => Some(recreate::recreate_swapchain),

        CommandKind::EnumeratePhysicalDevices
        | CommandKind::GetPhysicalDeviceQueueFamilyProperties
        | CommandKind::GetPhysicalDeviceMemoryProperties
        | CommandKind::GetPhysicalDeviceFormatProperties
        | CommandKind::GetDeviceQueue
        | CommandKind::DeviceWaitIdle
        | CommandKind::QueueWaitIdle
        | CommandKind::QueueBindSparse
        | CommandKind::DestroySurfaceKhr
        | CommandKind::DestroySwapchainKhr
        | CommandKind::GetSwapchainImagesKhr
        | CommandKind::QueuePresentKhr
        | CommandKind::FreeMemory
        | CommandKind::MapMemory
        | CommandKind::UnmapMemory
        | CommandKind::FlushMappedMemoryRanges
        | CommandKind::CreateBuffer
        | CommandKind::DestroyBuffer
        | CommandKind::BindBufferMemory
        | CommandKind::CreateImage
        | CommandKind::DestroyImage
        | CommandKind::BindImageMemory
        | CommandKind::CreateImageView
        | CommandKind::DestroyImageView
        | CommandKind::CreateSampler
        | CommandKind::DestroySampler
        | CommandKind::CreateRenderPass
        | CommandKind::DestroyRenderPass
        | CommandKind::CreateFramebuffer
        | CommandKind::DestroyFramebuffer
        | CommandKind::CreateSemaphore
        | CommandKind::DestroySemaphore
        | CommandKind::CreateFence
        | CommandKind::DestroyFence
        | CommandKind::ResetFences
        | CommandKind::CreateCommandPool
        | CommandKind::DestroyCommandPool
        | CommandKind::AllocateCommandBuffers
        | CommandKind::FreeCommandBuffers
        | CommandKind::BeginCommandBuffer
        | CommandKind::EndCommandBuffer
        | CommandKind::CmdCopyBuffer
        | CommandKind::CmdCopyBufferToImage
        | CommandKind::CmdCopyImageToBuffer
        | CommandKind::CmdBlitImage
        | CommandKind::CmdBeginRenderPass
        | CommandKind::CmdEndRenderPass
        | CommandKind::CmdDraw
        | CommandKind::CmdBindPipeline
        | CommandKind::CmdBindDescriptorSets
        | CommandKind::CmdDispatch
        | CommandKind::CmdDebugMarkerBeginExt
        | CommandKind::CmdDebugMarkerEndExt
        | CommandKind::CreateDescriptorSetLayout
        | CommandKind::DestroyDescriptorSetLayout
        | CommandKind::CreateDescriptorPool
        | CommandKind::DestroyDescriptorPool
        | CommandKind::AllocateDescriptorSets
        | CommandKind::FreeDescriptorSets
        | CommandKind::UpdateDescriptorSets
        | CommandKind::CreateShaderModule
        | CommandKind::DestroyShaderModule
        | CommandKind::CreatePipelineLayout
        | CommandKind::DestroyPipelineLayout
        | CommandKind::CreateComputePipelines
        | CommandKind::DestroyPipeline
        | CommandKind::ReplayCreateVkInstance
        | CommandKind::ReplayCreateVkDevice
        | CommandKind::ReplayRegisterVkInstance
        | CommandKind::ReplayUnregisterVkInstance
        | CommandKind::ReplayRegisterVkDevice
        | CommandKind::ReplayUnregisterVkDevice
        | CommandKind::ReplayAllocateImageMemory
        | CommandKind::ReplayWaitForFences
        | CommandKind::ReplayWaitSemaphores
        | CommandKind::ReplayGetFenceStatus => None,
    }
}
