//! Default per-command effect on the shadow state.
//!
//! Every transition follows the same order: apply read observations, decode
//! inputs, apply write observations, decode outputs, then register or
//! unregister objects. Objects referenced before they exist are reported
//! through the externs, except while rebuilding state.

use ash::vk;
use rtrace_protocol::command::{Command, CommandArgs, SurfacePlatform};
use rtrace_protocol::handle::{Handle, HandleKind};
use rtrace_protocol::layout::*;
use tracing::{debug, warn};

use super::externs::Externs;
use super::objects::*;
use super::State;
use crate::error::{ReplayError, Result};
use crate::format;

/// Run the default mutation of `cmd` against the shadow state.
pub fn apply(ext: &mut dyn Externs, cmd: &Command) -> Result<()> {
    ext.on_pre_process_command();
    let ok = cmd.result.map_or(true, |r| r >= 0);

    match &cmd.args {
        // ── Instance / physical device ──────────────────────
        CommandArgs::CreateInstance { p_create_info, p_instance, .. }
        | CommandArgs::ReplayCreateVkInstance { p_create_info, p_instance, .. }
        | CommandArgs::RecreateInstance { p_create_info, p_instance } => {
            create_instance(ext, ok, *p_create_info, *p_instance)
        }
        CommandArgs::DestroyInstance { instance, .. } => {
            ext.apply_reads()?;
            destroy_instance(ext, *instance);
            ext.apply_writes()
        }
        CommandArgs::EnumeratePhysicalDevices { instance, p_count, p_physical_devices }
        | CommandArgs::RecreatePhysicalDevices { instance, p_count, p_physical_devices } => {
            enumerate_physical_devices(ext, ok, *instance, *p_count, *p_physical_devices)
        }
        CommandArgs::GetPhysicalDeviceQueueFamilyProperties { physical_device, p_count, p_properties } => {
            ext.apply_reads()?;
            ext.apply_writes()?;
            if *p_properties != 0 {
                let state = ext.state();
                let count: u32 = state.memory.read_pod(*p_count);
                let props = state.memory.read_slice::<QueueFamilyProperties>(*p_properties, count as usize);
                match state.physical_devices.get_mut(physical_device) {
                    Some(pd) => pd.queue_families = props,
                    None => ext.vk_err_invalid_handle(HandleKind::PhysicalDevice, *physical_device),
                }
            }
            Ok(())
        }
        CommandArgs::GetPhysicalDeviceMemoryProperties { physical_device, p_properties } => {
            ext.apply_reads()?;
            ext.apply_writes()?;
            let state = ext.state();
            let props: PhysicalDeviceMemoryProperties = state.memory.read_pod(*p_properties);
            match state.physical_devices.get_mut(physical_device) {
                Some(pd) => pd.memory_properties = Some(props),
                None => ext.vk_err_invalid_handle(HandleKind::PhysicalDevice, *physical_device),
            }
            Ok(())
        }
        CommandArgs::GetPhysicalDeviceFormatProperties { physical_device, format, p_properties } => {
            ext.apply_reads()?;
            ext.apply_writes()?;
            let state = ext.state();
            let props: FormatProperties = state.memory.read_pod(*p_properties);
            match state.physical_devices.get_mut(physical_device) {
                Some(pd) => {
                    pd.format_properties.retain(|(f, _)| f != format);
                    pd.format_properties.push((*format, props));
                }
                None => ext.vk_err_invalid_handle(HandleKind::PhysicalDevice, *physical_device),
            }
            Ok(())
        }

        // ── Device / queue ──────────────────────────────────
        CommandArgs::CreateDevice { physical_device, p_create_info, p_device, .. }
        | CommandArgs::ReplayCreateVkDevice { physical_device, p_create_info, p_device, .. }
        | CommandArgs::RecreateDevice { physical_device, p_create_info, p_device } => {
            create_device(ext, ok, *physical_device, *p_create_info, *p_device)
        }
        CommandArgs::DestroyDevice { device, .. } => {
            ext.apply_reads()?;
            let state = ext.state();
            if state.devices.remove(device).is_some() {
                state.queues.retain(|_, q| q.device != *device);
            } else if !device.is_null() {
                ext.vk_err_invalid_handle(HandleKind::Device, *device);
            }
            ext.apply_writes()
        }
        CommandArgs::GetDeviceQueue { device, queue_family_index, queue_index, p_queue }
        | CommandArgs::RecreateQueue { device, queue_family_index, queue_index, p_queue } => {
            get_device_queue(ext, *device, *queue_family_index, *queue_index, *p_queue)
        }
        CommandArgs::DeviceWaitIdle { .. } => {
            ext.apply_reads()?;
            ext.apply_writes()
        }
        CommandArgs::QueueWaitIdle { queue } => {
            ext.apply_reads()?;
            let pending = ext.state().queues.get(queue).map_or(0, |q| q.pending.len());
            if pending > 0 {
                warn!("wait idle on queue {} with {} deferred submits", queue, pending);
            }
            ext.apply_writes()
        }
        CommandArgs::QueueSubmit { queue, submit_count, p_submits, fence } => {
            queue_submit(ext, *queue, *submit_count, *p_submits, *fence)
        }
        CommandArgs::QueueBindSparse { queue, bind_info_count, p_bind_info, fence } => {
            queue_bind_sparse(ext, *queue, *bind_info_count, *p_bind_info, *fence)
        }

        // ── Surfaces / swapchains ───────────────────────────
        CommandArgs::CreateSurfaceKhr { platform, instance, p_create_info, p_surface, .. } => {
            create_surface(ext, ok, *platform, *instance, *p_create_info, *p_surface)
        }
        CommandArgs::DestroySurfaceKhr { surface, .. } => {
            ext.apply_reads()?;
            if ext.state().surfaces.remove(surface).is_none() && !surface.is_null() {
                ext.vk_err_invalid_handle(HandleKind::Surface, *surface);
            }
            ext.apply_writes()
        }
        CommandArgs::CreateSwapchainKhr { device, p_create_info, p_swapchain, .. } => {
            create_swapchain(ext, ok, *device, *p_create_info, *p_swapchain, None)
        }
        CommandArgs::RecreateSwapchain { device, p_create_info, p_image_count, p_images, p_swapchain } => {
            create_swapchain(ext, ok, *device, *p_create_info, *p_swapchain, Some((*p_image_count, *p_images)))
        }
        CommandArgs::DestroySwapchainKhr { swapchain, .. } => {
            ext.apply_reads()?;
            let state = ext.state();
            match state.swapchains.remove(swapchain) {
                Some(s) => {
                    for image in s.images {
                        state.images.remove(&image);
                    }
                }
                None if !swapchain.is_null() => ext.vk_err_invalid_handle(HandleKind::Swapchain, *swapchain),
                None => {}
            }
            ext.apply_writes()
        }
        CommandArgs::GetSwapchainImagesKhr { swapchain, p_count, p_images, .. } => {
            ext.apply_reads()?;
            ext.apply_writes()?;
            if *p_images != 0 {
                let count: u32 = ext.state().memory.read_pod(*p_count);
                register_swapchain_images(ext, *swapchain, *p_images, count)?;
            }
            Ok(())
        }
        CommandArgs::AcquireNextImageKhr { swapchain, semaphore, fence, p_image_index, .. } => {
            ext.apply_reads()?;
            ext.apply_writes()?;
            let index: u32 = ext.state().memory.read_pod(*p_image_index);
            if !semaphore.is_null() {
                signal_semaphore(ext, *semaphore);
            }
            if !fence.is_null() {
                ext.record_fence_signal(*fence);
            }
            ext.record_acquire(*swapchain, index);
            Ok(())
        }
        CommandArgs::QueuePresentKhr { queue, p_present_info } => queue_present(ext, *queue, *p_present_info),

        // ── Memory ──────────────────────────────────────────
        CommandArgs::AllocateMemory { device, p_allocate_info, p_memory, .. } => {
            allocate_memory(ext, ok, *device, *p_allocate_info, *p_memory).map(|_| ())
        }
        CommandArgs::RecreateDeviceMemory {
            device,
            p_allocate_info,
            mapped_offset,
            mapped_size,
            mapped_location,
            p_memory,
        } => {
            if let Some(memory) = allocate_memory(ext, ok, *device, *p_allocate_info, *p_memory)? {
                if *mapped_size != 0 {
                    ext.map_memory(memory, *mapped_offset, *mapped_size, *mapped_location)?;
                }
            }
            Ok(())
        }
        CommandArgs::ReplayAllocateImageMemory { device, p_memory_properties, image, p_memory } => {
            replay_allocate_image_memory(ext, *device, *p_memory_properties, *image, *p_memory)
        }
        CommandArgs::FreeMemory { memory, .. } => {
            ext.apply_reads()?;
            if ext.state().device_memories.contains_key(memory) {
                ext.untrack_mapped_coherent_memory(*memory);
                ext.state().device_memories.remove(memory);
            } else if !memory.is_null() {
                ext.vk_err_invalid_handle(HandleKind::DeviceMemory, *memory);
            }
            ext.apply_writes()
        }
        CommandArgs::MapMemory { memory, offset, size, pp_data, .. } => {
            ext.apply_reads()?;
            ext.apply_writes()?;
            if !ok {
                return Ok(());
            }
            if *pp_data == 0 {
                ext.vk_err_null_pointer("ppData");
                return Ok(());
            }
            let location = ext.state().memory.read_u64(*pp_data);
            if !ext.state().device_memories.contains_key(memory) {
                ext.vk_err_invalid_handle(HandleKind::DeviceMemory, *memory);
                return Ok(());
            }
            ext.map_memory(*memory, *offset, *size, location)
        }
        CommandArgs::UnmapMemory { memory, .. } => {
            ext.apply_reads()?;
            if ext.state().device_memories.contains_key(memory) {
                ext.unmap_memory(*memory)?;
            } else {
                ext.vk_err_invalid_handle(HandleKind::DeviceMemory, *memory);
            }
            ext.apply_writes()
        }
        CommandArgs::FlushMappedMemoryRanges { range_count, p_ranges, .. } => {
            ext.apply_reads()?;
            flush_mapped_ranges(ext, *range_count, *p_ranges)?;
            ext.apply_writes()
        }

        // ── Buffers / images ────────────────────────────────
        CommandArgs::CreateBuffer { device, p_create_info, p_buffer, .. } => {
            create_buffer(ext, ok, *device, *p_create_info, *p_buffer).map(|_| ())
        }
        CommandArgs::RecreateBuffer { device, p_create_info, memory, memory_offset, p_data, p_buffer, .. } => {
            if let Some(buffer) = create_buffer(ext, ok, *device, *p_create_info, *p_buffer)? {
                if !memory.is_null() {
                    bind_buffer(ext, buffer, *memory, *memory_offset)?;
                    if *p_data != 0 {
                        let size = ext.state().buffer(buffer)?.size;
                        let data = ext.state().memory.read_vec(*p_data, size);
                        if let Some(mem) = ext.state().device_memories.get_mut(memory) {
                            mem.contents.write(*memory_offset, &data);
                        }
                    }
                }
            }
            Ok(())
        }
        CommandArgs::DestroyBuffer { buffer, .. } => destroy(ext, HandleKind::Buffer, *buffer),
        CommandArgs::BindBufferMemory { buffer, memory, memory_offset, .. } => {
            ext.apply_reads()?;
            bind_buffer(ext, *buffer, *memory, *memory_offset)?;
            ext.apply_writes()
        }
        CommandArgs::CreateImage { device, p_create_info, p_image, .. } => {
            create_image(ext, ok, *device, *p_create_info, *p_image, None).map(|_| ())
        }
        CommandArgs::RecreateImage { device, p_create_info, memory, memory_offset, layout, p_image, .. } => {
            let layout = vk::ImageLayout::from_raw(*layout);
            if let Some(image) = create_image(ext, ok, *device, *p_create_info, *p_image, Some(layout))? {
                if !memory.is_null() {
                    bind_image(ext, image, *memory, *memory_offset)?;
                }
            }
            Ok(())
        }
        CommandArgs::DestroyImage { image, .. } => destroy(ext, HandleKind::Image, *image),
        CommandArgs::BindImageMemory { image, memory, memory_offset, .. } => {
            ext.apply_reads()?;
            bind_image(ext, *image, *memory, *memory_offset)?;
            ext.apply_writes()
        }
        CommandArgs::CreateImageView { device, p_create_info, p_view, .. } => {
            create_image_view(ext, ok, *device, *p_create_info, *p_view)
        }
        CommandArgs::DestroyImageView { image_view, .. } => destroy(ext, HandleKind::ImageView, *image_view),
        CommandArgs::CreateSampler { device, p_create_info, p_sampler, .. } => {
            ext.apply_reads()?;
            let info: SamplerCreateInfo = ext.state().memory.read_pod(*p_create_info);
            ext.apply_writes()?;
            if let Some(handle) = created(ext, ok, *p_sampler) {
                ext.state().samplers.insert(handle, SamplerObject { handle, device: *device, info });
                ext.register(HandleKind::Sampler, handle);
            }
            Ok(())
        }
        CommandArgs::DestroySampler { sampler, .. } => destroy(ext, HandleKind::Sampler, *sampler),
        CommandArgs::CreateRenderPass { device, p_render_pass, .. } => {
            ext.apply_reads()?;
            ext.apply_writes()?;
            if let Some(handle) = created(ext, ok, *p_render_pass) {
                ext.state().render_passes.insert(handle, RenderPassObject { handle, device: *device });
                ext.register(HandleKind::RenderPass, handle);
            }
            Ok(())
        }
        CommandArgs::DestroyRenderPass { render_pass, .. } => destroy(ext, HandleKind::RenderPass, *render_pass),
        CommandArgs::CreateFramebuffer { device, p_create_info, p_framebuffer, .. } => {
            create_framebuffer(ext, ok, *device, *p_create_info, *p_framebuffer)
        }
        CommandArgs::DestroyFramebuffer { framebuffer, .. } => destroy(ext, HandleKind::Framebuffer, *framebuffer),

        // ── Synchronization ─────────────────────────────────
        CommandArgs::CreateSemaphore { device, p_create_info, p_semaphore, .. }
        | CommandArgs::RecreateSemaphore { device, p_create_info, p_semaphore, .. } => {
            create_semaphore(ext, ok, *device, *p_create_info, *p_semaphore)
        }
        CommandArgs::DestroySemaphore { semaphore, .. } => destroy(ext, HandleKind::Semaphore, *semaphore),
        CommandArgs::CreateFence { device, p_create_info, p_fence, .. }
        | CommandArgs::RecreateFence { device, p_create_info, p_fence, .. } => {
            ext.apply_reads()?;
            let info: FenceCreateInfo = ext.state().memory.read_pod(*p_create_info);
            ext.apply_writes()?;
            if let Some(handle) = created(ext, ok, *p_fence) {
                let signaled = vk::FenceCreateFlags::from_raw(info.flags).contains(vk::FenceCreateFlags::SIGNALED);
                ext.state()
                    .fences
                    .insert(handle, FenceObject { handle, device: *device, signaled });
                ext.register(HandleKind::Fence, handle);
            }
            Ok(())
        }
        CommandArgs::DestroyFence { fence, .. } => destroy(ext, HandleKind::Fence, *fence),
        CommandArgs::ResetFences { fence_count, p_fences, .. } => {
            ext.apply_reads()?;
            let fences = ext.state().read_handles(*p_fences, *fence_count);
            for fence in fences {
                match ext.state().fences.get_mut(&fence) {
                    Some(f) => f.signaled = false,
                    None => ext.vk_err_invalid_handle(HandleKind::Fence, fence),
                }
            }
            ext.apply_writes()
        }
        // Waits take their outcome from the trace; nothing changes here.
        CommandArgs::GetFenceStatus { .. }
        | CommandArgs::WaitForFences { .. }
        | CommandArgs::WaitSemaphores { .. }
        | CommandArgs::ReplayWaitForFences { .. }
        | CommandArgs::ReplayWaitSemaphores { .. }
        | CommandArgs::ReplayGetFenceStatus { .. } => {
            ext.apply_reads()?;
            ext.apply_writes()
        }

        // ── Command pools / buffers ─────────────────────────
        CommandArgs::CreateCommandPool { device, p_create_info, p_command_pool, .. } => {
            ext.apply_reads()?;
            let info: CommandPoolCreateInfo = ext.state().memory.read_pod(*p_create_info);
            ext.apply_writes()?;
            if let Some(handle) = created(ext, ok, *p_command_pool) {
                ext.state().command_pools.insert(
                    handle,
                    CommandPoolObject {
                        handle,
                        device: *device,
                        queue_family_index: info.queue_family_index,
                        command_buffers: Vec::new(),
                    },
                );
                ext.register(HandleKind::CommandPool, handle);
            }
            Ok(())
        }
        CommandArgs::DestroyCommandPool { command_pool, .. } => {
            ext.apply_reads()?;
            let state = ext.state();
            match state.command_pools.remove(command_pool) {
                Some(pool) => {
                    for cb in pool.command_buffers {
                        state.command_buffers.remove(&cb);
                    }
                }
                None if !command_pool.is_null() => ext.vk_err_invalid_handle(HandleKind::CommandPool, *command_pool),
                None => {}
            }
            ext.apply_writes()
        }
        CommandArgs::AllocateCommandBuffers { device, p_allocate_info, p_command_buffers } => {
            allocate_command_buffers(ext, ok, *device, *p_allocate_info, *p_command_buffers)
        }
        CommandArgs::FreeCommandBuffers { command_pool, command_buffer_count, p_command_buffers, .. } => {
            ext.apply_reads()?;
            let state = ext.state();
            let handles = state.read_handles(*p_command_buffers, *command_buffer_count);
            for cb in &handles {
                state.command_buffers.remove(cb);
            }
            if let Some(pool) = state.command_pools.get_mut(command_pool) {
                pool.command_buffers.retain(|cb| !handles.contains(cb));
            }
            ext.apply_writes()
        }
        CommandArgs::BeginCommandBuffer { command_buffer, .. } => {
            ext.apply_reads()?;
            match ext.state().command_buffers.get_mut(command_buffer) {
                Some(cb) => {
                    cb.recording = true;
                    cb.commands.clear();
                }
                None => ext.vk_err_invalid_handle(HandleKind::CommandBuffer, *command_buffer),
            }
            ext.apply_writes()
        }
        CommandArgs::EndCommandBuffer { command_buffer } => {
            ext.apply_reads()?;
            match ext.state().command_buffers.get_mut(command_buffer) {
                Some(cb) => cb.recording = false,
                None => ext.vk_err_invalid_handle(HandleKind::CommandBuffer, *command_buffer),
            }
            ext.apply_writes()
        }

        // ── Recorded commands ───────────────────────────────
        CommandArgs::CmdPipelineBarrier {
            command_buffer,
            buffer_memory_barrier_count,
            p_buffer_memory_barriers,
            image_memory_barrier_count,
            p_image_memory_barriers,
            ..
        } => {
            ext.apply_reads()?;
            let state = ext.state();
            let buffer_barriers = read_array::<BufferMemoryBarrier>(
                state,
                *p_buffer_memory_barriers,
                *buffer_memory_barrier_count,
            );
            let image_barriers =
                read_array::<ImageMemoryBarrier>(state, *p_image_memory_barriers, *image_memory_barrier_count);
            record(ext, *command_buffer, RecordedCommand::PipelineBarrier { buffer_barriers, image_barriers })?;
            ext.apply_writes()
        }
        CommandArgs::CmdCopyBuffer { command_buffer, src_buffer, dst_buffer, region_count, p_regions } => {
            ext.apply_reads()?;
            let regions = read_array::<BufferCopy>(ext.state(), *p_regions, *region_count);
            record(
                ext,
                *command_buffer,
                RecordedCommand::CopyBuffer { src: *src_buffer, dst: *dst_buffer, regions },
            )?;
            ext.apply_writes()
        }
        CommandArgs::CmdCopyBufferToImage {
            command_buffer,
            src_buffer,
            dst_image,
            dst_image_layout,
            region_count,
            p_regions,
        } => {
            ext.apply_reads()?;
            let regions = read_array::<BufferImageCopy>(ext.state(), *p_regions, *region_count);
            record(
                ext,
                *command_buffer,
                RecordedCommand::CopyBufferToImage {
                    src: *src_buffer,
                    dst: *dst_image,
                    layout: vk::ImageLayout::from_raw(*dst_image_layout),
                    regions,
                },
            )?;
            ext.apply_writes()
        }
        CommandArgs::CmdCopyImageToBuffer {
            command_buffer,
            src_image,
            src_image_layout,
            dst_buffer,
            region_count,
            p_regions,
        } => {
            ext.apply_reads()?;
            let regions = read_array::<BufferImageCopy>(ext.state(), *p_regions, *region_count);
            record(
                ext,
                *command_buffer,
                RecordedCommand::CopyImageToBuffer {
                    src: *src_image,
                    layout: vk::ImageLayout::from_raw(*src_image_layout),
                    dst: *dst_buffer,
                    regions,
                },
            )?;
            ext.apply_writes()
        }
        CommandArgs::CmdBlitImage { command_buffer, src_image, dst_image, region_count, p_regions, .. } => {
            ext.apply_reads()?;
            let regions = read_array::<ImageBlit>(ext.state(), *p_regions, *region_count);
            record(
                ext,
                *command_buffer,
                RecordedCommand::BlitImage { src: *src_image, dst: *dst_image, regions },
            )?;
            ext.apply_writes()
        }
        CommandArgs::CmdBeginRenderPass { command_buffer, p_render_pass_begin, .. } => {
            ext.apply_reads()?;
            let info: RenderPassBeginInfo = ext.state().memory.read_pod(*p_render_pass_begin);
            record(
                ext,
                *command_buffer,
                RecordedCommand::BeginRenderPass {
                    render_pass: Handle(info.render_pass),
                    framebuffer: Handle(info.framebuffer),
                },
            )?;
            ext.apply_writes()
        }
        CommandArgs::CmdEndRenderPass { command_buffer } => simple_record(ext, *command_buffer, RecordedCommand::EndRenderPass),
        CommandArgs::CmdDraw { command_buffer, .. } => simple_record(ext, *command_buffer, RecordedCommand::Draw),
        CommandArgs::CmdDispatch { command_buffer, .. } => simple_record(ext, *command_buffer, RecordedCommand::Dispatch),
        CommandArgs::CmdBindPipeline { command_buffer, pipeline, .. } => {
            simple_record(ext, *command_buffer, RecordedCommand::BindPipeline { pipeline: *pipeline })
        }
        CommandArgs::CmdBindDescriptorSets {
            command_buffer,
            layout,
            descriptor_set_count,
            p_descriptor_sets,
            ..
        } => {
            ext.apply_reads()?;
            let sets = ext.state().read_handles(*p_descriptor_sets, *descriptor_set_count);
            record(ext, *command_buffer, RecordedCommand::BindDescriptorSets { layout: *layout, sets })?;
            ext.apply_writes()
        }
        CommandArgs::CmdDebugMarkerBeginExt { command_buffer, p_marker_info } => {
            ext.apply_reads()?;
            let state = ext.state();
            let info: DebugMarkerMarkerInfoExt = state.memory.read_pod(*p_marker_info);
            let name = if info.p_marker_name == 0 {
                String::new()
            } else {
                state.memory.read_cstr(info.p_marker_name)
            };
            record(ext, *command_buffer, RecordedCommand::DebugMarkerBegin { name })?;
            ext.apply_writes()
        }
        CommandArgs::CmdDebugMarkerEndExt { command_buffer } => {
            simple_record(ext, *command_buffer, RecordedCommand::DebugMarkerEnd)
        }

        // ── Descriptors ─────────────────────────────────────
        CommandArgs::CreateDescriptorSetLayout { device, p_create_info, p_set_layout, .. } => {
            ext.apply_reads()?;
            let state = ext.state();
            let info: DescriptorSetLayoutCreateInfo = state.memory.read_pod(*p_create_info);
            let bindings = read_array::<DescriptorSetLayoutBinding>(state, info.p_bindings, info.binding_count);
            ext.apply_writes()?;
            if let Some(handle) = created(ext, ok, *p_set_layout) {
                ext.state()
                    .descriptor_set_layouts
                    .insert(handle, DescriptorSetLayoutObject { handle, device: *device, bindings });
                ext.register(HandleKind::DescriptorSetLayout, handle);
            }
            Ok(())
        }
        CommandArgs::DestroyDescriptorSetLayout { descriptor_set_layout, .. } => {
            destroy(ext, HandleKind::DescriptorSetLayout, *descriptor_set_layout)
        }
        CommandArgs::CreateDescriptorPool { device, p_create_info, p_descriptor_pool, .. } => {
            ext.apply_reads()?;
            let info: DescriptorPoolCreateInfo = ext.state().memory.read_pod(*p_create_info);
            ext.apply_writes()?;
            if let Some(handle) = created(ext, ok, *p_descriptor_pool) {
                ext.state().descriptor_pools.insert(
                    handle,
                    DescriptorPoolObject { handle, device: *device, max_sets: info.max_sets, sets: Vec::new() },
                );
                ext.register(HandleKind::DescriptorPool, handle);
            }
            Ok(())
        }
        CommandArgs::DestroyDescriptorPool { descriptor_pool, .. } => {
            ext.apply_reads()?;
            let state = ext.state();
            match state.descriptor_pools.remove(descriptor_pool) {
                Some(pool) => {
                    for set in pool.sets {
                        state.descriptor_sets.remove(&set);
                    }
                }
                None if !descriptor_pool.is_null() => {
                    ext.vk_err_invalid_handle(HandleKind::DescriptorPool, *descriptor_pool)
                }
                None => {}
            }
            ext.apply_writes()
        }
        CommandArgs::AllocateDescriptorSets { device, p_allocate_info, p_descriptor_sets } => {
            allocate_descriptor_sets(ext, ok, *device, *p_allocate_info, *p_descriptor_sets)
        }
        CommandArgs::FreeDescriptorSets { descriptor_pool, descriptor_set_count, p_descriptor_sets, .. } => {
            ext.apply_reads()?;
            let state = ext.state();
            let sets = state.read_handles(*p_descriptor_sets, *descriptor_set_count);
            for set in &sets {
                state.descriptor_sets.remove(set);
            }
            if let Some(pool) = state.descriptor_pools.get_mut(descriptor_pool) {
                pool.sets.retain(|s| !sets.contains(s));
            }
            ext.apply_writes()
        }
        CommandArgs::UpdateDescriptorSets { descriptor_write_count, p_descriptor_writes, .. } => {
            ext.apply_reads()?;
            let writes = read_array::<WriteDescriptorSet>(ext.state(), *p_descriptor_writes, *descriptor_write_count);
            for w in writes {
                let set = Handle(w.dst_set);
                if !ext.state().descriptor_sets.contains_key(&set) {
                    ext.vk_err_invalid_handle(HandleKind::DescriptorSet, set);
                }
            }
            ext.apply_writes()
        }

        // ── Pipelines ───────────────────────────────────────
        CommandArgs::CreateShaderModule { device, p_create_info, p_shader_module, .. } => {
            ext.apply_reads()?;
            let info: ShaderModuleCreateInfo = ext.state().memory.read_pod(*p_create_info);
            ext.apply_writes()?;
            if let Some(handle) = created(ext, ok, *p_shader_module) {
                ext.state().shader_modules.insert(
                    handle,
                    ShaderModuleObject { handle, device: *device, code_size: info.code_size },
                );
                ext.register(HandleKind::ShaderModule, handle);
            }
            Ok(())
        }
        CommandArgs::DestroyShaderModule { shader_module, .. } => destroy(ext, HandleKind::ShaderModule, *shader_module),
        CommandArgs::CreatePipelineLayout { device, p_create_info, p_pipeline_layout, .. } => {
            ext.apply_reads()?;
            let state = ext.state();
            let info: PipelineLayoutCreateInfo = state.memory.read_pod(*p_create_info);
            let set_layouts = state.read_handles(info.p_set_layouts, info.set_layout_count);
            ext.apply_writes()?;
            if let Some(handle) = created(ext, ok, *p_pipeline_layout) {
                ext.state().pipeline_layouts.insert(
                    handle,
                    PipelineLayoutObject { handle, device: *device, set_layouts },
                );
                ext.register(HandleKind::PipelineLayout, handle);
            }
            Ok(())
        }
        CommandArgs::DestroyPipelineLayout { pipeline_layout, .. } => {
            destroy(ext, HandleKind::PipelineLayout, *pipeline_layout)
        }
        CommandArgs::CreateComputePipelines { device, create_info_count, p_create_infos, p_pipelines, .. } => {
            ext.apply_reads()?;
            let infos = read_array::<ComputePipelineCreateInfo>(ext.state(), *p_create_infos, *create_info_count);
            ext.apply_writes()?;
            if !ok {
                return Ok(());
            }
            let handles = ext.state().read_handles(*p_pipelines, *create_info_count);
            for (handle, info) in handles.into_iter().zip(infos) {
                if handle.is_null() {
                    continue;
                }
                ext.state().pipelines.insert(
                    handle,
                    PipelineObject {
                        handle,
                        device: *device,
                        layout: Handle(info.layout),
                        bind_point: vk::PipelineBindPoint::COMPUTE.as_raw(),
                        dynamic_states: Vec::new(),
                    },
                );
                ext.register(HandleKind::Pipeline, handle);
            }
            Ok(())
        }
        CommandArgs::DestroyPipeline { pipeline, .. } => destroy(ext, HandleKind::Pipeline, *pipeline),

        // ── Replay registration ─────────────────────────────
        // Consumed by the replay harness; the shadow state already holds the objects.
        CommandArgs::ReplayRegisterVkInstance { .. }
        | CommandArgs::ReplayUnregisterVkInstance { .. }
        | CommandArgs::ReplayRegisterVkDevice { .. }
        | CommandArgs::ReplayUnregisterVkDevice { .. } => {
            ext.apply_reads()?;
            ext.apply_writes()
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────

fn read_array<T: bytemuck::Pod>(state: &State, address: u64, count: u32) -> Vec<T> {
    if address == 0 || count == 0 {
        return Vec::new();
    }
    state.memory.read_slice(address, count as usize)
}

/// The handle a successful create wrote to `p_out`.
fn created(ext: &mut dyn Externs, ok: bool, p_out: u64) -> Option<Handle> {
    if !ok {
        return None;
    }
    if p_out == 0 {
        ext.vk_err_null_pointer("output handle pointer");
        return None;
    }
    let handle = Handle(ext.state().memory.read_u64(p_out));
    (!handle.is_null()).then_some(handle)
}

/// Report `handle` unless it exists or is null.
fn expect_exists(ext: &mut dyn Externs, kind: HandleKind, handle: Handle, exists: bool) {
    if !exists && !handle.is_null() {
        ext.vk_err_invalid_handle(kind, handle);
    }
}

fn destroy(ext: &mut dyn Externs, kind: HandleKind, handle: Handle) -> Result<()> {
    ext.apply_reads()?;
    let state = ext.state();
    let removed = match kind {
        HandleKind::Buffer => state.buffers.remove(&handle).is_some(),
        HandleKind::Image => state.images.remove(&handle).is_some(),
        HandleKind::ImageView => state.image_views.remove(&handle).is_some(),
        HandleKind::Sampler => state.samplers.remove(&handle).is_some(),
        HandleKind::RenderPass => state.render_passes.remove(&handle).is_some(),
        HandleKind::Framebuffer => state.framebuffers.remove(&handle).is_some(),
        HandleKind::Semaphore => state.semaphores.remove(&handle).is_some(),
        HandleKind::Fence => state.fences.remove(&handle).is_some(),
        HandleKind::DescriptorSetLayout => state.descriptor_set_layouts.remove(&handle).is_some(),
        HandleKind::ShaderModule => state.shader_modules.remove(&handle).is_some(),
        HandleKind::PipelineLayout => state.pipeline_layouts.remove(&handle).is_some(),
        HandleKind::Pipeline => state.pipelines.remove(&handle).is_some(),
        _ => true,
    };
    if !removed && !handle.is_null() {
        ext.vk_err_invalid_handle(kind, handle);
    }
    ext.apply_writes()
}

fn signal_semaphore(ext: &mut dyn Externs, semaphore: Handle) {
    match ext.state().semaphores.get_mut(&semaphore) {
        Some(s) => s.signaled = true,
        None => ext.vk_err_invalid_handle(HandleKind::Semaphore, semaphore),
    }
}

fn unsignal_semaphore(ext: &mut dyn Externs, semaphore: Handle) {
    match ext.state().semaphores.get_mut(&semaphore) {
        Some(s) => {
            if s.timeline.is_none() {
                s.signaled = false;
            }
        }
        None => ext.vk_err_invalid_handle(HandleKind::Semaphore, semaphore),
    }
}

// ── Instance / device ───────────────────────────────────────

fn create_instance(ext: &mut dyn Externs, ok: bool, p_create_info: u64, p_instance: u64) -> Result<()> {
    ext.apply_reads()?;
    if p_create_info == 0 {
        ext.vk_err_null_pointer("pCreateInfo");
        return ext.apply_writes();
    }
    let state = ext.state();
    let info: InstanceCreateInfo = state.memory.read_pod(p_create_info);
    let enabled_layers = state.read_cstr_array(info.pp_enabled_layer_names, info.enabled_layer_count);
    let enabled_extensions = state.read_cstr_array(info.pp_enabled_extension_names, info.enabled_extension_count);
    ext.apply_writes()?;

    if let Some(handle) = created(ext, ok, p_instance) {
        for name in &enabled_extensions {
            if !name.starts_with("VK_") {
                ext.vk_err_unrecognized_extension(name.clone());
            }
        }
        debug!("instance {} with layers {:?}", handle, enabled_layers);
        ext.state().instances.insert(
            handle,
            InstanceObject { handle, enabled_layers, enabled_extensions, physical_devices: Vec::new() },
        );
        ext.register(HandleKind::Instance, handle);
    }
    Ok(())
}

fn destroy_instance(ext: &mut dyn Externs, instance: Handle) {
    let state = ext.state();
    match state.instances.remove(&instance) {
        Some(inst) => {
            for pd in inst.physical_devices {
                state.physical_devices.remove(&pd);
            }
        }
        None if !instance.is_null() => ext.vk_err_invalid_handle(HandleKind::Instance, instance),
        None => {}
    }
}

fn enumerate_physical_devices(
    ext: &mut dyn Externs,
    ok: bool,
    instance: Handle,
    p_count: u64,
    p_physical_devices: u64,
) -> Result<()> {
    ext.apply_reads()?;
    ext.apply_writes()?;
    if !ok || p_physical_devices == 0 {
        return Ok(());
    }
    let state = ext.state();
    let count: u32 = state.memory.read_pod(p_count);
    let handles = state.read_handles(p_physical_devices, count);
    let exists = state.instances.contains_key(&instance);
    expect_exists(ext, HandleKind::Instance, instance, exists);

    for &handle in &handles {
        if ext.state().physical_devices.contains_key(&handle) {
            continue;
        }
        ext.state().physical_devices.insert(
            handle,
            PhysicalDeviceObject { handle, instance, ..Default::default() },
        );
        ext.register(HandleKind::PhysicalDevice, handle);
    }
    if let Some(inst) = ext.state().instances.get_mut(&instance) {
        inst.physical_devices = handles;
    }
    Ok(())
}

fn create_device(
    ext: &mut dyn Externs,
    ok: bool,
    physical_device: Handle,
    p_create_info: u64,
    p_device: u64,
) -> Result<()> {
    ext.apply_reads()?;
    if p_create_info == 0 {
        ext.vk_err_null_pointer("pCreateInfo");
        return ext.apply_writes();
    }
    let state = ext.state();
    let info: DeviceCreateInfo = state.memory.read_pod(p_create_info);
    let enabled_extensions = state.read_cstr_array(info.pp_enabled_extension_names, info.enabled_extension_count);
    let features = (info.p_enabled_features != 0)
        .then(|| state.memory.read_pod::<PhysicalDeviceFeatures>(info.p_enabled_features));
    let exists = state.physical_devices.contains_key(&physical_device);
    ext.apply_writes()?;
    expect_exists(ext, HandleKind::PhysicalDevice, physical_device, exists);

    if let Some(handle) = created(ext, ok, p_device) {
        for name in &enabled_extensions {
            if !name.starts_with("VK_") {
                ext.vk_err_unrecognized_extension(name.clone());
            }
        }
        ext.state().devices.insert(
            handle,
            DeviceObject { handle, physical_device, enabled_extensions, features, queues: Vec::new() },
        );
        ext.register(HandleKind::Device, handle);
    }
    Ok(())
}

fn get_device_queue(
    ext: &mut dyn Externs,
    device: Handle,
    family_index: u32,
    index: u32,
    p_queue: u64,
) -> Result<()> {
    ext.apply_reads()?;
    ext.apply_writes()?;
    let Some(handle) = created(ext, true, p_queue) else {
        return Ok(());
    };
    let physical = ext.state().devices.get(&device).map(|d| d.physical_device);
    let Some(physical) = physical else {
        expect_exists(ext, HandleKind::Device, device, false);
        return Ok(());
    };
    let families = ext.fetch_physical_device_queue_properties(physical);
    let flags = families
        .get(family_index as usize)
        .map(|f| vk::QueueFlags::from_raw(f.queue_flags))
        .unwrap_or_default();

    let state = ext.state();
    if state.queues.contains_key(&handle) {
        return Ok(());
    }
    state.queues.insert(
        handle,
        QueueObject { handle, device, family_index, index, flags, pending: Vec::new() },
    );
    if let Some(dev) = state.devices.get_mut(&device) {
        dev.queues.push(handle);
    }
    ext.register(HandleKind::Queue, handle);
    Ok(())
}

// ── Submission ──────────────────────────────────────────────

/// Decode `count` `VkSubmitInfo`s at `p_submits`.
pub fn read_submit_batches(state: &State, p_submits: u64, count: u32) -> Vec<SubmitBatch> {
    read_array::<SubmitInfo>(state, p_submits, count)
        .into_iter()
        .map(|info| SubmitBatch {
            wait_semaphores: state.read_handles(info.p_wait_semaphores, info.wait_semaphore_count),
            wait_dst_stage_masks: read_array(state, info.p_wait_dst_stage_mask, info.wait_semaphore_count),
            command_buffers: state.read_handles(info.p_command_buffers, info.command_buffer_count),
            signal_semaphores: state.read_handles(info.p_signal_semaphores, info.signal_semaphore_count),
        })
        .collect()
}

fn queue_submit(ext: &mut dyn Externs, queue: Handle, submit_count: u32, p_submits: u64, fence: Handle) -> Result<()> {
    ext.apply_reads()?;

    // Host writes to coherent mappings are visible to the submission.
    let coherent = ext.state().coherent_memories.clone();
    for memory in coherent {
        ext.read_mapped_coherent_memory(memory)?;
    }

    let batches = read_submit_batches(ext.state(), p_submits, submit_count);
    if !ext.state().queues.contains_key(&queue) {
        ext.vk_err_invalid_handle(HandleKind::Queue, queue);
        return ext.apply_writes();
    }
    if batches.is_empty() {
        ext.record_fence_signal(fence);
        return ext.apply_writes();
    }

    let last = batches.len() - 1;
    let id = ext.command_id();
    for (i, batch) in batches.into_iter().enumerate() {
        let batch_fence = if i == last { fence } else { Handle::NULL };
        let blocked = !ext.state().queue(queue)?.pending.is_empty() || !batch_ready(ext, &batch);
        if blocked {
            ext.on_defer_subcommand(queue, i);
            ext.state().queue_mut(queue)?.pending.push(PendingBatch {
                command: id,
                submit_index: i,
                batch,
                fence: batch_fence,
            });
        } else {
            execute_batch(ext, queue, i, &batch, batch_fence)?;
        }
    }
    run_pending(ext)?;
    ext.apply_writes()
}

fn batch_ready(ext: &mut dyn Externs, batch: &SubmitBatch) -> bool {
    batch.wait_semaphores.iter().all(|s| {
        ext.state()
            .semaphores
            .get(s)
            .map_or(true, |sem| sem.signaled || sem.timeline.is_some())
    })
}

/// Run deferred batches whose semaphores have since been signaled, in queue order.
fn run_pending(ext: &mut dyn Externs) -> Result<()> {
    loop {
        let mut progressed = false;
        let mut queues: Vec<Handle> = ext
            .state()
            .queues
            .iter()
            .filter(|(_, q)| !q.pending.is_empty())
            .map(|(h, _)| *h)
            .collect();
        queues.sort();

        for queue in queues {
            loop {
                let front = ext.state().queue(queue)?.pending.first().cloned();
                let Some(pending) = front else { break };
                if !batch_ready(ext, &pending.batch) {
                    break;
                }
                ext.state().queue_mut(queue)?.pending.remove(0);
                ext.notify_pending_command_added(queue, pending.submit_index);
                execute_batch(ext, queue, pending.submit_index, &pending.batch, pending.fence)?;
                progressed = true;
            }
        }
        if !progressed {
            return Ok(());
        }
    }
}

#[derive(Default)]
struct SubmissionTracker {
    framebuffer: Handle,
    render_pass: Handle,
    drew: bool,
}

fn execute_batch(
    ext: &mut dyn Externs,
    queue: Handle,
    submit_index: usize,
    batch: &SubmitBatch,
    fence: Handle,
) -> Result<()> {
    for &sem in &batch.wait_semaphores {
        unsignal_semaphore(ext, sem);
    }

    let mut tracker = SubmissionTracker::default();
    for (cb_index, &cb) in batch.command_buffers.iter().enumerate() {
        let commands = match ext.state().command_buffers.get(&cb) {
            Some(buffer) => buffer.commands.clone(),
            None => {
                ext.vk_err_invalid_handle(HandleKind::CommandBuffer, cb);
                continue;
            }
        };
        for (i, command) in commands.iter().enumerate() {
            let index = SubcommandIndex { submit: submit_index, command_buffer: cb_index, command: i };
            ext.on_pre_subcommand(cb, index);
            execute_recorded(ext, command, &mut tracker)?;
            ext.on_post_subcommand(cb, index);
        }
    }

    for &sem in &batch.signal_semaphores {
        signal_semaphore(ext, sem);
    }
    ext.record_fence_signal(fence);
    ext.state().last_submission = Some(LastSubmission {
        queue,
        framebuffer: tracker.framebuffer,
        render_pass: tracker.render_pass,
        drew: tracker.drew,
    });
    Ok(())
}

fn execute_recorded(ext: &mut dyn Externs, command: &RecordedCommand, tracker: &mut SubmissionTracker) -> Result<()> {
    match command {
        RecordedCommand::PipelineBarrier { buffer_barriers, image_barriers } => {
            for b in buffer_barriers {
                let buffer = Handle(b.buffer);
                let exists = ext.state().buffers.contains_key(&buffer);
                expect_exists(ext, HandleKind::Buffer, buffer, exists);
            }
            for b in image_barriers {
                transition_image(ext, b);
            }
        }
        RecordedCommand::CopyBuffer { src, dst, regions } => copy_buffer_contents(ext, *src, *dst, regions)?,
        RecordedCommand::CopyBufferToImage { dst, layout, .. } => check_layout(ext, *dst, *layout),
        RecordedCommand::CopyImageToBuffer { src, layout, .. } => check_layout(ext, *src, *layout),
        RecordedCommand::BlitImage { src, dst, .. } => {
            for image in [*src, *dst] {
                let exists = ext.state().images.contains_key(&image);
                expect_exists(ext, HandleKind::Image, image, exists);
            }
        }
        RecordedCommand::BeginRenderPass { render_pass, framebuffer } => {
            ext.push_render_pass_marker(*render_pass);
            tracker.render_pass = *render_pass;
            tracker.framebuffer = *framebuffer;
        }
        RecordedCommand::EndRenderPass => ext.pop_render_pass_marker(),
        RecordedCommand::BindPipeline { pipeline } => {
            let exists = ext.state().pipelines.contains_key(pipeline);
            expect_exists(ext, HandleKind::Pipeline, *pipeline, exists);
        }
        RecordedCommand::BindDescriptorSets { sets, .. } => {
            for set in sets {
                let exists = ext.state().descriptor_sets.contains_key(set);
                expect_exists(ext, HandleKind::DescriptorSet, *set, exists);
            }
        }
        RecordedCommand::Draw => tracker.drew = true,
        RecordedCommand::Dispatch => {}
        RecordedCommand::DebugMarkerBegin { name } => ext.push_debug_marker(name.clone()),
        RecordedCommand::DebugMarkerEnd => ext.pop_debug_marker(),
    }
    Ok(())
}

fn transition_image(ext: &mut dyn Externs, barrier: &ImageMemoryBarrier) {
    let handle = Handle(barrier.image);
    let Some(image) = ext.state().images.get(&handle).cloned() else {
        expect_exists(ext, HandleKind::Image, handle, false);
        return;
    };
    let range = barrier.subresource_range;
    let levels = if range.level_count == vk::REMAINING_MIP_LEVELS {
        image.info.mip_levels.saturating_sub(range.base_mip_level)
    } else {
        range.level_count
    };
    let layers = if range.layer_count == vk::REMAINING_ARRAY_LAYERS {
        image.info.array_layers.saturating_sub(range.base_array_layer)
    } else {
        range.layer_count
    };
    if u64::from(range.base_mip_level) + u64::from(levels) > u64::from(image.info.mip_levels) {
        ext.vk_err_image_subresource(
            handle,
            format!("mip levels {}+{} exceed {}", range.base_mip_level, levels, image.info.mip_levels),
        );
    }
    if u64::from(range.base_array_layer) + u64::from(layers) > u64::from(image.info.array_layers) {
        ext.vk_err_image_subresource(
            handle,
            format!("array layers {}+{} exceed {}", range.base_array_layer, layers, image.info.array_layers),
        );
    }

    let old = vk::ImageLayout::from_raw(barrier.old_layout);
    if old != vk::ImageLayout::UNDEFINED && old != image.layout {
        ext.vk_err_image_layout(handle, old, image.layout);
    }
    if let Some(img) = ext.state().images.get_mut(&handle) {
        img.layout = vk::ImageLayout::from_raw(barrier.new_layout);
    }
}

fn check_layout(ext: &mut dyn Externs, image: Handle, layout: vk::ImageLayout) {
    let current = ext.state().images.get(&image).map(|i| i.layout);
    match current {
        Some(current) if current != layout && layout != vk::ImageLayout::GENERAL => {
            ext.vk_err_image_layout(image, layout, current)
        }
        Some(_) => {}
        None => expect_exists(ext, HandleKind::Image, image, false),
    }
}

fn copy_buffer_contents(ext: &mut dyn Externs, src: Handle, dst: Handle, regions: &[BufferCopy]) -> Result<()> {
    let state = ext.state();
    let (Some(src_binding), Some(dst_binding)) = (
        state.buffers.get(&src).and_then(|b| b.binding),
        state.buffers.get(&dst).and_then(|b| b.binding),
    ) else {
        return Ok(());
    };
    for r in regions {
        let Some(src_mem) = state.device_memories.get(&src_binding.memory) else {
            return Ok(());
        };
        let bytes = src_mem.contents.read_vec(src_binding.offset + r.src_offset, r.size);
        if let Some(dst_mem) = state.device_memories.get_mut(&dst_binding.memory) {
            dst_mem.contents.write(dst_binding.offset + r.dst_offset, &bytes);
        }
    }
    Ok(())
}

fn queue_bind_sparse(
    ext: &mut dyn Externs,
    queue: Handle,
    bind_info_count: u32,
    p_bind_info: u64,
    fence: Handle,
) -> Result<()> {
    ext.apply_reads()?;
    let infos = read_array::<BindSparseInfo>(ext.state(), p_bind_info, bind_info_count);
    for info in infos {
        let waits = ext.state().read_handles(info.p_wait_semaphores, info.wait_semaphore_count);
        for sem in waits {
            unsignal_semaphore(ext, sem);
        }
        let buffer_binds = read_array::<SparseBufferMemoryBindInfo>(ext.state(), info.p_buffer_binds, info.buffer_bind_count);
        for bind_info in buffer_binds {
            let binds = read_array::<SparseMemoryBind>(ext.state(), bind_info.p_binds, bind_info.bind_count);
            for bind in binds {
                let memory = Handle(bind.memory);
                if !memory.is_null() && !ext.state().device_memories.contains_key(&memory) {
                    // Trust the replay driver to reject a truly invalid bind.
                    warn!(
                        "sparse bind of buffer {:#x} on queue {} references unknown memory {}",
                        bind_info.buffer, queue, memory
                    );
                }
            }
        }
        let signals = ext.state().read_handles(info.p_signal_semaphores, info.signal_semaphore_count);
        for sem in signals {
            signal_semaphore(ext, sem);
        }
    }
    ext.record_fence_signal(fence);
    ext.apply_writes()
}

// ── Surfaces / swapchains ───────────────────────────────────

fn create_surface(
    ext: &mut dyn Externs,
    ok: bool,
    platform: SurfacePlatform,
    instance: Handle,
    p_create_info: u64,
    p_surface: u64,
) -> Result<()> {
    ext.apply_reads()?;
    if p_create_info == 0 {
        ext.vk_err_null_pointer("pCreateInfo");
    }
    ext.apply_writes()?;
    if let Some(handle) = created(ext, ok, p_surface) {
        ext.state().surfaces.insert(handle, SurfaceObject { handle, instance, platform });
        ext.register(HandleKind::Surface, handle);
    }
    Ok(())
}

fn create_swapchain(
    ext: &mut dyn Externs,
    ok: bool,
    device: Handle,
    p_create_info: u64,
    p_swapchain: u64,
    images: Option<(u64, u64)>,
) -> Result<()> {
    ext.apply_reads()?;
    let info: SwapchainCreateInfoKhr = ext.state().memory.read_pod(p_create_info);
    ext.apply_writes()?;
    let Some(handle) = created(ext, ok, p_swapchain) else {
        return Ok(());
    };
    let surface = Handle(info.surface);
    let exists = ext.state().surfaces.contains_key(&surface);
    expect_exists(ext, HandleKind::Surface, surface, exists);

    ext.state().swapchains.insert(
        handle,
        SwapchainObject {
            handle,
            device,
            surface,
            format: vk::Format::from_raw(info.image_format),
            extent: info.image_extent,
            usage: vk::ImageUsageFlags::from_raw(info.image_usage),
            images: Vec::new(),
            acquired: None,
        },
    );
    ext.register(HandleKind::Swapchain, handle);

    if let Some((p_count, p_images)) = images {
        if p_images != 0 {
            let count: u32 = ext.state().memory.read_pod(p_count);
            register_swapchain_images(ext, handle, p_images, count)?;
        }
    }
    Ok(())
}

fn register_swapchain_images(ext: &mut dyn Externs, swapchain: Handle, p_images: u64, count: u32) -> Result<()> {
    let state = ext.state();
    let handles = state.read_handles(p_images, count);
    let Some(chain) = state.swapchains.get(&swapchain).cloned() else {
        ext.vk_err_invalid_handle(HandleKind::Swapchain, swapchain);
        return Ok(());
    };
    for &image in &handles {
        if ext.state().images.contains_key(&image) {
            continue;
        }
        ext.state().images.insert(
            image,
            ImageObject {
                handle: image,
                device: chain.device,
                info: ImageInfo {
                    image_type: vk::ImageType::TYPE_2D,
                    format: chain.format,
                    extent: [chain.extent[0], chain.extent[1], 1],
                    mip_levels: 1,
                    array_layers: 1,
                    samples: 1,
                    usage: chain.usage,
                },
                layout: vk::ImageLayout::UNDEFINED,
                binding: None,
                swapchain: Some(swapchain),
            },
        );
        ext.register(HandleKind::Image, image);
    }
    ext.state().swapchain_mut(swapchain)?.images = handles;
    Ok(())
}

fn queue_present(ext: &mut dyn Externs, queue: Handle, p_present_info: u64) -> Result<()> {
    ext.apply_reads()?;
    let state = ext.state();
    let info: PresentInfoKhr = state.memory.read_pod(p_present_info);
    let waits = state.read_handles(info.p_wait_semaphores, info.wait_semaphore_count);
    let swapchains = state.read_handles(info.p_swapchains, info.swapchain_count);
    let indices = read_array::<u32>(state, info.p_image_indices, info.swapchain_count);
    for sem in waits {
        unsignal_semaphore(ext, sem);
    }
    for (swapchain, index) in swapchains.into_iter().zip(indices) {
        ext.record_present(queue, swapchain, index);
    }
    ext.apply_writes()
}

// ── Memory ──────────────────────────────────────────────────

fn allocate_memory(
    ext: &mut dyn Externs,
    ok: bool,
    device: Handle,
    p_allocate_info: u64,
    p_memory: u64,
) -> Result<Option<Handle>> {
    ext.apply_reads()?;
    let info: MemoryAllocateInfo = ext.state().memory.read_pod(p_allocate_info);
    ext.apply_writes()?;
    let Some(handle) = created(ext, ok, p_memory) else {
        return Ok(None);
    };
    let flags = ext.state().memory_type_flags(device, info.memory_type_index);
    ext.state().device_memories.insert(
        handle,
        DeviceMemoryObject {
            handle,
            device,
            size: info.allocation_size,
            memory_type_index: info.memory_type_index,
            coherent: flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT),
            mapped: None,
            contents: Default::default(),
        },
    );
    ext.register(HandleKind::DeviceMemory, handle);
    Ok(Some(handle))
}

fn replay_allocate_image_memory(
    ext: &mut dyn Externs,
    device: Handle,
    p_memory_properties: u64,
    image: Handle,
    p_memory: u64,
) -> Result<()> {
    ext.apply_reads()?;
    let props: PhysicalDeviceMemoryProperties = ext.state().memory.read_pod(p_memory_properties);
    ext.apply_writes()?;
    let Some(handle) = created(ext, true, p_memory) else {
        return Ok(());
    };
    let info = ext.state().image(image)?.info;
    // Sized to the image's tightly packed contents, not the real allocation.
    let size = format::image_size(info.format, info.extent, info.mip_levels, info.array_layers).ok_or_else(|| {
        ReplayError::malformed(
            rtrace_protocol::command::CommandKind::ReplayAllocateImageMemory,
            format!("no texel layout for {:?}", info.format),
        )
    })?;
    let memory_type_index = (0..props.memory_type_count.min(32))
        .find(|&i| {
            vk::MemoryPropertyFlags::from_raw(props.memory_types[i as usize].property_flags)
                .contains(vk::MemoryPropertyFlags::DEVICE_LOCAL)
        })
        .unwrap_or(0);
    ext.state().device_memories.insert(
        handle,
        DeviceMemoryObject {
            handle,
            device,
            size,
            memory_type_index,
            coherent: false,
            mapped: None,
            contents: Default::default(),
        },
    );
    ext.register(HandleKind::DeviceMemory, handle);
    Ok(())
}

fn flush_mapped_ranges(ext: &mut dyn Externs, range_count: u32, p_ranges: u64) -> Result<()> {
    let ranges = read_array::<MappedMemoryRange>(ext.state(), p_ranges, range_count);
    for r in ranges {
        let memory = Handle(r.memory);
        let Some(mapped) = ext.state().device_memories.get(&memory).map(|m| m.mapped) else {
            ext.vk_err_invalid_handle(HandleKind::DeviceMemory, memory);
            continue;
        };
        let Some(mapped) = mapped else {
            warn!("flush of unmapped memory {}", memory);
            continue;
        };
        if r.offset < mapped.offset {
            warn!("flush of {} starts before its mapping", memory);
            continue;
        }
        let end = mapped.offset + mapped.size;
        if r.offset >= end {
            warn!("flush of {} starts past its mapping", memory);
            continue;
        }
        let size = if r.size == vk::WHOLE_SIZE { end - r.offset } else { r.size.min(end - r.offset) };
        let state = ext.state();
        let bytes = state.memory.read_vec(mapped.location + (r.offset - mapped.offset), size);
        state.device_memory_mut(memory)?.contents.write(r.offset, &bytes);
    }
    Ok(())
}

// ── Buffers / images ────────────────────────────────────────

fn create_buffer(
    ext: &mut dyn Externs,
    ok: bool,
    device: Handle,
    p_create_info: u64,
    p_buffer: u64,
) -> Result<Option<Handle>> {
    ext.apply_reads()?;
    let info: BufferCreateInfo = ext.state().memory.read_pod(p_create_info);
    ext.apply_writes()?;
    let Some(handle) = created(ext, ok, p_buffer) else {
        return Ok(None);
    };
    ext.state().buffers.insert(
        handle,
        BufferObject {
            handle,
            device,
            size: info.size,
            usage: vk::BufferUsageFlags::from_raw(info.usage),
            binding: None,
        },
    );
    ext.register(HandleKind::Buffer, handle);
    Ok(Some(handle))
}

fn bind_buffer(ext: &mut dyn Externs, buffer: Handle, memory: Handle, offset: u64) -> Result<()> {
    let memory_size = ext.state().device_memories.get(&memory).map(|m| m.size);
    let Some(memory_size) = memory_size else {
        expect_exists(ext, HandleKind::DeviceMemory, memory, false);
        return Ok(());
    };
    if let Some(req) = ext.fetch_buffer_memory_requirements(buffer) {
        if offset.saturating_add(req.size) > memory_size {
            warn!("buffer {} bound past the end of memory {}", buffer, memory);
        }
    }
    match ext.state().buffers.get_mut(&buffer) {
        Some(b) => b.binding = Some(MemoryBinding { memory, offset }),
        None => expect_exists(ext, HandleKind::Buffer, buffer, false),
    }
    Ok(())
}

fn create_image(
    ext: &mut dyn Externs,
    ok: bool,
    device: Handle,
    p_create_info: u64,
    p_image: u64,
    layout: Option<vk::ImageLayout>,
) -> Result<Option<Handle>> {
    ext.apply_reads()?;
    let info: ImageCreateInfo = ext.state().memory.read_pod(p_create_info);
    ext.apply_writes()?;
    let Some(handle) = created(ext, ok, p_image) else {
        return Ok(None);
    };
    ext.state().images.insert(
        handle,
        ImageObject {
            handle,
            device,
            info: ImageInfo {
                image_type: vk::ImageType::from_raw(info.image_type),
                format: vk::Format::from_raw(info.format),
                extent: info.extent,
                mip_levels: info.mip_levels.max(1),
                array_layers: info.array_layers.max(1),
                samples: info.samples.max(1),
                usage: vk::ImageUsageFlags::from_raw(info.usage),
            },
            layout: layout.unwrap_or(vk::ImageLayout::from_raw(info.initial_layout)),
            binding: None,
            swapchain: None,
        },
    );
    ext.register(HandleKind::Image, handle);
    Ok(Some(handle))
}

fn bind_image(ext: &mut dyn Externs, image: Handle, memory: Handle, offset: u64) -> Result<()> {
    let memory_size = ext.state().device_memories.get(&memory).map(|m| m.size);
    let Some(memory_size) = memory_size else {
        expect_exists(ext, HandleKind::DeviceMemory, memory, false);
        return Ok(());
    };
    if let Some(req) = ext.fetch_image_memory_requirements(image) {
        if offset.saturating_add(req.size) > memory_size {
            debug!("image {} needs {} bytes at {} of {}-byte memory {}", image, req.size, offset, memory_size, memory);
        }
    }
    match ext.state().images.get_mut(&image) {
        Some(i) => i.binding = Some(MemoryBinding { memory, offset }),
        None => expect_exists(ext, HandleKind::Image, image, false),
    }
    Ok(())
}

fn create_image_view(ext: &mut dyn Externs, ok: bool, device: Handle, p_create_info: u64, p_view: u64) -> Result<()> {
    ext.apply_reads()?;
    let info: ImageViewCreateInfo = ext.state().memory.read_pod(p_create_info);
    ext.apply_writes()?;
    let Some(handle) = created(ext, ok, p_view) else {
        return Ok(());
    };
    let image = Handle(info.image);
    let exists = ext.state().images.contains_key(&image);
    expect_exists(ext, HandleKind::Image, image, exists);
    ext.state().image_views.insert(
        handle,
        ImageViewObject {
            handle,
            device,
            image,
            format: vk::Format::from_raw(info.format),
            subresource_range: info.subresource_range,
        },
    );
    ext.register(HandleKind::ImageView, handle);
    Ok(())
}

fn create_framebuffer(ext: &mut dyn Externs, ok: bool, device: Handle, p_create_info: u64, p_framebuffer: u64) -> Result<()> {
    ext.apply_reads()?;
    let state = ext.state();
    let info: FramebufferCreateInfo = state.memory.read_pod(p_create_info);
    let attachments = state.read_handles(info.p_attachments, info.attachment_count);
    ext.apply_writes()?;
    let Some(handle) = created(ext, ok, p_framebuffer) else {
        return Ok(());
    };
    ext.state().framebuffers.insert(
        handle,
        FramebufferObject {
            handle,
            device,
            render_pass: Handle(info.render_pass),
            attachments,
            width: info.width,
            height: info.height,
            layers: info.layers,
        },
    );
    ext.register(HandleKind::Framebuffer, handle);
    Ok(())
}

fn create_semaphore(ext: &mut dyn Externs, ok: bool, device: Handle, p_create_info: u64, p_semaphore: u64) -> Result<()> {
    ext.apply_reads()?;
    let state = ext.state();
    let info: SemaphoreCreateInfo = state.memory.read_pod(p_create_info);
    let timeline = state
        .find_in_chain(info.p_next, vk::StructureType::SEMAPHORE_TYPE_CREATE_INFO.as_raw())
        .map(|addr| state.memory.read_pod::<SemaphoreTypeCreateInfo>(addr))
        .filter(|t| t.semaphore_type == vk::SemaphoreType::TIMELINE.as_raw())
        .map(|t| t.initial_value);
    ext.apply_writes()?;
    if let Some(handle) = created(ext, ok, p_semaphore) {
        ext.state().semaphores.insert(
            handle,
            SemaphoreObject { handle, device, signaled: false, timeline },
        );
        ext.register(HandleKind::Semaphore, handle);
    }
    Ok(())
}

// ── Command buffers ─────────────────────────────────────────

fn allocate_command_buffers(
    ext: &mut dyn Externs,
    ok: bool,
    device: Handle,
    p_allocate_info: u64,
    p_command_buffers: u64,
) -> Result<()> {
    ext.apply_reads()?;
    let info: CommandBufferAllocateInfo = ext.state().memory.read_pod(p_allocate_info);
    ext.apply_writes()?;
    if !ok {
        return Ok(());
    }
    let pool = Handle(info.command_pool);
    let handles = ext.state().read_handles(p_command_buffers, info.command_buffer_count);
    if !ext.state().command_pools.contains_key(&pool) {
        expect_exists(ext, HandleKind::CommandPool, pool, false);
    }
    for handle in handles {
        ext.state().command_buffers.insert(
            handle,
            CommandBufferObject { handle, device, pool, recording: false, commands: Vec::new() },
        );
        if let Some(p) = ext.state().command_pools.get_mut(&pool) {
            p.command_buffers.push(handle);
        }
        ext.register(HandleKind::CommandBuffer, handle);
    }
    Ok(())
}

fn record(ext: &mut dyn Externs, command_buffer: Handle, command: RecordedCommand) -> Result<()> {
    let index = match ext.state().command_buffers.get_mut(&command_buffer) {
        Some(cb) => {
            if !cb.recording {
                warn!("recording into {} outside begin/end", command_buffer);
            }
            cb.commands.push(command);
            cb.commands.len() - 1
        }
        None => {
            ext.vk_err_invalid_handle(HandleKind::CommandBuffer, command_buffer);
            return Ok(());
        }
    };
    ext.on_command_added(command_buffer, index);
    Ok(())
}

fn simple_record(ext: &mut dyn Externs, command_buffer: Handle, command: RecordedCommand) -> Result<()> {
    ext.apply_reads()?;
    record(ext, command_buffer, command)?;
    ext.apply_writes()
}

// ── Descriptors ─────────────────────────────────────────────

fn allocate_descriptor_sets(
    ext: &mut dyn Externs,
    ok: bool,
    device: Handle,
    p_allocate_info: u64,
    p_descriptor_sets: u64,
) -> Result<()> {
    ext.apply_reads()?;
    let state = ext.state();
    let info: DescriptorSetAllocateInfo = state.memory.read_pod(p_allocate_info);
    let layouts = state.read_handles(info.p_set_layouts, info.descriptor_set_count);
    ext.apply_writes()?;
    if !ok {
        return Ok(());
    }
    let pool = Handle(info.descriptor_pool);
    let handles = ext.state().read_handles(p_descriptor_sets, info.descriptor_set_count);
    for (handle, layout) in handles.into_iter().zip(layouts) {
        ext.state()
            .descriptor_sets
            .insert(handle, DescriptorSetObject { handle, device, pool, layout });
        match ext.state().descriptor_pools.get_mut(&pool) {
            Some(p) => p.sets.push(handle),
            None => expect_exists(ext, HandleKind::DescriptorPool, pool, false),
        }
        ext.register(HandleKind::DescriptorSet, handle);
    }
    Ok(())
}
