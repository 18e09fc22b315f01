use std::mem::size_of;

use rtrace_protocol::layout::*;

#[test]
fn test_layouts_match_c_abi() {
    assert_eq!(size_of::<BaseHeader>(), 16);
    assert_eq!(size_of::<VirtualSwapchainPNext>(), 24);
    assert_eq!(size_of::<InstanceCreateInfo>(), 64);
    assert_eq!(size_of::<DeviceQueueCreateInfo>(), 40);
    assert_eq!(size_of::<DeviceCreateInfo>(), 72);
    assert_eq!(size_of::<PhysicalDeviceFeatures>(), 220);
    assert_eq!(size_of::<QueueFamilyProperties>(), 24);
    assert_eq!(size_of::<PhysicalDeviceMemoryProperties>(), 520);
    assert_eq!(size_of::<SwapchainCreateInfoKhr>(), 104);
    assert_eq!(size_of::<PresentInfoKhr>(), 64);
    assert_eq!(size_of::<MemoryAllocateInfo>(), 32);
    assert_eq!(size_of::<ImportMemoryFdInfoKhr>(), 24);
    assert_eq!(size_of::<MappedMemoryRange>(), 40);
    assert_eq!(size_of::<BufferCreateInfo>(), 56);
    assert_eq!(size_of::<ImageCreateInfo>(), 88);
    assert_eq!(size_of::<ImageViewCreateInfo>(), 80);
    assert_eq!(size_of::<SamplerCreateInfo>(), 80);
    assert_eq!(size_of::<FramebufferCreateInfo>(), 64);
    assert_eq!(size_of::<SemaphoreTypeCreateInfo>(), 32);
    assert_eq!(size_of::<SemaphoreWaitInfo>(), 40);
    assert_eq!(size_of::<SubmitInfo>(), 72);
    assert_eq!(size_of::<SparseMemoryBind>(), 40);
    assert_eq!(size_of::<BindSparseInfo>(), 96);
    assert_eq!(size_of::<BufferMemoryBarrier>(), 56);
    assert_eq!(size_of::<ImageMemoryBarrier>(), 72);
    assert_eq!(size_of::<BufferImageCopy>(), 56);
    assert_eq!(size_of::<ImageBlit>(), 80);
    assert_eq!(size_of::<RenderPassBeginInfo>(), 64);
    assert_eq!(size_of::<WriteDescriptorSet>(), 64);
    assert_eq!(size_of::<ComputePipelineCreateInfo>(), 96);
    assert_eq!(size_of::<DebugMarkerMarkerInfoExt>(), 40);
}

#[test]
fn test_anisotropy_feature_offset() {
    // VkPhysicalDeviceFeatures::samplerAnisotropy sits at byte 76.
    assert_eq!(PhysicalDeviceFeatures::SAMPLER_ANISOTROPY * 4, 76);
}
