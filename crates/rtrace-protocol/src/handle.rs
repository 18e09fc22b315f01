use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque 64-bit Vulkan object handle as observed at trace time.
/// Zero is the null handle and is never remapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct Handle(pub u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Whether the handle participates in the trace-value to replay-value mapping.
    pub fn is_remappable(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Handle {
    fn from(v: u64) -> Self {
        Handle(v)
    }
}

/// Type tag for handles, named after the Vulkan type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum HandleKind {
    Instance,
    PhysicalDevice,
    Device,
    Queue,
    CommandPool,
    CommandBuffer,
    DeviceMemory,
    Buffer,
    Image,
    ImageView,
    Sampler,
    Pipeline,
    PipelineLayout,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    ShaderModule,
    RenderPass,
    Framebuffer,
    Fence,
    Semaphore,
    Surface,
    Swapchain,
}

impl HandleKind {
    /// The Vulkan type name, as used by the handle-mapping export.
    pub fn type_name(self) -> &'static str {
        match self {
            HandleKind::Instance => "VkInstance",
            HandleKind::PhysicalDevice => "VkPhysicalDevice",
            HandleKind::Device => "VkDevice",
            HandleKind::Queue => "VkQueue",
            HandleKind::CommandPool => "VkCommandPool",
            HandleKind::CommandBuffer => "VkCommandBuffer",
            HandleKind::DeviceMemory => "VkDeviceMemory",
            HandleKind::Buffer => "VkBuffer",
            HandleKind::Image => "VkImage",
            HandleKind::ImageView => "VkImageView",
            HandleKind::Sampler => "VkSampler",
            HandleKind::Pipeline => "VkPipeline",
            HandleKind::PipelineLayout => "VkPipelineLayout",
            HandleKind::DescriptorSetLayout => "VkDescriptorSetLayout",
            HandleKind::DescriptorPool => "VkDescriptorPool",
            HandleKind::DescriptorSet => "VkDescriptorSet",
            HandleKind::ShaderModule => "VkShaderModule",
            HandleKind::RenderPass => "VkRenderPass",
            HandleKind::Framebuffer => "VkFramebuffer",
            HandleKind::Fence => "VkFence",
            HandleKind::Semaphore => "VkSemaphore",
            HandleKind::Surface => "VkSurfaceKHR",
            HandleKind::Swapchain => "VkSwapchainKHR",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}
