//! Vulkan objects behind the frame backend. Every handle is owned by a guard
//! that destroys it on drop.

pub mod backend;
pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod image;
pub mod instance;
pub mod pipeline;
pub mod render_pass;
pub mod swapchain;
pub mod sync;

pub use backend::VulkanBackend;
pub use device::VulkanDevice;
pub use headless::HeadlessRenderer;
pub use instance::VulkanInstance;
