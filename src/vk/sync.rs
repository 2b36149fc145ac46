use ash::vk;

use crate::error::{RenderError, VkResultExt};
use crate::sync::FenceTimeout;

pub struct Fence {
    device: ash::Device,
    pub fence: vk::Fence,
}

impl Fence {
    pub fn new(device: &ash::Device, signaled: bool) -> Result<Self, RenderError> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.create_fence(&info, None) }.call("vkCreateFence")?;
        Ok(Fence {
            device: device.clone(),
            fence,
        })
    }

    pub fn wait(&self, timeout: FenceTimeout) -> Result<(), RenderError> {
        match unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout.as_nanos())
        } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => match timeout {
                FenceTimeout::Bounded(limit) => Err(RenderError::FenceTimeout(limit)),
                FenceTimeout::Unbounded => Err(RenderError::Vulkan {
                    call: "vkWaitForFences",
                    result: vk::Result::TIMEOUT,
                }),
            },
            Err(result) => Err(RenderError::Vulkan {
                call: "vkWaitForFences",
                result,
            }),
        }
    }

    pub fn reset(&self) -> Result<(), RenderError> {
        unsafe { self.device.reset_fences(&[self.fence]) }.call("vkResetFences")
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.fence, None) };
    }
}

pub struct Semaphore {
    device: ash::Device,
    pub semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: &ash::Device) -> Result<Self, RenderError> {
        let info = vk::SemaphoreCreateInfo::default();
        let semaphore =
            unsafe { device.create_semaphore(&info, None) }.call("vkCreateSemaphore")?;
        Ok(Semaphore {
            device: device.clone(),
            semaphore,
        })
    }

    pub fn many(device: &ash::Device, count: usize) -> Result<Vec<Self>, RenderError> {
        (0..count).map(|_| Semaphore::new(device)).collect()
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.semaphore, None) };
    }
}
