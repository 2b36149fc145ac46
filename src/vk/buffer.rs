use ash::vk;

use crate::error::{RenderError, VkResultExt};

/// Host-visible buffer with its own memory allocation.
pub struct BufferResource {
    device: ash::Device,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl BufferResource {
    pub fn new(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, RenderError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer =
            unsafe { device.create_buffer(&buffer_info, None) }.call("vkCreateBuffer")?;
        let mem_reqs = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = find_memory_type(
            mem_props,
            mem_reqs.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .and_then(|memory_index| {
            let alloc_info = vk::MemoryAllocateInfo::default()
                .allocation_size(mem_reqs.size)
                .memory_type_index(memory_index);
            unsafe { device.allocate_memory(&alloc_info, None) }.call("vkAllocateMemory")
        });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let resource = BufferResource {
            device: device.clone(),
            buffer,
            memory,
            size,
        };
        unsafe { device.bind_buffer_memory(buffer, memory, 0) }.call("vkBindBufferMemory")?;
        Ok(resource)
    }

    pub fn store(&self, bytes: &[u8]) -> Result<(), RenderError> {
        let byte_size = check_fits(self.size, bytes.len())?;
        if byte_size == 0 {
            return Ok(());
        }
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, byte_size, vk::MemoryMapFlags::empty())
                .call("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub fn read(&self) -> Result<Vec<u8>, RenderError> {
        let mut out = vec![0u8; self.size as usize];
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .call("vkMapMemory")?;
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), out.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(out)
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(self.size)
    }
}

/// Size of `len` bytes as a device size, if they fit in `capacity`.
fn check_fits(capacity: vk::DeviceSize, len: usize) -> Result<vk::DeviceSize, RenderError> {
    let len = len as vk::DeviceSize;
    if len > capacity {
        return Err(RenderError::BufferOverflow {
            size: capacity,
            len,
        });
    }
    Ok(len)
}

impl Drop for BufferResource {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

pub fn find_memory_type(
    mem_props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    (0..mem_props.memory_type_count)
        .find(|&i| {
            (type_bits >> i) & 1 == 1
                && mem_props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(RenderError::Vulkan {
            call: "vkAllocateMemory",
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = *f;
        }
        props
    }

    #[test]
    fn test_finds_first_matching_type() {
        let mem = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let idx = find_memory_type(&mem, 0b11, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap();
        assert_eq!(idx, 1);
        let idx = find_memory_type(&mem, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_respects_type_bits() {
        let mem = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        let idx = find_memory_type(&mem, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_no_matching_type() {
        let mem = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&mem, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }

    #[test]
    fn test_store_size_check() {
        assert_eq!(check_fits(64, 64).unwrap(), 64);
        assert_eq!(check_fits(64, 0).unwrap(), 0);
        assert!(matches!(
            check_fits(64, 65),
            Err(RenderError::BufferOverflow { size: 64, len: 65 })
        ));
    }
}
