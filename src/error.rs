use ash::vk;
use std::path::PathBuf;

/// Errors raised while setting up or driving the renderer.
///
/// Every Vulkan call that can fail is mapped into [`RenderError::Vulkan`] with
/// the name of the call, so a log line is enough to find the failing site.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("{call} failed: {result:?}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("Failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("No suitable GPU found: {0}")]
    NoSuitableDevice(String),

    #[error("Format {0:?} does not support storage image operations")]
    UnsupportedFormat(vk::Format),

    #[error("Compute fence was not signaled within {0:?}; treating the device as lost")]
    FenceTimeout(std::time::Duration),

    #[error("Failed to load shader {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Window system error: {0}")]
    Window(String),

    #[error("Completion fence misuse: {0}")]
    FenceMisuse(&'static str),

    #[error("Shared image state violation: {0}")]
    ImageStateViolation(&'static str),

    #[error("Tried to store {len} bytes in a {size} byte buffer")]
    BufferOverflow { size: u64, len: u64 },

    #[error("Capture holds {actual} bytes, {width}x{height} RGBA needs {expected}")]
    CaptureSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Failed to write capture: {0}")]
    Image(#[from] image::ImageError),

    #[error("Renderer has been shut down")]
    ShutDown,
}

impl RenderError {
    /// True when the device can no longer be trusted to make progress.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            RenderError::FenceTimeout(_)
                | RenderError::Vulkan {
                    result: vk::Result::ERROR_DEVICE_LOST,
                    ..
                }
        )
    }
}

impl From<raw_window_handle::HandleError> for RenderError {
    fn from(err: raw_window_handle::HandleError) -> Self {
        RenderError::Window(err.to_string())
    }
}

/// Attaches the name of the Vulkan entry point to a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn call(self, call: &'static str) -> Result<T, RenderError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn call(self, call: &'static str) -> Result<T, RenderError> {
        self.map_err(|result| RenderError::Vulkan { call, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_error_names_the_call() {
        let result: Result<(), vk::Result> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = result.call("vkQueueSubmit").unwrap_err();
        assert!(matches!(
            err,
            RenderError::Vulkan {
                call: "vkQueueSubmit",
                result: vk::Result::ERROR_DEVICE_LOST
            }
        ));
        assert!(err.to_string().contains("vkQueueSubmit"));
        assert!(err.is_device_lost());
    }

    #[test]
    fn test_fence_timeout_display() {
        let err = RenderError::FenceTimeout(std::time::Duration::from_millis(250));
        assert!(err.to_string().contains("250ms"));
        assert!(err.is_device_lost());
        assert!(!RenderError::ShutDown.is_device_lost());
    }
}
