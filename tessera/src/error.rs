use crate::vk;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
    #[error("device lost")]
    DeviceLost,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("failed to create pipeline")]
    PipelineCreation(#[source] vk::Result),
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),
}

impl From<vk::Result> for Error {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Error::DeviceLost,
            vk::Result::TIMEOUT => Error::Timeout("GPU"),
            other => Error::Vulkan(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Generic error categories reported to the API frontend.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrontendError {
    OutOfMemory,
    InvalidOperation,
    ContextLost,
}

impl Error {
    /// Maps this error to the generic category reported by the hosting API layer.
    pub fn frontend_error(&self) -> FrontendError {
        match self {
            Error::DeviceLost => FrontendError::ContextLost,
            Error::Vulkan(result) | Error::PipelineCreation(result) => match *result {
                vk::Result::ERROR_OUT_OF_HOST_MEMORY
                | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
                | vk::Result::ERROR_TOO_MANY_OBJECTS
                | vk::Result::ERROR_OUT_OF_POOL_MEMORY
                | vk::Result::ERROR_FRAGMENTED_POOL => FrontendError::OutOfMemory,
                _ => FrontendError::InvalidOperation,
            },
            Error::Timeout(_) | Error::InvalidOperation(_) => FrontendError::InvalidOperation,
        }
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, Error::DeviceLost)
    }
}
