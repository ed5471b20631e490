use std::fmt;

/// Fatal startup failures.
///
/// These travel inside `anyhow::Error`; callers that need to tell them apart
/// use `err.downcast_ref::<PublisherError>()`. None of them is retried.
#[derive(Debug)]
pub enum PublisherError {
    /// Missing or invalid parameters (geometry, frame rate, region names).
    Configuration(String),
    /// The camera could not be opened or negotiated a different format.
    DeviceOpen { device: String, reason: String },
    /// A shared memory region could not be created or mapped.
    ResourceAllocation { name: String, source: std::io::Error },
    /// A preview window was requested but cannot be shown.
    PreviewUnavailable(String),
}

impl PublisherError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        PublisherError::Configuration(msg.into())
    }

    pub fn device_open(device: impl Into<String>, reason: impl fmt::Display) -> Self {
        PublisherError::DeviceOpen {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for PublisherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublisherError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            PublisherError::DeviceOpen { device, reason } => {
                write!(f, "could not open camera {device}: {reason}")
            }
            PublisherError::ResourceAllocation { name, source } => {
                write!(f, "failed to create shared memory '{name}': {source}")
            }
            PublisherError::PreviewUnavailable(msg) => write!(f, "preview unavailable: {msg}"),
        }
    }
}

impl std::error::Error for PublisherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PublisherError::ResourceAllocation { source, .. } => Some(source),
            _ => None,
        }
    }
}
