//! Error types for the level geometry engine
//!
//! Library operations return [`GeometryResult`]. Chunk data failures coming from the
//! world store are a separate [`ChunkError`] because the mesher recovers from them
//! locally and they never reach the facade's callers.

use std::fmt::Display;

/// Result type for level geometry operations
pub type GeometryResult<T> = Result<T, GeometryError>;

/// Errors raised by the geometry engine
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    #[error("GPU state has already been initialised without being destroyed")]
    AlreadyInitialized,

    #[error("GPU state has not been initialised")]
    NotInitialized,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("{operation} must run on the render thread")]
    WrongThread { operation: &'static str },

    #[error("GPU operation '{operation}' failed: {message}")]
    GpuOperationFailed { operation: String, message: String },

    #[error("Resource pack error: {message}")]
    ResourcePack { message: String },

    #[error("Failed to spawn thread '{name}': {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker pool could not be created: {message}")]
    WorkerPool { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors reported by the world store when chunk data is requested
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("Chunk {cx}, {cz} does not exist")]
    DoesNotExist { cx: i64, cz: i64 },

    #[error("Chunk {cx}, {cz} failed to load: {message}")]
    LoadFailed { cx: i64, cz: i64, message: String },
}

/// Create a GPU operation error
pub fn gpu_operation_error(operation: &str, error: impl Display) -> GeometryError {
    GeometryError::GpuOperationFailed {
        operation: operation.to_string(),
        message: error.to_string(),
    }
}

/// Create a resource pack error
pub fn resource_pack_error(message: impl Into<String>) -> GeometryError {
    GeometryError::ResourcePack {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = GeometryError::InvalidState {
            operation: "start",
            state: "uninitialized".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot start while uninitialized");

        let err = gpu_operation_error("create_geometry", "out of memory");
        assert_eq!(
            err.to_string(),
            "GPU operation 'create_geometry' failed: out of memory"
        );

        let err = ChunkError::LoadFailed {
            cx: 1,
            cz: -2,
            message: "corrupt".to_string(),
        };
        assert_eq!(err.to_string(), "Chunk 1, -2 failed to load: corrupt");
    }
}
