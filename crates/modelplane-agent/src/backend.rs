//! The local inference backend `LocalStateManager` and `ReverseProxy` front.
//!
//! Actual inference compute is out of scope; `ModelBackend`
//! is the seam a real backend client (Triton, a custom runtime) plugs into.

use modelplane_types::{ControlPlaneError, ControlPlaneResult, ModelName};

#[tonic::async_trait]
pub trait ModelBackend: Send + Sync {
    /// Loads `name` into the backend, returning the memory it actually
    /// occupies once resident.
    async fn load(&self, name: &ModelName) -> ControlPlaneResult<u64>;

    /// Unloads `name`, freeing its backend-resident memory.
    async fn unload(&self, name: &ModelName) -> ControlPlaneResult<()>;
}

/// A backend stub for tests and for standing the agent up without a real
/// inference runtime behind it: loads always succeed immediately and
/// report the requested memory size back unchanged.
pub struct NullBackend;

#[tonic::async_trait]
impl ModelBackend for NullBackend {
    async fn load(&self, _name: &ModelName) -> ControlPlaneResult<u64> {
        Ok(0)
    }

    async fn unload(&self, _name: &ModelName) -> ControlPlaneResult<()> {
        Ok(())
    }
}

/// A backend stub that always fails to load, for exercising
/// `LocalStateManager`'s `LoadFailed` path.
pub struct AlwaysFailingBackend;

#[tonic::async_trait]
impl ModelBackend for AlwaysFailingBackend {
    async fn load(&self, name: &ModelName) -> ControlPlaneResult<u64> {
        Err(ControlPlaneError::Unavailable(format!("backend refused to load {name}")))
    }

    async fn unload(&self, _name: &ModelName) -> ControlPlaneResult<()> {
        Ok(())
    }
}
