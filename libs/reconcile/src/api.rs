//! Remote API client interface.
//!
//! The reconciler treats the cloud API as an opaque RPC service. A
//! client is passed explicitly into every reconciler operation.

use async_trait::async_trait;
use provis_id::{ClientToken, ResourceHandle};

use crate::error::ApiError;
use crate::kind::ResourceKind;

/// Options for deleting a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Ask the remote to also terminate dependent sub-resources
    /// (e.g. the instances of a fleet).
    pub terminate_sub_resources: bool,

    /// Wait until the sub-resource count reaches zero.
    pub wait_for_sub_resource_cleanup: bool,

    /// Wait until the object reads as gone or as deleted.
    pub wait_for_deletion: bool,
}

impl DeleteOptions {
    /// Terminate sub-resources and wait for them to drain.
    pub fn with_cleanup() -> Self {
        Self {
            terminate_sub_resources: true,
            wait_for_sub_resource_cleanup: true,
            wait_for_deletion: false,
        }
    }
}

/// Remote API client for one resource kind.
#[async_trait]
pub trait RemoteApi<K: ResourceKind>: Send + Sync {
    /// Create an object. Repeating a call with the same `token` must not
    /// create a second object.
    async fn create(
        &self,
        token: &ClientToken,
        request: &K::Request,
    ) -> Result<(ResourceHandle, K::Object), ApiError>;

    /// Fetch the current object.
    async fn read(&self, handle: &ResourceHandle) -> Result<K::Object, ApiError>;

    /// Apply a partial update.
    async fn update(&self, handle: &ResourceHandle, patch: &K::Patch)
        -> Result<K::Object, ApiError>;

    /// Delete the object.
    async fn delete(&self, handle: &ResourceHandle, opts: &DeleteOptions) -> Result<(), ApiError>;

    /// Number of live dependent sub-resources.
    async fn sub_resource_count(&self, handle: &ResourceHandle) -> Result<usize, ApiError> {
        let _ = handle;
        Ok(0)
    }
}
