//! KVM operator CRDs.
//!
//! References:
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/#additional-printer-columns

mod kvmconfig;

use kube::Resource;

pub use kvmconfig::{KVMConfig, KVMConfigSpec, KVMConfigStatus, KvmSpec, NetworkSpec, NodeDescriptor, NodeRole, StorageType};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The namespace of this object.
    fn namespace(&self) -> &str;

    /// The name of this object.
    fn name(&self) -> &str;

    /// Check if this object has been marked for deletion.
    fn is_deleted(&self) -> bool;
}

impl RequiredMetadata for KVMConfig {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    fn is_deleted(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }
}
