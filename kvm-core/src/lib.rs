pub mod crd;
pub mod error;
pub mod versionbundle;

pub use error::ReconcileError;

/// The annotation stamped on every managed object, carrying the version bundle version of the
/// cluster which the object was reconciled for.
pub const VERSION_BUNDLE_ANNOTATION: &str = "kvm-operator.giantswarm.io/version-bundle-version";

/// The finalizer placed on `KVMConfig` objects while the operator still owns cluster resources.
pub const CLUSTER_FINALIZER: &str = "operatorkit.giantswarm.io/kvm-operator";
