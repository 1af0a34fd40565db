//! A script used to generate the CRDs used by this project.
//!
//! Any time a CRD spec changes, this script can be run to ensure that the CRDs are up-to-date and
//! ready to be synced with the cluster.

use anyhow::{Context, Result};
use kube::CustomResourceExt;
use kvm_core::crd::KVMConfig;

fn main() -> Result<()> {
    let canon = std::fs::canonicalize("..").context("error getting canonical path of current dir")?;
    let crds_path = canon.join("helm").join("crds");
    std::fs::create_dir_all(&crds_path).with_context(|| format!("error creating {:?}", &crds_path))?;

    let kvmconfig = KVMConfig::crd();
    let kvmconfig_yaml = serde_yaml::to_string(&kvmconfig).context("error serializing KVMConfig CRD to yaml")?;
    std::fs::write(crds_path.join("kvmconfig.yaml"), &kvmconfig_yaml).with_context(|| format!("error writing KVMConfig CRD to {:?}", &crds_path))?;
    println!("KVMConfig CRD written to {:?}", &crds_path);

    Ok(())
}
