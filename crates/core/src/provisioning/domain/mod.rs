pub mod asset_provisioner;
