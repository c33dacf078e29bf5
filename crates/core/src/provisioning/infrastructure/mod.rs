pub mod download_provisioner;
