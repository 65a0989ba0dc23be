use kube::CustomResourceExt;
use std::fs;
use store_types::Store;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/store.platform_stores_crd.yaml",
        serde_yaml::to_string(&Store::crd()).unwrap(),
    )
    .unwrap();
}
