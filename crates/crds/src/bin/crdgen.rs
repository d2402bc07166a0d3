//! Prints the ObjectHandler CRD manifest as YAML.

use crds::ObjectHandler;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&ObjectHandler::crd())?);
    Ok(())
}
