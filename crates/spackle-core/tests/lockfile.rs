use spackle_core::compiler::CompilerSpec;
use spackle_core::concrete::{ConcreteNode, ConcreteSpec, ConcreteSpecBuilder, DepEdge};
use spackle_core::lockfile::SpecLock;
use spackle_core::package::DepTypes;
use spackle_core::variant::VariantValue;
use spackle_core::version::Version;

fn graph() -> ConcreteSpec {
    let gcc = CompilerSpec::parse("gcc@13.1.0").unwrap();
    let node = |name: &str, version: &str| {
        ConcreteNode::new(name, Version::parse(version).unwrap(), gcc.clone(), "linux-x86_64")
    };
    let mut b = ConcreteSpecBuilder::new();
    b.add_node(node("hdf5", "1.14.1").with_variant("mpi", VariantValue::Bool(true)))
        .add_node(node("openmpi", "4.1.5"))
        .add_node(node("zlib", "1.2.13").with_variant("optimize", VariantValue::Bool(true)))
        .add_edge("hdf5", "openmpi", DepEdge::new(DepTypes::BUILD_LINK).with_virtual("mpi"))
        .add_edge("hdf5", "zlib", DepEdge::default())
        .add_edge("openmpi", "zlib", DepEdge::new(DepTypes::LINK))
        .set_root("hdf5");
    b.build().unwrap()
}

#[test]
fn test_lock_write_and_read_toml() {
    let spec = graph();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spack.lock");
    spec.to_lock().write_to(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[[node]]"));
    assert!(text.contains("deptypes = \"build,link\""));

    let lock = SpecLock::from_path(&path).unwrap();
    let rebuilt = ConcreteSpec::from_lock(&lock).unwrap();
    assert_eq!(rebuilt.fingerprint(), spec.fingerprint());
    assert_eq!(rebuilt.len(), 3);
}

#[test]
fn test_lock_write_and_read_json() {
    let spec = graph();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spack.lock.json");
    spec.to_lock().write_to(&path).unwrap();
    let lock = SpecLock::from_path(&path).unwrap();
    assert_eq!(lock.fingerprint, spec.fingerprint());
    assert_eq!(ConcreteSpec::from_lock(&lock).unwrap(), spec);
}

#[test]
fn test_missing_lock_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = SpecLock::from_path(&dir.path().join("absent.lock"));
    assert!(result.is_err());
}

#[test]
fn test_edited_edge_fingerprint_is_rejected() {
    let mut lock = graph().to_lock();
    let hdf5 = lock.nodes.iter_mut().find(|n| n.name == "hdf5").unwrap();
    hdf5.dependencies[0].fingerprint = "f".repeat(64);
    assert!(ConcreteSpec::from_lock(&lock).is_err());
}

#[test]
fn test_structurally_identical_graphs_share_fingerprints() {
    let a = graph();
    let b = ConcreteSpec::from_lock(&a.to_lock()).unwrap();
    for node in a.nodes() {
        assert_eq!(node.fingerprint, b.node(&node.name).unwrap().fingerprint);
    }
}
