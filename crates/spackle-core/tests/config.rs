use spackle_core::config::{PolicyConfig, DEFAULT_PLATFORM};
use spackle_core::variant::VariantValue;

#[test]
fn test_policy_parse_from_toml() {
    let toml = r#"
platform = "linux-x86_64"

[all]
compilers = ["gcc@12", "clang"]
providers = { mpi = ["openmpi", "mpich"] }

[packages.hdf5]
versions = ["1.12", "1.10:"]
variants = "+shared ~mpi"
"#;
    let config = PolicyConfig::from_toml_str(toml).unwrap();
    assert_eq!(config.platform, "linux-x86_64");
    assert_eq!(config.all.compilers.len(), 2);
    assert_eq!(config.all.compilers[1].name, "clang");
    assert_eq!(config.all.providers["mpi"], ["openmpi", "mpich"]);
    let hdf5 = &config.packages["hdf5"];
    assert_eq!(hdf5.versions[0].to_string(), "1.12");
    assert_eq!(hdf5.variants.variants["shared"], VariantValue::Bool(true));
    assert_eq!(hdf5.variants.variants["mpi"], VariantValue::Bool(false));
}

#[test]
fn test_policy_default_platform() {
    let config = PolicyConfig::default();
    assert_eq!(config.platform, DEFAULT_PLATFORM);
    assert!(config.all.compilers.is_empty());
    assert!(config.packages.is_empty());
}

#[test]
fn test_policy_load_missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = PolicyConfig::load(&dir.path().join("policy.toml")).unwrap();
    assert_eq!(config, PolicyConfig::default());
}

#[test]
fn test_policy_load_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.toml");
    std::fs::write(&path, "platform = \"darwin-aarch64\"\n").unwrap();
    let config = PolicyConfig::load(&path).unwrap();
    assert_eq!(config.platform, "darwin-aarch64");
}

#[test]
fn test_policy_rejects_bad_constraint_text() {
    let toml = r#"
[packages.zlib]
versions = ["1..2"]
"#;
    assert!(PolicyConfig::from_toml_str(toml).is_err());
}

#[test]
fn test_policy_round_trips_through_toml() {
    let config = PolicyConfig::default()
        .with_platform("linux")
        .prefer_compiler("gcc@12:")
        .unwrap()
        .prefer_provider("blas", "openblas")
        .prefer_version("zlib", "1.2")
        .unwrap()
        .prefer_variants("zlib", "+optimize")
        .unwrap();
    let text = config.to_toml().unwrap();
    assert_eq!(PolicyConfig::from_toml_str(&text).unwrap(), config);
}
