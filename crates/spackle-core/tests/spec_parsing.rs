use spackle_core::compiler::CompilerConstraint;
use spackle_core::predicate::Predicate;
use spackle_core::spec::Spec;
use spackle_core::variant::VariantValue;
use spackle_core::version::VersionConstraint;

#[test]
fn test_builder_matches_parser() {
    let built = Spec::new("hdf5")
        .with_versions(VersionConstraint::parse("1.12:").unwrap())
        .with_variant("mpi", VariantValue::Bool(true))
        .with_compiler(CompilerConstraint::parse("gcc@12").unwrap())
        .with_platform("linux-x86_64")
        .with_dependency(Spec::parse("zlib@1.2.13").unwrap());
    let parsed = Spec::parse("hdf5@1.12: +mpi %gcc@12 arch=linux-x86_64 ^zlib@1.2.13").unwrap();
    assert_eq!(built, parsed);
}

#[test]
fn test_display_is_canonical() {
    let a = Spec::parse("app ~shared+debug ^zlib ^cmake@3:").unwrap();
    let b = Spec::parse("app+debug ~shared ^cmake@3:^zlib").unwrap();
    assert_eq!(a.to_string(), "app +debug ~shared ^cmake@3: ^zlib");
    assert_eq!(a.to_string(), b.to_string());
}

#[test]
fn test_display_reparses_to_same_spec() {
    for text in [
        "a",
        "a@1.0",
        "a@=1.0 build_type=release langs=c,fortran",
        "a %clang@16: arch=darwin ^b +x ^c@:2",
    ] {
        let spec = Spec::parse(text).unwrap();
        assert_eq!(Spec::parse(&spec.to_string()).unwrap(), spec, "{text}");
    }
}

#[test]
fn test_nested_pins_are_flattened() {
    let spec = Spec::new("a").with_dependency(
        Spec::new("b").with_dependency(Spec::new("c").with_dependency(Spec::new("d"))),
    );
    let names: Vec<&str> = spec.pins().iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["b", "c", "d"]);
    assert_eq!(spec.flattened().dependencies.len(), 3);
}

#[test]
fn test_spec_serde_as_string() {
    let spec = Spec::parse("mpich@4: +fortran").unwrap();
    let json = serde_json::to_string(&spec).unwrap();
    assert_eq!(json, "\"mpich@4: +fortran\"");
    let back: Spec = serde_json::from_str(&json).unwrap();
    assert_eq!(back, spec);
}

#[test]
fn test_predicate_text_forms() {
    let p = Predicate::parse("@2.0: and (+mpi or %gcc@12) and not arch=darwin").unwrap();
    match p {
        Predicate::All(items) => {
            assert_eq!(items.len(), 3);
            assert!(matches!(items[1], Predicate::Any(_)));
            assert!(matches!(items[2], Predicate::Not(_)));
        }
        other => panic!("expected conjunction, got {other:?}"),
    }
}

#[test]
fn test_parse_error_mentions_input() {
    let err = Spec::parse("zlib@1.2 ^").unwrap_err();
    assert!(err.to_string().contains("zlib@1.2 ^"));
}
