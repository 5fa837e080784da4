use spackle_core::version::{Version, VersionConstraint};

fn v(s: &str) -> Version {
    Version::parse(s).unwrap()
}

fn c(s: &str) -> VersionConstraint {
    VersionConstraint::parse(s).unwrap()
}

#[test]
fn test_sorting_mixed_versions() {
    let mut versions = vec![v("2.0"), v("develop"), v("1.10"), v("1.2"), v("1.2.1"), v("1.2rc1")];
    versions.sort();
    let sorted: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
    assert_eq!(sorted, ["1.2", "1.2rc1", "1.2.1", "1.10", "2.0", "develop"]);
}

#[test]
fn test_case_insensitive_markers() {
    assert_eq!(v("Develop"), v("develop"));
    assert!(v("MAIN") > v("100"));
}

#[test]
fn test_sibling_ranges_narrow_to_intersection() {
    let narrowed = c("1.0:1.5").intersect(&c("1.2:2.0"));
    assert_eq!(narrowed.to_string(), "1.2:1.5");
    assert!(narrowed.contains(&v("1.3")));
    assert!(narrowed.contains(&v("1.5.9")));
    assert!(!narrowed.contains(&v("1.1")));
}

#[test]
fn test_intersection_is_commutative() {
    let pairs = [("1.0:1.5", "1.2:2.0"), (":1.5", "1.5.2:"), ("=1.3", "1:2"), ("2.0:", "1.0")];
    for (a, b) in pairs {
        assert_eq!(c(a).intersect(&c(b)), c(b).intersect(&c(a)), "{a} ∩ {b}");
    }
}

#[test]
fn test_disjoint_intersection_is_empty_not_error() {
    let empty = c("2.0:").intersect(&c("1.0"));
    assert!(empty.is_empty());
    assert_eq!(empty.to_string(), "(empty)");
    assert!(empty.intersect(&c(":")).is_empty());
}

#[test]
fn test_constraint_serde_as_string() {
    #[derive(serde::Serialize, serde::Deserialize)]
    struct Holder {
        versions: VersionConstraint,
    }
    let h: Holder = toml::from_str("versions = \"1.2:1.4\"").unwrap();
    assert_eq!(h.versions, c("1.2:1.4"));
    let out = toml::to_string(&h).unwrap();
    assert!(out.contains("\"1.2:1.4\""));
    assert!(toml::from_str::<Holder>("versions = \"\"").is_err());
}
