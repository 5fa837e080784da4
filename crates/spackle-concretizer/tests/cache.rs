use std::sync::Arc;

use spackle_concretizer::{
    CacheStats, Concretizer, InMemoryCatalog, NoPreferences, UnsatisfiableError,
};
use spackle_core::{DepTypes, PackageDefinition, Spec};

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_compiler("gcc@12.2.0")
        .unwrap()
        .with_package(
            PackageDefinition::new("app")
                .versions(&["1.0", "2.0"])
                .unwrap()
                .depends_on("zlib@1.2:", "", DepTypes::default())
                .unwrap(),
        )
        .with_package(PackageDefinition::new("zlib").versions(&["1.2.13", "1.3"]).unwrap())
}

#[test]
fn test_cached_requests_share_one_graph() {
    let catalog = catalog();
    let concretizer = Concretizer::new(&catalog, &NoPreferences);

    let first = concretizer
        .concretize_cached(&Spec::parse("app ^zlib@1.2").unwrap())
        .unwrap();
    let built = Spec::new("app").with_dependency(Spec::parse("zlib@1.2").unwrap());
    let second = concretizer.concretize_cached(&built).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other = concretizer
        .concretize_cached(&Spec::parse("app@1.0").unwrap())
        .unwrap();
    assert_ne!(other.fingerprint(), first.fingerprint());

    assert_eq!(
        concretizer.cache().stats(),
        CacheStats {
            hits: 1,
            misses: 2,
            entries: 2
        }
    );
}

#[test]
fn test_failures_are_not_cached() {
    let catalog = catalog();
    let concretizer = Concretizer::new(&catalog, &NoPreferences);
    let request = Spec::parse("app@3.0").unwrap();

    assert!(concretizer.concretize_cached(&request).is_err());
    assert!(concretizer.concretize_cached(&request).is_err());
    assert!(concretizer.cache().is_empty());
    assert_eq!(concretizer.cache().stats().misses, 2);
}

#[test]
fn test_concretize_all_keeps_request_order() {
    let catalog = catalog();
    let concretizer = Concretizer::new(&catalog, &NoPreferences);
    let requests: Vec<Spec> = ["app", "zlib", "app@1.0", "nothing", "zlib@1.2", "app ^zlib@1.2"]
        .iter()
        .map(|s| Spec::parse(s).unwrap())
        .collect();

    let results = concretizer.concretize_all(&requests);
    assert_eq!(results.len(), requests.len());
    for (request, result) in requests.iter().zip(&results) {
        match result {
            Ok(concretization) => {
                assert_eq!(concretization.spec.root().name, request.name);
                let single = concretizer.concretize(request).unwrap();
                assert_eq!(single.fingerprint(), concretization.fingerprint());
            }
            Err(err) => {
                assert_eq!(request.name, "nothing");
                assert!(matches!(err, UnsatisfiableError::UnknownPackage { .. }));
            }
        }
    }
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    assert!(concretizer.concretize_all(&[]).is_empty());
}
