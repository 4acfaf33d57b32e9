use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use cryptostash::{
    CryptoError, CryptoStash, MasterSecret, MemoryObjectStore, StashConfig, StashItemRef,
    StashParameters,
};

mod common;

fn reference(tail: &str) -> StashItemRef {
    StashItemRef::parse("stash", &format!("stash/{}", tail)).unwrap()
}

fn fixed_params() -> StashParameters {
    StashParameters::from_json(
        r#"{"version": 1, "salt": "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8="}"#,
    )
    .unwrap()
}

#[test]
fn password_is_deterministic_across_instances() {
    // Two independent stashes over the same secret and salt stand in for a
    // process restart.
    let store = MemoryObjectStore::new();
    let r = reference("00000000-0000-4000-8000-000000000000");

    let mut first = CryptoStash::new(&store, common::CONTAINER, common::master(), StashConfig::default()).unwrap();
    first.init_params(Some(fixed_params())).unwrap();
    let mut second = CryptoStash::new(&store, common::CONTAINER, common::master(), StashConfig::default()).unwrap();
    second.init_params(Some(fixed_params())).unwrap();

    let a = first.item_password(&r).unwrap();
    assert_eq!(a, first.item_password(&r).unwrap());
    assert_eq!(a, second.item_password(&r).unwrap());
}

#[test]
fn passwords_are_unique_per_reference() {
    let store = MemoryObjectStore::new();
    let stash = common::stash(&store);

    let mut seen = HashSet::new();
    for i in 0..1000 {
        let password = stash.item_password(&reference(&format!("item-{}", i))).unwrap();
        assert!(seen.insert(password.as_str().to_string()), "collision at {}", i);
    }
}

#[test]
fn different_salt_or_secret_changes_password() {
    let store = MemoryObjectStore::new();
    let r = reference("same");

    let a = common::stash(&store).item_password(&r).unwrap();
    let b = common::stash(&store).item_password(&r).unwrap();
    assert_ne!(a, b, "fresh stashes must get fresh salts");

    let other_master = Arc::new(MasterSecret::from_bytes(vec![0x43; 32]).unwrap());
    let mut c = CryptoStash::new(&store, common::CONTAINER, other_master, StashConfig::default()).unwrap();
    c.init_params(Some(fixed_params())).unwrap();
    let mut d = CryptoStash::new(&store, common::CONTAINER, common::master(), StashConfig::default()).unwrap();
    d.init_params(Some(fixed_params())).unwrap();
    assert_ne!(c.item_password(&r).unwrap(), d.item_password(&r).unwrap());
}

#[test]
fn password_is_base64_of_32_bytes() {
    let store = MemoryObjectStore::new();
    let password = common::stash(&store).item_password(&reference("x")).unwrap();
    // 32 bytes encode to 44 characters with one '=' of padding.
    assert_eq!(password.as_str().len(), 44);
    assert!(password.as_str().ends_with('='));
}

#[test]
fn short_salt_is_rejected() {
    let store = MemoryObjectStore::new();
    let mut stash = CryptoStash::new(&store, common::CONTAINER, common::master(), StashConfig::default()).unwrap();
    let params = StashParameters {
        version: 1,
        // 16 bytes once decoded.
        salt: "AAECAwQFBgcICQoLDA0ODw==".into(),
    };
    assert!(matches!(stash.init_params(Some(params)), Err(CryptoError::Config)));
    assert!(!stash.is_initialised());
}

#[test]
fn unknown_version_is_rejected() {
    let store = MemoryObjectStore::new();
    let mut stash = CryptoStash::new(&store, common::CONTAINER, common::master(), StashConfig::default()).unwrap();
    let mut params = fixed_params();
    params.version = 2;
    assert!(matches!(
        stash.init_params(Some(params)),
        Err(CryptoError::UnsupportedFormat(_))
    ));
}

#[test]
fn malformed_params_document_is_rejected() {
    assert!(matches!(
        StashParameters::from_json(r#"{"salt": "AAAA"}"#),
        Err(CryptoError::UnsupportedFormat(_))
    ));
}

#[test]
fn generated_params_round_trip_through_json() {
    let store = MemoryObjectStore::new();
    let stash = common::stash(&store);
    let json = stash.params().unwrap().to_json().unwrap();
    assert_eq!(&StashParameters::from_json(&json).unwrap(), stash.params().unwrap());
}

#[test]
fn master_secret_file_faults_render_generically() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "this is not base64!").unwrap();

    let err = MasterSecret::load(file.path()).unwrap_err();
    assert_eq!(err.to_string(), "crypto stash internal fault");
    assert!(!err.to_string().contains(&file.path().display().to_string()));
}
