//! Provision a tenant's stash end to end against the in-memory store.
//!
//! Run with: `cargo run --example provision_demo`
//!
//! - Generates stash parameters and a deployment key plus CA certificate
//! - Commits them into the project document as one unit
//! - Issues a temporary URL a booting VM could fetch the key from

use std::sync::Arc;

use cryptostash::document;
use cryptostash::tempurl::provision_temp_url_key;
use cryptostash::{
    CryptoStash, MasterSecret, MemoryObjectStore, StashConfig, StashItem, StashTransaction,
};
use serde_json::json;
use url::Url;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // 1. Setup. In production the secret comes from `MasterSecret::load`.
    let master = Arc::new(MasterSecret::from_bytes(vec![0x5a; 32])?);
    let config = StashConfig::default();
    let store = MemoryObjectStore::new();
    let container = config.container_for("demo-tenant");

    let mut stash = CryptoStash::new(&store, container.clone(), master, config)?;
    stash.init_params(None)?;

    // 2. Create the items as one unit.
    let mut txn = StashTransaction::begin(&stash);
    let key = txn.create_private_key()?;
    let cert = txn.create_x509_cert(&key, "demo-tenant deployment", 365)?;
    let doc = json!({
        "stash": stash.params(),
        "deploy_key": key.metadata(),
        "deploy_cert": cert.metadata(),
    });
    txn.commit_document("project-config", &doc)?;

    println!("Stored objects in {}:", container);
    for name in store.object_names(&container) {
        println!("  {}", name);
    }
    println!("Public key: {}", key.ssh_public_key(Some("demo-tenant"))?);
    println!("Fingerprint: {}", key.fingerprint(":")?);

    // 3. Reload through the document and hand out a temporary URL.
    let saved: serde_json::Value =
        document::load(&store, &container, "project-config")?.ok_or("document missing")?;
    let metadata = cryptostash::ItemMetadata::from_value(&saved["deploy_key"])?;
    let reloaded = stash.load_private_key(&metadata)?;

    let signer = provision_temp_url_key(&store, &container)?;
    let endpoint = Url::parse("https://cloud.example/swift/v1/AUTH_demo")?;
    println!("Temporary URL: {}", stash.temp_url(&reloaded, &signer, &endpoint)?);

    Ok(())
}
