use json_filestore::{Document, FileStore};
use serde_json::json;
use std::time::Duration;

fn main() -> Result<(), json_filestore::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::temp_dir().join("json_filestore_demo_builder.json");

    let mut seed = Document::new();
    seed.insert("status".into(), json!("fresh"));

    // compact JSON, fast pacing, one backup
    let store = FileStore::builder(&path)
        .default_object(seed)
        .pretty(false)
        .min_save_interval(Duration::from_millis(100))
        .max_backups(1)
        .on_error(|err| eprintln!("write failed: {err}"))
        .build()?;

    store.update(|doc| {
        doc.insert("name".into(), json!("json-filestore"));
        doc.insert("version".into(), json!("0.1.0"));
        doc.insert("status".into(), json!("written"));
    });
    store.on_flush(|| println!("on_flush: disk caught up"));
    store.flush()?;

    let contents = std::fs::read_to_string(store.path())?;
    println!("On-disk JSON:\n{contents}");
    println!("\nDebug output: {store:?}");

    drop(store);
    for p in [
        path.clone(),
        std::path::PathBuf::from(format!("{}.0.bak", path.display())),
    ] {
        let _ = std::fs::remove_file(p);
    }
    Ok(())
}
