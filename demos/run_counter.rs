use json_filestore::FileStore;
use std::time::Duration;

fn main() -> Result<(), json_filestore::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::temp_dir().join("json_filestore_run_counter.json");
    let store = FileStore::builder(&path)
        .min_save_interval(Duration::from_secs(1))
        .max_backups(3)
        .build()?;

    // get a value with a default, bump it; the write happens in the background
    let runs = store.get_or("number_of_runs", 0).as_u64().unwrap_or(0) + 1;
    store.set("number_of_runs", runs);
    println!("This demo has run {runs} time(s)");

    store.flush()?;
    println!("stats: {:?}", store.stats());
    Ok(())
}
