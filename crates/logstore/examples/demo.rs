//! Small end-to-end demo: open a store in a temp directory, append a few
//! pairs, read them back, print the counters.

use logstore::{FsyncPolicy, LogStore, StoreConfig};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let dir = tempfile::tempdir()?;
    let mut cfg = StoreConfig::new(dir.path(), "demo");
    cfg.ring_capacity = 256;
    cfg.fsync_policy = FsyncPolicy::EachBatch;

    let store = LogStore::open_cfg(&cfg)?;

    for i in 0..100u32 {
        let key = format!("key_{i:03}");
        let value = format!("value_{i:03}");
        store.append(key.as_bytes(), value.as_bytes())?;
    }

    let value = store.wait_visible(b"key_099", Duration::from_secs(2))?;
    println!("key_099 -> {}", String::from_utf8_lossy(&value));

    let sink = store.attach_line_sink()?;
    sink.write_line(b"demo log line")?;

    let stats = store.integrity_scan(false)?;
    println!("scan: {stats:?}");
    println!("metrics: {:?}", store.metrics());

    store.close();
    Ok(())
}
