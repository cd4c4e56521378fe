//! End to end: queue -> worker -> catalog with real `dd` on a file-backed
//! device. Positioning and exchanger commands are replaced by `/bin/true`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tape_library::catalog::{CartridgeStatus, TapeCartridge, TapeCatalogService, TapeLocation};
use tape_library::pool::LibraryRegistry;
use tape_library::process::CommandExecutor;
use tape_library::queue::{OrderQueue, OrderStatus, QueueRepository, ReadOrder, WriteOrder};
use tape_library::store::SqliteStore;
use tape_library::worker::start_pool_workers;
use tape_library::TapeLibraryConfiguration;
use uuid::Uuid;

async fn wait_for(queue: &QueueRepository, id: Uuid) -> OrderStatus {
    for _ in 0..500 {
        if let Some(outcome) = queue.outcome(id).unwrap() {
            if outcome.status.is_terminal() {
                return outcome.status;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("order {} never completed", id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_then_read_through_worker() {
    if !Path::new("/bin/dd").exists() || !Path::new("/bin/true").exists() {
        eprintln!("/bin/dd or /bin/true not available, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(input.join("report.pdf"), b"archived content").unwrap();
    let device = dir.path().join("nst0.img");

    let config = TapeLibraryConfiguration::from_toml_str(&format!(
        r#"
input_directory = "{input}"
output_directory = "{output}"
catalog_file = "{catalog}"
poll_interval_ms = 20

[topology]
objects = "lib-a"

[libraries.lib-a.robot]
device = "/dev/sg0"
exchanger_tool = "/bin/true"

[[libraries.lib-a.drives]]
index = 0
device = "{device}"
positioning_tool = "/bin/true"
"#,
        input = input.display(),
        output = output.display(),
        catalog = dir.path().join("catalog.db").display(),
        device = device.display(),
    ))
    .unwrap();

    let store = Arc::new(SqliteStore::open(&config.catalog_file).unwrap());
    let catalog = Arc::new(TapeCatalogService::new(store.clone()));
    let queue = Arc::new(QueueRepository::new(store));
    let registry =
        LibraryRegistry::from_config(&config, Arc::new(CommandExecutor::new(false))).unwrap();

    catalog
        .add_cartridge(TapeCartridge::new("T001L6", "lib-a", TapeLocation::Slot(1)))
        .unwrap();

    let pool = registry.pool("lib-a").unwrap();
    let workers = start_pool_workers(&pool, queue.clone(), catalog.clone(), &config).unwrap();
    assert_eq!(workers.len(), 1);

    let write = WriteOrder::new("lib-a", "objects", "report.pdf", "report");
    let write_id = write.id;
    assert!(queue.add(&write.into()).unwrap());
    assert_eq!(wait_for(&queue, write_id).await, OrderStatus::Ok);

    let tape = catalog.get_cartridge("T001L6").unwrap();
    assert_eq!(tape.status, CartridgeStatus::Mounted);
    assert_eq!(tape.current_location, TapeLocation::Drive(0));
    assert_eq!(tape.file_count, 2);
    assert!(tape.label.is_some());
    assert_eq!(workers[0].current_tape().as_deref(), Some("T001L6"));

    let read = ReadOrder::new("lib-a", "objects", vec!["report".to_string()]);
    let read_id = read.id;
    queue.add(&read.into()).unwrap();
    assert_eq!(wait_for(&queue, read_id).await, OrderStatus::Ok);
    assert_eq!(std::fs::read(output.join("report")).unwrap(), b"archived content");

    let missing = ReadOrder::new("lib-a", "objects", vec!["unknown".to_string()]);
    let missing_id = missing.id;
    queue.add(&missing.into()).unwrap();
    assert_eq!(wait_for(&queue, missing_id).await, OrderStatus::Ko);

    for worker in &workers {
        assert!(worker.stop_timeout(Duration::from_secs(5)).await);
        assert!(!worker.is_running());
    }
    assert_eq!(workers[0].last_result().unwrap().order_id, missing_id);
}
