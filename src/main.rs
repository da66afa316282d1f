use arbor::{Database, Options};
use tracing_subscriber::EnvFilter;

fn main() -> arbor::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,arbor=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    println!("Arbor - A disk-backed B-tree key-value store");
    println!("============================================\n");

    // Use a throwaway directory for the demonstration
    let dir = std::env::temp_dir().join("arbor-demo");
    std::fs::remove_dir_all(&dir).ok();

    let options = Options::builder().pool_size(16).min_degree(3).build();
    let db = Database::open(&dir, options)?;
    println!("Opened database in: {}", dir.display());
    println!("Largest value accepted: {} bytes\n", db.max_value_len());

    for key in 1..=20 {
        db.put(key, format!("value-{}", key).as_bytes())?;
    }
    db.put(7, b"seven")?;
    db.delete(13)?;
    println!("Inserted 20 keys, overwrote key 7, deleted key 13");

    println!("\nGet 7: {:?}", String::from_utf8_lossy(&db.get(7)?));
    match db.get(13) {
        Ok(_) => println!("Get 13: unexpectedly present"),
        Err(e) => println!("Get 13: {}", e),
    }

    println!("\nRange 10..=15:");
    for entry in db.range(10, 15) {
        let (key, value) = entry?;
        println!("  - {} => {:?}", key, String::from_utf8_lossy(&value));
    }

    let stats = db.verify()?;
    println!("\nTree stats:");
    println!("  - Height: {}", stats.height);
    println!("  - Nodes: {}", stats.num_nodes);
    println!("  - Keys: {}", stats.num_keys);

    db.close()?;

    // Reopen and check the data survived
    let db = Database::open(&dir, Options::default())?;
    println!("\nReopened, key 20 => {:?}", String::from_utf8_lossy(&db.get(20)?));
    db.close()?;

    std::fs::remove_dir_all(&dir).ok();
    println!("\nDemo completed successfully!");
    Ok(())
}
