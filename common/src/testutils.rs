/// Creates a scratch directory shaped like a small artifact store:
///
/// ```text
/// store
/// |- readme.txt
/// |- dist
///    |- app-1.0.zip
///    |- app-1.1.zip
///    |- notes.txt
/// |- lib
///    |- core-2.0.jar
/// ```
pub async fn setup_test_dir() -> anyhow::Result<tempfile::TempDir> {
    let tmp_dir = tempfile::tempdir()?;
    let store = tmp_dir.path().join("store");
    tokio::fs::create_dir(&store).await?;
    tokio::fs::write(store.join("readme.txt"), "store").await?;
    let dist = store.join("dist");
    tokio::fs::create_dir(&dist).await?;
    tokio::fs::write(dist.join("app-1.0.zip"), "app 1.0").await?;
    tokio::fs::write(dist.join("app-1.1.zip"), "app 1.1").await?;
    tokio::fs::write(dist.join("notes.txt"), "notes").await?;
    let lib = store.join("lib");
    tokio::fs::create_dir(&lib).await?;
    tokio::fs::write(lib.join("core-2.0.jar"), "core").await?;
    Ok(tmp_dir)
}

/// Payload of `len` bytes that is easy to verify after a transfer
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
