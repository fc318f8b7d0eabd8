use std::path::{Path, PathBuf};

use tokio::{
    fs::{self, File},
    io::{self, AsyncWriteExt},
};

/// Replaces the contents of `path` so that readers see either the old or the new bytes, never a
/// mix. Data is written into a sibling temporary file, synced, and renamed over the target.
pub async fn replace_file(path: &Path, contents: &[u8]) -> Result<(), io::Error> {
    let temporary = temporary_path(path);
    let mut file = File::create(&temporary).await?;
    let written = async {
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);

    if let Err(e) = written {
        let _ = fs::remove_file(&temporary).await;
        return Err(e);
    }

    fs::rename(&temporary, path).await
}

/// Reads a file, treating a missing one as empty.
pub async fn read_or_empty(path: &Path) -> Result<Vec<u8>, io::Error> {
    match fs::read(path).await {
        Ok(v) => Ok(v),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(vec![]),
        Err(e) => Err(e),
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|v| v.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
