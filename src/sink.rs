use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{error, info};

use crate::wire::file_record::FileRecord;

/// Where assembled inbound messages go once the receive pipeline has
///  verified them. The engine only ever sees this port; what happens to the
///  bytes (print, save, collect in a test) is the driver's business.
///
/// Passed around as `Arc<dyn DeliverySink>` to keep the receive pipeline
///  decoupled from the delivery strategy.
#[async_trait::async_trait]
pub trait DeliverySink: Send + Sync {
    async fn on_text(&self, text: String, from: SocketAddr);

    async fn on_file(&self, file: FileRecord, from: SocketAddr);
}

/// The driver's sink: text goes to stdout, files are saved under the
///  configured receive directory (created on demand).
pub struct FsSink {
    recv_dir: Mutex<PathBuf>,
}

impl FsSink {
    pub fn new(recv_dir: PathBuf) -> FsSink {
        FsSink {
            recv_dir: Mutex::new(recv_dir),
        }
    }

    pub fn set_recv_dir(&self, dir: PathBuf) {
        info!(?dir, "receive directory set");
        *self.recv_dir.lock().unwrap() = dir;
    }

    pub fn recv_dir(&self) -> PathBuf {
        self.recv_dir.lock().unwrap().clone()
    }

    async fn save(&self, file: &FileRecord) -> std::io::Result<PathBuf> {
        let dir = self.recv_dir();
        tokio::fs::create_dir_all(&dir).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o777)).await?;
        }

        // the transmitted name may contain path components - keep only the
        //  final one, the peer does not get to choose directories here
        let name = Path::new(&file.name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "unnamed".into());

        let path = dir.join(name);
        tokio::fs::write(&path, &file.content).await?;
        Ok(path)
    }
}

#[async_trait::async_trait]
impl DeliverySink for FsSink {
    async fn on_text(&self, text: String, from: SocketAddr) {
        info!(?from, bytes = text.len(), "text message delivered");
        println!("{}", text);
    }

    async fn on_file(&self, file: FileRecord, from: SocketAddr) {
        match self.save(&file).await {
            Ok(path) => {
                info!(?from, ?path, bytes = file.content.len(), "file saved");
                println!("received file {}", path.display());
            }
            Err(e) => {
                error!(name = %file.name, "error file saving: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tcu-sink-test-{}-{}", tag, std::process::id()))
    }

    #[tokio::test]
    async fn test_file_saved_byte_identical() {
        let dir = scratch_dir("save");
        let sink = FsSink::new(dir.clone());

        let content = Bytes::from((0u8..=255).collect::<Vec<_>>());
        let record = FileRecord::new("payload.bin", content.clone()).unwrap();
        let path = sink.save(&record).await.unwrap();

        assert_eq!(path, dir.join("payload.bin"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), content.to_vec());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_transmitted_path_components_stripped() {
        let dir = scratch_dir("strip");
        let sink = FsSink::new(dir.clone());

        let record = FileRecord::new("../../evil.txt", Bytes::from_static(b"x")).unwrap();
        let path = sink.save(&record).await.unwrap();

        assert_eq!(path, dir.join("evil.txt"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
