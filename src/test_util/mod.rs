//! Utilities for testing TCU engines against each other. They are used for
//!  testing the engine itself, but they are also exported for application
//!  testing: a pair of engines wired up over loopback plus a sink that
//!  collects deliveries instead of printing or saving them.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::engine::config::EngineConfig;
use crate::engine::TcuEngine;
use crate::sink::DeliverySink;
use crate::wire::file_record::FileRecord;

/// A [DeliverySink] that keeps everything it is handed, for assertions.
#[derive(Default)]
pub struct CollectingSink {
    texts: Mutex<Vec<String>>,
    files: Mutex<Vec<FileRecord>>,
}

impl CollectingSink {
    pub fn new() -> Arc<CollectingSink> {
        Arc::new(CollectingSink::default())
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.files.lock().unwrap().clone()
    }

    /// polls until at least `count` texts arrived; false on timeout
    pub async fn wait_for_texts(&self, count: usize, timeout: Duration) -> bool {
        self.wait(timeout, || self.texts.lock().unwrap().len() >= count).await
    }

    pub async fn wait_for_files(&self, count: usize, timeout: Duration) -> bool {
        self.wait(timeout, || self.files.lock().unwrap().len() >= count).await
    }

    async fn wait(&self, timeout: Duration, done: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }
        done()
    }
}

#[async_trait::async_trait]
impl DeliverySink for CollectingSink {
    async fn on_text(&self, text: String, _from: SocketAddr) {
        self.texts.lock().unwrap().push(text);
    }

    async fn on_file(&self, file: FileRecord, _from: SocketAddr) {
        self.files.lock().unwrap().push(file);
    }
}

/// one engine on an ephemeral loopback port, together with its sink
pub async fn test_engine(config: EngineConfig) -> (TcuEngine, Arc<CollectingSink>) {
    let sink = CollectingSink::new();
    let engine = TcuEngine::new(config, sink.clone());
    let addr = engine.bind(0).await.expect("binding an ephemeral port");
    assert_ne!(addr.port(), 0);
    (engine, sink)
}

/// two engines on ephemeral loopback ports with their peers crossed,
///  ready for `connect`
pub async fn test_engine_pair(
    config_a: EngineConfig,
    config_b: EngineConfig,
) -> (TcuEngine, Arc<CollectingSink>, TcuEngine, Arc<CollectingSink>) {
    let (a, sink_a) = test_engine(config_a).await;
    let (b, sink_b) = test_engine(config_b).await;

    let port_a = a.local_addr().unwrap().port();
    let port_b = b.local_addr().unwrap().port();
    a.set_peer(SocketAddr::from(([127, 0, 0, 1], port_b)));
    b.set_peer(SocketAddr::from(([127, 0, 0, 1], port_a)));

    (a, sink_a, b, sink_b)
}
