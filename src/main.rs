use std::process::ExitCode;
use std::sync::Arc;

use tcu::driver::Driver;
use tcu::engine::config::EngineConfig;
use tcu::engine::TcuEngine;
use tcu::logbuf;
use tcu::sink::FsSink;

#[tokio::main]
async fn main() -> ExitCode {
    let log = logbuf::init();

    let config = EngineConfig::default();
    let sink = Arc::new(FsSink::new(config.recv_dir.clone()));
    let engine = TcuEngine::new(config, sink.clone());

    let mut driver = Driver::new(engine, sink, log);
    match driver.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
