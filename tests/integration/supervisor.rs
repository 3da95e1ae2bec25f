// SPDX-License-Identifier: Apache-2.0 OR MIT
//! The daemon event loop against the in-memory kernel backend

use pim_mfc::config::{Config, KernelBackend};
use pim_mfc::logging::Logger;
use pim_mfc::supervisor;
use std::time::Duration;

fn memory_config() -> Config {
    Config {
        kernel: KernelBackend::Memory,
        ..Config::default()
    }
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let (logger, log) = Logger::memory();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let daemon = tokio::spawn(supervisor::run(memory_config(), logger, shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert!(log.contains("shutdown requested"));
    assert!(log.contains("RPF cache"));
}

#[tokio::test]
async fn test_run_rejects_invalid_config() {
    let config = Config {
        default_output_ttl: 0,
        ..memory_config()
    };
    let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    assert!(supervisor::run(config, Logger::null(), shutdown_rx)
        .await
        .is_err());
}
