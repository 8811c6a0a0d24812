//! Ties the TPROXY listener, per-connection capture, the scan launch, and
//! the TestCase write together into one recording session.
//!
//! Grounded on `main`/`execute_scan`/`get_oids_for_vts` in
//! `original_source/vts-qa-recorder/vts-recording/recorder.py`: bind, spawn
//! the accept loop, run the real scan to completion, stop accepting, drain
//! in-flight connections, canonicalize, write one TestCase per resolved OID.

use crate::aggregator::Aggregator;
use crate::capture::{self, CapturedExchange};
use crate::tproxy;
use indexmap::IndexMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use vtcase_core::HTTP_SERVICE_NAME;
use vtcase_model::{ScanInfo, TestCaseStore};
use vtcase_runner::{DriverError, OidResolver, ScannerDriver};

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("tproxy setup failed: {0}")]
    Tproxy(#[from] tproxy::TproxyError),
    #[error("oid/scan driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("failed to parse captured traffic: {0}")]
    Aggregator(#[from] crate::aggregator::AggregatorError),
    #[error("failed to write TestCase: {0}")]
    Store(#[from] vtcase_model::StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct RecordingSession {
    pub listen: SocketAddr,
    pub target: SocketAddr,
    pub vt_filenames: Vec<PathBuf>,
    pub target_ports: Vec<u16>,
    pub store_root: PathBuf,
}

impl RecordingSession {
    /// Binds the listener, runs `scanner` to completion against `target`
    /// through the proxy, then writes the resulting TestCase under every
    /// resolved OID's directory.
    pub async fn run(
        self,
        scanner: &dyn ScannerDriver,
        oid_resolver: &dyn OidResolver,
    ) -> Result<Vec<PathBuf>, SessionError> {
        let listener = tproxy::bind_transparent(self.listen)?;
        let (tx, mut rx) = mpsc::channel::<CapturedExchange>(256);
        let mut aggregator = Aggregator::new();

        let target = self.target;
        let stop = CancellationToken::new();
        let accept_tx = tx.clone();
        let accept_stop = stop.clone();
        let accept_loop = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    _ = accept_stop.cancelled() => break,
                    accepted = listener.accept() => {
                        let (inbound, _peer) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                tracing::warn!(error = %e, "accept failed");
                                continue;
                            }
                        };
                        let sink = accept_tx.clone();
                        connections.spawn(async move {
                            if let Err(e) = capture::handle_connection(inbound, target, sink).await {
                                tracing::warn!(error = %e, "connection capture ended with an error");
                            }
                        });
                    }
                }
            }
            // Let every in-flight connection finish and emit its captures
            // before this task's own sender clone drops.
            while connections.join_next().await.is_some() {}
        });
        drop(tx);

        let oids = oid_resolver.resolve(&self.vt_filenames).await?;
        let oid_list: Vec<String> = oids.values().cloned().collect();

        tracing::info!(target = %self.target, oids = ?oid_list, "starting scan");
        let outcome = scanner
            .scan(&self.target.ip().to_string(), &self.target_ports, &oid_list)
            .await?;
        tracing::info!(status = ?outcome.status, "scan finished");

        stop.cancel();
        while let Some(exchange) = rx.recv().await {
            aggregator.push(exchange);
        }
        let _ = accept_loop.await;

        let exchanges = aggregator.into_parsed_exchanges().await?;
        let endpoints = vtcase_canon::canonicalize(&exchanges);

        let mut services = IndexMap::new();
        services.insert(HTTP_SERVICE_NAME.to_string(), endpoints);

        let mut scan_info = ScanInfo::new(self.target_ports.clone(), oid_list.clone());
        scan_info.result = outcome.stdout;

        let mut written = Vec::new();
        for oid in oid_list {
            let oid_root = self.store_root.join(&oid);
            let store = TestCaseStore::next(&oid_root)?;
            store.write(&scan_info, &services)?;
            written.push(store.dir);
        }
        Ok(written)
    }
}
