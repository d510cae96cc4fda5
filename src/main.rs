// src/main.rs

//! A small diagnostic CLI over the connection-pool core: loads a topology
//! from a config file, runs the load-balance selector against it, and
//! optionally opens a real backend session to probe its version. There is
//! no client-facing server loop here — that belongs to a layer above this
//! core's scope (see SPEC_FULL.md §1, Non-goals).

use anyhow::{Context, Result};
use nodepool::config::Config;
use nodepool::core::backend::{open_persistent, CleartextAuthenticator};
use nodepool::core::balancer::select_load_balancing_node;
use nodepool::core::version::{BackendQuerier, VersionCache};
use std::env;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("nodepool {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let config = match Config::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .init();

    let topology = config.topology();
    info!(
        backends = topology.num_backends(),
        primary = ?topology.primary_node_id(),
        "loaded topology"
    );

    let database = args
        .iter()
        .position(|a| a == "--select")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());
    let application_name = args
        .iter()
        .position(|a| a == "--app")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    if let Some(database) = database {
        let node_id =
            select_load_balancing_node(&topology, &config.balancer, database, application_name);
        println!("selected backend {node_id}");
    }

    if let Some(node_id) = args
        .iter()
        .position(|a| a == "--probe")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<usize>().ok())
    {
        let backend = config
            .backends
            .get(node_id)
            .with_context(|| format!("no backend configured with id {node_id}"))?;

        let user = env::var("PGUSER").unwrap_or_else(|_| "postgres".to_string());
        let password = env::var("PGPASSWORD").unwrap_or_default();
        let dbname = env::var("PGDATABASE").unwrap_or_else(|_| "postgres".to_string());

        let mut slot = open_persistent(
            node_id,
            &backend.host,
            backend.port,
            &dbname,
            &user,
            &password,
            false,
            false,
            &CleartextAuthenticator,
        )
        .await?;

        let querier = SimpleQueryQuerier;
        let cache = VersionCache::new();
        match cache.get(&mut slot, &querier).await {
            Ok(version) => println!(
                "backend {node_id} version {}.{}: {}",
                version.major, version.minor, version.version_string
            ),
            Err(e) => {
                error!(error = %e, "version probe failed");
                slot.discard().await;
                std::process::exit(1);
            }
        }

        slot.discard().await;
    }

    Ok(())
}

/// Issues a PostgreSQL simple query and reads back the first column of the
/// first `DataRow`, ignoring every other message until `ReadyForQuery`.
struct SimpleQueryQuerier;

#[async_trait::async_trait]
impl BackendQuerier for SimpleQueryQuerier {
    async fn query_scalar(
        &self,
        slot: &mut nodepool::core::backend::Slot,
        sql: &str,
    ) -> Result<String, nodepool::PoolError> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let transport = slot.transport_mut();

        let mut query = Vec::with_capacity(5 + sql.len() + 1);
        let len = (4 + sql.len() + 1) as u32;
        query.push(b'Q');
        query.extend_from_slice(&len.to_be_bytes());
        query.extend_from_slice(sql.as_bytes());
        query.push(0);
        transport.write_all(&query).await?;
        transport.flush().await?;

        let mut result: Option<String> = None;
        loop {
            let mut header = [0u8; 5];
            transport.read_exact(&mut header).await?;
            let tag = header[0];
            let body_len = u32::from_be_bytes(header[1..5].try_into().unwrap());
            let mut body = vec![0u8; body_len.saturating_sub(4) as usize];
            transport.read_exact(&mut body).await?;

            match tag {
                b'D' if result.is_none() => {
                    // DataRow: i16 column count, then per column an i32
                    // length followed by that many raw bytes.
                    if body.len() >= 6 {
                        let col_len = i32::from_be_bytes(body[2..6].try_into().unwrap());
                        if col_len >= 0 {
                            let start = 6;
                            let end = start + col_len as usize;
                            if end <= body.len() {
                                result = Some(String::from_utf8_lossy(&body[start..end]).into_owned());
                            }
                        }
                    }
                }
                b'Z' => break,
                b'E' => {
                    return Err(nodepool::PoolError::VersionProbe(format!(
                        "backend returned an error response: {:?}",
                        String::from_utf8_lossy(&body)
                    )));
                }
                _ => {}
            }
        }

        result.ok_or_else(|| nodepool::PoolError::VersionProbe("no row returned".into()))
    }
}
