//! arklink-sim: the link against an in-memory controller.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  edge_executor::LocalExecutor                                │
//! │  ┌──────────────────────┐      ┌───────────────────────────┐ │
//! │  │ dispatcher task      │      │ demo task                 │ │
//! │  │ session.run()        │◀────▶│ connect · status · OTA    │ │
//! │  └──────────────────────┘      └───────────────────────────┘ │
//! │             ▲ EventQueue                 │ write_chunk       │
//! │             └────────── SimulatedDevice ◀┘                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `arklink-sim [config.json]`.  `RUST_LOG` overrides the `info`
//! default.

use anyhow::{Context, Result};
use embassy_time::Duration;
use log::{info, warn};
use serde::Serialize;

use arklink::adapters::log_sink::LogEventSink;
use arklink::adapters::sim_device::{SimHandle, SimulatedDevice};
use arklink::app::http_shim::send_http_request;
use arklink::rpc::channels::EventQueue;
use arklink::{LinkConfig, ProtocolSession};

type SimSession = ProtocolSession<SimulatedDevice, LogEventSink>;

#[derive(Serialize)]
struct DemoSettings {
    brightness: u8,
    effect: &'static str,
    speed: u8,
}

fn load_config() -> Result<LinkConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            LinkConfig::from_json(&text).with_context(|| format!("parsing {path}"))
        }
        None => Ok(LinkConfig::default()),
    }
}

async fn demo(session: &SimSession, device: &SimHandle) -> Result<()> {
    session.connect()?;
    session.wait_ready(Duration::from_secs(2)).await?;
    info!(
        "link ready: mtu={} fallback={} next_seq={}",
        session.mtu(),
        session.ready_via_fallback(),
        session.next_seq()
    );

    let status = session.request_status_json().await?;
    info!("status: {}", status);

    session
        .send_settings(&DemoSettings {
            brightness: 200,
            effect: "rainbow",
            speed: 40,
        })
        .await?;
    info!("device stored settings: {:?}", device.settings());

    session.start_ota("https://updates.arklights.invalid/fw/latest.bin").await?;
    info!("ota status: {}", session.request_ota_status().await?);

    let reply = send_http_request(session, "GET", "/api/status", None).await?;
    info!("http shim reply: {} bytes", reply.len());

    device.update_faults(|f| f.error_reply = Some("effect engine busy".into()));
    match session.request_status().await {
        Ok(body) => warn!("unexpected success: {}", body),
        Err(e) => info!("status while busy failed as expected: {}", e),
    }
    device.update_faults(|f| f.error_reply = None);

    session.disconnect();
    let stats = session.decode_stats();
    info!(
        "done: {} frames decoded, {} rejected, {} chunks written",
        stats.frames,
        stats.rejected,
        device.chunks_written()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("arklink-sim v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    config.validate()?;

    let events = EventQueue::new();
    let (device, handle) = SimulatedDevice::new(events.clone());
    let session = ProtocolSession::with_event_queue(config, device, LogEventSink::new(), events);

    let executor: edge_executor::LocalExecutor<'_, 8> = edge_executor::LocalExecutor::new();
    executor.spawn(session.run()).detach();

    futures_lite::future::block_on(executor.run(demo(&session, &handle)))
}
