//! Hubwatch CLI - live monitor and publish client for a ZeroMQ hub relay.
//!
//! This is the main binary entry point. See the `hubwatch` library for
//! the session, channel, and protocol logic.

use anyhow::Result;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use hubwatch::control::PublishRequest;
use hubwatch::protocol::Encoding;
use hubwatch::session::{Notice, Session};
use hubwatch::{ChannelState, Config, PublishStatus};

/// mimalloc provides better multi-threaded performance than the system
/// allocator.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// How long `publish` waits for the control channel before giving up.
const CONNECT_WAIT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "hubwatch", version, about = "Live monitor for a ZeroMQ hub relay")]
struct Cli {
    /// Relay base URL (overrides the config file).
    #[arg(long, global = true)]
    server_url: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream relay events to stdout (default).
    Watch,
    /// Publish one message into the relay and wait for the ack.
    Publish {
        /// Routing key to publish under.
        #[arg(long)]
        topic: String,
        /// Payload text.
        #[arg(long, default_value = "")]
        payload: String,
        /// Payload interpretation: utf8 or base64.
        #[arg(long, default_value = "utf8")]
        encoding: Encoding,
        /// Extra base64-encoded frames sent after the topic frame
        /// (repeatable; the relay ignores --payload when used).
        #[arg(long = "multipart", value_name = "B64")]
        multipart: Vec<String>,
    },
    /// Query the relay's /healthz endpoint.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(url) = cli.server_url {
        config.server_url = url;
    }

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => watch(&config).await,
        Commands::Publish {
            topic,
            payload,
            encoding,
            multipart,
        } => {
            let request = PublishRequest {
                topic,
                payload,
                encoding,
                multipart: if multipart.is_empty() { None } else { Some(multipart) },
            };
            publish(&config, request).await
        }
        Commands::Health => health(&config).await,
    }
}

/// Stream events as one line per event until interrupted.
async fn watch(config: &Config) -> Result<()> {
    let (handle, mut notices) = Session::start(config);
    log::info!("Watching {} (ctrl-c to stop)", config.server_url);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notice = notices.recv() => {
                let Some(notice) = notice else { break };
                print_notice(&notice, &handle);
            }
        }
    }

    let log = handle.log();
    if let Ok(log) = log.read() {
        log::info!("Stopping; {} events seen, {} retained", log.total(), log.len());
    }
    handle.shutdown();
    Ok(())
}

/// Render one notice. Event rows go to stdout; everything else is logged.
fn print_notice(notice: &Notice, handle: &hubwatch::SessionHandle) {
    match notice {
        Notice::Event(event) => {
            let ts = event.ts.clone().unwrap_or_else(|| {
                // The relay stamps events server-side; fall back to the
                // local arrival time when it did not.
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
            });
            println!(
                "{ts} {:<8} {:<6} {} {}",
                event.kind,
                event.source.as_deref().unwrap_or("-"),
                event.topic_text(),
                event.payload_text(),
            );
        }
        Notice::Connected(kind) => log::info!("[{kind}] connected"),
        Notice::Disconnected(kind) => log::warn!("[{kind}] disconnected, retrying"),
        Notice::Publish(status) => match status {
            PublishStatus::Published => log::info!("publish acknowledged"),
            PublishStatus::Failed(error) => log::error!("publish failed: {error}"),
            PublishStatus::InFlight | PublishStatus::Idle => {}
        },
        Notice::Drops(count) => {
            if let Ok(log) = handle.log().read() {
                log::warn!("relay dropped {count} events (total seen here: {})", log.total());
            }
        }
    }
}

/// Publish one message and wait for its acknowledgement.
async fn publish(config: &Config, request: PublishRequest) -> Result<()> {
    let (handle, _notices) = Session::start(config);

    // The coordinator rejects submissions until the control channel is
    // open, so wait for it first.
    let mut control_state = handle.control_state();
    let connected = tokio::time::timeout(
        CONNECT_WAIT,
        control_state.wait_for(ChannelState::is_open),
    )
    .await
    .is_ok_and(|changed| changed.is_ok());
    if !connected {
        handle.shutdown();
        anyhow::bail!("Control channel did not connect within {CONNECT_WAIT:?}");
    }

    handle.submit(&request)?;

    let mut status = handle.publish_status();
    let outcome = tokio::time::timeout(
        CONNECT_WAIT + config.ack_timeout(),
        status.wait_for(|s| matches!(s, PublishStatus::Published | PublishStatus::Failed(_))),
    )
    .await
    .ok()
    .and_then(Result::ok)
    .map(|resolved| resolved.clone())
    .unwrap_or_else(|| PublishStatus::Failed("no acknowledgement".to_string()));
    handle.shutdown();

    match outcome {
        PublishStatus::Published => {
            println!("published to '{}'", request.topic);
            Ok(())
        }
        PublishStatus::Failed(error) => anyhow::bail!("publish failed: {error}"),
        _ => unreachable!("wait_for only returns resolved statuses"),
    }
}

/// Print the relay's health report.
async fn health(config: &Config) -> Result<()> {
    let health = hubwatch::health::fetch(&config.health_url()).await?;
    println!("status:      {}", health.status);
    if let Some(xsub) = &health.xsub_bind {
        println!("xsub_bind:   {xsub}");
    }
    if let Some(xpub) = &health.xpub_bind {
        println!("xpub_bind:   {xpub}");
    }
    if let Some(inject) = &health.inject_connect {
        println!("inject:      {inject}");
    }
    println!("published:   {}", health.bus.published);
    println!("dropped_ws:  {}", health.bus.dropped_ws);
    println!("subscribers: {}", health.bus.subscribers);
    Ok(())
}
