//! Two stations exchanging messages over an in-memory "ether".
//!
//! Each station talks to its own end of a duplex pipe through the modem line
//! codec; a relay task plays the radio channel and hands every transmission to
//! the other station. The runtime clock is paused, so five minutes of slots
//! pass in an instant.
//!
//! Run with `cargo run --example loopback`, set `RUST_LOG=debug` for routing detail.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use slotchat::core::SLOT_SECS;
use slotchat::protocol::Messenger;
use slotchat::time::{util, Clock, InstantClock, SystemClock};
use slotchat::ui::{transcript_line, LogSink};
use slotchat::{
    Callsign, Directory, Error, MemorySettings, MessengerConfig, ModemCodec, Result, Station,
    StationHandle, Transmission,
};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing_subscriber::EnvFilter;

type Radio = Framed<DuplexStream, ModemCodec>;

/// Forwards whatever one station transmits to the other, until either side hangs up
async fn ether(a: Radio, b: Radio) -> Result<()> {
    let (mut to_a, mut from_a) = a.split();
    let (mut to_b, mut from_b) = b.split();
    loop {
        tokio::select! {
            Some(packet) = from_a.next() => {
                let packet = packet?;
                println!("  a -> b  {:>5} Hz  {}", packet.frequency, packet.text);
                if to_b.send(Transmission::from(packet)).await.is_err() {
                    break;
                }
            }
            Some(packet) = from_b.next() => {
                let packet = packet?;
                println!("  b -> a  {:>5} Hz  {}", packet.frequency, packet.text);
                if to_a.send(Transmission::from(packet)).await.is_err() {
                    break;
                }
            }
            else => break,
        }
    }
    Ok(())
}

fn start(
    callsign: &str,
    pitch: u32,
    epoch: u64,
    link: DuplexStream,
) -> Result<(StationHandle, JoinHandle<Result<Messenger>>)> {
    let settings = MemorySettings::new(Callsign::new(callsign)?).with_pitch(pitch);
    let messenger = Messenger::new(
        MessengerConfig::default(),
        Box::new(settings),
        Directory::new(None),
    );
    let (station, handle) = Station::new(messenger, InstantClock::new(epoch), Box::new(LogSink));
    let (sink, stream) = Framed::new(link, ModemCodec::new()).split();
    Ok((handle, tokio::spawn(station.run(stream, sink))))
}

async fn finish(task: JoinHandle<Result<Messenger>>) -> Result<Messenger> {
    task.await
        .map_err(|e| Error::channel(format!("Station task failed: {}", e)))?
}

#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let epoch = util::slot_start(SystemClock.now(), SLOT_SECS);
    let (al_link, al_radio) = tokio::io::duplex(4096);
    let (bob_link, bob_radio) = tokio::io::duplex(4096);
    let relay = tokio::spawn(ether(
        Framed::new(al_radio, ModemCodec::new()),
        Framed::new(bob_radio, ModemCodec::new()),
    ));

    let (al, al_task) = start("W7PUA", 1000, epoch, al_link)?;
    let (bob, bob_task) = start("VU2ESE", 1600, epoch, bob_link)?;

    println!("W7PUA posts to VU2ESE");
    al.add_contact("VU2ESE").await?;
    al.select(Some("VU2ESE")).await?;
    al.post(None, "hi bob, how is the weather?").await?;

    tokio::time::sleep(Duration::from_secs(90)).await;

    println!("VU2ESE replies");
    bob.select(Some("W7PUA")).await?;
    bob.post(None, "GM AL. SUNNY 31C HERE").await?;

    tokio::time::sleep(Duration::from_secs(180)).await;

    al.shutdown().await?;
    bob.shutdown().await?;
    let engines = [finish(al_task).await?, finish(bob_task).await?];
    relay
        .await
        .map_err(|e| Error::channel(format!("Relay task failed: {}", e)))??;

    for engine in &engines {
        println!("\n== {} ==", engine.local());
        for contact in engine.directory().iter() {
            for msg in &contact.messages {
                println!("{}", transcript_line(contact, msg, engine.local()));
            }
        }
    }
    Ok(())
}
