//! Station runtime and modem link
//!
//! A [`Station`] owns the messenger engine and is the only place its state is
//! touched. User commands arrive through a [`StationHandle`], decoded packets
//! through a stream, and a one-second tick drives reassembly deadlines and the
//! slot scheduler; all three are serialized by a single `select!` loop.

pub mod connection;
pub mod discovery;

pub use self::connection::{Decoded, ModemCodec};
pub use self::discovery::{Beacon, presence_code};

use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::core::{Error, MessengerConfig, Result, Settings, Timestamp};
use crate::protocol::{Messenger, Transmission};
use crate::store::FileStore;
use crate::time::{Clock, MonotonicClock};
use crate::ui::UiSink;

/// Depth of the command queue
pub const COMMAND_QUEUE: usize = 32;

/// Default housekeeping period
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

type Reply<T> = oneshot::Sender<Result<T>>;

/// User-side requests, answered through their reply channel
#[derive(Debug)]
pub enum Command {
    Post {
        contact: Option<String>,
        text: String,
        reply: Reply<()>,
    },
    Select {
        contact: Option<String>,
        reply: Reply<()>,
    },
    AddContact {
        callsign: String,
        reply: Reply<()>,
    },
    RemoveContact {
        callsign: String,
        reply: Reply<()>,
    },
    SetPresence {
        presence: String,
        reply: Reply<()>,
    },
    DeleteMessage {
        callsign: String,
        index: usize,
        reply: Reply<()>,
    },
    Prune {
        callsign: String,
        reply: Reply<usize>,
    },
    Shutdown,
}

/// Handle for driving a running station
#[derive(Debug, Clone)]
pub struct StationHandle {
    command_tx: mpsc::Sender<Command>,
}

impl StationHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .await
            .map_err(|e| Error::channel(format!("Station is not running: {}", e)))?;
        response
            .await
            .map_err(|e| Error::channel(format!("Station dropped the request: {}", e)))?
    }

    /// Queues a message for `contact`, or for the selected contact
    pub async fn post(&self, contact: Option<&str>, text: &str) -> Result<()> {
        let contact = contact.map(str::to_string);
        let text = text.to_string();
        self.request(|reply| Command::Post { contact, text, reply }).await
    }

    pub async fn select(&self, contact: Option<&str>) -> Result<()> {
        let contact = contact.map(str::to_string);
        self.request(|reply| Command::Select { contact, reply }).await
    }

    pub async fn add_contact(&self, callsign: &str) -> Result<()> {
        let callsign = callsign.to_string();
        self.request(|reply| Command::AddContact { callsign, reply }).await
    }

    pub async fn remove_contact(&self, callsign: &str) -> Result<()> {
        let callsign = callsign.to_string();
        self.request(|reply| Command::RemoveContact { callsign, reply }).await
    }

    pub async fn set_presence(&self, presence: &str) -> Result<()> {
        let presence = presence.to_string();
        self.request(|reply| Command::SetPresence { presence, reply }).await
    }

    pub async fn delete_message(&self, callsign: &str, index: usize) -> Result<()> {
        let callsign = callsign.to_string();
        self.request(|reply| Command::DeleteMessage { callsign, index, reply }).await
    }

    /// Drops messages flagged for deletion, returning how many went
    pub async fn prune(&self, callsign: &str) -> Result<usize> {
        let callsign = callsign.to_string();
        self.request(|reply| Command::Prune { callsign, reply }).await
    }

    /// Asks the station to save and stop
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(Command::Shutdown)
            .await
            .map_err(|e| Error::channel(format!("Station is not running: {}", e)))
    }
}

/// The protocol thread: engine, clock, UI adapter and persistence
pub struct Station<C> {
    messenger: Messenger,
    clock: MonotonicClock<C>,
    ui: Box<dyn UiSink>,
    store: Option<FileStore>,
    commands: mpsc::Receiver<Command>,
    tick_every: Duration,
    last_save: Timestamp,
}

impl<C: Clock> Station<C> {
    /// Creates a station around an engine
    pub fn new(messenger: Messenger, clock: C, ui: Box<dyn UiSink>) -> (Self, StationHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let clock = MonotonicClock::new(clock);
        let last_save = clock.now();
        let station = Station {
            messenger,
            clock,
            ui,
            store: None,
            commands,
            tick_every: DEFAULT_TICK,
            last_save,
        };
        (station, StationHandle { command_tx })
    }

    /// Loads the directory from `store` and builds a station that keeps it saved
    pub async fn open(
        config: MessengerConfig,
        settings: Box<dyn Settings>,
        clock: C,
        ui: Box<dyn UiSink>,
        store: FileStore,
    ) -> Result<(Self, StationHandle)> {
        config.validate()?;
        let directory = store.load(config.max_contacts).await?;
        info!(
            path = %store.path().display(),
            contacts = directory.len(),
            "store loaded"
        );
        let messenger = Messenger::new(config, settings, directory);
        let (station, handle) = Station::new(messenger, clock, ui);
        Ok((station.with_store(store), handle))
    }

    /// Saves the directory to `store` whenever it changes
    pub fn with_store(mut self, store: FileStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Overrides the housekeeping period
    pub fn with_tick(mut self, every: Duration) -> Self {
        self.tick_every = every;
        self
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    /// Runs until shutdown is requested or every handle is dropped, then
    /// saves once more and hands the engine back.
    pub async fn run<S, K>(mut self, decoded: S, mut transmit: K) -> Result<Messenger>
    where
        S: Stream<Item = Result<Decoded>> + Unpin,
        K: Sink<Transmission, Error = Error> + Unpin,
    {
        let mut decoded = decoded;
        let mut link_open = true;
        let mut ticker = tokio::time::interval(self.tick_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(callsign = %self.messenger.local(), "station running");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },

                item = decoded.next(), if link_open => match item {
                    Some(Ok(packet)) => {
                        let now = self.clock.now();
                        let routed = self.messenger.on_decoded(packet.frequency, &packet.text, now);
                        debug!(frequency = packet.frequency, text = %packet.text, ?routed, "decoded");
                    }
                    Some(Err(e)) => warn!(error = %e, "modem link error"),
                    None => {
                        info!("modem link closed");
                        link_open = false;
                    }
                },

                _ = ticker.tick() => {
                    let now = self.clock.now();
                    if let Some(tx) = self.messenger.tick(now) {
                        if let Err(e) = transmit.send(tx).await {
                            error!(error = %e, "transmit failed, stopping");
                            self.save(now).await;
                            return Err(e);
                        }
                    }
                }
            }

            let now = self.clock.now();
            self.flush_ui(now);
            self.save_if_due(now).await;
        }

        let now = self.clock.now();
        self.flush_ui(now);
        self.save(now).await;
        info!("station stopped");
        Ok(self.messenger)
    }

    fn handle_command(&mut self, command: Command) {
        let now = self.clock.now();
        let m = &mut self.messenger;
        match command {
            Command::Post { contact, text, reply } => {
                let _ = reply.send(m.post(contact.as_deref(), &text, now));
            }
            Command::Select { contact, reply } => {
                let _ = reply.send(m.select(contact.as_deref()));
            }
            Command::AddContact { callsign, reply } => {
                let _ = reply.send(m.add_contact(&callsign));
            }
            Command::RemoveContact { callsign, reply } => {
                let _ = reply.send(m.remove_contact(&callsign));
            }
            Command::SetPresence { presence, reply } => {
                m.set_presence(&presence, now);
                let _ = reply.send(Ok(()));
            }
            Command::DeleteMessage { callsign, index, reply } => {
                let _ = reply.send(m.delete_message(&callsign, index));
            }
            Command::Prune { callsign, reply } => {
                let _ = reply.send(m.prune(&callsign));
            }
            Command::Shutdown => {}
        }
    }

    fn flush_ui(&mut self, now: Timestamp) {
        for event in self.messenger.drain_ui(now) {
            self.ui.dispatch(&event);
        }
    }

    async fn save_if_due(&mut self, now: Timestamp) {
        let periodic = now >= self.last_save + self.messenger.config().save_interval.as_secs();
        if self.messenger.take_store_dirty() || periodic {
            self.save(now).await;
        }
    }

    async fn save(&mut self, now: Timestamp) {
        let Some(store) = &self.store else {
            return;
        };
        self.last_save = now;
        match store.save(self.messenger.directory()).await {
            Ok(()) => debug!(path = %store.path().display(), "store saved"),
            Err(e) => {
                warn!(error = %e, "store not saved, will retry");
                self.messenger.mark_store_dirty();
            }
        }
    }
}
