use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::assuan::{AgentConnector, AssuanTransaction};
use crate::card::{AppCard, Card};
use crate::config::{ScdConfig, WatchMode};
use crate::devinfo::DevInfoWatcher;
use crate::error::{AgentError, Error, Result};
use crate::events::EventReceiver;
use crate::scan::KnownKeys;
use crate::types::{Action, CardApp};
use crate::watcher::StatusFileWatcher;
use crate::worker::{Command, Shared, Transaction, Worker};

/// Called with the outcome of a queued transaction
pub type TransactionCallback = Box<dyn FnOnce(std::result::Result<(), AgentError>) + Send>;

enum Watcher {
    StatusFiles(StatusFileWatcher),
    DevInfo(DevInfoWatcher),
}

impl Watcher {
    fn stop(self) {
        match self {
            Self::StatusFiles(watcher) => watcher.stop(),
            Self::DevInfo(watcher) => watcher.stop(),
        }
    }
}

/// Tracks the inserted smart cards and serializes all card operations
///
/// Queued transactions run one at a time on a worker thread. Their results
/// are collected there and handed back on whichever thread calls
/// [`dispatch_finished_transactions`](Self::dispatch_finished_transactions),
/// typically after a [`ReaderStatusEvent::TransactionFinished`](crate::ReaderStatusEvent::TransactionFinished).
pub struct ReaderStatus {
    config: ScdConfig,
    shared: Arc<Shared>,
    connector: Arc<dyn AgentConnector>,
    known_keys: Option<Arc<dyn KnownKeys>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<Watcher>>,
}

impl ReaderStatus {
    /// Talk to the agent socket named in the configuration
    pub fn new(config: ScdConfig) -> Self {
        let connector = config.connector();
        Self::with_connector(config, connector)
    }

    /// Use a custom way of reaching the agent
    pub fn with_connector(config: ScdConfig, connector: impl AgentConnector + 'static) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            connector: Arc::new(connector),
            known_keys: None,
            worker: Mutex::new(None),
            watcher: Mutex::new(None),
        }
    }

    /// Keyring lookup used to tell whether a card holds keys worth learning
    pub fn with_known_keys(mut self, known_keys: Arc<dyn KnownKeys>) -> Self {
        self.known_keys = Some(known_keys);
        self
    }

    pub const fn config(&self) -> &ScdConfig {
        &self.config
    }

    /// Receive all events published from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub fn is_monitoring(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Start the worker thread, scan once and start watching for changes
    pub fn start_monitoring(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(Error::AlreadyMonitoring);
        }

        let mut options = self.config.scan_options();
        options.known_keys = self.known_keys.clone();
        let state = Worker::new(Arc::clone(&self.shared), Arc::clone(&self.connector), options);
        let handle = thread::Builder::new()
            .name("scd-reader-status".to_string())
            .spawn(move || state.run())
            .map_err(Error::ThreadSpawn)?;
        *worker = Some(handle);
        drop(worker);
        info!("Reader status monitoring started");

        self.update_status();
        self.start_watcher()
    }

    fn start_watcher(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let trigger = move || shared.enqueue(Transaction::update(CardApp::default()));

        let watcher = match self.config.watch_mode {
            WatchMode::StatusFiles => Watcher::StatusFiles(StatusFileWatcher::start(
                &self.config.gnupg_home,
                self.config.poll_interval,
                self.config.watch_delay,
                trigger,
            )?),
            WatchMode::DevInfo => Watcher::DevInfo(DevInfoWatcher::start(
                Arc::clone(&self.connector),
                trigger,
            )?),
            WatchMode::Disabled => return Ok(()),
        };
        *self.watcher.lock() = Some(watcher);
        Ok(())
    }

    /// Queue a command for a card application
    ///
    /// The agent is switched to the card and application first; an empty
    /// [`CardApp`] runs the command without switching.
    pub fn start_simple_transaction(
        &self,
        card_app: &CardApp,
        command: impl Into<String>,
        callback: impl FnOnce(std::result::Result<(), AgentError>) + Send + 'static,
    ) {
        self.enqueue_command(card_app, command.into(), Box::new(callback), None);
    }

    /// Queue a command whose responses are handled by `transaction`
    pub fn start_transaction(
        &self,
        card_app: &CardApp,
        command: impl Into<String>,
        callback: impl FnOnce(std::result::Result<(), AgentError>) + Send + 'static,
        transaction: Box<dyn AssuanTransaction>,
    ) {
        self.enqueue_command(card_app, command.into(), Box::new(callback), Some(transaction));
    }

    /// Like [`start_simple_transaction`](Self::start_simple_transaction), but
    /// the callback only runs while `receiver` is still alive
    pub fn start_simple_transaction_for<R>(
        &self,
        card_app: &CardApp,
        command: impl Into<String>,
        receiver: &Arc<R>,
        callback: impl FnOnce(&R, std::result::Result<(), AgentError>) + Send + 'static,
    ) where
        R: Send + Sync + 'static,
    {
        let callback = bind_receiver(receiver, callback);
        self.enqueue_command(card_app, command.into(), callback, None);
    }

    /// Like [`start_transaction`](Self::start_transaction), but the callback
    /// only runs while `receiver` is still alive
    pub fn start_transaction_for<R>(
        &self,
        card_app: &CardApp,
        command: impl Into<String>,
        receiver: &Arc<R>,
        callback: impl FnOnce(&R, std::result::Result<(), AgentError>) + Send + 'static,
        transaction: Box<dyn AssuanTransaction>,
    ) where
        R: Send + Sync + 'static,
    {
        let callback = bind_receiver(receiver, callback);
        self.enqueue_command(card_app, command.into(), callback, Some(transaction));
    }

    fn enqueue_command(
        &self,
        card_app: &CardApp,
        command: String,
        callback: TransactionCallback,
        transaction: Option<Box<dyn AssuanTransaction>>,
    ) {
        debug!("Queueing {} for {}", command, card_app);
        self.shared.enqueue(Transaction {
            card_app: card_app.clone(),
            command: Command::Assuan(command),
            callback: Some(callback),
            transaction,
        });
    }

    /// Queue a full re-scan, unless one is already waiting
    pub fn update_status(&self) {
        self.shared.enqueue(Transaction::update(CardApp::default()));
    }

    /// Queue a re-scan of one card application
    pub fn update_card(&self, card_app: &CardApp) {
        self.shared.enqueue(Transaction::update(card_app.clone()));
    }

    /// Run the callbacks of all finished transactions on the calling thread
    ///
    /// Returns how many transactions were dispatched.
    pub fn dispatch_finished_transactions(&self) -> usize {
        let finished = std::mem::take(&mut self.shared.state.lock().finished);
        let count = finished.len();
        for transaction in finished {
            if let Some(callback) = transaction.callback {
                callback(transaction.result);
            }
        }
        count
    }

    /// Current snapshot of all card applications
    pub fn get_cards(&self) -> Vec<Arc<Card>> {
        self.shared.state.lock().cards.clone()
    }

    pub fn get_card(&self, serial_number: &str, app_name: &str) -> Option<Arc<Card>> {
        self.find_card(|card| {
            card.serial_number() == serial_number && card.app_name() == app_name
        })
    }

    /// Typed view of a card application, `None` if it is not of type `T`
    pub fn get_card_as<T: AppCard>(&self, serial_number: &str) -> Option<T> {
        self.get_card(serial_number, T::APP_NAME)
            .and_then(T::from_card)
    }

    /// The application of a card that has a key slot named `key_ref`
    pub fn get_card_with_key_ref(&self, serial_number: &str, key_ref: &str) -> Option<Arc<Card>> {
        self.find_card(|card| {
            card.serial_number() == serial_number && card.key_info(key_ref).is_some()
        })
    }

    fn find_card(&self, predicate: impl Fn(&Card) -> bool) -> Option<Arc<Card>> {
        self.shared
            .state
            .lock()
            .cards
            .iter()
            .find(|card| predicate(card))
            .cloned()
    }

    pub fn any_card_has_null_pin(&self) -> bool {
        self.find_card(Card::has_null_pin).is_some()
    }

    pub fn any_card_can_learn_keys(&self) -> bool {
        self.find_card(Card::can_learn_keys).is_some()
    }

    /// Serial number of the first card that still has a null PIN
    pub fn first_card_with_null_pin(&self) -> Option<String> {
        self.find_card(Card::has_null_pin)
            .map(|card| card.serial_number().to_string())
    }

    pub fn current_action(&self) -> Action {
        self.shared.state.lock().action
    }

    /// Stop watching and tell the worker to quit
    ///
    /// Waits at most `shutdown_timeout` for the worker. A worker stuck in an
    /// agent call is detached and exits once the call returns.
    pub fn shutdown(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop();
        }

        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        self.shared.request_quit();

        let deadline = Instant::now() + self.config.shutdown_timeout;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("Reader status worker panicked");
            }
            debug!("Reader status worker stopped");
        } else {
            warn!(
                "Reader status worker did not stop within {:?}, detaching it",
                self.config.shutdown_timeout
            );
        }
    }
}

impl Drop for ReaderStatus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tie a callback to a receiver without keeping the receiver alive
fn bind_receiver<R>(
    receiver: &Arc<R>,
    callback: impl FnOnce(&R, std::result::Result<(), AgentError>) + Send + 'static,
) -> TransactionCallback
where
    R: Send + Sync + 'static,
{
    let receiver: Weak<R> = Arc::downgrade(receiver);
    Box::new(move |result| match receiver.upgrade() {
        Some(receiver) => callback(&receiver, result),
        None => debug!("Receiver is gone, dropping transaction result"),
    })
}
