//! The worker thread owning the agent connection
//!
//! All agent I/O happens here. Other threads only push transactions into
//! the shared queue and read the card snapshot, both under one mutex that is
//! never held across I/O.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::assuan::{AgentConnection, AgentConnector, AssuanTransaction, DefaultTransaction};
use crate::card::Card;
use crate::error::{AgentError, ErrorSource, code};
use crate::events::{EventBus, ReaderStatusEvent};
use crate::reader_status::TransactionCallback;
use crate::scan::{ScanOptions, Scanner};
use crate::types::{Action, CardApp, CardStatus};

/// What a queued transaction asks the worker to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Re-scan all cards, or one card if the transaction names it
    Update,
    /// Stop the worker
    Quit,
    /// Send a command line to the agent
    Assuan(String),
}

/// One entry of the pending queue
pub(crate) struct Transaction {
    pub(crate) card_app: CardApp,
    pub(crate) command: Command,
    pub(crate) callback: Option<TransactionCallback>,
    pub(crate) transaction: Option<Box<dyn AssuanTransaction>>,
}

impl Transaction {
    pub(crate) fn update(card_app: CardApp) -> Self {
        Self {
            card_app,
            command: Command::Update,
            callback: None,
            transaction: None,
        }
    }

    pub(crate) fn quit() -> Self {
        Self {
            card_app: CardApp::default(),
            command: Command::Quit,
            callback: None,
            transaction: None,
        }
    }

    fn is_full_update(&self) -> bool {
        self.command == Command::Update && self.card_app.is_empty()
    }
}

/// A completed transaction waiting for its callback to be run
pub(crate) struct FinishedTransaction {
    pub(crate) callback: Option<TransactionCallback>,
    pub(crate) result: Result<(), AgentError>,
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) pending: VecDeque<Transaction>,
    pub(crate) finished: Vec<FinishedTransaction>,
    pub(crate) cards: Vec<Arc<Card>>,
    pub(crate) action: Action,
}

/// State shared between the worker and the [`ReaderStatus`](crate::ReaderStatus) handle
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<State>,
    pub(crate) work_available: Condvar,
    pub(crate) events: EventBus,
}

impl Shared {
    /// Append to the queue and wake the worker
    pub(crate) fn enqueue(&self, transaction: Transaction) {
        let mut state = self.state.lock();
        if transaction.is_full_update() && state.pending.iter().any(Transaction::is_full_update) {
            debug!("Full update already pending");
            return;
        }
        state.pending.push_back(transaction);
        self.work_available.notify_one();
    }

    /// Put the quit sentinel in front of everything else
    pub(crate) fn request_quit(&self) {
        self.state.lock().pending.push_front(Transaction::quit());
        self.work_available.notify_one();
    }

    fn set_action(&self, action: Action) {
        let changed = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.action, action) != action
        };
        if changed {
            self.events.emit(ReaderStatusEvent::CurrentActionChanged(action));
        }
    }
}

/// Difference between two consecutive snapshots for one card application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardChange {
    Added(CardApp),
    Changed(CardApp),
    Removed(CardApp),
}

impl From<CardChange> for ReaderStatusEvent {
    fn from(change: CardChange) -> Self {
        match change {
            CardChange::Added(id) => Self::CardAdded(id),
            CardChange::Changed(id) => Self::CardChanged(id),
            CardChange::Removed(id) => Self::CardRemoved(id),
        }
    }
}

/// Compare two snapshots by `(serial number, app name)`
///
/// Additions and changes come in the order of `new`, removals in the order
/// of `old`.
pub fn diff_cards(old: &[Arc<Card>], new: &[Arc<Card>]) -> Vec<CardChange> {
    let mut changes = Vec::new();
    for card in new {
        let id = card.id();
        match old.iter().find(|old_card| old_card.id() == id) {
            None => changes.push(CardChange::Added(id)),
            Some(old_card) if **old_card != **card => changes.push(CardChange::Changed(id)),
            Some(_) => {}
        }
    }
    for card in old {
        let id = card.id();
        if !new.iter().any(|new_card| new_card.id() == id) {
            changes.push(CardChange::Removed(id));
        }
    }
    changes
}

/// Open a connection if there is none yet
fn ensure_connected<'a>(
    slot: &'a mut Option<Box<dyn AgentConnection>>,
    connector: &dyn AgentConnector,
) -> Result<&'a mut Box<dyn AgentConnection>, AgentError> {
    if slot.is_none() {
        *slot = Some(connector.connect()?);
    }
    slot.as_mut().ok_or_else(|| AgentError::new(ErrorSource::User1, code::ASS_GENERAL))
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    connector: Arc<dyn AgentConnector>,
    options: ScanOptions,
    connection: Option<Box<dyn AgentConnection>>,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        connector: Arc<dyn AgentConnector>,
        options: ScanOptions,
    ) -> Self {
        Self {
            shared,
            connector,
            options,
            connection: None,
        }
    }

    pub(crate) fn run(mut self) {
        debug!("Reader status worker started");
        loop {
            let (transaction, old_cards) = {
                let mut state = self.shared.state.lock();
                while state.pending.is_empty() {
                    self.shared.work_available.wait(&mut state);
                }
                let Some(transaction) = state.pending.pop_front() else {
                    continue;
                };
                (transaction, state.cards.clone())
            };

            let Transaction {
                card_app,
                command,
                callback,
                transaction,
            } = transaction;
            match command {
                Command::Quit => {
                    debug!("Reader status worker quitting");
                    return;
                }
                Command::Update => self.update(&card_app, &old_cards),
                Command::Assuan(command) => {
                    self.execute(&card_app, &command, callback, transaction);
                }
            }
        }
    }

    /// Scan and publish a new snapshot
    fn update(&mut self, card_app: &CardApp, old_cards: &[Arc<Card>]) {
        self.shared.set_action(Action::UpdateCards);
        if card_app.is_empty() {
            self.shared.events.emit(ReaderStatusEvent::UpdateCardsStarted);
        } else {
            self.shared
                .events
                .emit(ReaderStatusEvent::UpdateCardStarted(card_app.clone()));
        }

        let scanned = self.scan(card_app);
        let new_cards: Vec<Arc<Card>> = if card_app.is_empty() {
            scanned.into_iter().map(Arc::new).collect()
        } else {
            merge_card(old_cards, card_app, scanned)
        };

        let any_error = new_cards
            .iter()
            .any(|card| card.status() == CardStatus::CardError);
        if any_error && self.connection.take().is_some() {
            debug!("Card error, dropping agent connection");
        }

        self.shared.state.lock().cards = new_cards.clone();

        for change in diff_cards(old_cards, &new_cards) {
            info!("{:?}", change);
            self.shared.events.emit(change.into());
        }

        let first_with_null_pin = new_cards
            .iter()
            .find(|card| card.has_null_pin())
            .map(|card| card.serial_number().to_string())
            .unwrap_or_default();
        self.shared
            .events
            .emit(ReaderStatusEvent::FirstCardWithNullPinChanged(first_with_null_pin));
        let any_can_learn_keys = new_cards.iter().any(|card| card.can_learn_keys());
        self.shared
            .events
            .emit(ReaderStatusEvent::AnyCardCanLearnKeysChanged(any_can_learn_keys));

        self.shared.events.emit(ReaderStatusEvent::UpdateFinished);
        self.shared.set_action(Action::NoAction);
    }

    fn scan(&mut self, card_app: &CardApp) -> Vec<Card> {
        let connection = match ensure_connected(&mut self.connection, self.connector.as_ref()) {
            Ok(connection) => connection,
            Err(err) if self.options.not_present.is_not_present(&err) => return Vec::new(),
            Err(err) => {
                warn!("Failed to connect to the agent: {}", err);
                return vec![Card::with_status(
                    card_app.serial_number.as_str(),
                    card_app.app_name.as_str(),
                    CardStatus::CardError,
                )];
            }
        };

        let mut scanner = Scanner::new(connection.as_mut(), &self.options);
        let cards = if card_app.is_empty() {
            scanner.update_cardinfo()
        } else {
            vec![scanner.update_card(card_app)]
        };
        if scanner.connection_lost() {
            self.connection = None;
        }
        cards
    }

    /// Run a targeted command and hand its result to the finished list
    fn execute(
        &mut self,
        card_app: &CardApp,
        command: &str,
        callback: Option<TransactionCallback>,
        transaction: Option<Box<dyn AssuanTransaction>>,
    ) {
        let result = self.transact(card_app, command, transaction);
        if let Err(err) = &result {
            debug!("Transaction {} for {} failed: {}", command, card_app, err);
        }

        self.shared
            .state
            .lock()
            .finished
            .push(FinishedTransaction { callback, result });
        self.shared.events.emit(ReaderStatusEvent::TransactionFinished);
    }

    fn transact(
        &mut self,
        card_app: &CardApp,
        command: &str,
        transaction: Option<Box<dyn AssuanTransaction>>,
    ) -> Result<(), AgentError> {
        let connection = ensure_connected(&mut self.connection, self.connector.as_ref())?;
        let mut scanner = Scanner::new(connection.as_mut(), &self.options);

        let switched = if card_app.is_empty() {
            Ok(())
        } else {
            scanner.switch_card_and_app(&card_app.serial_number, &card_app.app_name)
        };
        let reset = scanner.connection_lost()
            || switched
                .as_ref()
                .is_err_and(|err| !scanner.is_not_present(err));

        // the transaction object is consumed here whether or not it ran
        let result = switched.and_then(|()| match transaction {
            Some(mut transaction) => scanner.transact(command, transaction.as_mut()),
            None => scanner.transact(command, &mut DefaultTransaction::new()),
        });

        if reset || scanner.connection_lost() {
            debug!("Dropping agent connection after {}", command);
            self.connection = None;
        }
        result
    }
}

/// Replace one card of a snapshot with a re-scanned version
fn merge_card(old_cards: &[Arc<Card>], card_app: &CardApp, scanned: Vec<Card>) -> Vec<Arc<Card>> {
    let mut cards: Vec<Arc<Card>> = old_cards
        .iter()
        .filter(|card| card.id() != *card_app)
        .cloned()
        .collect();
    for card in scanned {
        if card.status() == CardStatus::NoCard {
            continue;
        }
        match old_cards.iter().position(|old| old.id() == card.id()) {
            Some(index) if index <= cards.len() => cards.insert(index, Arc::new(card)),
            _ => cards.push(Arc::new(card)),
        }
    }
    cards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PinState;

    fn card(serial: &str, app: &str, status: CardStatus) -> Arc<Card> {
        Arc::new(Card::with_status(serial, app, status))
    }

    #[test]
    fn test_diff_added_changed_removed() {
        let old = vec![
            card("S1", "openpgp", CardStatus::CardUsable),
            card("S1", "piv", CardStatus::CardUsable),
            card("S2", "nks", CardStatus::CardUsable),
        ];
        let new = vec![
            card("S1", "openpgp", CardStatus::CardUsable),
            card("S1", "piv", CardStatus::CardError),
            card("S3", "p15", CardStatus::CardUsable),
        ];

        assert_eq!(diff_cards(&old, &new), vec![
            CardChange::Changed(CardApp::new("S1", "piv")),
            CardChange::Added(CardApp::new("S3", "p15")),
            CardChange::Removed(CardApp::new("S2", "nks")),
        ]);
    }

    #[test]
    fn test_diff_identical_snapshots() {
        let mut with_pin = Card::with_status("S1", "nks", CardStatus::CardUsable);
        with_pin.set_pin_states(vec![PinState::PinOk]);
        let old = vec![Arc::new(with_pin.clone())];
        let new = vec![Arc::new(with_pin)];
        assert!(diff_cards(&old, &new).is_empty());
    }

    #[test]
    fn test_diff_everything_removed() {
        let old = vec![
            card("S1", "openpgp", CardStatus::CardUsable),
            card("S2", "piv", CardStatus::CardUsable),
        ];
        assert_eq!(diff_cards(&old, &[]), vec![
            CardChange::Removed(CardApp::new("S1", "openpgp")),
            CardChange::Removed(CardApp::new("S2", "piv")),
        ]);
    }

    #[test]
    fn test_merge_card_keeps_position() {
        let old = vec![
            card("S1", "openpgp", CardStatus::CardUsable),
            card("S1", "piv", CardStatus::CardUsable),
        ];
        let id = CardApp::new("S1", "openpgp");
        let merged = merge_card(&old, &id, vec![Card::with_status(
            "S1",
            "openpgp",
            CardStatus::CardError,
        )]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].status(), CardStatus::CardError);
        assert_eq!(merged[1].app_name(), "piv");

        let merged = merge_card(&old, &id, vec![Card::with_status(
            "S1",
            "openpgp",
            CardStatus::NoCard,
        )]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].app_name(), "piv");
    }

    #[test]
    fn test_full_updates_are_coalesced() {
        let shared = Shared::default();
        shared.enqueue(Transaction::update(CardApp::default()));
        shared.enqueue(Transaction::update(CardApp::new("S1", "piv")));
        shared.enqueue(Transaction::update(CardApp::default()));
        assert_eq!(shared.state.lock().pending.len(), 2);

        shared.request_quit();
        assert_eq!(
            shared.state.lock().pending.front().map(|t| t.command.clone()),
            Some(Command::Quit)
        );
    }
}
