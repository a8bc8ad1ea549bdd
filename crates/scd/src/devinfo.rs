//! Notices card changes through `SCD DEVINFO --watch`

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::assuan::{AgentConnector, AssuanTransaction, CancelHandle};
use crate::commands::ScdCommand;
use crate::error::{AgentError, Error, Result};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_millis(6400);

/// Reports every `DEVINFO_STATUS` line of a running watch
struct DevInfoTransaction<'a, F> {
    on_change: &'a F,
}

impl<F: Fn() + Send + Sync> AssuanTransaction for DevInfoTransaction<'_, F> {
    fn status(&mut self, keyword: &str, args: &str) -> std::result::Result<(), AgentError> {
        if keyword == "DEVINFO_STATUS" {
            debug!("DEVINFO_STATUS {}", args);
            (self.on_change)();
        }
        Ok(())
    }
}

/// Watches for device changes on a second agent connection
///
/// The watch command blocks until the agent ends it; it is then started
/// again. Connecting is retried with a doubling delay and given up once the
/// delay exceeds 6.4 seconds.
pub struct DevInfoWatcher {
    stop: Sender<()>,
    cancel: Arc<Mutex<Option<CancelHandle>>>,
    handle: Option<JoinHandle<()>>,
}

impl DevInfoWatcher {
    pub fn start(
        connector: Arc<dyn AgentConnector>,
        on_change: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self> {
        let (stop, stopped) = bounded::<()>(1);
        let cancel = Arc::new(Mutex::new(None));
        let current = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("scd-devinfo".to_string())
            .spawn(move || watch(connector.as_ref(), &stopped, &current, &on_change))
            .map_err(Error::ThreadSpawn)?;

        Ok(Self {
            stop,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DevInfoWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stop_requested(stopped: &Receiver<()>) -> bool {
    !matches!(stopped.try_recv(), Err(TryRecvError::Empty))
}

fn watch<F: Fn() + Send + Sync>(
    connector: &dyn AgentConnector,
    stopped: &Receiver<()>,
    current: &Mutex<Option<CancelHandle>>,
    on_change: &F,
) {
    let mut retry_delay = INITIAL_RETRY_DELAY;
    loop {
        let mut connection = match connector.connect() {
            Ok(connection) => connection,
            Err(err) => {
                if retry_delay > MAX_RETRY_DELAY {
                    warn!("Connecting to the agent failed ({}), giving up on DEVINFO", err);
                    return;
                }
                debug!("Connecting to the agent failed ({}), retrying in {:?}", err, retry_delay);
                match stopped.recv_timeout(retry_delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
                retry_delay *= 2;
                continue;
            }
        };

        *current.lock() = connection.cancel_handle();
        if stop_requested(stopped) {
            break;
        }

        let mut transaction = DevInfoTransaction { on_change };
        let result = connection.transact(&ScdCommand::DevInfoWatch.to_string(), &mut transaction);
        current.lock().take();

        if stop_requested(stopped) {
            break;
        }
        match result {
            Ok(()) => {
                debug!("DEVINFO watch ended, restarting");
                retry_delay = INITIAL_RETRY_DELAY;
                match stopped.recv_timeout(retry_delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            Err(err) => {
                debug!("DEVINFO watch failed: {}", err);
                match stopped.recv_timeout(retry_delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                retry_delay *= 2;
                if retry_delay > MAX_RETRY_DELAY {
                    warn!("DEVINFO watch keeps failing, giving up");
                    break;
                }
            }
        }
    }
    debug!("DEVINFO watcher stopped");
}
