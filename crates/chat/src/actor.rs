use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use struk_ocr::OcrBackend;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::session::{ConfirmationSession, Inbound, Services, SessionState};
use crate::EngineError;

const MAILBOX_CAPACITY: usize = 32;

type Mailboxes = Arc<Mutex<HashMap<String, mpsc::Sender<Command>>>>;

enum Command {
    Deliver {
        inbound: Inbound,
        reply: oneshot::Sender<Option<String>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
}

/// Routes messages to one task per sender. Each task owns that sender's
/// session and handles its mailbox strictly in order; different senders
/// proceed independently.
///
/// A task whose session is Idle and whose mailbox has been quiet for the
/// idle timeout exits and drops its map entry; the sender's next message
/// starts a fresh session.
pub struct Dispatcher<R: OcrBackend + 'static> {
    services: Arc<Services<R>>,
    mailboxes: Mailboxes,
    idle_timeout: Duration,
}

impl<R: OcrBackend + 'static> Dispatcher<R> {
    pub fn new(services: Arc<Services<R>>) -> Self {
        let idle_timeout = Duration::from_secs(services.settings.idle_session_secs.max(1));
        Self::with_idle_timeout(services, idle_timeout)
    }

    pub fn with_idle_timeout(services: Arc<Services<R>>, idle_timeout: Duration) -> Self {
        Self { services, mailboxes: Arc::new(Mutex::new(HashMap::new())), idle_timeout }
    }

    pub fn services(&self) -> &Arc<Services<R>> {
        &self.services
    }

    /// Deliver one message and wait for the session's reply.
    pub async fn dispatch(&self, sender: &str, inbound: Inbound) -> Result<Option<String>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(sender, Command::Deliver { inbound, reply: tx }).await?;
        self.await_reply(sender, rx).await
    }

    pub async fn session_state(&self, sender: &str) -> Result<SessionState, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(sender, Command::State { reply: tx }).await?;
        self.await_reply(sender, rx).await
    }

    pub async fn active_senders(&self) -> usize {
        self.mailboxes.lock().await.len()
    }

    async fn send(&self, sender: &str, command: Command) -> Result<(), EngineError> {
        let mailbox = self.mailbox(sender).await;
        let command = match mailbox.send(command).await {
            Ok(()) => return Ok(()),
            Err(mpsc::error::SendError(command)) => command,
        };

        // The task is gone; start a fresh session and retry once.
        warn!(sender, "Sender mailbox closed; restarting session");
        let mailbox = self.restart(sender).await;
        mailbox
            .send(command)
            .await
            .map_err(|_| EngineError::MailboxClosed(sender.to_string()))
    }

    async fn await_reply<T>(&self, sender: &str, rx: oneshot::Receiver<T>) -> Result<T, EngineError> {
        match rx.await {
            Ok(value) => Ok(value),
            Err(_) => {
                // The task died while handling the message.
                self.mailboxes.lock().await.remove(sender);
                Err(EngineError::MailboxClosed(sender.to_string()))
            }
        }
    }

    async fn mailbox(&self, sender: &str) -> mpsc::Sender<Command> {
        let mut mailboxes = self.mailboxes.lock().await;
        if let Some(tx) = mailboxes.get(sender) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let tx = self.spawn_session(sender);
        mailboxes.insert(sender.to_string(), tx.clone());
        tx
    }

    async fn restart(&self, sender: &str) -> mpsc::Sender<Command> {
        let tx = self.spawn_session(sender);
        self.mailboxes.lock().await.insert(sender.to_string(), tx.clone());
        tx
    }

    fn spawn_session(&self, sender: &str) -> mpsc::Sender<Command> {
        let (tx, mut rx) = mpsc::channel::<Command>(MAILBOX_CAPACITY);
        let own = tx.downgrade();
        let services = Arc::clone(&self.services);
        let mailboxes = Arc::clone(&self.mailboxes);
        let idle_timeout = self.idle_timeout;
        let sender = sender.to_string();
        let mut session = ConfirmationSession::new(&sender);
        info!(sender = %sender, "Starting session");

        tokio::spawn(async move {
            loop {
                let received = tokio::time::timeout(idle_timeout, rx.recv()).await;
                let command = match received {
                    Ok(Some(command)) => command,
                    Ok(None) => break,
                    Err(_) if session.state() != SessionState::Idle => continue,
                    Err(_) => {
                        // No new handle can be cloned while the map is locked.
                        let mut map = mailboxes.lock().await;
                        if !rx.is_empty() {
                            continue;
                        }
                        let ours = match (map.get(&sender), own.upgrade()) {
                            (Some(entry), Some(tx)) => entry.same_channel(&tx),
                            _ => false,
                        };
                        if ours {
                            map.remove(&sender);
                        }
                        rx.close();
                        drop(map);
                        debug!(sender = %sender, "Reaped idle session");
                        // Handles cloned before the lock may still have sent.
                        while let Ok(command) = rx.try_recv() {
                            run_command(&mut session, &services, command).await;
                        }
                        break;
                    }
                };
                run_command(&mut session, &services, command).await;
            }
        });
        tx
    }
}

async fn run_command<R: OcrBackend>(
    session: &mut ConfirmationSession,
    services: &Services<R>,
    command: Command,
) {
    match command {
        Command::Deliver { inbound, reply } => {
            let response = session.handle(services, inbound).await;
            let _ = reply.send(response);
        }
        Command::State { reply } => {
            let _ = reply.send(session.state());
        }
    }
}
