//! Terminal host events.
//!
//! Focus reports drive the visibility signal; a few keys end the session.
//! Reading crossterm events blocks, so it runs on a blocking thread that
//! polls with a short timeout to stay responsive to shutdown.

use std::io::IsTerminal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;
use wallet_engine::VisibilitySignal;
use wallet_types::Visibility;

const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(25);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Visibility at startup: a session attached to a terminal is in front of
/// the user; anything else (pipes, redirection) is not.
pub fn initial_visibility() -> Option<Visibility> {
    let attached = std::io::stdin().is_terminal() && std::io::stdout().is_terminal();
    Some(Visibility::from_foreground(attached))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Quit,
    Redraw,
    Error(String),
}

/// What a raw terminal event means to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Visibility(Visibility),
    Quit,
    Redraw,
}

fn translate(event: &Event) -> Option<Input> {
    match event {
        Event::FocusGained => Some(Input::Visibility(Visibility::Foreground)),
        Event::FocusLost => Some(Input::Visibility(Visibility::Background)),
        Event::Resize(..) => Some(Input::Redraw),
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            ..
        }) => match code {
            KeyCode::Char('q') | KeyCode::Esc => Some(Input::Quit),
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Some(Input::Quit),
            _ => None,
        },
        _ => None,
    }
}

pub struct HostPump {
    rx: mpsc::Receiver<HostEvent>,
    stop: Arc<AtomicBool>,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl HostPump {
    #[must_use]
    pub fn new(signal: VisibilitySignal) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();

        let join = tokio::task::spawn_blocking(move || pump_loop(&stop2, &signal, &tx));
        Self {
            rx,
            stop,
            join: Some(join),
        }
    }

    pub async fn recv(&mut self) -> Option<HostEvent> {
        self.rx.recv().await
    }

    pub async fn shutdown(&mut self) {
        self.rx.close();
        self.stop.store(true, Ordering::Release);
        if let Some(join) = self.join.take() {
            let _ = tokio::time::timeout(Duration::from_secs(2), join).await;
        }
    }
}

impl Drop for HostPump {
    fn drop(&mut self) {
        // Best-effort; never block in Drop.
        self.rx.close();
        self.stop.store(true, Ordering::Release);
    }
}

fn pump_loop(stop: &AtomicBool, signal: &VisibilitySignal, tx: &mpsc::Sender<HostEvent>) {
    while !stop.load(Ordering::Acquire) {
        let event = match event::poll(EVENT_POLL_TIMEOUT) {
            Ok(true) => event::read(),
            Ok(false) => continue,
            Err(e) => Err(e),
        };
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                let _ = tx.blocking_send(HostEvent::Error(e.to_string()));
                break;
            }
        };

        let forwarded = match translate(&event) {
            Some(Input::Visibility(visibility)) => {
                signal.publish(visibility);
                // Redraw so the card reflects the new state promptly.
                Some(HostEvent::Redraw)
            }
            Some(Input::Quit) => Some(HostEvent::Quit),
            Some(Input::Redraw) => Some(HostEvent::Redraw),
            None => None,
        };
        if let Some(host_event) = forwarded
            && tx.blocking_send(host_event).is_err()
        {
            break;
        }
    }
}
