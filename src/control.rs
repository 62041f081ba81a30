//! Interactive control for live loops.
//!
//! The loop polls a [`ControlInput`] once per cycle, after the frame has been
//! displayed. Quit raises the shared [`ShutdownFlag`], which the loop checks at
//! the top of the next cycle and the reconnect loop checks between attempts.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    /// Save the current raw frame.
    Capture,
    /// Stop after the current cycle.
    Quit,
}

impl ControlSignal {
    /// Map a key (or typed line) to a signal. Case-insensitive.
    pub fn from_key(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "c" => Some(Self::Capture),
            "q" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Shared cooperative cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on shutdown.
    ///
    /// Returns false if shutdown was raised before or during the wait.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_raised() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

/// Source of control signals, polled without blocking.
pub trait ControlInput {
    fn poll(&mut self) -> Option<ControlSignal>;
}

/// Control input that never signals. Useful for bounded runs and tests.
#[derive(Debug, Default)]
pub struct NoControl;

impl ControlInput for NoControl {
    fn poll(&mut self) -> Option<ControlSignal> {
        None
    }
}

/// Terminal control: Ctrl-C quits, `c` + Enter captures, `q` + Enter quits.
///
/// Stdin is read on a helper thread that only forwards parsed signals; all
/// pipeline work stays on the caller's thread.
pub struct TerminalControl {
    rx: Receiver<ControlSignal>,
    shutdown: ShutdownFlag,
}

impl TerminalControl {
    pub fn install(shutdown: ShutdownFlag) -> Result<Self> {
        let (tx, rx) = mpsc::channel();

        let ctrlc_tx = tx.clone();
        let ctrlc_flag = shutdown.clone();
        ctrlc::set_handler(move || {
            ctrlc_flag.raise();
            let _ = ctrlc_tx.send(ControlSignal::Quit);
        })
        .context("install Ctrl-C handler")?;

        std::thread::Builder::new()
            .name("stdin-control".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if let Some(signal) = ControlSignal::from_key(&line) {
                        if tx.send(signal).is_err() {
                            break;
                        }
                    }
                }
            })
            .context("spawn stdin control thread")?;

        Ok(Self { rx, shutdown })
    }
}

impl ControlInput for TerminalControl {
    fn poll(&mut self) -> Option<ControlSignal> {
        match self.rx.try_recv() {
            Ok(ControlSignal::Quit) => {
                self.shutdown.raise();
                Some(ControlSignal::Quit)
            }
            Ok(signal) => Some(signal),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
