//! Echo canceller scheduler.
//!
//! Call setup flips bits in `desired` and queues a reconcile message; the
//! card's worker thread owns the DSP client and walks `desired ^ current`
//! one channel at a time. Queueing is coalesced: at most one reconcile is
//! pending however many bits change before the worker gets to it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use spin::Mutex;
use tracing::{debug, warn};

use crate::chanmap::LineMode;
use crate::config::ChannelMask;
use crate::dsp::types::AlgControl;
use crate::dsp::DspClient;
use crate::error::{Error, Result};
use crate::regs::CardBus;

type DspJob<B> = Box<dyn FnOnce(&mut DspClient<B>) + Send>;

enum WorkerMessage<B> {
    Reconcile,
    Run(DspJob<B>),
    Flush(Sender<()>),
    Shutdown,
}

struct Masks {
    desired: AtomicU32,
    current: AtomicU32,
    queued: AtomicBool,
}

pub struct EchoScheduler<B: CardBus + 'static> {
    card: usize,
    channels: usize,
    masks: Arc<Masks>,
    sender: Sender<WorkerMessage<B>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<B: CardBus + 'static> EchoScheduler<B> {
    /// Hand `client` to a new worker thread. Every channel starts with its
    /// canceller bypassed.
    pub fn start(card: usize, client: DspClient<B>, mode: LineMode, ec_disable: ChannelMask) -> Result<Self> {
        let masks = Arc::new(Masks {
            desired: AtomicU32::new(0),
            current: AtomicU32::new(0),
            queued: AtomicBool::new(false),
        });
        let (sender, receiver) = unbounded();

        let worker = Worker {
            card,
            channels: mode.channels(),
            ec_disable,
            client,
            masks: masks.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("r1t1-ec{card}"))
            .spawn(move || worker.run(receiver))
            .map_err(|e| {
                warn!(card, "unable to spawn echo canceller worker: {e}");
                Error::Resource("echo canceller worker")
            })?;

        Ok(Self {
            card,
            channels: mode.channels(),
            masks,
            sender,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Request the canceller on `chan` on or off.
    pub fn set(&self, chan: usize, enabled: bool) {
        if chan >= self.channels {
            return;
        }
        let bit = 1 << chan;
        if enabled {
            self.masks.desired.fetch_or(bit, Ordering::AcqRel);
        } else {
            self.masks.desired.fetch_and(!bit, Ordering::AcqRel);
        }
        self.queue();
    }

    fn queue(&self) {
        if self.masks.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.sender.send(WorkerMessage::Reconcile).is_err() {
            self.masks.queued.store(false, Ordering::Release);
        }
    }

    pub fn desired(&self) -> u32 {
        self.masks.desired.load(Ordering::Acquire)
    }

    pub fn current(&self) -> u32 {
        self.masks.current.load(Ordering::Acquire)
    }

    /// Run `f` on the worker and wait for its result.
    pub fn call<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut DspClient<B>) -> R + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let job: DspJob<B> = Box::new(move |client| {
            let _ = tx.send(f(client));
        });
        self.sender.send(WorkerMessage::Run(job)).ok()?;
        rx.recv().ok()
    }

    /// Wait until everything queued so far has run.
    pub fn flush(&self) {
        let (tx, rx) = bounded(1);
        if self.sender.send(WorkerMessage::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Drain the queue and stop the worker.
    pub fn shutdown(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        let _ = self.sender.send(WorkerMessage::Shutdown);
        if handle.join().is_err() {
            warn!(card = self.card, "echo canceller worker panicked");
        }
        debug!(card = self.card, "echo canceller worker stopped");
    }
}

impl<B: CardBus + 'static> Drop for EchoScheduler<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<B> {
    card: usize,
    channels: usize,
    ec_disable: ChannelMask,
    client: DspClient<B>,
    masks: Arc<Masks>,
}

impl<B: CardBus> Worker<B> {
    fn run(mut self, receiver: Receiver<WorkerMessage<B>>) {
        while let Ok(message) = receiver.recv() {
            match message {
                WorkerMessage::Reconcile => self.reconcile(),
                WorkerMessage::Run(job) => job(&mut self.client),
                WorkerMessage::Flush(done) => {
                    let _ = done.send(());
                }
                WorkerMessage::Shutdown => break,
            }
        }
    }

    fn reconcile(&mut self) {
        self.masks.queued.store(false, Ordering::Release);
        let desired = self.masks.desired.load(Ordering::Acquire);
        let current = self.masks.current.load(Ordering::Acquire);
        let todo = desired ^ current;
        if todo == 0 {
            return;
        }
        debug!(card = self.card, desired, current, todo, "echo canceller reconcile");

        for chan in 0..self.channels {
            let bit = 1 << chan;
            if todo & bit == 0 {
                continue;
            }

            if desired & bit != 0 {
                if self.ec_disable.contains(chan) {
                    debug!(card = self.card, chan, "echo canceller disabled for channel");
                } else if self.client.alg_control_retry(chan as u16, AlgControl::EnableEcanB).is_err() {
                    warn!(card = self.card, chan, "echo canceller enable failed");
                }
                self.masks.current.fetch_or(bit, Ordering::AcqRel);
            } else {
                if self.client.alg_control_retry(chan as u16, AlgControl::BypassEcanB).is_err() {
                    warn!(card = self.card, chan, "echo canceller bypass failed");
                }
                self.masks.current.fetch_and(!bit, Ordering::AcqRel);
            }

            thread::yield_now();
        }
    }
}
