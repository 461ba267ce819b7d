//! Sync scheduler actor.
//!
//! Owns the hourly timer and the manual trigger, and keeps at most one sync
//! run in flight. A trigger that arrives mid-run is queued; further triggers
//! collapse into that single queued run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::config::Settings;
use crate::run::{RunSummary, SyncService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The scheduler was idle and a run started.
    Started,
    /// A run was in flight; one more run will follow it.
    Queued,
    /// A run was in flight and another was already queued.
    Collapsed,
    /// The scheduler has shut down.
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub running: bool,
    pub runs_completed: u64,
    pub last_run: Option<RunSummary>,
}

enum Message {
    Trigger(oneshot::Sender<TriggerOutcome>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle for talking to the scheduler actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<Message>,
    settings: Arc<watch::Sender<Settings>>,
    status: watch::Receiver<SchedulerStatus>,
}

impl SchedulerHandle {
    /// Manual trigger; same entry point as a timer tick.
    pub async fn trigger(&self) -> TriggerOutcome {
        let (reply, rx) = oneshot::channel();
        if self.sender.send(Message::Trigger(reply)).await.is_err() {
            return TriggerOutcome::Stopped;
        }
        rx.await.unwrap_or(TriggerOutcome::Stopped)
    }

    /// Settings for runs that start after this call; a run in flight keeps its snapshot.
    pub fn update_settings(&self, settings: Settings) {
        self.settings.send_replace(settings);
    }

    pub fn status(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    /// Stop the timer and refuse new triggers. Returns once the run in flight,
    /// if any, has finished.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.sender.send(Message::Shutdown(done)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

enum State {
    Idle,
    Running(JoinHandle<RunSummary>),
}

struct SchedulerActor {
    service: Arc<SyncService>,
    settings: watch::Receiver<Settings>,
    receiver: mpsc::Receiver<Message>,
    status: watch::Sender<SchedulerStatus>,
    state: State,
    pending: bool,
    interval: Duration,
}

impl SchedulerActor {
    async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip first tick (immediate)
        timer.tick().await;

        let done = loop {
            tokio::select! {
                _ = timer.tick() => {
                    tracing::debug!("Sync timer fired");
                    self.trigger();
                }
                msg = self.receiver.recv() => {
                    match msg {
                        Some(Message::Trigger(reply)) => {
                            let outcome = self.trigger();
                            let _ = reply.send(outcome);
                        }
                        Some(Message::Shutdown(done)) => break Some(done),
                        None => break None,
                    }
                }
                joined = wait_for_run(&mut self.state) => {
                    self.finish(joined);
                }
            }
        };

        drop(timer);
        self.receiver.close();
        if let State::Running(handle) = std::mem::replace(&mut self.state, State::Idle) {
            tracing::info!("Waiting for the running sync to finish");
            let joined = handle.await;
            self.pending = false;
            self.finish(joined);
        }
        tracing::info!("Sync scheduler stopped");
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    fn trigger(&mut self) -> TriggerOutcome {
        match self.state {
            State::Idle => {
                self.start();
                TriggerOutcome::Started
            }
            State::Running(_) if self.pending => {
                tracing::debug!("Sync already running with one queued; trigger collapsed");
                TriggerOutcome::Collapsed
            }
            State::Running(_) => {
                tracing::info!("Sync already running; queued one more run");
                self.pending = true;
                self.publish();
                TriggerOutcome::Queued
            }
        }
    }

    fn start(&mut self) {
        let settings = self.settings.borrow().clone();
        let service = Arc::clone(&self.service);
        let handle = tokio::spawn(async move { service.run_with_settings(&settings).await });
        self.state = State::Running(handle);
        self.publish();
    }

    /// Back to idle whatever the run's outcome, then start the queued run if any.
    fn finish(&mut self, joined: Result<RunSummary, JoinError>) {
        self.state = State::Idle;
        let summary = match joined {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::error!("Sync run crashed: {}", e);
                None
            }
        };
        self.status.send_modify(|s| {
            s.runs_completed += 1;
            if summary.is_some() {
                s.last_run = summary;
            }
        });

        if self.pending {
            self.pending = false;
            self.start();
        } else {
            self.publish();
        }
    }

    fn publish(&self) {
        let running = matches!(self.state, State::Running(_));
        self.status.send_modify(|s| s.running = running);
    }
}

async fn wait_for_run(state: &mut State) -> Result<RunSummary, JoinError> {
    match state {
        State::Running(handle) => handle.await,
        State::Idle => std::future::pending().await,
    }
}

/// Create and start the scheduler actor.
pub fn spawn_scheduler(service: Arc<SyncService>, settings: Settings) -> SchedulerHandle {
    let (sender, receiver) = mpsc::channel(8);
    let interval = settings.interval();
    let (settings_tx, settings_rx) = watch::channel(settings);
    let (status_tx, status_rx) = watch::channel(SchedulerStatus::default());

    let actor = SchedulerActor {
        service,
        settings: settings_rx,
        receiver,
        status: status_tx,
        state: State::Idle,
        pending: false,
        interval,
    };
    tokio::spawn(actor.run());

    SchedulerHandle {
        sender,
        settings: Arc::new(settings_tx),
        status: status_rx,
    }
}
