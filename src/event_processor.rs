//! The event processor: buffers, deduplicates and summarizes events, and delivers them from a
//! background thread.
use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{sync_channel, SyncSender},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::Duration,
};

use serde::Serialize;
use tokio::{
    sync::{mpsc, mpsc::error::TrySendError, Semaphore},
    task::{JoinError, JoinSet},
    time::{Instant, Interval, MissedTickBehavior},
};

use crate::{
    diagnostics::{DiagnosticCounters, DiagnosticId, DiagnosticsManager},
    events::now_millis,
    output::{EventOutputFormatter, PendingEvent},
    sender::{DeliveryResult, EventSender},
    summarizer::{EventSummarizer, EventSummary},
    user_keys::UserKeyCache,
    Config, Error, Event, FeatureRequestEvent, Result,
};

/// Number of flushes that may be in flight at the same time.
const MAX_FLUSH_WORKERS: usize = 5;

/// Accepts analytics events from the SDK.
///
/// None of the methods block on network I/O, and none of them report delivery problems: those
/// are logged and counted in diagnostic events.
pub trait EventProcessor: Send + Sync {
    /// Queue an event. Dropped if the processor is saturated or closed.
    fn submit(&self, event: Event);

    /// Ask for buffered events to be delivered now. Returns immediately.
    fn flush(&self);

    /// Deliver buffered events and stop the background thread. Blocks until the final delivery
    /// (including its retry) has completed. Calling it more than once is harmless.
    fn close(&self);
}

/// An [`EventProcessor`] that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventProcessor;

impl EventProcessor for NullEventProcessor {
    fn submit(&self, _event: Event) {}

    fn flush(&self) {}

    fn close(&self) {}
}

/// Create the event processor matching `config`.
///
/// Returns a [`NullEventProcessor`] when events are disabled or the SDK is offline. Otherwise
/// starts a [`DefaultEventProcessor`], with diagnostic events unless opted out. Each call
/// generates a new [`DiagnosticId`].
pub fn new_event_processor(config: &Config) -> Result<Box<dyn EventProcessor>> {
    if !config.send_events || config.offline {
        log::debug!(target: "flag_events", "analytics events are disabled");
        return Ok(Box::new(NullEventProcessor));
    }

    let diagnostics = (!config.diagnostic_opt_out).then(|| {
        DiagnosticsManager::new(
            DiagnosticId::new(&config.sdk_key),
            config,
            config.start_wait,
            now_millis(),
        )
    });

    Ok(Box::new(DefaultEventProcessor::start(
        config.clone(),
        diagnostics,
    )?))
}

enum Message {
    Event(Event),
    Flush,
    /// Reply once all earlier messages are processed (and, optionally, all in-flight deliveries
    /// have completed).
    #[cfg(test)]
    Sync {
        wait_for_sends: bool,
        reply: SyncSender<()>,
    },
    Close {
        reply: SyncSender<()>,
    },
}

/// The event processor used when events are enabled.
///
/// All pipeline state lives on a dedicated thread (`flag-events`) that runs a single-threaded
/// tokio runtime. Callers only enqueue messages onto its bounded mailbox.
pub struct DefaultEventProcessor {
    mailbox: mpsc::Sender<Message>,
    /// Events dropped because the mailbox was full. Reported together with outbox overflows.
    mailbox_dropped: Arc<AtomicU64>,
    /// Set while events are being dropped at the mailbox, so the warning is logged once.
    mailbox_full: AtomicBool,
    closed: AtomicBool,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DefaultEventProcessor {
    /// Start the background thread.
    pub fn start(
        config: Config,
        diagnostics: Option<DiagnosticsManager>,
    ) -> Result<DefaultEventProcessor> {
        let disabled = Arc::new(AtomicBool::new(false));
        let mailbox_dropped = Arc::new(AtomicU64::new(0));

        let sender = EventSender::new(&config, disabled.clone())?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let (mailbox, receiver) = mpsc::channel(config.capacity);

        let event_loop = EventLoop {
            receiver,
            dispatcher: EventDispatcher::new(&config, disabled, mailbox_dropped.clone()),
            diagnostics,
            formatter: Arc::new(EventOutputFormatter::new(&config)),
            sender,
            flush_workers: Arc::new(Semaphore::new(MAX_FLUSH_WORKERS)),
            tasks: JoinSet::new(),
            flush_interval: config.flush_interval,
            user_keys_flush_interval: config.user_keys_flush_interval,
            diagnostic_recording_interval: config.diagnostic_recording_interval,
        };

        let join_handle = std::thread::Builder::new()
            .name("flag-events".to_owned())
            .spawn(move || runtime.block_on(event_loop.run()))?;

        Ok(DefaultEventProcessor {
            mailbox,
            mailbox_dropped,
            mailbox_full: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    /// Close the processor and wait for the background thread to exit.
    ///
    /// Returns an error if the background thread has panicked.
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (reply, done) = sync_channel(1);
        if self.post_blocking(Message::Close { reply }) {
            // Error means the thread exited without replying; join below reports why.
            let _ = done.recv();
        }

        let join_handle = self
            .join_handle
            .lock()
            .map_err(|_| Error::EventProcessorPanicked)?
            .take();
        if let Some(join_handle) = join_handle {
            join_handle
                .join()
                .map_err(|_| Error::EventProcessorPanicked)?;
        }

        Ok(())
    }

    /// Enqueue without waiting. Returns `false` if the message was dropped.
    fn post(&self, message: Message) -> bool {
        let is_event = matches!(message, Message::Event(_));
        match self.mailbox.try_send(message) {
            Ok(()) => {
                if is_event {
                    self.mailbox_full.store(false, Ordering::Relaxed);
                }
                true
            }
            Err(TrySendError::Full(Message::Event(_))) => {
                if !self.mailbox_full.swap(true, Ordering::Relaxed) {
                    log::warn!(target: "flag_events", "events are being produced faster than they can be processed, dropping events");
                }
                self.mailbox_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Full(_)) => {
                log::debug!(target: "flag_events", "event mailbox is full, dropping flush request");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue, waiting for room in the mailbox. Used for control messages that must not be lost.
    ///
    /// `blocking_send` panics when called from an async context, so this polls instead.
    fn post_blocking(&self, mut message: Message) -> bool {
        loop {
            match self.mailbox.try_send(message) {
                Ok(()) => return true,
                Err(TrySendError::Closed(_)) => return false,
                Err(TrySendError::Full(returned)) => {
                    message = returned;
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Block until all previously submitted messages have been processed. With
    /// `wait_for_sends`, also wait for in-flight deliveries.
    #[cfg(test)]
    pub(crate) fn sync(&self, wait_for_sends: bool) {
        let (reply, done) = sync_channel(1);
        if self.post_blocking(Message::Sync {
            wait_for_sends,
            reply,
        }) {
            let _ = done.recv();
        }
    }
}

impl EventProcessor for DefaultEventProcessor {
    fn submit(&self, event: Event) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.post(Message::Event(event));
    }

    fn flush(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.post(Message::Flush);
    }

    fn close(&self) {
        if let Err(err) = self.shutdown() {
            log::error!(target: "flag_events", "failed to close event processor: {}", err);
        }
    }
}

/// Snapshot handed from the loop to a flush worker.
#[derive(Debug)]
pub(crate) struct FlushPayload {
    pub events: Vec<PendingEvent>,
    pub summary: EventSummary,
}

/// Mutable pipeline state. Only ever touched by the event loop.
pub(crate) struct EventDispatcher {
    outbox: Vec<PendingEvent>,
    /// Number of outbox entries that count against `capacity` (index records do not).
    counted: usize,
    capacity: usize,
    capacity_exceeded: bool,
    summarizer: EventSummarizer,
    user_keys: UserKeyCache,
    inline_users: bool,
    /// Last known clock of the collector, in epoch milliseconds.
    last_server_time: i64,
    counters: DiagnosticCounters,
    mailbox_dropped: Arc<AtomicU64>,
    disabled: Arc<AtomicBool>,
}

impl EventDispatcher {
    pub fn new(
        config: &Config,
        disabled: Arc<AtomicBool>,
        mailbox_dropped: Arc<AtomicU64>,
    ) -> EventDispatcher {
        EventDispatcher {
            outbox: Vec::new(),
            counted: 0,
            capacity: config.capacity,
            capacity_exceeded: false,
            summarizer: EventSummarizer::new(),
            user_keys: UserKeyCache::new(config.user_keys_capacity),
            inline_users: config.inline_users_in_events,
            last_server_time: 0,
            counters: DiagnosticCounters::default(),
            mailbox_dropped,
            disabled,
        }
    }

    pub fn process_event(&mut self, event: Event) {
        if self.disabled.load(Ordering::Acquire) {
            return;
        }

        self.summarizer.summarize_event(&event);

        let (add_full_event, debug_event) = match &event {
            Event::FeatureRequest(fe) => (
                fe.track_events,
                self.should_debug(fe).then(|| fe.clone()),
            ),
            Event::Identify(_) | Event::Custom(_) => (true, None),
        };

        // A user that is inlined in the full event needs no index record.
        if !(add_full_event && self.inline_users) {
            let user = event.user();
            let known = self.user_keys.notice_user(&user.key, event.creation_date());
            if known {
                self.counters.deduplicated_users += 1;
            } else if !matches!(event, Event::Identify(_)) {
                self.outbox.push(PendingEvent::Index {
                    creation_date: event.creation_date(),
                    user: user.clone(),
                });
            }
        }

        if add_full_event {
            self.add_to_outbox(PendingEvent::Full(event));
        }
        if let Some(debug_event) = debug_event {
            self.add_to_outbox(PendingEvent::Debug(debug_event));
        }
    }

    /// Debug events are produced until `debugEventsUntilDate`, judged by whichever clock (ours or
    /// the collector's) is further ahead.
    fn should_debug(&self, event: &FeatureRequestEvent) -> bool {
        match event.debug_events_until_date {
            Some(until) => until > now_millis().max(self.last_server_time),
            None => false,
        }
    }

    fn add_to_outbox(&mut self, event: PendingEvent) {
        if self.counted >= self.capacity {
            if !self.capacity_exceeded {
                self.capacity_exceeded = true;
                log::warn!(target: "flag_events", capacity = self.capacity;
                    "exceeded event queue capacity. Increase capacity to avoid dropping events");
            }
            self.counters.dropped_events += 1;
            return;
        }
        self.capacity_exceeded = false;
        self.counted += 1;
        self.outbox.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.outbox.is_empty() && self.summarizer.is_empty()
    }

    /// Take everything buffered, leaving the dispatcher empty. `None` if there is nothing to send.
    pub fn take_payload(&mut self) -> Option<FlushPayload> {
        if self.is_empty() {
            return None;
        }
        let events = mem::take(&mut self.outbox);
        self.counted = 0;
        self.counters.events_in_last_batch = events.len() as u64;
        Some(FlushPayload {
            events,
            summary: self.summarizer.snapshot(),
        })
    }

    /// Take the diagnostic counters, resetting them to zero.
    pub fn take_diagnostic_counters(&mut self) -> DiagnosticCounters {
        let mut counters = mem::take(&mut self.counters);
        counters.dropped_events += self.mailbox_dropped.swap(0, Ordering::Relaxed);
        counters
    }

    pub fn clear_user_keys(&mut self) {
        log::debug!(target: "flag_events", "forgetting known user keys");
        self.user_keys.clear();
    }

    pub fn set_server_time(&mut self, server_time: i64) {
        self.last_server_time = server_time;
    }
}

struct EventLoop {
    receiver: mpsc::Receiver<Message>,
    dispatcher: EventDispatcher,
    diagnostics: Option<DiagnosticsManager>,
    formatter: Arc<EventOutputFormatter>,
    sender: EventSender,
    flush_workers: Arc<Semaphore>,
    /// In-flight deliveries (flushes and diagnostic events).
    tasks: JoinSet<DeliveryResult>,
    flush_interval: Duration,
    user_keys_flush_interval: Duration,
    diagnostic_recording_interval: Duration,
}

impl EventLoop {
    async fn run(mut self) {
        log::debug!(target: "flag_events", "event processor started");

        if let Some(diagnostics) = &self.diagnostics {
            let init_event = diagnostics.create_init_event();
            self.send_diagnostic_event(&init_event);
        }

        let mut flush_timer = interval(self.flush_interval);
        let mut user_keys_timer = interval(self.user_keys_flush_interval);
        let mut diagnostic_timer = self
            .diagnostics
            .is_some()
            .then(|| interval(self.diagnostic_recording_interval));

        loop {
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(Message::Event(event)) => self.dispatcher.process_event(event),
                    Some(Message::Flush) => self.flush(),
                    #[cfg(test)]
                    Some(Message::Sync { wait_for_sends, reply }) => {
                        if wait_for_sends {
                            self.wait_for_sends().await;
                        }
                        let _ = reply.send(());
                    }
                    Some(Message::Close { reply }) => {
                        // Wait for busy workers so the final flush is never skipped.
                        self.wait_for_sends().await;
                        self.flush();
                        self.wait_for_sends().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        log::debug!(target: "flag_events", "event processor handle dropped");
                        break;
                    }
                },
                _ = flush_timer.tick() => self.flush(),
                _ = user_keys_timer.tick() => self.dispatcher.clear_user_keys(),
                _ = tick(&mut diagnostic_timer) => self.send_periodic_diagnostic(),
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.handle_delivery(result);
                }
            }
        }

        log::debug!(target: "flag_events", "event processor stopped");
    }

    fn flush(&mut self) {
        if self.sender.is_disabled() || self.dispatcher.is_empty() {
            return;
        }

        let permit = match self.flush_workers.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                log::debug!(target: "flag_events", "all flush workers are busy, keeping events for the next flush");
                return;
            }
        };
        let Some(payload) = self.dispatcher.take_payload() else {
            return;
        };

        let payload_id = uuid::Uuid::new_v4().to_string();
        let formatter = self.formatter.clone();
        let sender = self.sender.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            let records = formatter.make_output_events(&payload.events, &payload.summary);
            let body = match serde_json::to_vec(&records) {
                Ok(body) => body,
                Err(err) => {
                    log::error!(target: "flag_events", "failed to serialize analytics events: {}", err);
                    return DeliveryResult::Failed;
                }
            };
            log::debug!(target: "flag_events", count = records.len(), payload_id = payload_id.as_str();
                "flushing events");
            sender.send_events(body, &payload_id).await
        });
    }

    fn send_periodic_diagnostic(&mut self) {
        let counters = self.dispatcher.take_diagnostic_counters();
        if let Some(diagnostics) = &mut self.diagnostics {
            let event = diagnostics.create_periodic_event(counters);
            self.send_diagnostic_event(&event);
        }
    }

    fn send_diagnostic_event(&mut self, event: &impl Serialize) {
        if self.sender.is_disabled() {
            return;
        }
        let body = match serde_json::to_vec(event) {
            Ok(body) => body,
            Err(err) => {
                log::error!(target: "flag_events", "failed to serialize diagnostic event: {}", err);
                return;
            }
        };
        let sender = self.sender.clone();
        self.tasks
            .spawn(async move { sender.send_diagnostic(body).await });
    }

    async fn wait_for_sends(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            self.handle_delivery(result);
        }
    }

    fn handle_delivery(&mut self, result: std::result::Result<DeliveryResult, JoinError>) {
        match result {
            Ok(DeliveryResult::Delivered {
                server_time: Some(server_time),
            }) => self.dispatcher.set_server_time(server_time),
            Ok(_) => {}
            Err(err) => {
                log::error!(target: "flag_events", "event delivery task failed: {}", err);
            }
        }
    }
}

/// A timer that first fires one `period` from now.
fn interval(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
