use std::{
    collections::HashMap,
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, trace, warn};

use crate::{
    link::{LinkError, LinkTransport},
    protocol::{
        Event, Frame, Packet, PacketBuffer, PacketTypeRegistry, Priority, commands::PacketKind,
    },
};

use super::{
    BridgeConfig, BridgeError, BridgeState, LinkState,
    clock::local_clock_sync_packets,
    handler::{DeviceHandler, Dispatch, HandlerId, HandlerRegistry, HandlerTarget, invoke},
    queue::OutboundQueue,
};

const READ_CHUNK: usize = 64;

struct Control {
    state: BridgeState,
    queue: OutboundQueue,
    stop: bool,
}

/// State shared between the session, its handles and its worker.
struct Shared {
    config: BridgeConfig,
    control: Mutex<Control>,
    wakeup: Condvar,
    handlers: Mutex<HandlerRegistry>,
    module_types: Mutex<HashMap<u8, u8>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        lock(&self.control)
    }

    fn stop_requested(&self) -> bool {
        self.control().stop
    }

    /// Moves to `state` unless a stop was requested, in which case nothing changes.
    fn transition(&self, state: BridgeState) -> bool {
        let mut control = self.control();
        if control.stop {
            return false;
        }
        if control.state != state {
            info!("bridge {:?} -> {:?}", control.state, state);
            control.state = state;
        }
        true
    }

    fn enqueue(&self, packet: Packet) {
        let dropped = {
            let mut control = self.control();
            trace!(
                "queueing {:?} packet for {:#04x} ({} pending)",
                packet.priority(),
                packet.address(),
                control.queue.len()
            );
            control.queue.push(packet)
        };

        if let Some(dropped) = dropped {
            warn!(
                "outbound queue full, dropped packet for {:#04x} queued {:?} ago",
                dropped.packet.address(),
                dropped.enqueued_at.elapsed()
            );
        }
        self.wakeup.notify_all();
    }

    /// Marks the link as lost. Fire-and-forget packets are discarded, everything else stays
    /// queued for the next connection.
    fn link_lost(&self) {
        let mut control = self.control();
        let discarded = control.queue.discard_fire_and_forget();
        if discarded > 0 {
            debug!("discarded {discarded} fire-and-forget packets");
        }
        if !control.stop {
            info!("bridge {:?} -> {:?}", control.state, BridgeState::Disconnected);
            control.state = BridgeState::Disconnected;
        }
    }

    /// Sleeps for `delay` or until a stop is requested. Returns whether a stop was requested.
    fn wait_for_stop(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        let mut control = self.control();
        while !control.stop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            control = self
                .wakeup
                .wait_timeout(control, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn module_type(&self, address: u8) -> Option<u8> {
        lock(&self.module_types).get(&address).copied()
    }

    fn notify_link_state(&self, state: LinkState) {
        let handlers = lock(&self.handlers).all();
        for (id, handler) in handlers {
            let result = invoke(id, Dispatch::LinkState(state), || {
                handler.on_link_state_changed(state)
            });
            if let Err(e) = result {
                warn!("{e}");
            }
        }
    }
}

/// A cloneable front end to a session, handed to device handlers.
#[derive(Clone)]
pub struct BridgeHandle {
    shared: Arc<Shared>,
}

impl BridgeHandle {
    pub fn state(&self) -> BridgeState {
        self.shared.control().state
    }

    /// Number of packets waiting for the link.
    pub fn pending(&self) -> usize {
        self.shared.control().queue.len()
    }

    /// Queues a packet. Never blocks; see [`OutboundQueue`] for the overflow policy.
    pub fn send_packet(&self, packet: Packet) {
        self.shared.enqueue(packet);
    }

    /// Queues a packet kind.
    pub fn send<K: PacketKind>(&self, kind: &K) {
        self.send_packet(kind.to_packet());
    }

    /// Builds and queues a data packet.
    pub fn send_data(
        &self,
        address: u8,
        priority: Priority,
        command: u8,
        payload: &[u8],
    ) -> Result<(), BridgeError> {
        self.send_packet(Packet::new(address, priority, command, payload)?);
        Ok(())
    }

    /// Queues an already framed packet. The frame is validated first and sent with
    /// `priority`, whatever its priority byte says.
    pub fn send_raw(&self, bytes: &[u8], priority: Priority) -> Result<(), BridgeError> {
        let packet = Packet::decode(bytes)?;
        self.send_packet(packet.with_priority(priority));
        Ok(())
    }

    /// Registers `handler` for packets from `target`.
    pub fn register<H>(
        &self,
        target: HandlerTarget,
        handler: &Arc<H>,
    ) -> Result<HandlerId, BridgeError>
    where
        H: DeviceHandler + 'static,
    {
        self.register_targets(&[target], handler)
    }

    /// Registers `handler` for several targets at once, under a single id. Either every
    /// address is free and the registration succeeds, or nothing is registered.
    pub fn register_targets<H>(
        &self,
        targets: &[HandlerTarget],
        handler: &Arc<H>,
    ) -> Result<HandlerId, BridgeError>
    where
        H: DeviceHandler + 'static,
    {
        let weak: Weak<dyn DeviceHandler> = Arc::downgrade(handler) as Weak<dyn DeviceHandler>;
        let id = lock(&self.shared.handlers).register(targets, weak)?;
        debug!("registered handler {id} for {targets:?}");
        Ok(id)
    }

    pub fn deregister(&self, id: HandlerId) -> bool {
        lock(&self.shared.handlers).deregister(id)
    }

    /// Module family of `address`, learned from its module type report.
    pub fn module_type(&self, address: u8) -> Option<u8> {
        self.shared.module_type(address)
    }
}

/// Owns a link and the worker thread serving it.
///
/// # Example
/// ```rust
/// use std::time::Duration;
///
/// use velbus::bridge::{BridgeConfig, BridgeSession, BridgeState, LinkConfig};
/// use velbus::link::mock::MockTransport;
/// use velbus::protocol::commands::StatusRequest;
///
/// let link = MockTransport::new();
/// let config = BridgeConfig::new(LinkConfig::serial("/dev/ttyACM0"));
/// let mut session = BridgeSession::with_transport(config, link.clone());
///
/// session.handle().send(&StatusRequest::new(0x10, 0xFF).unwrap());
/// session.start().unwrap();
/// while link.written().is_empty() {
///     std::thread::sleep(Duration::from_millis(1));
/// }
///
/// assert_eq!(session.stop(), 0);
/// assert_eq!(session.state(), BridgeState::Disconnected);
/// ```
pub struct BridgeSession {
    shared: Arc<Shared>,
    registry: PacketTypeRegistry,
    transport: Option<Box<dyn LinkTransport>>,
    worker: Option<JoinHandle<Box<dyn LinkTransport>>>,
}

impl BridgeSession {
    /// Creates a session over the link described by `config.link`.
    pub fn new(config: BridgeConfig) -> Self {
        let transport = config.link.transport(&config);
        Self::from_parts(config, transport)
    }

    /// Creates a session over a caller supplied transport; `config.link` is ignored.
    pub fn with_transport<T: LinkTransport + 'static>(config: BridgeConfig, transport: T) -> Self {
        Self::from_parts(config, Box::new(transport))
    }

    fn from_parts(config: BridgeConfig, transport: Box<dyn LinkTransport>) -> Self {
        let queue = OutboundQueue::new(config.max_queue_depth);
        Self {
            shared: Arc::new(Shared {
                config,
                control: Mutex::new(Control {
                    state: BridgeState::Disconnected,
                    queue,
                    stop: false,
                }),
                wakeup: Condvar::new(),
                handlers: Mutex::new(HandlerRegistry::default()),
                module_types: Mutex::new(HashMap::new()),
            }),
            registry: PacketTypeRegistry::with_defaults(),
            transport: Some(transport),
            worker: None,
        }
    }

    /// Replaces the packet type registry; takes effect on the next start.
    pub fn with_registry(mut self, registry: PacketTypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> BridgeState {
        self.shared.control().state
    }

    /// Starts the worker, which connects and keeps reconnecting until [`stop`](Self::stop).
    pub fn start(&mut self) -> Result<(), BridgeError> {
        if let Some(worker) = &self.worker {
            if !worker.is_finished() {
                return Err(BridgeError::AlreadyRunning);
            }
        }
        // A worker that gave up reconnecting still holds the transport.
        self.join_worker();

        let transport = self.transport.take().ok_or(BridgeError::TransportLost)?;
        info!("starting bridge on {}", transport.describe());

        let worker = Worker {
            shared: Arc::clone(&self.shared),
            registry: self.registry.clone(),
            transport,
            buffer: PacketBuffer::new(),
            last_send: None,
            next_clock_sync: None,
        };
        let handle = thread::Builder::new()
            .name(String::from("velbus-bridge"))
            .spawn(move || worker.run())
            .map_err(BridgeError::Spawn)?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Stops the worker, closes the link and cancels every pending send. Returns the number
    /// of cancelled sends.
    pub fn stop(&mut self) -> usize {
        {
            let mut control = self.shared.control();
            control.stop = true;
            if self.worker.is_some() && control.state != BridgeState::Disconnected {
                info!("bridge {:?} -> {:?}", control.state, BridgeState::Closing);
                control.state = BridgeState::Closing;
            }
        }
        self.shared.wakeup.notify_all();
        self.join_worker();

        let mut control = self.shared.control();
        if control.state != BridgeState::Disconnected {
            info!("bridge {:?} -> {:?}", control.state, BridgeState::Disconnected);
        }
        control.state = BridgeState::Disconnected;
        control.stop = false;
        let cancelled = control.queue.clear();
        if cancelled > 0 {
            info!("cancelled {cancelled} pending sends");
        }
        cancelled
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(transport) => self.transport = Some(transport),
                Err(_) => error!("bridge worker crashed, its transport is lost"),
            }
        }
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

enum Outcome {
    Stopped,
    Lost(LinkError),
}

struct Worker {
    shared: Arc<Shared>,
    registry: PacketTypeRegistry,
    transport: Box<dyn LinkTransport>,
    buffer: PacketBuffer,
    last_send: Option<Instant>,
    next_clock_sync: Option<Instant>,
}

impl Worker {
    fn run(mut self) -> Box<dyn LinkTransport> {
        let mut failures = 0u32;

        loop {
            if !self.shared.transition(BridgeState::Connecting) {
                break;
            }

            match self.transport.open() {
                Ok(()) => {
                    failures = 0;
                    if !self.shared.transition(BridgeState::Connected) {
                        break;
                    }
                    self.shared.notify_link_state(LinkState::Connected);

                    let outcome = self.serve_guarded();
                    self.transport.close();
                    self.buffer.clear();

                    match outcome {
                        Outcome::Stopped => {
                            self.shared.notify_link_state(LinkState::Disconnected);
                            break;
                        }
                        Outcome::Lost(e) => {
                            warn!("lost {}: {e}", self.transport.describe());
                            self.shared.link_lost();
                            self.shared.notify_link_state(LinkState::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!("{e}");
                    self.shared.transition(BridgeState::Disconnected);
                }
            }

            let Some(delay) = self.shared.config.reconnect.delay(failures) else {
                error!(
                    "giving up on {} after {failures} failed attempts",
                    self.transport.describe()
                );
                break;
            };
            info!("reconnecting to {} in {delay:?}", self.transport.describe());
            if self.shared.wait_for_stop(delay) {
                break;
            }
        }

        self.transport.close();
        self.shared.transition(BridgeState::Disconnected);
        self.transport
    }

    /// Serves the open link; a panic in the loop counts as a link loss.
    fn serve_guarded(&mut self) -> Outcome {
        match catch_unwind(AssertUnwindSafe(|| self.serve())) {
            Ok(outcome) => outcome,
            Err(_) => {
                error!("bridge read loop panicked");
                Outcome::Lost(LinkError::Io(io::Error::other("read loop panicked")))
            }
        }
    }

    fn serve(&mut self) -> Outcome {
        let mut chunk = [0u8; READ_CHUNK];
        self.next_clock_sync = self.shared.config.clock_sync_interval.map(|_| Instant::now());

        loop {
            if self.shared.stop_requested() {
                return Outcome::Stopped;
            }

            self.sync_clock();
            if let Err(e) = self.flush() {
                return e;
            }

            match self.transport.read_available(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    self.buffer.extend(&chunk[..n]);
                    while let Some(frame) = self.buffer.next_frame() {
                        self.dispatch(frame);
                    }
                }
                Err(e) => return Outcome::Lost(e),
            }
        }
    }

    /// Writes queued packets one frame at a time until the queue is empty.
    fn flush(&mut self) -> Result<(), Outcome> {
        loop {
            let Some(pending) = self.shared.control().queue.pop() else {
                return Ok(());
            };

            self.pace();
            let bytes = pending.packet.encode();
            trace!(
                "sending {bytes:02x?} after {:?} in queue",
                pending.enqueued_at.elapsed()
            );
            if let Err(e) = self.transport.write_all(&bytes) {
                warn!(
                    "dropping packet for {:#04x} after failed write",
                    pending.packet.address()
                );
                return Err(Outcome::Lost(e));
            }
            self.last_send = Some(Instant::now());

            if self.shared.stop_requested() {
                return Err(Outcome::Stopped);
            }
        }
    }

    /// Holds back the next frame until the minimum send interval has passed.
    fn pace(&self) {
        let interval = self.shared.config.min_send_interval;
        if let Some(last) = self.last_send {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
    }

    fn sync_clock(&mut self) {
        let (Some(due), Some(interval)) =
            (self.next_clock_sync, self.shared.config.clock_sync_interval)
        else {
            return;
        };
        if Instant::now() < due {
            return;
        }

        debug!("broadcasting host time");
        for packet in local_clock_sync_packets() {
            self.shared.enqueue(packet);
        }
        self.next_clock_sync = Some(Instant::now() + interval);
    }

    fn dispatch(&mut self, frame: Frame) {
        let address = frame.packet.address();
        let event = self
            .registry
            .resolve(&frame.packet, self.shared.module_type(address));
        debug!("received from {address:#04x}: {event:?}");

        if let Event::ModuleType { module_type, .. } = event {
            let previous = lock(&self.shared.module_types).insert(address, module_type);
            if previous != Some(module_type) {
                info!("module {address:#04x} is of type {module_type:#04x}");
            }
        }

        let handlers = lock(&self.shared.handlers).handlers_for(address);
        for (id, handler) in handlers {
            let result = invoke(id, Dispatch::Packet { address }, || {
                handler.on_packet_received(&frame, &event)
            });
            if let Err(e) = result {
                warn!("{e}");
            }
        }
    }
}
