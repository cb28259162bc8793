//! Simulated packet link between the host and the target.
//!
//! Host packets land on a device queue drained by a receive-interrupt thread.
//! While the system runs, a packet either wakes the first-packet hook (which
//! suspends the system) or goes to the task-mode agent. While the external
//! agent owns the CPU the device is polled directly.

use super::{SimCpu, SimStep, SimTrace};
use crate::agent::Agent;
use crate::comm::{CommInterface, CommMode, PacketHook};
use crate::rpc::{self, HostMessage, Packet, Reply, Request, RpcXport};
use anyhow::{bail, Context as _, Result};
use crossbeam_channel::{after, never, select, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

pub struct SimLink {
    cpu: Arc<SimCpu>,
    mode: Mutex<CommMode>,
    hook: Mutex<Option<PacketHook>>,
    device_rx: Receiver<Packet>,
    poll: (Sender<Packet>, Receiver<Packet>),
    task: (Sender<Packet>, Receiver<Packet>),
    cancel: (Sender<()>, Receiver<()>),
    out_tx: Sender<HostMessage>,
    trace: SimTrace,
}

impl SimLink {
    /// Create the link and the host's end of it.
    pub fn new(cpu: Arc<SimCpu>, trace: SimTrace) -> (Arc<Self>, HostEnd) {
        let (device_tx, device_rx) = crossbeam_channel::unbounded();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();

        let link = Arc::new(Self {
            cpu,
            mode: Mutex::new(CommMode::Interrupt),
            hook: Mutex::new(None),
            device_rx: device_rx.clone(),
            poll: crossbeam_channel::unbounded(),
            task: crossbeam_channel::unbounded(),
            cancel: crossbeam_channel::bounded(1),
            out_tx,
            trace,
        });

        let weak = Arc::downgrade(&link);
        let spawned = thread::Builder::new()
            .name("tWdbIsr".to_string())
            .spawn(move || receive_interrupt(&weak, &device_rx));
        if let Err(e) = spawned {
            log::error!("Failed to start link receive thread: {e}");
        }

        let host = HostEnd {
            tx: device_tx,
            rx: out_rx,
            next_seq: Arc::new(AtomicU32::new(1)),
            notifies: Arc::new(AtomicUsize::new(0)),
        };
        (link, host)
    }

    /// Transport for the task-mode agent. Its receive can be cancelled.
    pub fn task_xport(&self) -> LinkXport {
        LinkXport {
            inbound: self.task.1.clone(),
            device: None,
            cancel: Some(self.cancel.1.clone()),
            gate: Some(self.cpu.clone()),
            out_tx: self.out_tx.clone(),
            trace: self.trace.clone(),
        }
    }

    /// Transport for the external agent. Polls the device as well as the
    /// packets the receive interrupt forwarded.
    pub fn extern_xport(&self) -> LinkXport {
        LinkXport {
            inbound: self.poll.1.clone(),
            device: Some(self.device_rx.clone()),
            cancel: None,
            gate: None,
            out_tx: self.out_tx.clone(),
            trace: self.trace.clone(),
        }
    }

    pub fn has_hook(&self) -> bool {
        self.hook.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn route(&self, packet: Packet) {
        if self.cpu.is_external() {
            forward(&self.poll.0, packet);
            return;
        }
        let hook = self.hook.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match hook {
            Some(hook) => {
                forward(&self.poll.0, packet);
                hook();
            }
            None if self.mode() == CommMode::Interrupt => forward(&self.task.0, packet),
            None => forward(&self.poll.0, packet),
        }
    }
}

fn forward(tx: &Sender<Packet>, packet: Packet) {
    if tx.send(packet).is_err() {
        log::warn!("Dropping packet, no receiver");
    }
}

fn receive_interrupt(link: &Weak<SimLink>, device_rx: &Receiver<Packet>) {
    for packet in device_rx {
        let Some(link) = link.upgrade() else { break };
        log::trace!("Packet {} received", packet.seq);
        link.route(packet);
    }
}

impl CommInterface for SimLink {
    fn mode_set(&self, mode: CommMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
        self.trace.record(SimStep::CommMode(mode));
    }

    fn mode(&self) -> CommMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hook_add(&self, hook: Option<PacketHook>) {
        *self.hook.lock().unwrap_or_else(PoisonError::into_inner) = hook;
    }

    fn cancel(&self) {
        match self.cancel.0.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => log::warn!("Receive cancel with no receiver"),
        }
    }
}

/// One agent-side transport over the link.
pub struct LinkXport {
    inbound: Receiver<Packet>,
    device: Option<Receiver<Packet>>,
    cancel: Option<Receiver<()>>,
    /// Set for the task transport: a task is not scheduled while the
    /// external agent owns the CPU.
    gate: Option<Arc<SimCpu>>,
    out_tx: Sender<HostMessage>,
    trace: SimTrace,
}

enum Wake {
    Packet(Packet),
    InboundClosed,
    DeviceClosed,
    Idle,
}

impl LinkXport {
    fn wait_scheduled(&self) {
        if let Some(cpu) = &self.gate {
            cpu.wait_not_external();
        }
    }

    fn send(&self, message: HostMessage) {
        if self.out_tx.send(message).is_err() {
            log::warn!("Host end of the link is gone");
        }
    }
}

impl RpcXport for LinkXport {
    fn receive(&self, agent: &Agent, timeout: Option<Duration>) -> bool {
        self.wait_scheduled();

        let mut inbound = self.inbound.clone();
        let mut device = self.device.clone().unwrap_or_else(never);
        let cancel = self.cancel.clone().unwrap_or_else(never);
        let timer = timeout.map_or_else(never, after);

        let packet = loop {
            let wake = select! {
                recv(inbound) -> p => p.map_or(Wake::InboundClosed, Wake::Packet),
                recv(device) -> p => p.map_or(Wake::DeviceClosed, Wake::Packet),
                recv(cancel) -> _ => {
                    log::trace!("Receive cancelled");
                    Wake::Idle
                },
                recv(timer) -> _ => Wake::Idle,
            };
            // A closed channel never delivers again; wait out the timeout instead.
            match wake {
                Wake::Packet(packet) => break Some(packet),
                Wake::InboundClosed => inbound = never(),
                Wake::DeviceClosed => {
                    log::debug!("Host end of the link closed");
                    device = never();
                }
                Wake::Idle => break None,
            }
        };
        self.wait_scheduled();

        let Some(Packet { seq, request }) = packet else {
            return false;
        };

        rpc::serve(agent, request, |reply| self.send(HostMessage::Reply { seq, reply }));
        true
    }

    fn notify_host(&self) {
        self.wait_scheduled();
        self.trace.record(SimStep::NotifySent { from_task: self.gate.is_some() });
        self.send(HostMessage::Notify);
    }
}

/// The host side of a [`SimLink`].
#[derive(Clone)]
pub struct HostEnd {
    tx: Sender<Packet>,
    rx: Receiver<HostMessage>,
    next_seq: Arc<AtomicU32>,
    notifies: Arc<AtomicUsize>,
}

impl HostEnd {
    /// Send a request without waiting for the reply. Returns its sequence number.
    pub fn send(&self, request: Request) -> Result<u32> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.tx.send(Packet { seq, request }).context("Target end of the link is gone")?;
        Ok(seq)
    }

    /// Send a request and wait for its reply. Notifications received in the
    /// meantime are counted for [`wait_notify`](Self::wait_notify).
    pub fn call(&self, request: Request, timeout: Duration) -> Result<Reply> {
        let seq = self.send(request.clone())?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(HostMessage::Reply { seq: got, reply }) if got == seq => return Ok(reply),
                Ok(HostMessage::Reply { seq: got, .. }) => log::warn!("Discarding stale reply {got}"),
                Ok(HostMessage::Notify) => {
                    self.notifies.fetch_add(1, Ordering::SeqCst);
                }
                Err(_) => bail!("No reply to {request:?} within {timeout:?}"),
            }
        }
    }

    /// Wait for one event notification.
    pub fn wait_notify(&self, timeout: Duration) -> bool {
        if self.take_notify() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(HostMessage::Notify) => return true,
                Ok(HostMessage::Reply { seq, .. }) => log::warn!("Discarding unexpected reply {seq}"),
                Err(_) => return false,
            }
        }
    }

    /// Consume one notification already received by [`call`](Self::call).
    pub fn take_notify(&self) -> bool {
        self.notifies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Next raw message from the target.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<HostMessage> {
        self.rx.recv_timeout(timeout).ok()
    }
}
