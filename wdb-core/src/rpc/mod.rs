//! RPC request/response layer.
//!
//! An [`RpcXport`] carries one request/response exchange per `receive` and
//! pushes asynchronous notifications to the host. Request handling is shared
//! by every transport through [`serve`].

mod service;

pub use service::{dispatch, serve, After, HostMessage, ModeInfo, Packet, Reply, Request};

use crate::agent::Agent;
use std::time::Duration;

pub trait RpcXport: Send + Sync {
    /// Wait up to `timeout` (forever with `None`) for one request and serve it.
    ///
    /// Returns `false` on timeout, cancellation or a receive failure.
    fn receive(&self, agent: &Agent, timeout: Option<Duration>) -> bool;

    /// Send an event notification to the host.
    fn notify_host(&self);
}
