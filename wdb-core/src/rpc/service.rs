//! Agent services and their wire types.

use crate::agent::{Agent, AgentMode, AgentModes};
use crate::error::WdbError;
use crate::event::TargetEvent;
use crate::regs::{RegSetData, RegSetType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    Connect,
    Disconnect,
    Ping,
    ModeGet,
    /// Raw mode bits: 1 = task, 2 = external.
    ModeSet(u32),
    EventGet,
    RegsGet(RegSetType),
    RegsSet(RegSetType, RegSetData),
    /// Resume the suspended system.
    ContextContinue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub mode: AgentMode,
    pub available: u32,
    pub extern_running: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Pong,
    Mode(ModeInfo),
    Event(Option<TargetEvent>),
    Regs(RegSetData),
    Error(String),
}

/// A request as it travels from host to target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub seq: u32,
    pub request: Request,
}

/// Target-to-host traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostMessage {
    Reply { seq: u32, reply: Reply },
    Notify,
}

/// What the transport does after sending the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum After {
    Continue,
    /// Resume the suspended system. Never returns.
    Resume,
}

impl From<WdbError> for Reply {
    fn from(e: WdbError) -> Self {
        Self::Error(e.to_string())
    }
}

pub fn dispatch(agent: &Agent, request: Request) -> (Reply, After) {
    let reply = match request {
        Request::Connect => {
            agent.set_connected(true);
            Reply::Ok
        }
        Request::Disconnect => {
            agent.set_connected(false);
            Reply::Ok
        }
        Request::Ping => Reply::Pong,
        Request::ModeGet => Reply::Mode(ModeInfo {
            mode: agent.mode(),
            available: agent.available_modes().bits(),
            extern_running: agent.is_extern_running(),
        }),
        Request::ModeSet(bits) => match agent.set_mode(AgentModes::from_bits_retain(bits)) {
            Ok(()) => Reply::Ok,
            Err(e) => e.into(),
        },
        Request::EventGet => Reply::Event(agent.take_event()),
        // Register state is only meaningful while the system is suspended.
        Request::RegsGet(_) | Request::RegsSet(..) | Request::ContextContinue
            if !agent.is_extern_running() =>
        {
            WdbError::NotExternal.into()
        }
        Request::RegsGet(reg_type) => match agent.get_registers(reg_type) {
            Ok(data) => Reply::Regs(data),
            Err(e) => e.into(),
        },
        Request::RegsSet(reg_type, data) => match agent.set_registers(reg_type, data) {
            Ok(()) => Reply::Ok,
            Err(e) => e.into(),
        },
        Request::ContextContinue => return (Reply::Ok, After::Resume),
    };
    (reply, After::Continue)
}

/// Handle one request: dispatch it, hand the reply to `send`, then run the
/// follow-up action.
pub fn serve(agent: &Agent, request: Request, send: impl FnOnce(Reply)) {
    log::debug!("Serving {request:?}");
    let (reply, after) = dispatch(agent, request);
    if let Reply::Error(e) = &reply {
        log::warn!("Request failed: {e}");
    }
    send(reply);
    if after == After::Resume {
        agent.resume_system();
    }
}
