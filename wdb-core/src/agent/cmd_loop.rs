//! The command loop shared by both agent modes, and host notification.

use super::{Agent, AgentMode, PendingCallback};
use crate::monitor::AgentEvent;
use crate::rpc::RpcXport;

impl Agent {
    /// Serve host requests forever on the transport of the current mode.
    pub fn command_loop(&self) -> ! {
        self.run_command_loop(self.is_now_external())
    }

    /// Body of the task-mode agent (`external == false`) and entry point of
    /// the external agent context. The external instance leaves only through
    /// [`resume_system`](Self::resume_system).
    pub(super) fn run_command_loop(&self, external: bool) -> ! {
        let xport = if external { self.extern_xport.clone() } else { self.task_xport.clone() };
        let Some(xport) = xport else {
            log::error!("No {} transport installed", if external { "external" } else { "task" });
            if external {
                self.resume_system();
            }
            loop {
                std::thread::park();
            }
        };

        if external {
            let pending = self.state().pending.take();
            if let Some(callback) = pending {
                callback();
            }
        }

        let poll_timeout = self.config.notify_poll_timeout();
        loop {
            let timeout = if self.events.is_empty() { None } else { Some(poll_timeout) };
            if !xport.receive(self, timeout) && !self.events.is_empty() {
                self.send_notify(xport.as_ref());
            }

            if external && self.is_extern_running() && self.one_shot() && self.events.is_empty() {
                log::debug!("Event queue drained, leaving external mode");
                self.resume_system();
            }
        }
    }

    /// Let the host know that events are pending.
    pub fn notify_host(&self) {
        if !self.is_connected() {
            return;
        }

        match self.mode() {
            // Wake the task agent; its loop sees the non-empty queue.
            AgentMode::Task => self.comm.cancel(),
            AgentMode::Extern if self.is_extern_running() => {
                if let Some(xport) = &self.extern_xport {
                    self.send_notify(xport.as_ref());
                }
            }
            AgentMode::Extern => {
                let agent = self.self_ref.clone();
                let callback: PendingCallback = Box::new(move || {
                    if let Some(agent) = agent.upgrade() {
                        agent.notify_and_resume();
                    }
                });
                if let Err(e) = self.suspend_system_here(Some(callback)) {
                    log::warn!("Cannot notify host from a dormant external agent: {e}");
                }
            }
        }
    }

    fn notify_and_resume(&self) -> ! {
        if let Some(xport) = &self.extern_xport {
            self.send_notify(xport.as_ref());
        }
        self.resume_system()
    }

    fn send_notify(&self, xport: &dyn RpcXport) {
        xport.notify_host();
        self.monitor.publish(AgentEvent::HostNotified(self.mode()));
    }
}
