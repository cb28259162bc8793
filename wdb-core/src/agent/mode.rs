//! Mode switching policy.

use super::{Agent, AgentMode, AgentModes};
use crate::error::{Result, WdbError};
use crate::monitor::AgentEvent;

impl Agent {
    /// Make `requested`, which must name exactly one mode, the active mode.
    ///
    /// With both modes available, selecting TASK removes the first-packet
    /// hook and, if the external agent holds the system, arranges for it to
    /// resume once the event queue drains. Selecting EXTERN reinstalls the hook.
    pub fn set_mode(&self, requested: AgentModes) -> Result<()> {
        let new_mode = AgentMode::try_from(requested)?;

        let hook_change = {
            let mut state = self.state();
            if !state.available.contains(new_mode.bit()) {
                return Err(WdbError::NotSupported("agent mode not available"));
            }

            let mut hook_change = None;
            if state.available.contains(AgentModes::all()) {
                match new_mode {
                    AgentMode::Task => {
                        hook_change = Some(None);
                        if self.is_extern_running() {
                            state.one_shot = true;
                        }
                    }
                    AgentMode::Extern => hook_change = Some(Some(self.first_packet_hook())),
                }
            }
            state.mode = new_mode;
            hook_change
        };

        if let Some(hook) = hook_change {
            self.comm.hook_add(hook);
        }
        log::info!("Agent mode set to {new_mode:?}");
        self.monitor.publish(AgentEvent::ModeChanged(new_mode));
        Ok(())
    }
}
