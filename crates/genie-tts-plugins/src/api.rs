//! Plugin registration API.
//!
//! [`PluginApi`] is passed to each plugin during initialization so it can
//! register hooks and chat commands with the host.

use std::sync::Arc;

use crate::HookEvent;
use crate::command::ChatCommand;
use crate::hooks::HookHandler;

/// Registration API handed to plugins during [`crate::Plugin::register`].
///
/// Collected hooks and commands are applied by the
/// [`crate::PluginManager`] after `register` returns.
#[derive(Default)]
pub struct PluginApi {
    pending_hooks: Vec<(HookEvent, HookHandler)>,
    commands: Vec<Arc<dyn ChatCommand>>,
}

impl PluginApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue a hook handler for registration.
    pub fn register_hook(&mut self, event: HookEvent, handler: HookHandler) {
        self.pending_hooks.push((event, handler));
    }

    /// Queue a chat command for registration.
    pub fn register_command(&mut self, command: Arc<dyn ChatCommand>) {
        self.commands.push(command);
    }

    pub(crate) fn take_hooks(&mut self) -> Vec<(HookEvent, HookHandler)> {
        std::mem::take(&mut self.pending_hooks)
    }

    pub(crate) fn take_commands(&mut self) -> Vec<Arc<dyn ChatCommand>> {
        std::mem::take(&mut self.commands)
    }
}
