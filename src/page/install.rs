//! Install-prompt affordance.
//!
//! The host hands out a single-use [`InstallPrompt`] when the app becomes
//! installable. Holding one makes the affordance visible; clicking it
//! consumes the handle and waits for the user's decision.

use async_trait::async_trait;

use crate::error::Result;

/// The user's answer to an install prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Accepted,
    Dismissed,
}

/// Single-use capability to show the host's install prompt.
#[async_trait]
pub trait InstallPrompt: Send {
    /// Shows the prompt and resolves with the user's decision.
    async fn prompt(self: Box<Self>) -> Result<InstallOutcome>;
}

/// Affordance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallState {
    #[default]
    Hidden,
    Eligible,
    Prompting,
}

/// Install affordance driven by host signals and clicks.
#[derive(Default)]
pub struct InstallAffordance {
    state: InstallState,
    handle: Option<Box<dyn InstallPrompt>>,
    enabled: bool,
}

impl std::fmt::Debug for InstallAffordance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallAffordance")
            .field("state", &self.state)
            .field("has_handle", &self.handle.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl InstallAffordance {
    /// Creates a hidden affordance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current affordance state.
    #[must_use]
    pub const fn state(&self) -> InstallState {
        self.state
    }

    /// Whether the affordance is shown.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.state != InstallState::Hidden
    }

    /// Whether the affordance accepts clicks.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a prompt handle is currently held.
    #[must_use]
    pub const fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// The host signalled installability.
    ///
    /// A handle arriving while a prompt is open is held only until that
    /// prompt finishes.
    pub fn on_installable(&mut self, handle: Box<dyn InstallPrompt>) {
        self.handle = Some(handle);
        if self.state != InstallState::Prompting {
            self.state = InstallState::Eligible;
            self.enabled = true;
        }
    }

    /// The host reports the app was installed.
    pub fn on_installed(&mut self) {
        self.state = InstallState::Hidden;
        self.handle = None;
    }

    /// Starts a prompt cycle: takes the handle and disables the affordance.
    ///
    /// Returns `None` (and changes nothing) unless the affordance is eligible,
    /// enabled and holding a handle.
    pub fn begin_prompt(&mut self) -> Option<Box<dyn InstallPrompt>> {
        if self.state != InstallState::Eligible || !self.enabled {
            return None;
        }
        let handle = self.handle.take()?;
        self.state = InstallState::Prompting;
        self.enabled = false;
        Some(handle)
    }

    /// Finishes a prompt cycle with the prompt's result.
    ///
    /// Any held handle is discarded whatever the outcome. The outcome itself
    /// is ignored if the app was installed while the prompt was open.
    pub fn finish_prompt(&mut self, result: &Result<InstallOutcome>) {
        self.handle = None;
        if self.state != InstallState::Prompting {
            return;
        }
        match result {
            Ok(InstallOutcome::Accepted) => self.state = InstallState::Hidden,
            Ok(InstallOutcome::Dismissed) => {
                self.state = InstallState::Eligible;
                self.enabled = true;
            }
            Err(e) => {
                log::debug!("Install prompt failed: {e}");
                self.state = InstallState::Eligible;
                self.enabled = true;
            }
        }
    }
}
