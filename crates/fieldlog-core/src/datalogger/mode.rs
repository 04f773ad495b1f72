//! Operating modes and the transitions between them.

/// The operating mode, persisted as a single ASCII code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Driven from the control channel, optionally logging every iteration
    Interactive,
    /// Deployed and measuring autonomously
    Logging,
    /// Armed; deploys on the next wake
    DeployOnTrigger,
    /// Unattended bench logging at a fixed cadence
    Debugging,
}

impl Mode {
    pub const fn code(self) -> u8 {
        match self {
            Mode::Interactive => b'i',
            Mode::Logging => b'l',
            Mode::DeployOnTrigger => b't',
            Mode::Debugging => b'd',
        }
    }

    /// Decodes a persisted code. `None` means the stored value is corrupt.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            b'i' => Some(Mode::Interactive),
            b'l' => Some(Mode::Logging),
            b't' => Some(Mode::DeployOnTrigger),
            b'd' => Some(Mode::Debugging),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Mode::Interactive => "interactive",
            Mode::Logging => "logging",
            Mode::DeployOnTrigger => "deploy_on_trigger",
            Mode::Debugging => "debugging",
        }
    }
}

/// Something that asks for a mode change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    /// Explicit deploy, or the trigger firing while armed
    Deploy,
    /// Arm deploy-on-trigger
    Arm,
    /// Start bench debugging
    Debug,
    /// Return to interactive use
    Exit,
}

/// The transition table. `None` means the event is not accepted in `mode`.
///
/// Deploy is accepted everywhere, including while logging, where it starts
/// a new deployment. Arming and debugging both start from interactive.
pub const fn transition(mode: Mode, event: ModeEvent) -> Option<Mode> {
    match (mode, event) {
        (_, ModeEvent::Deploy) => Some(Mode::Logging),
        (_, ModeEvent::Exit) => Some(Mode::Interactive),
        (Mode::Interactive, ModeEvent::Arm) => Some(Mode::DeployOnTrigger),
        (Mode::Interactive, ModeEvent::Debug) => Some(Mode::Debugging),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Mode; 4] = [
        Mode::Interactive,
        Mode::Logging,
        Mode::DeployOnTrigger,
        Mode::Debugging,
    ];

    #[test]
    fn test_codes_round_trip() {
        for mode in ALL {
            assert_eq!(Mode::from_code(mode.code()), Some(mode));
        }
    }

    #[test]
    fn test_unknown_code_is_corrupt() {
        assert_eq!(Mode::from_code(0xFF), None);
        assert_eq!(Mode::from_code(b'x'), None);
    }

    #[test]
    fn test_deploy_and_exit_from_anywhere() {
        for mode in ALL {
            assert_eq!(transition(mode, ModeEvent::Deploy), Some(Mode::Logging));
            assert_eq!(transition(mode, ModeEvent::Exit), Some(Mode::Interactive));
        }
    }

    #[test]
    fn test_arm_only_from_interactive() {
        assert_eq!(
            transition(Mode::Interactive, ModeEvent::Arm),
            Some(Mode::DeployOnTrigger)
        );
        assert_eq!(transition(Mode::Logging, ModeEvent::Arm), None);
        assert_eq!(transition(Mode::Debugging, ModeEvent::Debug), None);
    }
}
