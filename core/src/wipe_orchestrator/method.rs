// Method-selection matrix
//
// Media type and assurance level pick a method; a method is an ordered list
// of helper invocations. The engine never runs destructive tools itself.

use super::job::AssuranceLevel;
use std::fmt;

/// Operation names understood by the privileged wipe helper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelperCommand {
    /// dd from /dev/zero over the whole device
    HddZero,
    /// dd from /dev/urandom over the whole device
    HddRandom,
    /// shred, 7 passes plus final zero/verify
    HddDod,
    /// blkdiscard of the whole device
    SsdDiscard,
    /// blkdiscard followed by a dd zero pass
    SsdDiscardZero,
    /// ATA/NVMe firmware secure erase
    SsdSecureErase,
}

impl HelperCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            HelperCommand::HddZero => "hdd-zero",
            HelperCommand::HddRandom => "hdd-random",
            HelperCommand::HddDod => "hdd-dod",
            HelperCommand::SsdDiscard => "ssd-discard",
            HelperCommand::SsdDiscardZero => "ssd-discard-zero",
            HelperCommand::SsdSecureErase => "ssd-secure-erase",
        }
    }

    /// Whether the helper prints `<n> bytes` progress for this operation
    pub fn reports_progress(&self) -> bool {
        !matches!(self, HelperCommand::SsdDiscard | HelperCommand::SsdSecureErase)
    }

    /// Single sequential fill pass, which may run into the end of the device
    pub fn is_fill_pass(&self) -> bool {
        matches!(
            self,
            HelperCommand::HddZero | HelperCommand::HddRandom | HelperCommand::SsdDiscardZero
        )
    }
}

impl fmt::Display for HelperCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One helper invocation, with an optional replacement if it fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodStep {
    pub command: HelperCommand,
    pub fallback: Option<HelperCommand>,
}

impl MethodStep {
    fn single(command: HelperCommand) -> Self {
        Self {
            command,
            fallback: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WipeMethod {
    ZeroFill,
    ZeroThenRandom,
    MultiPassPattern,
    Discard,
    DiscardThenZero,
    SecureEraseOrDiscard,
}

impl WipeMethod {
    pub fn select(rotational: bool, level: AssuranceLevel) -> Self {
        match (rotational, level) {
            (true, AssuranceLevel::Low) => WipeMethod::ZeroFill,
            (true, AssuranceLevel::Medium) => WipeMethod::ZeroThenRandom,
            (true, AssuranceLevel::High) => WipeMethod::MultiPassPattern,
            (false, AssuranceLevel::Low) => WipeMethod::Discard,
            (false, AssuranceLevel::Medium) => WipeMethod::DiscardThenZero,
            (false, AssuranceLevel::High) => WipeMethod::SecureEraseOrDiscard,
        }
    }

    /// Label recorded on the job and in the audit log
    pub fn label(&self) -> &'static str {
        match self {
            WipeMethod::ZeroFill => "zero fill (1 pass)",
            WipeMethod::ZeroThenRandom => "zero + random (2 passes)",
            WipeMethod::MultiPassPattern => "DoD 7-pass (shred) with verify",
            WipeMethod::Discard => "full-device discard",
            WipeMethod::DiscardThenZero => "discard + zero fill",
            WipeMethod::SecureEraseOrDiscard => "secure erase (fallback discard)",
        }
    }

    /// Helper invocations, run in order; the first failing step ends the job
    pub fn steps(&self) -> Vec<MethodStep> {
        match self {
            WipeMethod::ZeroFill => vec![MethodStep::single(HelperCommand::HddZero)],
            WipeMethod::ZeroThenRandom => vec![
                MethodStep::single(HelperCommand::HddZero),
                MethodStep::single(HelperCommand::HddRandom),
            ],
            WipeMethod::MultiPassPattern => vec![MethodStep::single(HelperCommand::HddDod)],
            WipeMethod::Discard => vec![MethodStep::single(HelperCommand::SsdDiscard)],
            WipeMethod::DiscardThenZero => vec![MethodStep::single(HelperCommand::SsdDiscardZero)],
            WipeMethod::SecureEraseOrDiscard => vec![MethodStep {
                command: HelperCommand::SsdSecureErase,
                fallback: Some(HelperCommand::SsdDiscard),
            }],
        }
    }
}

impl fmt::Display for WipeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
