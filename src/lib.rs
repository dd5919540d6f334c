//! A software emulator of the Spin Semiconductor FV-1, a fixed-function
//! DSP used for audio reverb and modulation effects. See SPEC_FULL.md for
//! the full specification this crate implements.
//!
//! The public surface mirrors the runtime API in SPEC_FULL.md §6:
//! construct a [`Vm`] over an externally-owned delay buffer, [`Vm::compile`]
//! a 128-word program from any [`ProgramStream`], optionally
//! [`Vm::set_parameters`], then [`Vm::execute`] it over a block of
//! [`AudioFrame`]s.

pub mod compile;
pub mod decode;
pub mod delay;
pub mod engine;
pub mod fixed;
pub mod frame;
pub mod lfo;
pub mod opcode;
pub mod operand;
pub mod registers;
pub mod stream;

pub use engine::Vm;
pub use frame::{AudioFrame, Parameters};
pub use stream::{ProgramStream, SliceStream};

/// Whether `LOG`/`EXP` are hard no-ops or the optional base-2
/// approximations mentioned in SPEC_FULL.md §9. Defaults to `Noop`; most
/// FV-1 programs never touch these opcodes (§1 Non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogExpMode {
    Noop,
    Approximate,
}

impl Default for LogExpMode {
    fn default() -> Self {
        LogExpMode::Noop
    }
}

/// The handful of knobs a host needs to vary without touching code,
/// mirroring the `Configuration` struct pattern this codebase already uses
/// to wire together a runnable instance (SPEC_FULL.md §10.4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Informational only: the VM's arithmetic is sample-rate-agnostic by
    /// construction, so this is stored for logging/metadata purposes, not
    /// consulted during `execute()`.
    pub sample_rate_hz: f64,
    pub log_exp_mode: LogExpMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate_hz: 32_000.0,
            log_exp_mode: LogExpMode::Noop,
        }
    }
}
