//! The CPU engine boundary.
//!
//! The core never interprets guest instructions itself; an external
//! engine runs them and yields back at system-call and reschedule
//! points. The engine owns the live register file; the kernel's
//! [`CpuState`] snapshots move in and out of it on context switches.

use karst_kernel::CpuState;

/// The execution engine the emulator drives.
pub trait CpuEngine {
    /// Runs guest code until the next yield point; returns consumed
    /// ticks.
    fn run(&mut self) -> u64;
    /// Executes a single instruction; returns consumed ticks.
    fn step(&mut self) -> u64;
    /// Stops execution as soon as possible.
    fn stop(&mut self);
    /// Asks the engine to leave its run loop at the next safe point.
    fn prepare_rescheduling(&mut self);
    /// Copies the live register file into `state`.
    fn save_state(&self, state: &mut CpuState);
    /// Loads `state` into the live register file.
    fn load_state(&mut self, state: &CpuState);
}

/// An engine that executes nothing.
///
/// Stands in when guest code is driven entirely from the host side
/// (tests, service-level tooling). Each `run` consumes a fixed quantum
/// so virtual time still advances.
#[derive(Debug, Default)]
pub struct NullCpu {
    state: CpuState,
    stopped: bool,
    /// Ticks reported per run quantum.
    pub quantum: u64,
}

impl NullCpu {
    /// Creates an engine with the default quantum.
    pub fn new() -> Self {
        Self {
            state: CpuState::default(),
            stopped: false,
            quantum: 1000,
        }
    }
}

impl CpuEngine for NullCpu {
    fn run(&mut self) -> u64 {
        if self.stopped {
            0
        } else {
            self.quantum
        }
    }

    fn step(&mut self) -> u64 {
        u64::from(!self.stopped)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn prepare_rescheduling(&mut self) {}

    fn save_state(&self, state: &mut CpuState) {
        *state = self.state;
    }

    fn load_state(&mut self, state: &CpuState) {
        self.state = *state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_cpu_consumes_quantum_until_stopped() {
        let mut cpu = NullCpu::new();
        assert_eq!(cpu.run(), 1000);
        assert_eq!(cpu.step(), 1);
        cpu.stop();
        assert_eq!(cpu.run(), 0);
        assert_eq!(cpu.step(), 0);
    }

    #[test]
    fn state_roundtrip() {
        let mut cpu = NullCpu::new();
        let mut state = CpuState::default();
        state.regs[15] = 0x7000_0000;
        cpu.load_state(&state);

        let mut out = CpuState::default();
        cpu.save_state(&mut out);
        assert_eq!(out.regs[15], 0x7000_0000);
    }
}
