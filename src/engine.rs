//! Execution engine: the FV-1 virtual machine proper. See SPEC_FULL.md §3,
//! §4.4, §5, §6.
//!
//! Grounded on `examples/christiankuhl-em68k/src/processor.rs`'s
//! `CPU::clock_cycle()` fetch-dispatch-loop shape (simplified: no debugger,
//! no interrupt machinery — those are peripherals of the 68000 CPU this
//! crate no longer emulates). Per-opcode semantics come from
//! `examples/original_source/src/vm/vm_execute_v1.h`.

use crate::compile::{compile_instruction, optimize, CompiledInstruction};
use crate::decode::decode;
use crate::delay::DelayMemory;
use crate::fixed::SF23;
use crate::frame::{AudioFrame, Parameters};
use crate::lfo::{ChoFlags, RampLfo, SinLfo};
use crate::opcode::Opcode;
use crate::registers::RegisterFile;
use crate::stream::ProgramStream;
use crate::{EngineConfig, LogExpMode};

pub const PROGRAM_SIZE: usize = 128;

const SKP_NEG: i32 = 0x01;
const SKP_GEZ: i32 = 0x02;
const SKP_ZRO: i32 = 0x04;
const SKP_ZRC: i32 = 0x08;
const SKP_RUN: i32 = 0x10;

/// The FV-1 virtual machine: accumulator, register file, delay memory and
/// the four LFOs. Owns everything except the delay buffer (§5: "the
/// delay-memory buffer is owned externally and borrowed by the VM for its
/// lifetime").
pub struct Vm<'a> {
    acc: SF23,
    pacc: SF23,
    first_run: bool,
    registers: RegisterFile,
    delay: DelayMemory<'a>,
    sin_lfo: [SinLfo; 2],
    ramp_lfo: [RampLfo; 2],
    program: [CompiledInstruction; PROGRAM_SIZE],
    compiled: bool,
    config: EngineConfig,
}

impl<'a> Vm<'a> {
    pub fn new(delay_buffer: &'a mut [i32; crate::delay::DELAY_SIZE], config: EngineConfig) -> Self {
        Vm {
            acc: SF23::zero(),
            pacc: SF23::zero(),
            first_run: true,
            registers: RegisterFile::new(),
            delay: DelayMemory::new(delay_buffer),
            sin_lfo: [SinLfo::new(), SinLfo::new()],
            ramp_lfo: [RampLfo::new(), RampLfo::new()],
            program: [CompiledInstruction::nop(); PROGRAM_SIZE],
            compiled: false,
            config,
        }
    }

    /// Decodes, compiles and optimizes a program from `stream` (§6).
    /// Resets all VM state, matching the source's `Compile()`. A stream
    /// shorter than 128 words leaves the remaining slots as `NOP` (§7).
    pub fn compile(&mut self, stream: &mut dyn ProgramStream) {
        self.reset();

        let mut unknown_count = 0usize;
        let mut len = 0usize;
        let span = tracing::debug_span!("compile");
        let _enter = span.enter();

        for slot in self.program.iter_mut() {
            match stream.next_word() {
                Some(word) => {
                    let decoded = decode(word);
                    if decoded.opcode == Opcode::Unknown {
                        unknown_count += 1;
                    }
                    let mut compiled = compile_instruction(&decoded);
                    optimize(&mut compiled);
                    *slot = compiled;
                    len += 1;
                }
                None => *slot = CompiledInstruction::nop(),
            }
        }

        tracing::debug!(program_len = len, unknown_count, "compiled FV-1 program");
        self.compiled = true;
    }

    fn reset(&mut self) {
        self.acc = SF23::zero();
        self.pacc = SF23::zero();
        self.first_run = true;
        self.registers.reset();
        self.delay.reset();
        for lfo in &mut self.sin_lfo {
            lfo.jam();
        }
        for lfo in &mut self.ramp_lfo {
            lfo.jam();
        }
    }

    /// Stores the three POT values for all subsequent frames (§6).
    pub fn set_parameters(&mut self, params: &Parameters) {
        for (i, pot) in params.pots.iter().enumerate() {
            self.registers.pot(i).store(*pot);
        }
    }

    /// Runs the compiled program once per input frame (§4.4, §5).
    pub fn execute(&mut self, input: &[AudioFrame], output: &mut [AudioFrame]) {
        if !self.compiled {
            tracing::warn!("execute() called before compile() produced a program");
        }
        let frames = input.len().min(output.len());
        for i in 0..frames {
            self.execute_frame(input[i], &mut output[i]);
        }
    }

    fn execute_frame(&mut self, input: AudioFrame, output: &mut AudioFrame) {
        self.registers.adc_l().store_raw(input.l);
        self.registers.adc_r().store_raw(input.r);

        let mut prev_acc = self.acc;
        let mut ic = 0usize;
        while ic < PROGRAM_SIZE {
            let instr = self.program[ic];
            let jump = self.execute_instruction(&instr);
            self.pacc = prev_acc;
            prev_acc = self.acc;
            ic += 1 + jump.max(0) as usize;
        }

        self.delay.tick();
        self.tick_lfos();
        self.first_run = false;

        output.l = self.registers.dac_l().load_raw();
        output.r = self.registers.dac_r().load_raw();
    }

    fn tick_lfos(&mut self) {
        for n in 0..2 {
            let rate = self.registers.ramp_rate(n).load_raw();
            let range = self.registers.ramp_range(n).load_raw();
            self.ramp_lfo[n].tick(rate, range);
        }
        for n in 0..2 {
            let rate = self.registers.lfo_rate(n).load_raw();
            self.sin_lfo[n].tick(rate);
        }
    }

    /// Executes one compiled instruction, returning the extra forward jump
    /// (in slots) taken by `SKP`/`JMP`, or 0.
    fn execute_instruction(&mut self, instr: &CompiledInstruction) -> i32 {
        match instr.opcode {
            Opcode::Rda => {
                let addr = instr.constants[0];
                let c = SF23::new_saturating(instr.constants[1]);
                let d = SF23::new_saturating(self.delay.load(addr));
                self.acc = d.mul(c).add(self.acc);
            }
            Opcode::Rmpa => {
                let c = SF23::new_saturating(instr.constants[0]);
                let addr = self.registers.addr_ptr().load_addr();
                let d = SF23::new_saturating(self.delay.load(addr));
                self.acc = d.mul(c).add(self.acc);
            }
            Opcode::Wra => {
                let addr = instr.constants[0];
                let c = SF23::new_saturating(instr.constants[1]);
                self.delay.store(addr, self.acc.raw());
                self.acc = self.acc.mul(c);
            }
            Opcode::Wrap => {
                let addr = instr.constants[0];
                let c = SF23::new_saturating(instr.constants[1]);
                self.delay.store(addr, self.acc.raw());
                let last = SF23::new_saturating(self.delay.last_read());
                self.acc = self.acc.mul(c).add(last);
            }
            Opcode::Rdax => {
                let r = instr.constants[0] as usize;
                let c = SF23::new_saturating(instr.constants[1]);
                self.acc = self.registers.get(r).load().mul(c).add(self.acc);
            }
            Opcode::Ldax => {
                let r = instr.constants[0] as usize;
                self.acc = self.registers.get(r).load();
            }
            Opcode::Rdfx => {
                let r = instr.constants[0] as usize;
                let c = SF23::new_saturating(instr.constants[1]);
                let rv = self.registers.get(r).load();
                self.acc = self.acc.sub(rv).mul(c).add(rv);
            }
            Opcode::Wrax => {
                let r = instr.constants[0] as usize;
                let c = SF23::new_saturating(instr.constants[1]);
                self.registers.get_mut(r).store(self.acc);
                self.acc = self.acc.mul(c);
            }
            Opcode::Wrhx => {
                let r = instr.constants[0] as usize;
                let c = SF23::new_saturating(instr.constants[1]);
                self.registers.get_mut(r).store(self.acc);
                self.acc = self.acc.mul(c).add(self.pacc);
            }
            Opcode::Wrlx => {
                let r = instr.constants[0] as usize;
                let c = SF23::new_saturating(instr.constants[1]);
                self.registers.get_mut(r).store(self.acc);
                self.acc = self.pacc.sub(self.acc).mul(c).add(self.pacc);
            }
            Opcode::Maxx => {
                let r = instr.constants[0] as usize;
                let c = SF23::new_saturating(instr.constants[1]);
                let rxc = self.registers.get(r).load().mul(c).abs();
                let accabs = self.acc.abs();
                self.acc = if rxc.raw() > accabs.raw() { rxc } else { accabs };
            }
            Opcode::Absa => {
                self.acc = self.acc.abs();
            }
            Opcode::Mulx => {
                let r = instr.constants[0] as usize;
                self.acc = self.acc.mul(self.registers.get(r).load());
            }
            Opcode::Sof => {
                let c = SF23::new_saturating(instr.constants[0]);
                let d = SF23::new_saturating(instr.constants[1]);
                self.acc = self.acc.mul(c).add(d);
            }
            Opcode::And => {
                self.acc = self.acc.bit_and(instr.constants[0]);
            }
            Opcode::Or => {
                self.acc = self.acc.bit_or(instr.constants[0]);
            }
            Opcode::Xor => {
                self.acc = self.acc.bit_xor(instr.constants[0]);
            }
            Opcode::Clr => {
                self.acc = SF23::zero();
            }
            Opcode::Not => {
                self.acc = self.acc.bit_not();
            }
            Opcode::Skp => {
                let flags = instr.constants[0];
                let mut skip = true;
                if flags & SKP_NEG != 0 {
                    skip &= self.acc.is_negative();
                }
                if flags & SKP_GEZ != 0 {
                    skip &= self.acc.is_gez();
                }
                if flags & SKP_ZRO != 0 {
                    skip &= self.acc.is_zero();
                }
                if flags & SKP_ZRC != 0 {
                    skip &= self.acc.is_gez() != self.pacc.is_gez();
                }
                if flags & SKP_RUN != 0 {
                    skip &= !self.first_run;
                }
                if skip {
                    let n = instr.constants[1];
                    tracing::trace!(n, "SKP taken");
                    return n;
                }
            }
            Opcode::Jmp => {
                let n = instr.constants[1];
                tracing::trace!(n, "JMP taken");
                return n;
            }
            Opcode::Jam => {
                let n = instr.constants[0] as usize;
                self.ramp_lfo[n].jam();
            }
            Opcode::Wlds => {
                let n = instr.constants[0] as usize;
                self.registers.lfo_rate(n).store_raw(instr.constants[1]);
                self.registers.lfo_range(n).store_raw(instr.constants[2]);
                self.sin_lfo[n].jam();
            }
            Opcode::Wldr => {
                let n = instr.constants[0] as usize;
                self.registers.ramp_rate(n).store_raw(instr.constants[1]);
                self.registers.ramp_range(n).store_raw(instr.constants[2]);
                self.ramp_lfo[n].jam();
            }
            Opcode::ChoRdal => {
                self.acc = self.read_cho_rdal(instr.constants[0]);
            }
            Opcode::ChoRdaRmp => {
                let n = instr.constants[0] as usize;
                let flags = ChoFlags::from_bits_truncate(instr.constants[1]);
                let range = self.registers.ramp_range(n).load_raw();
                let value = self.ramp_lfo[n].read(flags, range);
                let addr = instr.constants[2] + value.offset;
                let d = SF23::new_saturating(self.delay.load(addr));
                self.acc = d.mul(value.coefficient).add(self.acc);
            }
            Opcode::ChoRdaSin => {
                let n = instr.constants[0] as usize;
                let flags = ChoFlags::from_bits_truncate(instr.constants[1]);
                let range = self.registers.lfo_range(n).load_raw();
                let value = self.sin_lfo[n].read(flags, range);
                let addr = instr.constants[2] + value.offset;
                let d = SF23::new_saturating(self.delay.load(addr));
                self.acc = d.mul(value.coefficient).add(self.acc);
            }
            Opcode::ChoSofRmp => {
                let n = instr.constants[0] as usize;
                let flags = ChoFlags::from_bits_truncate(instr.constants[1]);
                let range = self.registers.ramp_range(n).load_raw();
                let value = self.ramp_lfo[n].read(flags, range);
                let d = SF23::new_saturating(instr.constants[2]);
                self.acc = self.acc.mul(value.coefficient).add(d);
            }
            Opcode::ChoSofSin => {
                let n = instr.constants[0] as usize;
                let flags = ChoFlags::from_bits_truncate(instr.constants[1]);
                let range = self.registers.lfo_range(n).load_raw();
                let value = self.sin_lfo[n].read(flags, range);
                let d = SF23::new_saturating(instr.constants[2]);
                self.acc = self.acc.mul(value.coefficient).add(d);
            }
            Opcode::Log | Opcode::Exp => {
                if self.config.log_exp_mode == LogExpMode::Approximate {
                    // Approximation not implemented; treated as a no-op
                    // until a host requires it (§9 Open Question).
                }
            }
            Opcode::Nop | Opcode::Unknown | Opcode::ChoRda | Opcode::ChoSof => {}
        }
        0
    }

    /// §4.4 `CHO_RDAL`: sin/cos outputs are scaled by the owning LFO's
    /// current range register, same as a `CHO_RDA_SIN` read would scale
    /// them (`examples/original_source/src/vm/vm.h`'s `read_lfo`).
    fn read_cho_rdal(&mut self, idx: i32) -> SF23 {
        match idx {
            0 => {
                let range = self.registers.lfo_range(0).load_raw();
                self.sin_lfo[0].sin().mul(SF23::new_saturating(range))
            }
            1 => {
                let range = self.registers.lfo_range(0).load_raw();
                self.sin_lfo[0].cos().mul(SF23::new_saturating(range))
            }
            2 => {
                let range = self.registers.lfo_range(1).load_raw();
                self.sin_lfo[1].sin().mul(SF23::new_saturating(range))
            }
            3 => {
                let range = self.registers.lfo_range(1).load_raw();
                self.sin_lfo[1].cos().mul(SF23::new_saturating(range))
            }
            4 => self.ramp_lfo[0].value(),
            5 => self.ramp_lfo[1].value(),
            _ => SF23::zero(),
        }
    }

    pub fn accumulator(&self) -> SF23 {
        self.acc
    }

    pub fn previous_accumulator(&self) -> SF23 {
        self.pacc
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SliceStream;

    fn vm_with_program<'a>(buf: &'a mut [i32; crate::delay::DELAY_SIZE], words: &[u32]) -> Vm<'a> {
        let mut vm = Vm::new(buf, EngineConfig::default());
        let mut stream = SliceStream::new(words);
        vm.compile(&mut stream);
        vm
    }

    #[test]
    fn all_zero_program_never_touches_dac() {
        let mut buf = [0i32; crate::delay::DELAY_SIZE];
        let words = [0u32; PROGRAM_SIZE];
        let mut vm = vm_with_program(&mut buf, &words);
        let input = [AudioFrame::new(SF23::MAX, SF23::MIN)];
        let mut output = [AudioFrame::default()];
        vm.execute(&input, &mut output);
        assert_eq!(output[0], AudioFrame::new(0, 0));
    }

    #[test]
    fn identity_copy_program() {
        use crate::registers::{ADCL, ADCR, DACL, DACR};
        // LDAX ADCL; WRAX DACL,0; LDAX ADCR; WRAX DACR,0
        let ldax = |r: u32| r << 5 | 0b00101; // RDFX w/ c=0 optimizes to LDAX
        let wrax = |r: u32| r << 5 | 0b00110;
        let mut words = vec![ldax(ADCL as u32), wrax(DACL as u32), ldax(ADCR as u32), wrax(DACR as u32)];
        words.resize(PROGRAM_SIZE, 0);
        let mut buf = [0i32; crate::delay::DELAY_SIZE];
        let mut vm = vm_with_program(&mut buf, &words);
        let input = [AudioFrame::new(0x7fffff, -0x800000)];
        let mut output = [AudioFrame::default()];
        vm.execute(&input, &mut output);
        assert_eq!(output[0], input[0]);
        assert_eq!(vm.accumulator().raw(), 0);
    }

    #[test]
    fn skp_run_flag_skips_only_on_first_execution() {
        use crate::registers::{ADCL, DACL};
        // LDAX ADCL; SKP RUN,1; JMP +1; WRAX DACL,0 - RUN means "not the
        // first execution", so `SKP RUN,1` is *not* taken on the first
        // frame; that frame instead falls through into the unconditional
        // JMP that hops over the WRAX. Later frames take the SKP and land
        // on the WRAX directly.
        let ldax = ADCL as u32 * 32 + 0b00101;
        let skp_run_skip_jmp = (SKP_RUN as u32) << 27 | (1u32 << 21) | 0b10001;
        let jmp_over_wrax = (1u32 << 21) | 0b10001; // SKP, no flags, offset 1 -> JMP
        let wrax = DACL as u32 * 32 + 0b00110;
        let mut words = vec![ldax, skp_run_skip_jmp, jmp_over_wrax, wrax];
        words.resize(PROGRAM_SIZE, 0);
        let mut buf = [0i32; crate::delay::DELAY_SIZE];
        let mut vm = vm_with_program(&mut buf, &words);

        let input = [AudioFrame::new(SF23::MAX, 0)];
        let mut output = [AudioFrame::default()];
        vm.execute(&input, &mut output);
        assert_eq!(output[0].l, 0, "first run falls through into the JMP, skipping the WRAX");

        vm.execute(&input, &mut output);
        assert_eq!(output[0].l, SF23::MAX, "subsequent run takes SKP RUN and lands on the WRAX");
    }

    #[test]
    fn pacc_observes_value_before_last_instruction() {
        use crate::registers::ADCL;
        // LDAX ADCL; SOF 1.0, 0.0 (identity mul/add so we can inspect pacc after)
        let ldax = ADCL as u32 * 32 + 0b00101;
        let mut words = vec![ldax];
        words.resize(PROGRAM_SIZE, 0);
        let mut buf = [0i32; crate::delay::DELAY_SIZE];
        let mut vm = vm_with_program(&mut buf, &words);
        let input = [AudioFrame::new(1234, 0)];
        let mut output = [AudioFrame::default()];
        vm.execute(&input, &mut output);
        // After LDAX, pacc holds ACC from before LDAX ran, i.e. 0.
        assert_eq!(vm.previous_accumulator().raw(), 0);
    }

    #[test]
    fn all_four_lfos_tick_every_frame_regardless_of_reads() {
        use crate::registers::SIN0_RATE;
        // WLDS 0, rate=100, range=100 then nothing else touches any LFO.
        let wlds = (100u32 << 20) | (100u32 << 5) | 0b10010;
        let mut words = vec![wlds];
        words.resize(PROGRAM_SIZE, 0);
        let mut buf = [0i32; crate::delay::DELAY_SIZE];
        let mut vm = vm_with_program(&mut buf, &words);
        let input = [AudioFrame::default(); 3];
        let mut output = [AudioFrame::default(); 3];
        vm.execute(&input, &mut output);
        // sin LFO state should have advanced away from the jam position.
        let _ = vm.registers().get(SIN0_RATE);
        assert_ne!(vm.sin_lfo[0].cos().raw(), SF23::MIN);
    }
}
