//! Ramp and sine LFOs. See SPEC_FULL.md §3, §4.5.
//!
//! Grounded on `examples/original_source/src/vm/lfo.h` (rate/range register
//! plumbing) and `src/vm/sin_lfo.h` (exact sine recurrence and read order).
//! `ChoFlags` models the CHO_RDA/CHO_SOF/CHO_RDAL flag byte as a `bitflags`
//! set, following the flag-set idiom in
//! `examples/other_examples/2a31712f_FuelLabs-fuel-vm__fuel-asm-src-lib.rs.rs`.

use bitflags::bitflags;

use crate::fixed::SF23;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChoFlags: i32 {
        const SIN    = 0x00;
        const COS    = 0x01;
        const REG    = 0x02;
        const COMPC  = 0x04;
        const COMPA  = 0x08;
        const RPTR2  = 0x10;
        const NA     = 0x20;
    }
}

/// Offset (integer instruction-counter-like address component) and
/// fractional interpolation coefficient produced by an LFO read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LfoValue {
    pub offset: i32,
    pub coefficient: SF23,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RampLfo {
    phase: i32,
}

impl RampLfo {
    pub fn new() -> Self {
        RampLfo { phase: 0 }
    }

    pub fn jam(&mut self) {
        self.phase = 0;
    }

    pub fn tick(&mut self, rate: i32, range: i32) {
        let modulus = 2 * range.max(1);
        self.phase = (self.phase + rate).rem_euclid(modulus);
    }

    /// The raw phase, reinterpreted as `SF23`. Backs `CHO_RDAL`'s
    /// `rmp0.value`/`rmp1.value` (§4.4), which reads the ramp LFO's phase
    /// with no additional range scaling (unlike the sine LFOs' outputs).
    pub fn value(&self) -> SF23 {
        SF23::new_saturating(self.phase)
    }

    /// Read(flags), §4.5. `range` is needed again to support RPTR2's wrap.
    /// `NA` drops the fractional crossfade entirely: a single full-weight
    /// tap at the integer offset rather than an interpolated blend between
    /// two adjacent delay cells (§9 Open Question — no reference source
    /// for the exact hardware behavior was available, so this takes the
    /// "integer-only" wording literally).
    pub fn read(&self, flags: ChoFlags, range: i32) -> LfoValue {
        let modulus = 2 * range.max(1);
        let mut p = self.phase;
        if flags.contains(ChoFlags::RPTR2) {
            p = (p + range).rem_euclid(modulus);
        }
        let mut offset = p >> 8;
        let mut coefficient = if flags.contains(ChoFlags::NA) {
            SF23::one()
        } else {
            SF23::new_saturating((p & 0xff) << (SF23::FRAC - 8))
        };
        if flags.contains(ChoFlags::COMPC) {
            coefficient = SF23::one().sub(coefficient);
        }
        if flags.contains(ChoFlags::COMPA) {
            offset = -offset;
        }
        LfoValue { offset, coefficient }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SinLfo {
    sin: SF23,
    cos: SF23,
}

impl SinLfo {
    pub fn new() -> Self {
        SinLfo {
            sin: SF23::zero(),
            cos: SF23::zero(),
        }
    }

    pub fn jam(&mut self) {
        self.sin = SF23::zero();
        self.cos = SF23::new_saturating(SF23::MIN);
    }

    pub fn sin(&self) -> SF23 {
        self.sin
    }

    pub fn cos(&self) -> SF23 {
        self.cos
    }

    /// cos updates from the pre-update sin, then sin updates from the
    /// just-updated cos (examples/original_source/src/vm/sin_lfo.h `Tick`).
    pub fn tick(&mut self, rate: i32) {
        let k = SF23::new_saturating(rate >> 8);
        let new_cos = self.cos.add(self.sin.mul(k));
        let new_sin = self.sin.sub(new_cos.mul(k));
        self.cos = new_cos;
        self.sin = new_sin;
    }

    /// Read(flags), §4.5. The coefficient is derived before COMPA negation;
    /// the offset is derived after it.
    pub fn read(&self, flags: ChoFlags, range: i32) -> LfoValue {
        let base = if flags.contains(ChoFlags::COS) {
            self.cos
        } else {
            self.sin
        };
        let scaled = base.mul(SF23::new_saturating(range));
        let mut coefficient =
            SF23::new_saturating((scaled.raw() & 0xff) << (SF23::FRAC - 8));
        if flags.contains(ChoFlags::COMPC) {
            coefficient = SF23::one().sub(coefficient);
        }
        let value = if flags.contains(ChoFlags::COMPA) {
            scaled.neg()
        } else {
            scaled
        };
        LfoValue {
            offset: value.raw() >> 8,
            coefficient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_wraps_at_twice_range() {
        let mut lfo = RampLfo::new();
        lfo.tick(100, 50); // modulus = 100
        assert_eq!(lfo.phase, 100 % 100);
    }

    #[test]
    fn ramp_na_flag_drops_fractional_coefficient() {
        let mut lfo = RampLfo::new();
        lfo.tick(0x180, 1000); // phase = 0x180, nonzero low byte
        let value = lfo.read(ChoFlags::NA, 1000);
        assert_eq!(value.coefficient, SF23::one());
        assert_eq!(value.offset, 0x180 >> 8);
    }

    #[test]
    fn sin_jam_sets_cos_to_min_and_sin_to_zero() {
        let mut lfo = SinLfo::new();
        lfo.jam();
        assert_eq!(lfo.sin().raw(), 0);
        assert_eq!(lfo.cos().raw(), SF23::MIN);
    }

    #[test]
    fn sin_tick_uses_updated_cos_for_sin_update() {
        let mut lfo = SinLfo::new();
        lfo.jam(); // sin=0, cos=MIN
        lfo.tick(1 << 8); // k = 1 (in SF23 units, 1<<0... actually rate>>8)
        // cos_new = cos + sin*k = MIN + 0 = MIN (saturates same)
        // sin_new = sin - cos_new*k = 0 - MIN*k
        assert_eq!(lfo.cos().raw(), SF23::MIN);
    }
}
