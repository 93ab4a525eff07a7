//! Fault descriptor sampling
//!
//! A fault is a single-bit XOR against one live register at the campaign
//! checkpoint. Descriptors are drawn uniformly and independently per
//! trial; repeats are permitted and not deduplicated.

use anyhow::Result;
use rand::Rng;

/// Registers faults are drawn from when no set is configured: the x86_64
/// integer argument and scratch registers.
pub const DEFAULT_REGISTERS: [&str; 8] = ["rax", "rbx", "rcx", "rdx", "rsi", "rdi", "r8", "r9"];

/// Every register name the injection mechanisms can perturb: the x86_64
/// general-purpose set. A configured name outside this table is a
/// configuration error, caught before the first trial.
pub const SUPPORTED_REGISTERS: [&str; 15] = [
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

/// Fully determines the injected perturbation (not its outcome).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultDescriptor {
    pub register: String,
    /// Bit index in 0..=63.
    pub bit_position: u8,
}

impl FaultDescriptor {
    /// Single-bit XOR mask applied to the register value.
    pub fn mask(&self) -> u64 {
        1u64 << self.bit_position
    }
}

/// Uniform sampler over a configured register set and bit positions 0..=63.
#[derive(Debug, Clone)]
pub struct FaultSelector {
    registers: Vec<String>,
}

impl FaultSelector {
    pub fn new(registers: Vec<String>) -> Result<Self> {
        anyhow::ensure!(!registers.is_empty(), "fault register set is empty");
        for register in &registers {
            anyhow::ensure!(
                SUPPORTED_REGISTERS.contains(&register.as_str()),
                "unsupported register `{register}` (supported: {})",
                SUPPORTED_REGISTERS.join(", ")
            );
        }
        Ok(Self { registers })
    }

    pub fn with_defaults() -> Self {
        Self {
            registers: DEFAULT_REGISTERS.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn registers(&self) -> &[String] {
        &self.registers
    }

    /// Draw one descriptor. Pure function of the random source.
    pub fn draw<R: Rng>(&self, rng: &mut R) -> FaultDescriptor {
        let register = self.registers[rng.gen_range(0..self.registers.len())].clone();
        let bit_position = rng.gen_range(0..64u8);
        FaultDescriptor {
            register,
            bit_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn test_mask_is_single_bit() {
        for bit in 0..64u8 {
            let fault = FaultDescriptor {
                register: "rax".to_string(),
                bit_position: bit,
            };
            assert_eq!(fault.mask().count_ones(), 1);
            assert_eq!(fault.mask(), 1u64 << bit);
        }
    }

    #[test]
    fn test_empty_register_set_rejected() {
        assert!(FaultSelector::new(Vec::new()).is_err());
    }

    #[test]
    fn test_unknown_register_name_rejected_up_front() {
        // A wrong-arch name must fail configuration, not turn every
        // trial into a crash at replay time.
        let err = FaultSelector::new(vec!["x0".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unsupported register"));
    }

    #[test]
    fn test_every_supported_register_is_accepted() {
        let set: Vec<String> = SUPPORTED_REGISTERS.iter().map(|r| r.to_string()).collect();
        assert!(FaultSelector::new(set).is_ok());
    }

    #[test]
    fn test_draw_stays_within_configured_set() {
        let selector =
            FaultSelector::new(vec!["rdi".to_string(), "rsi".to_string()]).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let fault = selector.draw(&mut rng);
            assert!(["rdi", "rsi"].contains(&fault.register.as_str()));
            assert!(fault.bit_position < 64);
        }
    }

    #[test]
    fn test_register_distribution_is_uniform() {
        // Chi-square goodness-of-fit over the default 8-register set.
        // Critical value for df=7 at alpha=0.001 is 24.32.
        let selector = FaultSelector::with_defaults();
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 80_000usize;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(selector.draw(&mut rng).register).or_insert(0) += 1;
        }
        let expected = draws as f64 / DEFAULT_REGISTERS.len() as f64;
        let chi2: f64 = DEFAULT_REGISTERS
            .iter()
            .map(|reg| {
                let observed = *counts.get(*reg).unwrap_or(&0) as f64;
                (observed - expected).powi(2) / expected
            })
            .sum();
        assert!(chi2 < 24.32, "register chi-square too high: {chi2}");
    }

    #[test]
    fn test_bit_position_distribution_is_uniform() {
        // Critical value for df=63 at alpha=0.001 is 103.44.
        let selector = FaultSelector::with_defaults();
        let mut rng = StdRng::seed_from_u64(1234);
        let draws = 128_000usize;
        let mut counts = [0usize; 64];
        for _ in 0..draws {
            counts[selector.draw(&mut rng).bit_position as usize] += 1;
        }
        assert!(counts.iter().all(|&c| c > 0), "a bit position was never drawn");
        let expected = draws as f64 / 64.0;
        let chi2: f64 = counts
            .iter()
            .map(|&observed| (observed as f64 - expected).powi(2) / expected)
            .sum();
        assert!(chi2 < 103.44, "bit-position chi-square too high: {chi2}");
    }
}
