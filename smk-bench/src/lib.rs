//! Performance benchmarks for smk
//!
//! Criterion.rs benchmarks for the compiler pipeline: parsing and validation,
//! elaboration at each optimisation level, and output rendering.

pub mod fixtures;

/// Common benchmark utilities and test data
pub mod common {
    use smk_core::{ElaborationOptions, Machine};

    /// Shape of a generated machine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BenchConfig {
        /// Top-level states.
        pub width: usize,
        /// Nesting levels below each top-level state.
        pub depth: usize,
        /// Distinct events.
        pub events: usize,
    }

    impl Default for BenchConfig {
        fn default() -> Self {
            Self {
                width: 8,
                depth: 3,
                events: 6,
            }
        }
    }

    impl BenchConfig {
        #[must_use]
        pub fn state_count(&self) -> usize {
            self.width * (self.depth + 1)
        }
    }

    /// Elaboration settings covered by every benchmark group.
    pub const LEVELS: [ElaborationOptions; 3] = [
        ElaborationOptions {
            optimise: 0,
            comment_actions: false,
        },
        ElaborationOptions {
            optimise: 1,
            comment_actions: false,
        },
        ElaborationOptions {
            optimise: 2,
            comment_actions: true,
        },
    ];

    /// Parses a generated machine.
    ///
    /// # Errors
    ///
    /// Returns an error if the generated document fails validation.
    pub fn parse_generated(config: &BenchConfig) -> anyhow::Result<Machine> {
        let text = crate::fixtures::generated_machine(config);
        Ok(Machine::parse(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::common::*;
    use smk_core::build_model;

    #[test]
    fn test_bench_config() {
        let config = BenchConfig::default();
        assert_eq!(config.width, 8);
        assert_eq!(config.state_count(), 32);
    }

    #[test]
    fn test_generated_machine_is_valid() {
        for config in [
            BenchConfig::default(),
            BenchConfig {
                width: 1,
                depth: 0,
                events: 1,
            },
            BenchConfig {
                width: 20,
                depth: 5,
                events: 12,
            },
        ] {
            let machine = parse_generated(&config).unwrap();
            assert_eq!(machine.state_count(), config.state_count());
            for options in LEVELS {
                let model = build_model(&machine, &options);
                assert_eq!(model.in_state.len(), config.state_count());
            }
        }
    }
}
