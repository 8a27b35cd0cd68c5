use log::LevelFilter;
use std::path::PathBuf;

use crate::sim_if::TimeUnit;
use crate::TbError;

/// Simulation-wide settings of a testbench run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Name of the top scope the design is elaborated into.
    pub top: String,
    /// Test suite name used in the JUnit report.
    pub suite: String,
    pub precision: TimeUnit,
    pub max_deltas: u32,
    pub log_level: LevelFilter,
    /// Where the JUnit XML goes, `None` to skip it.
    pub results_file: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            top: "dut".to_string(),
            suite: "tb".to_string(),
            precision: TimeUnit::Ps,
            max_deltas: 1000,
            log_level: LevelFilter::Info,
            results_file: None,
        }
    }
}

impl SimConfig {
    /// Reads `TB_TOPLEVEL`, `TB_PRECISION`, `TB_MAX_DELTAS`, `TB_LOG_LEVEL` and
    /// `TB_RESULTS` on top of the defaults. Results go to `results.xml` unless
    /// `TB_RESULTS` says otherwise; an empty value disables the report.
    pub fn from_env() -> Result<Self, TbError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, TbError> {
        let mut config = SimConfig {
            results_file: Some(PathBuf::from("results.xml")),
            ..SimConfig::default()
        };
        if let Some(top) = lookup("TB_TOPLEVEL") {
            config.top = top;
        }
        if let Some(precision) = lookup("TB_PRECISION") {
            config.precision = precision.parse()?;
        }
        if let Some(deltas) = lookup("TB_MAX_DELTAS") {
            config.max_deltas = deltas
                .parse()
                .map_err(|_| TbError::Config(format!("invalid TB_MAX_DELTAS '{}'", deltas)))?;
        }
        if let Some(level) = lookup("TB_LOG_LEVEL") {
            config.log_level = level
                .parse()
                .map_err(|_| TbError::Config(format!("invalid TB_LOG_LEVEL '{}'", level)))?;
        }
        if let Some(results) = lookup("TB_RESULTS") {
            config.results_file = match results.is_empty() {
                true => None,
                false => Some(PathBuf::from(results)),
            };
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_write_results_xml() {
        let config = SimConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.top, "dut");
        assert_eq!(config.precision, TimeUnit::Ps);
        assert_eq!(config.results_file, Some(PathBuf::from("results.xml")));
    }

    #[test]
    fn variables_override_defaults() {
        let config = SimConfig::from_lookup(lookup(&[
            ("TB_TOPLEVEL", "midi_axi"),
            ("TB_PRECISION", "fs"),
            ("TB_MAX_DELTAS", "50"),
            ("TB_LOG_LEVEL", "debug"),
            ("TB_RESULTS", ""),
        ]))
        .unwrap();
        assert_eq!(config.top, "midi_axi");
        assert_eq!(config.precision, TimeUnit::Fs);
        assert_eq!(config.max_deltas, 50);
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.results_file, None);
    }

    #[test]
    fn bad_values_are_config_errors() {
        assert!(matches!(
            SimConfig::from_lookup(lookup(&[("TB_MAX_DELTAS", "many")])),
            Err(TbError::Config(_))
        ));
        assert!(matches!(
            SimConfig::from_lookup(lookup(&[("TB_PRECISION", "ks")])),
            Err(TbError::Sim(_))
        ));
    }
}
