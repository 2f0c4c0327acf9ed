//! Test plan data model
//!
//! A plan is loaded once from YAML and shared read-only with the run
//! controller. Nothing in the engine mutates it; the run mode chosen by the
//! operator travels in the [`RunContext`](crate::engine::RunContext) instead.

mod config;
mod loader;

use serde::Serialize;
use std::path::PathBuf;

pub use loader::{load, parse, parse_valid_range};

/// Which half of a paired measurement the station drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestMode {
    /// Transmit side only
    Tx,
    /// Receive side only
    Rx,
    /// Both sides, nothing skipped
    #[default]
    Both,
}

impl TestMode {
    /// Parse a mode name as written in plan files (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "TX" => Some(Self::Tx),
            "RX" => Some(Self::Rx),
            "BOTH" | "PAIR" => Some(Self::Both),
            _ => None,
        }
    }
}

impl std::fmt::Display for TestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tx => write!(f, "TX"),
            Self::Rx => write!(f, "RX"),
            Self::Both => write!(f, "BOTH"),
        }
    }
}

/// A product the plan applies to
#[derive(Debug, Clone, Default, Serialize)]
pub struct Product {
    pub name: String,
    /// MAC addresses consumed per device
    pub mac_count: u32,
    /// Serial numbers consumed per device
    pub sn_count: u32,
    pub version: String,
    pub other_message: String,
}

/// One measurement or action in a plan
#[derive(Debug, Clone, Serialize)]
pub struct TestStep {
    pub title: String,
    /// Command line with `$mac`/`$sn` style placeholders
    pub invocation_template: String,
    pub unit: String,
    pub valid_min: Option<f64>,
    pub valid_max: Option<f64>,
    /// Pause after a passing attempt before the next step starts
    pub delay_seconds: f64,
    /// Shown to the operator before each retry
    pub retry_message: String,
}

impl TestStep {
    pub fn new(title: &str, invocation_template: &str) -> Self {
        Self {
            title: title.to_string(),
            invocation_template: invocation_template.to_string(),
            unit: String::new(),
            valid_min: None,
            valid_max: None,
            delay_seconds: 0.0,
            retry_message: String::new(),
        }
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.valid_min = min;
        self.valid_max = max;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }

    pub fn with_delay(mut self, seconds: f64) -> Self {
        self.delay_seconds = seconds;
        self
    }

    pub fn with_retry_message(mut self, message: &str) -> Self {
        self.retry_message = message.to_string();
        self
    }
}

/// A loaded, immutable test plan
#[derive(Debug, Clone, Serialize)]
pub struct TestPlan {
    pub name: String,
    pub version: String,
    pub release_note: String,
    /// 0 = single device, 1 = paired devices
    pub pairing_count: u32,
    /// Default mode; the operator may override it per run
    pub mode: TestMode,
    pub products: Vec<Product>,
    pub steps: Vec<TestStep>,
    /// File the plan was loaded from, if any
    pub source: Option<PathBuf>,
}

impl TestPlan {
    pub fn new(name: &str, steps: Vec<TestStep>) -> Self {
        Self {
            name: name.to_string(),
            version: String::new(),
            release_note: String::new(),
            pairing_count: 0,
            mode: TestMode::Both,
            products: Vec::new(),
            steps,
            source: None,
        }
    }

    pub fn is_paired(&self) -> bool {
        self.pairing_count > 0
    }

    /// Placeholder names (without `$`) this plan expects the operator to bind
    ///
    /// Derived from the pairing mode and the largest MAC/SN count of any
    /// product. Paired plans address device `d`'s `k`-th MAC as `mac{d}{k}`
    /// and its serial as `sn{d}`.
    pub fn required_bindings(&self) -> Vec<String> {
        let mac_count = self.products.iter().map(|p| p.mac_count).max().unwrap_or(0);
        let sn_count = self.products.iter().map(|p| p.sn_count).max().unwrap_or(0);

        let mut names = Vec::new();
        if self.is_paired() {
            for device in 1..=2 {
                for k in 1..=mac_count.min(2) {
                    names.push(format!("mac{device}{k}"));
                }
            }
            if sn_count > 0 {
                names.push("sn1".to_string());
                names.push("sn2".to_string());
            }
        } else {
            if mac_count > 0 {
                names.push("mac".to_string());
            }
            if sn_count > 0 {
                names.push("sn".to_string());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(mac_count: u32, sn_count: u32) -> Product {
        Product {
            name: "AP-100".into(),
            mac_count,
            sn_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_mode_from_name() {
        assert_eq!(TestMode::from_name("tx"), Some(TestMode::Tx));
        assert_eq!(TestMode::from_name(" RX "), Some(TestMode::Rx));
        assert_eq!(TestMode::from_name("Both"), Some(TestMode::Both));
        assert_eq!(TestMode::from_name("PAIR"), Some(TestMode::Both));
        assert_eq!(TestMode::from_name("loopback"), None);
    }

    #[test]
    fn test_required_bindings_single() {
        let mut plan = TestPlan::new("single", Vec::new());
        plan.products.push(product(1, 1));
        assert_eq!(plan.required_bindings(), vec!["mac", "sn"]);

        plan.products[0].sn_count = 0;
        assert_eq!(plan.required_bindings(), vec!["mac"]);
    }

    #[test]
    fn test_required_bindings_paired() {
        let mut plan = TestPlan::new("paired", Vec::new());
        plan.pairing_count = 1;
        plan.products.push(product(2, 1));
        assert_eq!(
            plan.required_bindings(),
            vec!["mac11", "mac12", "mac21", "mac22", "sn1", "sn2"]
        );

        plan.products[0].mac_count = 1;
        assert_eq!(
            plan.required_bindings(),
            vec!["mac11", "mac21", "sn1", "sn2"]
        );
    }

    #[test]
    fn test_step_builder() {
        let step = TestStep::new("RSSI", "rssi.exe $mac")
            .with_range(Some(-70.0), None)
            .with_unit("dBm")
            .with_delay(0.5)
            .with_retry_message("Check antenna");
        assert_eq!(step.valid_min, Some(-70.0));
        assert_eq!(step.valid_max, None);
        assert_eq!(step.unit, "dBm");
        assert_eq!(step.retry_message, "Check antenna");
    }
}
