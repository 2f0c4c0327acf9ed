//! Plan loading and validation
//!
//! Turns a YAML plan file into a [`TestPlan`]. Anything that would make a run
//! meaningless (no steps list, an unparsable range, a step with nothing to
//! execute) is rejected here so the run never starts.

use std::path::Path;

use crate::common::{Error, Result};

use super::config::{scalar_text, ItemEntry, PlanFile, ProductEntry};
use super::{Product, TestMode, TestPlan, TestStep};

/// Load and validate a plan from a YAML file
pub fn load(path: &Path) -> Result<TestPlan> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let mut plan = parse(&content)?;
    plan.source = Some(path.to_path_buf());
    tracing::info!(
        plan = %plan.name,
        version = %plan.version,
        steps = plan.steps.len(),
        "Loaded test plan from {}",
        path.display()
    );
    Ok(plan)
}

/// Parse and validate a plan from YAML text
pub fn parse(content: &str) -> Result<TestPlan> {
    if content.trim().is_empty() {
        return Err(Error::plan("plan file is empty"));
    }

    let file: PlanFile = serde_yaml::from_str(content)
        .map_err(|e| Error::plan(format!("failed to parse plan: {}", e)))?;

    let products = file
        .product
        .ok_or_else(|| Error::plan("missing 'Product' list"))?;
    let items = file
        .items
        .ok_or_else(|| Error::plan("missing 'Items' list"))?;

    let mode = match file.script.mode.as_deref() {
        None => TestMode::Both,
        Some(name) => TestMode::from_name(name)
            .ok_or_else(|| Error::plan(format!("unknown mode '{}'", name)))?,
    };

    if file.script.pairing > 1 {
        return Err(Error::plan(format!(
            "pairing must be 0 (single) or 1 (paired), got {}",
            file.script.pairing
        )));
    }

    let steps = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| convert_item(index, item))
        .collect::<Result<Vec<_>>>()?;

    Ok(TestPlan {
        name: file.script.name,
        version: file
            .script
            .version
            .as_ref()
            .and_then(scalar_text)
            .unwrap_or_default(),
        release_note: file.script.release_note,
        pairing_count: file.script.pairing,
        mode,
        products: products.into_iter().map(convert_product).collect(),
        steps,
        source: None,
    })
}

fn convert_product(entry: ProductEntry) -> Product {
    Product {
        name: entry.name,
        mac_count: entry.use_mac,
        sn_count: entry.use_sn,
        version: entry.version.as_ref().and_then(scalar_text).unwrap_or_default(),
        other_message: entry.other_message,
    }
}

fn convert_item(index: usize, item: ItemEntry) -> Result<TestStep> {
    if item.execute.trim().is_empty() {
        return Err(Error::plan(format!(
            "step {} ('{}') has no 'Execute' command",
            index, item.title
        )));
    }

    let valid = item
        .valid
        .as_ref()
        .map(|v| {
            scalar_text(v).ok_or_else(|| Error::InvalidRange {
                step: item.title.clone(),
                value: format!("{:?}", v),
            })
        })
        .transpose()?
        .unwrap_or_default();
    let (valid_min, valid_max) = parse_valid_range(&valid).ok_or_else(|| Error::InvalidRange {
        step: item.title.clone(),
        value: valid.clone(),
    })?;

    let delay_seconds = match item.delay.as_ref().and_then(scalar_text) {
        None => 0.0,
        Some(text) if text.trim().is_empty() => 0.0,
        Some(text) => match text.trim().parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => seconds,
            _ => {
                tracing::warn!(step = %item.title, "Invalid delay value '{}', using 0", text);
                0.0
            }
        },
    };

    Ok(TestStep {
        title: item.title,
        invocation_template: item.execute,
        unit: item.unit,
        valid_min,
        valid_max,
        delay_seconds,
        retry_message: item.retry,
    })
}

/// Parse a `"min,max"` range where either side may be blank
///
/// An entirely blank string means the step has no numeric bounds. Returns
/// `None` when the text is not a two-part range or a side is not a number.
pub fn parse_valid_range(text: &str) -> Option<(Option<f64>, Option<f64>)> {
    let text = text.trim();
    if text.is_empty() {
        return Some((None, None));
    }

    let (min, max) = text.split_once(',')?;
    if max.contains(',') {
        return None;
    }

    let bound = |side: &str| -> Option<Option<f64>> {
        let side = side.trim();
        if side.is_empty() {
            return Some(None);
        }
        side.parse::<f64>().ok().filter(|v| !v.is_nan()).map(Some)
    };

    let min = bound(min)?;
    let max = bound(max)?;
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
Script:
  Name: AP-100 Final
  Version: 1.2
  Pairing: 0
  ReleaseNote: add RSSI
Product:
  - Name: AP-100
    UseMac: 1
    UseSn: 1
    Version: A1
Items:
  - Title: Power on
    Retry: Check the power cable
    Valid: ""
    Unit: ""
    Delay: 2
    Execute: power.exe on
  - Title: RSSI TESTING_RX
    Retry: Check antenna
    Valid: "-70,-20"
    Unit: dBm
    Delay: 0
    Execute: rssi.exe $mac
  - Title: Write SN
    Valid: "1,"
    Execute: writesn.exe $sn
"#;

    #[test]
    fn test_parse_sample_plan() {
        let plan = parse(SAMPLE).unwrap();
        assert_eq!(plan.name, "AP-100 Final");
        assert_eq!(plan.version, "1.2");
        assert_eq!(plan.pairing_count, 0);
        assert_eq!(plan.mode, TestMode::Both);
        assert_eq!(plan.products.len(), 1);
        assert_eq!(plan.products[0].mac_count, 1);
        assert_eq!(plan.steps.len(), 3);

        let power = &plan.steps[0];
        assert_eq!(power.valid_min, None);
        assert_eq!(power.valid_max, None);
        assert_eq!(power.delay_seconds, 2.0);
        assert_eq!(power.retry_message, "Check the power cable");

        let rssi = &plan.steps[1];
        assert_eq!(rssi.valid_min, Some(-70.0));
        assert_eq!(rssi.valid_max, Some(-20.0));
        assert_eq!(rssi.invocation_template, "rssi.exe $mac");

        let sn = &plan.steps[2];
        assert_eq!(sn.valid_min, Some(1.0));
        assert_eq!(sn.valid_max, None);
    }

    #[test]
    fn test_lowercase_aliases() {
        let plan = parse(
            r#"
script: { name: lower, pairing: 1, mode: rx }
product: []
items:
  - { title: t, valid: "0,1", execute: tool.exe }
"#,
        )
        .unwrap();
        assert_eq!(plan.name, "lower");
        assert!(plan.is_paired());
        assert_eq!(plan.mode, TestMode::Rx);
    }

    #[test]
    fn test_missing_sections_are_plan_errors() {
        let err = parse("Script: {Name: x}\nItems: []\n").unwrap_err();
        assert!(matches!(err, Error::PlanConfiguration(ref m) if m.contains("Product")));

        let err = parse("Script: {Name: x}\nProduct: []\n").unwrap_err();
        assert!(matches!(err, Error::PlanConfiguration(ref m) if m.contains("Items")));

        let err = parse("   \n").unwrap_err();
        assert!(matches!(err, Error::PlanConfiguration(_)));
    }

    #[test]
    fn test_malformed_yaml_is_plan_error() {
        let err = parse("Script: [unclosed\n").unwrap_err();
        assert!(matches!(err, Error::PlanConfiguration(_)));
    }

    #[test]
    fn test_step_without_command_is_rejected() {
        let err = parse("Product: []\nItems:\n  - Title: nothing\n").unwrap_err();
        assert!(matches!(err, Error::PlanConfiguration(ref m) if m.contains("nothing")));
    }

    #[test]
    fn test_bad_range_is_rejected() {
        let err = parse("Product: []\nItems:\n  - {Title: t, Valid: \"a,b\", Execute: x}\n")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRange { .. }));
    }

    #[test]
    fn test_bad_delay_falls_back_to_zero() {
        let plan =
            parse("Product: []\nItems:\n  - {Title: t, Delay: soon, Execute: x}\n").unwrap();
        assert_eq!(plan.steps[0].delay_seconds, 0.0);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let err = parse("Script: {Mode: sideways}\nProduct: []\nItems: []\n").unwrap_err();
        assert!(matches!(err, Error::PlanConfiguration(_)));
    }

    #[test]
    fn test_parse_valid_range() {
        assert_eq!(parse_valid_range(""), Some((None, None)));
        assert_eq!(parse_valid_range("10,20"), Some((Some(10.0), Some(20.0))));
        assert_eq!(parse_valid_range(" 1.5 , "), Some((Some(1.5), None)));
        assert_eq!(parse_valid_range(",5"), Some((None, Some(5.0))));
        assert_eq!(parse_valid_range(","), Some((None, None)));
        assert_eq!(parse_valid_range("10"), None);
        assert_eq!(parse_valid_range("1,2,3"), None);
        assert_eq!(parse_valid_range("low,high"), None);
    }

    #[test]
    fn test_load_sets_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let plan = load(&path).unwrap();
        assert_eq!(plan.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/plan.yaml")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
