//! Placeholder substitution for step command lines
//!
//! Templates name device values as `$mac`, `$sn` and, for paired plans,
//! `$mac11`, `$mac12`, `$mac21`, `$mac22`, `$sn1`, `$sn2`. Extra binding keys
//! become placeholders too. An unbound or empty placeholder is left in the
//! output exactly as written.

use std::collections::BTreeMap;

/// Placeholder name (without `$`) to value
pub type Bindings = BTreeMap<String, String>;

/// Placeholders every plan may use, bound or not
pub const KNOWN_PLACEHOLDERS: &[&str] = &[
    "mac", "sn", "mac11", "mac12", "mac21", "mac22", "sn1", "sn2",
];

/// Normalize a binding key: `$sn1` and `sn1` name the same placeholder
pub fn binding_key(name: &str) -> &str {
    name.trim().trim_start_matches('$')
}

/// Replace every known placeholder in `template` with its bound value
///
/// Placeholders are matched longest-first, so `$mac11` is never read as
/// `$mac` followed by `11`. Text that is not a placeholder is copied
/// unchanged.
pub fn substitute(template: &str, bindings: &Bindings) -> String {
    let names = placeholder_names(bindings);
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        match names.iter().find(|name| after.starts_with(*name)) {
            Some(name) => {
                match lookup(bindings, name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('$');
                        out.push_str(name);
                    }
                }
                rest = &after[name.len()..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Placeholder names in matching order: longest first, then alphabetical
fn placeholder_names(bindings: &Bindings) -> Vec<&str> {
    let mut names: Vec<&str> = KNOWN_PLACEHOLDERS
        .iter()
        .copied()
        .chain(bindings.keys().map(|k| binding_key(k)))
        .filter(|name| !name.is_empty())
        .collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    names.dedup();
    names
}

fn lookup<'a>(bindings: &'a Bindings, name: &str) -> Option<&'a str> {
    bindings
        .iter()
        .find(|(key, _)| binding_key(key) == name)
        .map(|(_, value)| value.as_str())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_substitutes_mac_and_sn() {
        let b = bindings(&[("mac", "AA:BB:CC:DD:EE:FF"), ("sn", "S1")]);
        assert_eq!(
            substitute("tool.exe --mac $mac --sn $sn", &b),
            "tool.exe --mac AA:BB:CC:DD:EE:FF --sn S1"
        );
    }

    #[test]
    fn test_missing_binding_leaves_token() {
        let b = bindings(&[("mac", "AA")]);
        assert_eq!(substitute("tool.exe $mac $sn", &b), "tool.exe AA $sn");
    }

    #[test]
    fn test_empty_binding_leaves_token() {
        let b = bindings(&[("mac", ""), ("sn", "")]);
        assert_eq!(substitute("tool.exe $mac $sn", &b), "tool.exe $mac $sn");
    }

    #[test]
    fn test_longest_placeholder_wins() {
        let b = bindings(&[("mac", "M"), ("mac11", "M11"), ("sn1", "S1")]);
        assert_eq!(
            substitute("pair.exe $mac11 $mac $sn1 $mac21", &b),
            "pair.exe M11 M S1 $mac21"
        );
    }

    #[test]
    fn test_dollar_prefixed_keys() {
        let b = bindings(&[("$sn1", "SN123"), ("$mac11", "AA:BB")]);
        assert_eq!(
            substitute("tool.exe -p $sn1 --mac $mac11", &b),
            "tool.exe -p SN123 --mac AA:BB"
        );
    }

    #[test]
    fn test_custom_binding_keys() {
        let b = bindings(&[("port", "3"), ("sn", "X")]);
        assert_eq!(substitute("poe.exe $port $sn", &b), "poe.exe 3 X");
    }

    #[test]
    fn test_other_text_untouched() {
        let b = bindings(&[("sn", "S1")]);
        assert_eq!(substitute("echo $ $$ $HOME 100$", &b), "echo $ $$ $HOME 100$");
        assert_eq!(substitute("", &b), "");
    }

    #[test]
    fn test_idempotent() {
        let cases = [
            ("tool $mac $sn $mac11 $sn2 $x", bindings(&[("mac", "AA"), ("sn2", "B")])),
            ("$mac$sn$$mac", bindings(&[("mac", "AA"), ("sn", "")])),
            ("plain text", bindings(&[])),
            ("$snapshot $mac12", bindings(&[("sn", "S"), ("mac12", "Z")])),
        ];
        for (template, b) in cases {
            let once = substitute(template, &b);
            assert_eq!(substitute(&once, &b), once, "template: {template}");
        }
    }

    #[test]
    fn test_binding_key() {
        assert_eq!(binding_key("$mac"), "mac");
        assert_eq!(binding_key(" sn1 "), "sn1");
    }
}
