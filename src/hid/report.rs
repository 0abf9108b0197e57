//! Input report parsing

use std::collections::BTreeMap;

use super::ControlDescriptor;

/// Named control values extracted from one report
pub type ControlState = BTreeMap<String, i64>;

/// Parse a raw report against the device's control descriptors
///
/// Controls whose bytes are missing, or whose `reportId` does not match the
/// first byte, are omitted rather than defaulted.
pub fn parse_report(report: &[u8], controls: &[ControlDescriptor]) -> ControlState {
    let mut state = ControlState::new();
    for control in controls {
        if let Some(id) = control.report_id {
            if report.first() != Some(&id) {
                continue;
            }
        }
        if let Some(value) = control.extract(report) {
            state.insert(control.name.clone(), value);
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hid::ControlKind;

    fn controls() -> Vec<ControlDescriptor> {
        let json = r#"[
            {"name": "play", "type": "button", "reportId": 1, "byte": 1, "bit": 0},
            {"name": "shift", "type": "modifier", "reportId": 1, "byte": 1, "bit": 7},
            {"name": "jog", "type": "delta", "reportId": 1, "byte": 2, "signed": true},
            {"name": "tempo", "type": "absolute", "reportId": 1, "byte": 3, "size": 2, "resolution": 14},
            {"name": "browse", "type": "encoder", "reportId": 2, "byte": 1}
        ]"#;
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_full_report() {
        let state = parse_report(&[0x01, 0b1000_0001, 0xFE, 0xFF, 0x3F], &controls());
        assert_eq!(state.get("play"), Some(&1));
        assert_eq!(state.get("shift"), Some(&1));
        assert_eq!(state.get("jog"), Some(&-2));
        assert_eq!(state.get("tempo"), Some(&16383));
        // Different report id
        assert_eq!(state.get("browse"), None);
    }

    #[test]
    fn test_short_report_omits_missing_controls() {
        let state = parse_report(&[0x01, 0b0000_0001, 0x00], &controls());
        assert_eq!(state.len(), 3);
        assert!(!state.contains_key("tempo"));
    }

    #[test]
    fn test_report_id_selects_controls() {
        let state = parse_report(&[0x02, 0x05], &controls());
        assert_eq!(state.len(), 1);
        assert_eq!(state.get("browse"), Some(&5));
        assert_eq!(controls()[4].kind, ControlKind::Encoder);
    }

    #[test]
    fn test_empty_report() {
        assert!(parse_report(&[], &controls()).is_empty());
    }
}
