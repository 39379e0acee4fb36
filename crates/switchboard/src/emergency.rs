//! Emergency destination matching and the built-in emergency selector

use std::collections::HashSet;

use crate::types::ProviderDescriptor;

/// Recognises emergency destinations
#[derive(Debug, Clone, Default)]
pub struct EmergencyMatcher {
    numbers: HashSet<String>,
}

impl EmergencyMatcher {
    pub fn new<S: AsRef<str>>(numbers: &[S]) -> Self {
        Self {
            numbers: numbers
                .iter()
                .map(|n| normalize(n.as_ref()))
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// True when `handle` is one of the configured emergency numbers.
    ///
    /// A `tel:` scheme and visual separators are ignored, so `tel:9-1-1`
    /// matches `911`. Anything else must match exactly.
    pub fn is_emergency(&self, handle: &str) -> bool {
        self.numbers.contains(&normalize(handle))
    }
}

fn normalize(handle: &str) -> String {
    let trimmed = handle.trim();
    let number = match trimmed.get(..4) {
        Some(scheme) if scheme.eq_ignore_ascii_case("tel:") => &trimmed[4..],
        _ => trimmed,
    };

    number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

/// Ranking produced by the emergency selector: PSTN candidates only, in
/// discovery order
pub(crate) fn emergency_selection(candidates: &[ProviderDescriptor]) -> Vec<ProviderDescriptor> {
    candidates.iter().filter(|d| d.is_pstn()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capabilities, ComponentName, ProviderId};

    #[test]
    fn test_matches_configured_numbers() {
        let matcher = EmergencyMatcher::new(&["112", "911"]);
        assert!(matcher.is_emergency("911"));
        assert!(matcher.is_emergency("tel:112"));
        assert!(matcher.is_emergency("TEL:9-1-1"));
        assert!(matcher.is_emergency(" (911) "));
        assert!(!matcher.is_emergency("9110"));
        assert!(!matcher.is_emergency("sip:911@example.com"));
        assert!(!matcher.is_emergency(""));
    }

    #[test]
    fn test_empty_matcher_matches_nothing() {
        let matcher = EmergencyMatcher::new::<&str>(&[]);
        assert!(!matcher.is_emergency("911"));
    }

    #[test]
    fn test_selection_keeps_pstn_in_discovery_order() {
        let descriptor = |class: &str, caps| {
            ProviderDescriptor::new(ProviderId::new(ComponentName::new("p", class), "0"), caps)
        };
        let voip = descriptor("Voip", Capabilities::VIDEO);
        let sim1 = descriptor("Sim1", Capabilities::PSTN);
        let sim2 = descriptor("Sim2", Capabilities::PSTN | Capabilities::HANDOFF);

        let selected = emergency_selection(&[sim2.clone(), voip, sim1.clone()]);
        assert_eq!(selected, vec![sim2, sim1]);
    }
}
