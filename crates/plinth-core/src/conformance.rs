use std::collections::BTreeSet;

use plinth_plugin_sdk::Capability;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConformanceReport {
    pub conformant: bool,
    pub errors: Vec<String>,
}

/// Checks that every declared capability has its driver method.
///
/// Only presence is checked; parameter lists are the invocation adapter's
/// concern.
pub fn check(capabilities: &[Capability], driver_methods: &BTreeSet<String>) -> ConformanceReport {
    let errors: Vec<String> = capabilities
        .iter()
        .filter_map(|cap| {
            let method = cap.method_name();
            (!driver_methods.contains(&method)).then(|| {
                format!(
                    "Driver missing method '{method}' for capability '{}'",
                    cap.id
                )
            })
        })
        .collect();
    ConformanceReport {
        conformant: errors.is_empty(),
        errors,
    }
}
