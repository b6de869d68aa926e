use serde::{Deserialize, Serialize};

/// Static rule table adjustments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RulesConfig {
    /// Rule ids removed from the default tables, e.g. `"python.open"`.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl RulesConfig {
    pub fn is_disabled(&self, rule_id: &str) -> bool {
        self.disabled.iter().any(|id| id == rule_id)
    }
}
