// Raw exposition samples

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One parsed exposition line. Ephemeral: produced by the parser, consumed by
/// the delta tracker within the same scrape cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub name: String,
    pub value: f64,
    pub labels: BTreeMap<String, String>,
    pub timestamp: Option<i64>,
}

impl RawSample {
    /// Canonical identity key: bare name when there are no labels, else
    /// `name{k="v",...}` with labels in sorted key order.
    pub fn key(&self) -> String {
        canonical_key(&self.name, &self.labels)
    }

    /// Re-serialize to one exposition line (canonical label order).
    pub fn to_line(&self) -> String {
        match self.timestamp {
            Some(ts) => format!("{} {} {}", self.key(), self.value, ts),
            None => format!("{} {}", self.key(), self.value),
        }
    }
}

pub fn canonical_key(name: &str, labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    format!("{}{{{}}}", name, pairs.join(","))
}

fn escape_label_value(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}
