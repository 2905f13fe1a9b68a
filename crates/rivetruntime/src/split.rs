//! Fan-out planning for split-run nodes and fan-in of their results.

use rivetcore::{NodeError, PortDefinition, Value};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SplitPlan {
    /// No array input participates; run once over the inputs as given
    Single,
    /// One input set per instance, in index order
    Instances(Vec<HashMap<String, Value>>),
}

/// An array value splits unless the port itself is array-typed, in which case
/// only an array of arrays splits.
fn participates(def: &PortDefinition, items: &[Value]) -> bool {
    if def.data_type.is_array() {
        !items.is_empty() && items.iter().all(Value::is_array)
    } else {
        true
    }
}

/// Instance count is the longest splitting array. Single-element arrays and
/// non-array inputs are broadcast; any other length mismatch is an error.
pub(crate) fn plan_split(
    inputs: &HashMap<String, Value>,
    defs: &[PortDefinition],
    max_instances: Option<usize>,
) -> Result<SplitPlan, NodeError> {
    let splitting: Vec<(&str, &[Value])> = defs
        .iter()
        .filter_map(|def| match inputs.get(&def.id) {
            Some(Value::Array(items)) if participates(def, items) => {
                Some((def.id.as_str(), items.as_slice()))
            }
            _ => None,
        })
        .collect();

    if splitting.is_empty() {
        return Ok(SplitPlan::Single);
    }

    let longest = splitting.iter().map(|(_, items)| items.len()).max().unwrap_or(0);
    for (port, items) in &splitting {
        if items.len() != longest && items.len() != 1 {
            return Err(NodeError::SplitLengthMismatch {
                port: port.to_string(),
                expected: longest,
                actual: items.len(),
            });
        }
    }

    let count = max_instances.map_or(longest, |max| longest.min(max));
    let instances = (0..count)
        .map(|index| {
            inputs
                .iter()
                .map(|(port, value)| {
                    let value = match splitting.iter().find(|(p, _)| *p == port.as_str()) {
                        Some((_, items)) if items.len() == 1 => items[0].clone(),
                        Some((_, items)) => items[index].clone(),
                        None => value.clone(),
                    };
                    (port.clone(), value)
                })
                .collect()
        })
        .collect();

    Ok(SplitPlan::Instances(instances))
}

/// Reassemble per-instance outputs into one array per port, in index order
pub(crate) fn merge_instance_outputs(
    declared: &[PortDefinition],
    results: Vec<HashMap<String, Value>>,
) -> HashMap<String, Value> {
    let mut ports: Vec<String> = declared.iter().map(|d| d.id.clone()).collect();
    let extra: BTreeSet<&String> = results
        .iter()
        .flat_map(|r| r.keys())
        .filter(|k| !declared.iter().any(|d| &d.id == *k))
        .collect();
    ports.extend(extra.into_iter().cloned());

    ports
        .into_iter()
        .map(|port| {
            let column = results
                .iter()
                .map(|r| r.get(&port).cloned().unwrap_or(Value::Null))
                .collect();
            (port, Value::Array(column))
        })
        .collect()
}
