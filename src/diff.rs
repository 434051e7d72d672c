use serde_json::Value;

/// Recursive structural diff of two JSON documents. Each changed leaf is
/// reported as (dot-joined path, old value, new value); keys missing from
/// the previous document count as changes from null.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(
                                &Value::Object(serde_json::Map::new()),
                                curr_val,
                                &path,
                                changes,
                            );
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_detects_leaf_change() {
        let prev = json!({"sensoryData": {"roomTemperature": 21.0}});
        let curr = json!({"sensoryData": {"roomTemperature": 22.0}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "sensoryData.roomTemperature");
        assert_eq!(changes[0].1, json!(21.0));
        assert_eq!(changes[0].2, json!(22.0));
    }

    #[test]
    fn diff_ignores_unchanged() {
        let val = json!({"sensoryData": {"roomTemperature": 21.0, "roomHumidity": 45.0}});
        let mut changes = vec![];
        diff_json(&val, &val, "", &mut changes);
        assert!(changes.is_empty());
    }

    #[test]
    fn diff_detects_new_key() {
        let prev = json!({"sensoryData": {}});
        let curr = json!({"sensoryData": {"outdoorTemperature": 18.0}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "sensoryData.outdoorTemperature");
        assert_eq!(changes[0].1, Value::Null);
    }

    #[test]
    fn diff_recurses_into_new_subtree() {
        let prev = json!({});
        let curr = json!({"fanControl": {"fanSpeed": {"currentMode": "auto"}}});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "fanControl.fanSpeed.currentMode");
        assert_eq!(changes[0].2, json!("auto"));
    }

    #[test]
    fn diff_reports_type_change() {
        let prev = json!({"onOffMode": "off"});
        let curr = json!({"onOffMode": true});
        let mut changes = vec![];
        diff_json(&prev, &curr, "", &mut changes);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].1, json!("off"));
        assert_eq!(changes[0].2, json!(true));
    }
}
