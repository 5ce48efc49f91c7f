//! The `duty_assignments.prefect_id` column holds either one profile id or a
//! JSON array of ids. These helpers are the only code that reads or writes
//! that text.

/// Decode the column text into ids, first occurrence wins on duplicates.
pub fn parse(raw: &str) -> Vec<String> {
    let t = raw.trim();
    if t.is_empty() {
        return Vec::new();
    }
    if t.starts_with('[') {
        if let Ok(ids) = serde_json::from_str::<Vec<String>>(t) {
            return dedup(ids.into_iter().map(|s| s.trim().to_string()));
        }
    }
    vec![t.to_string()]
}

/// Encode ids for storage: one id is written bare, several as a JSON array.
pub fn serialize(ids: &[String]) -> String {
    let ids = dedup(ids.iter().map(|s| s.trim().to_string()));
    match ids.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        many => serde_json::to_string(many).unwrap_or_default(),
    }
}

pub fn contains(raw: &str, id: &str) -> bool {
    parse(raw).iter().any(|p| p == id)
}

fn dedup(ids: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in ids {
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn single_id_is_stored_bare_and_round_trips() {
        let stored = serialize(&ids(&["p-1"]));
        assert_eq!(stored, "p-1");
        assert_eq!(parse(&stored), ids(&["p-1"]));
    }

    #[test]
    fn several_ids_are_stored_as_json_array_and_round_trip() {
        let stored = serialize(&ids(&["p-1", "p-2", "p-3"]));
        assert_eq!(stored, r#"["p-1","p-2","p-3"]"#);
        assert_eq!(parse(&stored), ids(&["p-1", "p-2", "p-3"]));
    }

    #[test]
    fn duplicates_collapse_to_single_form() {
        assert_eq!(serialize(&ids(&["p-1", " p-1 "])), "p-1");
        assert_eq!(parse(r#"["a","b","a"]"#), ids(&["a", "b"]));
    }

    #[test]
    fn blank_and_malformed_text() {
        assert!(parse("").is_empty());
        assert!(parse("   ").is_empty());
        assert_eq!(parse("[not json"), ids(&["[not json"]));
        assert_eq!(serialize(&[]), "");
    }

    #[test]
    fn membership_check_handles_both_forms() {
        assert!(contains("p-1", "p-1"));
        assert!(contains(r#"["p-1","p-2"]"#, "p-2"));
        assert!(!contains(r#"["p-1","p-2"]"#, "p-3"));
    }
}
