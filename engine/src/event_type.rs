//! Event-type canonicalization.
//!
//! Event types are plain strings chosen by the domain code that broadcasts
//! them. When a type is renamed, dashboards still running an older build keep
//! sending the old name in their filters. Every publish site and every match
//! site therefore runs names through [`canonicalize`], which normalizes
//! spelling and then resolves the alias table below.

/// Legacy or alternate event-type names, mapped to their canonical form.
///
/// Keys are already in normalized spelling (lowercase, `_` separators).
pub const EVENT_TYPE_ALIASES: &[(&str, &str)] = &[
    ("stage_changed", "stage_change"),
    ("status_change", "stage_change"),
    ("order_status_changed", "stage_change"),
    ("order_update", "order_updated"),
    ("job_updated", "order_updated"),
    ("new_order", "order_created"),
    ("order_create", "order_created"),
    ("order_deleted", "order_removed"),
    ("payment_update", "payment_updated"),
];

/// Normalize spelling: trim, lowercase, and use `_` as the only separator.
fn normalize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '-' | '.' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Map an event-type name to its canonical form.
///
/// Unknown names pass through with normalized spelling.
pub fn canonicalize(raw: &str) -> String {
    let normalized = normalize(raw);
    EVENT_TYPE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(normalized)
}

/// Canonicalize a list of names, dropping blanks and duplicates while
/// keeping first-seen order.
pub fn canonicalize_all<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if name.as_ref().trim().is_empty() {
            continue;
        }
        let canonical = canonicalize(name.as_ref());
        if !out.contains(&canonical) {
            out.push(canonical);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_pass_through() {
        assert_eq!(canonicalize("stage_change"), "stage_change");
        assert_eq!(canonicalize("order_updated"), "order_updated");
        assert_eq!(canonicalize("custom_event"), "custom_event");
    }

    #[test]
    fn aliases_resolve() {
        assert_eq!(canonicalize("stage_changed"), "stage_change");
        assert_eq!(canonicalize("status_change"), "stage_change");
        assert_eq!(canonicalize("job_updated"), "order_updated");
        assert_eq!(canonicalize("new_order"), "order_created");
    }

    #[test]
    fn spelling_is_normalized_before_alias_lookup() {
        assert_eq!(canonicalize("  Stage-Changed "), "stage_change");
        assert_eq!(canonicalize("order.update"), "order_updated");
        assert_eq!(canonicalize("ORDER_CREATED"), "order_created");
    }

    #[test]
    fn alias_table_targets_are_canonical() {
        for (alias, canonical) in EVENT_TYPE_ALIASES {
            assert_eq!(canonicalize(canonical), *canonical, "alias chain for {alias}");
            assert_eq!(normalize(alias), *alias);
        }
    }

    #[test]
    fn canonicalize_all_dedups() {
        let names = canonicalize_all(["stage_change", "stage_changed", "", " ", "new_order"]);
        assert_eq!(names, vec!["stage_change", "order_created"]);
    }
}
