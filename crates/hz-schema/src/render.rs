use std::fmt::Write as _;

use crate::model::Schema;

pub const DOCUMENT_HEADER: &str = "# This is a TOML document";

/// Render a schema as a TOML document.
///
/// Output is deterministic: sections follow the model's sorted order, empty
/// `indexes` lists and empty rule tables are omitted, and `validator` is only
/// written when it is non-empty.
pub fn render(schema: &Schema) -> String {
    let mut sections: Vec<String> = Vec::new();

    for c in schema.collections.values() {
        let mut s = format!("[collections.{}]\n", key(&c.id));
        if !c.indexes.is_empty() {
            let items: Vec<String> = c.indexes.iter().map(|i| string(i)).collect();
            let _ = writeln!(s, "indexes = [{}]", items.join(", "));
        }
        sections.push(s);
    }

    for g in schema.groups.values() {
        if g.rules.is_empty() {
            sections.push(format!("[groups.{}]\n", key(&g.id)));
            continue;
        }
        for (name, rule) in &g.rules {
            let mut s = format!("[groups.{}.rules.{}]\n", key(&g.id), key(name));
            let _ = writeln!(s, "template = {}", string(&rule.template));
            if let Some(v) = rule.validator.as_deref().filter(|v| !v.is_empty()) {
                let _ = writeln!(s, "validator = {}", string(v));
            }
            sections.push(s);
        }
    }

    let mut out = format!("{DOCUMENT_HEADER}\n");
    for s in sections {
        out.push('\n');
        out.push_str(&s);
    }
    out
}

fn is_bare_key(k: &str) -> bool {
    !k.is_empty()
        && k
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn key(k: &str) -> String {
    if is_bare_key(k) {
        k.to_string()
    } else {
        string(k)
    }
}

fn string(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}
