//! # Cypher Generation
//!
//! Query trees compile into an output-side AST which renders to Cypher text.
//! Pure functions: no I/O, no state, no executor dependency.
//!
//! Every literal supplied by the caller travels as a named parameter
//! (see [`params::ParamSink`]); [`literal`] only exists to inline values
//! for logging and debugging.

pub mod ast;
pub mod compiler;
pub mod params;
pub(crate) mod render;

use crate::model::Value;

pub use compiler::{
    compile, CompileOptions, CompiledQuery, HydrationPlan, Mutation, PreloadColumn, Projection, RowShape, TrackColumn,
};
pub use params::ParamSink;

/// Keywords that cannot appear unquoted as labels or aliases.
const RESERVED: &[&str] = &[
    "all", "and", "as", "asc", "by", "case", "contains", "create", "delete", "desc", "detach",
    "distinct", "else", "end", "exists", "false", "in", "is", "limit", "match", "merge", "not",
    "null", "optional", "or", "order", "remove", "return", "set", "skip", "then", "true",
    "union", "unwind", "when", "where", "with", "xor",
];

/// Render a label, relationship type, property key or alias, backtick-quoting
/// anything that is not a plain identifier.
pub fn ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&name.to_ascii_lowercase().as_str());
    if plain {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// Property access that tolerates keywords (`n.end` is legal Cypher).
pub fn prop(variable: &str, key: &str) -> String {
    let plain = key.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        format!("{variable}.{key}")
    } else {
        format!("{variable}.`{}`", key.replace('`', "``"))
    }
}

/// Reduce an arbitrary name to `[A-Za-z0-9_]` for use inside a variable name.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Inline a value as a Cypher literal.
pub fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => format!("{f:.1}"),
        Value::Float(f) => format!("{f}"),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::List(items) => {
            let inner: Vec<String> = items.iter().map(literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Map(m) => {
            let mut keys: Vec<&String> = m.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}: {}", ident(k), literal(&m[k])))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ident() {
        assert_eq!(ident("phone"), "phone");
        assert_eq!(ident("my corpus"), "`my corpus`");
        assert_eq!(ident("end"), "`end`");
        assert_eq!(ident("1st"), "`1st`");
        assert_eq!(ident("a`b"), "`a``b`");
    }

    #[test]
    fn test_prop() {
        assert_eq!(prop("n", "end"), "n.end");
        assert_eq!(prop("n", "speech rate"), "n.`speech rate`");
    }

    #[test]
    fn test_literal() {
        assert_eq!(literal(&Value::String("it's".into())), "'it\\'s'");
        assert_eq!(literal(&Value::Int(42)), "42");
        assert_eq!(literal(&Value::Float(3.0)), "3.0");
        assert_eq!(literal(&Value::Float(0.25)), "0.25");
        assert_eq!(literal(&Value::Bool(true)), "true");
        assert_eq!(literal(&Value::Null), "null");
        assert_eq!(literal(&Value::from(vec!["aa", "b"])), "['aa', 'b']");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("word-final"), "word_final");
    }
}
