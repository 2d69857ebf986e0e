//! Cypher queries
//!
//! A [`Query`] is Cypher text plus its parameters. Query texts are written
//! as templates: `$name` and `${name}` placeholders are filled in when the
//! query is built, `$$` renders a literal `$`, and any placeholder without a
//! value is left untouched so it stays a Cypher parameter.

pub mod discovery;
pub mod export;
pub mod importer;
pub mod inference;
pub mod management;
pub mod semantic_header;

use serde_json::{Map, Value};

/// A Cypher statement ready to be sent to the database
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub text: String,
    pub parameters: Map<String, Value>,
    /// Target database; `None` uses the connection's default
    pub database: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Map::new(),
            database: None,
        }
    }

    /// Build a query from a template and its substitutions
    pub fn from_template(template: &str, substitutions: &[(&str, &str)]) -> Self {
        Self::new(substitute(template, substitutions))
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn on_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Batched queries report failed batches and are retried with a smaller limit
    pub fn is_periodic_commit(&self) -> bool {
        self.text.contains("apoc.periodic.commit")
    }
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_identifier_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

/// Whether `name` can be spliced into a query as a property or variable name
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_identifier_start) && chars.all(is_identifier_char)
}

/// Single-pass template substitution
///
/// Unknown or malformed placeholders are copied as-is. Substituted values
/// are never rescanned.
pub fn substitute(template: &str, substitutions: &[(&str, &str)]) -> String {
    let lookup = |name: &str| {
        substitutions
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    };

    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(position) = rest.find('$') {
        output.push_str(&rest[..position]);
        let after = &rest[position + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            output.push('$');
            rest = tail;
            continue;
        }

        if let Some(braced) = after.strip_prefix('{') {
            let name_len = braced.find(|c: char| !is_identifier_char(c)).unwrap_or(braced.len());
            let name = &braced[..name_len];
            let closed = braced[name_len..].starts_with('}');
            if closed && name.starts_with(is_identifier_start) {
                if let Some(value) = lookup(name) {
                    output.push_str(value);
                    rest = &braced[name_len + 1..];
                    continue;
                }
            }
            output.push('$');
            rest = after;
            continue;
        }

        if after.starts_with(is_identifier_start) {
            let name_len = after.find(|c: char| !is_identifier_char(c)).unwrap_or(after.len());
            let name = &after[..name_len];
            if let Some(value) = lookup(name) {
                output.push_str(value);
                rest = &after[name_len..];
                continue;
            }
        }

        output.push('$');
        rest = after;
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("resource"));
        assert!(is_identifier("_cost2"));
        assert!(!is_identifier("2cost"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn test_substitute_plain_and_braced() {
        let text = substitute("MATCH (n:$label) SET n.${prop}_copy = 1", &[("label", "Event"), ("prop", "x")]);
        assert_eq!(text, "MATCH (n:Event) SET n.x_copy = 1");
    }

    #[test]
    fn test_unknown_placeholders_are_kept() {
        let text = substitute("WITH n limit $limit RETURN ${other}", &[("label", "Event")]);
        assert_eq!(text, "WITH n limit $limit RETURN ${other}");
    }

    #[test]
    fn test_escaped_and_invalid_dollars() {
        assert_eq!(substitute("cost $$5 and $ 3 and $1", &[]), "cost $5 and $ 3 and $1");
        assert_eq!(substitute("trailing $", &[]), "trailing $");
        assert_eq!(substitute("${unclosed", &[("unclosed", "x")]), "${unclosed");
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let text = substitute("$a $b", &[("a", "$b"), ("b", "B")]);
        assert_eq!(text, "$b B");
    }

    #[test]
    fn test_longest_identifier_wins() {
        let text = substitute("$record_name $record", &[("record", "(r:R)"), ("record_name", "r")]);
        assert_eq!(text, "r (r:R)");
    }

    #[test]
    fn test_query_builder() {
        let query = Query::from_template("CALL apoc.periodic.commit('MATCH ($record) ...')", &[("record", "r:Record")])
            .with_parameter("limit", 5000)
            .on_database("system");
        assert!(query.is_periodic_commit());
        assert_eq!(query.parameters["limit"], json!(5000));
        assert_eq!(query.database.as_deref(), Some("system"));
        assert!(query.text.contains("MATCH (r:Record)"));
    }
}
