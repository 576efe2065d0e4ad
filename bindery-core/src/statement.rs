use crate::consume_while;
use anyhow::{Error, Result};
use std::collections::BTreeMap;

/// Placeholder found in the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    /// `:name`
    Named(String),
    /// The n-th `?`, zero based.
    Positional(usize),
}

/// SQL text with every placeholder rewritten as `?`, plus the placeholders in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSql {
    pub sql: String,
    pub placeholders: Vec<Placeholder>,
}

impl ParsedSql {
    pub fn named(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().filter_map(|v| match v {
            Placeholder::Named(name) => Some(name.as_str()),
            Placeholder::Positional(..) => None,
        })
    }
    pub fn references(&self, name: &str) -> bool {
        self.named().any(|v| v == name)
    }
}

fn is_name_start(c: &char) -> bool {
    c.is_alphabetic() || *c == '_'
}

fn is_name_part(c: &char) -> bool {
    c.is_alphanumeric() || *c == '_' || *c == '.'
}

/// Extract the placeholders of `sql`.
///
/// String literals, quoted identifiers, comments and `::` casts are copied
/// verbatim, only `:name` and `?` outside of them are parameters.
pub fn parse_sql(sql: &str) -> Result<ParsedSql> {
    let mut out = String::with_capacity(sql.len());
    let mut placeholders = Vec::new();
    let mut positional = 0;
    let mut input = sql;
    while let Some(c) = input.chars().next() {
        match c {
            '\'' | '"' | '`' => {
                let end = input[1..]
                    .find(c)
                    .ok_or_else(|| Error::msg(format!("Unterminated {c} quoted text in `{sql}`")))?;
                out.push_str(&input[..end + 2]);
                input = &input[end + 2..];
            }
            '-' if input.starts_with("--") => {
                let end = input.find('\n').unwrap_or(input.len());
                out.push_str(&input[..end]);
                input = &input[end..];
            }
            '/' if input.starts_with("/*") => {
                let end = input
                    .find("*/")
                    .ok_or_else(|| Error::msg(format!("Unterminated comment in `{sql}`")))?;
                out.push_str(&input[..end + 2]);
                input = &input[end + 2..];
            }
            ':' if input.starts_with("::") => {
                out.push_str("::");
                input = &input[2..];
            }
            ':' if input[1..].chars().next().is_some_and(|v| is_name_start(&v)) => {
                input = &input[1..];
                let token = consume_while(&mut input, is_name_part);
                let name = token.trim_end_matches('.');
                placeholders.push(Placeholder::Named(name.to_string()));
                out.push('?');
                out.push_str(&token[name.len()..]);
            }
            '?' => {
                placeholders.push(Placeholder::Positional(positional));
                positional += 1;
                out.push('?');
                input = &input[1..];
            }
            _ => {
                out.push(c);
                input = &input[c.len_utf8()..];
            }
        }
    }
    Ok(ParsedSql {
        sql: out,
        placeholders,
    })
}

/// Renders the located SQL text with the definitions of the statement context.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &str, definitions: &BTreeMap<String, String>) -> Result<String>;
}

/// Replaces every `<name>` token with the definition of the same name.
///
/// Tokens inside string literals are left alone, an undefined name is an error.
#[derive(Default, Debug, Clone, Copy)]
pub struct DefinitionTemplate;

impl TemplateEngine for DefinitionTemplate {
    fn render(&self, template: &str, definitions: &BTreeMap<String, String>) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut input = template;
        while let Some(c) = input.chars().next() {
            match c {
                '\'' => {
                    let end = input[1..].find('\'').map(|v| v + 2).unwrap_or(input.len());
                    out.push_str(&input[..end]);
                    input = &input[end..];
                }
                '<' if input[1..].chars().next().is_some_and(|v| is_name_start(&v)) => {
                    let mut rest = &input[1..];
                    let name = consume_while(&mut rest, |c| c.is_alphanumeric() || *c == '_');
                    if let Some(rest) = rest.strip_prefix('>') {
                        let value = definitions.get(name).ok_or_else(|| {
                            Error::msg(format!("Undefined definition `<{name}>` in `{template}`"))
                        })?;
                        out.push_str(value);
                        input = rest;
                    } else {
                        out.push('<');
                        input = &input[1..];
                    }
                }
                _ => {
                    out.push(c);
                    input = &input[c.len_utf8()..];
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{DefinitionTemplate, Placeholder, TemplateEngine, parse_sql};
    use indoc::indoc;
    use std::collections::BTreeMap;

    #[test]
    fn named_and_positional() {
        let parsed = parse_sql("SELECT * FROM users WHERE id = :id AND name = ? OR alias = :u.name")
            .unwrap();
        assert_eq!(
            parsed.sql,
            "SELECT * FROM users WHERE id = ? AND name = ? OR alias = ?"
        );
        assert_eq!(
            parsed.placeholders,
            [
                Placeholder::Named("id".into()),
                Placeholder::Positional(0),
                Placeholder::Named("u.name".into()),
            ]
        );
    }

    #[test]
    fn skips_literals_comments_and_casts() {
        let parsed = parse_sql(indoc! {r#"
            -- lookup by :ignored
            SELECT ':no', "col?", price::numeric /* :nope ? */
            FROM items WHERE id = :id
        "#})
        .unwrap();
        assert_eq!(parsed.placeholders, [Placeholder::Named("id".into())]);
        assert!(parsed.sql.contains("price::numeric"));
        assert!(parsed.sql.contains("':no'"));
        assert!(parse_sql("SELECT 'open").is_err());
    }

    #[test]
    fn definitions() {
        let mut definitions = BTreeMap::new();
        definitions.insert("table".to_string(), "users".to_string());
        let rendered = DefinitionTemplate
            .render("SELECT '<table>' FROM <table> WHERE a < b", &definitions)
            .unwrap();
        assert_eq!(rendered, "SELECT '<table>' FROM users WHERE a < b");
        assert!(DefinitionTemplate.render("SELECT <missing>", &definitions).is_err());
    }
}
