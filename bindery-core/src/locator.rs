use anyhow::Result;

/// Turns the SQL declared on a method into the text to execute.
pub trait SqlLocator: Send + Sync {
    fn locate(&self, type_name: &str, method: &str, declared: &str) -> Result<String>;
}

/// The declared text is the SQL.
#[derive(Default, Debug, Clone, Copy)]
pub struct LiteralLocator;

impl SqlLocator for LiteralLocator {
    fn locate(&self, _type_name: &str, _method: &str, declared: &str) -> Result<String> {
        Ok(declared.to_string())
    }
}

impl<F> SqlLocator for F
where
    F: Fn(&str, &str, &str) -> Result<String> + Send + Sync,
{
    fn locate(&self, type_name: &str, method: &str, declared: &str) -> Result<String> {
        self(type_name, method, declared)
    }
}
