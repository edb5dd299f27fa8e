//! SQL text rewriting.
//!
//! An ordered list of regex rules is applied to every incoming statement
//! before anything else looks at it; each rule's output feeds the next
//! rule's input. User rules come from the `-j` JSON file. With `-q`, a
//! built-in table translating the catalog queries behind psql's
//! introspection meta-commands is applied ahead of the user rules.

use std::borrow::Cow;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};

use crate::errors::Error;

/// One `(input_pattern, output_pattern)` pair as it appears in the JSON
/// rewrite file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RewriteRuleConfig {
    pub input_pattern: String,
    pub output_pattern: String,
}

/// Wrapper matching the rewrite file layout.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RewriteFile {
    pub rewrites: Vec<RewriteRuleConfig>,
}

/// A compiled rule.
struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    fn compile(input_pattern: &str, output_pattern: &str) -> Result<RewriteRule, Error> {
        let pattern = Regex::new(input_pattern).map_err(|err| {
            Error::BadConfig(format!("bad rewrite pattern {input_pattern:?}: {err}"))
        })?;
        Ok(RewriteRule {
            pattern,
            replacement: output_pattern.to_string(),
        })
    }

    fn apply<'a>(&self, sql: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(sql, self.replacement.as_str())
    }
}

// Catalog queries issued by psql's \l, \dn, \dt, \di and \d <table>,
// re-expressed against INFORMATION_SCHEMA. Matched ahead of user rules when
// psql compatibility is enabled.
static PSQL_RULES: Lazy<Vec<RewriteRule>> = Lazy::new(|| {
    [
        // \l
        (
            r#"(?s)^SELECT d\.datname as "Name",.*FROM pg_catalog\.pg_database d.*$"#,
            r#"SELECT catalog_name AS "Name" FROM INFORMATION_SCHEMA.INFORMATION_SCHEMA_CATALOG_NAME"#,
        ),
        // \dn
        (
            r#"(?s)^SELECT n\.nspname AS "Name",.*FROM pg_catalog\.pg_namespace n.*$"#,
            r#"SELECT schema_name AS "Name" FROM INFORMATION_SCHEMA.SCHEMATA WHERE schema_name NOT IN ('information_schema', 'pg_catalog') ORDER BY schema_name"#,
        ),
        // \dt
        (
            r#"(?s)^SELECT n\.nspname as "Schema",\s*c\.relname as "Name",.*WHERE c\.relkind IN \('r',.*$"#,
            r#"SELECT table_schema AS "Schema", table_name AS "Name", 'table' AS "Type" FROM INFORMATION_SCHEMA.TABLES WHERE table_schema NOT IN ('information_schema', 'pg_catalog') ORDER BY table_schema, table_name"#,
        ),
        // \di
        (
            r#"(?s)^SELECT n\.nspname as "Schema",\s*c\.relname as "Name",.*WHERE c\.relkind IN \('i',.*$"#,
            r#"SELECT table_schema AS "Schema", index_name AS "Name", 'index' AS "Type" FROM INFORMATION_SCHEMA.INDEXES WHERE table_schema NOT IN ('information_schema', 'pg_catalog') ORDER BY table_schema, index_name"#,
        ),
        // \d <table>: the relation lookup psql runs first.
        (
            r#"(?s)^SELECT c\.oid,\s*n\.nspname,\s*c\.relname\s*FROM pg_catalog\.pg_class c.*'\^\((?P<table>[^)]*)\)\$'.*$"#,
            r#"SELECT table_name AS relname FROM INFORMATION_SCHEMA.TABLES WHERE table_name = '${table}'"#,
        ),
        // \d <table>: the column listing that follows.
        (
            r#"(?s)^SELECT a\.attname,.*FROM pg_catalog\.pg_attribute a.*$"#,
            r#"SELECT column_name AS attname, data_type, is_nullable, column_default FROM INFORMATION_SCHEMA.COLUMNS ORDER BY ordinal_position"#,
        ),
    ]
    .iter()
    .map(|(input, output)| {
        RewriteRule::compile(input, output).expect("built-in psql rule failed to compile")
    })
    .collect()
});

/// Applies psql-compatibility and user rewrite rules, in that order.
pub struct QueryRewriter {
    psql_mode: bool,
    rules: Vec<RewriteRule>,
}

impl QueryRewriter {
    /// Compile the configured rules. A pattern that does not compile is a
    /// startup failure, not a per-query one.
    pub fn new(psql_mode: bool, configs: &[RewriteRuleConfig]) -> Result<QueryRewriter, Error> {
        let mut rules = Vec::with_capacity(configs.len());
        for config in configs {
            rules.push(RewriteRule::compile(
                &config.input_pattern,
                &config.output_pattern,
            )?);
        }
        Ok(QueryRewriter { psql_mode, rules })
    }

    /// Run the SQL text through every rule in order.
    pub fn rewrite(&self, sql: &str) -> String {
        let mut current = sql.to_string();
        if self.psql_mode {
            for rule in PSQL_RULES.iter() {
                if let Cow::Owned(rewritten) = rule.apply(&current) {
                    current = rewritten;
                }
            }
        }
        for rule in &self.rules {
            if let Cow::Owned(rewritten) = rule.apply(&current) {
                current = rewritten;
            }
        }
        current
    }
}

/// Load and parse a rewrite-rules JSON file.
pub fn load_rewrite_file(path: &Path) -> Result<Vec<RewriteRuleConfig>, Error> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| Error::BadConfig(format!("cannot read rewrite file {path:?}: {err}")))?;
    let file: RewriteFile = serde_json::from_str(&contents)
        .map_err(|err| Error::BadConfig(format!("bad rewrite file {path:?}: {err}")))?;
    Ok(file.rewrites)
}
