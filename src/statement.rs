//! Prepared statements and portals.
//!
//! A prepared statement is the rewritten SQL template plus its `$n`
//! parameter count and declared type oids. A portal binds that template to
//! actual parameter values and result-format codes; `Execute` runs it and
//! may leave it suspended mid-result for a later resume.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::Error;
use crate::executor::{Outcome, RowCursor};

static PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d+)").unwrap());

/// A named (or unnamed) parsed SQL template.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub name: String,
    pub original_sql: String,
    pub sql: String,
    pub param_count: usize,
    pub param_types: Vec<i32>,
    pub command: String,
}

impl PreparedStatement {
    pub fn new(
        name: String,
        original_sql: String,
        rewritten_sql: String,
        param_types: Vec<i32>,
    ) -> PreparedStatement {
        let param_count = parameter_count(&rewritten_sql);
        let command = command_token(&rewritten_sql);
        PreparedStatement {
            name,
            original_sql,
            sql: rewritten_sql,
            param_count,
            param_types,
            command,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    /// Whether executing this statement produces a result set (judged from
    /// the command token, before execution).
    pub fn returns_rows(&self) -> bool {
        matches!(
            self.command.as_str(),
            "SELECT" | "WITH" | "VALUES" | "SHOW" | "EXPLAIN" | "FETCH"
        )
    }

    /// Declared parameter oids padded with zero ("unspecified") up to the
    /// parsed parameter count. The client may declare fewer than it uses.
    pub fn declared_param_oids(&self) -> Vec<i32> {
        let mut oids = self.param_types.clone();
        while oids.len() < self.param_count {
            oids.push(0);
        }
        oids.truncate(self.param_count.max(self.param_types.len()));
        oids
    }

    fn param_oid(&self, index: usize) -> i32 {
        self.param_types.get(index).copied().unwrap_or(0)
    }
}

/// Highest `$n` placeholder index in the SQL (dense numbering assumed).
pub fn parameter_count(sql: &str) -> usize {
    PARAM_RE
        .captures_iter(sql)
        .filter_map(|caps| caps[1].parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

/// First token of the SQL, upper-cased. Forms the CommandComplete tag.
pub fn command_token(sql: &str) -> String {
    sql.trim_start()
        .split(|c: char| c.is_whitespace() || c == ';' || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase()
}

/// CommandComplete tag for a statement. Result-set commands report the rows
/// this gateway actually emitted; update commands report the downstream
/// count.
pub fn command_complete_tag(command: &str, count: u64) -> String {
    match command {
        "SELECT" | "WITH" | "VALUES" | "SHOW" | "EXPLAIN" | "FETCH" | "COPY" => {
            format!("{command} {count}")
        }
        "INSERT" => format!("INSERT 0 {count}"),
        "UPDATE" | "DELETE" | "MERGE" | "MOVE" => format!("{command} {count}"),
        _ => command.to_string(),
    }
}

/// Execution progress of a portal.
pub enum PortalExecution {
    NotStarted,
    /// The downstream reported an update count that has not been turned into
    /// a CommandComplete yet.
    Update(u64),
    /// An open (possibly partially drained) result cursor.
    Cursor(Box<dyn RowCursor>),
    /// The statement was the empty query string.
    Empty,
}

/// A prepared statement bound to parameter values and result formats.
pub struct Portal {
    pub name: String,
    pub statement: Arc<PreparedStatement>,
    pub param_formats: Vec<i16>,
    pub param_values: Vec<Option<BytesMut>>,
    pub result_formats: Vec<i16>,
    pub execution: PortalExecution,
    pub rows_emitted: u64,
}

impl Portal {
    pub fn new(
        name: String,
        statement: Arc<PreparedStatement>,
        param_formats: Vec<i16>,
        param_values: Vec<Option<BytesMut>>,
        result_formats: Vec<i16>,
    ) -> Portal {
        Portal {
            name,
            statement,
            param_formats,
            param_values,
            result_formats,
            execution: PortalExecution::NotStarted,
            rows_emitted: 0,
        }
    }

    pub fn started(&self) -> bool {
        !matches!(self.execution, PortalExecution::NotStarted)
    }

    pub fn accept(&mut self, outcome: Outcome) {
        self.execution = match outcome {
            Outcome::UpdateCount(count) => PortalExecution::Update(count),
            Outcome::Rows(cursor) => PortalExecution::Cursor(cursor),
        };
    }

    /// The SQL text sent downstream: the rewritten template with every `$n`
    /// replaced by a literal derived from the bound value.
    pub fn materialize_sql(&self) -> Result<String, Error> {
        let sql = &self.statement.sql;
        if self.statement.param_count == 0 {
            return Ok(sql.clone());
        }

        let mut out = String::with_capacity(sql.len());
        let mut last = 0;
        for caps in PARAM_RE.captures_iter(sql) {
            let whole = caps.get(0).unwrap();
            let index: usize = caps[1]
                .parse()
                .map_err(|_| Error::Protocol(format!("bad parameter reference {}", &caps[0])))?;
            if index == 0 || index > self.param_values.len() {
                return Err(Error::Protocol(format!(
                    "parameter ${index} has no bound value"
                )));
            }
            out.push_str(&sql[last..whole.start()]);
            out.push_str(&self.literal(index - 1)?);
            last = whole.end();
        }
        out.push_str(&sql[last..]);
        Ok(out)
    }

    /// Render the bound value at `index` as a SQL literal.
    fn literal(&self, index: usize) -> Result<String, Error> {
        let value = match &self.param_values[index] {
            None => return Ok("NULL".to_string()),
            Some(value) => value,
        };
        let format = param_format(&self.param_formats, index, self.param_values.len())?;
        let oid = self.statement.param_oid(index);

        let text = if format == 1 {
            decode_binary_param(value, oid)?
        } else {
            String::from_utf8(value.to_vec())
                .map_err(|_| Error::Protocol("parameter value is not valid UTF-8".into()))?
        };

        Ok(match oid {
            // bool
            16 => {
                if matches!(text.as_str(), "t" | "true" | "TRUE" | "1") {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            // numeric family goes in unquoted
            20 | 21 | 23 | 26 | 700 | 701 | 1700 => {
                text.parse::<f64>().map_err(|_| {
                    Error::Protocol(format!("parameter ${} is not a number", index + 1))
                })?;
                text
            }
            _ => {
                let mut quoted = String::with_capacity(text.len() + 2);
                quoted.push('\'');
                for c in text.chars() {
                    if c == '\'' {
                        quoted.push('\'');
                    }
                    quoted.push(c);
                }
                quoted.push('\'');
                quoted
            }
        })
    }
}

/// Resolve the format code of parameter `index` under the 0/1/N vector rule.
pub fn param_format(formats: &[i16], index: usize, count: usize) -> Result<i16, Error> {
    let code = match formats.len() {
        0 => 0,
        1 => formats[0],
        n if n == count => formats[index],
        n => {
            return Err(Error::Protocol(format!(
                "parameter format vector has {n} entries for {count} parameters"
            )))
        }
    };
    match code {
        0 | 1 => Ok(code),
        other => Err(Error::Protocol(format!("invalid format code {other}"))),
    }
}

/// Decode a binary-format parameter for the types the gateway understands.
fn decode_binary_param(value: &BytesMut, oid: i32) -> Result<String, Error> {
    let mut buf = &value[..];
    let text = match (oid, value.len()) {
        (16, 1) => {
            if buf.get_u8() == 0 {
                "false".to_string()
            } else {
                "true".to_string()
            }
        }
        (21, 2) => buf.get_i16().to_string(),
        (23, 4) => buf.get_i32().to_string(),
        (20, 8) => buf.get_i64().to_string(),
        (700, 4) => buf.get_f32().to_string(),
        (701, 8) => buf.get_f64().to_string(),
        (25 | 1043 | 0, _) => String::from_utf8(value.to_vec())
            .map_err(|_| Error::Protocol("parameter value is not valid UTF-8".into()))?,
        _ => {
            return Err(Error::Unsupported(format!(
                "unsupported data type for binary parameter (oid {oid})"
            )))
        }
    };
    Ok(text)
}
