//! Runtime configuration.
//!
//! Assembled once from the command line at startup, validated, and passed
//! around by `Arc`. Rewrite patterns are compiled here so a bad pattern
//! fails startup instead of a query.

use std::path::PathBuf;
use std::sync::Arc;

use crate::app::args::{Args, TextResultFormat};
use crate::encoder::TextFormat;
use crate::errors::Error;
use crate::executor::BackendOptions;
use crate::rewrite::{self, QueryRewriter, RewriteRuleConfig};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The server_version reported to clients in ParameterStatus.
pub const REPORTED_SERVER_VERSION: &str = "14.1";

pub struct Config {
    pub host: String,
    pub port: u16,
    pub backend: BackendOptions,
    pub text_format: TextFormat,
    pub force_binary: bool,
    pub require_auth: bool,
    pub psql_mode: bool,
    pub rewriter: QueryRewriter,
}

impl Config {
    /// Build and validate the configuration. Any error here is a startup
    /// misconfiguration and exits non-zero.
    pub fn from_args(args: &Args) -> Result<Arc<Config>, Error> {
        let credentials = PathBuf::from(&args.credentials);
        if !credentials.is_file() {
            return Err(Error::BadConfig(format!(
                "credentials file {credentials:?} does not exist"
            )));
        }

        let rules: Vec<RewriteRuleConfig> = match &args.rewrites {
            Some(path) => rewrite::load_rewrite_file(path.as_ref())?,
            None => Vec::new(),
        };
        let rewriter = QueryRewriter::new(args.psql_mode, &rules)?;

        Ok(Arc::new(Config {
            host: args.host.clone(),
            port: args.port,
            backend: BackendOptions {
                project: args.project.clone(),
                instance: args.instance.clone(),
                database: args.database.clone(),
                credentials,
            },
            text_format: match args.text_format {
                TextResultFormat::Postgresql => TextFormat::PostgreSql,
                TextResultFormat::Spanner => TextFormat::Native,
            },
            force_binary: args.force_binary,
            require_auth: args.require_auth,
            psql_mode: args.psql_mode,
            rewriter,
        }))
    }
}
