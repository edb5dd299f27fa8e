use clap::{Parser, ValueEnum};
use tracing::Level;

/// PgGateman: PostgreSQL wire-protocol gateway for a managed SQL backend.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Project the downstream database belongs to.
    #[arg(short, long, env = "GATEMAN_PROJECT")]
    pub project: String,

    /// Instance the downstream database belongs to.
    #[arg(short, long, env = "GATEMAN_INSTANCE")]
    pub instance: String,

    /// Downstream database name.
    #[arg(short, long, env = "GATEMAN_DATABASE")]
    pub database: String,

    /// Path to the backend credentials file.
    #[arg(short, long, env = "GATEMAN_CREDENTIALS")]
    pub credentials: String,

    /// Address to listen on.
    #[arg(long, default_value_t = String::from("0.0.0.0"), env = "GATEMAN_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short = 's', long, default_value_t = 5432, env = "GATEMAN_PORT")]
    pub port: u16,

    /// Require a cleartext password exchange during startup. The password
    /// itself is not validated; the flag exists for client compatibility.
    #[arg(short = 'a', long, default_value_t = false)]
    pub require_auth: bool,

    /// Translate the catalog queries behind psql's \d family of
    /// meta-commands.
    #[arg(short = 'q', long, default_value_t = false)]
    pub psql_mode: bool,

    /// Text form used for result values when the client asks for text.
    #[clap(short = 'f', long, value_enum, default_value_t = TextResultFormat::Postgresql)]
    pub text_format: TextResultFormat,

    /// Send binary results when a Bind message leaves the result-format
    /// vector empty.
    #[arg(short = 'b', long, default_value_t = false)]
    pub force_binary: bool,

    /// Path to a JSON file with query rewrite rules.
    #[arg(short = 'j', long)]
    pub rewrites: Option<String>,

    #[arg(short, long, default_value_t = tracing::Level::INFO, env)]
    pub log_level: Level,

    #[clap(short = 'F', long, value_enum, default_value_t = LogFormat::Text, env)]
    pub log_format: LogFormat,

    #[arg(
        short,
        long,
        default_value_t = false,
        env,
        help = "disable colors in the log output"
    )]
    pub no_color: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TextResultFormat {
    Postgresql,
    Spanner,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    Text,
    Structured,
    Debug,
}
