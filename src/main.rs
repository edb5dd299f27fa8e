use std::process;

use log::error;
use tokio::runtime::Builder;

use pg_gateman::app::{self, run_server};
use pg_gateman::config::Config;
use pg_gateman::executor::postgres;

fn main() {
    let args = app::parse();
    app::init_logging(&args);

    let config = match Config::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("Configuration error: {err}");
            process::exit(exitcode::CONFIG);
        }
    };

    let runtime = match Builder::new_multi_thread()
        .enable_all()
        .thread_name("worker-pg-gateman")
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Runtime error: {err}");
            process::exit(exitcode::OSERR);
        }
    };

    let backend = config.backend.clone();
    let result = runtime.block_on(run_server(config, move || {
        let backend = backend.clone();
        async move { postgres::connect(&backend).await }
    }));

    match result {
        Ok(()) => process::exit(exitcode::OK),
        Err(err) => {
            error!("Server error: {err}");
            process::exit(exitcode::CONFIG);
        }
    }
}
