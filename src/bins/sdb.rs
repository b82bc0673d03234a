use std::path::PathBuf;

use clap::Parser;
use tracing::debug;

use srcdbg::debugger::Debugger;
use srcdbg::errors::DebuggerError;
use srcdbg::ui::cli::CliUi;

/// Launch a program under the source-level debugger
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The program to debug
    executable: PathBuf,
    /// Arguments passed through to the debuggee
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() -> Result<(), DebuggerError> {
    setup_logger();
    let args = Args::parse();
    debug!("debugging {:?}", args.executable);

    let ui = CliUi::build()?;
    let mut debugger = Debugger::launch(&args.executable, &args.args, ui)?;
    let result = debugger.run();
    debugger.cleanup()?;

    result
}

fn setup_logger() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}
