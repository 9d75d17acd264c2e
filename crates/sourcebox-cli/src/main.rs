//! Sourcebox command-line tool.
//!
//! Evaluates module source text from memory the way a file on disk would
//! load: `eval` runs text through the reference micro host, `guess`
//! prints the format resolution for a filename, and the hidden `worker`
//! subcommand serves the module-graph worker protocol on stdio when the
//! main process lacks the capability.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use sourcebox_core::{ConsoleOutput, EvalOptions, Evaluator, Format};
use sourcebox_host::micro::MicroHost;

mod output;

use output::{resolve_color_choice, Reporter};

#[derive(Parser)]
#[command(name = "sourcebox")]
#[command(about = "Evaluate module source text from memory", long_about = None)]
#[command(version)]
struct Cli {
    /// Color output: auto, always, never
    #[arg(long, global = true, default_value = "auto")]
    color: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate source text as an in-memory module
    Eval {
        /// Source text; read from stdin when omitted
        code: Option<String>,
        /// Read source from a file instead of the command line
        #[arg(short, long, conflicts_with = "code")]
        file: Option<PathBuf>,
        /// Synthetic filename anchoring format guessing and resolution
        #[arg(short = 'n', long, default_value = "eval.js")]
        filename: String,
        /// Module format (commonjs, cjs, bare, umd, es, esm, mjs, module,
        /// es6, guess)
        #[arg(long, default_value = "guess")]
        format: String,
        /// Follow-up snippet run against the module, with IMPORTED, arg,
        /// and console bound
        #[arg(long)]
        exec: Option<String>,
        /// JSON value bound as `arg` in the follow-up snippet
        #[arg(long)]
        arg: Option<String>,
        /// Evaluate without the host's ambient globals
        #[arg(long)]
        no_globals: bool,
        /// KEY=VALUE environment overrides visible to the code
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Capture console output and print it after the result
        #[arg(long)]
        capture: bool,
    },
    /// Print the module format guessed for a filename
    Guess {
        filename: String,
    },
    /// Serve one module-graph evaluation on stdio (spawned internally)
    #[command(hide = true)]
    Worker,
}

fn main() {
    let cli = Cli::parse();
    let mut reporter = Reporter::new(resolve_color_choice(&cli.color));
    if let Err(err) = run(cli.command, &mut reporter) {
        match err.downcast::<sourcebox_core::Error>() {
            Ok(eval_err) => reporter.error(&eval_err),
            Err(other) => eprintln!("error: {other:#}"),
        }
        std::process::exit(1);
    }
}

fn run(command: Commands, reporter: &mut Reporter) -> anyhow::Result<()> {
    match command {
        Commands::Eval {
            code,
            file,
            filename,
            format,
            exec,
            arg,
            no_globals,
            env,
            capture,
        } => {
            let code = read_code(code, file)?;
            let format: Format = format.parse::<Format>()?;
            let console_output = capture.then(ConsoleOutput::new);
            let options = EvalOptions {
                format,
                include_globals: !no_globals,
                env: parse_env(&env)?,
                exec,
                arg: match arg {
                    Some(text) => serde_json::from_str(&text)
                        .with_context(|| format!("--arg is not valid JSON: {text}"))?,
                    None => serde_json::Value::Null,
                },
                console_output: console_output.clone(),
                ..EvalOptions::for_file(filename)
            };

            let evaluator = Evaluator::new(eval_host()?);
            let result = evaluator.evaluate(&code, options);
            if let Some(output) = &console_output {
                reporter.captured(output);
            }
            reporter.result(&result?);
            Ok(())
        }
        Commands::Guess { filename } => {
            let evaluator = Evaluator::new(MicroHost::from_env());
            let kind = evaluator.guess_format(&filename)?;
            println!("{kind}");
            Ok(())
        }
        Commands::Worker => {
            let host = MicroHost::new().with_graph_modules(true);
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            sourcebox_core::worker::serve(&host, stdin.lock(), stdout.lock())?;
            Ok(())
        }
    }
}

/// The eval host: capability from the environment, worker wired to this
/// binary's hidden `worker` subcommand.
fn eval_host() -> anyhow::Result<MicroHost> {
    let exe = std::env::current_exe().context("cannot locate the sourcebox binary")?;
    Ok(MicroHost::from_env().with_worker(vec![
        exe.display().to_string(),
        "worker".to_string(),
    ]))
}

fn read_code(code: Option<String>, file: Option<PathBuf>) -> anyhow::Result<String> {
    match (code, file) {
        (Some(code), None) => Ok(code),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display())),
        (None, None) => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("cannot read source from stdin")?;
            Ok(buffer)
        }
        (Some(_), Some(_)) => bail!("pass code either inline or with --file, not both"),
    }
}

fn parse_env(pairs: &[String]) -> anyhow::Result<Option<BTreeMap<String, String>>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut env = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("--env expects KEY=VALUE, got \"{pair}\"");
        };
        env.insert(key.to_string(), value.to_string());
    }
    Ok(Some(env))
}
