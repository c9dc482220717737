use std::fs;
use std::io::{self, Write};
use std::process::exit;
use std::time::Instant;

use anyhow::{Context, Result};
use autodiff::Registry;
use camino::Utf8PathBuf;
use clap::ArgMatches;
use revad::{optimize_module, Opts, Strategy};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::cli_def::{main_command, CATALOG, FAIL_ON_ERROR, INPUT, LIST_NODES, OUTPUT};

mod cli_def;

pub fn main() {
    let matches = main_command().get_matches();
    let input: Utf8PathBuf = matches.get_one(INPUT).cloned().unwrap_or_else(Utf8PathBuf::new);

    let env = env_logger::Env::default().filter("REVAD_LOG").write_style("REVAD_LOG_STYLE");
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Warn)
        .parse_env(env)
        .init();
    match wrapped_main(matches) {
        Ok(err_code) => exit(err_code),
        Err(err) => {
            let mut stderr = StandardStream::stderr(ColorChoice::Auto);
            for cause in err.chain() {
                let _ = print_error(&mut stderr, &cause.to_string());
            }
            let _ = print_error(&mut stderr, &format!("failed to differentiate {input}"));
            exit(DATA_ERROR)
        }
    }
}

pub const DATA_ERROR: i32 = 65;

fn print_error(stderr: &mut StandardStream, msg: &str) -> io::Result<()> {
    stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
    write!(stderr, "error")?;
    stderr.set_color(ColorSpec::new().set_bold(true))?;
    write!(stderr, ":")?;
    stderr.set_color(&ColorSpec::new())?;
    writeln!(stderr, " {msg}")
}

fn wrapped_main(matches: ArgMatches) -> Result<i32> {
    let start = Instant::now();
    let mut registry = Registry::new().context("invalid builtin derivative rules")?;
    if let Some(catalogs) = matches.get_many::<Utf8PathBuf>(CATALOG) {
        for path in catalogs {
            let src = fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
            registry.add_catalog(&src).with_context(|| format!("failed to load {path}"))?;
        }
    }

    if matches.get_flag(LIST_NODES) {
        for node in registry.iter() {
            println!("{:<24} {} ({} inputs)", node.name, node.qualified, node.arity);
        }
        return Ok(0);
    }

    let input: &Utf8PathBuf = matches.get_one(INPUT).context("no input file")?;
    let src = fs::read_to_string(input).with_context(|| format!("failed to read {input}"))?;
    let functions = ir_reader::parse_functions(&src).with_context(|| format!("failed to parse {input}"))?;

    let opts = Opts { fail_on_error: matches.get_flag(FAIL_ON_ERROR), ..Opts::default() };
    let module = optimize_module(functions, &registry, &opts)?;

    let text = module.to_string();
    match matches.get_one::<Utf8PathBuf>(OUTPUT) {
        Some(output) => fs::write(output, text).with_context(|| format!("failed to write {output}"))?,
        None => print!("{text}"),
    }

    let fallbacks = module
        .derivatives()
        .iter()
        .filter(|it| matches!(it.strategy, Strategy::Fallback { .. }))
        .count();
    let seconds = Instant::elapsed(&start).as_secs_f64();
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    stderr.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true))?;
    write!(&mut stderr, "Finished")?;
    stderr.set_color(&ColorSpec::new())?;
    writeln!(
        &mut stderr,
        " differentiating {} functions of {} in {:.2}s ({} with the dynamic graph)",
        module.derivatives().len(),
        input,
        seconds,
        fallbacks
    )?;
    Ok(0)
}
