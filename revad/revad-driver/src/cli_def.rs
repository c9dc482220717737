use std::fs;

use anyhow::bail;
use camino::Utf8Path;
use clap::{Arg, ArgAction, Command};

pub fn main_command() -> Command {
    Command::new("revad")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Generates reverse mode derivatives of the marked functions in a module.")
        .args([catalog(), fail_on_error(), list_nodes(), output(), input()])
        .arg_required_else_help(true)
}

pub const INPUT: &str = "input";
pub const OUTPUT: &str = "output";
pub const CATALOG: &str = "catalog";
pub const FAIL_ON_ERROR: &str = "fail-on-error";
pub const LIST_NODES: &str = "list-nodes";

fn input() -> Arg {
    input_file_path_arg(INPUT).help("The module to differentiate.").required_unless_present(LIST_NODES)
}

fn output() -> Arg {
    Arg::new(OUTPUT)
        .long(OUTPUT)
        .short('o')
        .value_name("FILE")
        .value_parser(|raw: &str| anyhow::Ok(Utf8Path::new(raw).to_owned()))
        .help("Write the module and its derivatives to FILE instead of stdout.")
        .required(false)
}

fn catalog() -> Arg {
    input_file_path_arg(CATALOG)
        .long(CATALOG)
        .help("Additional derivative rules.")
        .long_help(
            "Additional derivative rules. Every function %<node>.d<i> in the file is the backprop rule of input i of the operation <node>.",
        )
        .required(false)
        .action(ArgAction::Append)
}

fn fail_on_error() -> Arg {
    flag(FAIL_ON_ERROR, FAIL_ON_ERROR)
        .help("Fail if a marked function can not be differentiated instead of falling back to the dynamic graph.")
}

fn list_nodes() -> Arg {
    flag(LIST_NODES, LIST_NODES).help("Print all known dependency nodes and exit.")
}

fn flag(name: &'static str, long: &'static str) -> Arg {
    Arg::new(name).long(long).action(ArgAction::SetTrue)
}

fn input_file_path_arg(name: &'static str) -> Arg {
    let parse = |raw: &str| {
        let path = Utf8Path::new(raw).to_owned();

        match fs::metadata(&path) {
            Err(err) => bail!("{err}"),
            Ok(info) if !info.is_file() => bail!("is not a file"),
            _ => Ok(path),
        }
    };

    Arg::new(name).value_name("FILE").value_parser(parse)
}
