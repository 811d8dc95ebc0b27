use std::fs;

use anyhow::{bail, Context, Result};
use clap::{App, Arg};
use monkey::{parse_program, Compiler, Engine, Evaluator, Value, VirtualMachine};

fn main() -> Result<()> {
    env_logger::init();

    let args = App::new("monkey")
        .version(clap::crate_version!())
        .about("The Monkey programming language")
        .arg(
            Arg::new("file")
                .index(1)
                .required(true)
                .help("path to input script file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("engine")
                .long("engine")
                .help("engine to run the script on")
                .value_name("ENGINE")
                .possible_values(Engine::NAMES)
                .default_value("vm"),
        )
        .get_matches();

    let file = args.value_of("file").context("Missing input file")?;
    let engine: Engine = args.value_of("engine").context("Missing engine")?.parse()?;

    let source =
        fs::read_to_string(file).with_context(|| format!("Failed to read file: {}", file))?;

    let program = parse_program(&source).context("Parser error")?;

    let result = match engine {
        Engine::Vm => {
            let bytecode = Compiler::new().compile(&program).context("Compiler error")?;
            let mut vm = VirtualMachine::new(bytecode);
            vm.run().context("Runtime error")?;
            vm.last_popped().clone()
        }
        Engine::Eval => Evaluator::new().evaluate(&program),
    };

    match result {
        Value::Error(message) => bail!("Evaluation error: {}", message),
        Value::Null => {}
        value => println!("{}", value),
    }

    Ok(())
}
