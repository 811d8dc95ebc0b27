use anyhow::{bail, Context, Result};
use clap::{App, Arg};
use monkey::{parse_program, Compiler, Engine, Evaluator, Value, VirtualMachine};
use std::time::{Duration, Instant};

const FIBONACCI: &str = r#"
let fibonacci = fn(x) {
  if (x == 0) {
    0
  } else {
    if (x == 1) {
      return 1;
    } else {
      fibonacci(x - 1) + fibonacci(x - 2);
    }
  }
};
"#;

fn main() -> Result<()> {
    env_logger::init();

    let args = App::new("benchmark")
        .version(clap::crate_version!())
        .about("Times a recursive Fibonacci program on either engine")
        .arg(
            Arg::new("engine")
                .long("engine")
                .help("engine to run the program on")
                .value_name("ENGINE")
                .possible_values(Engine::NAMES)
                .default_value("eval"),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .help("which Fibonacci number to compute")
                .value_name("N")
                .default_value("25"),
        )
        .get_matches();

    let engine: Engine = args.value_of("engine").context("Missing engine")?.parse()?;
    let input: u32 = args
        .value_of("input")
        .context("Missing input")?
        .parse()
        .context("Input must be a non-negative integer")?;

    let source = format!("{}fibonacci({});", FIBONACCI, input);
    let program = parse_program(&source).context("Parser error")?;

    let (result, duration) = match engine {
        Engine::Eval => {
            let mut evaluator = Evaluator::new();
            let start = Instant::now();
            let result = evaluator.evaluate(&program);
            (result, start.elapsed())
        }
        Engine::Vm => run_vm(&program)?,
    };

    if let Value::Error(message) = &result {
        bail!("Evaluation error: {}", message);
    }

    println!(
        "engine={}, result={}, duration={:?}",
        engine, result, duration
    );
    Ok(())
}

fn run_vm(program: &monkey::Program) -> Result<(Value, Duration)> {
    let bytecode = Compiler::new().compile(program).context("Compiler error")?;
    let mut vm = VirtualMachine::new(bytecode);

    let start = Instant::now();
    vm.run().context("Runtime error")?;
    let duration = start.elapsed();

    Ok((vm.last_popped().clone(), duration))
}
