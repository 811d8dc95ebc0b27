use anyhow::{Context, Result};
use clap::{App, Arg};
use monkey::{
    parse_program, Compiler, Engine, Evaluator, ParseErrors, Program, SymbolTable, Value,
    VirtualMachine,
};
use rustyline::{error::ReadlineError, Editor};

const HISTORY_FILE: &str = "history.txt";

const MONKEY_FACE: &str = r#"
            __,__
   .--.  .-"     "-.  .--.
  / .. \/  .-. .-.  \/ .. \
 | |  '|  /   Y   \  |'  | |
 | \   \  \ 0 | 0 /  /   / |
  \ '- ,\.-"""""""-./, -' /
   ''-' /_   ^ ^   _\ '-''
       |  \._   _./  |
       \   \ '~' /   /
        '._ '-=-' _.'
           '-----'
"#;

/// Everything one input line needs from the lines before it.
enum Session {
    Eval(Evaluator),
    Vm {
        symbol_table: SymbolTable,
        constants: Vec<Value>,
        globals: Vec<Value>,
    },
}

impl Session {
    fn new(engine: Engine) -> Self {
        match engine {
            Engine::Eval => Session::Eval(Evaluator::new()),
            Engine::Vm => {
                let (symbol_table, constants) = Compiler::new().into_state();
                Session::Vm {
                    symbol_table,
                    constants,
                    globals: Vec::new(),
                }
            }
        }
    }

    fn run(&mut self, program: &Program) -> Result<Value> {
        match self {
            Session::Eval(evaluator) => Ok(evaluator.evaluate(program)),
            Session::Vm {
                symbol_table,
                constants,
                globals,
            } => {
                let mut compiler = Compiler::new_with_state(
                    std::mem::take(symbol_table),
                    std::mem::take(constants),
                );
                let bytecode = compiler.compile(program);
                let (symbols, pool) = compiler.into_state();
                *symbol_table = symbols;
                *constants = pool;

                let mut vm = VirtualMachine::new_with_globals(bytecode?, std::mem::take(globals));
                let result = vm.run().map(|_| vm.last_popped().clone());
                *globals = vm.into_globals();
                result
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::new("repl")
        .version(clap::crate_version!())
        .about("Interactive Monkey session")
        .arg(
            Arg::new("engine")
                .long("engine")
                .help("engine to evaluate each line with")
                .value_name("ENGINE")
                .possible_values(Engine::NAMES)
                .default_value("vm"),
        )
        .get_matches();

    let engine: Engine = args.value_of("engine").context("Missing engine")?.parse()?;

    println!(
        r"
Welcome to the Monkey programming language REPL!
Running on the '{}' engine.
Enter 'exit' or press 'CTRL+C' to exit the REPL.
    ",
        engine
    );

    let mut rl = Editor::<()>::new();
    if rl.load_history(HISTORY_FILE).is_err() {
        println!("No previous history.");
    }

    let mut session = Session::new(engine);

    loop {
        let readline = rl.readline(">> ");
        match readline {
            Ok(line) => match line.as_ref() {
                "exit" => break,
                line => {
                    rl.add_history_entry(line);

                    let program = match parse_program(line) {
                        Ok(program) => program,
                        Err(error) => {
                            print_parse_error(&error);
                            continue;
                        }
                    };

                    match session.run(&program) {
                        Ok(value) => println!("{}", value),
                        Err(error) => eprintln!("Error: {}", error),
                    }
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history(HISTORY_FILE)?;
    Ok(())
}

fn print_parse_error(error: &anyhow::Error) {
    match error.downcast_ref::<ParseErrors>() {
        Some(errors) => {
            println!("{}", MONKEY_FACE);
            println!("Woops! We ran into some monkey business here!");
            println!(" parser errors:");
            for message in errors.0.iter() {
                println!("\t{}", message);
            }
        }
        None => eprintln!("Error lexing: {}", error),
    }
}
