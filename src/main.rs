use std::{env, fs, io, path::Path};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monkey::bytecode::Compiler;
use monkey::bytecode::disasm::{print_bytecode, print_bytecode_stats};
use monkey::frontend::lexer::Lexer;
use monkey::frontend::parser::Parser;
use monkey::frontend::token_dumper::TokenDumper;
use monkey::repl;
use monkey::runtime::{Object, Vm};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "monkey=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--help".to_string()) || args.contains(&"-h".to_string()) {
        print_usage();
        return;
    }

    let tokens_only = args.contains(&"--tokens".to_string());
    let no_color = args.contains(&"--no-color".to_string());
    let pretty = args.contains(&"--pretty".to_string());
    let ast = args.contains(&"--ast".to_string());
    let ast_full = args.contains(&"--ast-full".to_string());
    let bytecode = args.contains(&"--bc".to_string()) || args.contains(&"--bytecode".to_string());
    let stats = args.contains(&"--stats".to_string());

    // first non-flag argument is the filename
    let filename = args.iter().skip(1).find(|a| !a.starts_with('-'));

    match filename {
        Some(filename) => {
            ensure_extension(filename);
            match fs::read_to_string(filename) {
                Ok(source) => {
                    if tokens_only {
                        dump_tokens(&source, no_color, pretty);
                    } else {
                        run_program(&source, ast, ast_full, bytecode, stats);
                    }
                }
                Err(e) => {
                    eprintln!("Failed to read '{}': {}", filename, e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            if args.len() == 1 {
                start_repl();
            } else {
                print_usage();
            }
        }
    }
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("mon") {
        eprintln!("Error: expected a .mon file, got {}", filename);
        std::process::exit(1);
    }
}

fn dump_tokens(source: &str, no_color: bool, pretty: bool) {
    let mut lexer = Lexer::new(source);

    match lexer.tokenize() {
        Ok(tokens) => {
            let mut dumper = TokenDumper::new();

            if no_color {
                dumper = dumper.no_color();
            }
            if pretty {
                dumper = dumper.pretty();
            }

            dumper.dump(&tokens);
        }
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            std::process::exit(1);
        }
    }
}

fn start_repl() {
    println!("Monkey REPL. Type `exit` to quit.");
    let stdin = io::stdin();
    if let Err(e) = repl::start(stdin.lock(), io::stdout()) {
        eprintln!("REPL error: {}", e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("MONKEY - a small language on a bytecode VM");
    println!();
    println!("Usage:");
    println!("  monkey                      Start interactive REPL");
    println!("  monkey <file.mon>           Run a program");
    println!("  monkey --tokens <file>      Show tokens only (--no-color, --pretty)");
    println!("  monkey --ast <file.mon>     Print the parsed AST as source");
    println!("  monkey --ast-full <file>    Print the AST node tree");
    println!("  monkey --bc <file.mon>      Print disassembled bytecode, then run");
    println!("  monkey --stats <file.mon>   Print opcode statistics, then run");
    println!("  monkey --help, -h           Show this help");
}

fn run_program(source: &str, ast: bool, ast_full: bool, bytecode: bool, stats: bool) {
    let mut lexer = Lexer::new(source);
    let tokens = match lexer.tokenize() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            std::process::exit(1);
        }
    };

    let mut parser = Parser::new(tokens);
    let program = match parser.parse() {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        }
    };

    if ast {
        println!("{}", program);
        return;
    }
    if ast_full {
        println!("{:#?}", program);
        return;
    }

    let mut compiler = Compiler::new();
    if let Err(e) = compiler.compile(&program) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
    let program_bytecode = compiler.bytecode();

    if bytecode {
        print_bytecode(&program_bytecode);
    }
    if stats {
        print_bytecode_stats(&program_bytecode);
    }

    let mut vm = Vm::new(program_bytecode);
    if let Err(e) = vm.run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    match vm.last_popped() {
        Object::Null => {}
        Object::Error(message) => {
            eprintln!("ERROR: {}", message);
            std::process::exit(1);
        }
        value => println!("{}", value),
    }
}
