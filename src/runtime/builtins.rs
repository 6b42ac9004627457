//! Native functions available to every program.
//!
//! The registry is a read-only static table. The symbol table seeds one
//! `Builtin` symbol per entry and the VM resolves `OpGetBuiltin i` to
//! `BUILTINS[i]`, so the index is the only contract between the two.

use std::io::Write;

use super::object::{Builtin, NULL, Object};

pub static BUILTINS: [Builtin; 6] = [
    Builtin {
        name: "len",
        func: len,
    },
    Builtin {
        name: "puts",
        func: puts,
    },
    Builtin {
        name: "first",
        func: first,
    },
    Builtin {
        name: "last",
        func: last,
    },
    Builtin {
        name: "rest",
        func: rest,
    },
    Builtin {
        name: "push",
        func: push,
    },
];

/// Finds a built-in by name.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn wrong_arity(got: usize, want: usize) -> Object {
    Object::error(format!(
        "wrong number of arguments. Got {}, want {}",
        got, want
    ))
}

fn len(args: &[Object], _out: &mut dyn Write) -> Object {
    if args.len() != 1 {
        return wrong_arity(args.len(), 1);
    }

    match &args[0] {
        Object::String(s) => Object::Integer(s.chars().count() as i64),
        Object::Array(elements) => Object::Integer(elements.len() as i64),
        other => Object::error(format!(
            "argument to `len` not supported, got {}",
            other.object_type()
        )),
    }
}

fn puts(args: &[Object], out: &mut dyn Write) -> Object {
    for arg in args {
        if let Err(e) = writeln!(out, "{}", arg) {
            return Object::error(format!("puts: {}", e));
        }
    }
    NULL
}

fn first(args: &[Object], _out: &mut dyn Write) -> Object {
    if args.len() != 1 {
        return wrong_arity(args.len(), 1);
    }

    match &args[0] {
        Object::Array(elements) => elements.first().cloned().unwrap_or(NULL),
        Object::String(s) => s
            .chars()
            .next()
            .map(|c| Object::string(c.to_string()))
            .unwrap_or(NULL),
        other => Object::error(format!(
            "argument to `first` must be ARRAY or STRING, got {}",
            other.object_type()
        )),
    }
}

fn last(args: &[Object], _out: &mut dyn Write) -> Object {
    if args.len() != 1 {
        return wrong_arity(args.len(), 1);
    }

    match &args[0] {
        Object::Array(elements) => elements.last().cloned().unwrap_or(NULL),
        Object::String(s) => s
            .chars()
            .last()
            .map(|c| Object::string(c.to_string()))
            .unwrap_or(NULL),
        other => Object::error(format!(
            "argument to `last` must be ARRAY or STRING, got {}",
            other.object_type()
        )),
    }
}

fn rest(args: &[Object], _out: &mut dyn Write) -> Object {
    if args.len() != 1 {
        return wrong_arity(args.len(), 1);
    }

    match &args[0] {
        Object::Array(elements) if elements.is_empty() => NULL,
        Object::Array(elements) => Object::array(elements[1..].to_vec()),
        Object::String(s) => {
            let mut chars = s.chars();
            match chars.next() {
                Some(_) => Object::string(chars.as_str()),
                None => NULL,
            }
        }
        other => Object::error(format!(
            "argument to `rest` must be ARRAY or STRING, got {}",
            other.object_type()
        )),
    }
}

fn push(args: &[Object], _out: &mut dyn Write) -> Object {
    if args.len() != 2 {
        return wrong_arity(args.len(), 2);
    }

    match &args[0] {
        Object::Array(elements) => {
            let mut extended = Vec::with_capacity(elements.len() + 1);
            extended.extend(elements.iter().cloned());
            extended.push(args[1].clone());
            Object::array(extended)
        }
        other => Object::error(format!(
            "argument to `push` must be ARRAY, got {}",
            other.object_type()
        )),
    }
}
