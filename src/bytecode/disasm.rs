use std::collections::HashMap;
use std::fmt;

use crate::bytecode::op::{Definition, Opcode, read_operands};
use crate::bytecode::{Bytecode, Instructions};
use crate::runtime::object::Object;

// =============================================================================
// Decoding
// =============================================================================

/// One decoded position of an instruction stream.
enum Decoded {
    Instruction {
        offset: usize,
        op: Opcode,
        operands: Vec<usize>,
    },
    Unknown {
        offset: usize,
        byte: u8,
    },
}

impl Decoded {
    fn offset(&self) -> usize {
        match self {
            Decoded::Instruction { offset, .. } | Decoded::Unknown { offset, .. } => *offset,
        }
    }
}

/// Walks an instruction stream. Unknown bytes are reported and skipped one at
/// a time; a truncated trailing instruction yields fewer operands than its
/// definition declares.
struct Decoder<'a> {
    ins: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    fn new(ins: &'a [u8]) -> Self {
        Decoder { ins, offset: 0 }
    }
}

impl Iterator for Decoder<'_> {
    type Item = Decoded;

    fn next(&mut self) -> Option<Decoded> {
        let offset = self.offset;
        let byte = *self.ins.get(offset)?;

        match Opcode::try_from(byte) {
            Ok(op) => {
                let (operands, read) = read_operands(&op.definition(), &self.ins[offset + 1..]);
                self.offset += 1 + read;
                Some(Decoded::Instruction {
                    offset,
                    op,
                    operands,
                })
            }
            Err(_) => {
                self.offset += 1;
                Some(Decoded::Unknown { offset, byte })
            }
        }
    }
}

// =============================================================================
// Text output
// =============================================================================

/// Renders an instruction stream, one `OFFSET Name operands` line per
/// instruction.
pub fn disassemble(ins: &[u8]) -> String {
    let mut output = String::new();

    for decoded in Decoder::new(ins) {
        output.push_str(&format_line(&decoded));
        output.push('\n');
    }

    output
}

fn format_line(decoded: &Decoded) -> String {
    format!("{:04} {}", decoded.offset(), format_body(decoded))
}

fn format_body(decoded: &Decoded) -> String {
    match decoded {
        Decoded::Instruction { op, operands, .. } => {
            format_instruction(&op.definition(), operands)
        }
        Decoded::Unknown { byte, .. } => format!("ERROR: opcode {} undefined", byte),
    }
}

fn format_instruction(definition: &Definition, operands: &[usize]) -> String {
    let expected = definition.operand_widths.len();

    if operands.len() != expected {
        return format!(
            "ERROR: operand len {} does not match defined {}",
            operands.len(),
            expected
        );
    }

    let mut text = definition.name.to_string();
    for operand in operands {
        text.push(' ');
        text.push_str(&operand.to_string());
    }
    text
}

impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&disassemble(self))
    }
}

// =============================================================================
// Program listing
// =============================================================================

/// Print disassembly of main and of every function constant
pub fn print_bytecode(bc: &Bytecode) {
    print!("{}", render_bytecode(bc));
}

pub fn render_bytecode(bc: &Bytecode) -> String {
    let mut output = String::new();

    let summary = format!(
        "{} bytes, {} constants",
        bc.instructions.len(),
        bc.constants.len()
    );
    render_code_object(&mut output, "main", &summary, &bc.instructions);

    for (index, constant) in bc.constants.iter().enumerate() {
        if let Object::CompiledFunction(func) = constant {
            let name = format!(
                "fn {} (constant {})",
                func.name.as_deref().unwrap_or("<anonymous>"),
                index
            );
            let summary = format!(
                "{} bytes, {} params, {} locals",
                func.instructions.len(),
                func.num_parameters,
                func.num_locals
            );
            render_code_object(&mut output, &name, &summary, &func.instructions);
        }
    }

    let values: Vec<(usize, &Object)> = bc
        .constants
        .iter()
        .enumerate()
        .filter(|(_, c)| !matches!(c, Object::CompiledFunction(_)))
        .collect();
    if !values.is_empty() {
        output.push_str("constants:\n");
        for (index, constant) in values {
            output.push_str(&format!("  [{}] {}\n", index, format_constant(constant)));
        }
    }

    output
}

fn render_code_object(output: &mut String, name: &str, summary: &str, ins: &[u8]) {
    let jump_targets = collect_jump_targets(ins);

    output.push_str("════════════════════════════════════════\n");
    output.push_str(&format!(" {}\n", name));
    output.push_str(&format!(" {}\n", summary));
    output.push_str("════════════════════════════════════════\n");

    for decoded in Decoder::new(ins) {
        let offset = decoded.offset();
        let marker = if jump_targets.contains(&offset) { "►" } else { " " };
        output.push_str(&format!("{:04} {}{}\n", offset, marker, format_body(&decoded)));
    }
    output.push('\n');
}

fn collect_jump_targets(ins: &[u8]) -> Vec<usize> {
    let mut targets = Vec::new();

    for decoded in Decoder::new(ins) {
        if let Decoded::Instruction {
            op: Opcode::Jump | Opcode::JumpNotTruthy,
            operands,
            ..
        } = decoded
        {
            if let Some(&target) = operands.first() {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
    }

    targets
}

fn format_constant(constant: &Object) -> String {
    match constant {
        Object::String(s) => format!("{:?}", &**s),
        other => other.to_string(),
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Print opcode frequency across main and all function constants
pub fn print_bytecode_stats(bc: &Bytecode) {
    print!("{}", render_bytecode_stats(bc));
}

pub fn render_bytecode_stats(bc: &Bytecode) -> String {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    let mut functions = 0;
    let mut total_bytes = bc.instructions.len();

    count_opcodes(&bc.instructions, &mut counts);
    for constant in &bc.constants {
        if let Object::CompiledFunction(func) = constant {
            functions += 1;
            total_bytes += func.instructions.len();
            count_opcodes(&func.instructions, &mut counts);
        }
    }

    let total: usize = counts.values().sum();
    let mut output = String::from("=== BYTECODE STATISTICS ===\n\n");
    output.push_str(&format!("Functions:    {}\n", functions));
    output.push_str(&format!("Constants:    {}\n", bc.constants.len()));
    output.push_str(&format!("Bytes:        {}\n", total_bytes));
    output.push_str(&format!("Instructions: {}\n\n", total));
    output.push_str("Op frequency:\n");

    let mut sorted: Vec<(&str, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    for (name, count) in sorted.iter().take(10) {
        let pct = (*count as f64 / total as f64) * 100.0;
        output.push_str(&format!("  {:<18} {:>4} ({:>5.1}%)\n", name, count, pct));
    }

    output
}

fn count_opcodes(ins: &[u8], counts: &mut HashMap<&'static str, usize>) {
    for decoded in Decoder::new(ins) {
        if let Decoded::Instruction { op, .. } = decoded {
            *counts.entry(op.name()).or_insert(0) += 1;
        }
    }
}
