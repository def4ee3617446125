use std::fmt::Write;

use super::{CodeObject, Constant, Instruction, Slot};

/// Human-readable listing of `code` and every code object nested in it.
pub fn disassemble(code: &CodeObject) -> String {
    let mut out = String::new();
    write_code(&mut out, code);
    out
}

fn write_code(out: &mut String, code: &CodeObject) {
    let _ = writeln!(out, "════════════════════════════════════════");
    let _ = writeln!(
        out,
        " {} (line {}, {} instructions, stack {})",
        code.qualname,
        code.first_line,
        code.instructions.len(),
        code.max_stack
    );
    if !code.varnames.is_empty() {
        let _ = writeln!(out, " locals: {}", code.varnames.join(", "));
    }
    if !code.cellvars.is_empty() {
        let _ = writeln!(out, " cells:  {}", code.cellvars.join(", "));
    }
    if !code.freevars.is_empty() {
        let _ = writeln!(out, " frees:  {}", code.freevars.join(", "));
    }
    let _ = writeln!(out, "════════════════════════════════════════");

    let targets: Vec<u32> = code
        .instructions
        .iter()
        .filter_map(|instruction| instruction.jump_target())
        .chain(code.exception_table.iter().map(|entry| entry.target))
        .collect();

    let mut last_line = None;
    for (offset, instruction) in code.instructions.iter().enumerate() {
        let line = code.line_for(offset);
        let line_column = if last_line == Some(line) {
            "    ".to_string()
        } else {
            format!("{line:>4}")
        };
        last_line = Some(line);
        let marker = if targets.contains(&(offset as u32)) { "►" } else { " " };
        let _ = writeln!(
            out,
            "{line_column} {marker} {offset:04} {}",
            describe(code, *instruction)
        );
    }

    if !code.exception_table.is_empty() {
        let _ = writeln!(out, " exception table:");
        for entry in &code.exception_table {
            let _ = writeln!(
                out,
                "   {:04} to {:04} -> {:04} [depth {}]",
                entry.start, entry.end, entry.target, entry.depth
            );
        }
    }
    let _ = writeln!(out);

    for child in code.children() {
        write_code(out, child);
    }
}

fn describe(code: &CodeObject, instruction: Instruction) -> String {
    let name = |index: u32| code.names.get(index as usize).map_or("?", String::as_str);
    let local = |index: u32| code.varnames.get(index as usize).map_or("?", String::as_str);
    let cell = |index: u32| {
        if (index as usize) < code.cell_count() {
            code.cell_name(index as usize)
        } else {
            "?"
        }
    };
    match instruction {
        Instruction::LoadConst(index) => match code.constants.get(index as usize) {
            Some(constant) => format!("LoadConst {index} ({})", render_constant(constant)),
            None => format!("LoadConst {index}"),
        },
        Instruction::LoadFast(i) | Instruction::StoreFast(i) | Instruction::DeleteFast(i) => {
            format!("{instruction:?} ({})", local(i))
        }
        Instruction::LoadDeref(i)
        | Instruction::StoreDeref(i)
        | Instruction::DeleteDeref(i)
        | Instruction::LoadClassDeref(i)
        | Instruction::LoadClosure(i) => format!("{instruction:?} ({})", cell(i)),
        Instruction::LoadGlobal(i)
        | Instruction::StoreGlobal(i)
        | Instruction::DeleteGlobal(i)
        | Instruction::LoadName(i)
        | Instruction::StoreName(i)
        | Instruction::DeleteName(i)
        | Instruction::LoadAttr(i)
        | Instruction::StoreAttr(i)
        | Instruction::DeleteAttr(i) => format!("{instruction:?} ({})", name(i)),
        Instruction::SaveBinding(slot) | Instruction::RestoreBinding(slot) => {
            let target = match slot {
                Slot::Fast(i) => local(i),
                Slot::Deref(i) => cell(i),
                Slot::Global(i) | Slot::Name(i) => name(i),
            };
            format!("{instruction:?} ({target})")
        }
        other => other.to_string(),
    }
}

fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::None => "None".to_string(),
        Constant::Bool(true) => "True".to_string(),
        Constant::Bool(false) => "False".to_string(),
        Constant::Int(value) => value.to_string(),
        Constant::Float(value) => format!("{value:?}"),
        Constant::Str(value) => format!("{value:?}"),
        Constant::Ellipsis => "Ellipsis".to_string(),
        Constant::Tuple(items) => {
            let items: Vec<String> = items.iter().map(render_constant).collect();
            if items.len() == 1 {
                format!("({},)", items[0])
            } else {
                format!("({})", items.join(", "))
            }
        }
        Constant::Code(code) => format!("<code {}>", code.qualname),
    }
}
