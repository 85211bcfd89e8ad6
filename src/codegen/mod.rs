//! # Code generator
//!
//! Walks the decorated AST and emits assembly text for a 32-bit
//! machine with eight general-purpose registers. By convention `r5`
//! is the stack pointer and `r6` the return address; `r0`–`r4` and
//! `r7` are expression registers.
//!
//! The target has no multiply, divide, modulo, or register-indexed
//! shift; all four are open-coded as loops (a constant shift amount
//! gets a one-instruction `shl`/`shr` peephole instead). Synthesized
//! sequences that need extra registers save and restore them on the
//! stack, and every such push is mirrored in `entire_frame_offset`
//! so stack-relative variable references stay correct while
//! temporaries are live.
//!
//! `codegen_expr(node, dest)` leaves the value in `dest` and obeys
//! one register discipline throughout: registers strictly below
//! `dest` are preserved, registers at or above it (`r5`, `r6`
//! excepted) are fair game, and `dest` is never `r7`.


use std::io::{self, Write};

use log::debug;

use crate::error::{CompileError, ErrorKind};
use crate::lexer::source::SourceBuffer;
use crate::lexer::token::TokenKind;
use crate::parser::ast::{Ast, NodeId, NodeKind};

/// Section addresses and stack size. The defaults match the
/// assembler contract: code at 0x1000, data at 0x2000, stack at
/// 0x3000 with 128 reserved words.
#[derive(Debug, Clone)]
pub struct CodegenOptions {
    pub data_top: u32,
    pub stack_top: u32,
    pub stack_words: usize,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            data_top: 0x2000,
            stack_top: 0x3000,
            stack_words: 128,
        }
    }
}

/// Fixed entry boilerplate: point `r5` at the stack, remember a
/// return address in `r6`, run `main`, halt when it comes back.
const START_ASM: &str = "\
.pos 0x1000
_start:
ld $_stackBottom, r5
deca r5
gpc $6, r6
j main
halt
";

/// Callee-save block for the six expression registers, `r0` on top.
const SAVE_GP_REGS: &str = "\
deca r5\t\t# save all regs
st r0, (r5)
ld $-20, r0
add r0, r5
st r1, 16(r5)
st r2, 12(r5)
st r3, 8(r5)
st r4, 4(r5)
st r7, (r5)

";

/// Exact mirror of [`SAVE_GP_REGS`].
const RESTORE_GP_REGS: &str = "\
ld (r5), r7\t\t# restore all regs
ld 4(r5), r4
ld 8(r5), r3
ld 12(r5), r2
ld 16(r5), r1
ld $20, r0
add r0, r5
ld (r5), r0
inca r5

";

/// Bytes occupied by [`SAVE_GP_REGS`] on the stack.
const SAVED_REGS_BYTES: i32 = 24;

/// Emit the whole program: prologue, function bodies in source
/// order, data section (only if any global exists), stack region.
/// Unsupported tree shapes produce `CODEGEN:` diagnostics and the
/// walk continues; the output may then be invalid.
pub fn generate<R, W: Write>(
    ast: &Ast,
    source: &SourceBuffer<R>,
    options: &CodegenOptions,
    out: &mut W,
    diagnostics: &mut Vec<CompileError>,
) -> io::Result<()> {
    let mut generator = Generator {
        ast,
        source,
        options,
        out,
        diagnostics,
        unique: 0,
        frame_arg_offset: SAVED_REGS_BYTES,
        entire_frame_offset: 0,
        emitting: false,
    };
    generator.program()
}

struct Generator<'a, R, W> {
    ast: &'a Ast,
    source: &'a SourceBuffer<R>,
    options: &'a CodegenOptions,
    out: &'a mut W,
    diagnostics: &'a mut Vec<CompileError>,
    /// Label counter; every control-flow construct takes one number.
    unique: usize,
    /// Bytes between the post-prologue stack pointer and the
    /// parameter area: saved registers, optional saved `r6`, locals.
    frame_arg_offset: i32,
    /// Dynamic adjustment for temporaries pushed during expression
    /// codegen; added to every stack-relative variable offset.
    entire_frame_offset: i32,
    /// Cleared when a `return` is seen; the rest of the command
    /// chain is then skipped through to the epilogue.
    emitting: bool,
}

impl<R, W: Write> Generator<'_, R, W> {
    fn program(&mut self) -> io::Result<()> {
        self.out.write_all(START_ASM.as_bytes())?;

        let globals: Vec<NodeId> = self.ast.children(self.ast.root()).to_vec();
        let mut functions = 0usize;
        for &global in &globals {
            let Some(decl) = self.ast.child(global, 0) else {
                continue;
            };
            if matches!(self.ast.node(decl).kind, NodeKind::FnDecl { .. }) {
                self.fn_decl(decl)?;
                functions += 1;
            }
        }

        let var_names: Vec<String> = globals
            .iter()
            .filter_map(|&global| {
                let decl = self.ast.child(global, 0)?;
                match self.ast.node(decl).kind {
                    NodeKind::VarDecl { .. } => {
                        let name = self.ast.child(decl, 0)?;
                        Some(self.source.text(self.ast.node(name).span))
                    }
                    _ => None,
                }
            })
            .collect();
        debug!(
            "codegen: {} functions, {} globals",
            functions,
            var_names.len()
        );

        if !var_names.is_empty() {
            writeln!(self.out, ".pos 0x{:X}", self.options.data_top)?;
            for name in &var_names {
                writeln!(self.out, "{name}: .long 0")?;
            }
        }

        writeln!(self.out, ".pos 0x{:X}", self.options.stack_top)?;
        writeln!(self.out, "_stackTop:")?;
        for _ in 0..self.options.stack_words {
            writeln!(self.out, ".long 0")?;
        }
        writeln!(self.out, "_stackBottom:")?;
        writeln!(self.out, ".long 0")?;
        Ok(())
    }

    fn fn_decl(&mut self, decl: NodeId) -> io::Result<()> {
        let (frame_vars, clobbers_return) = match self.ast.node(decl).kind {
            NodeKind::FnDecl {
                frame_vars,
                clobbers_return,
                ..
            } => (frame_vars as i32, clobbers_return),
            _ => return Ok(()),
        };
        let name = self.source.text(self.ast.node(decl).span);

        writeln!(self.out, "{name}:")?;
        self.out.write_all(SAVE_GP_REGS.as_bytes())?;
        if clobbers_return {
            write!(self.out, "deca r5\t\t# save r6\nst r6, (r5)\n\n")?;
        }
        if frame_vars > 0 {
            write!(
                self.out,
                "ld $-{}, r0\t\t# allocate local vars\nadd r0, r5\n\n",
                4 * frame_vars
            )?;
        }

        self.frame_arg_offset =
            SAVED_REGS_BYTES + if clobbers_return { 4 } else { 0 } + 4 * frame_vars;
        self.entire_frame_offset = 0;
        self.emitting = true;

        if let Some(body) = self.ast.child(decl, 2) {
            self.single_command(body)?;
        }

        if frame_vars > 0 {
            write!(
                self.out,
                "\nld ${}, r0\t\t# de-alloc local vars\nadd r0, r5\n\n",
                4 * frame_vars
            )?;
        }
        if clobbers_return {
            write!(self.out, "ld (r5), r6\ninca r5\n\n")?;
        }
        self.out.write_all(RESTORE_GP_REGS.as_bytes())?;
        write!(self.out, "j (r6)\n\n")?;
        Ok(())
    }

    /// One statement; assumes every expression register is free.
    fn single_command(&mut self, command: NodeId) -> io::Result<()> {
        let Some(child) = self.ast.child(command, 0) else {
            return Ok(());
        };
        match self.ast.node(child).kind {
            NodeKind::ConstDecl { .. } => Ok(()),
            NodeKind::VarDecl { frame_index, .. } => {
                let Some(init) = self.ast.child(child, 1) else {
                    return Ok(());
                };
                self.codegen_expr(init, 0)?;
                let offset = 4 * frame_index as i32 + self.entire_frame_offset;
                writeln!(self.out, "st r0, {offset}(r5)")
            }
            NodeKind::DirectAssign => self.direct_assign(child),
            NodeKind::IndirectAssign => {
                let (Some(address), Some(value)) =
                    (self.ast.child(child, 0), self.ast.child(child, 1))
                else {
                    return Ok(());
                };
                self.codegen_expr(address, 0)?;
                self.codegen_expr(value, 1)?;
                writeln!(self.out, "st r1, (r0)")
            }
            NodeKind::IfExpr => self.if_expr(child),
            NodeKind::WhileLoop => self.while_loop(child),
            NodeKind::FuncCall => self.func_call(child, 0),
            NodeKind::Command => {
                for grandchild in self.ast.children(child).to_vec() {
                    self.single_command(grandchild)?;
                    if !self.emitting {
                        break;
                    }
                }
                Ok(())
            }
            NodeKind::ReturnDirective => {
                if let Some(value) = self.ast.child(child, 0) {
                    self.codegen_expr(value, 0)?;
                    // The restore block reloads r0 last; writing the
                    // value into the saved-r0 slot makes it the r0
                    // the caller sees.
                    let offset = self.frame_arg_offset - 4 + self.entire_frame_offset;
                    writeln!(self.out, "st r0, {offset}(r5)\t\t# return value")?;
                }
                self.emitting = false;
                Ok(())
            }
            ref other => {
                self.diagnostics.push(CompileError::new(
                    ErrorKind::UnsupportedNode,
                    format!("CODEGEN: cannot emit `{}`", other.label()),
                    self.ast.node(child).span,
                ));
                Ok(())
            }
        }
    }

    fn direct_assign(&mut self, assign: NodeId) -> io::Result<()> {
        let (Some(target), Some(value)) = (self.ast.child(assign, 0), self.ast.child(assign, 1))
        else {
            return Ok(());
        };
        let Some(def) = self.definition_of(target) else {
            return Ok(());
        };
        match self.ast.node(def).kind {
            NodeKind::VarDecl {
                is_static: true, ..
            } => {
                self.codegen_expr(value, 0)?;
                let name = self.definition_name(def);
                writeln!(self.out, "ld ${name}, r1\nst r0, (r1)")
            }
            NodeKind::VarDecl { frame_index, .. } => {
                self.codegen_expr(value, 0)?;
                let offset = 4 * frame_index as i32 + self.entire_frame_offset;
                writeln!(self.out, "st r0, {offset}(r5)")
            }
            NodeKind::IdentRef {
                param_index: Some(index),
                ..
            } => {
                self.codegen_expr(value, 0)?;
                let offset =
                    4 * index as i32 + self.frame_arg_offset + self.entire_frame_offset;
                writeln!(self.out, "st r0, {offset}(r5)")
            }
            _ => {
                let name = self.source.text(self.ast.node(target).span);
                self.diagnostics.push(CompileError::new(
                    ErrorKind::UnsupportedNode,
                    format!("CODEGEN: cannot assign to `{name}`"),
                    self.ast.node(target).span,
                ));
                Ok(())
            }
        }
    }

    /// Call sequence: optional save of `r0`, argument slots, one
    /// argument at a time through `r0`, `gpc`/`j`, result move,
    /// unwind. Every stack adjustment is mirrored in
    /// `entire_frame_offset` so argument expressions can still reach
    /// the enclosing frame.
    fn func_call(&mut self, call: NodeId, dest: u8) -> io::Result<()> {
        let Some(callee) = self.ast.child(call, 0) else {
            return Ok(());
        };
        let name = self.source.text(self.ast.node(callee).span);
        let Some(def) = self.definition_of(callee) else {
            return Ok(());
        };
        let param_count = match self.ast.node(def).kind {
            NodeKind::FnDecl { param_count, .. } => param_count as i32,
            _ => {
                self.diagnostics.push(CompileError::new(
                    ErrorKind::UnsupportedNode,
                    format!("CODEGEN: `{name}` is not a function"),
                    self.ast.node(callee).span,
                ));
                return Ok(());
            }
        };
        let args: Vec<NodeId> = match self.ast.child(call, 1) {
            Some(list) => self.ast.children(list).to_vec(),
            None => Vec::new(),
        };

        if dest != 0 {
            writeln!(self.out, "deca r5\nst r0, (r5)")?;
            self.entire_frame_offset += 4;
        }
        let arg_bytes = 4 * param_count;
        if arg_bytes > 0 {
            writeln!(self.out, "ld $-{arg_bytes}, r0\nadd r0, r5")?;
            self.entire_frame_offset += arg_bytes;
        }
        for (index, &arg) in args.iter().take(param_count as usize).enumerate() {
            self.codegen_expr(arg, 0)?;
            writeln!(self.out, "st r0, {}(r5)", 4 * index)?;
        }
        writeln!(self.out, "gpc $6, r6\nj {name}")?;
        if dest != 0 {
            writeln!(self.out, "mov r0, r{dest}")?;
        }
        if arg_bytes > 0 {
            // r0 is about to be restored when dest != 0; otherwise it
            // holds the result, so unwind through r7 instead.
            let scratch = if dest == 0 { 7 } else { 0 };
            writeln!(self.out, "ld ${arg_bytes}, r{scratch}\nadd r{scratch}, r5")?;
            self.entire_frame_offset -= arg_bytes;
        }
        if dest != 0 {
            writeln!(self.out, "ld (r5), r0\ninca r5")?;
            self.entire_frame_offset -= 4;
        }
        Ok(())
    }

    fn ident_ref(&mut self, ident: NodeId, dest: u8) -> io::Result<()> {
        let Some(def) = self.definition_of(ident) else {
            return Ok(());
        };
        match self.ast.node(def).kind {
            NodeKind::ConstDecl { value } => {
                writeln!(self.out, "ld {}, r{dest}", value.unwrap_or(0))
            }
            NodeKind::VarDecl {
                is_static: true, ..
            } => {
                let name = self.definition_name(def);
                writeln!(self.out, "ld ${name}, r{dest}\nld (r{dest}), r{dest}")
            }
            NodeKind::VarDecl { frame_index, .. } => {
                let offset = 4 * frame_index as i32 + self.entire_frame_offset;
                writeln!(self.out, "ld {offset}(r5), r{dest}")
            }
            NodeKind::IdentRef {
                param_index: Some(index),
                ..
            } => {
                let offset =
                    4 * index as i32 + self.frame_arg_offset + self.entire_frame_offset;
                writeln!(self.out, "ld {offset}(r5), r{dest}")
            }
            _ => {
                let name = self.source.text(self.ast.node(ident).span);
                self.diagnostics.push(CompileError::new(
                    ErrorKind::UnsupportedNode,
                    format!("CODEGEN: `{name}` has no value"),
                    self.ast.node(ident).span,
                ));
                Ok(())
            }
        }
    }

    /// Compute `expr` into `dest`. Registers below `dest` survive;
    /// registers at or above it may be clobbered.
    fn codegen_expr(&mut self, expr: NodeId, dest: u8) -> io::Result<()> {
        debug_assert!(dest < 5, "expression destination out of range");
        match self.ast.node(expr).kind {
            NodeKind::NumberLiteral { value } => writeln!(self.out, "ld ${value}, r{dest}"),
            NodeKind::FuncCall => self.func_call(expr, dest),
            NodeKind::IdentRef { .. } => self.ident_ref(expr, dest),
            NodeKind::Expr { op, .. } => {
                let children: Vec<NodeId> = self.ast.children(expr).to_vec();
                match children.as_slice() {
                    [operand] => {
                        self.codegen_expr(*operand, dest)?;
                        self.prefix_operation(op, dest)
                    }
                    [left, right] => self.infix_expr(op, *left, *right, dest),
                    _ => Ok(()),
                }
            }
            ref other => {
                self.diagnostics.push(CompileError::new(
                    ErrorKind::UnsupportedNode,
                    format!("CODEGEN: cannot emit `{}`", other.label()),
                    self.ast.node(expr).span,
                ));
                Ok(())
            }
        }
    }

    fn infix_expr(&mut self, op: TokenKind, left: NodeId, right: NodeId, dest: u8) -> io::Result<()> {
        // Short-circuit logicals control whether the right operand
        // runs at all, so they cannot go through the two-register
        // path.
        match op {
            TokenKind::And => return self.logical_and(left, right, dest),
            TokenKind::Or => return self.logical_or(left, right, dest),
            _ => {}
        }

        // Constant shift peephole: one instruction instead of the
        // synthesized bit-by-bit sequence.
        if matches!(op, TokenKind::LeftShift | TokenKind::RightShift)
            && self.ast.is_constant(right)
        {
            self.codegen_expr(left, dest)?;
            let amount = self.ast.const_value(right).unwrap_or(0) & 31;
            let mnemonic = if op == TokenKind::LeftShift { "shl" } else { "shr" };
            return writeln!(self.out, "{mnemonic} ${amount}, r{dest}");
        }

        if dest >= 4 {
            // No register above dest to evaluate into; park the left
            // value on the stack and pair up through r7.
            self.codegen_expr(left, dest)?;
            writeln!(self.out, "deca r5\nst r{dest}, (r5)")?;
            self.entire_frame_offset += 4;
            self.codegen_expr(right, dest)?;
            writeln!(self.out, "mov r{dest}, r7")?;
            writeln!(self.out, "ld (r5), r{dest}\ninca r5")?;
            self.entire_frame_offset -= 4;
            self.operation(op, dest, 7)
        } else {
            self.codegen_expr(left, dest)?;
            self.codegen_expr(right, dest + 1)?;
            self.operation(op, dest, dest + 1)
        }
    }

    /// Prefix operation on `reg`, in place.
    fn prefix_operation(&mut self, op: TokenKind, reg: u8) -> io::Result<()> {
        match op {
            TokenKind::Negate => writeln!(self.out, "not r{reg}\ninc r{reg}"),
            TokenKind::BitwiseNot => writeln!(self.out, "not r{reg}"),
            TokenKind::Deref => writeln!(self.out, "ld (r{reg}), r{reg}"),
            TokenKind::Not => {
                let n = self.next_label();
                writeln!(self.out, "beq r{reg}, L{n}T")?;
                writeln!(self.out, "ld $0, r{reg}")?;
                writeln!(self.out, "br L{n}E")?;
                writeln!(self.out, "L{n}T:")?;
                writeln!(self.out, "ld $1, r{reg}")?;
                writeln!(self.out, "L{n}E:")
            }
            _ => {
                self.diagnostics.push(CompileError::new(
                    ErrorKind::UnsupportedNode,
                    format!("CODEGEN: idk how to fold in prefix {}", op.spelling()),
                    crate::error::Span::default(),
                ));
                Ok(())
            }
        }
    }

    /// Infix operation on `(left, right)`, result into `left`.
    /// Clobbers both; extra registers are saved around their use.
    fn operation(&mut self, op: TokenKind, left: u8, right: u8) -> io::Result<()> {
        use TokenKind::*;
        match op {
            Plus => writeln!(self.out, "add r{right}, r{left}"),
            Minus => writeln!(
                self.out,
                "not r{right}\ninc r{right}\nadd r{right}, r{left}"
            ),
            Times => self.multiply(left, right),
            Divide => self.divide(left, right, true),
            Modulo => self.divide(left, right, false),
            LeftShift => self.dynamic_shift(left, right, "shl"),
            RightShift => self.dynamic_shift(left, right, "shr"),
            BitwiseAnd => writeln!(self.out, "and r{right}, r{left}"),
            BitwiseOr => writeln!(
                self.out,
                "not r{left}\nnot r{right}\nand r{right}, r{left}\nnot r{left}"
            ),
            BitwiseXor => self.exclusive_or(left, right),
            LessThan | LessThanEquals | GreaterThan | GreaterThanEquals | Equals | NotEquals => {
                self.comparison(op, left, right)
            }
            _ => {
                self.diagnostics.push(CompileError::new(
                    ErrorKind::UnsupportedNode,
                    format!("CODEGEN: idk how to fold in {}", op.spelling()),
                    crate::error::Span::default(),
                ));
                Ok(())
            }
        }
    }

    /// Shift-and-add multiply. The accumulator lives in a borrowed
    /// register, the bit test in r6; both are saved around the loop.
    fn multiply(&mut self, left: u8, right: u8) -> io::Result<()> {
        let acc = self.scratch_regs(&[left, right], 1)[0];
        let n = self.next_label();
        writeln!(self.out, "deca r5\nst r6, (r5)")?;
        writeln!(self.out, "deca r5\nst r{acc}, (r5)")?;
        self.entire_frame_offset += 8;
        writeln!(self.out, "ld $0, r{acc}")?;
        writeln!(self.out, "L{n}:")?;
        writeln!(self.out, "beq r{right}, L{n}E")?;
        writeln!(self.out, "ld $1, r6")?;
        writeln!(self.out, "and r{right}, r6")?;
        writeln!(self.out, "be r6, L{n}C")?;
        writeln!(self.out, "add r{left}, r{acc}")?;
        writeln!(self.out, "L{n}C:")?;
        writeln!(self.out, "shr $1, r{right}")?;
        writeln!(self.out, "shl $1, r{left}")?;
        writeln!(self.out, "br L{n}")?;
        writeln!(self.out, "L{n}E:")?;
        writeln!(self.out, "mov r{acc}, r{left}")?;
        writeln!(self.out, "ld (r5), r{acc}\ninca r5")?;
        writeln!(self.out, "ld (r5), r6\ninca r5")?;
        self.entire_frame_offset -= 8;
        Ok(())
    }

    /// Non-restoring division. Scales the divisor up past the
    /// dividend counting shifts, then walks back down emitting one
    /// quotient bit per step, adding or subtracting as the partial
    /// remainder changes sign; one final correction when it ends
    /// negative. Quotient or corrected remainder lands in `left`.
    fn divide(&mut self, left: u8, right: u8, want_quotient: bool) -> io::Result<()> {
        let scratch = self.scratch_regs(&[left, right], 3);
        let (count, quot, temp) = (scratch[0], scratch[1], scratch[2]);
        let n = self.next_label();
        for reg in [count, quot, temp] {
            writeln!(self.out, "deca r5\nst r{reg}, (r5)")?;
        }
        self.entire_frame_offset += 12;
        writeln!(self.out, "ld $0, r{count}")?;
        writeln!(self.out, "ld $0, r{quot}")?;
        writeln!(self.out, "L{n}A:")?;
        writeln!(self.out, "mov r{right}, r{temp}")?;
        writeln!(self.out, "not r{temp}\ninc r{temp}")?;
        writeln!(self.out, "add r{left}, r{temp}")?;
        writeln!(self.out, "bgt r{temp}, L{n}S")?;
        writeln!(self.out, "beq r{temp}, L{n}S")?;
        writeln!(self.out, "br L{n}B")?;
        writeln!(self.out, "L{n}S:")?;
        writeln!(self.out, "shl $1, r{right}")?;
        writeln!(self.out, "inc r{count}")?;
        writeln!(self.out, "br L{n}A")?;
        writeln!(self.out, "L{n}B:")?;
        writeln!(self.out, "beq r{count}, L{n}D")?;
        writeln!(self.out, "dec r{count}")?;
        writeln!(self.out, "shr $1, r{right}")?;
        writeln!(self.out, "shl $1, r{quot}")?;
        writeln!(self.out, "bgt r{left}, L{n}P")?;
        writeln!(self.out, "beq r{left}, L{n}P")?;
        writeln!(self.out, "add r{right}, r{left}")?;
        writeln!(self.out, "br L{n}Q")?;
        writeln!(self.out, "L{n}P:")?;
        writeln!(self.out, "mov r{right}, r{temp}")?;
        writeln!(self.out, "not r{temp}\ninc r{temp}")?;
        writeln!(self.out, "add r{temp}, r{left}")?;
        writeln!(self.out, "inc r{quot}")?;
        writeln!(self.out, "L{n}Q:")?;
        writeln!(self.out, "br L{n}B")?;
        writeln!(self.out, "L{n}D:")?;
        writeln!(self.out, "bgt r{left}, L{n}E")?;
        writeln!(self.out, "beq r{left}, L{n}E")?;
        writeln!(self.out, "dec r{quot}")?;
        writeln!(self.out, "add r{right}, r{left}")?;
        writeln!(self.out, "L{n}E:")?;
        if want_quotient {
            writeln!(self.out, "mov r{quot}, r{left}")?;
        }
        for reg in [temp, quot, count] {
            writeln!(self.out, "ld (r5), r{reg}\ninca r5")?;
        }
        self.entire_frame_offset -= 12;
        Ok(())
    }

    /// Variable shift: amounts of 31 or more produce 0, otherwise
    /// each of the low five bits of the amount conditionally applies
    /// its own power-of-two immediate shift.
    fn dynamic_shift(&mut self, left: u8, right: u8, mnemonic: &str) -> io::Result<()> {
        let n = self.next_label();
        writeln!(self.out, "deca r5\nst r6, (r5)")?;
        self.entire_frame_offset += 4;
        writeln!(self.out, "mov r{right}, r6")?;
        writeln!(self.out, "ld $-31, r{right}")?;
        writeln!(self.out, "add r6, r{right}")?;
        writeln!(self.out, "bgt r{right}, L{n}Z")?;
        writeln!(self.out, "beq r{right}, L{n}Z")?;
        writeln!(self.out, "br L{n}G")?;
        writeln!(self.out, "L{n}Z:")?;
        writeln!(self.out, "ld $0, r{left}")?;
        writeln!(self.out, "br L{n}E")?;
        writeln!(self.out, "L{n}G:")?;
        // Bit k of the amount requests a shift by 2^k, so the mask
        // and the immediate are the same value.
        for (bit, amount) in [(1, 1), (2, 2), (3, 4), (4, 8), (5, 16)] {
            writeln!(self.out, "ld ${amount}, r{right}")?;
            writeln!(self.out, "and r6, r{right}")?;
            writeln!(self.out, "beq r{right}, L{n}B{bit}")?;
            writeln!(self.out, "{mnemonic} ${amount}, r{left}")?;
            writeln!(self.out, "L{n}B{bit}:")?;
        }
        writeln!(self.out, "L{n}E:")?;
        writeln!(self.out, "ld (r5), r6\ninca r5")?;
        self.entire_frame_offset -= 4;
        Ok(())
    }

    /// `a ^ b` as `a + b - 2 * (a & b)`.
    fn exclusive_or(&mut self, left: u8, right: u8) -> io::Result<()> {
        let temp = self.scratch_regs(&[left, right], 1)[0];
        writeln!(self.out, "deca r5\nst r{temp}, (r5)")?;
        self.entire_frame_offset += 4;
        writeln!(self.out, "mov r{left}, r{temp}")?;
        writeln!(self.out, "and r{right}, r{temp}")?;
        writeln!(self.out, "shl $1, r{temp}")?;
        writeln!(self.out, "add r{right}, r{left}")?;
        writeln!(self.out, "not r{temp}\ninc r{temp}")?;
        writeln!(self.out, "add r{temp}, r{left}")?;
        writeln!(self.out, "ld (r5), r{temp}\ninca r5")?;
        self.entire_frame_offset -= 4;
        Ok(())
    }

    /// Comparisons: compute `left - right`, test the sign with
    /// `beq`/`bgt`, branch to load 0 or 1.
    fn comparison(&mut self, op: TokenKind, left: u8, right: u8) -> io::Result<()> {
        use TokenKind::*;
        writeln!(
            self.out,
            "not r{right}\ninc r{right}\nadd r{right}, r{left}"
        )?;
        let n = self.next_label();
        // The sign tests branch to one outcome; the fall-through
        // loads the other.
        let (branches, fallthrough): (&[&str], i32) = match op {
            Equals => (&["beq"], 0),
            NotEquals => (&["beq"], 1),
            GreaterThan => (&["bgt"], 0),
            LessThanEquals => (&["bgt"], 1),
            GreaterThanEquals => (&["bgt", "beq"], 0),
            LessThan => (&["bgt", "beq"], 1),
            _ => (&[], 0),
        };
        for mnemonic in branches {
            writeln!(self.out, "{mnemonic} r{left}, L{n}T")?;
        }
        writeln!(self.out, "ld ${fallthrough}, r{left}")?;
        writeln!(self.out, "br L{n}E")?;
        writeln!(self.out, "L{n}T:")?;
        writeln!(self.out, "ld ${}, r{left}", 1 - fallthrough)?;
        writeln!(self.out, "L{n}E:")
    }

    /// `a and b` with short-circuit: the right operand only runs
    /// when the left was nonzero; the result is always 0 or 1.
    fn logical_and(&mut self, left: NodeId, right: NodeId, dest: u8) -> io::Result<()> {
        let n = self.next_label();
        self.codegen_expr(left, dest)?;
        writeln!(self.out, "beq r{dest}, L{n}F")?;
        self.codegen_expr(right, dest)?;
        writeln!(self.out, "beq r{dest}, L{n}F")?;
        writeln!(self.out, "ld $1, r{dest}")?;
        writeln!(self.out, "br L{n}E")?;
        writeln!(self.out, "L{n}F:")?;
        writeln!(self.out, "ld $0, r{dest}")?;
        writeln!(self.out, "L{n}E:")
    }

    /// `a or b` with short-circuit.
    fn logical_or(&mut self, left: NodeId, right: NodeId, dest: u8) -> io::Result<()> {
        let n = self.next_label();
        self.codegen_expr(left, dest)?;
        writeln!(self.out, "beq r{dest}, L{n}R")?;
        writeln!(self.out, "ld $1, r{dest}")?;
        writeln!(self.out, "br L{n}E")?;
        writeln!(self.out, "L{n}R:")?;
        self.codegen_expr(right, dest)?;
        writeln!(self.out, "beq r{dest}, L{n}F")?;
        writeln!(self.out, "ld $1, r{dest}")?;
        writeln!(self.out, "br L{n}E")?;
        writeln!(self.out, "L{n}F:")?;
        writeln!(self.out, "ld $0, r{dest}")?;
        writeln!(self.out, "L{n}E:")
    }

    /// Conditional. The escape to the else side is a two-hop
    /// `br`-over-`j` because conditional branches have limited reach
    /// and the then body can be arbitrarily long.
    fn if_expr(&mut self, node: NodeId) -> io::Result<()> {
        let (Some(condition), Some(then_body)) =
            (self.ast.child(node, 0), self.ast.child(node, 1))
        else {
            return Ok(());
        };
        let else_body = self.ast.child(node, 2);
        let n = self.next_label();
        self.codegen_expr(condition, 0)?;
        writeln!(self.out, "beq r0, ELSE{n}SInter")?;
        writeln!(self.out, "br ELSE{n}SInterEnd")?;
        writeln!(self.out, "ELSE{n}SInter:")?;
        writeln!(self.out, "j ELSE{n}S")?;
        writeln!(self.out, "ELSE{n}SInterEnd:")?;
        self.single_command(then_body)?;
        if else_body.is_some() {
            writeln!(self.out, "j ELSE{n}E")?;
        }
        writeln!(self.out, "ELSE{n}S:")?;
        if let Some(else_body) = else_body {
            self.single_command(else_body)?;
            writeln!(self.out, "ELSE{n}E:")?;
        }
        Ok(())
    }

    /// Loop: test at the top, two-hop escape to the end label, body,
    /// jump back.
    fn while_loop(&mut self, node: NodeId) -> io::Result<()> {
        let (Some(condition), Some(body)) = (self.ast.child(node, 0), self.ast.child(node, 1))
        else {
            return Ok(());
        };
        let n = self.next_label();
        writeln!(self.out, "L{n}S:")?;
        self.codegen_expr(condition, 0)?;
        writeln!(self.out, "beq r0, L{n}SInter")?;
        writeln!(self.out, "br L{n}SInterEnd")?;
        writeln!(self.out, "L{n}SInter:")?;
        writeln!(self.out, "j L{n}E")?;
        writeln!(self.out, "L{n}SInterEnd:")?;
        self.single_command(body)?;
        writeln!(self.out, "j L{n}S")?;
        writeln!(self.out, "L{n}E:")
    }

    fn next_label(&mut self) -> usize {
        let n = self.unique;
        self.unique += 1;
        n
    }

    /// The first `n` registers from the expression file that are not
    /// already in use. r0 is never borrowed; callers save and
    /// restore whatever they receive.
    fn scratch_regs(&self, used: &[u8], n: usize) -> Vec<u8> {
        [1u8, 2, 3, 4, 7]
            .into_iter()
            .filter(|reg| !used.contains(reg))
            .take(n)
            .collect()
    }

    fn definition_of(&mut self, ident: NodeId) -> Option<NodeId> {
        match self.ast.node(ident).kind {
            NodeKind::IdentRef {
                definition: Some(def),
                ..
            } => Some(def),
            _ => {
                // Unreachable after successful analysis; kept as a
                // diagnostic rather than a panic.
                let span = self.ast.node(ident).span;
                self.diagnostics.push(CompileError::new(
                    ErrorKind::UnsupportedNode,
                    format!("CODEGEN: `{}` was never resolved", self.source.text(span)),
                    span,
                ));
                None
            }
        }
    }

    /// Name of a declaration, read from its identifier child (or,
    /// for parameters, the binding identifier itself).
    fn definition_name(&self, def: NodeId) -> String {
        let span = match self.ast.node(def).kind {
            NodeKind::IdentRef { .. } => self.ast.node(def).span,
            _ => match self.ast.child(def, 0) {
                Some(name) => self.ast.node(name).span,
                None => self.ast.node(def).span,
            },
        };
        self.source.text(span)
    }
}
