//! # Parser
//!
//! Recursive descent over the SML grammar, one function per
//! production, with infix expressions parsed by precedence climbing:
//! `priority(p)` parses a `priority(p - 1)` operand and then loops
//! over operators of priority `p`, so every level is left
//! associative and lower numbers bind tighter.
//!
//! ```text
//! program        ::= {EOL} globalDecl {EOL | globalDecl}
//! globalDecl     ::= funcDecl | constDecl | varDecl
//! funcDecl       ::= "func" ("void" | "non-void") Ident paramList singleCmd
//! paramList      ::= "(" [ Ident { "," Ident } ] ")"
//! argList        ::= "(" [ expr { "," expr } ] ")"
//! constDecl      ::= "const" Ident "=" expr EOL
//! varDecl        ::= "var" Ident [ "=" expr ] EOL
//! command        ::= {EOL} { singleCmd {EOL} }
//! singleCmd      ::= constDecl | varDecl | ifExpr | whileLoop
//!                  | "{" command "}" | identifierCmd
//!                  | indirectAssign | returnDirective
//! identifierCmd  ::= Ident ( argList | "=" expr ) EOL
//! indirectAssign ::= "*" primaryExpr "=" expr EOL
//! returnDirective::= "return" [ expr ] EOL
//! ifExpr         ::= "if" expr singleCmd [ "else" singleCmd ]
//! whileLoop      ::= "while" expr singleCmd
//! expr           ::= priority(10)
//! primaryExpr    ::= Number | Ident [argList] | "(" expr ")"
//!                  | ("-" | "~" | "!" | "*") primaryExpr
//! ```
//!
//! An unexpected token in a position with no alternative is fatal
//! (``Unexpected: `lexeme` ``); mismatched delimiters travel the
//! lexer's recoverable `accept` path instead.

pub mod ast;


use std::io::Read;

use log::debug;

use crate::error::CompileError;
use crate::lexer::token::{Token, TokenKind};
use crate::lexer::Lexer;
use ast::{Ast, NodeId, NodeKind};

/// Highest (loosest-binding) operator priority.
const MAX_PRIORITY: u8 = 10;

/// Parse a whole program from the lexer. Recoverable diagnostics
/// stay in the lexer's sink; the returned tree is undecorated.
pub fn parse<R: Read>(lexer: &mut Lexer<R>) -> Result<Ast, CompileError> {
    let mut parser = Parser {
        lexer,
        ast: Ast::new(),
    };
    parser.program()?;
    debug!("parsed {} AST nodes", parser.ast.len());
    Ok(parser.ast)
}

struct Parser<'a, R> {
    lexer: &'a mut Lexer<R>,
    ast: Ast,
}

impl<R: Read> Parser<'_, R> {
    fn program(&mut self) -> Result<(), CompileError> {
        loop {
            let next = self.lexer.peek()?;
            match next.kind {
                TokenKind::LineEnd => self.lexer.accept_it(),
                TokenKind::Const | TokenKind::Var | TokenKind::Func => {
                    let decl = self.global_decl()?;
                    let root = self.ast.root();
                    self.ast.add_child(root, decl);
                }
                TokenKind::Eof => return Ok(()),
                _ => return Err(self.unexpected(next)),
            }
        }
    }

    fn global_decl(&mut self) -> Result<NodeId, CompileError> {
        let next = self.lexer.peek()?;
        let decl = self.ast.alloc(NodeKind::GlobalDecl, next.span);
        let child = match next.kind {
            TokenKind::Func => self.function_decl()?,
            TokenKind::Const => self.const_decl()?,
            TokenKind::Var => self.var_decl()?,
            _ => return Err(self.unexpected(next)),
        };
        self.ast.add_child(decl, child);
        Ok(decl)
    }

    fn function_decl(&mut self) -> Result<NodeId, CompileError> {
        self.lexer.accept(TokenKind::Func)?;
        let next = self.lexer.peek()?;
        let is_void = match next.kind {
            TokenKind::Void => true,
            TokenKind::NonVoid => false,
            _ => return Err(self.unexpected(next)),
        };
        self.lexer.accept_it();

        // The declaration's own span is its name.
        let name = self.lexer.peek()?;
        let decl = self.ast.alloc(
            NodeKind::FnDecl {
                is_void,
                param_count: 0,
                frame_vars: 0,
                clobbers_return: false,
            },
            name.span,
        );
        let ident = self.identifier()?;
        let params = self.param_list()?;
        let body = self.single_command()?;
        self.ast.add_child(decl, ident);
        self.ast.add_child(decl, params);
        self.ast.add_child(decl, body);
        Ok(decl)
    }

    fn param_list(&mut self) -> Result<NodeId, CompileError> {
        let open = self.lexer.peek()?;
        let list = self.ast.alloc(NodeKind::ParamList, open.span);
        self.lexer.accept(TokenKind::LPar)?;
        if self.lexer.peek()?.kind == TokenKind::Identifier {
            let param = self.identifier()?;
            self.ast.add_child(list, param);
        }
        loop {
            let next = self.lexer.peek()?;
            if next.kind == TokenKind::RPar || next.kind == TokenKind::Eof {
                break;
            }
            self.lexer.accept(TokenKind::Comma)?;
            let param = self.identifier()?;
            self.ast.add_child(list, param);
        }
        self.lexer.accept(TokenKind::RPar)?;
        Ok(list)
    }

    fn arg_list(&mut self) -> Result<NodeId, CompileError> {
        let open = self.lexer.peek()?;
        let list = self.ast.alloc(NodeKind::ArgList, open.span);
        self.lexer.accept(TokenKind::LPar)?;
        let next = self.lexer.peek()?;
        if next.kind != TokenKind::RPar && next.kind != TokenKind::Eof {
            let arg = self.expr()?;
            self.ast.add_child(list, arg);
        }
        loop {
            let next = self.lexer.peek()?;
            if next.kind == TokenKind::RPar || next.kind == TokenKind::Eof {
                break;
            }
            self.lexer.accept(TokenKind::Comma)?;
            let arg = self.expr()?;
            self.ast.add_child(list, arg);
        }
        self.lexer.accept(TokenKind::RPar)?;
        Ok(list)
    }

    fn command(&mut self) -> Result<NodeId, CompileError> {
        let start = self.lexer.peek()?;
        let command = self.ast.alloc(NodeKind::Command, start.span);
        self.skip_line_ends()?;
        loop {
            let next = self.lexer.peek()?;
            match next.kind {
                TokenKind::Const
                | TokenKind::Var
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Identifier
                | TokenKind::Times
                | TokenKind::LCPar
                | TokenKind::Return => {
                    let cmd = self.single_command()?;
                    self.ast.add_child(command, cmd);
                    self.skip_line_ends()?;
                }
                _ => break,
            }
        }
        Ok(command)
    }

    fn single_command(&mut self) -> Result<NodeId, CompileError> {
        let next = self.lexer.peek()?;
        let cmd = self.ast.alloc(NodeKind::SingleCommand, next.span);
        let child = match next.kind {
            TokenKind::Const => self.const_decl()?,
            TokenKind::Var => self.var_decl()?,
            TokenKind::If => self.if_expr()?,
            TokenKind::While => self.while_loop()?,
            TokenKind::LCPar => {
                self.lexer.accept_it();
                let block = self.command()?;
                self.lexer.accept(TokenKind::RCPar)?;
                block
            }
            TokenKind::Identifier => self.identifier_command()?,
            TokenKind::Times => self.indirect_assignment()?,
            TokenKind::Return => self.return_directive()?,
            _ => return Err(self.unexpected(next)),
        };
        self.ast.add_child(cmd, child);
        Ok(cmd)
    }

    fn if_expr(&mut self) -> Result<NodeId, CompileError> {
        let start = self.lexer.peek()?;
        let node = self.ast.alloc(NodeKind::IfExpr, start.span);
        self.lexer.accept(TokenKind::If)?;
        let condition = self.expr()?;
        let then_body = self.single_command()?;
        self.ast.add_child(node, condition);
        self.ast.add_child(node, then_body);
        if self.lexer.peek()?.kind == TokenKind::Else {
            self.lexer.accept_it();
            let else_body = self.single_command()?;
            self.ast.add_child(node, else_body);
        }
        Ok(node)
    }

    fn while_loop(&mut self) -> Result<NodeId, CompileError> {
        let start = self.lexer.peek()?;
        let node = self.ast.alloc(NodeKind::WhileLoop, start.span);
        self.lexer.accept(TokenKind::While)?;
        let condition = self.expr()?;
        let body = self.single_command()?;
        self.ast.add_child(node, condition);
        self.ast.add_child(node, body);
        Ok(node)
    }

    fn const_decl(&mut self) -> Result<NodeId, CompileError> {
        let start = self.lexer.peek()?;
        let node = self.ast.alloc(NodeKind::ConstDecl { value: None }, start.span);
        self.lexer.accept(TokenKind::Const)?;
        let ident = self.identifier()?;
        self.lexer.accept(TokenKind::Assign)?;
        let init = self.expr()?;
        self.lexer.accept(TokenKind::LineEnd)?;
        self.ast.add_child(node, ident);
        self.ast.add_child(node, init);
        Ok(node)
    }

    fn var_decl(&mut self) -> Result<NodeId, CompileError> {
        let start = self.lexer.peek()?;
        let node = self.ast.alloc(
            NodeKind::VarDecl {
                is_static: false,
                frame_index: 0,
            },
            start.span,
        );
        self.lexer.accept(TokenKind::Var)?;
        let ident = self.identifier()?;
        self.ast.add_child(node, ident);
        if self.lexer.peek()?.kind != TokenKind::LineEnd {
            self.lexer.accept(TokenKind::Assign)?;
            let init = self.expr()?;
            self.ast.add_child(node, init);
        }
        self.lexer.accept(TokenKind::LineEnd)?;
        Ok(node)
    }

    /// `Ident "=" expr EOL` or `Ident argList EOL`; one token of
    /// lookahead past the identifier decides which.
    fn identifier_command(&mut self) -> Result<NodeId, CompileError> {
        let ident = self.identifier()?;
        let span = self.ast.node(ident).span;
        if self.lexer.peek()?.kind == TokenKind::LPar {
            let call = self.ast.alloc(NodeKind::FuncCall, span);
            let args = self.arg_list()?;
            self.lexer.accept(TokenKind::LineEnd)?;
            self.ast.add_child(call, ident);
            self.ast.add_child(call, args);
            return Ok(call);
        }
        let assign = self.ast.alloc(NodeKind::DirectAssign, span);
        self.lexer.accept(TokenKind::Assign)?;
        let value = self.expr()?;
        self.lexer.accept(TokenKind::LineEnd)?;
        self.ast.add_child(assign, ident);
        self.ast.add_child(assign, value);
        Ok(assign)
    }

    fn indirect_assignment(&mut self) -> Result<NodeId, CompileError> {
        let start = self.lexer.peek()?;
        let node = self.ast.alloc(NodeKind::IndirectAssign, start.span);
        self.lexer.accept(TokenKind::Times)?;
        let address = self.primary_expr()?;
        self.lexer.accept(TokenKind::Assign)?;
        let value = self.expr()?;
        self.lexer.accept(TokenKind::LineEnd)?;
        self.ast.add_child(node, address);
        self.ast.add_child(node, value);
        Ok(node)
    }

    /// `return [expr]`. The terminating newline is optional before a
    /// closing brace so that `{ return }` parses.
    fn return_directive(&mut self) -> Result<NodeId, CompileError> {
        let start = self.lexer.peek()?;
        let node = self.ast.alloc(NodeKind::ReturnDirective, start.span);
        self.lexer.accept(TokenKind::Return)?;
        let next = self.lexer.peek()?;
        if !matches!(
            next.kind,
            TokenKind::LineEnd | TokenKind::RCPar | TokenKind::Eof
        ) {
            let value = self.expr()?;
            self.ast.add_child(node, value);
        }
        if self.lexer.peek()?.kind == TokenKind::LineEnd {
            self.lexer.accept_it();
        }
        Ok(node)
    }

    fn expr(&mut self) -> Result<NodeId, CompileError> {
        self.priority(MAX_PRIORITY)
    }

    /// `priority(p) ::= priority(p - 1) { op(p) priority(p - 1) }`
    fn priority(&mut self, priority: u8) -> Result<NodeId, CompileError> {
        if priority == 0 {
            return self.primary_expr();
        }
        let mut left = self.priority(priority - 1)?;
        loop {
            let next = self.lexer.peek()?;
            if !is_priority(next.kind, priority) {
                return Ok(left);
            }
            self.lexer.accept_it();
            let right = self.priority(priority - 1)?;
            left = self.fold_expr(left, next.kind, right);
        }
    }

    /// Combine two operands and an operator into one operation node.
    /// Parse-time constancy: an operation is constant when both of
    /// its operands are (analysis refines this once names resolve).
    fn fold_expr(&mut self, left: NodeId, op: TokenKind, right: NodeId) -> NodeId {
        let is_constant = self.ast.is_constant(left) && self.ast.is_constant(right);
        let span = crate::error::Span::new(
            self.ast.node(left).span.start,
            self.ast.node(right).span.end,
        );
        let node = self.ast.alloc(NodeKind::Expr { op, is_constant }, span);
        self.ast.add_child(node, left);
        self.ast.add_child(node, right);
        node
    }

    fn primary_expr(&mut self) -> Result<NodeId, CompileError> {
        let next = self.lexer.peek()?;
        match next.kind {
            TokenKind::Number => {
                let value = number_value(&self.lexer.text(next.span));
                let node = self
                    .ast
                    .alloc(NodeKind::NumberLiteral { value }, next.span);
                self.lexer.accept_it();
                Ok(node)
            }
            TokenKind::Identifier => {
                let ident = self.identifier()?;
                if self.lexer.peek()?.kind == TokenKind::LPar {
                    let span = self.ast.node(ident).span;
                    let call = self.ast.alloc(NodeKind::FuncCall, span);
                    let args = self.arg_list()?;
                    self.ast.add_child(call, ident);
                    self.ast.add_child(call, args);
                    return Ok(call);
                }
                Ok(ident)
            }
            TokenKind::LPar => {
                self.lexer.accept_it();
                let inner = self.expr()?;
                self.lexer.accept(TokenKind::RPar)?;
                Ok(inner)
            }
            TokenKind::Minus => self.prefix_expr(next, TokenKind::Negate),
            TokenKind::BitwiseNot => self.prefix_expr(next, TokenKind::BitwiseNot),
            TokenKind::Not => self.prefix_expr(next, TokenKind::Not),
            TokenKind::Times => self.prefix_expr(next, TokenKind::Deref),
            _ => Err(self.unexpected(next)),
        }
    }

    fn prefix_expr(&mut self, tok: Token, op: TokenKind) -> Result<NodeId, CompileError> {
        self.lexer.accept_it();
        let operand = self.primary_expr()?;
        // A dereference is never statically known; the rest follow
        // their operand.
        let is_constant = op != TokenKind::Deref && self.ast.is_constant(operand);
        let node = self.ast.alloc(NodeKind::Expr { op, is_constant }, tok.span);
        self.ast.add_child(node, operand);
        Ok(node)
    }

    fn identifier(&mut self) -> Result<NodeId, CompileError> {
        let next = self.lexer.peek()?;
        let node = self.ast.alloc(
            NodeKind::IdentRef {
                definition: None,
                param_index: None,
            },
            next.span,
        );
        self.lexer.accept(TokenKind::Identifier)?;
        Ok(node)
    }

    fn skip_line_ends(&mut self) -> Result<(), CompileError> {
        while self.lexer.peek()?.kind == TokenKind::LineEnd {
            self.lexer.accept_it();
        }
        Ok(())
    }

    fn unexpected(&self, tok: Token) -> CompileError {
        CompileError::unexpected_token(&self.lexer.lexeme(tok), tok.span)
    }
}

/// Operator priority table; 1 binds tightest and is evaluated first.
fn is_priority(kind: TokenKind, priority: u8) -> bool {
    use TokenKind::*;
    if !kind.is_infix() {
        return false;
    }
    match priority {
        10 => kind == Or,
        9 => kind == And,
        8 => kind == BitwiseOr,
        7 => kind == BitwiseXor,
        6 => kind == BitwiseAnd,
        5 => kind == Equals || kind == NotEquals,
        4 => matches!(
            kind,
            LessThan | LessThanEquals | GreaterThan | GreaterThanEquals
        ),
        3 => kind == LeftShift || kind == RightShift,
        2 => kind == Plus || kind == Minus,
        1 => matches!(kind, Times | Divide | Modulo),
        _ => false,
    }
}

/// Value of a number token, `strtol` style: detect the base from the
/// prefix (`0x` hex, bare leading `0` octal, otherwise decimal), read
/// the longest run of valid digits, wrap into 32 bits, and ignore any
/// fractional tail.
fn number_value(text: &str) -> i32 {
    let int_part = match text.find('.') {
        Some(dot) => &text[..dot],
        None => text,
    };
    let (digits, base): (&str, u32) = if let Some(hex) = int_part.strip_prefix("0x") {
        (hex, 16)
    } else if int_part.len() > 1 && int_part.starts_with('0') {
        (&int_part[1..], 8)
    } else {
        (int_part, 10)
    };
    let mut value: i32 = 0;
    for c in digits.chars() {
        let Some(digit) = c.to_digit(base) else {
            break;
        };
        value = value.wrapping_mul(base as i32).wrapping_add(digit as i32);
    }
    value
}
