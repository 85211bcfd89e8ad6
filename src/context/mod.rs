//! # Contextual analysis
//!
//! The language is typeless, so there is not much to check; the
//! analyzer's whole job is:
//!
//! - link every identifier reference to its definition, or die
//! - confirm `const` initializers are statically known, and
//!   evaluate them
//! - lay out each function's frame: parameter slots, local slots,
//!   whether the return address register needs saving
//! - complain (without dying) about wrong argument counts
//!
//! Two passes share one scope stack. Pass one pushes every top-level
//! function so bodies may call functions defined further down the
//! file. Pass two is a depth-first walk that pushes declarations as
//! it meets them and pops them when their block ends.

pub mod scope;


use log::debug;

use crate::error::{CompileError, ErrorKind};
use crate::lexer::source::SourceBuffer;
use crate::parser::ast::{Ast, NodeId, NodeKind};
use scope::ScopeStack;

/// Decorate `ast` in place. Fatal resolution errors abort the
/// compile; argument-count complaints land in `diagnostics`.
pub fn analyze<R>(
    ast: &mut Ast,
    source: &SourceBuffer<R>,
    diagnostics: &mut Vec<CompileError>,
) -> Result<(), CompileError> {
    let mut analyzer = Analyzer {
        ast,
        source,
        scopes: ScopeStack::new(),
        frame_index: 0,
        clobbers_return: false,
        diagnostics,
    };
    analyzer.run()
}

struct Analyzer<'a, R> {
    ast: &'a mut Ast,
    source: &'a SourceBuffer<R>,
    scopes: ScopeStack,
    /// Next free local slot in the function being walked.
    frame_index: usize,
    /// Set when the function being walked contains any call.
    clobbers_return: bool,
    diagnostics: &'a mut Vec<CompileError>,
}

impl<R> Analyzer<'_, R> {
    fn run(&mut self) -> Result<(), CompileError> {
        let globals: Vec<NodeId> = self.ast.children(self.ast.root()).to_vec();

        // Pass one: functions are visible file-wide.
        let mut functions = 0usize;
        for &global in &globals {
            let Some(decl) = self.ast.child(global, 0) else {
                continue;
            };
            if let NodeKind::FnDecl { .. } = self.ast.node(decl).kind {
                if let Some(name) = self.ast.child(decl, 0) {
                    self.scopes.push(self.ast.node(name).span, decl);
                    functions += 1;
                }
            }
        }
        debug!(
            "analysis pass one: {} global declarations, {} functions",
            globals.len(),
            functions
        );

        // Pass two: everything else, in declaration order.
        for &global in &globals {
            let Some(decl) = self.ast.child(global, 0) else {
                continue;
            };
            match self.ast.node(decl).kind {
                NodeKind::FnDecl { .. } => self.fn_decl(decl)?,
                NodeKind::VarDecl { .. } => self.var_decl(decl, true)?,
                NodeKind::ConstDecl { .. } => self.const_decl(decl)?,
                _ => self.walk(decl)?,
            }
        }
        Ok(())
    }

    fn walk(&mut self, id: NodeId) -> Result<(), CompileError> {
        match self.ast.node(id).kind {
            NodeKind::ConstDecl { .. } => self.const_decl(id),
            NodeKind::VarDecl { .. } => self.var_decl(id, false),
            NodeKind::IdentRef { .. } => self.ident_ref(id),
            NodeKind::FuncCall => self.func_call(id),
            NodeKind::Expr { .. } => self.expr(id),
            NodeKind::Command => self.command(id),
            NodeKind::NumberLiteral { .. } => Ok(()),
            // SingleCommand, IfExpr, WhileLoop, ReturnDirective,
            // DirectAssign, IndirectAssign, ArgList: nothing to do
            // beyond their children.
            _ => self.walk_children(id),
        }
    }

    fn walk_children(&mut self, id: NodeId) -> Result<(), CompileError> {
        let children: Vec<NodeId> = self.ast.children(id).to_vec();
        for child in children {
            self.walk(child)?;
        }
        Ok(())
    }

    fn fn_decl(&mut self, id: NodeId) -> Result<(), CompileError> {
        let Some(params) = self.ast.child(id, 1) else {
            return Ok(());
        };
        let body = self.ast.child(id, 2);

        let outer_frame = self.frame_index;
        let outer_clobbers = self.clobbers_return;
        self.frame_index = 0;
        self.clobbers_return = false;

        let param_ids: Vec<NodeId> = self.ast.children(params).to_vec();
        for (index, &param) in param_ids.iter().enumerate() {
            if let NodeKind::IdentRef { param_index, .. } = &mut self.ast.node_mut(param).kind {
                *param_index = Some(index);
            }
            self.scopes.push(self.ast.node(param).span, param);
        }

        if let Some(body) = body {
            self.walk(body)?;
        }

        let frame_vars = self.frame_index;
        let clobbers = self.clobbers_return;
        if let NodeKind::FnDecl {
            param_count,
            frame_vars: fv,
            clobbers_return: cr,
            ..
        } = &mut self.ast.node_mut(id).kind
        {
            *param_count = param_ids.len();
            *fv = frame_vars;
            *cr = clobbers;
        }

        for _ in &param_ids {
            self.scopes.pop();
        }
        self.frame_index = outer_frame;
        self.clobbers_return = outer_clobbers;
        Ok(())
    }

    fn var_decl(&mut self, id: NodeId, is_static: bool) -> Result<(), CompileError> {
        let Some(name) = self.ast.child(id, 0) else {
            return Ok(());
        };
        // The name goes into scope before the initializer is walked,
        // so `var x = x` resolves to the declaration itself.
        self.scopes.push(self.ast.node(name).span, id);
        let slot = self.frame_index;
        self.frame_index += 1;
        if let NodeKind::VarDecl {
            is_static: st,
            frame_index,
        } = &mut self.ast.node_mut(id).kind
        {
            *st = is_static;
            *frame_index = slot;
        }
        if let Some(init) = self.ast.child(id, 1) {
            self.walk(init)?;
        }
        Ok(())
    }

    fn const_decl(&mut self, id: NodeId) -> Result<(), CompileError> {
        let Some(name) = self.ast.child(id, 0) else {
            return Ok(());
        };
        let name_span = self.ast.node(name).span;
        self.scopes.push(name_span, id);
        let Some(init) = self.ast.child(id, 1) else {
            return Ok(());
        };
        self.walk(init)?;
        if !self.ast.is_constant(init) {
            return Err(CompileError::non_constant_initializer(
                &self.source.text(name_span),
                name_span,
            ));
        }
        let value = self.ast.const_value(init);
        if let NodeKind::ConstDecl { value: slot } = &mut self.ast.node_mut(id).kind {
            *slot = value;
        }
        Ok(())
    }

    fn ident_ref(&mut self, id: NodeId) -> Result<(), CompileError> {
        let span = self.ast.node(id).span;
        let Some(def) = self.scopes.lookup(span, self.source) else {
            return Err(CompileError::undefined_identifier(
                &self.source.text(span),
                span,
            ));
        };
        if let NodeKind::IdentRef { definition, .. } = &mut self.ast.node_mut(id).kind {
            *definition = Some(def);
        }
        Ok(())
    }

    fn func_call(&mut self, id: NodeId) -> Result<(), CompileError> {
        let Some(callee) = self.ast.child(id, 0) else {
            return Ok(());
        };
        self.ident_ref(callee)?;
        self.clobbers_return = true;

        let def = match self.ast.node(callee).kind {
            NodeKind::IdentRef {
                definition: Some(def),
                ..
            } => def,
            _ => return Ok(()),
        };

        let args: Vec<NodeId> = match self.ast.child(id, 1) {
            Some(list) => self.ast.children(list).to_vec(),
            None => Vec::new(),
        };

        // Argument counts are checked against the parameter list of
        // the definition, not its (possibly not yet computed)
        // decoration, so forward calls check correctly too.
        if let NodeKind::FnDecl { .. } = self.ast.node(def).kind {
            if let Some(params) = self.ast.child(def, 1) {
                let expected = self.ast.children(params).len();
                let span = self.ast.node(callee).span;
                if args.len() > expected {
                    self.diagnostics.push(CompileError::new(
                        ErrorKind::TooManyArgs,
                        "Too many args",
                        span,
                    ));
                } else if args.len() < expected {
                    self.diagnostics.push(CompileError::new(
                        ErrorKind::TooFewArgs,
                        "Too few args",
                        span,
                    ));
                }
            }
        }

        for arg in args {
            self.walk(arg)?;
        }
        Ok(())
    }

    fn expr(&mut self, id: NodeId) -> Result<(), CompileError> {
        self.walk_children(id)?;
        let children: Vec<NodeId> = self.ast.children(id).to_vec();
        let constant = children.iter().all(|&c| self.ast.is_constant(c));
        if let NodeKind::Expr { op, is_constant } = &mut self.ast.node_mut(id).kind {
            // A dereference is never statically known.
            *is_constant = constant && *op != crate::lexer::token::TokenKind::Deref;
        }
        Ok(())
    }

    fn command(&mut self, id: NodeId) -> Result<(), CompileError> {
        let depth = self.scopes.depth();
        self.walk_children(id)?;
        self.scopes.truncate(depth);
        Ok(())
    }
}
