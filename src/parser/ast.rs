//! # Abstract syntax tree
//!
//! The AST is an arena of nodes addressed by index. Nodes never move
//! and never disappear, so a `NodeId` is stable for the life of the
//! tree; the back-link from an identifier reference to its defining
//! node is just another `NodeId`, with no lifetime or ownership
//! cycle to manage.
//!
//! Child order is semantic (argument order, then/else order) and is
//! kept in each node's `children` vector. Contextual analysis fills
//! in the decorations: definitions on references, frame layout on
//! declarations, constancy and evaluated values on expressions.

use std::io;

use crate::error::Span;
use crate::lexer::token::TokenKind;

/// Index of a node within its [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    pub span: Span,
    pub children: Vec<NodeId>,
}

/// Node variants with their decorations.
///
/// Decorations start at their "unknown" values when the parser
/// allocates a node and are overwritten by contextual analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Program,
    GlobalDecl,
    /// Children: name `IdentRef`, `ParamList`, body `SingleCommand`.
    FnDecl {
        is_void: bool,
        param_count: usize,
        frame_vars: usize,
        clobbers_return: bool,
    },
    ParamList,
    ArgList,
    /// Children: name `IdentRef`, initializer expression.
    /// `value` is the compile-time evaluation of the initializer.
    ConstDecl { value: Option<i32> },
    /// Children: name `IdentRef`, optional initializer expression.
    VarDecl { is_static: bool, frame_index: usize },
    /// Children: target `IdentRef`, value expression.
    DirectAssign,
    /// Children: address expression, value expression.
    IndirectAssign,
    /// `definition` points at the defining node: a `ConstDecl`,
    /// `VarDecl`, `FnDecl`, or (for parameters) the binding
    /// `IdentRef` inside a `ParamList`, whose own `param_index`
    /// records its slot.
    IdentRef {
        definition: Option<NodeId>,
        param_index: Option<usize>,
    },
    /// Children: callee `IdentRef`, `ArgList`.
    FuncCall,
    /// One child: prefix operation. Two children: infix operation.
    Expr { op: TokenKind, is_constant: bool },
    Command,
    SingleCommand,
    /// Children: condition, then-body, optional else-body.
    IfExpr,
    /// Children: condition, body.
    WhileLoop,
    /// Children: optional value expression.
    ReturnDirective,
    NumberLiteral { value: i32 },
}

#[derive(Debug)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    /// A fresh tree holding only its `Program` root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Program,
                span: Span::default(),
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn alloc(&mut self, kind: NodeKind, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            span,
            children: Vec::new(),
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.index()].children.push(child);
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.index()].children
    }

    pub fn child(&self, id: NodeId, n: usize) -> Option<NodeId> {
        self.nodes[id.index()].children.get(n).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the subtree at `id` denotes a statically known value.
    ///
    /// Number literals always do; an operation does when analysis
    /// has marked it so; an identifier does when it resolves to an
    /// evaluated constant declaration.
    pub fn is_constant(&self, id: NodeId) -> bool {
        match &self.node(id).kind {
            NodeKind::NumberLiteral { .. } => true,
            NodeKind::Expr { is_constant, .. } => *is_constant,
            NodeKind::ConstDecl { value } => value.is_some(),
            NodeKind::IdentRef {
                definition: Some(def),
                ..
            } => matches!(self.node(*def).kind, NodeKind::ConstDecl { value: Some(_) }),
            _ => false,
        }
    }

    /// Compile-time value of the subtree at `id`, if it has one.
    pub fn const_value(&self, id: NodeId) -> Option<i32> {
        match &self.node(id).kind {
            NodeKind::NumberLiteral { value } => Some(*value),
            NodeKind::ConstDecl { value } => *value,
            NodeKind::IdentRef {
                definition: Some(def),
                ..
            } => match self.node(*def).kind {
                NodeKind::ConstDecl { value } => value,
                _ => None,
            },
            NodeKind::Expr { op, .. } => match self.children(id) {
                [operand] => fold_prefix(*op, self.const_value(*operand)?),
                [left, right] => Some(fold_infix(
                    self.const_value(*left)?,
                    *op,
                    self.const_value(*right)?,
                )),
                _ => None,
            },
            _ => None,
        }
    }

    /// Indented dump of the tree, one node per line. `text` resolves
    /// spans back to source (names and literals).
    pub fn write_tree<W: io::Write>(
        &self,
        out: &mut W,
        text: &dyn Fn(Span) -> String,
    ) -> io::Result<()> {
        self.write_node(out, self.root, 0, text)
    }

    fn write_node<W: io::Write>(
        &self,
        out: &mut W,
        id: NodeId,
        depth: usize,
        text: &dyn Fn(Span) -> String,
    ) -> io::Result<()> {
        let node = self.node(id);
        write!(out, "{:indent$}", "", indent = depth * 2)?;
        match &node.kind {
            NodeKind::IdentRef { .. } => writeln!(out, "IdentRef `{}`", text(node.span))?,
            NodeKind::NumberLiteral { value } => writeln!(out, "NumberLiteral {value}")?,
            NodeKind::Expr { op, is_constant } => {
                if *is_constant {
                    writeln!(out, "Expr `{op}` const")?
                } else {
                    writeln!(out, "Expr `{op}`")?
                }
            }
            NodeKind::FnDecl { is_void, .. } => {
                let kind = if *is_void { "void" } else { "non-void" };
                writeln!(out, "FnDecl {kind} `{}`", text(node.span))?
            }
            NodeKind::ConstDecl { value: Some(v) } => writeln!(out, "ConstDecl = {v}")?,
            other => writeln!(out, "{}", label(other))?,
        }
        for &child in &node.children {
            self.write_node(out, child, depth + 1, text)?;
        }
        Ok(())
    }
}

impl NodeKind {
    /// Short variant name for dumps and diagnostics.
    pub fn label(&self) -> &'static str {
        label(self)
    }
}

fn label(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Program => "Program",
        NodeKind::GlobalDecl => "GlobalDecl",
        NodeKind::FnDecl { .. } => "FnDecl",
        NodeKind::ParamList => "ParamList",
        NodeKind::ArgList => "ArgList",
        NodeKind::ConstDecl { .. } => "ConstDecl",
        NodeKind::VarDecl { .. } => "VarDecl",
        NodeKind::DirectAssign => "DirectAssign",
        NodeKind::IndirectAssign => "IndirectAssign",
        NodeKind::IdentRef { .. } => "IdentRef",
        NodeKind::FuncCall => "FuncCall",
        NodeKind::Expr { .. } => "Expr",
        NodeKind::Command => "Command",
        NodeKind::SingleCommand => "SingleCommand",
        NodeKind::IfExpr => "IfExpr",
        NodeKind::WhileLoop => "WhileLoop",
        NodeKind::ReturnDirective => "ReturnDirective",
        NodeKind::NumberLiteral { .. } => "NumberLiteral",
    }
}

/// Fold one infix operation over two known values.
///
/// Arithmetic wraps at 32 bits to match the target machine; shift
/// counts use the low five bits; division and modulo by zero fold
/// to zero rather than aborting the compile.
pub fn fold_infix(left: i32, op: TokenKind, right: i32) -> i32 {
    use TokenKind::*;
    match op {
        Plus => left.wrapping_add(right),
        Minus => left.wrapping_sub(right),
        Times => left.wrapping_mul(right),
        Divide => {
            if right == 0 {
                0
            } else {
                left.wrapping_div(right)
            }
        }
        Modulo => {
            if right == 0 {
                0
            } else {
                left.wrapping_rem(right)
            }
        }
        LeftShift => left.wrapping_shl(right as u32),
        RightShift => left.wrapping_shr(right as u32),
        LessThan => (left < right) as i32,
        LessThanEquals => (left <= right) as i32,
        GreaterThan => (left > right) as i32,
        GreaterThanEquals => (left >= right) as i32,
        Equals => (left == right) as i32,
        NotEquals => (left != right) as i32,
        And => (left != 0 && right != 0) as i32,
        Or => (left != 0 || right != 0) as i32,
        BitwiseAnd => left & right,
        BitwiseOr => left | right,
        BitwiseXor => left ^ right,
        _ => left,
    }
}

/// Fold a prefix operation. `Deref` has no compile-time value.
pub fn fold_prefix(op: TokenKind, operand: i32) -> Option<i32> {
    use TokenKind::*;
    match op {
        Negate => Some(operand.wrapping_neg()),
        BitwiseNot => Some(!operand),
        Not => Some((operand == 0) as i32),
        _ => None,
    }
}
