//! Scope stack for name resolution.
//!
//! Entries are pushed in declaration order and popped when the
//! enclosing scope ends; lookup scans from the most recent entry
//! backwards, so an inner declaration shadows any outer one of the
//! same name. Names are compared by byte range against the input
//! buffer; the stack never owns a string.

use crate::error::Span;
use crate::lexer::source::SourceBuffer;
use crate::parser::ast::NodeId;

#[derive(Debug, Clone, Copy)]
struct ScopeEntry {
    name: Span,
    def: NodeId,
}

#[derive(Default)]
pub struct ScopeStack {
    entries: Vec<ScopeEntry>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: Span, def: NodeId) {
        self.entries.push(ScopeEntry { name, def });
    }

    pub fn pop(&mut self) {
        self.entries.pop();
    }

    /// Number of entries; record this on scope entry and hand it to
    /// [`ScopeStack::truncate`] on scope exit.
    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn truncate(&mut self, depth: usize) {
        self.entries.truncate(depth);
    }

    /// Innermost definition whose name matches `name`, if any.
    pub fn lookup<R>(&self, name: Span, source: &SourceBuffer<R>) -> Option<NodeId> {
        self.entries
            .iter()
            .rev()
            .find(|entry| source.spans_equal(name, entry.name))
            .map(|entry| entry.def)
    }
}
