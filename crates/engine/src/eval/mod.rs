// XTrace - Execution Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The watch-expression language: a small expression grammar over the
//! runtime's value model, compiled once per watch and evaluated against
//! live frame bindings on every traced event.
//!
//! Evaluation errors are ordinary `Result`s here; the watch layer above is
//! what turns them into "silently skip this entry".

mod evaluator;
mod parser;

pub use evaluator::evaluate;
pub use parser::parse_expression;

use xtrace_common::types::Value;

/// A compiled watch expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value
    Literal(Value),
    /// A name, resolved against frame bindings
    Ident(String),
    /// Member access `base.name`
    Member(Box<Expr>, String),
    /// Subscript `base[index]`
    Index(Box<Expr>, Box<Expr>),
    /// An explicitly parenthesized expression
    Paren(Box<Expr>),
    /// A unary operation
    Unary(UnaryOp, Box<Expr>),
    /// A binary operation
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation
    Neg,
    /// Boolean negation
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
}

impl Expr {
    /// Whether this expression is a postfix chain (identifier, literal,
    /// member access, subscript, or already parenthesized). A postfix chain
    /// can be concatenated with a member accessor without changing meaning;
    /// anything else needs parentheses first.
    pub fn is_postfix_chain(&self) -> bool {
        matches!(
            self,
            Self::Literal(_) | Self::Ident(_) | Self::Member(..) | Self::Index(..) | Self::Paren(_)
        )
    }
}
