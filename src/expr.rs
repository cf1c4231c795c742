//! The expression language: a typed AST with a parser, evaluator and
//! printer.
//!
//! Expressions compute sizes, offsets, field availability, union
//! discriminators, dynamic dimensions, derived times and navigation targets
//! against a live cursor. Every node has one of six result kinds; the kind
//! is fixed when the node is constructed. Expressions whose operands are all
//! constant (and that do not depend on the product) are marked constant and
//! can be evaluated without a cursor.

mod eval;
mod lexer;
mod parser;
mod print;

use std::fmt;

use crate::error::{Error, Result};

pub use print::PrintDialect;

/// Hard bound on the height of an expression tree, enforced during
/// construction so that evaluation never overflows the host stack.
pub(crate) const MAX_RECURSION_DEPTH: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Boolean,
    Integer,
    Float,
    String,
    Node,
    Void,
}

impl ResultKind {
    pub fn name(self) -> &'static str {
        match self {
            ResultKind::Boolean => "boolean",
            ResultKind::Integer => "integer",
            ResultKind::Float => "float",
            ResultKind::String => "string",
            ResultKind::Node => "node",
            ResultKind::Void => "void",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Tag {
    Abs,
    Add,
    And,
    ArrayAdd,
    ArrayAll,
    ArrayCount,
    ArrayExists,
    ArrayIndex,
    ArrayMax,
    ArrayMin,
    AsciiLine,
    At,
    BitOffset,
    BitSize,
    ByteOffset,
    ByteSize,
    Bytes,
    Ceil,
    Dim,
    Divide,
    Equal,
    Exists,
    FileSize,
    Filename,
    Float,
    Floor,
    For,
    Goto,
    GotoArrayElement,
    GotoAttribute,
    GotoBegin,
    GotoField,
    GotoHere,
    GotoParent,
    GotoRoot,
    Greater,
    GreaterEqual,
    If,
    Index,
    IndexVar,
    Integer,
    IsInf,
    IsMinInf,
    IsNan,
    IsPlusInf,
    Length,
    Less,
    LessEqual,
    LogicalAnd,
    LogicalOr,
    Ltrim,
    Max,
    Min,
    Modulo,
    Multiply,
    Neg,
    Not,
    NotEqual,
    NumDims,
    NumElements,
    Or,
    Power,
    ProductClass,
    ProductFormat,
    ProductType,
    ProductVersion,
    Regex,
    Round,
    Rtrim,
    Sequence,
    Str,
    StrTime,
    Substr,
    Subtract,
    Time,
    Trim,
    UnboundArrayIndex,
    VariableExists,
    VariableIndex,
    VariableSet,
    VariableValue,
    With,
}

#[derive(Debug, Clone)]
pub(crate) struct Operation {
    pub(crate) tag: Tag,
    pub(crate) identifier: Option<String>,
    pub(crate) ops: [Option<Box<Expr>>; 4],
    pub(crate) result: ResultKind,
    pub(crate) constant: bool,
}

#[derive(Debug, Clone)]
pub enum Expr {
    ConstBool(bool),
    ConstInt(i64),
    ConstFloat(f64),
    /// Decoded string bytes. Strings are byte slices, not UTF-8.
    ConstString(Vec<u8>),
    Op(Operation),
}

impl Expr {
    /// Parse the textual form of an expression.
    pub fn parse(text: &str) -> Result<Expr> {
        parser::parse(text)
    }

    pub(crate) fn new(
        tag: Tag,
        identifier: Option<String>,
        op1: Option<Expr>,
        op2: Option<Expr>,
        op3: Option<Expr>,
        op4: Option<Expr>,
    ) -> Result<Expr> {
        // fold unary minus into numeric literals
        if tag == Tag::Neg {
            match op1 {
                Some(Expr::ConstInt(value)) => return Ok(Expr::ConstInt(-value)),
                Some(Expr::ConstFloat(value)) => return Ok(Expr::ConstFloat(-value)),
                other => {
                    return Expr::new_op(tag, identifier, [other, None, None, None]);
                }
            }
        }
        Expr::new_op(tag, identifier, [op1, op2, op3, op4])
    }

    fn new_op(
        tag: Tag,
        identifier: Option<String>,
        ops: [Option<Expr>; 4],
    ) -> Result<Expr> {
        use ResultKind::*;
        use Tag::*;

        let kind_of = |op: &Option<Expr>| op.as_ref().map(Expr::result_kind);
        let result = match tag {
            ArrayAll | ArrayExists | Equal | Exists | GreaterEqual | Greater | IsInf
            | IsMinInf | IsNan | IsPlusInf | LessEqual | Less | LogicalAnd | LogicalOr
            | NotEqual | Not | VariableExists => Boolean,
            Power | Ceil | Tag::Float | Floor | Round | Time => ResultKind::Float,
            And | ArrayCount | ArrayIndex | BitOffset | BitSize | ByteOffset | ByteSize
            | Dim | FileSize | Index | IndexVar | Tag::Integer | Length | NumDims | NumElements
            | Or | ProductVersion | UnboundArrayIndex | VariableIndex | VariableValue => {
                ResultKind::Integer
            }
            Bytes | Filename | Ltrim | ProductClass | ProductFormat | ProductType | Rtrim
            | Str | StrTime | Substr | Trim => ResultKind::String,
            For | Goto | Sequence | VariableSet => Void,
            AsciiLine | GotoArrayElement | GotoAttribute | GotoBegin | GotoField
            | GotoHere | GotoParent | GotoRoot => Node,
            Abs | Neg => kind_of(&ops[0]).ok_or_else(|| missing_operand(tag))?,
            Add | Divide | Max | Min | Modulo | Multiply | Subtract => {
                let a = kind_of(&ops[0]).ok_or_else(|| missing_operand(tag))?;
                let b = kind_of(&ops[1]).ok_or_else(|| missing_operand(tag))?;
                if a == ResultKind::Float || b == ResultKind::Float {
                    ResultKind::Float
                } else {
                    a
                }
            }
            ArrayAdd | ArrayMax | ArrayMin | At | If | With => {
                kind_of(&ops[1]).ok_or_else(|| missing_operand(tag))?
            }
            Regex => {
                if ops[2].is_none() {
                    Boolean
                } else {
                    ResultKind::String
                }
            }
        };

        let constant = match tag {
            FileSize | Filename | ProductClass | ProductFormat | ProductType
            | ProductVersion | VariableIndex | VariableSet | VariableValue => false,
            _ => {
                result != Node
                    && ops
                        .iter()
                        .all(|op| op.as_ref().map_or(true, Expr::is_constant))
            }
        };

        let depth = 1 + ops
            .iter()
            .filter_map(|op| op.as_ref().map(Expr::depth))
            .max()
            .unwrap_or(0);
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::Expression(format!(
                "maximum recursion depth ({MAX_RECURSION_DEPTH}) reached"
            )));
        }

        let [op1, op2, op3, op4] = ops;
        Ok(Expr::Op(Operation {
            tag,
            identifier,
            ops: [
                op1.map(Box::new),
                op2.map(Box::new),
                op3.map(Box::new),
                op4.map(Box::new),
            ],
            result,
            constant,
        }))
    }

    pub fn result_kind(&self) -> ResultKind {
        match self {
            Expr::ConstBool(_) => ResultKind::Boolean,
            Expr::ConstInt(_) => ResultKind::Integer,
            Expr::ConstFloat(_) => ResultKind::Float,
            Expr::ConstString(_) => ResultKind::String,
            Expr::Op(op) => op.result,
        }
    }

    /// Constant expressions can be evaluated without a cursor.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Op(op) => op.constant,
            _ => true,
        }
    }

    pub(crate) fn depth(&self) -> u32 {
        match self {
            Expr::Op(op) => {
                1 + op
                    .ops
                    .iter()
                    .filter_map(|o| o.as_deref().map(Expr::depth))
                    .max()
                    .unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub(crate) fn op(&self) -> &Operation {
        match self {
            Expr::Op(op) => op,
            _ => unreachable!("constant expression has no operation"),
        }
    }

    pub(crate) fn operand(&self, index: usize) -> &Expr {
        self.op().ops[index]
            .as_deref()
            .expect("operand slot is filled")
    }

    pub(crate) fn opt_operand(&self, index: usize) -> Option<&Expr> {
        match self {
            Expr::Op(op) => op.ops[index].as_deref(),
            _ => None,
        }
    }

    /// Render the expression back to its textual form.
    pub fn to_text(&self) -> String {
        print::print(self, PrintDialect::Plain)
    }

    pub fn to_text_dialect(&self, dialect: PrintDialect) -> String {
        print::print(self, dialect)
    }
}

fn missing_operand(tag: Tag) -> Error {
    Error::Expression(format!("missing operand for {tag:?} expression"))
}

impl PartialEq for Expr {
    /// Structural equality: same tag, same identifier, operands pairwise
    /// equal; literals compare by value.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Expr::ConstBool(a), Expr::ConstBool(b)) => a == b,
            (Expr::ConstInt(a), Expr::ConstInt(b)) => a == b,
            (Expr::ConstFloat(a), Expr::ConstFloat(b)) => a == b,
            (Expr::ConstString(a), Expr::ConstString(b)) => a == b,
            (Expr::Op(a), Expr::Op(b)) => {
                a.tag == b.tag
                    && a.identifier == b.identifier
                    && a.ops
                        .iter()
                        .zip(b.ops.iter())
                        .all(|(x, y)| match (x, y) {
                            (Some(x), Some(y)) => x == y,
                            (None, None) => true,
                            _ => false,
                        })
            }
            _ => false,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn literal_negation_is_folded() {
        let expr = Expr::new(Tag::Neg, None, Some(Expr::ConstInt(5)), None, None, None).unwrap();
        assert_eq!(expr, Expr::ConstInt(-5));
        let expr =
            Expr::new(Tag::Neg, None, Some(Expr::ConstFloat(2.5)), None, None, None).unwrap();
        assert_eq!(expr, Expr::ConstFloat(-2.5));
    }

    #[test]
    fn result_kind_promotion() {
        let sum = Expr::new(
            Tag::Add,
            None,
            Some(Expr::ConstInt(1)),
            Some(Expr::ConstFloat(1.0)),
            None,
            None,
        )
        .unwrap();
        assert_eq!(sum.result_kind(), ResultKind::Float);
        assert!(sum.is_constant());
    }

    #[test]
    fn product_state_is_not_constant() {
        let expr = Expr::new(Tag::FileSize, None, None, None, None, None).unwrap();
        assert!(!expr.is_constant());
        assert_eq!(expr.result_kind(), ResultKind::Integer);
    }

    #[test]
    fn structural_equality() {
        let a = Expr::parse("1 + 2 * 3").unwrap();
        let b = Expr::parse("1+2*3").unwrap();
        let c = Expr::parse("(1 + 2) * 3").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
