//! Recursive-descent parser for the textual expression form.
//!
//! The grammar accepts exactly what the printer emits. Operator precedence
//! (tight to loose): unary `-`/`!`, `^`, `* / %`, `+ -`, `< <= > >=`,
//! `== !=`, `&`, `|`, `and`, `or`. A `/` in operand position starts a path;
//! between operands it divides.

use super::lexer::{Lexer, Token};
use super::{Expr, ResultKind, Tag};
use crate::error::{Error, Result};

pub(crate) fn parse(text: &str) -> Result<Expr> {
    let tokens = Lexer::tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.statement_list()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::InvalidFormat(format!(
            "unexpected trailing input in expression '{text}'"
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, context: &str) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(Error::InvalidFormat(format!(
                "expected {token:?} in {context}"
            )))
        }
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.peek() {
            Some(Token::Ident(name)) => Some(name),
            _ => None,
        }
    }

    fn expect_ident(&mut self, context: &str) -> Result<String> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            _ => Err(Error::InvalidFormat(format!("expected name in {context}"))),
        }
    }

    /// `a; b; c` folds into left-nested sequence nodes.
    fn statement_list(&mut self) -> Result<Expr> {
        let mut expr = self.statement()?;
        while self.eat(&Token::Semicolon) {
            let next = self.statement()?;
            expr = Expr::new(Tag::Sequence, None, Some(expr), Some(next), None, None)?;
        }
        Ok(expr)
    }

    fn statement(&mut self) -> Result<Expr> {
        if self.peek_ident() == Some("for") {
            return self.for_loop();
        }
        // $name [index] = value
        if self.peek() == Some(&Token::Dollar) {
            let mut offset = 2; // '$' name
            if self.peek_at(offset) == Some(&Token::LBracket) {
                let mut depth = 1;
                offset += 1;
                while depth > 0 {
                    match self.peek_at(offset) {
                        Some(Token::LBracket) => depth += 1,
                        Some(Token::RBracket) => depth -= 1,
                        None => break,
                        _ => {}
                    }
                    offset += 1;
                }
            }
            if self.peek_at(offset) == Some(&Token::Assign) {
                return self.variable_assignment();
            }
        }
        self.expression()
    }

    fn for_loop(&mut self) -> Result<Expr> {
        self.pos += 1; // for
        let index = self.index_identifier("for loop")?;
        self.expect(Token::Assign, "for loop")?;
        let from = self.expression()?;
        if self.peek_ident() != Some("to") {
            return Err(Error::InvalidFormat("expected 'to' in for loop".to_owned()));
        }
        self.pos += 1;
        let to = self.expression()?;
        let step = if self.peek_ident() == Some("step") {
            self.pos += 1;
            Some(self.expression()?)
        } else {
            None
        };
        if self.peek_ident() != Some("do") {
            return Err(Error::InvalidFormat("expected 'do' in for loop".to_owned()));
        }
        self.pos += 1;
        let body = self.statement()?;
        Expr::new(Tag::For, Some(index), Some(from), Some(to), step, Some(body))
    }

    fn variable_assignment(&mut self) -> Result<Expr> {
        self.pos += 1; // '$'
        let name = self.expect_ident("product variable")?;
        let index = if self.eat(&Token::LBracket) {
            let index = self.expression()?;
            self.expect(Token::RBracket, "product variable index")?;
            Some(index)
        } else {
            None
        };
        self.expect(Token::Assign, "product variable assignment")?;
        let value = self.expression()?;
        Expr::new(Tag::VariableSet, Some(name), index, Some(value), None, None)
    }

    fn index_identifier(&mut self, context: &str) -> Result<String> {
        let name = self.expect_ident(context)?;
        if !matches!(name.as_str(), "i" | "j" | "k") {
            return Err(Error::InvalidFormat(format!(
                "invalid index name '{name}' in {context} (must be i, j or k)"
            )));
        }
        Ok(name)
    }

    fn expression(&mut self) -> Result<Expr> {
        self.logical_or()
    }

    fn logical_or(&mut self) -> Result<Expr> {
        let mut expr = self.logical_and()?;
        while self.peek_ident() == Some("or") {
            self.pos += 1;
            let rhs = self.logical_and()?;
            expr = Expr::new(Tag::LogicalOr, None, Some(expr), Some(rhs), None, None)?;
        }
        Ok(expr)
    }

    fn logical_and(&mut self) -> Result<Expr> {
        let mut expr = self.bit_or()?;
        while self.peek_ident() == Some("and") {
            self.pos += 1;
            let rhs = self.bit_or()?;
            expr = Expr::new(Tag::LogicalAnd, None, Some(expr), Some(rhs), None, None)?;
        }
        Ok(expr)
    }

    fn bit_or(&mut self) -> Result<Expr> {
        let mut expr = self.bit_and()?;
        while self.eat(&Token::Pipe) {
            let rhs = self.bit_and()?;
            expr = Expr::new(Tag::Or, None, Some(expr), Some(rhs), None, None)?;
        }
        Ok(expr)
    }

    fn bit_and(&mut self) -> Result<Expr> {
        let mut expr = self.equality()?;
        while self.eat(&Token::Amp) {
            let rhs = self.equality()?;
            expr = Expr::new(Tag::And, None, Some(expr), Some(rhs), None, None)?;
        }
        Ok(expr)
    }

    fn equality(&mut self) -> Result<Expr> {
        let mut expr = self.relational()?;
        loop {
            let tag = match self.peek() {
                Some(Token::Eq) => Tag::Equal,
                Some(Token::Ne) => Tag::NotEqual,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.relational()?;
            expr = Expr::new(tag, None, Some(expr), Some(rhs), None, None)?;
        }
        Ok(expr)
    }

    fn relational(&mut self) -> Result<Expr> {
        let mut expr = self.additive()?;
        loop {
            let tag = match self.peek() {
                Some(Token::Lt) => Tag::Less,
                Some(Token::Le) => Tag::LessEqual,
                Some(Token::Gt) => Tag::Greater,
                Some(Token::Ge) => Tag::GreaterEqual,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.additive()?;
            expr = Expr::new(tag, None, Some(expr), Some(rhs), None, None)?;
        }
        Ok(expr)
    }

    fn additive(&mut self) -> Result<Expr> {
        let mut expr = self.multiplicative()?;
        loop {
            let tag = match self.peek() {
                Some(Token::Plus) => Tag::Add,
                Some(Token::Minus) => Tag::Subtract,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative()?;
            expr = Expr::new(tag, None, Some(expr), Some(rhs), None, None)?;
        }
        Ok(expr)
    }

    fn multiplicative(&mut self) -> Result<Expr> {
        let mut expr = self.power()?;
        loop {
            let tag = match self.peek() {
                Some(Token::Star) => Tag::Multiply,
                Some(Token::Slash) => Tag::Divide,
                Some(Token::Percent) => Tag::Modulo,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.power()?;
            expr = Expr::new(tag, None, Some(expr), Some(rhs), None, None)?;
        }
        Ok(expr)
    }

    fn power(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;
        while self.eat(&Token::Caret) {
            let rhs = self.unary()?;
            expr = Expr::new(Tag::Power, None, Some(expr), Some(rhs), None, None)?;
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Expr::new(Tag::Neg, None, Some(operand), None, None, None);
        }
        if self.eat(&Token::Bang) {
            let operand = self.unary()?;
            return Expr::new(Tag::Not, None, Some(operand), None, None, None);
        }
        self.postfix()
    }

    /// Parse a primary and, while the expression is a node, fold path
    /// continuations (`/name`, `/..`, `[index]`, `@attr`) onto it.
    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        if expr.result_kind() != ResultKind::Node {
            return Ok(expr);
        }
        loop {
            match self.peek() {
                Some(Token::Slash) => match self.peek_at(1) {
                    Some(Token::Ident(_)) => {
                        self.pos += 1;
                        let name = self.expect_ident("path")?;
                        expr = Expr::new(
                            Tag::GotoField,
                            Some(name),
                            Some(expr),
                            None,
                            None,
                            None,
                        )?;
                    }
                    Some(Token::DotDot) => {
                        self.pos += 2;
                        expr = Expr::new(Tag::GotoParent, None, Some(expr), None, None, None)?;
                    }
                    _ => break,
                },
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression()?;
                    self.expect(Token::RBracket, "array index")?;
                    expr = Expr::new(
                        Tag::GotoArrayElement,
                        None,
                        Some(expr),
                        Some(index),
                        None,
                        None,
                    )?;
                }
                Some(Token::At) => {
                    self.pos += 1;
                    let name = self.expect_ident("attribute path")?;
                    expr = Expr::new(
                        Tag::GotoAttribute,
                        Some(name),
                        Some(expr),
                        None,
                        None,
                        None,
                    )?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Int(value)) => {
                let value = *value;
                self.pos += 1;
                Ok(Expr::ConstInt(value))
            }
            Some(Token::Float(value)) => {
                let value = *value;
                self.pos += 1;
                Ok(Expr::ConstFloat(value))
            }
            Some(Token::Str(_)) => {
                let Some(Token::Str(value)) = self.advance() else {
                    unreachable!();
                };
                Ok(Expr::ConstString(value))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = self.expression()?;
                self.expect(Token::RParen, "parenthesized expression")?;
                Ok(expr)
            }
            Some(Token::Slash) => {
                self.pos += 1;
                match self.peek() {
                    Some(Token::Ident(_)) => {
                        let name = self.expect_ident("path")?;
                        let root =
                            Expr::new(Tag::GotoRoot, None, None, None, None, None)?;
                        Expr::new(Tag::GotoField, Some(name), Some(root), None, None, None)
                    }
                    _ => Expr::new(Tag::GotoRoot, None, None, None, None, None),
                }
            }
            Some(Token::DotDot) => {
                self.pos += 1;
                Expr::new(Tag::GotoParent, None, None, None, None, None)
            }
            Some(Token::Dot) => {
                self.pos += 1;
                Expr::new(Tag::GotoHere, None, None, None, None, None)
            }
            Some(Token::Colon) => {
                self.pos += 1;
                Expr::new(Tag::GotoBegin, None, None, None, None, None)
            }
            Some(Token::At) => {
                self.pos += 1;
                let name = self.expect_ident("attribute path")?;
                Expr::new(Tag::GotoAttribute, Some(name), None, None, None, None)
            }
            Some(Token::Dollar) => {
                self.pos += 1;
                let name = self.expect_ident("product variable")?;
                let index = if self.eat(&Token::LBracket) {
                    let index = self.expression()?;
                    self.expect(Token::RBracket, "product variable index")?;
                    Some(index)
                } else {
                    None
                };
                Expr::new(Tag::VariableValue, Some(name), index, None, None, None)
            }
            Some(Token::Ident(_)) => self.identifier_expression(),
            other => Err(Error::InvalidFormat(format!(
                "unexpected token {other:?} in expression"
            ))),
        }
    }

    fn identifier_expression(&mut self) -> Result<Expr> {
        let name = self.expect_ident("expression")?;
        match name.as_str() {
            "true" => return Ok(Expr::ConstBool(true)),
            "false" => return Ok(Expr::ConstBool(false)),
            "nan" => return Ok(Expr::ConstFloat(f64::NAN)),
            "inf" => return Ok(Expr::ConstFloat(f64::INFINITY)),
            "asciiline" => return Expr::new(Tag::AsciiLine, None, None, None, None, None),
            _ => {}
        }
        if self.peek() == Some(&Token::LParen) {
            return self.call(&name);
        }
        if matches!(name.as_str(), "i" | "j" | "k") {
            return Expr::new(Tag::IndexVar, Some(name), None, None, None, None);
        }
        // bare field name, relative to the current position
        let here = Expr::new(Tag::GotoHere, None, None, None, None, None)?;
        Expr::new(Tag::GotoField, Some(name), Some(here), None, None, None)
    }

    fn call(&mut self, name: &str) -> Result<Expr> {
        self.expect(Token::LParen, "function call")?;

        // with(i = expr, body) binds an index register by name
        if name == "with" {
            let index = self.index_identifier("with")?;
            self.expect(Token::Assign, "with")?;
            let value = self.expression()?;
            self.expect(Token::Comma, "with")?;
            let body = self.expression()?;
            self.expect(Token::RParen, "with")?;
            return Expr::new(Tag::With, Some(index), Some(value), Some(body), None, None);
        }

        // exists($var, pred) / index($var, pred) address a product variable
        if matches!(name, "exists" | "index") && self.peek() == Some(&Token::Dollar) {
            self.pos += 1;
            let variable = self.expect_ident("product variable")?;
            self.expect(Token::Comma, name)?;
            let pred = self.expression()?;
            self.expect(Token::RParen, name)?;
            let tag = if name == "exists" {
                Tag::VariableExists
            } else {
                Tag::VariableIndex
            };
            return Expr::new(tag, Some(variable), Some(pred), None, None, None);
        }

        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            args.push(self.expression()?);
            while self.eat(&Token::Comma) {
                args.push(self.expression()?);
            }
        }
        self.expect(Token::RParen, "function call")?;

        let argc = args.len();
        let mut args = args.into_iter();
        let mut next = || args.next();

        macro_rules! build {
            ($tag:expr, $n:expr) => {{
                if argc != $n {
                    return Err(arg_count(name, $n, argc));
                }
                Expr::new($tag, None, next(), next(), next(), next())
            }};
        }

        match name {
            "abs" => build!(Tag::Abs, 1),
            "add" => build!(Tag::ArrayAdd, 2),
            "all" => build!(Tag::ArrayAll, 2),
            "at" => build!(Tag::At, 2),
            "bitoffset" => build!(Tag::BitOffset, 1),
            "bitsize" => build!(Tag::BitSize, 1),
            "byteoffset" => build!(Tag::ByteOffset, 1),
            "bytesize" => build!(Tag::ByteSize, 1),
            "bytes" => {
                if !(1..=3).contains(&argc) {
                    return Err(arg_count(name, 1, argc));
                }
                Expr::new(Tag::Bytes, None, next(), next(), next(), None)
            }
            "ceil" => build!(Tag::Ceil, 1),
            "count" => build!(Tag::ArrayCount, 2),
            "dim" => build!(Tag::Dim, 2),
            "exists" => match argc {
                1 => Expr::new(Tag::Exists, None, next(), None, None, None),
                2 => Expr::new(Tag::ArrayExists, None, next(), next(), None, None),
                _ => Err(arg_count(name, 2, argc)),
            },
            "filename" => build!(Tag::Filename, 0),
            "filesize" => build!(Tag::FileSize, 0),
            "float" => build!(Tag::Float, 1),
            "floor" => build!(Tag::Floor, 1),
            "goto" => build!(Tag::Goto, 1),
            "if" => build!(Tag::If, 3),
            "index" => match argc {
                1 => Expr::new(Tag::Index, None, next(), None, None, None),
                2 => Expr::new(Tag::ArrayIndex, None, next(), next(), None, None),
                _ => Err(arg_count(name, 2, argc)),
            },
            "int" => build!(Tag::Integer, 1),
            "isinf" => build!(Tag::IsInf, 1),
            "ismininf" => build!(Tag::IsMinInf, 1),
            "isnan" => build!(Tag::IsNan, 1),
            "isplusinf" => build!(Tag::IsPlusInf, 1),
            "length" => build!(Tag::Length, 1),
            "ltrim" => build!(Tag::Ltrim, 1),
            "max" | "min" => {
                if argc != 2 {
                    return Err(arg_count(name, 2, argc));
                }
                let a = next().unwrap();
                let b = next().unwrap();
                let tag = match (name, a.result_kind()) {
                    ("max", ResultKind::Node) => Tag::ArrayMax,
                    ("min", ResultKind::Node) => Tag::ArrayMin,
                    ("max", _) => Tag::Max,
                    (_, _) => Tag::Min,
                };
                Expr::new(tag, None, Some(a), Some(b), None, None)
            }
            "numdims" => build!(Tag::NumDims, 1),
            "numelements" => build!(Tag::NumElements, 1),
            "productclass" => build!(Tag::ProductClass, 0),
            "productformat" => build!(Tag::ProductFormat, 0),
            "producttype" => build!(Tag::ProductType, 0),
            "productversion" => build!(Tag::ProductVersion, 0),
            "regex" => {
                if !(2..=3).contains(&argc) {
                    return Err(arg_count(name, 2, argc));
                }
                Expr::new(Tag::Regex, None, next(), next(), next(), None)
            }
            "round" => build!(Tag::Round, 1),
            "rtrim" => build!(Tag::Rtrim, 1),
            "str" => {
                if !(1..=2).contains(&argc) {
                    return Err(arg_count(name, 1, argc));
                }
                Expr::new(Tag::Str, None, next(), next(), None, None)
            }
            "strtime" => {
                if !(1..=2).contains(&argc) {
                    return Err(arg_count(name, 1, argc));
                }
                Expr::new(Tag::StrTime, None, next(), next(), None, None)
            }
            "substr" => build!(Tag::Substr, 3),
            "time" => build!(Tag::Time, 2),
            "trim" => build!(Tag::Trim, 1),
            "unboundindex" => build!(Tag::UnboundArrayIndex, 2),
            other => Err(Error::InvalidFormat(format!(
                "unknown function '{other}' in expression"
            ))),
        }
    }
}

fn arg_count(name: &str, expected: usize, got: usize) -> Error {
    Error::InvalidFormat(format!(
        "wrong number of arguments for {name}() (expected {expected}, got {got})"
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(expr.to_text(), "1 + 2 * 3");
        let expr = parse("(1 + 2) * 3").unwrap();
        assert_eq!(expr.to_text(), "(1 + 2) * 3");
        let expr = parse("1 < 2 == 3 < 4").unwrap();
        assert_eq!(expr.to_text(), "1 < 2 == 3 < 4");
        let expr = parse("-2 ^ 2").unwrap();
        assert_eq!(expr.to_text(), "-2 ^ 2");
    }

    #[test]
    fn paths() {
        let expr = parse("/data/values[10]@unit").unwrap();
        assert_eq!(expr.result_kind(), ResultKind::Node);
        assert_eq!(expr.to_text(), "/data/values[10]@unit");
        let expr = parse("../sibling").unwrap();
        assert_eq!(expr.to_text(), "../sibling");
    }

    #[test]
    fn division_is_not_a_path() {
        let expr = parse("10/2").unwrap();
        assert_eq!(expr.result_kind(), ResultKind::Integer);
        let expr = parse("bitsize(/a)/8").unwrap();
        assert_eq!(expr.to_text(), "bitsize(/a) / 8");
    }

    #[test]
    fn array_functions_by_operand_kind() {
        let array = parse("max(/a, int(.))").unwrap();
        assert_eq!(array.op().tag, Tag::ArrayMax);
        let scalar = parse("max(1, 2)").unwrap();
        assert_eq!(scalar.op().tag, Tag::Max);
    }

    #[test]
    fn variables_and_control_flow() {
        let expr = parse("$sizes[i] = 4").unwrap();
        assert_eq!(expr.op().tag, Tag::VariableSet);
        let expr = parse("for i = 0 to 9 step 3 do $sizes[i] = i").unwrap();
        assert_eq!(expr.op().tag, Tag::For);
        let expr = parse("exists($sizes, $sizes[i] == 0)").unwrap();
        assert_eq!(expr.op().tag, Tag::VariableExists);
        let expr = parse("$a = 1; $b = 2").unwrap();
        assert_eq!(expr.op().tag, Tag::Sequence);
    }

    #[test]
    fn with_binds_an_index() {
        let expr = parse("with(i = 4, str(/names[i]))").unwrap();
        assert_eq!(expr.op().tag, Tag::With);
        assert_eq!(expr.result_kind(), ResultKind::String);
        assert_eq!(expr.to_text(), "with(i = 4, str(/names[i]))");
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("1 + 2 )").is_err());
        assert!(parse("unknownfn(1)").is_err());
    }
}
