//! Tree-walking evaluation of expressions against a live cursor.
//!
//! Evaluation carries the read-only original cursor (the anchor for `:` and
//! product queries), a working cursor that navigation mutates, the three
//! `with`/`for` index registers, and the search context for
//! `exists($var, ...)` / `index($var, ...)`. Constant expressions evaluate
//! without any cursor.

use regex::bytes::Regex;

use super::{Expr, ResultKind, Tag};
use crate::cursor::Cursor;
use crate::error::{Error, Result};
use crate::options;
use crate::product::Product;
use crate::read::ipow;
use crate::time;
use crate::types::{ReadType, SpecialKind, TypeClass};

/// A string value: an owned buffer plus a window, so substring operations
/// share the parent buffer.
#[derive(Debug, Clone)]
pub(crate) struct Str {
    buf: Vec<u8>,
    offset: usize,
    len: usize,
}

impl Str {
    fn new(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Str {
            buf,
            offset: 0,
            len,
        }
    }

    fn empty() -> Self {
        Str {
            buf: Vec::new(),
            offset: 0,
            len: 0,
        }
    }

    fn bytes(&self) -> &[u8] {
        &self.buf[self.offset..self.offset + self.len]
    }

    fn window(mut self, offset: usize, len: usize) -> Self {
        let offset = offset.min(self.len);
        let len = len.min(self.len - offset);
        self.offset += offset;
        self.len = len;
        self
    }
}

struct EvalInfo<'a, 'p> {
    orig: Option<&'a Cursor<'p>>,
    cursor: Option<Cursor<'p>>,
    index: [i64; 3],
    variable_name: Option<String>,
    variable_index: i64,
}

impl<'a, 'p> EvalInfo<'a, 'p> {
    fn new(cursor: Option<&'a Cursor<'p>>) -> Self {
        EvalInfo {
            orig: cursor,
            cursor: cursor.cloned(),
            index: [0; 3],
            variable_name: None,
            variable_index: 0,
        }
    }

    fn orig(&self) -> Result<&'a Cursor<'p>> {
        self.orig.ok_or_else(no_cursor)
    }

    fn cursor(&self) -> Result<&Cursor<'p>> {
        self.cursor.as_ref().ok_or_else(no_cursor)
    }

    fn cursor_mut(&mut self) -> Result<&mut Cursor<'p>> {
        self.cursor.as_mut().ok_or_else(no_cursor)
    }

    fn product(&self) -> Result<&'p Product> {
        Ok(self.orig()?.product())
    }

    fn index_register(&self, identifier: &str) -> usize {
        match identifier {
            "j" => 1,
            "k" => 2,
            _ => 0,
        }
    }
}

fn no_cursor() -> Error {
    Error::InvalidArgument(
        "cursor argument may only be omitted if the expression is constant".to_owned(),
    )
}

impl Expr {
    pub fn eval_bool(&self, cursor: Option<&Cursor>) -> Result<bool> {
        if self.result_kind() != ResultKind::Boolean {
            return Err(Error::InvalidArgument(
                "expression is not a 'boolean' expression".to_owned(),
            ));
        }
        if cursor.is_none() && !self.is_constant() {
            return Err(no_cursor());
        }
        eval_boolean(&mut EvalInfo::new(cursor), self)
    }

    pub fn eval_integer(&self, cursor: Option<&Cursor>) -> Result<i64> {
        if self.result_kind() != ResultKind::Integer {
            return Err(Error::InvalidArgument(
                "expression is not an 'integer' expression".to_owned(),
            ));
        }
        if cursor.is_none() && !self.is_constant() {
            return Err(no_cursor());
        }
        eval_integer(&mut EvalInfo::new(cursor), self)
    }

    pub fn eval_float(&self, cursor: Option<&Cursor>) -> Result<f64> {
        if !matches!(
            self.result_kind(),
            ResultKind::Float | ResultKind::Integer
        ) {
            return Err(Error::InvalidArgument(
                "expression is not a 'float' expression".to_owned(),
            ));
        }
        if cursor.is_none() && !self.is_constant() {
            return Err(no_cursor());
        }
        eval_float(&mut EvalInfo::new(cursor), self)
    }

    pub fn eval_string(&self, cursor: Option<&Cursor>) -> Result<Vec<u8>> {
        if self.result_kind() != ResultKind::String {
            return Err(Error::InvalidArgument(
                "expression is not a 'string' expression".to_owned(),
            ));
        }
        if cursor.is_none() && !self.is_constant() {
            return Err(no_cursor());
        }
        let value = eval_string(&mut EvalInfo::new(cursor), self)?;
        Ok(value.bytes().to_vec())
    }

    /// Apply a node expression to `cursor`, moving it to the target.
    pub fn eval_node(&self, cursor: &mut Cursor) -> Result<()> {
        if self.result_kind() != ResultKind::Node {
            return Err(Error::InvalidArgument(
                "expression is not a 'node' expression".to_owned(),
            ));
        }
        let anchor = cursor.clone();
        let mut info = EvalInfo::new(Some(&anchor));
        eval_cursor(&mut info, self)?;
        *cursor = info.cursor.expect("cursor present");
        Ok(())
    }

    pub fn eval_void(&self, cursor: Option<&Cursor>) -> Result<()> {
        if self.result_kind() != ResultKind::Void {
            return Err(Error::InvalidArgument(
                "expression is not a 'void' expression".to_owned(),
            ));
        }
        if cursor.is_none() && !self.is_constant() {
            return Err(no_cursor());
        }
        eval_void(&mut EvalInfo::new(cursor), self)
    }
}

/// Walk the array at `path` with the working cursor, calling `body` per
/// element; `body` returns false to stop early. The working cursor is
/// restored afterwards.
fn for_each_element(
    info: &mut EvalInfo,
    path: &Expr,
    body: &mut dyn FnMut(&mut EvalInfo, i64) -> Result<bool>,
) -> Result<()> {
    let saved = info.cursor.clone();
    let result = (|| {
        eval_cursor(info, path)?;
        let num_elements = info.cursor()?.num_elements()?;
        if num_elements > 0 {
            info.cursor_mut()?.goto_first_array_element()?;
            for i in 0..num_elements {
                if !body(info, i)? {
                    break;
                }
                if i < num_elements - 1 {
                    info.cursor_mut()?.goto_next_array_element()?;
                }
            }
        }
        Ok(())
    })();
    info.cursor = saved;
    result
}

/// Evaluate `body` with the working cursor re-based on `path`, restoring
/// the cursor afterwards.
fn at_node<T>(
    info: &mut EvalInfo,
    path: &Expr,
    body: &mut dyn FnMut(&mut EvalInfo) -> Result<T>,
) -> Result<T> {
    let saved = info.cursor.clone();
    let result = (|| {
        eval_cursor(info, path)?;
        body(info)
    })();
    info.cursor = saved;
    result
}

fn with_index<T>(
    info: &mut EvalInfo,
    expr: &Expr,
    body: &mut dyn FnMut(&mut EvalInfo) -> Result<T>,
) -> Result<T> {
    let register = info.index_register(expr.op().identifier.as_deref().unwrap_or("i"));
    let value = eval_integer(info, expr.operand(0))?;
    let previous = info.index[register];
    info.index[register] = value;
    let result = body(info);
    info.index[register] = previous;
    result
}

fn compare_strings(a: &Str, b: &Str) -> std::cmp::Ordering {
    a.bytes().cmp(b.bytes())
}

/// The numeric value of a comparison operand; a node operand is read as a
/// double at its target.
fn operand_as_float(info: &mut EvalInfo, expr: &Expr) -> Result<f64> {
    if expr.result_kind() != ResultKind::Node {
        return eval_float(info, expr);
    }
    let saved = info.cursor.clone();
    let result = (|| {
        eval_cursor(info, expr)?;
        let cursor = info.cursor()?;
        if cursor.current_type().read_type() == ReadType::String {
            return crate::ascii::parse_double(cursor.read_string()?.as_bytes());
        }
        cursor.read_double()
    })();
    info.cursor = saved;
    result
}

fn compile_regex(info: &mut EvalInfo, pattern: &Expr) -> Result<Regex> {
    let pattern = eval_string(info, pattern)?;
    let text = String::from_utf8_lossy(pattern.bytes()).into_owned();
    // `.` matches newline; `$` anchors only at the end of the subject
    Regex::new(&format!("(?s){text}")).map_err(|err| {
        Error::Expression(format!("invalid format for regex pattern ({err})"))
    })
}

fn eval_boolean(info: &mut EvalInfo, expr: &Expr) -> Result<bool> {
    let op = match expr {
        Expr::ConstBool(value) => return Ok(*value),
        Expr::Op(op) => op,
        _ => {
            return Err(Error::Expression(
                "expression does not yield a boolean".to_owned(),
            ));
        }
    };
    // a bare node operand in a comparison reads as a number
    let float_like =
        |e: &Expr| matches!(e.result_kind(), ResultKind::Float | ResultKind::Node);
    // NaN comparisons are false for every operator, like the host floats
    let comparison = |info: &mut EvalInfo, expr: &Expr| -> Result<Option<std::cmp::Ordering>> {
        let lhs = expr.operand(0);
        let rhs = expr.operand(1);
        if float_like(lhs) || float_like(rhs) {
            let a = operand_as_float(info, lhs)?;
            let b = operand_as_float(info, rhs)?;
            Ok(a.partial_cmp(&b))
        } else if lhs.result_kind() == ResultKind::Integer {
            Ok(Some(eval_integer(info, lhs)?.cmp(&eval_integer(info, rhs)?)))
        } else {
            let a = eval_string(info, lhs)?;
            let b = eval_string(info, rhs)?;
            Ok(Some(compare_strings(&a, &b)))
        }
    };
    let equality = |info: &mut EvalInfo, expr: &Expr| -> Result<bool> {
        let lhs = expr.operand(0);
        let rhs = expr.operand(1);
        if float_like(lhs) || float_like(rhs) {
            Ok(operand_as_float(info, lhs)? == operand_as_float(info, rhs)?)
        } else if lhs.result_kind() == ResultKind::Integer {
            Ok(eval_integer(info, lhs)? == eval_integer(info, rhs)?)
        } else {
            let a = eval_string(info, lhs)?;
            let b = eval_string(info, rhs)?;
            Ok(a.bytes() == b.bytes())
        }
    };
    match op.tag {
        Tag::Equal => equality(info, expr),
        Tag::NotEqual => Ok(!equality(info, expr)?),
        Tag::Greater => Ok(comparison(info, expr)? == Some(std::cmp::Ordering::Greater)),
        Tag::GreaterEqual => Ok(matches!(
            comparison(info, expr)?,
            Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
        )),
        Tag::Less => Ok(comparison(info, expr)? == Some(std::cmp::Ordering::Less)),
        Tag::LessEqual => Ok(matches!(
            comparison(info, expr)?,
            Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
        )),
        Tag::Not => Ok(!eval_boolean(info, expr.operand(0))?),
        Tag::LogicalAnd => {
            if !eval_boolean(info, expr.operand(0))? {
                return Ok(false);
            }
            eval_boolean(info, expr.operand(1))
        }
        Tag::LogicalOr => {
            if eval_boolean(info, expr.operand(0))? {
                return Ok(true);
            }
            eval_boolean(info, expr.operand(1))
        }
        Tag::IsNan => Ok(eval_float(info, expr.operand(0))?.is_nan()),
        Tag::IsInf => Ok(eval_float(info, expr.operand(0))?.is_infinite()),
        Tag::IsPlusInf => Ok(eval_float(info, expr.operand(0))? == f64::INFINITY),
        Tag::IsMinInf => Ok(eval_float(info, expr.operand(0))? == f64::NEG_INFINITY),
        Tag::Regex => {
            let regex = compile_regex(info, expr.operand(0))?;
            let subject = eval_string(info, expr.operand(1))?;
            Ok(regex.is_match(subject.bytes()))
        }
        Tag::ArrayAll => {
            let mut all = true;
            for_each_element(info, expr.operand(0), &mut |info, _| {
                if !eval_boolean(info, expr.operand(1))? {
                    all = false;
                    return Ok(false);
                }
                Ok(true)
            })?;
            Ok(all)
        }
        Tag::ArrayExists => {
            let mut found = false;
            for_each_element(info, expr.operand(0), &mut |info, _| {
                if eval_boolean(info, expr.operand(1))? {
                    found = true;
                    return Ok(false);
                }
                Ok(true)
            })?;
            Ok(found)
        }
        Tag::Exists => {
            let saved = info.cursor.clone();
            let reachable = eval_cursor(info, expr.operand(0)).is_ok()
                && info.cursor()?.current_type().special_kind() != Some(SpecialKind::NoData);
            info.cursor = saved;
            Ok(reachable)
        }
        Tag::VariableExists => {
            let name = op.identifier.clone().expect("variable name");
            let size = info.product()?.variable_size(&name)?;
            let previous_name = info.variable_name.take();
            let previous_index = info.variable_index;
            info.variable_name = Some(name);
            let mut found = false;
            for i in 0..size {
                info.variable_index = i;
                if eval_boolean(info, expr.operand(0))? {
                    found = true;
                    break;
                }
            }
            info.variable_name = previous_name;
            info.variable_index = previous_index;
            Ok(found)
        }
        Tag::If => {
            if eval_boolean(info, expr.operand(0))? {
                eval_boolean(info, expr.operand(1))
            } else {
                eval_boolean(info, expr.operand(2))
            }
        }
        Tag::At => {
            at_node(info, expr.operand(0), &mut |info| {
                eval_boolean(info, expr.operand(1))
            })
        }
        Tag::With => with_index(info, expr, &mut |info| eval_boolean(info, expr.operand(1))),
        Tag::Abs | Tag::Neg => Err(Error::Expression(
            "expression does not yield a boolean".to_owned(),
        )),
        _ => Err(Error::Expression(format!(
            "expression ({:?}) does not yield a boolean",
            op.tag
        ))),
    }
}

fn eval_float(info: &mut EvalInfo, expr: &Expr) -> Result<f64> {
    if expr.result_kind() == ResultKind::Integer {
        return Ok(eval_integer(info, expr)? as f64);
    }
    let op = match expr {
        Expr::ConstFloat(value) => return Ok(*value),
        Expr::Op(op) => op,
        _ => {
            return Err(Error::Expression(
                "expression does not yield a float".to_owned(),
            ));
        }
    };
    match op.tag {
        Tag::Float => {
            let operand = expr.operand(0);
            match operand.result_kind() {
                ResultKind::Node => {
                    let saved = info.cursor.clone();
                    let result = (|| {
                        eval_cursor(info, operand)?;
                        let cursor = info.cursor()?;
                        // text leaves (e.g. synthesized XML) parse as numbers
                        if cursor.current_type().read_type() == ReadType::String {
                            return crate::ascii::parse_double(
                                cursor.read_string()?.as_bytes(),
                            );
                        }
                        cursor.read_double()
                    })();
                    info.cursor = saved;
                    result
                }
                ResultKind::String => {
                    let text = eval_string(info, operand)?;
                    crate::ascii::parse_double(text.bytes())
                }
                ResultKind::Boolean => Ok(if eval_boolean(info, operand)? {
                    1.0
                } else {
                    0.0
                }),
                _ => Ok(eval_float(info, operand)?),
            }
        }
        Tag::Neg => Ok(-eval_float(info, expr.operand(0))?),
        Tag::Abs => Ok(eval_float(info, expr.operand(0))?.abs()),
        Tag::Add => Ok(eval_float(info, expr.operand(0))? + eval_float(info, expr.operand(1))?),
        Tag::Subtract => {
            Ok(eval_float(info, expr.operand(0))? - eval_float(info, expr.operand(1))?)
        }
        Tag::Multiply => {
            Ok(eval_float(info, expr.operand(0))? * eval_float(info, expr.operand(1))?)
        }
        Tag::Divide => {
            let b = eval_float(info, expr.operand(1))?;
            if b == 0.0 {
                return Err(Error::Expression("division by 0 in expression".to_owned()));
            }
            Ok(eval_float(info, expr.operand(0))? / b)
        }
        Tag::Modulo => {
            let b = eval_float(info, expr.operand(1))?;
            if b == 0.0 {
                return Err(Error::Expression("modulo by 0 in expression".to_owned()));
            }
            Ok(eval_float(info, expr.operand(0))? % b)
        }
        Tag::Power => {
            let base = eval_float(info, expr.operand(0))?;
            // a literal integer exponent keeps the result bit-exact
            if let Expr::ConstInt(exponent) = expr.operand(1) {
                if exponent.abs() <= 64 {
                    return Ok(ipow(base, *exponent as i32));
                }
            }
            Ok(base.powf(eval_float(info, expr.operand(1))?))
        }
        Tag::Ceil => Ok(eval_float(info, expr.operand(0))?.ceil()),
        Tag::Floor => Ok(eval_float(info, expr.operand(0))?.floor()),
        // round half away from zero
        Tag::Round => Ok(eval_float(info, expr.operand(0))?.round()),
        Tag::Max => Ok(f64::max(
            eval_float(info, expr.operand(0))?,
            eval_float(info, expr.operand(1))?,
        )),
        Tag::Min => Ok(f64::min(
            eval_float(info, expr.operand(0))?,
            eval_float(info, expr.operand(1))?,
        )),
        Tag::Time => {
            let text = eval_string(info, expr.operand(0))?;
            let format = eval_string(info, expr.operand(1))?;
            time::string_to_double(
                &String::from_utf8_lossy(text.bytes()),
                &String::from_utf8_lossy(format.bytes()),
            )
        }
        Tag::ArrayAdd => {
            let mut total = 0.0;
            for_each_element(info, expr.operand(0), &mut |info, _| {
                total += eval_float(info, expr.operand(1))?;
                Ok(true)
            })?;
            Ok(total)
        }
        Tag::ArrayMax => {
            let mut max = 0.0;
            for_each_element(info, expr.operand(0), &mut |info, i| {
                let value = eval_float(info, expr.operand(1))?;
                if i == 0 || value > max {
                    max = value;
                }
                Ok(true)
            })?;
            Ok(max)
        }
        Tag::ArrayMin => {
            let mut min = 0.0;
            for_each_element(info, expr.operand(0), &mut |info, i| {
                let value = eval_float(info, expr.operand(1))?;
                if i == 0 || value < min {
                    min = value;
                }
                Ok(true)
            })?;
            Ok(min)
        }
        Tag::If => {
            if eval_boolean(info, expr.operand(0))? {
                eval_float(info, expr.operand(1))
            } else {
                eval_float(info, expr.operand(2))
            }
        }
        Tag::At => at_node(info, expr.operand(0), &mut |info| {
            eval_float(info, expr.operand(1))
        }),
        Tag::With => with_index(info, expr, &mut |info| eval_float(info, expr.operand(1))),
        _ => Err(Error::Expression(format!(
            "expression ({:?}) does not yield a float",
            op.tag
        ))),
    }
}

fn eval_integer(info: &mut EvalInfo, expr: &Expr) -> Result<i64> {
    let op = match expr {
        Expr::ConstInt(value) => return Ok(*value),
        Expr::Op(op) => op,
        _ => {
            return Err(Error::Expression(
                "expression does not yield an integer".to_owned(),
            ));
        }
    };
    match op.tag {
        Tag::Integer => {
            let operand = expr.operand(0);
            match operand.result_kind() {
                ResultKind::Node => {
                    let saved = info.cursor.clone();
                    let result = (|| {
                        eval_cursor(info, operand)?;
                        // raw stored value: conversions are bypassed
                        let mut overlay = options::get();
                        overlay.perform_conversions = false;
                        let cursor = info.cursor()?;
                        options::with_overlay(overlay, || {
                            match cursor.current_type().read_type() {
                                ReadType::UInt64 => {
                                    cursor.read_uint64().map(|value| value as i64)
                                }
                                // text leaves parse as numbers
                                ReadType::String => crate::ascii::parse_int64(
                                    cursor.read_string()?.as_bytes(),
                                ),
                                _ => cursor.read_int64(),
                            }
                        })
                    })();
                    info.cursor = saved;
                    result
                }
                ResultKind::Boolean => Ok(i64::from(eval_boolean(info, operand)?)),
                ResultKind::String => {
                    let text = eval_string(info, operand)?;
                    crate::ascii::parse_int64(text.bytes())
                }
                _ => eval_integer(info, operand),
            }
        }
        Tag::Neg => Ok(-eval_integer(info, expr.operand(0))?),
        Tag::Abs => Ok(eval_integer(info, expr.operand(0))?.abs()),
        Tag::Add => {
            Ok(eval_integer(info, expr.operand(0))? + eval_integer(info, expr.operand(1))?)
        }
        Tag::Subtract => {
            Ok(eval_integer(info, expr.operand(0))? - eval_integer(info, expr.operand(1))?)
        }
        Tag::Multiply => {
            Ok(eval_integer(info, expr.operand(0))? * eval_integer(info, expr.operand(1))?)
        }
        Tag::Divide => {
            let b = eval_integer(info, expr.operand(1))?;
            if b == 0 {
                return Err(Error::Expression("division by 0 in expression".to_owned()));
            }
            Ok(eval_integer(info, expr.operand(0))? / b)
        }
        Tag::Modulo => {
            let b = eval_integer(info, expr.operand(1))?;
            if b == 0 {
                return Err(Error::Expression("modulo by 0 in expression".to_owned()));
            }
            Ok(eval_integer(info, expr.operand(0))? % b)
        }
        Tag::And => {
            Ok(eval_integer(info, expr.operand(0))? & eval_integer(info, expr.operand(1))?)
        }
        Tag::Or => {
            Ok(eval_integer(info, expr.operand(0))? | eval_integer(info, expr.operand(1))?)
        }
        Tag::Max => Ok(i64::max(
            eval_integer(info, expr.operand(0))?,
            eval_integer(info, expr.operand(1))?,
        )),
        Tag::Min => Ok(i64::min(
            eval_integer(info, expr.operand(0))?,
            eval_integer(info, expr.operand(1))?,
        )),
        Tag::IndexVar => {
            let register = info.index_register(op.identifier.as_deref().unwrap_or("i"));
            Ok(info.index[register])
        }
        Tag::Length => {
            let operand = expr.operand(0);
            if operand.result_kind() == ResultKind::Node {
                at_node(info, operand, &mut |info| {
                    info.cursor()?.string_length()
                })
            } else {
                Ok(eval_string(info, operand)?.bytes().len() as i64)
            }
        }
        Tag::BitSize => at_node(info, expr.operand(0), &mut |info| {
            info.cursor()?.bit_size()
        }),
        Tag::ByteSize => at_node(info, expr.operand(0), &mut |info| {
            info.cursor()?.byte_size()
        }),
        Tag::BitOffset => at_node(info, expr.operand(0), &mut |info| {
            info.cursor()?.file_bit_offset()
        }),
        Tag::ByteOffset => at_node(info, expr.operand(0), &mut |info| {
            Ok(info.cursor()?.file_bit_offset()? / 8)
        }),
        Tag::NumElements => at_node(info, expr.operand(0), &mut |info| {
            info.cursor()?.num_elements()
        }),
        Tag::NumDims => at_node(info, expr.operand(0), &mut |info| {
            Ok(info.cursor()?.array_dim()?.0 as i64)
        }),
        Tag::Dim => {
            let which = eval_integer(info, expr.operand(1))?;
            at_node(info, expr.operand(0), &mut |info| {
                let (num_dims, dims) = info.cursor()?.array_dim()?;
                if which < 0 || which >= num_dims as i64 {
                    return Err(Error::Expression(format!(
                        "dimension index ({which}) exceeds array rank ({num_dims})"
                    )));
                }
                Ok(dims[which as usize])
            })
        }
        Tag::Index => at_node(info, expr.operand(0), &mut |info| {
            Ok(info.cursor()?.index())
        }),
        Tag::FileSize => Ok(info.product()?.file_size()),
        Tag::ProductVersion => Ok(info.product()?.product_version()),
        Tag::ArrayCount => {
            let mut count = 0;
            for_each_element(info, expr.operand(0), &mut |info, _| {
                if eval_boolean(info, expr.operand(1))? {
                    count += 1;
                }
                Ok(true)
            })?;
            Ok(count)
        }
        Tag::ArrayAdd => {
            let mut total = 0;
            for_each_element(info, expr.operand(0), &mut |info, _| {
                total += eval_integer(info, expr.operand(1))?;
                Ok(true)
            })?;
            Ok(total)
        }
        Tag::ArrayMax => {
            let mut max = 0;
            for_each_element(info, expr.operand(0), &mut |info, i| {
                let value = eval_integer(info, expr.operand(1))?;
                if i == 0 || value > max {
                    max = value;
                }
                Ok(true)
            })?;
            Ok(max)
        }
        Tag::ArrayMin => {
            let mut min = 0;
            for_each_element(info, expr.operand(0), &mut |info, i| {
                let value = eval_integer(info, expr.operand(1))?;
                if i == 0 || value < min {
                    min = value;
                }
                Ok(true)
            })?;
            Ok(min)
        }
        Tag::ArrayIndex => {
            let mut found = -1;
            for_each_element(info, expr.operand(0), &mut |info, i| {
                if eval_boolean(info, expr.operand(1))? {
                    found = i;
                    return Ok(false);
                }
                Ok(true)
            })?;
            Ok(found)
        }
        Tag::UnboundArrayIndex => {
            // streaming scan: boundary checks are off while walking
            let saved = info.cursor.clone();
            let mut overlay = options::get();
            overlay.perform_boundary_checks = false;
            let result = (|| {
                eval_cursor(info, expr.operand(0))?;
                options::with_overlay(overlay, || {
                    info.cursor_mut()?.goto_first_array_element()?;
                    let mut index: i64 = 0;
                    loop {
                        if eval_boolean(info, expr.operand(1))? {
                            return Ok(index);
                        }
                        index += 1;
                        info.cursor_mut()?.goto_next_array_element()?;
                    }
                })
            })();
            info.cursor = saved;
            result
        }
        Tag::VariableValue => {
            let name = op.identifier.clone().expect("variable name");
            let product = info.product()?;
            if info.variable_name.as_deref() == Some(name.as_str()) {
                if expr.opt_operand(0).is_some() {
                    return Err(Error::Expression(format!(
                        "product variable '${name}' can not be indexed inside its own \
                         search scope"
                    )));
                }
                return product.variable_value(&name, info.variable_index);
            }
            let index = match expr.opt_operand(0) {
                Some(index) => eval_integer(info, index)?,
                None => 0,
            };
            info.product()?.variable_value(&name, index)
        }
        Tag::VariableIndex => {
            let name = op.identifier.clone().expect("variable name");
            let size = info.product()?.variable_size(&name)?;
            let previous_name = info.variable_name.take();
            let previous_index = info.variable_index;
            info.variable_name = Some(name);
            let mut found = -1;
            for i in 0..size {
                info.variable_index = i;
                if eval_boolean(info, expr.operand(0))? {
                    found = i;
                    break;
                }
            }
            info.variable_name = previous_name;
            info.variable_index = previous_index;
            Ok(found)
        }
        Tag::If => {
            if eval_boolean(info, expr.operand(0))? {
                eval_integer(info, expr.operand(1))
            } else {
                eval_integer(info, expr.operand(2))
            }
        }
        Tag::At => at_node(info, expr.operand(0), &mut |info| {
            eval_integer(info, expr.operand(1))
        }),
        Tag::With => with_index(info, expr, &mut |info| eval_integer(info, expr.operand(1))),
        _ => Err(Error::Expression(format!(
            "expression ({:?}) does not yield an integer",
            op.tag
        ))),
    }
}

fn eval_string(info: &mut EvalInfo, expr: &Expr) -> Result<Str> {
    let op = match expr {
        Expr::ConstString(bytes) => return Ok(Str::new(bytes.clone())),
        Expr::Op(op) => op,
        _ => {
            return Err(Error::Expression(
                "expression does not yield a string".to_owned(),
            ));
        }
    };
    match op.tag {
        Tag::Str => {
            let max_length = match expr.opt_operand(1) {
                Some(length) => Some(eval_integer(info, length)?),
                None => None,
            };
            let value = at_node(info, expr.operand(0), &mut |info| {
                let cursor = info.cursor()?;
                if cursor.has_ascii_content()? {
                    return Ok(cursor.read_string()?.into_bytes());
                }
                // numbers serialize through base 10
                let read_type = cursor.current_type().read_type();
                if read_type == ReadType::UInt64 {
                    Ok(cursor.read_uint64()?.to_string().into_bytes())
                } else if read_type.is_integer() {
                    Ok(cursor.read_int64()?.to_string().into_bytes())
                } else {
                    Err(Error::InvalidType(
                        "cursor does not refer to text".to_owned(),
                    ))
                }
            })?;
            let mut value = Str::new(value);
            if let Some(max_length) = max_length {
                let max_length = usize::try_from(max_length).unwrap_or(0);
                value = value.window(0, max_length);
            }
            Ok(value)
        }
        Tag::Substr => {
            let offset = eval_integer(info, expr.operand(0))?;
            let length = eval_integer(info, expr.operand(1))?;
            let value = eval_string(info, expr.operand(2))?;
            if offset < 0 || length < 0 {
                return Err(Error::Expression(format!(
                    "invalid substring range ({offset}, {length})"
                )));
            }
            Ok(value.window(offset as usize, length as usize))
        }
        Tag::Ltrim | Tag::Rtrim | Tag::Trim => {
            let mut value = eval_string(info, expr.operand(0))?;
            let is_space = |b: u8| matches!(b, b' ' | b'\t' | b'\n' | b'\r');
            if matches!(op.tag, Tag::Ltrim | Tag::Trim) {
                while value.len > 0 && is_space(value.buf[value.offset]) {
                    value.offset += 1;
                    value.len -= 1;
                }
            }
            if matches!(op.tag, Tag::Rtrim | Tag::Trim) {
                while value.len > 0 && is_space(value.buf[value.offset + value.len - 1]) {
                    value.len -= 1;
                }
            }
            Ok(value)
        }
        Tag::Bytes => {
            let offset = match expr.opt_operand(1) {
                Some(offset) => eval_integer(info, offset)?,
                None => 0,
            };
            let length = match expr.opt_operand(2) {
                Some(length) => Some(eval_integer(info, length)?),
                None => None,
            };
            at_node(info, expr.operand(0), &mut |info| {
                let cursor = info.cursor()?;
                let length = match length {
                    Some(length) => length,
                    None => cursor.byte_size()? - offset,
                };
                if length < 0 {
                    return Ok(Str::empty());
                }
                let mut buffer = vec![0u8; length as usize];
                cursor.read_bytes(offset, length, &mut buffer)?;
                Ok(Str::new(buffer))
            })
        }
        Tag::Regex => {
            let regex = compile_regex(info, expr.operand(0))?;
            let subject = eval_string(info, expr.operand(1))?;
            let group = expr.operand(2);
            let group_index = if group.result_kind() == ResultKind::Integer {
                usize::try_from(eval_integer(info, group)?).map_err(|_| {
                    Error::Expression("negative substring index for regex".to_owned())
                })?
            } else {
                let name = eval_string(info, group)?;
                let name = String::from_utf8_lossy(name.bytes()).into_owned();
                if name.is_empty() {
                    return Err(Error::Expression(
                        "invalid substring name parameter for regex (empty string)".to_owned(),
                    ));
                }
                regex
                    .capture_names()
                    .position(|candidate| candidate == Some(name.as_str()))
                    .ok_or_else(|| {
                        Error::Expression(
                            "invalid substring name parameter for regex (substring name not \
                             in pattern)"
                                .to_owned(),
                        )
                    })?
            };
            match regex.captures(subject.bytes()) {
                Some(captures) => match captures.get(group_index) {
                    Some(capture) => {
                        let (start, end) = (capture.start(), capture.end());
                        Ok(subject.window(start, end - start))
                    }
                    None => Ok(Str::empty()),
                },
                None => Ok(Str::empty()),
            }
        }
        Tag::StrTime => {
            let value = eval_float(info, expr.operand(0))?;
            let format = match expr.opt_operand(1) {
                Some(format) => {
                    let format = eval_string(info, format)?;
                    if format.bytes().is_empty() {
                        return Err(Error::Expression("empty time format".to_owned()));
                    }
                    String::from_utf8_lossy(format.bytes()).into_owned()
                }
                None => time::DEFAULT_FORMAT.to_owned(),
            };
            Ok(Str::new(time::double_to_string(value, &format)?.into_bytes()))
        }
        Tag::Filename => {
            let filename = info.product()?.filename();
            let basename = filename
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(filename);
            Ok(Str::new(basename.as_bytes().to_vec()))
        }
        Tag::ProductClass => Ok(Str::new(
            info.product()?
                .product_class()
                .unwrap_or_default()
                .as_bytes()
                .to_vec(),
        )),
        Tag::ProductType => Ok(Str::new(
            info.product()?
                .product_type()
                .unwrap_or_default()
                .as_bytes()
                .to_vec(),
        )),
        Tag::ProductFormat => Ok(Str::new(
            info.product()?.format().name().as_bytes().to_vec(),
        )),
        Tag::If => {
            if eval_boolean(info, expr.operand(0))? {
                eval_string(info, expr.operand(1))
            } else {
                eval_string(info, expr.operand(2))
            }
        }
        Tag::At => at_node(info, expr.operand(0), &mut |info| {
            eval_string(info, expr.operand(1))
        }),
        Tag::With => with_index(info, expr, &mut |info| eval_string(info, expr.operand(1))),
        _ => Err(Error::Expression(format!(
            "expression ({:?}) does not yield a string",
            op.tag
        ))),
    }
}

fn eval_void(info: &mut EvalInfo, expr: &Expr) -> Result<()> {
    let op = expr.op();
    match op.tag {
        Tag::For => {
            let register = info.index_register(op.identifier.as_deref().unwrap_or("i"));
            let from = eval_integer(info, expr.operand(0))?;
            let to = eval_integer(info, expr.operand(1))?;
            let step = match expr.opt_operand(2) {
                Some(step) => {
                    let step = eval_integer(info, step)?;
                    if step == 0 {
                        return Err(Error::Expression(
                            "step is 0 in for loop in expression".to_owned(),
                        ));
                    }
                    step
                }
                None => 1,
            };
            let previous = info.index[register];
            let mut i = from;
            let result = loop {
                if (step > 0 && i > to) || (step < 0 && i < to) {
                    break Ok(());
                }
                info.index[register] = i;
                if let Err(err) = eval_void(info, expr.operand(3)) {
                    break Err(err);
                }
                i += step;
            };
            info.index[register] = previous;
            result
        }
        Tag::Goto => eval_cursor(info, expr.operand(0)),
        Tag::Sequence => {
            eval_void(info, expr.operand(0))?;
            eval_void(info, expr.operand(1))
        }
        Tag::VariableSet => {
            let name = op.identifier.clone().expect("variable name");
            let index = match expr.opt_operand(0) {
                Some(index) => eval_integer(info, index)?,
                None => 0,
            };
            let value = eval_integer(info, expr.operand(1))?;
            info.product()?.variable_set(&name, index, value)
        }
        _ => Err(Error::Expression(format!(
            "expression ({:?}) is not a void expression",
            op.tag
        ))),
    }
}

fn eval_cursor(info: &mut EvalInfo, expr: &Expr) -> Result<()> {
    let op = expr.op();
    match op.tag {
        Tag::GotoHere => Ok(()),
        Tag::GotoBegin => {
            info.cursor = Some(info.orig()?.clone());
            Ok(())
        }
        Tag::GotoRoot => info.cursor_mut()?.goto_root(),
        Tag::GotoField => {
            if let Some(base) = expr.opt_operand(0) {
                eval_cursor(info, base)?;
            }
            let cursor = info.cursor_mut()?;
            // for special types the base type is used to traverse records
            if cursor.current_type().class() == TypeClass::Special {
                cursor.use_base_type_of_special_type()?;
            }
            match &op.identifier {
                Some(name) => {
                    let name = name.clone();
                    info.cursor_mut()?
                        .goto_record_field_by_name(&name)
                        .map_err(|err| err.with_path(&expr.to_text()))
                }
                None => {
                    let index = eval_integer(info, expr.operand(1))?;
                    let index = usize::try_from(index).map_err(|_| {
                        Error::InvalidIndex(format!("field index ({index}) is negative"))
                    })?;
                    info.cursor_mut()?.goto_record_field_by_index(index)
                }
            }
        }
        Tag::GotoArrayElement => {
            match expr.opt_operand(0) {
                Some(base) => eval_cursor(info, base)?,
                None => info.cursor_mut()?.goto_root()?,
            }
            let index = eval_integer(info, expr.operand(1))?;
            // expression-triggered boundary violations are reported even
            // when the global boundary option is off
            if !options::get().perform_boundary_checks {
                let cursor = info.cursor()?;
                if cursor.current_type().class() != TypeClass::Array {
                    return Err(Error::InvalidType(format!(
                        "cursor does not refer to an array (current type is {})",
                        cursor.current_type().class()
                    )));
                }
                let num_elements = cursor.num_elements()?;
                if index < 0 || index >= num_elements {
                    return Err(Error::array_index(index, num_elements));
                }
            }
            info.cursor_mut()?.goto_array_element_by_index(index)
        }
        Tag::GotoParent => {
            if let Some(base) = expr.opt_operand(0) {
                eval_cursor(info, base)?;
            }
            info.cursor_mut()?.goto_parent()
        }
        Tag::GotoAttribute => {
            if let Some(base) = expr.opt_operand(0) {
                eval_cursor(info, base)?;
            }
            let name = op.identifier.clone().expect("attribute name");
            let cursor = info.cursor_mut()?;
            cursor.goto_attributes()?;
            cursor
                .goto_record_field_by_name(&name)
                .map_err(|err| err.with_path(&expr.to_text()))
        }
        Tag::AsciiLine => info.cursor_mut()?.goto_asciilines(),
        _ => Err(Error::Expression(format!(
            "expression ({:?}) is not a node expression",
            op.tag
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn int(text: &str) -> i64 {
        Expr::parse(text).unwrap().eval_integer(None).unwrap()
    }

    fn float(text: &str) -> f64 {
        Expr::parse(text).unwrap().eval_float(None).unwrap()
    }

    fn boolean(text: &str) -> bool {
        Expr::parse(text).unwrap().eval_bool(None).unwrap()
    }

    fn string(text: &str) -> Vec<u8> {
        Expr::parse(text).unwrap().eval_string(None).unwrap()
    }

    #[test]
    fn arithmetic() {
        assert_eq!(int("1 + 2 * 3"), 7);
        assert_eq!(int("(7 / 2) % 2"), 1);
        assert_eq!(int("abs(-4)"), 4);
        assert_eq!(int("max(3, min(9, 5))"), 5);
        assert_eq!(float("1 + 0.5"), 1.5);
        assert_eq!(float("2 ^ 10"), 1024.0);
        assert_eq!(float("2.0 ^ -2"), 0.25);
    }

    #[test]
    fn division_by_zero() {
        let err = Expr::parse("1 / 0").unwrap().eval_integer(None).unwrap_err();
        assert!(matches!(err, Error::Expression(_)));
        let err = Expr::parse("1 % 0").unwrap().eval_integer(None).unwrap_err();
        assert!(matches!(err, Error::Expression(_)));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(float("round(0.5)"), 1.0);
        assert_eq!(float("round(-0.5)"), -1.0);
        assert_eq!(float("round(2.4)"), 2.0);
        assert_eq!(float("floor(-0.5)"), -1.0);
        assert_eq!(float("ceil(0.25)"), 1.0);
    }

    #[test]
    fn comparisons_and_logic() {
        assert!(boolean("1 < 2 and 2 <= 2"));
        assert!(boolean("\"abc\" < \"abd\""));
        assert!(boolean("\"ab\" < \"abc\""));
        assert!(boolean("!(1 == 2) or false"));
        assert!(boolean("isnan(0.0 ^ inf * 0 + nan)"));
        assert!(boolean("isplusinf(inf)"));
        assert!(boolean("ismininf(-inf)"));
    }

    #[test]
    fn short_circuit() {
        // the right operand would divide by zero
        assert!(!boolean("false and 1 / 0 == 0"));
        assert!(boolean("true or 1 / 0 == 0"));
    }

    #[test]
    fn string_functions() {
        assert_eq!(string("substr(1, 2, \"abcd\")"), b"bc".to_vec());
        assert_eq!(string("trim(\"  a b  \")"), b"a b".to_vec());
        assert_eq!(string("ltrim(\" x \")"), b"x ".to_vec());
        assert_eq!(string("rtrim(\" x \")"), b" x".to_vec());
        assert_eq!(int("length(\"four\")"), 4);
    }

    #[test]
    fn regex_matching() {
        assert!(boolean("regex(\"^ab+c$\", \"abbbc\")"));
        assert!(!boolean("regex(\"^ab+c$\", \"adc\")"));
        // `.` matches newline
        assert!(boolean("regex(\"a.c\", \"a\\nc\")"));
        assert_eq!(string("regex(\"a(b+)c\", \"abbc\", 1)"), b"bb".to_vec());
        assert_eq!(string("regex(\"a(b+)c\", \"xyz\", 1)"), b"".to_vec());
        assert_eq!(
            string("regex(\"(?P<mid>b+)\", \"abbc\", \"mid\")"),
            b"bb".to_vec()
        );
    }

    #[test]
    fn time_functions() {
        assert_eq!(
            string("strtime(0.0)"),
            b"2000-01-01T00:00:00.000000".to_vec()
        );
        assert_eq!(
            float("time(\"2000-01-02T00:00:00\", \"yyyy-MM-dd'T'HH:mm:ss\")"),
            86400.0
        );
    }

    #[test]
    fn with_rebinds_an_index() {
        assert_eq!(int("with(i = 7, i + 1)"), 8);
        assert_eq!(int("with(j = 2, with(i = 3, i * j))"), 6);
        // the previous binding is restored
        assert_eq!(int("with(i = 7, with(i = 1, i) + i)"), 8);
    }

    #[test]
    fn constant_folding_matches_runtime() {
        for text in ["1 + 2", "2 ^ 8", "if(1 < 2, 10, 20)", "int(\"42\")"] {
            let expr = Expr::parse(text).unwrap();
            assert!(expr.is_constant(), "{text}");
        }
        assert_eq!(int("if(1 < 2, 10, 20)"), 10);
        assert_eq!(int("int(\"42\")"), 42);
        assert_eq!(float("float(\"2.5\")"), 2.5);
    }

    #[test]
    fn non_constant_requires_cursor() {
        let expr = Expr::parse("filesize()").unwrap();
        assert!(matches!(
            expr.eval_integer(None),
            Err(Error::InvalidArgument(_))
        ));
    }
}
