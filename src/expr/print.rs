//! Render an expression tree back to its textual form.
//!
//! Three dialects: plain text, XML-escaped, and HTML with bold function
//! names and italic index variables. Parentheses are emitted only where the
//! operator precedence requires them, so printing and reparsing yields a
//! structurally equal tree.

use super::{Expr, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintDialect {
    Plain,
    Xml,
    Html,
}

/* precedence
   1: unary minus, not
   2: pow
   3: mul, div, mod
   4: add, sub
   5: lt, le, gt, ge
   6: eq, ne
   7: and
   8: or
   9: logical_and
   10: logical_or
   15: <start>
*/
const TOP: u8 = 15;

pub(crate) fn print(expr: &Expr, dialect: PrintDialect) -> String {
    let mut out = String::new();
    print_expr(&mut out, expr, dialect, TOP);
    out
}

fn keyword(out: &mut String, dialect: PrintDialect, name: &str) {
    if dialect == PrintDialect::Html {
        out.push_str("<b>");
        out.push_str(name);
        out.push_str("</b>");
    } else {
        out.push_str(name);
    }
}

fn index_name(out: &mut String, dialect: PrintDialect, name: &str) {
    if dialect == PrintDialect::Html {
        out.push_str("<i>");
        out.push_str(name);
        out.push_str("</i>");
    } else {
        out.push_str(name);
    }
}

fn call(out: &mut String, dialect: PrintDialect, name: &str, ops: &[&Expr]) {
    keyword(out, dialect, name);
    out.push('(');
    for (i, op) in ops.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        print_expr(out, op, dialect, TOP);
    }
    out.push(')');
}

fn binary(
    out: &mut String,
    dialect: PrintDialect,
    context: u8,
    own: u8,
    left: &Expr,
    op_text: &str,
    right: &Expr,
) {
    if context < own {
        out.push('(');
    }
    print_expr(out, left, dialect, own);
    out.push_str(op_text);
    print_expr(out, right, dialect, own);
    if context < own {
        out.push(')');
    }
}

fn escaped_string(out: &mut String, bytes: &[u8], dialect: PrintDialect) {
    use PrintDialect::*;
    for &byte in bytes {
        match byte {
            0x1b => out.push_str("\\e"),
            0x07 => out.push_str("\\a"),
            0x08 => out.push_str("\\b"),
            0x0c => out.push_str("\\f"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x0b => out.push_str("\\v"),
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str(if dialect == Xml { "\\&quot;" } else { "\\\"" }),
            b'<' => out.push_str(if dialect == Plain { "<" } else { "&lt;" }),
            b'>' => out.push_str(if dialect == Plain { ">" } else { "&gt;" }),
            b'&' => out.push_str(if dialect == Plain { "&" } else { "&amp;" }),
            b' ' => out.push_str(if dialect == Plain { " " } else { "&nbsp;" }),
            b if b.is_ascii_graphic() => out.push(b as char),
            b => {
                out.push_str(&format!("\\{:03o}", b));
            }
        }
    }
}

fn float_text(value: f64) -> String {
    if value.is_nan() {
        "nan".to_owned()
    } else if value == f64::INFINITY {
        "inf".to_owned()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_owned()
    } else if value == value.trunc() && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn print_expr(out: &mut String, expr: &Expr, d: PrintDialect, context: u8) {
    let op = match expr {
        Expr::ConstBool(true) => {
            keyword(out, d, "true");
            return;
        }
        Expr::ConstBool(false) => {
            keyword(out, d, "false");
            return;
        }
        Expr::ConstInt(value) => {
            out.push_str(&value.to_string());
            return;
        }
        Expr::ConstFloat(value) => {
            out.push_str(&float_text(*value));
            return;
        }
        Expr::ConstString(bytes) => {
            out.push('"');
            escaped_string(out, bytes, d);
            out.push('"');
            return;
        }
        Expr::Op(op) => op,
    };

    let id = || op.identifier.as_deref().unwrap_or_default();
    let op0 = || op.ops[0].as_deref().expect("operand 0");
    let op1 = || op.ops[1].as_deref().expect("operand 1");
    let op3 = || op.ops[3].as_deref().expect("operand 3");
    let mut ops: Vec<&Expr> = Vec::new();
    for slot in &op.ops {
        if let Some(operand) = slot.as_deref() {
            ops.push(operand);
        }
    }

    let amp = |d: PrintDialect| match d {
        PrintDialect::Plain => " & ",
        _ => " &amp; ",
    };
    let lt = |d: PrintDialect, text: &'static str, escaped: &'static str| match d {
        PrintDialect::Plain => text,
        _ => escaped,
    };

    match op.tag {
        Tag::Abs => call(out, d, "abs", &ops),
        Tag::Add => binary(out, d, context, 4, op0(), " + ", op1()),
        Tag::And => binary(out, d, context, 7, op0(), amp(d), op1()),
        Tag::ArrayAdd => call(out, d, "add", &ops),
        Tag::ArrayAll => call(out, d, "all", &ops),
        Tag::ArrayCount => call(out, d, "count", &ops),
        Tag::ArrayExists => call(out, d, "exists", &ops),
        Tag::ArrayIndex => call(out, d, "index", &ops),
        Tag::ArrayMax => call(out, d, "max", &ops),
        Tag::ArrayMin => call(out, d, "min", &ops),
        Tag::AsciiLine => keyword(out, d, "asciiline"),
        Tag::At => call(out, d, "at", &ops),
        Tag::BitOffset => call(out, d, "bitoffset", &ops),
        Tag::BitSize => call(out, d, "bitsize", &ops),
        Tag::ByteOffset => call(out, d, "byteoffset", &ops),
        Tag::ByteSize => call(out, d, "bytesize", &ops),
        Tag::Bytes => {
            keyword(out, d, "bytes");
            out.push('(');
            print_expr(out, op0(), d, TOP);
            for slot in &op.ops[1..] {
                if let Some(operand) = slot.as_deref() {
                    out.push(',');
                    print_expr(out, operand, d, TOP);
                }
            }
            out.push(')');
        }
        Tag::Ceil => call(out, d, "ceil", &ops),
        Tag::Dim => call(out, d, "dim", &ops),
        Tag::Divide => binary(out, d, context, 3, op0(), " / ", op1()),
        Tag::Equal => binary(out, d, context, 6, op0(), " == ", op1()),
        Tag::Exists => call(out, d, "exists", &ops),
        Tag::FileSize => call(out, d, "filesize", &[]),
        Tag::Filename => call(out, d, "filename", &[]),
        Tag::Float => call(out, d, "float", &ops),
        Tag::Floor => call(out, d, "floor", &ops),
        Tag::For => {
            keyword(out, d, "for");
            out.push(' ');
            index_name(out, d, id());
            out.push_str(" = ");
            print_expr(out, op0(), d, TOP);
            out.push(' ');
            keyword(out, d, "to");
            out.push(' ');
            print_expr(out, op1(), d, TOP);
            if let Some(step) = op.ops[2].as_deref() {
                out.push(' ');
                keyword(out, d, "step");
                out.push(' ');
                print_expr(out, step, d, TOP);
            }
            out.push(' ');
            keyword(out, d, "do");
            out.push_str(if d == PrintDialect::Html { "<br />" } else { " " });
            print_expr(out, op3(), d, TOP);
        }
        Tag::Goto => call(out, d, "goto", &ops),
        Tag::GotoArrayElement => {
            if let Some(base) = op.ops[0].as_deref() {
                print_expr(out, base, d, TOP);
            }
            out.push('[');
            print_expr(out, op1(), d, TOP);
            out.push(']');
        }
        Tag::GotoAttribute => {
            if let Some(base) = op.ops[0].as_deref() {
                print_expr(out, base, d, TOP);
            }
            out.push('@');
            out.push_str(id());
        }
        Tag::GotoBegin => out.push(':'),
        Tag::GotoField => {
            let base = op0();
            print_expr(out, base, d, TOP);
            if !matches!(base, Expr::Op(base_op) if base_op.tag == Tag::GotoRoot) {
                out.push('/');
            }
            out.push_str(id());
        }
        Tag::GotoHere => out.push('.'),
        Tag::GotoParent => {
            if let Some(base) = op.ops[0].as_deref() {
                print_expr(out, base, d, TOP);
                out.push('/');
            }
            out.push_str("..");
        }
        Tag::GotoRoot => out.push('/'),
        Tag::Greater => binary(out, d, context, 5, op0(), lt(d, " > ", " &gt; "), op1()),
        Tag::GreaterEqual => {
            binary(out, d, context, 5, op0(), lt(d, " >= ", " &gt;= "), op1());
        }
        Tag::If => call(out, d, "if", &ops),
        Tag::Index => call(out, d, "index", &ops),
        Tag::IndexVar => index_name(out, d, id()),
        Tag::Integer => call(out, d, "int", &ops),
        Tag::IsInf => call(out, d, "isinf", &ops),
        Tag::IsMinInf => call(out, d, "ismininf", &ops),
        Tag::IsNan => call(out, d, "isnan", &ops),
        Tag::IsPlusInf => call(out, d, "isplusinf", &ops),
        Tag::Length => call(out, d, "length", &ops),
        Tag::Less => binary(out, d, context, 5, op0(), lt(d, " < ", " &lt; "), op1()),
        Tag::LessEqual => binary(out, d, context, 5, op0(), lt(d, " <= ", " &lt;= "), op1()),
        Tag::LogicalAnd => {
            if context < 9 {
                out.push('(');
            }
            print_expr(out, op0(), d, 9);
            out.push(' ');
            keyword(out, d, "and");
            out.push(' ');
            print_expr(out, op1(), d, 9);
            if context < 9 {
                out.push(')');
            }
        }
        Tag::LogicalOr => {
            if context < 10 {
                out.push('(');
            }
            print_expr(out, op0(), d, 10);
            out.push(' ');
            keyword(out, d, "or");
            out.push(' ');
            print_expr(out, op1(), d, 10);
            if context < 10 {
                out.push(')');
            }
        }
        Tag::Ltrim => call(out, d, "ltrim", &ops),
        Tag::Max => call(out, d, "max", &ops),
        Tag::Min => call(out, d, "min", &ops),
        Tag::Modulo => binary(out, d, context, 3, op0(), " % ", op1()),
        Tag::Multiply => binary(out, d, context, 3, op0(), " * ", op1()),
        Tag::Neg => {
            out.push('-');
            print_expr(out, op0(), d, 1);
        }
        Tag::Not => {
            out.push('!');
            print_expr(out, op0(), d, 1);
        }
        Tag::NotEqual => binary(out, d, context, 6, op0(), " != ", op1()),
        Tag::NumDims => call(out, d, "numdims", &ops),
        Tag::NumElements => call(out, d, "numelements", &ops),
        Tag::Or => binary(out, d, context, 8, op0(), " | ", op1()),
        Tag::Power => binary(out, d, context, 2, op0(), " ^ ", op1()),
        Tag::ProductClass => call(out, d, "productclass", &[]),
        Tag::ProductFormat => call(out, d, "productformat", &[]),
        Tag::ProductType => call(out, d, "producttype", &[]),
        Tag::ProductVersion => call(out, d, "productversion", &[]),
        Tag::Regex => call(out, d, "regex", &ops),
        Tag::Round => call(out, d, "round", &ops),
        Tag::Rtrim => call(out, d, "rtrim", &ops),
        Tag::Sequence => {
            print_expr(out, op0(), d, TOP);
            out.push_str(if d == PrintDialect::Html { ";<br />" } else { "; " });
            print_expr(out, op1(), d, TOP);
        }
        Tag::Str => call(out, d, "str", &ops),
        Tag::StrTime => call(out, d, "strtime", &ops),
        Tag::Substr => call(out, d, "substr", &ops),
        Tag::Subtract => binary(out, d, context, 4, op0(), " - ", op1()),
        Tag::Time => call(out, d, "time", &ops),
        Tag::Trim => call(out, d, "trim", &ops),
        Tag::UnboundArrayIndex => call(out, d, "unboundindex", &ops),
        Tag::VariableExists | Tag::VariableIndex => {
            keyword(
                out,
                d,
                if op.tag == Tag::VariableExists {
                    "exists"
                } else {
                    "index"
                },
            );
            out.push('(');
            index_name(out, d, &format!("${}", id()));
            out.push_str(", ");
            print_expr(out, op0(), d, TOP);
            out.push(')');
        }
        Tag::VariableSet => {
            index_name(out, d, &format!("${}", id()));
            if let Some(index) = op.ops[0].as_deref() {
                out.push('[');
                print_expr(out, index, d, TOP);
                out.push(']');
            }
            out.push_str(" = ");
            print_expr(out, op1(), d, TOP);
        }
        Tag::VariableValue => {
            out.push('$');
            out.push_str(id());
            if let Some(index) = op.ops[0].as_deref() {
                out.push('[');
                print_expr(out, index, d, TOP);
                out.push(']');
            }
        }
        Tag::With => {
            keyword(out, d, "with");
            out.push('(');
            index_name(out, d, id());
            out.push_str(" = ");
            print_expr(out, op0(), d, TOP);
            out.push_str(", ");
            print_expr(out, op1(), d, TOP);
            out.push(')');
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::Expr;
    use super::*;

    fn round_trip(text: &str) {
        let expr = Expr::parse(text).unwrap();
        let printed = expr.to_text();
        assert_eq!(printed, text);
        let reparsed = Expr::parse(&printed).unwrap();
        assert_eq!(expr, reparsed);
    }

    #[test]
    fn round_trips() {
        round_trip("1 + 2 * 3");
        round_trip("(1 + 2) * 3");
        round_trip("-(1 + 2)");
        round_trip("!(true and false) or 1 < 2");
        round_trip("if(numelements(/a) > 0, int(/a[0]), -1)");
        round_trip("count(./arr, int(.) > 3)");
        round_trip("for i = 0 to 9 do $v[i] = i");
        round_trip("max(1, 2) + min(3.5, 4.5)");
        round_trip("regex(\"a(b)c\", str(/field), 1)");
        round_trip("substr(0, 4, str(.))");
        round_trip("bytes(/raw,0,16)");
        round_trip("length(trim(str(@unit)))");
    }

    #[test]
    fn escaped_strings() {
        let expr = Expr::parse("\"a\\tb\"").unwrap();
        assert_eq!(expr.to_text(), "\"a\\tb\"");
        let expr = Expr::parse("\"a\\001\"").unwrap();
        assert_eq!(expr.to_text(), "\"a\\001\"");
    }

    #[test]
    fn dialects() {
        let expr = Expr::parse("1 < 2 and true").unwrap();
        assert_eq!(
            expr.to_text_dialect(PrintDialect::Xml),
            "1 &lt; 2 and true"
        );
        assert_eq!(
            expr.to_text_dialect(PrintDialect::Html),
            "1 &lt; 2 <b>and</b> <b>true</b>"
        );
    }

    #[test]
    fn float_constants() {
        assert_eq!(Expr::parse("1.5").unwrap().to_text(), "1.5");
        assert_eq!(Expr::parse("2.0").unwrap().to_text(), "2.0");
        assert_eq!(Expr::parse("-inf").unwrap().to_text(), "-inf");
    }
}
