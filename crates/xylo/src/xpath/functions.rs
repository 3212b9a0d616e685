//! Compiled predicate machinery: argument getters, operator evaluation, and
//! the named function library.
//!
//! A compiled expression is a closure over `(&Document, NodeId)` returning a
//! typed [`Value`]. Argument getters produce [`ArgValue`] pairs that remember
//! the token kind they came from, so integer and boolean coercions can
//! validate their operands.

use std::rc::Rc;

use lazy_static::lazy_static;
use rustc_hash::FxHashMap;

use crate::element::{Document, NodeId};
use crate::tokenize::Token;

use super::lexer::ExprToken;
use super::XpathError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    /// Truthiness: booleans as-is, nonzero integers, non-empty strings.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::Str(value) => !value.is_empty(),
        }
    }

    /// The string form used when a result feeds another expression or a
    /// projection step.
    pub fn render(&self) -> String {
        match self {
            Value::Bool(true) => "true".to_owned(),
            Value::Bool(false) => "false".to_owned(),
            Value::Int(value) => value.to_string(),
            Value::Str(value) => value.clone(),
        }
    }
}

/// An evaluated argument: the token kind it originated from plus its string
/// value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgValue {
    pub kind: ExprToken,
    pub value: String,
}

pub type ArgGetter = Rc<dyn Fn(&Document, NodeId) -> Result<ArgValue, XpathError>>;
pub type EvalExpr = Rc<dyn Fn(&Document, NodeId) -> Result<Value, XpathError>>;

type BuiltinFn = fn(&Document, NodeId, &[ArgValue]) -> Result<Value, XpathError>;

/// Wrap a compiled expression so it can act as the left-hand argument of a
/// following operator.
pub fn wrap_expr(kind: ExprToken, expr: EvalExpr) -> ArgGetter {
    Rc::new(move |doc, id| {
        Ok(ArgValue {
            kind,
            value: expr(doc, id)?.render(),
        })
    })
}

/// Compile a literal or attribute reference into a getter.
pub fn compile_argument(token: &Token<ExprToken>) -> ArgGetter {
    let kind = token.kind;
    let raw = String::from_utf8_lossy(&token.value).into_owned();
    Rc::new(move |doc, id| {
        if kind == ExprToken::Integer && !is_digits(&raw) {
            return Err(XpathError::InvalidInteger(raw.clone()));
        }
        let value = if kind == ExprToken::Variable {
            doc.attr(id, &raw).unwrap_or("").to_owned()
        } else {
            raw.clone()
        };
        Ok(ArgValue { kind, value })
    })
}

/// Materialize a predicate from an operator or function token and its
/// accumulated arguments. Argument counts are validated here, at compile
/// time, so a malformed fold surfaces before any node is evaluated.
pub fn compile_action(
    action: &Token<ExprToken>,
    args: Vec<ArgGetter>,
) -> Result<EvalExpr, XpathError> {
    let (name, expected, func): (&'static str, usize, BuiltinFn) = match action.kind {
        ExprToken::Equals => ("=", 2, compare_eq),
        ExprToken::And => ("and", 2, compare_and),
        ExprToken::Or => ("or", 2, compare_or),
        ExprToken::Lt => ("<", 2, compare_lt),
        ExprToken::Lte => ("<=", 2, compare_lte),
        ExprToken::Gt => (">", 2, compare_gt),
        ExprToken::Gte => (">=", 2, compare_gte),
        ExprToken::Function => {
            let raw = String::from_utf8_lossy(&action.value).into_owned();
            match FUNCTIONS.get_key_value(raw.as_str()) {
                Some((&name, &(expected, func))) => (name, expected, func),
                None => return Err(XpathError::UnsupportedFunction(raw)),
            }
        }
        _ => {
            return Err(XpathError::UnsupportedToken(
                String::from_utf8_lossy(&action.value).into_owned(),
            ));
        }
    };
    if args.len() != expected {
        return Err(XpathError::InvalidArguments {
            function: name,
            expected,
            got: args.len(),
        });
    }
    Ok(Rc::new(move |doc, id| {
        let mut values = Vec::with_capacity(args.len());
        for getter in &args {
            values.push(getter(doc, id)?);
        }
        func(doc, id, &values)
    }))
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn get_int(arg: &ArgValue) -> Result<i64, XpathError> {
    if !is_digits(&arg.value) {
        return Err(XpathError::InvalidInteger(arg.value.clone()));
    }
    arg.value
        .parse()
        .map_err(|_| XpathError::InvalidInteger(arg.value.clone()))
}

fn get_bool(arg: &ArgValue) -> Result<bool, XpathError> {
    match arg.value.as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(XpathError::InvalidBoolean(arg.value.clone())),
    }
}

/// Interpret an argument according to the token kind it came from.
fn get_value(arg: &ArgValue) -> Result<Value, XpathError> {
    match arg.kind {
        ExprToken::Variable | ExprToken::String => Ok(Value::Str(arg.value.clone())),
        ExprToken::Integer => Ok(Value::Int(get_int(arg)?)),
        _ => Ok(Value::Bool(arg.value == "true")),
    }
}

fn arity<'a, const N: usize>(
    name: &'static str,
    args: &'a [ArgValue],
) -> Result<&'a [ArgValue; N], XpathError> {
    args.try_into().map_err(|_| XpathError::InvalidArguments {
        function: name,
        expected: N,
        got: args.len(),
    })
}

// Operators.

fn compare_eq(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>("=", args)?;
    Ok(Value::Bool(one.value == two.value))
}

fn compare_and(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>("and", args)?;
    Ok(Value::Bool(
        get_value(one)?.truthy() && get_value(two)?.truthy(),
    ))
}

fn compare_or(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>("or", args)?;
    Ok(Value::Bool(
        get_value(one)?.truthy() || get_value(two)?.truthy(),
    ))
}

fn compare_lt(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>("<", args)?;
    Ok(Value::Bool(get_int(one)? < get_int(two)?))
}

fn compare_lte(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>("<=", args)?;
    Ok(Value::Bool(get_int(one)? <= get_int(two)?))
}

fn compare_gt(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>(">", args)?;
    Ok(Value::Bool(get_int(one)? > get_int(two)?))
}

fn compare_gte(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>(">=", args)?;
    Ok(Value::Bool(get_int(one)? >= get_int(two)?))
}

// Node functions.

/// 1-based child-index test.
fn index(doc: &Document, id: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [want] = arity::<1>("index", args)?;
    let want = get_int(want)?;
    let parent = match doc.parent(id) {
        Some(parent) => parent,
        None => return Ok(Value::Bool(false)),
    };
    let at = doc.children(parent).iter().position(|&child| child == id);
    Ok(Value::Bool(
        at.map_or(false, |at| (at + 1) as i64 == want),
    ))
}

fn name(doc: &Document, id: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    arity::<0>("name", args)?;
    Ok(Value::Str(doc.tag(id).to_owned()))
}

/// Element text plus a space-joined run of each child's tail.
fn text(doc: &Document, id: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    arity::<0>("text", args)?;
    let mut out = doc.text(id).unwrap_or("").to_owned();
    for &child in doc.children(id) {
        if let Some(tail) = doc.tail(child) {
            if !tail.is_empty() {
                out.push(' ');
                out.push_str(tail);
            }
        }
    }
    Ok(Value::Str(out))
}

fn count(doc: &Document, id: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [tag] = arity::<1>("count", args)?;
    let total = doc
        .children(id)
        .iter()
        .filter(|&&child| doc.tag(child) == tag.value)
        .count();
    Ok(Value::Int(total as i64))
}

/// 0-based index among the parent's children; 0 at the root.
fn position(doc: &Document, id: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    arity::<0>("position", args)?;
    let at = doc
        .parent(id)
        .and_then(|parent| doc.children(parent).iter().position(|&child| child == id))
        .unwrap_or(0);
    Ok(Value::Int(at as i64))
}

fn last(doc: &Document, id: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    arity::<0>("last", args)?;
    match doc.parent(id) {
        Some(parent) => {
            let children = doc.children(parent);
            Ok(Value::Bool(children.last() == Some(&id)))
        }
        None => Ok(Value::Bool(true)),
    }
}

// Boolean functions.

fn not_fn(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [arg] = arity::<1>("not", args)?;
    Ok(Value::Bool(!get_bool(arg)?))
}

fn notempty(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [arg] = arity::<1>("notempty", args)?;
    Ok(Value::Bool(!arg.value.is_empty()))
}

// String functions.

fn contains(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>("contains", args)?;
    Ok(Value::Bool(one.value.contains(&two.value)))
}

fn starts_with(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>("starts-with", args)?;
    Ok(Value::Bool(one.value.starts_with(&two.value)))
}

fn ends_with(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>("ends-with", args)?;
    Ok(Value::Bool(one.value.ends_with(&two.value)))
}

fn concat(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [one, two] = arity::<2>("concat", args)?;
    Ok(Value::Str(format!("{}{}", one.value, two.value)))
}

/// Character slice `[start, end)`, clamped to the input.
fn substring(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [base, start, end] = arity::<3>("substring", args)?;
    let start = get_int(start)? as usize;
    let end = get_int(end)? as usize;
    let taken = base
        .value
        .chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect();
    Ok(Value::Str(taken))
}

fn substring_before(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [base, sub] = arity::<2>("substring-before", args)?;
    let at = base.value.find(&sub.value).unwrap_or(base.value.len());
    Ok(Value::Str(base.value[..at].to_owned()))
}

fn substring_after(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [base, sub] = arity::<2>("substring-after", args)?;
    let at = base.value.find(&sub.value).unwrap_or(base.value.len());
    Ok(Value::Str(base.value[at..].to_owned()))
}

/// Substring replacement, not per-character mapping.
fn translate(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [base, from, to] = arity::<3>("translate", args)?;
    Ok(Value::Str(base.value.replace(&from.value, &to.value)))
}

fn lower_case(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [arg] = arity::<1>("lower-case", args)?;
    Ok(Value::Str(arg.value.to_lowercase()))
}

fn upper_case(_: &Document, _: NodeId, args: &[ArgValue]) -> Result<Value, XpathError> {
    let [arg] = arity::<1>("upper-case", args)?;
    Ok(Value::Str(arg.value.to_uppercase()))
}

lazy_static! {
    /// Named functions available in filters and projection steps, with the
    /// argument count each one expects.
    static ref FUNCTIONS: FxHashMap<&'static str, (usize, BuiltinFn)> = {
        let mut table: FxHashMap<&'static str, (usize, BuiltinFn)> = FxHashMap::default();
        table.insert("index", (1, index as BuiltinFn));
        table.insert("name", (0, name as BuiltinFn));
        table.insert("text", (0, text as BuiltinFn));
        table.insert("count", (1, count as BuiltinFn));
        table.insert("position", (0, position as BuiltinFn));
        table.insert("last", (0, last as BuiltinFn));
        table.insert("not", (1, not_fn as BuiltinFn));
        table.insert("notempty", (1, notempty as BuiltinFn));
        table.insert("contains", (2, contains as BuiltinFn));
        table.insert("starts-with", (2, starts_with as BuiltinFn));
        table.insert("ends-with", (2, ends_with as BuiltinFn));
        table.insert("concat", (2, concat as BuiltinFn));
        table.insert("substring", (3, substring as BuiltinFn));
        table.insert("substring-before", (2, substring_before as BuiltinFn));
        table.insert("substring-after", (2, substring_after as BuiltinFn));
        table.insert("translate", (3, translate as BuiltinFn));
        table.insert("lower-case", (1, lower_case as BuiltinFn));
        table.insert("upper-case", (1, upper_case as BuiltinFn));
        table
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::element::Attributes;

    fn arg(kind: ExprToken, value: &str) -> ArgValue {
        ArgValue {
            kind,
            value: value.to_owned(),
        }
    }

    fn fixture() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let root = doc.new_element("root", Attributes::new());
        let a = doc.new_element("a", Attributes::new());
        let b = doc.new_element("b", Attributes::new());
        doc.set_root(root);
        doc.append(root, a);
        doc.append(root, b);
        (doc, root, a, b)
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Int(2).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Str("0".into()).truthy());
        assert!(!Value::Str("".into()).truthy());
    }

    #[test]
    fn test_integer_comparisons_validate() {
        let (doc, root, ..) = fixture();
        let args = [arg(ExprToken::Integer, "3"), arg(ExprToken::String, "abc")];
        assert_eq!(
            compare_lt(&doc, root, &args).unwrap_err(),
            XpathError::InvalidInteger("abc".into())
        );
        let args = [arg(ExprToken::Integer, "3"), arg(ExprToken::Integer, "10")];
        assert_eq!(compare_lt(&doc, root, &args).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_index_position_last() {
        let (doc, root, a, b) = fixture();
        let one = [arg(ExprToken::Integer, "1")];
        assert_eq!(index(&doc, a, &one).unwrap(), Value::Bool(true));
        assert_eq!(index(&doc, b, &one).unwrap(), Value::Bool(false));
        // The root has no parent: index can never match there.
        assert_eq!(index(&doc, root, &one).unwrap(), Value::Bool(false));
        assert_eq!(position(&doc, b, &[]).unwrap(), Value::Int(1));
        assert_eq!(position(&doc, root, &[]).unwrap(), Value::Int(0));
        assert_eq!(last(&doc, b, &[]).unwrap(), Value::Bool(true));
        assert_eq!(last(&doc, a, &[]).unwrap(), Value::Bool(false));
        assert_eq!(last(&doc, root, &[]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_text_includes_child_tails() {
        let (mut doc, root, a, b) = fixture();
        doc.set_text(root, Some("head".into()));
        doc.set_tail(a, Some("middle".into()));
        doc.set_tail(b, Some("end".into()));
        assert_eq!(
            text(&doc, root, &[]).unwrap(),
            Value::Str("head middle end".into())
        );
    }

    #[test]
    fn test_count_children() {
        let (doc, root, ..) = fixture();
        assert_eq!(
            count(&doc, root, &[arg(ExprToken::String, "a")]).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            count(&doc, root, &[arg(ExprToken::String, "nope")]).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn test_string_functions() {
        let (doc, root, ..) = fixture();
        let two = [
            arg(ExprToken::String, "threadLabel "),
            arg(ExprToken::String, "threadLabel"),
        ];
        assert_eq!(contains(&doc, root, &two).unwrap(), Value::Bool(true));
        assert_eq!(starts_with(&doc, root, &two).unwrap(), Value::Bool(true));
        assert_eq!(ends_with(&doc, root, &two).unwrap(), Value::Bool(false));
        assert_eq!(
            substring(
                &doc,
                root,
                &[
                    arg(ExprToken::String, "abcdef"),
                    arg(ExprToken::Integer, "1"),
                    arg(ExprToken::Integer, "4"),
                ]
            )
            .unwrap(),
            Value::Str("bcd".into())
        );
        assert_eq!(
            substring_before(
                &doc,
                root,
                &[arg(ExprToken::String, "a=b"), arg(ExprToken::String, "=")]
            )
            .unwrap(),
            Value::Str("a".into())
        );
        // A missing needle keeps the whole string on the "before" side.
        assert_eq!(
            substring_before(
                &doc,
                root,
                &[arg(ExprToken::String, "abc"), arg(ExprToken::String, "x")]
            )
            .unwrap(),
            Value::Str("abc".into())
        );
        assert_eq!(
            translate(
                &doc,
                root,
                &[
                    arg(ExprToken::String, "a-b-c"),
                    arg(ExprToken::String, "-"),
                    arg(ExprToken::String, "_"),
                ]
            )
            .unwrap(),
            Value::Str("a_b_c".into())
        );
        assert_eq!(
            upper_case(&doc, root, &[arg(ExprToken::String, "abc")]).unwrap(),
            Value::Str("ABC".into())
        );
    }

    #[test]
    fn test_not_requires_boolean() {
        let (doc, root, ..) = fixture();
        assert_eq!(
            not_fn(&doc, root, &[arg(ExprToken::Boolean, "false")]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            not_fn(&doc, root, &[arg(ExprToken::String, "maybe")]).unwrap_err(),
            XpathError::InvalidBoolean("maybe".into())
        );
    }

    #[test]
    fn test_arity_errors() {
        let (doc, root, ..) = fixture();
        assert_eq!(
            contains(&doc, root, &[arg(ExprToken::String, "just one")]).unwrap_err(),
            XpathError::InvalidArguments {
                function: "contains",
                expected: 2,
                got: 1
            }
        );
    }
}
