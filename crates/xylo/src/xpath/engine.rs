//! Path evaluation and filter-expression compilation.
//!
//! A filter expression compiles left to right: argument getters accumulate
//! until an operator-like token arrives, at which point the operator and its
//! arguments fold into one compiled predicate that becomes the left-hand
//! argument for whatever follows. Comparisons and function calls fold as
//! soon as their operands are in hand; `and`/`or` are suspended with their
//! completed left side and fold once the right side is built, so chains
//! group left to right and comparisons bind tighter than `and`/`or`. Paths
//! evaluate step by step over a materialized node list, in document order
//! throughout.

use std::rc::Rc;

use crate::element::{Document, NodeId};
use crate::tokenize::Token;

use super::functions::{
    compile_action, compile_argument, wrap_expr, ArgGetter, EvalExpr, Value,
};
use super::lexer::{ExprLexer, ExprToken, PathLexer, PathToken};
use super::{Selected, XpathError};

/// `true` for a lone `@name` attribute reference.
fn is_var_ref(expr: &[u8]) -> bool {
    expr.len() > 1
        && expr[0] == b'@'
        && expr[1..]
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
}

fn function_token(name: &'static [u8]) -> Token<ExprToken> {
    Token {
        kind: ExprToken::Function,
        value: name.to_vec(),
        lineno: 0,
        position: 0,
    }
}

/// Fold every suspended operator over the arguments built since it was set
/// aside, innermost first.
fn unwind(
    stack: &mut Vec<(Token<ExprToken>, Vec<ArgGetter>)>,
    args: &mut Vec<ArgGetter>,
    compiled: &mut EvalExpr,
) -> Result<(), XpathError> {
    while let Some((outer, mut outer_args)) = stack.pop() {
        outer_args.append(args);
        *compiled = compile_action(&outer, outer_args)?;
        args.push(wrap_expr(outer.kind, compiled.clone()));
    }
    Ok(())
}

/// Compile a filter expression, returning the pending arguments, any
/// unapplied operator, and the last materialized predicate.
///
/// With `rewrites` enabled the filter-context specials apply: a pure integer
/// becomes the `index(n)` predicate and a lone `@attr` becomes `notempty`.
fn compile_expr(
    expr: &[u8],
    rewrites: bool,
) -> Result<(Vec<ArgGetter>, Option<Token<ExprToken>>, EvalExpr), XpathError> {
    let mut lexer = ExprLexer::new(expr.iter().copied());
    let mut args: Vec<ArgGetter> = Vec::new();
    let mut action: Option<Token<ExprToken>> = None;
    let mut stack: Vec<(Token<ExprToken>, Vec<ArgGetter>)> = Vec::new();
    let mut compiled: EvalExpr = Rc::new(|_, _| Ok(Value::Bool(false)));
    if rewrites {
        if !expr.is_empty() && expr.iter().all(|b| b.is_ascii_digit()) {
            action = Some(function_token(b"index"));
        }
        if is_var_ref(expr) {
            action = Some(function_token(b"notempty"));
        }
    }
    loop {
        let result = match lexer.next_token()? {
            Some(result) => result,
            None => break,
        };
        if result.kind >= ExprToken::Equals {
            match result.kind {
                ExprToken::And | ExprToken::Or => {
                    // The left operand is complete: fold whatever is still
                    // suspended, then set the operator aside until its right
                    // side has been built in turn.
                    match action.take() {
                        Some(pending) => stack.push((pending, std::mem::take(&mut args))),
                        None => unwind(&mut stack, &mut args, &mut compiled)?,
                    }
                    stack.push((result, std::mem::take(&mut args)));
                }
                ExprToken::Function if action.is_some() => {
                    // A function call starting the right-hand operand of a
                    // pending operator must not displace it.
                    if let Some(pending) = action.take() {
                        stack.push((pending, std::mem::take(&mut args)));
                    }
                    action = Some(result);
                }
                _ => action = Some(result),
            }
            continue;
        }
        if result.kind <= ExprToken::Variable {
            args.push(compile_argument(&result));
        } else if result.kind == ExprToken::Expression {
            args.extend(compile_expr_args(&result.value)?);
        } else if result.kind != ExprToken::Comma {
            return Err(XpathError::UnsupportedToken(
                String::from_utf8_lossy(&result.value).into_owned(),
            ));
        }
        if let Some(pending) = action.take() {
            compiled = compile_action(&pending, std::mem::take(&mut args))?;
            args.push(wrap_expr(pending.kind, compiled.clone()));
        }
    }
    if action.is_none() {
        unwind(&mut stack, &mut args, &mut compiled)?;
    } else if !stack.is_empty() {
        return Err(XpathError::IncompleteExpression);
    }
    Ok((args, action, compiled))
}

/// Compile a nested expression only for its argument getters.
fn compile_expr_args(expr: &[u8]) -> Result<Vec<ArgGetter>, XpathError> {
    let (args, action, _) = compile_expr(expr, true)?;
    if action.is_some() {
        return Err(XpathError::IncompleteExpression);
    }
    Ok(args)
}

/// Compile a complete filter expression into one predicate.
fn compile_expr_func(expr: &[u8]) -> Result<EvalExpr, XpathError> {
    let (args, action, compiled) = compile_expr(expr, true)?;
    if action.is_some() && !args.is_empty() {
        return Err(XpathError::IncompleteExpression);
    }
    Ok(compiled)
}

/// Compile a terminal projection step to a single value getter. The
/// filter-context rewrites do not apply: `@attr` projects the attribute
/// value itself.
fn compile_projection(expr: &[u8]) -> Result<ArgGetter, XpathError> {
    let (mut args, action, _) = compile_expr(expr, false)?;
    match (action, args.pop()) {
        (None, Some(getter)) if args.is_empty() => Ok(getter),
        _ => Err(XpathError::IncompleteExpression),
    }
}

/// Evaluate `path` over `seed`, producing nodes or projected scalars.
pub(crate) fn eval_path(
    doc: &Document,
    path: &[u8],
    seed: Vec<NodeId>,
) -> Result<Vec<Selected>, XpathError> {
    let mut lexer = PathLexer::new(path.iter().copied());
    let mut nodes = seed;
    let mut scalars: Option<Vec<String>> = None;
    loop {
        let action = match lexer.next_token()? {
            Some(action) => action,
            None => break,
        };
        if scalars.is_some() {
            return Err(XpathError::NavigationAfterValue);
        }
        match action.kind {
            PathToken::Child => {
                nodes = nodes
                    .iter()
                    .flat_map(|&id| doc.children(id).iter().copied())
                    .collect();
            }
            PathToken::Descendant => {
                let mut out = Vec::new();
                for &id in &nodes {
                    out.extend(doc.iter(id, None));
                }
                nodes = out;
            }
            PathToken::Node => {
                let tag = String::from_utf8_lossy(&action.value).into_owned();
                nodes.retain(|&id| doc.tag(id) == tag);
            }
            PathToken::Wildcard | PathToken::SelfStep => {}
            PathToken::ParentStep => {
                let depth = action.value.len();
                nodes = nodes
                    .iter()
                    .filter_map(|&id| ancestor(doc, id, depth))
                    .collect();
            }
            PathToken::Filter => {
                let predicate = compile_expr_func(&action.value)?;
                let mut kept = Vec::new();
                for &id in &nodes {
                    if predicate(doc, id)?.truthy() {
                        kept.push(id);
                    }
                }
                nodes = kept;
            }
            PathToken::Expression | PathToken::Function => {
                let getter = compile_projection(&action.value)?;
                let mut values = Vec::with_capacity(nodes.len());
                for &id in &nodes {
                    values.push(getter(doc, id)?.value);
                }
                scalars = Some(values);
            }
            PathToken::Undefined => {
                return Err(XpathError::UnsupportedToken(
                    String::from_utf8_lossy(&action.value).into_owned(),
                ));
            }
        }
    }
    Ok(match scalars {
        Some(values) => values.into_iter().map(Selected::Value).collect(),
        None => nodes.into_iter().map(Selected::Node).collect(),
    })
}

fn ancestor(doc: &Document, id: NodeId, depth: usize) -> Option<NodeId> {
    let mut current = id;
    for _ in 0..depth {
        current = doc.parent(current)?;
    }
    Some(current)
}
