//! Static pre-screener (C1): rejects obviously dangerous submissions before
//! any sandbox is ever touched.
//!
//! This is a pure function over source text: no I/O, no shared state,
//! deterministic for a given input (testable property 4). It parses the
//! submission into a real Python AST with `rustpython-parser` rather than
//! scanning for substrings, then walks every statement and expression once.

use rustpython_parser::Parse;
use rustpython_parser::ast::{self, Expr, Stmt};

const FORBIDDEN_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "shutil",
    "pathlib",
    "fcntl",
    "signal",
    "resource",
    "ctypes",
    "multiprocessing",
    "threading",
    "asyncio",
    "selectors",
    "urllib",
    "http",
    "inspect",
    "importlib",
];

const FORBIDDEN_FUNCTIONS: &[&str] = &[
    "eval",
    "exec",
    "__import__",
    "compile",
    "open",
    "input",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "dir",
];

const FORBIDDEN_ATTRS: &[&str] = &["__class__", "__dict__", "__bases__", "__mro__", "__subclasses__"];

/// Parses `code` and returns one violation string per forbidden construct
/// found, in tree-walk order. An empty list means the submission passed.
/// A syntax error yields exactly one violation: `"syntax error"`.
pub fn static_check(code: &str) -> Vec<String> {
    let module = match ast::Suite::parse(code, "<submission>") {
        Ok(suite) => suite,
        Err(_) => return vec!["syntax error".to_string()],
    };

    let mut found = Vec::new();
    walk_stmts(&module, &mut found);
    found
}

fn walk_stmts(stmts: &[Stmt], found: &mut Vec<String>) {
    for stmt in stmts {
        walk_stmt(stmt, found);
    }
}

fn walk_stmt(stmt: &Stmt, found: &mut Vec<String>) {
    match stmt {
        Stmt::FunctionDef(s) => {
            walk_exprs(s.decorator_list.iter(), found);
            if let Some(returns) = &s.returns {
                walk_expr(returns, found);
            }
            walk_stmts(&s.body, found);
        }
        Stmt::AsyncFunctionDef(s) => {
            walk_exprs(s.decorator_list.iter(), found);
            if let Some(returns) = &s.returns {
                walk_expr(returns, found);
            }
            walk_stmts(&s.body, found);
        }
        Stmt::ClassDef(s) => {
            walk_exprs(s.bases.iter(), found);
            for kw in &s.keywords {
                walk_expr(&kw.value, found);
            }
            walk_exprs(s.decorator_list.iter(), found);
            walk_stmts(&s.body, found);
        }
        Stmt::Return(s) => {
            if let Some(value) = &s.value {
                walk_expr(value, found);
            }
        }
        Stmt::Delete(s) => walk_exprs(s.targets.iter(), found),
        Stmt::Assign(s) => {
            walk_exprs(s.targets.iter(), found);
            walk_expr(&s.value, found);
        }
        Stmt::AugAssign(s) => {
            walk_expr(&s.target, found);
            walk_expr(&s.value, found);
        }
        Stmt::AnnAssign(s) => {
            walk_expr(&s.target, found);
            walk_expr(&s.annotation, found);
            if let Some(value) = &s.value {
                walk_expr(value, found);
            }
        }
        Stmt::For(s) => {
            walk_expr(&s.target, found);
            walk_expr(&s.iter, found);
            walk_stmts(&s.body, found);
            walk_stmts(&s.orelse, found);
        }
        Stmt::AsyncFor(s) => {
            walk_expr(&s.target, found);
            walk_expr(&s.iter, found);
            walk_stmts(&s.body, found);
            walk_stmts(&s.orelse, found);
        }
        Stmt::While(s) => {
            walk_expr(&s.test, found);
            walk_stmts(&s.body, found);
            walk_stmts(&s.orelse, found);
        }
        Stmt::If(s) => {
            walk_expr(&s.test, found);
            walk_stmts(&s.body, found);
            walk_stmts(&s.orelse, found);
        }
        Stmt::With(s) => {
            found.push("with statement".to_string());
            for item in &s.items {
                walk_expr(&item.context_expr, found);
                if let Some(vars) = &item.optional_vars {
                    walk_expr(vars, found);
                }
            }
            walk_stmts(&s.body, found);
        }
        Stmt::AsyncWith(s) => {
            found.push("with statement".to_string());
            for item in &s.items {
                walk_expr(&item.context_expr, found);
                if let Some(vars) = &item.optional_vars {
                    walk_expr(vars, found);
                }
            }
            walk_stmts(&s.body, found);
        }
        Stmt::Match(s) => {
            walk_expr(&s.subject, found);
            for case in &s.cases {
                if let Some(guard) = &case.guard {
                    walk_expr(guard, found);
                }
                walk_stmts(&case.body, found);
            }
        }
        Stmt::Raise(s) => {
            if let Some(exc) = &s.exc {
                walk_expr(exc, found);
            }
            if let Some(cause) = &s.cause {
                walk_expr(cause, found);
            }
        }
        Stmt::Try(s) => {
            walk_stmts(&s.body, found);
            for handler in &s.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                if let Some(ty) = &h.type_ {
                    walk_expr(ty, found);
                }
                walk_stmts(&h.body, found);
            }
            walk_stmts(&s.orelse, found);
            walk_stmts(&s.finalbody, found);
        }
        Stmt::TryStar(s) => {
            walk_stmts(&s.body, found);
            for handler in &s.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                if let Some(ty) = &h.type_ {
                    walk_expr(ty, found);
                }
                walk_stmts(&h.body, found);
            }
            walk_stmts(&s.orelse, found);
            walk_stmts(&s.finalbody, found);
        }
        Stmt::Assert(s) => {
            walk_expr(&s.test, found);
            if let Some(msg) = &s.msg {
                walk_expr(msg, found);
            }
        }
        Stmt::Import(s) => {
            for alias in &s.names {
                let top = alias.name.split('.').next().unwrap_or(&alias.name);
                if FORBIDDEN_MODULES.contains(&top) {
                    found.push(format!("import {}", alias.name.as_str()));
                }
            }
        }
        Stmt::ImportFrom(s) => {
            if let Some(module) = &s.module {
                let top = module.split('.').next().unwrap_or(module.as_str());
                if FORBIDDEN_MODULES.contains(&top) {
                    found.push(format!("from {} import ...", module.as_str()));
                }
            }
        }
        Stmt::Expr(s) => walk_expr(&s.value, found),
        Stmt::Global(_)
        | Stmt::Nonlocal(_)
        | Stmt::Pass(_)
        | Stmt::Break(_)
        | Stmt::Continue(_)
        | Stmt::TypeAlias(_) => {}
    }
}

fn walk_exprs<'a>(exprs: impl Iterator<Item = &'a Expr>, found: &mut Vec<String>) {
    for expr in exprs {
        walk_expr(expr, found);
    }
}

fn walk_expr(expr: &Expr, found: &mut Vec<String>) {
    match expr {
        Expr::BoolOp(e) => walk_exprs(e.values.iter(), found),
        Expr::NamedExpr(e) => {
            walk_expr(&e.target, found);
            walk_expr(&e.value, found);
        }
        Expr::BinOp(e) => {
            walk_expr(&e.left, found);
            walk_expr(&e.right, found);
        }
        Expr::UnaryOp(e) => walk_expr(&e.operand, found),
        Expr::Lambda(e) => walk_expr(&e.body, found),
        Expr::IfExp(e) => {
            walk_expr(&e.test, found);
            walk_expr(&e.body, found);
            walk_expr(&e.orelse, found);
        }
        Expr::Dict(e) => {
            for key in e.keys.iter().flatten() {
                walk_expr(key, found);
            }
            walk_exprs(e.values.iter(), found);
        }
        Expr::Set(e) => walk_exprs(e.elts.iter(), found),
        Expr::ListComp(e) => {
            walk_expr(&e.elt, found);
            walk_comprehensions(&e.generators, found);
        }
        Expr::SetComp(e) => {
            walk_expr(&e.elt, found);
            walk_comprehensions(&e.generators, found);
        }
        Expr::DictComp(e) => {
            walk_expr(&e.key, found);
            walk_expr(&e.value, found);
            walk_comprehensions(&e.generators, found);
        }
        Expr::GeneratorExp(e) => {
            walk_expr(&e.elt, found);
            walk_comprehensions(&e.generators, found);
        }
        Expr::Await(e) => walk_expr(&e.value, found),
        Expr::Yield(e) => {
            if let Some(value) = &e.value {
                walk_expr(value, found);
            }
        }
        Expr::YieldFrom(e) => walk_expr(&e.value, found),
        Expr::Compare(e) => {
            walk_expr(&e.left, found);
            walk_exprs(e.comparators.iter(), found);
        }
        Expr::Call(e) => {
            let name = match e.func.as_ref() {
                Expr::Name(n) => Some(n.id.as_str()),
                Expr::Attribute(a) => Some(a.attr.as_str()),
                _ => None,
            };
            if let Some(name) = name {
                if FORBIDDEN_FUNCTIONS.contains(&name) {
                    found.push(name.to_string());
                }
            }
            walk_expr(&e.func, found);
            walk_exprs(e.args.iter(), found);
            for kw in &e.keywords {
                walk_expr(&kw.value, found);
            }
        }
        Expr::FormattedValue(e) => walk_expr(&e.value, found),
        Expr::JoinedStr(e) => walk_exprs(e.values.iter(), found),
        Expr::Constant(_) => {}
        Expr::Attribute(e) => {
            if FORBIDDEN_ATTRS.contains(&e.attr.as_str()) {
                found.push(format!("attribute {}", e.attr.as_str()));
            }
            walk_expr(&e.value, found);
        }
        Expr::Subscript(e) => {
            walk_expr(&e.value, found);
            walk_expr(&e.slice, found);
        }
        Expr::Starred(e) => walk_expr(&e.value, found),
        Expr::Name(_) => {}
        Expr::List(e) => walk_exprs(e.elts.iter(), found),
        Expr::Tuple(e) => walk_exprs(e.elts.iter(), found),
        Expr::Slice(e) => {
            if let Some(lower) = &e.lower {
                walk_expr(lower, found);
            }
            if let Some(upper) = &e.upper {
                walk_expr(upper, found);
            }
            if let Some(step) = &e.step {
                walk_expr(step, found);
            }
        }
    }
}

fn walk_comprehensions(generators: &[ast::Comprehension], found: &mut Vec<String>) {
    for comp in generators {
        walk_expr(&comp.target, found);
        walk_expr(&comp.iter, found);
        walk_exprs(comp.ifs.iter(), found);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_clean_arithmetic() {
        assert!(static_check("print(2 + 2)").is_empty());
    }

    #[test]
    fn rejects_forbidden_import() {
        let violations = static_check("import os\nprint(os.listdir('/'))");
        assert!(violations.iter().any(|v| v == "import os"));
    }

    #[test]
    fn rejects_forbidden_import_from() {
        let violations = static_check("from subprocess import run");
        assert!(violations.iter().any(|v| v.starts_with("from subprocess")));
    }

    #[test]
    fn rejects_open_call() {
        let violations = static_check("f = open('/etc/passwd')");
        assert!(violations.iter().any(|v| v == "open"));
    }

    #[test]
    fn rejects_with_statement() {
        let violations = static_check("with open('x') as f:\n    pass");
        assert!(violations.contains(&"with statement".to_string()));
    }

    #[test]
    fn rejects_dunder_attribute() {
        let violations = static_check("x = (1).__class__");
        assert!(violations.iter().any(|v| v == "attribute __class__"));
    }

    #[test]
    fn syntax_error_yields_single_violation() {
        let violations = static_check("def f(:\n");
        assert_eq!(violations, vec!["syntax error".to_string()]);
    }

    #[test]
    fn violations_stack_for_stacked_attacks() {
        let violations = static_check("import os\nopen(\"/etc/passwd\")");
        assert!(violations.len() >= 2);
    }

    #[test]
    fn pure_function_same_input_same_output() {
        let code = "import socket\nsocket.socket()";
        assert_eq!(static_check(code), static_check(code));
    }

    #[test]
    fn nested_import_inside_function_is_caught() {
        let violations = static_check("def f():\n    import sys\n    return sys.argv");
        assert!(violations.iter().any(|v| v == "import sys"));
    }
}
