use phpfold_syntax::tree::{AssignOp, Literal, NodeKind, Param};
use phpfold_syntax::{NodeId, Span, Tree};
use rustc_hash::FxHashMap;
use tracing::trace;

use super::{Pass, PassContext};
use crate::config::OptimizerOptions;
use crate::effect::Classifier;
use crate::errors::TransformError;
use crate::scope::{ClassInfo, ScopeStore};

/// Flattens simple object instances into per-instance variables.
///
/// `$obj = new C(...)` becomes one assignment per property
/// (`$obj__prop = ...`), a constructor body in which every statement is
/// `$this->prop = expr;` becomes further assignments, later
/// `$obj->prop` accesses become the synthesized variables, and calls to
/// single-return methods inline like functions with `$this->prop`
/// substituted. Method lookup falls back one level to the parent class.
///
/// The instance qualifies only if every use of the variable in the global
/// scope is a property access, an inlinable method call, or the creating
/// assignment itself; anything that lets the object escape (a call
/// argument, a reassignment, `global`) disqualifies it.
pub struct ClassInliningPass;

impl Pass for ClassInliningPass {
    fn name(&self) -> &'static str {
        "class-inlining"
    }

    fn description(&self) -> &'static str {
        "Flattens simple instances into per-instance variables"
    }

    fn enabled(&self, options: &OptimizerOptions) -> bool {
        options.inline_classes
    }

    fn run(&mut self, ctx: &mut PassContext<'_>) -> Result<bool, TransformError> {
        ctx.tree.connect(ctx.roots);
        capture_classes(ctx.tree, ctx.roots, ctx.scopes);

        let mut changed = false;
        // One instance per run keeps the collected node ids valid; the
        // fixed-point loop picks up the rest.
        if let Some(plan) = find_plan(ctx.tree, ctx.roots, ctx.scopes, ctx.classifier) {
            apply_plan(ctx.tree, ctx.roots, ctx.scopes, &plan);
            changed = true;
        }
        Ok(changed)
    }
}

fn capture_classes(tree: &Tree, roots: &[NodeId], scopes: &mut ScopeStore) {
    for &root in roots {
        let NodeKind::ClassDecl {
            name,
            parent,
            properties,
            methods,
        } = tree.kind(root)
        else {
            continue;
        };
        let mut info = ClassInfo {
            parent_class_name: parent.clone(),
            ..Default::default()
        };
        for prop in properties {
            info.properties.insert(prop.name.clone(), prop.default);
        }
        for &method in methods {
            if let NodeKind::FunctionDecl {
                name: method_name, ..
            } = tree.kind(method)
            {
                info.methods
                    .insert(method_name.to_ascii_lowercase(), method);
            }
        }
        scopes.set_class(name, info);
    }
}

// ----------------------------------------------------------------------
// Planning
// ----------------------------------------------------------------------

struct Plan {
    var: String,
    class: String,
    new_stmt: NodeId,
    ctor_args: Vec<NodeId>,
    /// `$obj->prop` sites (read or write position).
    fetch_sites: Vec<(NodeId, String)>,
    /// `$obj->method(...)` sites with the resolved return expression.
    method_sites: Vec<MethodSite>,
}

struct MethodSite {
    call: NodeId,
    ret_expr: NodeId,
    params: Vec<Param>,
    args: Vec<NodeId>,
}

fn find_plan(
    tree: &Tree,
    roots: &[NodeId],
    scopes: &ScopeStore,
    classifier: &Classifier,
) -> Option<Plan> {
    for &stmt in roots {
        let NodeKind::ExprStmt(expr) = tree.kind(stmt) else {
            continue;
        };
        let NodeKind::Assign {
            op: AssignOp::Assign,
            target,
            value,
        } = tree.kind(*expr)
        else {
            continue;
        };
        let NodeKind::Variable(var) = tree.kind(*target) else {
            continue;
        };
        let NodeKind::New { class, args } = tree.kind(*value) else {
            continue;
        };
        if scopes.get_class(class).is_none() {
            continue;
        }
        if args
            .iter()
            .any(|&arg| !classifier.classify(tree, arg).is_pure())
        {
            continue;
        }
        if !constructor_is_flat(tree, scopes, class) {
            continue;
        }
        if let Some(plan) = audit_instance(
            tree,
            roots,
            scopes,
            classifier,
            var,
            class,
            stmt,
            *expr,
            args.clone(),
        ) {
            return Some(plan);
        }
    }
    None
}

/// The constructor, if any, must be a flat sequence of
/// `$this->prop = expr;` statements whose expressions reference nothing
/// but constructor parameters and already-assigned properties.
fn constructor_is_flat(tree: &Tree, scopes: &ScopeStore, class: &str) -> bool {
    let Some(ctor) = scopes.lookup_method(class, "__construct") else {
        return true;
    };
    let NodeKind::FunctionDecl { params, body, .. } = tree.kind(ctor) else {
        return false;
    };
    if params.iter().any(|p| p.by_ref) {
        return false;
    }
    let NodeKind::Block(stmts) = tree.kind(*body) else {
        return false;
    };
    let param_names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
    stmts.iter().all(|&stmt| {
        let NodeKind::ExprStmt(expr) = tree.kind(stmt) else {
            return false;
        };
        let NodeKind::Assign {
            op: AssignOp::Assign,
            target,
            value,
        } = tree.kind(*expr)
        else {
            return false;
        };
        is_this_property(tree, *target).is_some()
            && expr_is_substitutable(tree, *value, &param_names)
    })
}

fn is_this_property(tree: &Tree, id: NodeId) -> Option<String> {
    let NodeKind::PropertyFetch { object, property } = tree.kind(id) else {
        return None;
    };
    match tree.kind(*object) {
        NodeKind::Variable(name) if name == "this" => Some(property.clone()),
        _ => None,
    }
}

/// Variables must be listed parameters; `$this` may appear only as a
/// property-fetch base.
fn expr_is_substitutable(tree: &Tree, id: NodeId, params: &[&str]) -> bool {
    match tree.kind(id) {
        NodeKind::Variable(name) => params.contains(&name.as_str()),
        NodeKind::PropertyFetch { .. } => is_this_property(tree, id).is_some(),
        NodeKind::MethodCall { .. } | NodeKind::StaticCall { .. } | NodeKind::New { .. } => false,
        _ => tree
            .children(id)
            .into_iter()
            .all(|child| expr_is_substitutable(tree, child, params)),
    }
}

#[allow(clippy::too_many_arguments)]
fn audit_instance(
    tree: &Tree,
    roots: &[NodeId],
    scopes: &ScopeStore,
    classifier: &Classifier,
    var: &str,
    class: &str,
    new_stmt: NodeId,
    new_assign: NodeId,
    ctor_args: Vec<NodeId>,
) -> Option<Plan> {
    let mut fetch_sites = Vec::new();
    let mut method_sites = Vec::new();
    for &root in roots {
        if !audit_node(
            tree,
            root,
            scopes,
            classifier,
            var,
            class,
            new_assign,
            &mut fetch_sites,
            &mut method_sites,
        ) {
            return None;
        }
    }
    Some(Plan {
        var: var.to_string(),
        class: class.to_string(),
        new_stmt,
        ctor_args,
        fetch_sites,
        method_sites,
    })
}

/// Walk the global scope checking every use of the instance variable.
/// Function and class bodies are separate scopes and are skipped, but a
/// `global` declaration naming the variable disqualifies the instance.
#[allow(clippy::too_many_arguments)]
fn audit_node(
    tree: &Tree,
    id: NodeId,
    scopes: &ScopeStore,
    classifier: &Classifier,
    var: &str,
    class: &str,
    new_assign: NodeId,
    fetch_sites: &mut Vec<(NodeId, String)>,
    method_sites: &mut Vec<MethodSite>,
) -> bool {
    match tree.kind(id) {
        NodeKind::Global(names) => return !names.iter().any(|n| n == var),
        NodeKind::FunctionDecl { .. } => return true,
        NodeKind::ClassDecl { .. } => return true,
        NodeKind::Variable(name) if name == var => {
            return usage_allowed(tree, id, scopes, classifier, var, class, new_assign,
                fetch_sites, method_sites);
        }
        _ => {}
    }
    tree.children(id).into_iter().all(|child| {
        audit_node(
            tree, child, scopes, classifier, var, class, new_assign, fetch_sites, method_sites,
        )
    })
}

#[allow(clippy::too_many_arguments)]
fn usage_allowed(
    tree: &Tree,
    var_node: NodeId,
    scopes: &ScopeStore,
    classifier: &Classifier,
    var: &str,
    class: &str,
    new_assign: NodeId,
    fetch_sites: &mut Vec<(NodeId, String)>,
    method_sites: &mut Vec<MethodSite>,
) -> bool {
    let Some(parent) = tree.parent(var_node) else {
        return false;
    };
    match tree.kind(parent) {
        // The creating assignment itself.
        NodeKind::Assign { target, .. } if parent == new_assign && *target == var_node => true,
        NodeKind::PropertyFetch { object, property } if *object == var_node => {
            fetch_sites.push((parent, property.clone()));
            true
        }
        NodeKind::MethodCall {
            object,
            method,
            args,
        } if *object == var_node => {
            let Some(decl) = scopes.lookup_method(class, method) else {
                return false;
            };
            let NodeKind::FunctionDecl { params, body, .. } = tree.kind(decl) else {
                return false;
            };
            if params.iter().any(|p| p.by_ref) || args.len() > params.len() {
                return false;
            }
            if args
                .iter()
                .any(|&arg| !classifier.classify(tree, arg).is_pure())
            {
                return false;
            }
            let NodeKind::Block(stmts) = tree.kind(*body) else {
                return false;
            };
            let [only] = stmts[..] else {
                return false;
            };
            let NodeKind::Return(Some(ret_expr)) = tree.kind(only) else {
                return false;
            };
            let param_names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
            if !expr_is_substitutable(tree, *ret_expr, &param_names) {
                return false;
            }
            method_sites.push(MethodSite {
                call: parent,
                ret_expr: *ret_expr,
                params: params.clone(),
                args: args.clone(),
            });
            true
        }
        _ => false,
    }
}

// ----------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------

fn apply_plan(tree: &mut Tree, roots: &mut Vec<NodeId>, scopes: &mut ScopeStore, plan: &Plan) {
    trace!("flattening instance ${} of class {}", plan.var, plan.class);
    let properties = scopes.all_properties(&plan.class);

    // Property defaults first, in declaration order.
    let mut init_stmts = Vec::new();
    for (prop, default) in &properties {
        let value = match default {
            Some(d) => tree.deep_clone(*d),
            None => tree.alloc(NodeKind::Lit(Literal::Null), Span::dummy()),
        };
        init_stmts.push(make_assign(tree, &instance_var(&plan.var, prop), value));
    }

    // Then the constructor body with parameters and `$this` substituted.
    if let Some(ctor) = scopes.lookup_method(&plan.class, "__construct") {
        if let NodeKind::FunctionDecl { params, body, .. } = tree.kind(ctor).clone() {
            let sources = param_sources(tree, &params, &plan.ctor_args);
            if let NodeKind::Block(stmts) = tree.kind(body).clone() {
                for stmt in stmts {
                    let NodeKind::ExprStmt(expr) = tree.kind(stmt) else {
                        continue;
                    };
                    let NodeKind::Assign { target, value, .. } = tree.kind(*expr).clone() else {
                        continue;
                    };
                    let Some(prop) = is_this_property(tree, target) else {
                        continue;
                    };
                    let cloned = tree.deep_clone(value);
                    substitute_instance_expr(tree, cloned, &plan.var, &sources);
                    init_stmts.push(make_assign(tree, &instance_var(&plan.var, &prop), cloned));
                }
            }
        }
    }

    // Swap the `new` statement for the synthesized sequence.
    if let Some(index) = roots.iter().position(|&r| r == plan.new_stmt) {
        roots.splice(index..=index, init_stmts);
    }

    // Property accesses become plain variables.
    for (fetch, prop) in &plan.fetch_sites {
        tree.set_kind(*fetch, NodeKind::Variable(instance_var(&plan.var, prop)));
    }

    // Method calls become their substituted return expressions.
    for site in &plan.method_sites {
        let sources = param_sources(tree, &site.params, &site.args);
        let cloned = tree.deep_clone(site.ret_expr);
        substitute_instance_expr(tree, cloned, &plan.var, &sources);
        tree.set_kind(site.call, tree.kind(cloned).clone());
    }

    scopes.register_instance(&plan.class, &plan.var);
}

fn instance_var(obj: &str, prop: &str) -> String {
    format!("{obj}__{prop}")
}

fn make_assign(tree: &mut Tree, var: &str, value: NodeId) -> NodeId {
    let target = tree.alloc(NodeKind::Variable(var.to_string()), Span::dummy());
    let assign = tree.alloc(
        NodeKind::Assign {
            op: AssignOp::Assign,
            target,
            value,
        },
        Span::dummy(),
    );
    tree.alloc(NodeKind::ExprStmt(assign), Span::dummy())
}

fn param_sources(tree: &mut Tree, params: &[Param], args: &[NodeId]) -> FxHashMap<String, NodeId> {
    let mut sources = FxHashMap::default();
    for (index, param) in params.iter().enumerate() {
        let source = match args.get(index) {
            Some(&arg) => arg,
            None => match param.default {
                Some(default) => default,
                None => tree.alloc(NodeKind::Lit(Literal::Null), Span::dummy()),
            },
        };
        sources.insert(param.name.clone(), source);
    }
    sources
}

/// On a cloned expression: parameters become argument clones, `$this->p`
/// becomes the instance variable.
fn substitute_instance_expr(
    tree: &mut Tree,
    id: NodeId,
    obj: &str,
    sources: &FxHashMap<String, NodeId>,
) {
    if let Some(prop) = is_this_property(tree, id) {
        tree.set_kind(id, NodeKind::Variable(instance_var(obj, &prop)));
        return;
    }
    if let NodeKind::Variable(name) = tree.kind(id) {
        if let Some(&source) = sources.get(name) {
            let clone = tree.deep_clone(source);
            tree.set_kind(id, tree.kind(clone).clone());
            return;
        }
    }
    for child in tree.children(id) {
        substitute_instance_expr(tree, child, obj, sources);
    }
}

#[cfg(test)]
mod tests {
    use crate::pipeline::test_support::run_single_pass;

    use super::*;

    fn flattened(src: &str) -> String {
        run_single_pass(src, &mut ClassInliningPass)
    }

    #[test]
    fn test_properties_become_variables() {
        let out = flattened(
            "<?php class Point { public $x = 0; } $p = new Point(); $p->x = 5; echo $p->x;",
        );
        assert!(out.contains("$p__x = 0;"), "{out}");
        assert!(out.contains("$p__x = 5;"), "{out}");
        assert!(out.contains("echo $p__x;"), "{out}");
        assert!(!out.contains("new Point"), "{out}");
    }

    #[test]
    fn test_constructor_inlines_as_sequence() {
        let out = flattened(
            "<?php class V { public $a; function __construct($n) { $this->a = $n * 2; } } $v = new V(3); echo $v->a;",
        );
        assert!(out.contains("$v__a = null;"), "{out}");
        assert!(out.contains("$v__a = 3 * 2;"), "{out}");
        assert!(out.contains("echo $v__a;"), "{out}");
    }

    #[test]
    fn test_method_call_inlines() {
        let out = flattened(
            "<?php class P { public $x = 1; function getX() { return $this->x; } } $p = new P(); echo $p->getX();",
        );
        assert!(out.contains("echo $p__x;"), "{out}");
    }

    #[test]
    fn test_parent_method_fallback() {
        let out = flattened(
            "<?php class Base { public $n = 7; function value() { return $this->n; } } class Sub extends Base { } $s = new Sub(); echo $s->value();",
        );
        assert!(out.contains("$s__n = 7;"), "{out}");
        assert!(out.contains("echo $s__n;"), "{out}");
    }

    #[test]
    fn test_escaping_instance_untouched() {
        let out = flattened(
            "<?php class C { public $x = 1; } $c = new C(); consume($c); echo $c->x;",
        );
        assert!(out.contains("new C()"), "{out}");
        assert!(out.contains("$c->x"), "{out}");
    }

    #[test]
    fn test_impure_constructor_argument_blocks() {
        let out = flattened(
            "<?php class C { public $x; function __construct($v) { $this->x = $v; } } $c = new C(rand()); echo $c->x;",
        );
        assert!(out.contains("new C(rand())"), "{out}");
    }

    #[test]
    fn test_complex_constructor_blocks() {
        let out = flattened(
            "<?php class C { public $x; function __construct() { log_it(); $this->x = 1; } } $c = new C(); echo $c->x;",
        );
        assert!(out.contains("new C()"), "{out}");
    }

    #[test]
    fn test_multi_statement_method_blocks() {
        let out = flattened(
            "<?php class C { public $x = 1; function f() { $y = 2; return $y; } } $c = new C(); echo $c->f();",
        );
        assert!(out.contains("new C()"), "{out}");
    }
}
