//! Type checking of tasks, workflows, and expressions.
//!
//! The checker walks each expression bottom-up, assigning a type to every
//! node and accumulating diagnostics rather than stopping at the first
//! error. Scopes are processed in topological order of their static
//! dependencies, so forward references are accepted whenever an order
//! exists and cycles are rejected.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use sluice_syntax::Diagnostics;
use sluice_syntax::SourcePosition;
use sluice_syntax::WdlVersion;
use sluice_syntax::ast;
use sluice_syntax::ast::BinaryOp;
use sluice_syntax::ast::Expr;
use sluice_syntax::ast::ExprKind;
use sluice_syntax::ast::NodeId;
use sluice_syntax::ast::StringPart;
use sluice_syntax::ast::UnaryOp;
use sluice_syntax::ast::WorkflowElement;

use crate::deps::dotted_name;
use crate::deps::element_deps;
use crate::deps::element_names;
use crate::deps::element_pos;
use crate::deps::free_vars;
use crate::diagnostics::*;
use crate::document::CallTypes;
use crate::document::Document;
use crate::document::Signature;
use crate::env::Bindings;
use crate::stdlib;
use crate::stdlib::InferContext;
use crate::stdlib::TypedArg;
use crate::types::StructMembers;
use crate::types::Type;

/// The type checker for a single document.
pub(crate) struct Checker<'a> {
    /// The effective WDL version.
    version: WdlVersion,
    /// Whether optional/nonempty quantifiers are checked strictly.
    check_quant: bool,
    /// The struct types visible in the document.
    structs: &'a IndexMap<String, StructMembers>,
    /// The imported documents by namespace.
    imports: &'a IndexMap<String, Arc<Document>>,
    /// The node type table being filled.
    types: &'a mut HashMap<NodeId, Type>,
    /// The call type table being filled.
    calls: &'a mut HashMap<NodeId, CallTypes>,
    /// The accumulated diagnostics.
    diagnostics: &'a mut Diagnostics,
}

impl<'a> Checker<'a> {
    /// Creates a new checker.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        version: WdlVersion,
        check_quant: bool,
        structs: &'a IndexMap<String, StructMembers>,
        imports: &'a IndexMap<String, Arc<Document>>,
        types: &'a mut HashMap<NodeId, Type>,
        calls: &'a mut HashMap<NodeId, CallTypes>,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        Self {
            version,
            check_quant,
            structs,
            imports,
            types,
            calls,
            diagnostics,
        }
    }

    /// Gets the diagnostics collection.
    pub(crate) fn diagnostics(&mut self) -> &mut Diagnostics {
        self.diagnostics
    }

    /// Checks a task, returning its callable signature.
    pub(crate) fn check_task(&mut self, task: &ast::Task) -> Signature {
        // Inputs and private declarations share one scope; only declarations
        // in the input section (or, in draft-2, any declaration) may be
        // unbound
        let mut decls: Vec<(&ast::Decl, bool)> = Vec::new();
        if let Some(inputs) = &task.inputs {
            decls.extend(inputs.iter().map(|d| (d, true)));
            decls.extend(task.postinputs.iter().map(|d| (d, false)));
        } else {
            decls.extend(task.postinputs.iter().map(|d| (d, true)));
        }

        let env = self.check_decls(&decls, Bindings::new());

        for part in &task.command.parts {
            if let StringPart::Placeholder(placeholder) = part {
                self.check_placeholder(placeholder, &env);
            }
        }

        for (_, expr) in &task.runtime {
            self.infer_expr(expr, &env);
        }

        let outputs: Vec<(&ast::Decl, bool)> = task.outputs.iter().map(|d| (d, false)).collect();
        self.check_decls(&outputs, env);

        let input_decls: &[ast::Decl] = match &task.inputs {
            Some(inputs) => inputs,
            None => &task.postinputs,
        };

        self.signature_of(input_decls, &task.outputs)
    }

    /// Checks a workflow, returning its signature and whether it is
    /// uncallable from outside.
    pub(crate) fn check_workflow(
        &mut self,
        workflow: &ast::Workflow,
        task_signatures: &IndexMap<String, Signature>,
    ) -> (Signature, bool) {
        let mut uncallable = false;

        let input_env = match &workflow.inputs {
            Some(inputs) => {
                let decls: Vec<(&ast::Decl, bool)> = inputs.iter().map(|d| (d, true)).collect();
                self.check_decls(&decls, Bindings::new())
            }
            None => Bindings::new(),
        };

        // Body declarations may be unbound only when there is no input
        // section (draft-2), in which case they are the workflow's inputs
        let allow_unbound = workflow.inputs.is_none();
        let final_env = self.check_body(
            &workflow.body,
            &input_env,
            task_signatures,
            &mut uncallable,
            allow_unbound,
        );

        let outputs: IndexMap<String, Type> = match &workflow.outputs {
            Some(decls) => {
                let pairs: Vec<(&ast::Decl, bool)> = decls.iter().map(|d| (d, false)).collect();
                self.check_decls(&pairs, final_env.clone());
                decls
                    .iter()
                    .map(|d| (d.name.clone(), self.types[&d.id].clone()))
                    .collect()
            }
            None => {
                // Every name in scope at the end of the body, minus the
                // inputs, is an effective output
                final_env
                    .subtract(&input_env)
                    .iter()
                    .map(|b| (b.name().to_string(), b.value().clone()))
                    .collect()
            }
        };

        let mut signature = match &workflow.inputs {
            Some(inputs) => self.signature_of(inputs, &[]),
            None => {
                // Top-level body declarations are the inputs
                let decls: Vec<&ast::Decl> = workflow
                    .body
                    .iter()
                    .filter_map(|e| match e {
                        WorkflowElement::Decl(d) => Some(d),
                        _ => None,
                    })
                    .collect();

                let mut signature = Signature::default();
                for decl in decls {
                    let ty = self.types[&decl.id].clone();
                    if decl.expr.is_none() && !ty.is_optional() {
                        signature.required.push(decl.name.clone());
                    }

                    signature.inputs.insert(decl.name.clone(), ty);
                }

                signature
            }
        };

        signature.outputs = outputs;
        (signature, uncallable)
    }

    /// Builds the callable signature from input and output declarations.
    fn signature_of(&mut self, inputs: &[ast::Decl], outputs: &[ast::Decl]) -> Signature {
        let mut signature = Signature::default();
        for decl in inputs {
            let ty = self.types[&decl.id].clone();
            if decl.expr.is_none() && !ty.is_optional() {
                signature.required.push(decl.name.clone());
            }

            signature.inputs.insert(decl.name.clone(), ty);
        }

        for decl in outputs {
            signature
                .outputs
                .insert(decl.name.clone(), self.types[&decl.id].clone());
        }

        signature
    }

    /// Checks a set of declarations forming one scope, in topological order
    /// of their references to one another.
    fn check_decls(
        &mut self,
        decls: &[(&ast::Decl, bool)],
        env: Bindings<Type>,
    ) -> Bindings<Type> {
        let mut produced: HashMap<String, usize> = HashMap::new();
        for (i, (decl, _)) in decls.iter().enumerate() {
            if env.has_binding(&decl.name)
                || env.has_namespace(&decl.name)
                || produced.insert(decl.name.clone(), i).is_some()
            {
                self.diagnostics.push(multiple_definitions(&decl.name, &decl.pos));
            }
        }

        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = (0..decls.len()).map(|i| graph.add_node(i)).collect();
        for (i, (decl, _)) in decls.iter().enumerate() {
            let mut deps = HashSet::new();
            if let Some(expr) = &decl.expr {
                free_vars(expr, &mut deps);
            }

            for dep in deps {
                let head = dep.split('.').next().unwrap_or(&dep);
                if let Some(&p) = produced.get(head) {
                    if p != i {
                        graph.add_edge(nodes[p], nodes[i], ());
                    }
                }
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(cycle) => {
                let (decl, _) = decls[graph[cycle.node_id()]];
                self.diagnostics
                    .push(circular_dependencies(&decl.name, &decl.pos));
                return env;
            }
        };

        let mut env = env;
        for node in order {
            let (decl, allow_unbound) = decls[graph[node]];
            let ty = self.check_decl(decl, &env, allow_unbound);
            env = env.bind(decl.name.clone(), ty);
        }

        env
    }

    /// Checks a single declaration and records its type.
    fn check_decl(&mut self, decl: &ast::Decl, env: &Bindings<Type>, allow_unbound: bool) -> Type {
        let declared = self.resolve_type(&decl.ty);

        match &decl.expr {
            Some(expr) => {
                let actual = self.infer_expr(expr, env);
                if !actual.coerces(&declared, self.check_quant) {
                    self.diagnostics
                        .push(static_type_mismatch(&declared, &actual, &expr.pos));
                }
            }
            None if !allow_unbound => {
                self.diagnostics.push(invalid_type(
                    format!(
                        "declaration `{name}` requires an initializer in this context",
                        name = decl.name
                    ),
                    &decl.pos,
                ));
            }
            None => {}
        }

        self.types.insert(decl.id, declared.clone());
        declared
    }

    /// Checks a workflow (or section) body, returning the extended
    /// environment including gathered bindings.
    fn check_body(
        &mut self,
        elements: &[WorkflowElement],
        env: &Bindings<Type>,
        task_signatures: &IndexMap<String, Signature>,
        uncallable: &mut bool,
        allow_unbound: bool,
    ) -> Bindings<Type> {
        // Collect the names each element binds in this scope, rejecting
        // collisions with one another and with the enclosing environment
        let mut produced: HashMap<String, usize> = HashMap::new();
        for (i, element) in elements.iter().enumerate() {
            for name in element_names(element) {
                if env.has_binding(&name)
                    || env.has_namespace(&name)
                    || produced.insert(name.clone(), i).is_some()
                {
                    self.diagnostics
                        .push(multiple_definitions(&name, element_pos(element)));
                }
            }
        }

        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<_> = (0..elements.len()).map(|i| graph.add_node(i)).collect();
        for (i, element) in elements.iter().enumerate() {
            for dep in element_deps(element) {
                let head = dep.split('.').next().unwrap_or(&dep).to_string();
                if let Some(&p) = produced.get(&head) {
                    if p != i {
                        graph.add_edge(nodes[p], nodes[i], ());
                    }
                }
            }
        }

        let order = match toposort(&graph, None) {
            Ok(order) => order,
            Err(cycle) => {
                let element = &elements[graph[cycle.node_id()]];
                let name = element_names(element)
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| "section".to_string());
                self.diagnostics
                    .push(circular_dependencies(&name, element_pos(element)));
                return env.clone();
            }
        };

        let mut env = env.clone();
        for node in order {
            match &elements[graph[node]] {
                WorkflowElement::Decl(decl) => {
                    let ty = self.check_decl(decl, &env, allow_unbound);
                    env = env.bind(decl.name.clone(), ty);
                }
                WorkflowElement::Call(call) => {
                    env = self.check_call(call, env, task_signatures, uncallable);
                }
                WorkflowElement::Scatter(scatter) => {
                    let iter_ty = self.infer_expr(&scatter.expr, &env);
                    let item = match iter_ty {
                        Type::Array { item, .. } => *item,
                        Type::Any { .. } => Type::any(),
                        ty => {
                            self.diagnostics.push(not_an_array(&ty, &scatter.expr.pos));
                            Type::any()
                        }
                    };

                    self.types.insert(scatter.id, item.clone());

                    if env.has_binding(&scatter.variable) || env.has_namespace(&scatter.variable) {
                        self.diagnostics
                            .push(multiple_definitions(&scatter.variable, &scatter.pos));
                    }

                    let inner_env = env.bind(scatter.variable.clone(), item);
                    let result =
                        self.check_body(&scatter.body, &inner_env, task_signatures, uncallable, false);

                    // Gather: every inner binding is exported as an array
                    for binding in result.subtract(&inner_env).iter() {
                        env = env.bind(
                            binding.name().to_string(),
                            Type::array(binding.value().clone()),
                        );
                    }
                }
                WorkflowElement::Conditional(conditional) => {
                    let cond_ty = self.infer_expr(&conditional.expr, &env);
                    if !cond_ty.coerces(&Type::boolean(), true) {
                        self.diagnostics.push(static_type_mismatch(
                            &Type::boolean(),
                            &cond_ty,
                            &conditional.expr.pos,
                        ));
                    }

                    let result = self.check_body(
                        &conditional.body,
                        &env,
                        task_signatures,
                        uncallable,
                        false,
                    );

                    // Gather: every inner binding is exported as optional
                    for binding in result.subtract(&env).iter() {
                        env = env.bind(
                            binding.name().to_string(),
                            binding.value().clone().with_optional(true),
                        );
                    }
                }
            }
        }

        env
    }

    /// Checks a call statement, binding the target's outputs under the
    /// call's name.
    fn check_call(
        &mut self,
        call: &ast::Call,
        env: Bindings<Type>,
        task_signatures: &IndexMap<String, Signature>,
        uncallable: &mut bool,
    ) -> Bindings<Type> {
        let target_name = call.target.join(".");

        let resolved: Option<(Vec<String>, bool, Signature)> = if call.target.len() == 1 {
            task_signatures
                .get(&call.target[0])
                .map(|sig| (Vec::new(), true, sig.clone()))
        } else {
            let mut doc: Option<&Arc<Document>> = None;
            for segment in &call.target[..call.target.len() - 1] {
                let next = match doc {
                    None => self.imports.get(segment),
                    Some(d) => d.namespace(segment),
                };

                match next {
                    Some(d) => doc = Some(d),
                    None => {
                        self.diagnostics.push(unknown_namespace(segment, &call.pos));
                        return env;
                    }
                }
            }

            let doc = doc.expect("target has at least one namespace segment");
            let name = call.target.last().expect("target is never empty");
            if let Some(sig) = doc.task_signature(name) {
                Some((
                    call.target[..call.target.len() - 1].to_vec(),
                    true,
                    sig.clone(),
                ))
            } else if doc.workflow().map(|w| w.name == *name).unwrap_or(false) {
                if doc.workflow_uncallable() {
                    // Calling an uncallable workflow makes the caller
                    // uncallable in turn
                    *uncallable = true;
                }

                doc.workflow_signature().map(|sig| {
                    (
                        call.target[..call.target.len() - 1].to_vec(),
                        false,
                        sig.clone(),
                    )
                })
            } else {
                None
            }
        };

        let Some((namespace, task, signature)) = resolved else {
            self.diagnostics
                .push(unknown_call_target(&target_name, &call.pos));
            return env;
        };

        // Bound inputs must exist and their expressions must coerce
        let mut bound = HashSet::new();
        for (name, expr) in &call.inputs {
            let actual = self.infer_expr(expr, &env);
            match signature.inputs.get(name) {
                Some(expected) => {
                    if !actual.coerces(expected, self.check_quant) {
                        self.diagnostics
                            .push(static_type_mismatch(expected, &actual, &expr.pos));
                    }
                }
                None => {
                    self.diagnostics
                        .push(no_such_input(&target_name, name, &expr.pos));
                }
            }

            bound.insert(name.clone());
        }

        // An incomplete call is legal but makes the enclosing workflow
        // uncallable from outside
        if signature.required.iter().any(|r| !bound.contains(r)) {
            *uncallable = true;
        }

        let mut env = env;
        for (name, ty) in &signature.outputs {
            env = env.bind(
                format!("{call_name}.{name}", call_name = call.name()),
                ty.clone(),
            );
        }

        self.calls.insert(
            call.id,
            CallTypes {
                namespace,
                task,
                signature,
            },
        );

        env
    }

    /// Checks a placeholder's expression against its option clauses.
    fn check_placeholder(&mut self, placeholder: &ast::Placeholder, env: &Bindings<Type>) {
        let ty = self.infer_expr(&placeholder.expr, env);
        let options = &placeholder.options;

        if options.sep.is_some() {
            match &ty {
                Type::Array { item, .. } => {
                    if !item.coerces(&Type::string(), false) {
                        self.diagnostics.push(static_type_mismatch(
                            &Type::array(Type::string()),
                            &ty,
                            &placeholder.expr.pos,
                        ));
                    }
                }
                Type::Any { .. } => {}
                _ => {
                    self.diagnostics.push(static_type_mismatch(
                        &Type::array(Type::string()),
                        &ty,
                        &placeholder.expr.pos,
                    ));
                }
            }

            return;
        }

        if options.true_value.is_some() || options.false_value.is_some() {
            if options.true_value.is_none() || options.false_value.is_none() {
                self.diagnostics.push(incompatible_operand(
                    "the `true` and `false` placeholder options must be specified together",
                    &placeholder.pos,
                ));
            }

            if !ty.coerces(&Type::boolean().with_optional(true), false) {
                self.diagnostics.push(static_type_mismatch(
                    &Type::boolean(),
                    &ty,
                    &placeholder.expr.pos,
                ));
            }

            return;
        }

        // Without options, the expression must be string-coercible; optional
        // values render as empty text (or the `default` option)
        if !ty.coerces(&Type::string().with_optional(true), false) {
            self.diagnostics.push(static_type_mismatch(
                &Type::string(),
                &ty,
                &placeholder.expr.pos,
            ));
        }
    }

    /// Resolves a type annotation to a semantic type.
    fn resolve_type(&mut self, ty: &ast::TypeExpr) -> Type {
        let base = match &ty.kind {
            ast::TypeExprKind::Boolean => Type::boolean(),
            ast::TypeExprKind::Int => Type::int(),
            ast::TypeExprKind::Float => Type::float(),
            ast::TypeExprKind::String => Type::string(),
            ast::TypeExprKind::File => Type::file(),
            ast::TypeExprKind::Directory => Type::directory(),
            ast::TypeExprKind::Object => Type::object(IndexMap::new()),
            ast::TypeExprKind::Array(item) => {
                let item = self.resolve_type(item);
                if ty.nonempty {
                    Type::nonempty_array(item)
                } else {
                    Type::array(item)
                }
            }
            ast::TypeExprKind::Map(k, v) => {
                Type::map(self.resolve_type(k), self.resolve_type(v))
            }
            ast::TypeExprKind::Pair(l, r) => {
                Type::pair(self.resolve_type(l), self.resolve_type(r))
            }
            ast::TypeExprKind::Named(name) => match self.structs.get(name) {
                Some(members) => Type::struct_instance(name.clone(), members.clone()),
                None => {
                    self.diagnostics
                        .push(invalid_type(format!("unknown type `{name}`"), &ty.pos));
                    Type::any()
                }
            },
        };

        base.with_optional(ty.optional)
    }

    /// Infers the type of an expression, recording it in the type table.
    pub(crate) fn infer_expr(&mut self, expr: &Expr, env: &Bindings<Type>) -> Type {
        let ty = self.infer_kind(expr, env);
        self.types.insert(expr.id, ty.clone());
        ty
    }

    /// Infers the type of an expression's kind.
    fn infer_kind(&mut self, expr: &Expr, env: &Bindings<Type>) -> Type {
        match &expr.kind {
            ExprKind::Boolean(_) => Type::boolean(),
            ExprKind::Int(_) => Type::int(),
            ExprKind::Float(_) => Type::float(),
            ExprKind::None => Type::none(),
            ExprKind::String(parts) => {
                for part in parts {
                    if let StringPart::Placeholder(placeholder) = part {
                        self.check_placeholder(placeholder, env);
                    }
                }

                Type::string()
            }
            ExprKind::Array(items) => {
                let types: Vec<Type> = items.iter().map(|e| self.infer_expr(e, env)).collect();
                match Type::unify(types.iter(), self.check_quant) {
                    Some(item) => Type::Array {
                        item: Box::new(item),
                        optional: false,
                        nonempty: !items.is_empty(),
                    },
                    None => {
                        self.diagnostics.push(indeterminate_type(
                            "array items cannot be unified to a single type",
                            &expr.pos,
                        ));
                        Type::array(Type::any())
                    }
                }
            }
            ExprKind::Pair(left, right) => {
                let left = self.infer_expr(left, env);
                let right = self.infer_expr(right, env);
                Type::pair(left, right)
            }
            ExprKind::Map(entries) => {
                let keys: Vec<Type> = entries.iter().map(|(k, _)| self.infer_expr(k, env)).collect();
                let values: Vec<Type> =
                    entries.iter().map(|(_, v)| self.infer_expr(v, env)).collect();

                let key = Type::unify(keys.iter(), self.check_quant);
                let value = Type::unify(values.iter(), self.check_quant);
                match (key, value) {
                    (Some(key), Some(value)) => Type::map(key, value),
                    _ => {
                        self.diagnostics.push(indeterminate_type(
                            "map entries cannot be unified to a single key/value type",
                            &expr.pos,
                        ));
                        Type::map(Type::any(), Type::any())
                    }
                }
            }
            ExprKind::Object(members) => {
                let members: IndexMap<String, Type> = members
                    .iter()
                    .map(|(name, e)| (name.clone(), self.infer_expr(e, env)))
                    .collect();
                Type::object(members)
            }
            ExprKind::Struct(name, members) => {
                let Some(expected) = self.structs.get(name).cloned() else {
                    self.diagnostics
                        .push(invalid_type(format!("unknown type `{name}`"), &expr.pos));
                    return Type::any();
                };

                for (member, value) in members {
                    let actual = self.infer_expr(value, env);
                    match expected.get(member) {
                        Some(target) => {
                            if !actual.coerces(target, self.check_quant) {
                                self.diagnostics
                                    .push(static_type_mismatch(target, &actual, &value.pos));
                            }
                        }
                        None => {
                            let ty = Type::struct_instance(name.clone(), expected.clone());
                            self.diagnostics
                                .push(no_such_member(&ty, member, &value.pos));
                        }
                    }
                }

                for (member, target) in expected.iter() {
                    if !target.is_optional() && !members.iter().any(|(m, _)| m == member) {
                        self.diagnostics.push(invalid_type(
                            format!("missing required member `{member}` of struct `{name}`"),
                            &expr.pos,
                        ));
                    }
                }

                Type::struct_instance(name.clone(), expected)
            }
            ExprKind::Ident(name) => match env.resolve(name) {
                Some(ty) => ty.clone(),
                None => {
                    self.diagnostics.push(unknown_identifier(name, &expr.pos));
                    Type::any()
                }
            },
            ExprKind::Access(base, member) => {
                // A dotted chain of identifiers may name a binding directly
                // (e.g. a call output)
                if let Some(name) = dotted_name(expr) {
                    if let Some(ty) = env.resolve(&name) {
                        return ty.clone();
                    }
                }

                if let Some(base_name) = dotted_name(base) {
                    if env.resolve(&base_name).is_none() && env.has_namespace(&base_name) {
                        self.diagnostics.push(no_such_member(
                            &Type::object(IndexMap::new()),
                            member,
                            &expr.pos,
                        ));
                        return Type::any();
                    }
                }

                let base_ty = self.infer_expr(base, env);
                match &base_ty {
                    Type::Pair { left, right, .. } => match member.as_str() {
                        "left" => (**left).clone(),
                        "right" => (**right).clone(),
                        _ => {
                            self.diagnostics
                                .push(no_such_member(&base_ty, member, &expr.pos));
                            Type::any()
                        }
                    },
                    Type::Struct { members, name, .. } => match members.get(member) {
                        Some(ty) => ty.clone(),
                        None if name.is_empty() => Type::any(),
                        None => {
                            self.diagnostics
                                .push(no_such_member(&base_ty, member, &expr.pos));
                            Type::any()
                        }
                    },
                    Type::Any { .. } => Type::any(),
                    _ => {
                        self.diagnostics
                            .push(no_such_member(&base_ty, member, &expr.pos));
                        Type::any()
                    }
                }
            }
            ExprKind::Index(base, index) => {
                let base_ty = self.infer_expr(base, env);
                let index_ty = self.infer_expr(index, env);
                match &base_ty {
                    Type::Array { item, .. } => {
                        if !index_ty.coerces(&Type::int(), self.check_quant) {
                            self.diagnostics
                                .push(static_type_mismatch(&Type::int(), &index_ty, &index.pos));
                        }

                        (**item).clone()
                    }
                    Type::Map { key, value, .. } => {
                        if !index_ty.coerces(key, self.check_quant) {
                            self.diagnostics
                                .push(static_type_mismatch(key, &index_ty, &index.pos));
                        }

                        (**value).clone()
                    }
                    Type::Any { .. } => Type::any(),
                    _ => {
                        self.diagnostics.push(not_an_array(&base_ty, &base.pos));
                        Type::any()
                    }
                }
            }
            ExprKind::Unary(op, operand) => {
                let ty = self.infer_expr(operand, env);
                match op {
                    UnaryOp::Not => {
                        if !ty.coerces(&Type::boolean(), true) {
                            self.diagnostics.push(incompatible_operand(
                                format!("cannot apply `!` to type `{ty}`"),
                                &operand.pos,
                            ));
                        }

                        Type::boolean()
                    }
                    UnaryOp::Negate => match ty {
                        Type::Int { .. } => Type::int(),
                        Type::Float { .. } => Type::float(),
                        Type::Any { .. } => Type::any(),
                        ty => {
                            self.diagnostics.push(incompatible_operand(
                                format!("cannot negate type `{ty}`"),
                                &operand.pos,
                            ));
                            Type::int()
                        }
                    },
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let left = self.infer_expr(lhs, env);
                let right = self.infer_expr(rhs, env);
                self.infer_binary(*op, &left, &right, &expr.pos)
            }
            ExprKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let cond_ty = self.infer_expr(cond, env);
                if !cond_ty.coerces(&Type::boolean(), true) {
                    self.diagnostics.push(static_type_mismatch(
                        &Type::boolean(),
                        &cond_ty,
                        &cond.pos,
                    ));
                }

                let then_ty = self.infer_expr(then, env);
                let else_ty = self.infer_expr(otherwise, env);
                match Type::unify([&then_ty, &else_ty], self.check_quant) {
                    Some(ty) => ty,
                    None => {
                        self.diagnostics
                            .push(static_type_mismatch(&then_ty, &else_ty, &otherwise.pos));
                        Type::any()
                    }
                }
            }
            ExprKind::Apply(name, args) => {
                let Some(function) = stdlib::function(name) else {
                    self.diagnostics.push(no_such_function(name, &expr.pos));
                    return Type::any();
                };

                if self.version < function.min_version() {
                    self.diagnostics.push(no_such_function(name, &expr.pos));
                    return Type::any();
                }

                let typed: Vec<TypedArg> = args
                    .iter()
                    .map(|arg| TypedArg {
                        ty: self.infer_expr(arg, env),
                        pos: arg.pos.clone(),
                    })
                    .collect();

                match function.infer(&InferContext {
                    name,
                    args: &typed,
                    pos: &expr.pos,
                    check_quant: self.check_quant,
                }) {
                    Ok(ty) => ty,
                    Err(diagnostic) => {
                        self.diagnostics.push(diagnostic);
                        Type::any()
                    }
                }
            }
        }
    }

    /// Infers the result type of a binary operation.
    fn infer_binary(&mut self, op: BinaryOp, left: &Type, right: &Type, pos: &SourcePosition) -> Type {
        /// Determines if a type is numeric (or indeterminate).
        fn numeric(ty: &Type) -> bool {
            matches!(
                ty,
                Type::Int { .. } | Type::Float { .. } | Type::Any { .. }
            )
        }

        /// Determines if either type is a float (promoting the result).
        fn float_result(left: &Type, right: &Type) -> bool {
            matches!(left, Type::Float { .. }) || matches!(right, Type::Float { .. })
        }

        match op {
            BinaryOp::Add => {
                // `+` concatenates when either operand is a string
                let stringy = matches!(left, Type::String { .. })
                    || matches!(right, Type::String { .. });
                if stringy {
                    let both_ok = left.coerces(&Type::string().with_optional(true), false)
                        && right.coerces(&Type::string().with_optional(true), false);
                    if !both_ok {
                        self.diagnostics.push(incompatible_operand(
                            format!("cannot concatenate types `{left}` and `{right}`"),
                            pos,
                        ));
                    }

                    return Type::string()
                        .with_optional(left.is_optional() || right.is_optional());
                }

                if numeric(left) && numeric(right) {
                    if float_result(left, right) {
                        Type::float()
                    } else {
                        Type::int()
                    }
                } else {
                    self.diagnostics.push(incompatible_operand(
                        format!("cannot apply `+` to types `{left}` and `{right}`"),
                        pos,
                    ));
                    Type::any()
                }
            }
            BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Remainder => {
                if numeric(left) && numeric(right) {
                    if float_result(left, right) {
                        Type::float()
                    } else {
                        Type::int()
                    }
                } else {
                    self.diagnostics.push(incompatible_operand(
                        format!("cannot apply `{op}` to types `{left}` and `{right}`"),
                        pos,
                    ));
                    Type::any()
                }
            }
            BinaryOp::Less
            | BinaryOp::LessEqual
            | BinaryOp::Greater
            | BinaryOp::GreaterEqual => {
                let comparable = (numeric(left) && numeric(right))
                    || (left.coerces(&Type::string(), false)
                        && right.coerces(&Type::string(), false))
                    || (matches!(left, Type::Boolean { .. })
                        && matches!(right, Type::Boolean { .. }));
                if !comparable {
                    self.diagnostics.push(incompatible_operand(
                        format!("cannot compare types `{left}` and `{right}`"),
                        pos,
                    ));
                }

                Type::boolean()
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                if !left.coerces(right, false) && !right.coerces(left, false) {
                    self.diagnostics.push(incompatible_operand(
                        format!("cannot test equality of types `{left}` and `{right}`"),
                        pos,
                    ));
                }

                Type::boolean()
            }
            BinaryOp::And | BinaryOp::Or => {
                for ty in [left, right] {
                    if !ty.coerces(&Type::boolean(), true) {
                        self.diagnostics.push(incompatible_operand(
                            format!("cannot apply `{op}` to type `{ty}`"),
                            pos,
                        ));
                    }
                }

                Type::boolean()
            }
        }
    }
}
