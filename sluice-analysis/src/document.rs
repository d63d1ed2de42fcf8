//! Loading, import resolution, and typed documents.
//!
//! [`load_document`] reads a WDL document from disk, recursively resolves
//! its imports (local paths and `file://` URLs), rejects import cycles,
//! and type-checks everything, producing an immutable [`Document`] that the
//! engine evaluates against.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use path_clean::PathClean;
use sluice_syntax::Diagnostic;
use sluice_syntax::Diagnostics;
use sluice_syntax::SourcePosition;
use sluice_syntax::WdlVersion;
use sluice_syntax::ast;
use sluice_syntax::ast::NodeId;
use sluice_syntax::parse_document;
use tracing::debug;
use url::Url;

use crate::check::Checker;
use crate::diagnostics::circular_import;
use crate::diagnostics::import_failed;
use crate::diagnostics::invalid_type;
use crate::diagnostics::multiple_definitions;
use crate::types::StructMembers;
use crate::types::Type;

/// The callable surface of a task or workflow.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    /// The available inputs by name.
    pub inputs: IndexMap<String, Type>,
    /// The names of inputs that must be bound by the caller.
    pub required: Vec<String>,
    /// The outputs by name.
    pub outputs: IndexMap<String, Type>,
}

/// The resolved types of a call statement.
#[derive(Debug, Clone)]
pub struct CallTypes {
    /// The import namespace path of the call target (empty for a local
    /// task).
    pub namespace: Vec<String>,
    /// Whether the target is a task (as opposed to a workflow).
    pub task: bool,
    /// The signature of the target.
    pub signature: Signature,
}

/// A parsed, resolved, and type-checked WDL document.
#[derive(Debug)]
pub struct Document {
    /// The URI the document was requested as.
    uri: String,
    /// The absolute path of the document.
    abspath: String,
    /// The parsed syntax tree.
    source: ast::Document,
    /// The imported documents by namespace.
    imports: IndexMap<String, Arc<Document>>,
    /// The struct types visible in the document (own and imported).
    structs: IndexMap<String, StructMembers>,
    /// The type assigned to every expression and declaration node.
    types: HashMap<NodeId, Type>,
    /// The resolved types of every call statement.
    calls: HashMap<NodeId, CallTypes>,
    /// The signatures of the document's tasks.
    task_signatures: IndexMap<String, Signature>,
    /// The signature of the document's workflow, if any.
    workflow_signature: Option<Signature>,
    /// Whether the workflow cannot be called from outside (an incomplete
    /// call, possibly transitively).
    workflow_uncallable: bool,
}

impl Document {
    /// Gets the URI the document was requested as.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Gets the absolute path of the document.
    pub fn abspath(&self) -> &str {
        &self.abspath
    }

    /// Gets the effective WDL version of the document.
    pub fn version(&self) -> WdlVersion {
        self.source.version
    }

    /// Gets the parsed syntax tree of the document.
    pub fn ast(&self) -> &ast::Document {
        &self.source
    }

    /// Gets a task of the document by name.
    pub fn task(&self, name: &str) -> Option<&ast::Task> {
        self.source.task(name)
    }

    /// Gets the workflow of the document, if present.
    pub fn workflow(&self) -> Option<&ast::Workflow> {
        self.source.workflow.as_ref()
    }

    /// Gets an imported document by namespace.
    pub fn namespace(&self, name: &str) -> Option<&Arc<Document>> {
        self.imports.get(name)
    }

    /// Iterates the imported documents by namespace.
    pub fn imports(&self) -> impl Iterator<Item = (&str, &Arc<Document>)> {
        self.imports.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Gets the struct types visible in the document.
    pub fn structs(&self) -> &IndexMap<String, StructMembers> {
        &self.structs
    }

    /// Gets the type assigned to a node by the checker.
    ///
    /// # Panics
    ///
    /// Panics if the node was not assigned a type, which indicates the
    /// document was not checked.
    pub fn type_of(&self, id: NodeId) -> &Type {
        self.types
            .get(&id)
            .expect("node should have been assigned a type")
    }

    /// Gets the resolved types of a call statement.
    pub fn call_types(&self, id: NodeId) -> &CallTypes {
        self.calls
            .get(&id)
            .expect("call should have been resolved")
    }

    /// Gets the signature of a task by name.
    pub fn task_signature(&self, name: &str) -> Option<&Signature> {
        self.task_signatures.get(name)
    }

    /// Gets the signature of the workflow, if present.
    pub fn workflow_signature(&self) -> Option<&Signature> {
        self.workflow_signature.as_ref()
    }

    /// Determines if the document's workflow cannot be called from outside.
    pub fn workflow_uncallable(&self) -> bool {
        self.workflow_uncallable
    }
}

/// Loads, resolves, and checks a document from a local path or `file://`
/// URL.
pub fn load_document(uri: &str, check_quant: bool) -> Result<Arc<Document>, Diagnostics> {
    let mut loader = Loader::new(check_quant);
    let path = resolve_uri(None, uri)
        .map_err(|e| Diagnostics::single(Diagnostic::error("SyntaxError", e)))?;
    loader.load_path(&path, uri, None)
}

/// Parses and checks a document from in-memory source.
///
/// Imports are resolved relative to `abspath`'s parent directory.
pub fn analyze_source(
    source: &str,
    uri: &str,
    abspath: &str,
    check_quant: bool,
) -> Result<Arc<Document>, Diagnostics> {
    let mut loader = Loader::new(check_quant);
    loader.load_source(source, uri, Path::new(abspath))
}

/// Resolves an import URI against an importing document's path.
fn resolve_uri(importer: Option<&Path>, uri: &str) -> Result<PathBuf, String> {
    if let Some(rest) = uri.strip_prefix("file://") {
        let url = Url::parse(uri).map_err(|e| format!("invalid URL `{uri}`: {e}"))?;
        return url
            .to_file_path()
            .map_err(|()| format!("URL `{rest}` has no local path form"));
    }

    if uri.contains("://") {
        return Err(format!(
            "unsupported import scheme in `{uri}`: only local paths and `file://` URLs may be \
             imported"
        ));
    }

    let path = Path::new(uri);
    if path.is_absolute() {
        return Ok(path.to_path_buf().clean());
    }

    match importer.and_then(|p| p.parent()) {
        Some(parent) => Ok(parent.join(path).clean()),
        None => Ok(path.to_path_buf().clean()),
    }
}

/// Recursive document loader with cycle detection and caching.
struct Loader {
    /// Whether optional/nonempty quantifiers are checked strictly.
    check_quant: bool,
    /// The absolute paths of documents currently being loaded.
    stack: Vec<String>,
    /// Already-loaded documents by absolute path.
    cache: HashMap<String, Arc<Document>>,
}

impl Loader {
    /// Creates a new loader.
    fn new(check_quant: bool) -> Self {
        Self {
            check_quant,
            stack: Vec::new(),
            cache: HashMap::new(),
        }
    }

    /// Loads a document from a path.
    fn load_path(
        &mut self,
        path: &Path,
        uri: &str,
        pos: Option<&SourcePosition>,
    ) -> Result<Arc<Document>, Diagnostics> {
        let abspath = path.to_string_lossy().to_string();
        if let Some(doc) = self.cache.get(&abspath) {
            return Ok(doc.clone());
        }

        if self.stack.contains(&abspath) {
            let pos = pos.cloned().unwrap_or_else(SourcePosition::unknown);
            return Err(Diagnostics::single(circular_import(uri, &pos)));
        }

        let source = fs::read_to_string(path).map_err(|e| {
            let pos = pos.cloned().unwrap_or_else(SourcePosition::unknown);
            Diagnostics::single(import_failed(uri, e, &pos))
        })?;

        self.load_source(&source, uri, path)
    }

    /// Parses and checks a document from source text.
    fn load_source(
        &mut self,
        source: &str,
        uri: &str,
        path: &Path,
    ) -> Result<Arc<Document>, Diagnostics> {
        let abspath = path.to_string_lossy().to_string();
        debug!(uri, %abspath, "loading WDL document");

        let parsed = parse_document(source, uri, &abspath).map_err(Diagnostics::single)?;

        self.stack.push(abspath.clone());
        let result = self.resolve_and_check(parsed, uri, &abspath, path);
        self.stack.pop();

        let document = result?;
        self.cache.insert(abspath, document.clone());
        Ok(document)
    }

    /// Resolves imports and type-checks a parsed document.
    fn resolve_and_check(
        &mut self,
        parsed: ast::Document,
        uri: &str,
        abspath: &str,
        path: &Path,
    ) -> Result<Arc<Document>, Diagnostics> {
        let mut diagnostics = Diagnostics::new();

        // Load every import and collect them under their namespaces
        let mut imports: IndexMap<String, Arc<Document>> = IndexMap::new();
        for import in &parsed.imports {
            let namespace = import.effective_namespace();
            if imports.contains_key(&namespace) {
                diagnostics.push(multiple_definitions(&namespace, &import.pos));
                continue;
            }

            let target = match resolve_uri(Some(path), &import.uri) {
                Ok(target) => target,
                Err(e) => {
                    diagnostics.push(import_failed(&import.uri, e, &import.pos));
                    continue;
                }
            };

            match self.load_path(&target, &import.uri, Some(&import.pos)) {
                Ok(doc) => {
                    imports.insert(namespace, doc);
                }
                Err(errors) => diagnostics.extend(errors),
            }
        }

        // Build the struct type table: imported structs first (applying
        // aliases), then the document's own definitions
        let mut structs: IndexMap<String, StructMembers> = IndexMap::new();
        for import in &parsed.imports {
            let Some(doc) = imports.get(&import.effective_namespace()) else {
                continue;
            };

            let aliases: HashMap<&str, &str> = import
                .aliases
                .iter()
                .map(|(a, b)| (a.as_str(), b.as_str()))
                .collect();

            for (name, members) in doc.structs() {
                let visible = aliases.get(name.as_str()).copied().unwrap_or(name);
                match structs.get(visible) {
                    Some(existing) if existing == members => {}
                    Some(_) => diagnostics.push(multiple_definitions(visible, &import.pos)),
                    None => {
                        structs.insert(visible.to_string(), members.clone());
                    }
                }
            }
        }

        resolve_own_structs(&parsed, &mut structs, &mut diagnostics);

        // Type-check tasks, then the workflow (which may call the tasks)
        let mut types = HashMap::new();
        let mut calls = HashMap::new();
        let mut task_signatures = IndexMap::new();

        {
            let mut checker = Checker::new(
                parsed.version,
                self.check_quant,
                &structs,
                &imports,
                &mut types,
                &mut calls,
                &mut diagnostics,
            );

            for task in &parsed.tasks {
                if task_signatures.contains_key(&task.name) {
                    checker.diagnostics().push(multiple_definitions(&task.name, &task.pos));
                    continue;
                }

                let signature = checker.check_task(task);
                task_signatures.insert(task.name.clone(), signature);
            }
        }

        let (workflow_signature, workflow_uncallable) = match &parsed.workflow {
            Some(workflow) => {
                let mut checker = Checker::new(
                    parsed.version,
                    self.check_quant,
                    &structs,
                    &imports,
                    &mut types,
                    &mut calls,
                    &mut diagnostics,
                );

                let (signature, uncallable) = checker.check_workflow(workflow, &task_signatures);
                (Some(signature), uncallable)
            }
            None => (None, false),
        };

        diagnostics.into_result()?;

        Ok(Arc::new(Document {
            uri: uri.to_string(),
            abspath: abspath.to_string(),
            source: parsed,
            imports,
            structs,
            types,
            calls,
            task_signatures,
            workflow_signature,
            workflow_uncallable,
        }))
    }
}

/// Resolves the document's own struct definitions into the struct table,
/// rejecting member-graph cycles and redefinitions.
fn resolve_own_structs(
    parsed: &ast::Document,
    structs: &mut IndexMap<String, StructMembers>,
    diagnostics: &mut Diagnostics,
) {
    let own: IndexMap<&str, &ast::StructDef> = parsed
        .structs
        .iter()
        .map(|def| (def.name.as_str(), def))
        .collect();

    // Reject self-reference cycles by walking the member type graph
    for def in &parsed.structs {
        let mut visiting = HashSet::new();
        if struct_cycle(def, &own, &mut visiting) {
            diagnostics.push(
                Diagnostic::error(
                    "CircularDependencies",
                    format!("struct `{name}` recursively references itself", name = def.name),
                )
                .with_highlight(def.pos.clone()),
            );
        }
    }

    // Resolve members iteratively until a fixed point; unresolvable names
    // surface as diagnostics on the final pass
    let mut remaining: Vec<&ast::StructDef> = parsed.structs.iter().collect();
    while !remaining.is_empty() {
        let before = remaining.len();
        remaining.retain(|def| {
            let mut members = IndexMap::new();
            for (name, ty) in &def.members {
                match resolve_struct_member(ty, structs) {
                    Some(resolved) => {
                        members.insert(name.clone(), resolved);
                    }
                    None => return true,
                }
            }

            if structs.contains_key(&def.name) {
                diagnostics.push(multiple_definitions(&def.name, &def.pos));
            } else {
                structs.insert(def.name.clone(), Arc::new(members));
            }

            false
        });

        if remaining.len() == before {
            // No progress; the rest reference unknown or cyclic types
            for def in &remaining {
                for (_, ty) in &def.members {
                    if resolve_struct_member(ty, structs).is_none() {
                        diagnostics.push(invalid_type(
                            format!(
                                "struct `{name}` has a member of unresolvable type",
                                name = def.name
                            ),
                            &ty.pos,
                        ));
                    }
                }
            }

            break;
        }
    }
}

/// Determines if a struct definition participates in a reference cycle.
fn struct_cycle<'a>(
    def: &'a ast::StructDef,
    own: &IndexMap<&str, &'a ast::StructDef>,
    visiting: &mut HashSet<&'a str>,
) -> bool {
    if !visiting.insert(&def.name) {
        return true;
    }

    for (_, ty) in &def.members {
        for name in named_refs(ty) {
            if let Some(next) = own.get(name.as_str()) {
                if struct_cycle(next, own, visiting) {
                    return true;
                }
            }
        }
    }

    visiting.remove(def.name.as_str());
    false
}

/// Collects the named type references within a type annotation.
fn named_refs(ty: &ast::TypeExpr) -> Vec<String> {
    match &ty.kind {
        ast::TypeExprKind::Named(name) => vec![name.clone()],
        ast::TypeExprKind::Array(item) => named_refs(item),
        ast::TypeExprKind::Map(k, v) => {
            let mut refs = named_refs(k);
            refs.extend(named_refs(v));
            refs
        }
        ast::TypeExprKind::Pair(l, r) => {
            let mut refs = named_refs(l);
            refs.extend(named_refs(r));
            refs
        }
        _ => Vec::new(),
    }
}

/// Resolves a struct member type annotation against the known struct table.
///
/// Returns `None` when the annotation references a struct that is not yet
/// in the table.
fn resolve_struct_member(
    ty: &ast::TypeExpr,
    structs: &IndexMap<String, StructMembers>,
) -> Option<Type> {
    let base = match &ty.kind {
        ast::TypeExprKind::Boolean => Type::boolean(),
        ast::TypeExprKind::Int => Type::int(),
        ast::TypeExprKind::Float => Type::float(),
        ast::TypeExprKind::String => Type::string(),
        ast::TypeExprKind::File => Type::file(),
        ast::TypeExprKind::Directory => Type::directory(),
        ast::TypeExprKind::Object => Type::object(IndexMap::new()),
        ast::TypeExprKind::Array(item) => {
            let item = resolve_struct_member(item, structs)?;
            if ty.nonempty {
                Type::nonempty_array(item)
            } else {
                Type::array(item)
            }
        }
        ast::TypeExprKind::Map(k, v) => Type::map(
            resolve_struct_member(k, structs)?,
            resolve_struct_member(v, structs)?,
        ),
        ast::TypeExprKind::Pair(l, r) => Type::pair(
            resolve_struct_member(l, structs)?,
            resolve_struct_member(r, structs)?,
        ),
        ast::TypeExprKind::Named(name) => {
            let members = structs.get(name)?;
            Type::struct_instance(name.clone(), members.clone())
        }
    };

    Some(base.with_optional(ty.optional))
}
