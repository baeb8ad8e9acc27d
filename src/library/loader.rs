//! Module loading: derives the export shape of a JavaScript entry module.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;
use tree_sitter::{Node, Parser};

use super::finder;
use super::types::LoadedModule;

/// Relative re-exports are followed at most this deep
const MAX_REEXPORT_DEPTH: usize = 4;

/// Turns an entry-point path into its export shape
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, entry_point: &Path) -> Result<LoadedModule>;
}

/// Loader that reads module source and analyzes it with tree-sitter.
///
/// Recognizes ES module exports (`export default`, `export function`,
/// `export { a as b }`, `export * from`) and CommonJS assignments
/// (`module.exports = ...`, `exports.x = ...`, `Object.defineProperty(exports, ...)`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceModuleLoader;

#[async_trait]
impl ModuleLoader for SourceModuleLoader {
    async fn load(&self, entry_point: &Path) -> Result<LoadedModule> {
        let path = entry_point.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut visited = HashSet::new();
            analyze_file(&path, 0, &mut visited)
        })
        .await
        .map_err(|e| anyhow!("Join error in module analysis: {e}"))?
    }
}

/// Analyze JavaScript source that is not backed by a file (re-exports are not followed)
pub fn analyze_source(source_code: &str) -> Result<LoadedModule> {
    let mut visited = HashSet::new();
    analyze(source_code, None, 0, &mut visited)
}

fn analyze_file(path: &Path, depth: usize, visited: &mut HashSet<PathBuf>) -> Result<LoadedModule> {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Ok(LoadedModule::default());
    }
    let source_code = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read module {}", path.display()))?;
    analyze(&source_code, Some(path), depth, visited)
}

fn analyze(
    source_code: &str,
    path: Option<&Path>,
    depth: usize,
    visited: &mut HashSet<PathBuf>,
) -> Result<LoadedModule> {
    let language: tree_sitter::Language = tree_sitter_javascript::LANGUAGE.into();
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .context("Error loading tree-sitter grammar for JavaScript")?;
    let tree = parser
        .parse(source_code, None)
        .ok_or_else(|| anyhow!("Failed to parse module source"))?;
    let root = tree.root_node();
    if root.has_error() {
        debug!(
            "Module {} has syntax errors; export detection is best effort",
            path.map(|p| p.display().to_string()).unwrap_or_default()
        );
    }

    let mut analyzer = Analyzer {
        source: source_code.as_bytes(),
        path,
        depth,
        locals: HashMap::new(),
        module: LoadedModule::default(),
        es_module_marker: false,
        cjs_default: None,
    };
    analyzer.collect_locals(root);
    for statement in root.named_children(&mut root.walk()) {
        if statement.kind() == "export_statement" {
            analyzer.visit_export(statement, visited);
        }
    }
    analyzer.visit_commonjs(root, visited);
    Ok(analyzer.finish())
}

struct Analyzer<'a> {
    source: &'a [u8],
    path: Option<&'a Path>,
    depth: usize,
    locals: HashMap<String, Node<'a>>,
    module: LoadedModule,
    es_module_marker: bool,
    /// `exports.default = ...` seen; only a default with an `__esModule` marker
    cjs_default: Option<Value>,
}

impl<'a> Analyzer<'a> {
    fn text(&self, node: Node<'a>) -> &'a str {
        node.utf8_text(self.source).unwrap_or_default()
    }

    /// Top-level function, class and variable declarations by name
    fn collect_locals(&mut self, root: Node<'a>) {
        for statement in root.named_children(&mut root.walk()) {
            let declaration = if statement.kind() == "export_statement" {
                match statement.child_by_field_name("declaration") {
                    Some(d) => d,
                    None => continue,
                }
            } else {
                statement
            };
            match declaration.kind() {
                "function_declaration" | "generator_function_declaration" | "class_declaration" => {
                    if let Some(name) = declaration.child_by_field_name("name") {
                        self.locals.insert(self.text(name).to_string(), declaration);
                    }
                }
                "lexical_declaration" | "variable_declaration" => {
                    for declarator in declaration.named_children(&mut declaration.walk()) {
                        if declarator.kind() != "variable_declarator" {
                            continue;
                        }
                        if let (Some(name), Some(value)) = (
                            declarator.child_by_field_name("name"),
                            declarator.child_by_field_name("value"),
                        ) {
                            self.locals.insert(self.text(name).to_string(), value);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_export(&mut self, node: Node<'a>, visited: &mut HashSet<PathBuf>) {
        let is_default = node
            .children(&mut node.walk())
            .any(|child| child.kind() == "default");

        if let Some(declaration) = node.child_by_field_name("declaration") {
            if is_default {
                self.module.default_export = Some(self.describe(declaration));
                return;
            }
            self.export_declaration(declaration);
            return;
        }

        if let Some(value) = node.child_by_field_name("value") {
            if is_default {
                self.module.default_export = Some(self.describe(value));
            }
            return;
        }

        let reexported = node
            .child_by_field_name("source")
            .and_then(|source| self.follow(self.text(source), visited));

        let clause = node
            .named_children(&mut node.walk())
            .find(|child| child.kind() == "export_clause");

        match (clause, reexported) {
            (Some(clause), reexported) => {
                for specifier in clause.named_children(&mut clause.walk()) {
                    if specifier.kind() != "export_specifier" {
                        continue;
                    }
                    let Some(name) = specifier.child_by_field_name("name") else {
                        continue;
                    };
                    let local = strip_quotes(self.text(name));
                    let exported = specifier
                        .child_by_field_name("alias")
                        .map(|alias| strip_quotes(self.text(alias)))
                        .unwrap_or(local);
                    let value = match &reexported {
                        Some(module) => lookup_export(module, local),
                        None => self
                            .locals
                            .get(local)
                            .map(|n| self.describe(*n))
                            .unwrap_or_else(value_descriptor),
                    };
                    if exported == "default" {
                        self.module.default_export = Some(value);
                    } else {
                        self.module.named_exports.insert(exported.to_string(), value);
                    }
                }
            }
            // export * from './x'
            (None, Some(module)) => {
                for (name, value) in module.named_exports {
                    if name != "default" {
                        self.module.named_exports.entry(name).or_insert(value);
                    }
                }
            }
            (None, None) => {}
        }
    }

    fn export_declaration(&mut self, declaration: Node<'a>) {
        match declaration.kind() {
            "lexical_declaration" | "variable_declaration" => {
                for declarator in declaration.named_children(&mut declaration.walk()) {
                    if declarator.kind() != "variable_declarator" {
                        continue;
                    }
                    let Some(name) = declarator.child_by_field_name("name") else {
                        continue;
                    };
                    let value = declarator
                        .child_by_field_name("value")
                        .map(|v| self.describe(v))
                        .unwrap_or_else(value_descriptor);
                    self.module
                        .named_exports
                        .insert(self.text(name).to_string(), value);
                }
            }
            _ => {
                if let Some(name) = declaration.child_by_field_name("name") {
                    let value = self.describe(declaration);
                    self.module
                        .named_exports
                        .insert(self.text(name).to_string(), value);
                }
            }
        }
    }

    /// CommonJS assignments anywhere in the tree (covers UMD-style wrappers)
    fn visit_commonjs(&mut self, node: Node<'a>, visited: &mut HashSet<PathBuf>) {
        match node.kind() {
            "assignment_expression" => self.visit_assignment(node, visited),
            "call_expression" => self.visit_define_property(node),
            _ => {}
        }
        for child in node.named_children(&mut node.walk()) {
            self.visit_commonjs(child, visited);
        }
    }

    fn visit_assignment(&mut self, node: Node<'a>, visited: &mut HashSet<PathBuf>) {
        let (Some(left), Some(right)) = (
            node.child_by_field_name("left"),
            node.child_by_field_name("right"),
        ) else {
            return;
        };

        if self.is_module_exports(left) {
            self.assign_module_exports(right, visited);
            return;
        }

        if left.kind() != "member_expression" {
            return;
        }
        let (Some(object), Some(property)) = (
            left.child_by_field_name("object"),
            left.child_by_field_name("property"),
        ) else {
            return;
        };
        if !self.is_exports_object(object) {
            return;
        }
        let name = self.text(property);
        match name {
            "__esModule" => self.es_module_marker = true,
            "default" => self.cjs_default = Some(self.describe(right)),
            _ => {
                let value = self.describe(right);
                self.module.named_exports.insert(name.to_string(), value);
            }
        }
    }

    fn assign_module_exports(&mut self, right: Node<'a>, visited: &mut HashSet<PathBuf>) {
        let target = self.dereference(right);
        match target.kind() {
            "object" => {
                for member in target.named_children(&mut target.walk()) {
                    match member.kind() {
                        "pair" => {
                            if let (Some(key), Some(value)) = (
                                member.child_by_field_name("key"),
                                member.child_by_field_name("value"),
                            ) {
                                let value = self.describe(value);
                                self.module
                                    .named_exports
                                    .insert(strip_quotes(self.text(key)).to_string(), value);
                            }
                        }
                        "shorthand_property_identifier" => {
                            let name = self.text(member);
                            let value = self
                                .locals
                                .get(name)
                                .map(|n| self.describe(*n))
                                .unwrap_or_else(value_descriptor);
                            self.module.named_exports.insert(name.to_string(), value);
                        }
                        "method_definition" => {
                            if let Some(name) = member.child_by_field_name("name") {
                                let value = self.describe(member);
                                self.module
                                    .named_exports
                                    .insert(self.text(name).to_string(), value);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "call_expression" => {
                if let Some(module) = self.required_module(target, visited) {
                    if module.default_export.is_some() {
                        self.module.default_export = module.default_export;
                    }
                    self.module.named_exports.extend(module.named_exports);
                }
            }
            _ => {
                let descriptor = self.describe(target);
                if is_callable(&descriptor) {
                    self.module.default_export = Some(descriptor);
                }
            }
        }
    }

    /// `Object.defineProperty(exports, "name", ...)`
    fn visit_define_property(&mut self, node: Node<'a>) {
        let Some(function) = node.child_by_field_name("function") else {
            return;
        };
        if self.text(function) != "Object.defineProperty" {
            return;
        }
        let Some(arguments) = node.child_by_field_name("arguments") else {
            return;
        };
        let args: Vec<Node<'a>> = arguments.named_children(&mut arguments.walk()).collect();
        let [target, name, ..] = args.as_slice() else {
            return;
        };
        if !self.is_exports_object(*target) || name.kind() != "string" {
            return;
        }
        match strip_quotes(self.text(*name)) {
            "__esModule" => self.es_module_marker = true,
            "default" => self.cjs_default = Some(value_descriptor()),
            other => {
                self.module
                    .named_exports
                    .entry(other.to_string())
                    .or_insert_with(value_descriptor);
            }
        }
    }

    fn required_module(
        &self,
        call: Node<'a>,
        visited: &mut HashSet<PathBuf>,
    ) -> Option<LoadedModule> {
        let function = call.child_by_field_name("function")?;
        if self.text(function) != "require" {
            return None;
        }
        let arguments = call.child_by_field_name("arguments")?;
        let specifier = arguments
            .named_children(&mut arguments.walk())
            .find(|arg| arg.kind() == "string")?;
        self.follow(self.text(specifier), visited)
    }

    /// Load a relative module specifier next to the current file
    fn follow(&self, specifier: &str, visited: &mut HashSet<PathBuf>) -> Option<LoadedModule> {
        let specifier = strip_quotes(specifier);
        if !specifier.starts_with('.') || self.depth >= MAX_REEXPORT_DEPTH {
            return None;
        }
        let dir = self.path?.parent()?;
        let target = finder::resolve_file(&dir.join(specifier))?;
        match analyze_file(&target, self.depth + 1, visited) {
            Ok(module) => Some(module),
            Err(e) => {
                debug!("Failed to follow re-export '{}': {}", specifier, e);
                None
            }
        }
    }

    fn is_module_exports(&self, node: Node<'a>) -> bool {
        node.kind() == "member_expression" && self.text(node) == "module.exports"
    }

    fn is_exports_object(&self, node: Node<'a>) -> bool {
        (node.kind() == "identifier" && self.text(node) == "exports")
            || self.is_module_exports(node)
    }

    /// Follow a bare identifier to its top-level declaration
    fn dereference(&self, node: Node<'a>) -> Node<'a> {
        if node.kind() == "identifier" {
            if let Some(local) = self.locals.get(self.text(node)) {
                return *local;
            }
        }
        node
    }

    fn describe(&self, node: Node<'a>) -> Value {
        let node = self.dereference(node);
        match node.kind() {
            "function_declaration"
            | "function_expression"
            | "function"
            | "generator_function"
            | "generator_function_declaration"
            | "arrow_function"
            | "method_definition" => json!({
                "kind": "function",
                "params": self.parameters(node),
                "async": is_async(node),
            }),
            "class_declaration" | "class" => self.describe_class(node),
            "object" => {
                let members: Vec<String> = node
                    .named_children(&mut node.walk())
                    .filter_map(|member| match member.kind() {
                        "pair" | "method_definition" => member
                            .child_by_field_name("key")
                            .or_else(|| member.child_by_field_name("name"))
                            .map(|k| strip_quotes(self.text(k)).to_string()),
                        "shorthand_property_identifier" => Some(self.text(member).to_string()),
                        _ => None,
                    })
                    .collect();
                json!({ "kind": "object", "members": members })
            }
            _ => value_descriptor(),
        }
    }

    fn describe_class(&self, node: Node<'a>) -> Value {
        let mut params = Vec::new();
        let mut methods = Vec::new();
        if let Some(body) = node.child_by_field_name("body") {
            for member in body.named_children(&mut body.walk()) {
                if member.kind() != "method_definition" {
                    continue;
                }
                let Some(name) = member.child_by_field_name("name") else {
                    continue;
                };
                let name = self.text(name);
                if name == "constructor" {
                    params = self.parameters(member);
                } else {
                    methods.push(name.to_string());
                }
            }
        }
        json!({
            "kind": "class",
            "params": params,
            "async": false,
            "methods": methods,
        })
    }

    fn parameters(&self, node: Node<'a>) -> Vec<String> {
        if let Some(single) = node.child_by_field_name("parameter") {
            return vec![self.text(single).to_string()];
        }
        let Some(params) = node.child_by_field_name("parameters") else {
            return Vec::new();
        };
        params
            .named_children(&mut params.walk())
            .filter(|p| p.kind() != "comment")
            .map(|p| match p.kind() {
                "assignment_pattern" => p
                    .child_by_field_name("left")
                    .map(|left| self.text(left))
                    .unwrap_or_default()
                    .to_string(),
                _ => self.text(p).to_string(),
            })
            .collect()
    }

    fn finish(mut self) -> LoadedModule {
        if self.module.default_export.is_none() {
            if let Some(default) = self.cjs_default.take() {
                if self.es_module_marker {
                    self.module.default_export = Some(default);
                } else {
                    self.module
                        .named_exports
                        .insert("default".to_string(), default);
                }
            }
        }
        self.module
    }
}

fn is_async(node: Node<'_>) -> bool {
    node.children(&mut node.walk())
        .any(|child| child.kind() == "async")
}

fn is_callable(descriptor: &Value) -> bool {
    matches!(
        descriptor.get("kind").and_then(Value::as_str),
        Some("function") | Some("class")
    )
}

fn value_descriptor() -> Value {
    json!({ "kind": "value", "params": [], "async": false })
}

fn lookup_export(module: &LoadedModule, name: &str) -> Value {
    if name == "default" {
        if let Some(default) = &module.default_export {
            return default.clone();
        }
    }
    module
        .named_exports
        .get(name)
        .cloned()
        .unwrap_or_else(value_descriptor)
}

fn strip_quotes(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}
