//! Source analysis: import discovery and module-syntax rewriting
//!
//! The bundler core only depends on [`SourceAnalyzer`]. [`EsmAnalyzer`] is the
//! default implementation: it parses the module with `oxc`, collects the
//! specifiers of its static `import` and `export ... from` declarations, and
//! splices `require`/`exports` replacements into the source at the
//! declarations' spans. Everything else is copied through untouched, so it does
//! not down-level any other syntax.

use std::{fmt::Write as _, path::Path};

use anyhow::bail;
use log::trace;
use oxc::{
    allocator::Allocator,
    ast::ast::{
        Declaration, ExportAllDeclaration, ExportDefaultDeclaration, ExportDefaultDeclarationKind,
        ExportNamedDeclaration, ImportDeclaration, ImportDeclarationSpecifier, ModuleExportName,
        Statement,
    },
    parser::{Parser, ParserReturn},
    span::{GetSpan, SourceType, Span},
};

/// Result of analyzing one module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    /// Import specifiers in source order, duplicates included
    pub imports: Vec<String>,
    /// Code to embed in the bundle
    pub code: String,
}

pub trait SourceAnalyzer: Send + Sync {
    fn analyze(&self, source: &str, path: &Path) -> anyhow::Result<Analysis>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EsmAnalyzer;

impl SourceAnalyzer for EsmAnalyzer {
    fn analyze(&self, source: &str, path: &Path) -> anyhow::Result<Analysis> {
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, source, SourceType::mjs()).parse();
        check_diagnostics(&ret, "syntax error")?;

        let mut rewriter = Rewriter::new(source);
        for statement in ret.program.body.iter() {
            rewriter.statement(statement)?;
        }
        let analysis = rewriter.finish();

        // The rewritten body must still parse as a CommonJS factory
        let factory = format!(
            "(function (require, module, exports) {{\n{}\n}});",
            analysis.code
        );
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &factory, SourceType::cjs()).parse();
        check_diagnostics(&ret, "module cannot run as a bundled factory")?;

        trace!(
            "Analyzed {}: {} import(s)",
            path.display(),
            analysis.imports.len()
        );
        Ok(analysis)
    }
}

fn check_diagnostics(ret: &ParserReturn<'_>, what: &str) -> anyhow::Result<()> {
    if ret.panicked || !ret.errors.is_empty() {
        let messages = ret
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        bail!("{what}: {}", messages.join("; "));
    }
    Ok(())
}

/// Collects span replacements and trailing `exports` assignments
struct Rewriter<'s> {
    source: &'s str,
    imports: Vec<String>,
    edits: Vec<(Span, String)>,
    /// (exported, local), assigned after the module body
    exports: Vec<(String, String)>,
    temporaries: usize,
}

impl<'s> Rewriter<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            imports: Vec::new(),
            edits: Vec::new(),
            exports: Vec::new(),
            temporaries: 0,
        }
    }

    fn statement(&mut self, statement: &Statement<'_>) -> anyhow::Result<()> {
        match statement {
            Statement::ImportDeclaration(decl) => self.import(decl),
            Statement::ExportAllDeclaration(decl) => {
                self.export_all(decl);
                Ok(())
            }
            Statement::ExportNamedDeclaration(decl) => self.export_named(decl),
            Statement::ExportDefaultDeclaration(decl) => {
                self.export_default(decl);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn import(&mut self, decl: &ImportDeclaration<'_>) -> anyhow::Result<()> {
        if decl.phase.is_some() {
            bail!(
                "unsupported import phase at line {}",
                self.line_of(decl.span)
            );
        }
        let require = self.require(&decl.source.value);

        let mut default = None;
        let mut namespace = None;
        let mut named = Vec::new();
        for specifier in decl.specifiers.iter().flat_map(|specifiers| specifiers.iter()) {
            match specifier {
                ImportDeclarationSpecifier::ImportDefaultSpecifier(binding) => {
                    default = Some(binding.local.name.as_str());
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(binding) => {
                    namespace = Some(binding.local.name.as_str());
                }
                ImportDeclarationSpecifier::ImportSpecifier(binding) => {
                    named.push((export_name(&binding.imported), binding.local.name.as_str()));
                }
            }
        }

        let named = (!named.is_empty()).then(|| destructure(&named));
        let replacement = match (default, namespace, &named) {
            (None, None, None) => format!("{require};"),
            (Some(default), None, None) => format!("const {default} = {require}.default;"),
            (None, Some(namespace), None) => format!("const {namespace} = {require};"),
            (None, None, Some(named)) => format!("const {named} = {require};"),
            _ => {
                let temp = self.temporary();
                let mut parts = vec![format!("const {temp} = {require};")];
                if let Some(default) = default {
                    parts.push(format!("const {default} = {temp}.default;"));
                }
                if let Some(namespace) = namespace {
                    parts.push(format!("const {namespace} = {temp};"));
                }
                if let Some(named) = &named {
                    parts.push(format!("const {named} = {temp};"));
                }
                parts.join(" ")
            }
        };
        self.edits.push((decl.span, replacement));
        Ok(())
    }

    fn export_all(&mut self, decl: &ExportAllDeclaration<'_>) {
        let require = self.require(&decl.source.value);
        let replacement = match &decl.exported {
            Some(name) => format!("{} = {require};", exports_member(&export_name(name))),
            None => format!(
                "(function (m) {{ for (var k in m) if (k !== \"default\") exports[k] = m[k]; }})({require});"
            ),
        };
        self.edits.push((decl.span, replacement));
    }

    fn export_named(&mut self, decl: &ExportNamedDeclaration<'_>) -> anyhow::Result<()> {
        if let Some(source) = &decl.source {
            let require = self.require(&source.value);
            let temp = self.temporary();
            let mut parts = vec![format!("const {temp} = {require};")];
            for specifier in decl.specifiers.iter() {
                parts.push(format!(
                    "{} = {};",
                    exports_member(&export_name(&specifier.exported)),
                    member(&temp, &export_name(&specifier.local)),
                ));
            }
            self.edits.push((decl.span, parts.join(" ")));
            return Ok(());
        }

        let Some(declaration) = &decl.declaration else {
            for specifier in decl.specifiers.iter() {
                self.exports.push((
                    export_name(&specifier.exported),
                    export_name(&specifier.local),
                ));
            }
            self.edits.push((decl.span, String::new()));
            return Ok(());
        };

        let names: Vec<String> = match declaration {
            Declaration::VariableDeclaration(var) => var
                .declarations
                .iter()
                .flat_map(|declarator| declarator.id.get_binding_identifiers())
                .map(|ident| ident.name.to_string())
                .collect(),
            Declaration::FunctionDeclaration(func) => {
                func.id.iter().map(|id| id.name.to_string()).collect()
            }
            Declaration::ClassDeclaration(class) => {
                class.id.iter().map(|id| id.name.to_string()).collect()
            }
            _ => bail!(
                "unsupported export declaration at line {}",
                self.line_of(decl.span)
            ),
        };
        for name in names {
            self.exports.push((name.clone(), name));
        }
        // Drop the `export` keyword and keep the declaration text
        self.edits
            .push((Span::new(decl.span.start, declaration.span().start), String::new()));
        Ok(())
    }

    fn export_default(&mut self, decl: &ExportDefaultDeclaration<'_>) {
        let body = decl.declaration.span();
        let prefix = Span::new(decl.span.start, body.start);
        let named = match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(func) => Some(func.id.as_ref()),
            ExportDefaultDeclarationKind::ClassDeclaration(class) => Some(class.id.as_ref()),
            _ => None,
        };
        match named {
            // `export default function name() {}` keeps the binding
            Some(Some(id)) => {
                self.exports.push(("default".to_owned(), id.name.to_string()));
                self.edits.push((prefix, String::new()));
            }
            Some(None) => {
                self.edits.push((prefix, "exports.default = ".to_owned()));
                self.edits.push((Span::new(body.end, body.end), ";".to_owned()));
            }
            None => self.edits.push((prefix, "exports.default = ".to_owned())),
        }
    }

    /// Record a dependency and return the expression that loads it
    fn require(&mut self, specifier: &str) -> String {
        self.imports.push(specifier.to_owned());
        format!("require({})", quote(specifier))
    }

    fn temporary(&mut self) -> String {
        let name = format!("__minipack_import_{}", self.temporaries);
        self.temporaries += 1;
        name
    }

    fn line_of(&self, span: Span) -> usize {
        self.source[..span.start as usize].matches('\n').count() + 1
    }

    fn finish(self) -> Analysis {
        let mut code = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for (span, replacement) in &self.edits {
            code.push_str(&self.source[cursor..span.start as usize]);
            code.push_str(replacement);
            cursor = span.end as usize;
        }
        code.push_str(&self.source[cursor..]);

        if !self.exports.is_empty() && !code.is_empty() && !code.ends_with('\n') {
            code.push('\n');
        }
        for (exported, local) in &self.exports {
            let _ = writeln!(code, "{} = {local};", exports_member(exported));
        }

        Analysis {
            imports: self.imports,
            code,
        }
    }
}

fn export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::IdentifierName(ident) => ident.name.to_string(),
        ModuleExportName::IdentifierReference(ident) => ident.name.to_string(),
        ModuleExportName::StringLiteral(literal) => literal.value.to_string(),
    }
}

fn destructure(named: &[(String, &str)]) -> String {
    let fields = named
        .iter()
        .map(|(imported, local)| {
            if imported == local {
                imported.clone()
            } else if is_identifier(imported) {
                format!("{imported}: {local}")
            } else {
                format!("{}: {local}", quote(imported))
            }
        })
        .collect::<Vec<_>>();
    format!("{{ {} }}", fields.join(", "))
}

fn exports_member(name: &str) -> String {
    member("exports", name)
}

fn member(object: &str, name: &str) -> String {
    if is_identifier(name) {
        format!("{object}.{name}")
    } else {
        format!("{object}[{}]", quote(name))
    }
}

fn quote(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
