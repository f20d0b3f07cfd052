//! Go source parsing.
//!
//! A thin layer over tree-sitter-go shared by the matcher (find a function
//! or struct by name) and the rewriter (full signature model plus byte
//! spans for edits). The parse is lossless with respect to the original
//! text: all rewriting happens as span-based edits on the source string,
//! so comments and formatting outside the edited spans survive untouched.

use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, Tree};

/// Query matching every top-level function and method declaration.
const FUNCTION_QUERY: &str = r#"
(function_declaration name: (identifier) @name) @func
(method_declaration name: (field_identifier) @name) @func
"#;

/// Query matching every top-level struct type declaration.
const STRUCT_QUERY: &str = r#"
(type_declaration (type_spec name: (type_identifier) @name type: (struct_type) @st))
"#;

fn go_language() -> Language {
    tree_sitter_go::LANGUAGE.into()
}

/// A parsed Go source file.
pub struct GoFile {
    source: String,
    tree: Tree,
}

impl GoFile {
    /// Parse Go source text. Syntax errors are load failures: a tree with
    /// error nodes cannot be rewritten safely.
    pub fn parse(source: String) -> Result<GoFile, String> {
        let mut parser = Parser::new();
        parser
            .set_language(&go_language())
            .map_err(|e| format!("failed to load Go grammar: {}", e))?;
        let tree = parser
            .parse(&source, None)
            .ok_or_else(|| "failed to parse Go source".to_string())?;
        if tree.root_node().has_error() {
            return Err("Go source contains syntax errors".to_string());
        }
        Ok(GoFile { source, tree })
    }

    /// Parse a Go file from disk.
    pub fn parse_file(path: &std::path::Path) -> Result<GoFile, String> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        GoFile::parse(source).map_err(|e| format!("{}: {}", path.display(), e))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn text(&self, node: Node) -> &str {
        &self.source[node.byte_range()]
    }

    /// Name from the package clause.
    pub fn package_name(&self) -> Option<String> {
        self.package_clause_name_span()
            .map(|(start, end)| self.source[start..end].to_string())
    }

    /// Byte span of the identifier in the package clause.
    pub fn package_clause_name_span(&self) -> Option<(usize, usize)> {
        let root = self.tree.root_node();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if child.kind() == "package_clause" {
                let mut inner = child.walk();
                for part in child.named_children(&mut inner) {
                    if part.kind() == "package_identifier" {
                        return Some((part.start_byte(), part.end_byte()));
                    }
                }
            }
        }
        None
    }

    /// Find a top-level function declaration by name and receiver type
    /// spelling. An empty receiver matches plain functions only; a
    /// non-empty receiver matches methods whose receiver base type equals
    /// the rule's, ignoring a `*` prefix on either side.
    pub fn find_function(&self, name: &str, recv: &str) -> Option<Node<'_>> {
        let query = Query::new(&go_language(), FUNCTION_QUERY).ok()?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, self.tree.root_node(), self.source.as_bytes());

        while let Some(m) = matches.next() {
            let mut func_node = None;
            let mut func_name = None;
            for capture in m.captures {
                match query.capture_names()[capture.index as usize] {
                    "func" => func_node = Some(capture.node),
                    "name" => func_name = Some(self.text(capture.node)),
                    _ => {}
                }
            }
            let (node, found) = match (func_node, func_name) {
                (Some(n), Some(f)) => (n, f),
                _ => continue,
            };
            if found != name {
                continue;
            }
            match (recv.is_empty(), node.kind()) {
                (true, "function_declaration") => return Some(node),
                (false, "method_declaration") => {
                    if let Some(recv_type) = self.receiver_type(node) {
                        if base_type_name(&recv_type) == base_type_name(recv) {
                            return Some(node);
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Find a top-level struct type declaration, returning the
    /// struct_type node.
    pub fn find_struct(&self, name: &str) -> Option<Node<'_>> {
        let query = Query::new(&go_language(), STRUCT_QUERY).ok()?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, self.tree.root_node(), self.source.as_bytes());

        while let Some(m) = matches.next() {
            let mut struct_node = None;
            let mut struct_name = None;
            for capture in m.captures {
                match query.capture_names()[capture.index as usize] {
                    "st" => struct_node = Some(capture.node),
                    "name" => struct_name = Some(self.text(capture.node)),
                    _ => {}
                }
            }
            if struct_name == Some(name) {
                return struct_node;
            }
        }
        None
    }

    /// Receiver type text of a method declaration, e.g. "*Client".
    pub fn receiver_type(&self, method: Node) -> Option<String> {
        let recv_list = method.child_by_field_name("receiver")?;
        let mut cursor = recv_list.walk();
        for decl in recv_list.named_children(&mut cursor) {
            if decl.kind() == "parameter_declaration" {
                if let Some(ty) = decl.child_by_field_name("type") {
                    return Some(self.text(ty).to_string());
                }
            }
        }
        None
    }

    /// The field_declaration_list child of a struct_type node.
    fn struct_field_list<'a>(&self, struct_type: Node<'a>) -> Option<Node<'a>> {
        let mut cursor = struct_type.walk();
        let result = struct_type
            .named_children(&mut cursor)
            .find(|c| c.kind() == "field_declaration_list");
        result
    }

    /// Names of the fields already declared in a struct_type node,
    /// including the type names of embedded fields.
    pub fn struct_field_names(&self, struct_type: Node) -> Vec<String> {
        let mut names = Vec::new();
        let Some(list) = self.struct_field_list(struct_type) else {
            return names;
        };
        let mut cursor = list.walk();
        for field in list.named_children(&mut cursor) {
            if field.kind() != "field_declaration" {
                continue;
            }
            let mut found_name = false;
            let mut inner = field.walk();
            for child in field.children_by_field_name("name", &mut inner) {
                names.push(self.text(child).to_string());
                found_name = true;
            }
            if !found_name {
                // Embedded field: its name is the base type name
                if let Some(ty) = field.child_by_field_name("type") {
                    names.push(base_type_name(self.text(ty)));
                }
            }
        }
        names
    }

    /// Byte position just before the closing brace of a struct_type's
    /// field list, where new fields are appended.
    pub fn struct_append_pos(&self, struct_type: Node) -> Option<usize> {
        let list = self.struct_field_list(struct_type)?;
        list.end_byte().checked_sub(1)
    }

    /// Extract the full signature model of a function or method node.
    pub fn func_signature(&self, node: Node) -> Result<FuncSig, String> {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string())
            .ok_or_else(|| "function declaration without a name".to_string())?;

        let recv = match node.child_by_field_name("receiver") {
            Some(list) => {
                let mut params = self.raw_params(list);
                if params.len() != 1 {
                    return Err(format!("method {} has a malformed receiver", name));
                }
                Some(params.remove(0))
            }
            None => None,
        };

        let type_params = match node.child_by_field_name("type_parameters") {
            Some(list) => self.raw_type_params(list),
            None => Vec::new(),
        };

        let params = match node.child_by_field_name("parameters") {
            Some(list) => self.raw_params(list),
            None => Vec::new(),
        };

        let result_span = node
            .child_by_field_name("result")
            .map(|res| (res.start_byte(), res.end_byte()));
        let results = match node.child_by_field_name("result") {
            Some(res) if res.kind() == "parameter_list" => self
                .raw_params(res)
                .into_iter()
                .flat_map(|p| {
                    // A grouped result like (a, b int) yields one slot per name
                    if p.names.is_empty() {
                        vec![ResultSlot {
                            name: None,
                            type_text: p.type_text.clone(),
                        }]
                    } else {
                        p.names
                            .iter()
                            .map(|n| ResultSlot {
                                name: Some(n.text.clone()),
                                type_text: p.type_text.clone(),
                            })
                            .collect()
                    }
                })
                .collect(),
            Some(res) => vec![ResultSlot {
                name: None,
                type_text: self.text(res).to_string(),
            }],
            None => Vec::new(),
        };

        let body = node
            .child_by_field_name("body")
            .ok_or_else(|| format!("function {} has no body", name))?;

        Ok(FuncSig {
            name,
            recv,
            type_params,
            params,
            results,
            result_span,
            body_span: (body.start_byte(), body.end_byte()),
        })
    }

    fn raw_params(&self, list: Node) -> Vec<RawParam> {
        let mut params = Vec::new();
        let mut cursor = list.walk();
        for decl in list.named_children(&mut cursor) {
            match decl.kind() {
                "parameter_declaration" | "variadic_parameter_declaration" => {}
                _ => continue,
            }
            let variadic = decl.kind() == "variadic_parameter_declaration";
            let mut names = Vec::new();
            let mut inner = decl.walk();
            for child in decl.children_by_field_name("name", &mut inner) {
                names.push(RawName {
                    text: self.text(child).to_string(),
                    span: (child.start_byte(), child.end_byte()),
                });
            }
            let (type_text, type_start) = match decl.child_by_field_name("type") {
                Some(ty) => (self.text(ty).to_string(), ty.start_byte()),
                None => continue,
            };
            params.push(RawParam {
                names,
                type_text,
                type_start,
                variadic,
            });
        }
        params
    }

    fn raw_type_params(&self, list: Node) -> Vec<RawParam> {
        let mut params = Vec::new();
        let mut cursor = list.walk();
        for decl in list.named_children(&mut cursor) {
            if decl.kind() != "type_parameter_declaration" {
                continue;
            }
            let mut names = Vec::new();
            let mut inner = decl.walk();
            for child in decl.children_by_field_name("name", &mut inner) {
                names.push(RawName {
                    text: self.text(child).to_string(),
                    span: (child.start_byte(), child.end_byte()),
                });
            }
            let (type_text, type_start) = match decl.child_by_field_name("type") {
                Some(ty) => (self.text(ty).to_string(), ty.start_byte()),
                None => continue,
            };
            params.push(RawParam {
                names,
                type_text,
                type_start,
                variadic: false,
            });
        }
        params
    }
}

/// Base type name of a type spelling: `*Client` -> `Client`,
/// `*Tree[K, V]` -> `Tree`.
pub fn base_type_name(spelling: &str) -> String {
    let s = spelling.trim().trim_start_matches('*').trim();
    match s.find('[') {
        Some(i) => s[..i].trim().to_string(),
        None => s.to_string(),
    }
}

/// Check that a rule's raw snippet parses as a Go statement.
pub fn statement_parses(snippet: &str) -> bool {
    let wrapped = format!("package p\n\nfunc otelCheck() {{\n{}\n}}\n", snippet);
    GoFile::parse(wrapped).is_ok()
}

/// One name in a parameter group, with its byte span for renames.
#[derive(Debug, Clone)]
pub struct RawName {
    pub text: String,
    pub span: (usize, usize),
}

/// One parameter group as written, possibly holding several names or none.
#[derive(Debug, Clone)]
pub struct RawParam {
    pub names: Vec<RawName>,
    pub type_text: String,
    /// Byte position of the type, where a synthesized name is inserted for
    /// unnamed parameters.
    pub type_start: usize,
    pub variadic: bool,
}

/// One result slot after group splitting.
#[derive(Debug, Clone)]
pub struct ResultSlot {
    pub name: Option<String>,
    pub type_text: String,
}

/// The signature model of a target function, spans included.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub name: String,
    pub recv: Option<RawParam>,
    pub type_params: Vec<RawParam>,
    pub params: Vec<RawParam>,
    pub results: Vec<ResultSlot>,
    /// Byte range of the result list as written, for verbatim reuse in
    /// the trampoline's body closure.
    pub result_span: Option<(usize, usize)>,
    /// Byte range of the body block, braces included.
    pub body_span: (usize, usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"package main

import "fmt"

type T struct {
	Existing int
	a, b     string
}

// Func1 does something.
func Func1(x int, y string) (int, error) {
	fmt.Println(x, y)
	return x, nil
}

func (t *T) Method(v int) int {
	return v + t.Existing
}

func Generic[K comparable, V any](key K, value V) V {
	return value
}

func Grouped(a, b int, _ string) {}
"#;

    fn parse() -> GoFile {
        GoFile::parse(SOURCE.to_string()).unwrap()
    }

    #[test]
    fn test_package_name() {
        assert_eq!(parse().package_name().as_deref(), Some("main"));
    }

    #[test]
    fn test_find_function() {
        let file = parse();
        assert!(file.find_function("Func1", "").is_some());
        assert!(file.find_function("Missing", "").is_none());
        // Plain-function lookup must not match a method
        assert!(file.find_function("Method", "").is_none());
    }

    #[test]
    fn test_find_method_receiver_star_insensitive() {
        let file = parse();
        assert!(file.find_function("Method", "*T").is_some());
        assert!(file.find_function("Method", "T").is_some());
        assert!(file.find_function("Method", "*Other").is_none());
    }

    #[test]
    fn test_find_struct() {
        let file = parse();
        let st = file.find_struct("T").unwrap();
        let names = file.struct_field_names(st);
        assert_eq!(names, vec!["Existing", "a", "b"]);
        assert!(file.find_struct("Missing").is_none());
    }

    #[test]
    fn test_struct_append_pos() {
        let file = parse();
        let st = file.find_struct("T").unwrap();
        let pos = file.struct_append_pos(st).unwrap();
        assert_eq!(&file.source()[pos..pos + 1], "}");
    }

    #[test]
    fn test_signature_simple() {
        let file = parse();
        let node = file.find_function("Func1", "").unwrap();
        let sig = file.func_signature(node).unwrap();
        assert_eq!(sig.name, "Func1");
        assert!(sig.recv.is_none());
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.params[0].names[0].text, "x");
        assert_eq!(sig.params[0].type_text, "int");
        assert_eq!(sig.results.len(), 2);
        assert_eq!(sig.results[0].type_text, "int");
        assert_eq!(sig.results[1].type_text, "error");
        let body = &file.source()[sig.body_span.0..sig.body_span.1];
        assert!(body.starts_with('{') && body.ends_with('}'));
        assert!(body.contains("fmt.Println"));
    }

    #[test]
    fn test_signature_method() {
        let file = parse();
        let node = file.find_function("Method", "*T").unwrap();
        let sig = file.func_signature(node).unwrap();
        let recv = sig.recv.unwrap();
        assert_eq!(recv.names[0].text, "t");
        assert_eq!(recv.type_text, "*T");
    }

    #[test]
    fn test_signature_generics() {
        let file = parse();
        let node = file.find_function("Generic", "").unwrap();
        let sig = file.func_signature(node).unwrap();
        assert_eq!(sig.type_params.len(), 2);
        assert_eq!(sig.type_params[0].names[0].text, "K");
        assert_eq!(sig.type_params[0].type_text, "comparable");
        assert_eq!(sig.type_params[1].names[0].text, "V");
    }

    #[test]
    fn test_signature_grouped_and_blank() {
        let file = parse();
        let node = file.find_function("Grouped", "").unwrap();
        let sig = file.func_signature(node).unwrap();
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.params[0].names.len(), 2);
        assert_eq!(sig.params[1].names[0].text, "_");
        assert!(sig.results.is_empty());
    }

    #[test]
    fn test_base_type_name() {
        assert_eq!(base_type_name("*Client"), "Client");
        assert_eq!(base_type_name("Client"), "Client");
        assert_eq!(base_type_name("*Tree[K, V]"), "Tree");
        assert_eq!(base_type_name(" *T "), "T");
    }

    #[test]
    fn test_statement_parses() {
        assert!(statement_parses("_ = 123"));
        assert!(statement_parses("fmt.Println(\"x\")"));
        assert!(!statement_parses("if {"));
    }

    #[test]
    fn test_syntax_error_rejected() {
        assert!(GoFile::parse("package main\n\nfunc broken( {".to_string()).is_err());
    }
}
