//! Structured function signatures recovered from semi-formal declarations.
//!
//! A declaration looks like `<return-type> <name>(<type> <name>, ...);`.
//! Return and argument types are kept as verbatim text, so nested generic
//! lists such as `std::vector<std::pair<int, int> >` survive untouched.

use std::fmt;
use lazy_static::lazy_static;
use regex::Regex;

/// One argument slot of a declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    /// Verbatim type text (e.g. `std::map<int, int>`)
    pub type_text: String,
    /// Identifier, absent when the declaration gave none
    pub name: Option<String>,
}

impl Parameter {
    /// Create a named parameter.
    pub fn named(type_text: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_text: type_text.into(),
            name: Some(name.into()),
        }
    }

    /// Create an unnamed parameter.
    pub fn unnamed(type_text: impl Into<String>) -> Self {
        Self {
            type_text: type_text.into(),
            name: None,
        }
    }

    /// Render as it appears inside an argument list.
    pub fn render(&self) -> String {
        match self.name {
            Some(ref name) => format!("{} {}", self.type_text, name),
            None => self.type_text.clone(),
        }
    }
}

/// Identity tag for a type, used when registering a primitive's slots.
///
/// Tags compare on their verbatim text; two spellings of the same type
/// (`std::pair<int,int>` and `std::pair<int, int>`) are distinct tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeTag(String);

impl TypeTag {
    /// Create a tag from type text.
    pub fn new(type_text: impl Into<String>) -> Self {
        Self(type_text.into())
    }

    /// The tagged type text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render as a runtime type-identity expression.
    pub fn render(&self) -> String {
        format!("typeid({})", self.0)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A structured view of one function declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Verbatim return type text
    pub return_type: String,
    /// Function identifier
    pub name: String,
    /// Arguments in source order
    pub parameters: Vec<Parameter>,
    /// Free-text explanation paired with the declaration
    pub description: String,
}

impl Signature {
    /// Parse a bare declaration such as `int foo(int a, bool b);`.
    ///
    /// Returns `None` when the text does not follow the declaration grammar.
    pub fn parse(declaration: &str) -> Option<Self> {
        let captures = DECLARATION.captures(declaration)?;

        let return_type = captures.name("ret")?.as_str().to_string();
        let name = captures.name("name")?.as_str().to_string();
        let args = captures.name("args")?.as_str();

        let mut parameters = Vec::new();
        if !args.trim().is_empty() {
            for segment in split_arguments(args) {
                if segment.is_empty() {
                    return None;
                }
                parameters.push(split_type_name(&segment));
            }
        }

        Some(Self {
            return_type,
            name,
            parameters,
            description: String::new(),
        })
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Canonical lookup key: `ret name(type1 name1, type2 name2);`.
    pub fn canonical_key(&self) -> String {
        let args: Vec<String> = self.parameters.iter().map(Parameter::render).collect();
        format!("{} {}({});", self.return_type, self.name, args.join(", "))
    }

    /// Declaration without parameter names: `ret name(type1, type2);`.
    pub fn declaration(&self) -> String {
        let args: Vec<&str> = self
            .parameters
            .iter()
            .map(|p| p.type_text.as_str())
            .collect();
        format!("{} {}({});", self.return_type, self.name, args.join(", "))
    }

    /// Parameter type texts in order.
    pub fn parameter_types(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.type_text.as_str()).collect()
    }

    /// Type tags of the inputs, in slot order.
    pub fn input_tags(&self) -> Vec<TypeTag> {
        self.parameters
            .iter()
            .map(|p| TypeTag::new(p.type_text.clone()))
            .collect()
    }

    /// Type tag of the output.
    pub fn output_tag(&self) -> TypeTag {
        TypeTag::new(self.return_type.clone())
    }

    /// Parameter names, substituting `arg<i>` where the declaration had none.
    pub fn argument_names(&self) -> Vec<String> {
        self.parameters
            .iter()
            .enumerate()
            .map(|(i, p)| p.name.clone().unwrap_or_else(|| format!("arg{}", i)))
            .collect()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_key())
    }
}

lazy_static! {
    // Declaration grammar. The return type is lazy so the shortest prefix
    // that still leaves `name(args);` wins.
    static ref DECLARATION: Regex =
        Regex::new(r"^\s*(?P<ret>.+?)\s+(?P<name>[a-zA-Z_]\w*)\s*\((?P<args>.*)\)\s*;\s*$").unwrap();
}

/// Split an argument list on top-level commas.
///
/// Commas nested inside `<...>` belong to a template argument list and are
/// not separators. Each segment is trimmed.
pub fn split_arguments(args: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut depth: i64 = 0;

    for c in args.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            ',' if depth == 0 => {
                segments.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    if !current.is_empty() {
        segments.push(current.trim().to_string());
    }

    segments
}

/// Separate an argument segment into type text and optional name.
///
/// Splits on the last space, but only when the trailing token is an
/// identifier; otherwise the whole segment is the type.
pub fn split_type_name(segment: &str) -> Parameter {
    match segment.rsplit_once(' ') {
        Some((type_text, name)) if is_identifier(name) => Parameter::named(type_text, name),
        _ => Parameter::unnamed(segment),
    }
}

/// Whether `s` is a valid identifier (letter or `_`, then letters, digits, `_`).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}
