//! Kernel signature extraction for the host backend
//!
//! The grammar in `signature.pest` only recognises the outline of each
//! kernel definition. Type names are resolved here, against the type
//! registry, so the host backend knows how wide every by-value parameter is.

use crate::types::TypeRegistry;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use std::fmt;

#[derive(Parser)]
#[grammar = "backend/signature.pest"]
struct SignatureParser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ParamKind {
    /// `__global T*` and friends
    Pointer,
    /// By-value parameter of the given width
    Scalar(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct ParamDecl {
    pub(crate) text: String,
    pub(crate) kind: ParamKind,
}

#[derive(Debug, Clone)]
pub(crate) struct KernelDecl {
    pub(crate) name: String,
    pub(crate) params: Vec<ParamDecl>,
}

/// Spellings of scalar types that differ from their registry tag
const TYPE_ALIASES: &[(&str, &str)] = &[
    ("unsigned char", "uchar"),
    ("unsigned short", "ushort"),
    ("unsigned int", "uint"),
    ("unsigned", "uint"),
    ("unsigned long", "ulong"),
    ("signed char", "char"),
    ("_Bool", "bool"),
];

/// Position and message of a rejected source, compiler style
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignatureError {
    pub(crate) line: usize,
    pub(crate) column: usize,
    pub(crate) message: String,
}

impl SignatureError {
    fn at(pair: &Pair<'_, Rule>, message: impl Into<String>) -> Self {
        let (line, column) = pair.line_col();
        Self {
            line,
            column,
            message: message.into(),
        }
    }

    fn from_pest_error(err: pest::error::Error<Rule>) -> Self {
        let (line, column) = match err.line_col {
            pest::error::LineColLocation::Pos((l, c)) => (l, c),
            pest::error::LineColLocation::Span((l, c), _) => (l, c),
        };
        Self {
            line,
            column,
            message: err.variant.message().to_string(),
        }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<source>:{}:{}: error: {}", self.line, self.column, self.message)
    }
}

type Result<T> = std::result::Result<T, SignatureError>;

/// Finds every `__kernel void name(params) { ... }` definition
///
/// Top level may only hold kernel definitions, comments and preprocessor
/// lines.
pub(crate) fn parse_kernels(source: &str, registry: &TypeRegistry) -> Result<Vec<KernelDecl>> {
    let pairs =
        SignatureParser::parse(Rule::source, source).map_err(SignatureError::from_pest_error)?;

    let mut kernels = Vec::new();
    for pair in pairs.flat_map(Pair::into_inner) {
        match pair.as_rule() {
            Rule::kernel_def => kernels.push(parse_kernel_def(pair, registry)?),
            Rule::stray => return Err(stray_error(&pair)),
            _ => {}
        }
    }
    Ok(kernels)
}

fn stray_error(pair: &Pair<'_, Rule>) -> SignatureError {
    match pair.as_str() {
        "__kernel" | "kernel" => SignatureError::at(pair, "malformed kernel definition"),
        word if pair.clone().into_inner().next().is_some() => {
            SignatureError::at(pair, format!("unknown type name '{word}'"))
        }
        _ => SignatureError::at(pair, "expected kernel definition"),
    }
}

fn parse_kernel_def(pair: Pair<'_, Rule>, registry: &TypeRegistry) -> Result<KernelDecl> {
    let mut name = String::new();
    let mut params = Vec::new();

    for p in pair.into_inner() {
        match p.as_rule() {
            Rule::return_type if p.as_str() != "void" => {
                return Err(SignatureError::at(&p, "kernel must have void return type"));
            }
            Rule::ident => name = p.as_str().to_string(),
            Rule::param_list => params = parse_param_list(p, registry)?,
            Rule::body => {
                if !p.clone().into_inner().any(|b| b.as_rule() == Rule::body_end) {
                    return Err(SignatureError::at(&p, "expected '}' to close kernel body"));
                }
            }
            _ => {}
        }
    }

    Ok(KernelDecl { name, params })
}

fn parse_param_list(pair: Pair<'_, Rule>, registry: &TypeRegistry) -> Result<Vec<ParamDecl>> {
    let params: Vec<Pair<'_, Rule>> = pair.into_inner().collect();
    // `f()` and `f(void)`
    if let [only] = params.as_slice() {
        if matches!(only.as_str(), "" | "void") {
            return Ok(Vec::new());
        }
    }
    params.into_iter().map(|p| parse_param(p, registry)).collect()
}

fn parse_param(pair: Pair<'_, Rule>, registry: &TypeRegistry) -> Result<ParamDecl> {
    let text = pair.as_str();
    if text.is_empty() {
        return Err(SignatureError::at(&pair, "expected parameter declarator"));
    }

    let mut is_pointer = false;
    let mut words = Vec::new();
    for p in pair.clone().into_inner() {
        match p.as_rule() {
            Rule::pointer => is_pointer = true,
            Rule::ident => words.push(p.as_str()),
            _ => {}
        }
    }

    let kind = if is_pointer {
        ParamKind::Pointer
    } else {
        let width = scalar_width(&words, registry).ok_or_else(|| {
            SignatureError::at(&pair, format!("unknown type in parameter '{text}'"))
        })?;
        ParamKind::Scalar(width)
    };
    Ok(ParamDecl {
        text: text.to_string(),
        kind,
    })
}

fn scalar_width(words: &[&str], registry: &TypeRegistry) -> Option<usize> {
    // last word is the parameter name
    let (_, type_words) = words.split_last()?;
    if type_words.is_empty() {
        return None;
    }
    let spelled = type_words.join(" ");
    let tag = TYPE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == spelled)
        .map_or(spelled.as_str(), |(_, tag)| tag);
    registry.lookup(tag).ok().map(|d| d.byte_width())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(source: &str) -> Result<Vec<KernelDecl>> {
        parse_kernels(source, TypeRegistry::global())
    }

    #[test]
    fn test_comments_and_directives_are_skipped() {
        let kernels = parse(
            "/* header { */\n\
             #define N 4\n\
             __kernel void a(__global int *x) { // }\n x[0] = N; }\n\
             kernel void b(void) { { } }",
        )
        .unwrap();
        let names: Vec<&str> = kernels.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(kernels[0].params[0].kind, ParamKind::Pointer);
        assert!(kernels[1].params.is_empty());
    }

    #[rstest]
    #[case("unsigned char c", ParamKind::Scalar(1))]
    #[case("const short s", ParamKind::Scalar(2))]
    #[case("unsigned n", ParamKind::Scalar(4))]
    #[case("double d", ParamKind::Scalar(8))]
    #[case("__global float4 *v", ParamKind::Pointer)]
    #[case("__local int* restrict scratch", ParamKind::Pointer)]
    fn test_parameter_kinds(#[case] param: &str, #[case] kind: ParamKind) {
        let kernels = parse(&format!("__kernel void k({param}) {{ }}")).unwrap();
        assert_eq!(kernels[0].params[0].text, param);
        assert_eq!(kernels[0].params[0].kind, kind);
    }

    #[rstest]
    #[case("__kernel void f(int x,) { }", 1, 23, "expected parameter declarator")]
    #[case("__kernel void (int x) { }", 1, 1, "malformed kernel definition")]
    #[case("}", 1, 1, "expected kernel definition")]
    fn test_rejected_sources(
        #[case] source: &str,
        #[case] line: usize,
        #[case] column: usize,
        #[case] message: &str,
    ) {
        let err = parse(source).unwrap_err();
        assert_eq!((err.line, err.column), (line, column));
        assert_eq!(err.message, message);
    }
}
