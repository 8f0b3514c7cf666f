//! Kernel arguments
//!
//! An invocation takes a positional list of [`Arg`]s. Each argument is
//! classified by its variant; the binder never has to guess what a value is
//! meant to be.

use crate::backend::Backend;
use crate::buffer::TypedBuffer;
use crate::error::{KiteError, Result};
use crate::planner::Extent;
use crate::types::{TypeDescriptor, TypeRegistry};
use crate::value::Value;
use std::fmt;

/// Key of the global size override
pub const TIMES_KEY: &str = "times";
/// Key of the local size hint
pub const LOCAL_SIZE_KEY: &str = "local_size";

/// A scalar with an explicit type tag
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypedValue {
    value: Value,
    element_type: &'static TypeDescriptor,
}

impl TypedValue {
    pub fn new(value: impl Into<Value>, tag: &str) -> Result<Self> {
        Ok(Self {
            value: value.into(),
            element_type: TypeRegistry::global().lookup(tag)?,
        })
    }

    pub fn value(&self) -> Value {
        self.value
    }

    pub fn element_type(&self) -> &'static TypeDescriptor {
        self.element_type
    }

    /// Native slot bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.element_type.encode(&self.value)
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}){}", self.element_type, self.value)
    }
}

impl Value {
    /// Annotates the value with a type tag
    pub fn to_type(self, tag: &str) -> Result<TypedValue> {
        TypedValue::new(self, tag)
    }
}

/// Value of one options entry
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Scalar(Value),
    List(Vec<Value>),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Scalar(v) => write!(f, "{v}"),
            OptionValue::List(items) => write_list(f, items),
        }
    }
}

impl From<Value> for OptionValue {
    fn from(v: Value) -> Self {
        OptionValue::Scalar(v)
    }
}

impl From<Vec<Value>> for OptionValue {
    fn from(v: Vec<Value>) -> Self {
        OptionValue::List(v)
    }
}

macro_rules! impl_option_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for OptionValue {
                fn from(v: $t) -> Self {
                    OptionValue::Scalar(v.into())
                }
            }

            impl From<Vec<$t>> for OptionValue {
                fn from(v: Vec<$t>) -> Self {
                    OptionValue::List(v.into_iter().map(Value::from).collect())
                }
            }

            impl<const N: usize> From<[$t; N]> for OptionValue {
                fn from(v: [$t; N]) -> Self {
                    OptionValue::List(v.into_iter().map(Value::from).collect())
                }
            }
        )*
    };
}

impl_option_value!(i32, i64, u32, u64, usize, f64, bool);

/// Trailing options map of an invocation
///
/// Recognized keys are `times` (global size override) and `local_size`
/// (local size hint), each an integer or a list of up to three integers.
/// Entries are checked when the invocation binds, not when they are set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchOptions {
    entries: Vec<(String, OptionValue)>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an entry; setting a key again replaces its value
    pub fn set(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn times(self, value: impl Into<OptionValue>) -> Self {
        self.set(TIMES_KEY, value)
    }

    pub fn local_size(self, value: impl Into<OptionValue>) -> Self {
        self.set(LOCAL_SIZE_KEY, value)
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validated `(times, local_size)` extents
    pub fn work_size(&self) -> Result<(Option<Extent>, Option<Extent>)> {
        let mut global = None;
        let mut local = None;
        for (key, value) in &self.entries {
            match key.as_str() {
                TIMES_KEY => global = Some(extent_of(key, value)?),
                LOCAL_SIZE_KEY => local = Some(extent_of(key, value)?),
                _ => {
                    return Err(KiteError::InvalidOptions(format!(
                        "unknown option `{key}` (expected `{TIMES_KEY}` or `{LOCAL_SIZE_KEY}`)"
                    )))
                }
            }
        }
        Ok((global, local))
    }
}

fn extent_of(key: &str, value: &OptionValue) -> Result<Extent> {
    let items: &[Value] = match value {
        OptionValue::Scalar(v) => std::slice::from_ref(v),
        OptionValue::List(items) => items,
    };
    let sizes = items
        .iter()
        .map(positive_size)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            KiteError::InvalidOptions(format!(
                "`{key}` must be a positive integer or a list of them, got {value}"
            ))
        })?;
    Extent::new(&sizes).map_err(|e| KiteError::InvalidOptions(format!("`{key}`: {e}")))
}

fn positive_size(value: &Value) -> Option<usize> {
    match *value {
        Value::Int(i) if i > 0 => usize::try_from(i).ok(),
        Value::UInt(u) => usize::try_from(u).ok(),
        _ => None,
    }
}

impl fmt::Display for DispatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        write!(f, "}}")
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    write!(f, "[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "]")
}

/// One positional kernel argument
pub enum Arg<'a, B: Backend> {
    /// Caller-owned buffer; read back after the kernel if it is an output
    Buffer(&'a mut TypedBuffer<B>),
    /// Buffer moved into the invocation; bound as input only, so it must not
    /// be a placeholder
    Owned(TypedBuffer<B>),
    /// Raw sequence, wrapped as an input buffer of inferred type
    Sequence(Vec<Value>),
    /// Scalar of inferred type
    Scalar(Value),
    /// Scalar with an explicit type tag
    Typed(TypedValue),
    /// Trailing options map
    Options(DispatchOptions),
}

impl<'a, B: Backend> Arg<'a, B> {
    /// Raw sequence with an explicit element type
    pub fn sequence_as(items: Vec<Value>, tag: &str) -> Result<Self> {
        Ok(Arg::Owned(TypedBuffer::wrap_as(items, tag)?))
    }

    pub fn is_options(&self) -> bool {
        matches!(self, Arg::Options(_))
    }
}

impl<'a, B: Backend> fmt::Display for Arg<'a, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Buffer(buffer) => write!(f, "{buffer}"),
            Arg::Owned(buffer) => write!(f, "{buffer}"),
            Arg::Sequence(items) => write_list(f, items),
            Arg::Scalar(value) => write!(f, "{value}"),
            Arg::Typed(value) => write!(f, "{value}"),
            Arg::Options(options) => write!(f, "{options}"),
        }
    }
}

impl<'a, B: Backend> fmt::Debug for Arg<'a, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arg({self})")
    }
}

impl<'a, B: Backend> From<&'a mut TypedBuffer<B>> for Arg<'a, B> {
    fn from(buffer: &'a mut TypedBuffer<B>) -> Self {
        Arg::Buffer(buffer)
    }
}

impl<'a, B: Backend> From<TypedBuffer<B>> for Arg<'a, B> {
    fn from(buffer: TypedBuffer<B>) -> Self {
        Arg::Owned(buffer)
    }
}

impl<'a, B: Backend> From<Vec<Value>> for Arg<'a, B> {
    fn from(items: Vec<Value>) -> Self {
        Arg::Sequence(items)
    }
}

impl<'a, B: Backend> From<Value> for Arg<'a, B> {
    fn from(value: Value) -> Self {
        Arg::Scalar(value)
    }
}

impl<'a, B: Backend> From<TypedValue> for Arg<'a, B> {
    fn from(value: TypedValue) -> Self {
        Arg::Typed(value)
    }
}

impl<'a, B: Backend> From<DispatchOptions> for Arg<'a, B> {
    fn from(options: DispatchOptions) -> Self {
        Arg::Options(options)
    }
}

macro_rules! impl_arg_from_host {
    ($($t:ty),*) => {
        $(
            impl<'a, B: Backend> From<$t> for Arg<'a, B> {
                fn from(v: $t) -> Self {
                    Arg::Scalar(v.into())
                }
            }

            impl<'a, B: Backend> From<Vec<$t>> for Arg<'a, B> {
                fn from(v: Vec<$t>) -> Self {
                    Arg::Sequence(v.into_iter().map(Value::from).collect())
                }
            }

            impl<'a, 'b, B: Backend> From<&'b [$t]> for Arg<'a, B> {
                fn from(v: &'b [$t]) -> Self {
                    Arg::Sequence(v.iter().map(|&x| Value::from(x)).collect())
                }
            }

            impl<'a, B: Backend, const N: usize> From<[$t; N]> for Arg<'a, B> {
                fn from(v: [$t; N]) -> Self {
                    Arg::Sequence(v.into_iter().map(Value::from).collect())
                }
            }
        )*
    };
}

impl_arg_from_host!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool);

/// Builds a `Vec<Arg>` from anything convertible into an argument
///
/// ```ignore
/// let result = program.invoke("copy", args![&mut out, vec![1, 2, 3]])?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::args::Arg::from($arg)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::HostBackend;
    use rstest::rstest;

    type HostArg<'a> = Arg<'a, HostBackend>;

    #[test]
    fn test_to_type() {
        let typed = Value::Int(2).to_type("char").unwrap();
        assert_eq!(typed.element_type().tag(), "char");
        assert_eq!(typed.encode().unwrap(), vec![2]);
        assert_eq!(typed.to_string(), "(char)2");

        assert!(matches!(
            Value::Int(1).to_type("unknown"),
            Err(KiteError::UnknownType(_))
        ));
    }

    #[test]
    fn test_classification() {
        let mut buffer = TypedBuffer::<HostBackend>::output(3).unwrap();
        let list: Vec<HostArg> = args![
            &mut buffer,
            vec![1, 2, 3],
            5,
            2.5f32,
            DispatchOptions::new().times(4)
        ];
        assert!(matches!(list[0], Arg::Buffer(_)));
        assert!(matches!(list[1], Arg::Sequence(_)));
        assert!(matches!(list[2], Arg::Scalar(Value::Int(5))));
        assert!(matches!(list[3], Arg::Scalar(Value::Float(_))));
        assert!(list[4].is_options());
    }

    #[test]
    fn test_printable_forms() {
        let seq: HostArg = vec![1, 2].into();
        assert_eq!(seq.to_string(), "[1, 2]");
        let options: HostArg = DispatchOptions::new().times([64, 2]).into();
        assert_eq!(options.to_string(), "{times: [64, 2]}");
    }

    #[test]
    fn test_work_size() {
        let options = DispatchOptions::new().times(258).local_size([2, 1]);
        let (global, local) = options.work_size().unwrap();
        assert_eq!(global.unwrap().sizes(), [258, 1, 1]);
        assert_eq!(local.unwrap().sizes(), [2, 1, 1]);
        assert_eq!(local.unwrap().dims(), 2);
    }

    #[test]
    fn test_set_replaces() {
        let options = DispatchOptions::new().times(1).times(2);
        assert_eq!(options.get(TIMES_KEY), Some(&OptionValue::Scalar(Value::Int(2))));
    }

    #[rstest]
    #[case(DispatchOptions::new().set("time", 1))]
    #[case(DispatchOptions::new().times(2.5))]
    #[case(DispatchOptions::new().times(0))]
    #[case(DispatchOptions::new().times(-3))]
    #[case(DispatchOptions::new().times(true))]
    #[case(DispatchOptions::new().times(Value::Null))]
    #[case(DispatchOptions::new().times(vec![1, 2, 3, 4]))]
    #[case(DispatchOptions::new().local_size(Vec::<Value>::new()))]
    fn test_invalid_options(#[case] options: DispatchOptions) {
        assert!(matches!(
            options.work_size(),
            Err(KiteError::InvalidOptions(_))
        ));
    }
}
