//! Type registry
//!
//! A frozen table of the scalar types kernels can receive. Each entry names
//! the native representation of a type tag: its byte width and the functions
//! that move a [`Value`] in and out of that representation. Nothing else in
//! kite knows how wide a type is; buffers, the binder and the host backend
//! all ask the registry.

use crate::error::{KiteError, Result};
use crate::value::Value;
use half::f16;
use log::debug;
use std::fmt;
use std::sync::OnceLock;

/// Writes `value` into a native slot; returns `false` if it has no representation
pub type EncodeFn = fn(&Value, &mut [u8]) -> bool;

/// Reads a native slot back into a value
pub type DecodeFn = fn(&[u8]) -> Value;

/// Tag used for integral values that fit in 32 bits
pub const INT_TAG: &str = "int";
/// Tag used for integral values outside the 32-bit range
pub const LONG_TAG: &str = "long";
/// Tag used for unsigned values beyond `i64::MAX`
pub const ULONG_TAG: &str = "ulong";
/// Tag used for floating-point values
pub const FLOAT_TAG: &str = "float";
/// Tag used for booleans
pub const BOOL_TAG: &str = "bool";

/// A Rust scalar with a fixed little-endian device representation
pub trait NativeScalar: Copy + 'static {
    const WIDTH: usize;

    /// Converts a host value with C cast semantics; `None` for null
    fn from_value(value: &Value) -> Option<Self>;

    fn into_value(self) -> Value;

    fn write_le(self, out: &mut [u8]);

    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_native_int {
    ($view:ident, $wrap:expr; $($t:ty),*) => {
        $(
            impl NativeScalar for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn from_value(value: &Value) -> Option<Self> {
                    value.$view().map(|v| v as $t)
                }

                fn into_value(self) -> Value {
                    $wrap(self)
                }

                fn write_le(self, out: &mut [u8]) {
                    out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_native_int!(as_i64, |v| Value::Int(v as i64); i8, i16, i32, i64);
impl_native_int!(as_u64, |v| Value::from_unsigned(v as u64); u8, u16, u32, u64);

impl NativeScalar for f32 {
    const WIDTH: usize = 4;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }

    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }

    fn write_le(self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl NativeScalar for f64 {
    const WIDTH: usize = 8;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }

    fn write_le(self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        f64::from_le_bytes(raw)
    }
}

impl NativeScalar for f16 {
    const WIDTH: usize = 2;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().map(f16::from_f64)
    }

    fn into_value(self) -> Value {
        Value::Float(self.to_f64())
    }

    fn write_le(self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        f16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl NativeScalar for bool {
    const WIDTH: usize = 1;

    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn write_le(self, out: &mut [u8]) {
        out[0] = self as u8;
    }

    fn read_le(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

fn encode_native<T: NativeScalar>(value: &Value, out: &mut [u8]) -> bool {
    match T::from_value(value) {
        Some(v) => {
            v.write_le(out);
            true
        }
        None => false,
    }
}

fn decode_native<T: NativeScalar>(bytes: &[u8]) -> Value {
    T::read_le(bytes).into_value()
}

/// Native representation of one type tag
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    tag: &'static str,
    byte_width: usize,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl TypeDescriptor {
    pub const fn new(
        tag: &'static str,
        byte_width: usize,
        encode: EncodeFn,
        decode: DecodeFn,
    ) -> Self {
        Self {
            tag,
            byte_width,
            encode,
            decode,
        }
    }

    /// Descriptor whose width and conversions come from a Rust scalar
    pub fn native<T: NativeScalar>(tag: &'static str) -> Self {
        Self::new(tag, T::WIDTH, encode_native::<T>, decode_native::<T>)
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn byte_width(&self) -> usize {
        self.byte_width
    }

    /// Encodes one value into `out`, which must be exactly one slot wide
    pub fn encode_into(&self, value: &Value, out: &mut [u8]) -> Result<()> {
        debug_assert_eq!(out.len(), self.byte_width);
        if (self.encode)(value, out) {
            Ok(())
        } else {
            Err(KiteError::Encode {
                tag: self.tag,
                value: value.to_string(),
            })
        }
    }

    /// Encodes one value into a freshly allocated slot
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let mut slot = vec![0u8; self.byte_width];
        self.encode_into(value, &mut slot)?;
        Ok(slot)
    }

    /// Decodes one slot
    pub fn decode(&self, bytes: &[u8]) -> Value {
        (self.decode)(&bytes[..self.byte_width])
    }

    /// Encodes a whole sequence into `cache`, resizing it to fit
    ///
    /// Null items leave their slot zeroed.
    pub fn encode_all(&self, items: &[Value], cache: &mut Vec<u8>) -> Result<()> {
        cache.clear();
        cache.resize(items.len() * self.byte_width, 0);
        for (item, slot) in items.iter().zip(cache.chunks_exact_mut(self.byte_width)) {
            if item.is_null() {
                continue;
            }
            self.encode_into(item, slot)?;
        }
        Ok(())
    }

    /// Decodes every complete slot in `bytes`
    pub fn decode_all(&self, bytes: &[u8]) -> Vec<Value> {
        bytes
            .chunks_exact(self.byte_width)
            .map(|slot| (self.decode)(slot))
            .collect()
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("tag", &self.tag)
            .field("byte_width", &self.byte_width)
            .finish()
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.tag == other.tag && self.byte_width == other.byte_width
    }
}

impl Eq for TypeDescriptor {}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag)
    }
}

/// Collects descriptors before the registry is frozen
#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    entries: Vec<TypeDescriptor>,
}

impl TypeRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tag; a later registration of the same tag replaces the earlier one
    pub fn register(
        mut self,
        tag: &'static str,
        byte_width: usize,
        encode: EncodeFn,
        decode: DecodeFn,
    ) -> Self {
        let descriptor = TypeDescriptor::new(tag, byte_width, encode, decode);
        match self.entries.iter_mut().find(|d| d.tag == tag) {
            Some(existing) => *existing = descriptor,
            None => self.entries.push(descriptor),
        }
        self
    }

    pub fn register_native<T: NativeScalar>(self, tag: &'static str) -> Self {
        self.register(tag, T::WIDTH, encode_native::<T>, decode_native::<T>)
    }

    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            entries: self.entries,
        }
    }
}

static INSTALLED: OnceLock<TypeRegistry> = OnceLock::new();

/// Frozen table of type descriptors
#[derive(Debug)]
pub struct TypeRegistry {
    entries: Vec<TypeDescriptor>,
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::new()
    }

    /// Builder pre-populated with the OpenCL C scalar types
    ///
    /// Pointer-sized tags assume a 64-bit device address space.
    pub fn standard_builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::new()
            .register_native::<i8>("char")
            .register_native::<u8>("uchar")
            .register_native::<i16>("short")
            .register_native::<u16>("ushort")
            .register_native::<i32>(INT_TAG)
            .register_native::<u32>("uint")
            .register_native::<i64>(LONG_TAG)
            .register_native::<u64>(ULONG_TAG)
            .register_native::<f16>("half")
            .register_native::<f32>(FLOAT_TAG)
            .register_native::<f64>("double")
            .register_native::<bool>(BOOL_TAG)
            .register_native::<u64>("size_t")
            .register_native::<i64>("ptrdiff_t")
            .register_native::<i64>("intptr_t")
            .register_native::<u64>("uintptr_t")
    }

    /// Installs the process-wide registry
    ///
    /// Only possible before the first call to [`TypeRegistry::global`]; the
    /// rejected registry is handed back otherwise.
    pub fn install(registry: TypeRegistry) -> std::result::Result<(), TypeRegistry> {
        INSTALLED.set(registry)
    }

    /// The process-wide registry, frozen on first access
    pub fn global() -> &'static TypeRegistry {
        INSTALLED.get_or_init(|| {
            let registry = Self::standard_builder().build();
            debug!("type registry frozen with {} tags", registry.entries.len());
            registry
        })
    }

    pub fn lookup(&self, tag: &str) -> Result<&TypeDescriptor> {
        self.entries
            .iter()
            .find(|d| d.tag == tag)
            .ok_or_else(|| KiteError::UnknownType(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.iter().any(|d| d.tag == tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|d| d.tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Type a scalar gets when the caller did not annotate it
    pub fn infer(&self, value: &Value) -> Result<&TypeDescriptor> {
        let tag = match *value {
            Value::Null => {
                return Err(KiteError::TypeInference(
                    "null has no element type".to_string(),
                ))
            }
            Value::Bool(_) => BOOL_TAG,
            Value::Int(i) if i32::try_from(i).is_ok() => INT_TAG,
            Value::Int(_) => LONG_TAG,
            Value::UInt(u) if u <= i32::MAX as u64 => INT_TAG,
            Value::UInt(u) if u <= i64::MAX as u64 => LONG_TAG,
            Value::UInt(_) => ULONG_TAG,
            Value::Float(_) => FLOAT_TAG,
        };
        self.lookup(tag)
    }

    /// Type of a sequence: that of its first non-null element
    pub fn infer_sequence(&self, values: &[Value]) -> Result<&TypeDescriptor> {
        if values.is_empty() {
            return Err(KiteError::TypeInference(
                "empty sequence has no element type".to_string(),
            ));
        }
        match values.iter().find(|v| !v.is_null()) {
            Some(first) => self.infer(first),
            None => Err(KiteError::TypeInference(format!(
                "sequence of {} nulls has no element type",
                values.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn registry() -> &'static TypeRegistry {
        TypeRegistry::global()
    }

    #[rstest]
    #[case("char", 1)]
    #[case("uchar", 1)]
    #[case("short", 2)]
    #[case("ushort", 2)]
    #[case("int", 4)]
    #[case("uint", 4)]
    #[case("long", 8)]
    #[case("ulong", 8)]
    #[case("half", 2)]
    #[case("float", 4)]
    #[case("double", 8)]
    #[case("bool", 1)]
    #[case("size_t", 8)]
    #[case("ptrdiff_t", 8)]
    #[case("intptr_t", 8)]
    #[case("uintptr_t", 8)]
    fn test_standard_widths(#[case] tag: &str, #[case] width: usize) {
        assert_eq!(registry().lookup(tag).unwrap().byte_width(), width);
    }

    #[rstest]
    #[case("char", Value::Int(-5))]
    #[case("uchar", Value::Int(200))]
    #[case("short", Value::Int(-30000))]
    #[case("ushort", Value::Int(65000))]
    #[case("int", Value::Int(-2_000_000_000))]
    #[case("uint", Value::Int(4_000_000_000))]
    #[case("long", Value::Int(i64::MIN))]
    #[case("ulong", Value::UInt(u64::MAX))]
    #[case("double", Value::Float(0.1))]
    #[case("float", Value::Float(2.5))]
    #[case("bool", Value::Bool(true))]
    #[case("size_t", Value::Int(1 << 40))]
    fn test_round_trip(#[case] tag: &str, #[case] value: Value) {
        let desc = registry().lookup(tag).unwrap();
        let bytes = desc.encode(&value).unwrap();
        assert_eq!(bytes.len(), desc.byte_width());
        assert_eq!(desc.decode(&bytes), value);
    }

    #[rstest]
    #[case("half", 0.1, 1e-3)]
    #[case("half", 1234.5, 1.0)]
    #[case("float", 0.1, 1e-7)]
    fn test_lossy_round_trip_is_bounded(#[case] tag: &str, #[case] value: f64, #[case] bound: f64) {
        let desc = registry().lookup(tag).unwrap();
        let decoded = desc.decode(&desc.encode(&Value::Float(value)).unwrap());
        let decoded = decoded.as_f64().unwrap();
        assert!((decoded - value).abs() <= bound, "{decoded} vs {value}");
    }

    #[test]
    fn test_encode_uses_c_casts() {
        let uchar = registry().lookup("uchar").unwrap();
        assert_eq!(uchar.encode(&Value::Int(257)).unwrap(), vec![1]);

        let int = registry().lookup("int").unwrap();
        assert_eq!(int.encode(&Value::Float(2.9)).unwrap(), 2i32.to_le_bytes());
    }

    #[test]
    fn test_encode_null_fails() {
        let int = registry().lookup("int").unwrap();
        assert!(matches!(
            int.encode(&Value::Null),
            Err(KiteError::Encode { tag: "int", .. })
        ));
    }

    #[test]
    fn test_lookup_unknown_tag() {
        assert!(matches!(
            registry().lookup("unknown"),
            Err(KiteError::UnknownType(tag)) if tag == "unknown"
        ));
    }

    #[rstest]
    #[case(Value::Int(2), "int")]
    #[case(Value::Int(1 << 40), "long")]
    #[case(Value::UInt(u64::MAX), "ulong")]
    #[case(Value::Float(2.5), "float")]
    #[case(Value::Bool(true), "bool")]
    fn test_infer(#[case] value: Value, #[case] tag: &str) {
        assert_eq!(registry().infer(&value).unwrap().tag(), tag);
    }

    #[test]
    fn test_infer_sequence_uses_first_typed_element() {
        let values = [Value::Null, Value::Float(2.5), Value::Int(1)];
        assert_eq!(registry().infer_sequence(&values).unwrap().tag(), "float");
        assert_eq!(
            registry().infer_sequence(&[Value::Int(2)]).unwrap().tag(),
            "int"
        );
    }

    #[rstest]
    #[case(vec![])]
    #[case(vec![Value::Null, Value::Null])]
    fn test_infer_sequence_without_typed_element(#[case] values: Vec<Value>) {
        assert!(matches!(
            registry().infer_sequence(&values),
            Err(KiteError::TypeInference(_))
        ));
    }

    #[test]
    fn test_builder_replaces_duplicate_tags() {
        let registry = TypeRegistry::builder()
            .register_native::<i32>("word")
            .register_native::<i16>("word")
            .build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("word").unwrap().byte_width(), 2);
    }

    #[test]
    fn test_encode_all_and_decode_all() {
        let desc = registry().lookup("short").unwrap();
        let items = vec![Value::Int(1), Value::Int(-2), Value::Int(3)];
        let mut cache = Vec::new();
        desc.encode_all(&items, &mut cache).unwrap();
        assert_eq!(cache.len(), 6);
        assert_eq!(desc.decode_all(&cache), items);
    }

    #[test]
    fn test_encode_all_zeroes_null_slots() {
        let desc = registry().lookup("int").unwrap();
        let items = vec![Value::Int(1), Value::Null, Value::Int(3)];
        let mut cache = vec![0xff; 3];
        desc.encode_all(&items, &mut cache).unwrap();
        assert_eq!(
            desc.decode_all(&cache),
            vec![Value::Int(1), Value::Int(0), Value::Int(3)]
        );
    }
}
