//! Dirty-tracked host/device buffer
//!
//! A [`TypedBuffer`] owns a host-visible sequence of [`Value`]s together with
//! its device shadow. The items can only be changed through methods that also
//! mark the buffer dirty, so the device copy is rewritten exactly when it can
//! differ from the host copy.
//!
//! A buffer is not meant to be shared between threads while it is being
//! synced or dispatched; that is up to the caller.

use crate::backend::Backend;
use crate::error::{KiteError, Result};
use crate::types::{NativeScalar, TypeDescriptor, TypeRegistry, INT_TAG};
use crate::value::Value;
use log::{debug, trace};
use std::fmt;

/// Length and type of the last successful host → device sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SyncedShape {
    len: usize,
    tag: &'static str,
}

pub struct TypedBuffer<B: Backend> {
    items: Vec<Value>,
    element_type: &'static TypeDescriptor,
    device: Option<B::Memory>,
    host_cache: Vec<u8>,
    dirty: bool,
    is_output: bool,
    /// Type came from a tag rather than from the items
    explicit_type: bool,
    synced: Option<SyncedShape>,
}

impl<B: Backend> TypedBuffer<B> {
    fn with_type(
        items: Vec<Value>,
        element_type: &'static TypeDescriptor,
        explicit_type: bool,
    ) -> Self {
        let is_output = items.first().is_some_and(Value::is_null);
        Self {
            items,
            element_type,
            device: None,
            host_cache: Vec::new(),
            dirty: true,
            is_output,
            explicit_type,
            synced: None,
        }
    }

    /// Wraps a sequence, inferring its element type
    ///
    /// A sequence starting with a null is a placeholder for device output:
    /// it is marked as output and, if it holds no typed element at all,
    /// defaults to `int`.
    ///
    /// The type stays inferred: host writes that change the first typed
    /// element's kind change the element type on the next sync.
    pub fn wrap(items: Vec<Value>) -> Result<Self> {
        let registry = TypeRegistry::global();
        let element_type = match registry.infer_sequence(&items) {
            Ok(desc) => desc,
            Err(_) if items.first().is_some_and(Value::is_null) => registry.lookup(INT_TAG)?,
            Err(e) => return Err(e),
        };
        Ok(Self::with_type(items, element_type, false))
    }

    /// Wraps a sequence with an explicit element type
    pub fn wrap_as(items: Vec<Value>, tag: &str) -> Result<Self> {
        let element_type = TypeRegistry::global().lookup(tag)?;
        Ok(Self::with_type(items, element_type, true))
    }

    /// Wraps host numbers
    pub fn from_slice<T: Copy + Into<Value>>(items: &[T]) -> Result<Self> {
        Self::wrap(items.iter().map(|&v| v.into()).collect())
    }

    /// Output placeholder of `len` elements of type `int`
    pub fn output(len: usize) -> Result<Self> {
        Self::output_as(len, INT_TAG)
    }

    /// Output placeholder of `len` elements of the given type
    pub fn output_as(len: usize, tag: &str) -> Result<Self> {
        let mut buffer = Self::wrap_as(vec![Value::Null; len], tag)?;
        buffer.is_output = true;
        Ok(buffer)
    }

    /// Marks the buffer for read-back after every dispatch that uses it
    pub fn mark_output(&mut self) -> &mut Self {
        self.is_output = true;
        self
    }

    /// Consuming form of [`mark_output`](Self::mark_output)
    pub fn into_output(mut self) -> Self {
        self.is_output = true;
        self
    }

    pub fn is_output(&self) -> bool {
        self.is_output
    }

    /// Whether the buffer only awaits device output (first element is null)
    pub fn is_placeholder(&self) -> bool {
        self.items.first().is_some_and(Value::is_null)
    }

    pub fn is_dirty(&self) -> bool {
        if self.dirty || self.device.is_none() {
            return true;
        }
        match self.synced {
            Some(shape) => shape.len != self.items.len() || shape.tag != self.element_type.tag(),
            None => true,
        }
    }

    /// Forces the next sync to rewrite device memory
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn element_type(&self) -> &'static TypeDescriptor {
        self.element_type
    }

    /// Whether the element type was given by tag instead of inferred
    pub fn has_explicit_type(&self) -> bool {
        self.explicit_type
    }

    /// Re-infers an inferred type from the current items
    ///
    /// Sequences without a typed element keep their type.
    fn refresh_inferred_type(&mut self) {
        if self.explicit_type {
            return;
        }
        let Ok(inferred) = TypeRegistry::global().infer_sequence(&self.items) else {
            return;
        };
        if inferred.tag() != self.element_type.tag() {
            debug!("buffer element type {} -> {}", self.element_type, inferred);
            self.element_type = inferred;
        }
    }

    /// Changes the element type; the device copy is rebuilt on the next sync
    ///
    /// The type is fixed from then on and no longer follows the items.
    pub fn set_type(&mut self, tag: &str) -> Result<()> {
        let element_type = TypeRegistry::global().lookup(tag)?;
        self.explicit_type = true;
        if element_type.tag() != self.element_type.tag() {
            self.element_type = element_type;
            self.dirty = true;
        }
        Ok(())
    }

    /// Consuming form of [`set_type`](Self::set_type)
    pub fn to_type(mut self, tag: &str) -> Result<Self> {
        self.set_type(tag)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Size of the device region this buffer needs
    pub fn byte_len(&self) -> usize {
        self.items.len() * self.element_type.byte_width()
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(KiteError::IndexOutOfBounds { index, len })?;
        *slot = value.into();
        self.dirty = true;
        Ok(())
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.items.push(value.into());
        self.dirty = true;
    }

    pub fn extend<I, T>(&mut self, values: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        self.items.extend(values.into_iter().map(Into::into));
        self.dirty = true;
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
        self.dirty = true;
    }

    /// Replaces the whole sequence
    ///
    /// An explicit type is kept; an inferred one is re-inferred on the next
    /// sync.
    pub fn replace(&mut self, items: Vec<Value>) {
        self.items = items;
        self.dirty = true;
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }

    /// Items converted to a native scalar type
    pub fn values_as<T: NativeScalar>(&self) -> Result<Vec<T>> {
        self.items
            .iter()
            .map(|v| {
                T::from_value(v).ok_or_else(|| KiteError::Encode {
                    tag: self.element_type.tag(),
                    value: v.to_string(),
                })
            })
            .collect()
    }

    /// Raw staging bytes from the last transfer
    pub fn host_cache(&self) -> &[u8] {
        &self.host_cache
    }

    /// Device region, if one has been allocated
    pub fn device_memory(&self) -> Option<&B::Memory> {
        self.device.as_ref()
    }

    /// Drops the device region; the next sync allocates a new one
    pub fn release(&mut self) {
        if self.device.take().is_some() {
            trace!("released device region of {} buffer", self.element_type);
        }
        self.synced = None;
        self.dirty = true;
    }

    /// Writes the host items through to the device if they may differ
    ///
    /// Reallocates when the length or type changed since the last sync.
    /// Placeholder buffers skip encoding and upload zeroes.
    pub fn sync_to_device(&mut self, backend: &B, queue: &B::Queue) -> Result<()> {
        if self.dirty {
            self.refresh_inferred_type();
        }
        if !self.is_dirty() {
            trace!("buffer of {} x {} is clean", self.len(), self.element_type);
            return Ok(());
        }

        let shape = SyncedShape {
            len: self.items.len(),
            tag: self.element_type.tag(),
        };
        if self.is_placeholder() {
            self.host_cache.clear();
            self.host_cache.resize(self.byte_len(), 0);
        } else {
            self.element_type
                .encode_all(&self.items, &mut self.host_cache)?;
        }

        let memory = match self.device.take() {
            Some(memory) if self.synced == Some(shape) => memory,
            old => {
                // old region goes first
                drop(old);
                self.synced = None;
                debug!(
                    "allocating {} bytes for {} x {}",
                    self.byte_len(),
                    shape.len,
                    self.element_type
                );
                backend
                    .allocate(self.byte_len())
                    .map_err(KiteError::Memory)?
            }
        };
        let memory = self.device.insert(memory);
        backend
            .write(queue, memory, &self.host_cache)
            .map_err(KiteError::Memory)?;
        trace!("wrote {} bytes to device", self.host_cache.len());

        self.synced = Some(shape);
        self.dirty = false;
        Ok(())
    }

    /// Reads device memory back into the items (output buffers only)
    pub fn sync_from_device(&mut self, backend: &B, queue: &B::Queue) -> Result<()> {
        if !self.is_output {
            return Ok(());
        }
        let Some(memory) = self.device.as_ref() else {
            return Ok(());
        };

        self.host_cache.resize(self.byte_len(), 0);
        backend
            .read(queue, memory, &mut self.host_cache)
            .map_err(KiteError::Memory)?;
        trace!("read {} bytes from device", self.host_cache.len());

        let decoded = self.element_type.decode_all(&self.host_cache);
        for (item, value) in self.items.iter_mut().zip(decoded) {
            *item = value;
        }
        self.dirty = false;
        Ok(())
    }
}

impl<B: Backend> fmt::Debug for TypedBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedBuffer")
            .field("element_type", &self.element_type.tag())
            .field("len", &self.items.len())
            .field("dirty", &self.is_dirty())
            .field("is_output", &self.is_output)
            .finish()
    }
}

impl<B: Backend> fmt::Display for TypedBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<buffer {} x {}", self.element_type, self.items.len())?;
        if self.is_output {
            write!(f, ", output")?;
        }
        write!(f, ">")
    }
}

impl<B: Backend> PartialEq<[Value]> for TypedBuffer<B> {
    fn eq(&self, other: &[Value]) -> bool {
        self.items == other
    }
}

impl<B: Backend> PartialEq<Vec<Value>> for TypedBuffer<B> {
    fn eq(&self, other: &Vec<Value>) -> bool {
        &self.items == other
    }
}
