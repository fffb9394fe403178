//! Caller-owned process variables.
//!
//! The mapping layers never own application memory: they keep a
//! [`VarHandle`] into a [`VariableTable`] that the application passes in on
//! every call. The table only grows, so a handle stays valid for the lifetime
//! of the table.

use std::mem;

/// Non-owning reference to a slot of a [`VariableTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarHandle(usize);

impl VarHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F64(f64),
}

impl Value {
    /// Declared storage size, checked against the bit length of the bound object.
    pub fn byte_size(&self) -> usize {
        match self {
            Value::Bool(_) | Value::U8(_) | Value::I8(_) => 1,
            Value::U16(_) | Value::I16(_) => 2,
            Value::U32(_) | Value::I32(_) => 4,
            Value::F64(_) => 8,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Value::I8(_) | Value::I16(_) | Value::I32(_) | Value::F64(_)
        )
    }

    pub fn as_bool(&self) -> bool {
        match *self {
            Value::Bool(b) => b,
            Value::F64(v) => v != 0.0,
            _ => self.to_raw() != 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Bool(b) => b as u8 as f64,
            Value::U8(v) => v as f64,
            Value::I8(v) => v as f64,
            Value::U16(v) => v as f64,
            Value::I16(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::F64(v) => v,
        }
    }

    /// Bits put on the wire. The field width truncates them further.
    pub fn to_raw(&self) -> u32 {
        match *self {
            Value::Bool(b) => b as u32,
            Value::U8(v) => v as u32,
            Value::I8(v) => v as u32,
            Value::U16(v) => v as u32,
            Value::I16(v) => v as u32,
            Value::U32(v) => v,
            Value::I32(v) => v as u32,
            Value::F64(v) => v as i64 as u32,
        }
    }

    /// Stores `raw` read from a `bit_len` wide field, keeping the variant.
    ///
    /// Signed variables are sign-extended from the field width.
    pub fn store_raw(&mut self, raw: u32, bit_len: u8) {
        let signed = sign_extend(raw, bit_len);
        *self = match *self {
            Value::Bool(_) => Value::Bool(raw != 0),
            Value::U8(_) => Value::U8(raw as u8),
            Value::I8(_) => Value::I8(signed as i8),
            Value::U16(_) => Value::U16(raw as u16),
            Value::I16(_) => Value::I16(signed as i16),
            Value::U32(_) => Value::U32(raw),
            Value::I32(_) => Value::I32(signed),
            Value::F64(_) => Value::F64(signed as f64),
        };
    }

    /// Assigns `value`, converting it to the variant already held.
    pub fn assign(&mut self, value: Value) {
        if mem::discriminant(self) == mem::discriminant(&value) {
            *self = value;
            return;
        }
        let v = value.as_f64();
        *self = match *self {
            Value::Bool(_) => Value::Bool(value.as_bool()),
            Value::U8(_) => Value::U8(v as u8),
            Value::I8(_) => Value::I8(v as i8),
            Value::U16(_) => Value::U16(v as u16),
            Value::I16(_) => Value::I16(v as i16),
            Value::U32(_) => Value::U32(v as u32),
            Value::I32(_) => Value::I32(v as i32),
            Value::F64(_) => Value::F64(v),
        };
    }
}

fn sign_extend(raw: u32, bit_len: u8) -> i32 {
    if bit_len <= 1 || bit_len >= 32 {
        return raw as i32;
    }
    let shift = 32 - bit_len as u32;
    ((raw << shift) as i32) >> shift
}

#[derive(Debug, Default, Clone)]
pub struct VariableTable {
    values: Vec<Value>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, initial: Value) -> VarHandle {
        self.values.push(initial);
        VarHandle(self.values.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, handle: VarHandle) -> bool {
        handle.0 < self.values.len()
    }

    pub fn get(&self, handle: VarHandle) -> Option<Value> {
        self.values.get(handle.0).copied()
    }

    pub fn get_mut(&mut self, handle: VarHandle) -> Option<&mut Value> {
        self.values.get_mut(handle.0)
    }

    /// Returns `false` if the handle does not belong to this table.
    pub fn set(&mut self, handle: VarHandle, value: Value) -> bool {
        match self.values.get_mut(handle.0) {
            Some(slot) => {
                slot.assign(value);
                true
            }
            None => false,
        }
    }

    pub fn bool(&self, handle: VarHandle) -> Option<bool> {
        self.get(handle).map(|v| v.as_bool())
    }

    pub fn f64(&self, handle: VarHandle) -> Option<f64> {
        self.get(handle).map(|v| v.as_f64())
    }
}
