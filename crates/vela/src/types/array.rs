use parking_lot::RwLock;
use strum::{Display, EnumString};

use crate::{
    errors::{RunError, RunResult},
    value::Value,
};

/// Primitive element-type tag of an `Array<T>` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ElemType {
    Int,
    Long,
    Double,
    Float,
    Bool,
    Char,
    Object,
}

/// Fixed-length array with raw backing storage for primitive element types.
///
/// Unlike `List`, the length is fixed at construction and primitive elements
/// are stored unboxed. Arrays are shared by reference and internally locked so
/// they can cross task boundaries.
#[derive(Debug)]
pub struct ArrayValue {
    data: ArrayData,
}

#[derive(Debug)]
enum ArrayData {
    Int(RwLock<Vec<i64>>),
    Long(RwLock<Vec<i64>>),
    Double(RwLock<Vec<f64>>),
    Float(RwLock<Vec<f32>>),
    Bool(RwLock<Vec<bool>>),
    Char(RwLock<Vec<char>>),
    Object(RwLock<Vec<Value>>),
}

impl ArrayValue {
    /// Creates a zero-initialized array of the given element type and length.
    pub fn new(elem: ElemType, len: usize) -> Self {
        let data = match elem {
            ElemType::Int => ArrayData::Int(RwLock::new(vec![0; len])),
            ElemType::Long => ArrayData::Long(RwLock::new(vec![0; len])),
            ElemType::Double => ArrayData::Double(RwLock::new(vec![0.0; len])),
            ElemType::Float => ArrayData::Float(RwLock::new(vec![0.0; len])),
            ElemType::Bool => ArrayData::Bool(RwLock::new(vec![false; len])),
            ElemType::Char => ArrayData::Char(RwLock::new(vec!['\0'; len])),
            ElemType::Object => ArrayData::Object(RwLock::new(vec![Value::Null; len])),
        };
        Self { data }
    }

    /// Creates an object array from existing values.
    pub fn of_values(values: Vec<Value>) -> Self {
        Self {
            data: ArrayData::Object(RwLock::new(values)),
        }
    }

    pub fn elem_type(&self) -> ElemType {
        match &self.data {
            ArrayData::Int(_) => ElemType::Int,
            ArrayData::Long(_) => ElemType::Long,
            ArrayData::Double(_) => ElemType::Double,
            ArrayData::Float(_) => ElemType::Float,
            ArrayData::Bool(_) => ElemType::Bool,
            ArrayData::Char(_) => ElemType::Char,
            ArrayData::Object(_) => ElemType::Object,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ArrayData::Int(v) | ArrayData::Long(v) => v.read().len(),
            ArrayData::Double(v) => v.read().len(),
            ArrayData::Float(v) => v.read().len(),
            ArrayData::Bool(v) => v.read().len(),
            ArrayData::Char(v) => v.read().len(),
            ArrayData::Object(v) => v.read().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_index(&self, index: i64) -> RunResult<usize> {
        let len = self.len();
        usize::try_from(index)
            .ok()
            .filter(|&i| i < len)
            .ok_or_else(|| RunError::index_out_of_bounds(index, len))
    }

    /// Reads an element as a boxed value.
    pub fn get(&self, index: i64) -> RunResult<Value> {
        let i = self.check_index(index)?;
        Ok(match &self.data {
            ArrayData::Int(v) => Value::Int(v.read()[i]),
            ArrayData::Long(v) => Value::Long(v.read()[i]),
            ArrayData::Double(v) => Value::Double(v.read()[i]),
            ArrayData::Float(v) => Value::Double(f64::from(v.read()[i])),
            ArrayData::Bool(v) => Value::Bool(v.read()[i]),
            ArrayData::Char(v) => Value::Char(v.read()[i]),
            ArrayData::Object(v) => v.read()[i].clone(),
        })
    }

    /// Writes an element, converting from the boxed representation.
    pub fn set(&self, index: i64, value: Value) -> RunResult<()> {
        let i = self.check_index(index)?;
        match (&self.data, value) {
            (ArrayData::Int(v), Value::Int(x) | Value::Long(x)) => v.write()[i] = x,
            (ArrayData::Long(v), Value::Int(x) | Value::Long(x)) => v.write()[i] = x,
            (ArrayData::Double(v), Value::Double(x)) => v.write()[i] = x,
            (ArrayData::Double(v), Value::Int(x) | Value::Long(x)) => v.write()[i] = x as f64,
            (ArrayData::Float(v), Value::Double(x)) => v.write()[i] = x as f32,
            (ArrayData::Float(v), Value::Int(x) | Value::Long(x)) => v.write()[i] = x as f32,
            (ArrayData::Bool(v), Value::Bool(x)) => v.write()[i] = x,
            (ArrayData::Char(v), Value::Char(x)) => v.write()[i] = x,
            (ArrayData::Object(v), value) => v.write()[i] = value,
            (_, value) => {
                return Err(RunError::type_mismatch(format!(
                    "cannot store {} in Array<{}>",
                    value.type_name(),
                    self.elem_type()
                )));
            }
        }
        Ok(())
    }

    /// Writes a raw integer into an `Int`/`Long` array without boxing.
    ///
    /// Used by the MIR interpreter's raw-int `INDEX_SET` path.
    pub fn set_raw_int(&self, index: i64, raw: i64) -> RunResult<()> {
        let i = self.check_index(index)?;
        match &self.data {
            ArrayData::Int(v) | ArrayData::Long(v) => {
                v.write()[i] = raw;
                Ok(())
            }
            _ => Err(RunError::type_mismatch(format!(
                "cannot store Int in Array<{}>",
                self.elem_type()
            ))),
        }
    }

    /// Snapshot of all elements as boxed values.
    pub fn to_values(&self) -> Vec<Value> {
        (0..self.len())
            .map(|i| self.get(i as i64).expect("index in bounds"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_array_roundtrip() {
        let arr = ArrayValue::new(ElemType::Int, 3);
        arr.set(0, Value::Int(7)).unwrap();
        arr.set_raw_int(1, 9).unwrap();
        assert!(matches!(arr.get(0), Ok(Value::Int(7))));
        assert!(matches!(arr.get(1), Ok(Value::Int(9))));
        assert!(matches!(arr.get(2), Ok(Value::Int(0))));
    }

    #[test]
    fn out_of_bounds_and_type_errors() {
        let arr = ArrayValue::new(ElemType::Bool, 1);
        assert!(arr.get(-1).is_err());
        assert!(arr.get(1).is_err());
        assert!(arr.set(0, Value::Int(1)).is_err());
    }

    #[test]
    fn float_array_boxes_as_double() {
        let arr = ArrayValue::new(ElemType::Float, 1);
        arr.set(0, Value::Double(1.5)).unwrap();
        assert!(matches!(arr.get(0), Ok(Value::Double(v)) if v == 1.5));
    }
}
