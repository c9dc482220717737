use ahash::AHashMap;
use ir::{Const, Ty};
use smol_str::SmolStr;
use stdx::impl_display;

use crate::InterpretError;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Data {
    Real(f64),
    Int(i32),
    Bool(bool),
    /// Handle of a record on the [`Heap`].
    Obj(u32),
}

impl_display! {
    match Data{
        Data::Real(val) => "{:?}", val;
        Data::Int(val) => "{}", val;
        Data::Bool(val) => "{}", val;
        Data::Obj(handle) => "obj{}", handle;
    }
}

impl Data {
    pub fn ty(self) -> Ty {
        match self {
            Data::Real(_) => Ty::Real,
            Data::Int(_) => Ty::Int,
            Data::Bool(_) => Ty::Bool,
            Data::Obj(_) => Ty::Obj,
        }
    }

    fn mismatch(self, expected: Ty) -> InterpretError {
        InterpretError::TypeConfusion { expected, found: self.ty() }
    }

    pub fn f64(self) -> Result<f64, InterpretError> {
        match self {
            Data::Real(val) => Ok(val),
            _ => Err(self.mismatch(Ty::Real)),
        }
    }

    pub fn i32(self) -> Result<i32, InterpretError> {
        match self {
            Data::Int(val) => Ok(val),
            _ => Err(self.mismatch(Ty::Int)),
        }
    }

    pub fn bool(self) -> Result<bool, InterpretError> {
        match self {
            Data::Bool(val) => Ok(val),
            _ => Err(self.mismatch(Ty::Bool)),
        }
    }

    pub fn obj(self) -> Result<u32, InterpretError> {
        match self {
            Data::Obj(val) => Ok(val),
            _ => Err(self.mismatch(Ty::Obj)),
        }
    }
}

impl From<f64> for Data {
    fn from(val: f64) -> Self {
        Data::Real(val)
    }
}

impl From<i32> for Data {
    fn from(val: i32) -> Self {
        Data::Int(val)
    }
}

impl From<bool> for Data {
    fn from(val: bool) -> Self {
        Data::Bool(val)
    }
}

impl From<Const> for Data {
    fn from(val: Const) -> Self {
        match val {
            Const::Real(val) => Data::Real(val),
            Const::Int(val) => Data::Int(val),
            Const::Bool(val) => Data::Bool(val),
        }
    }
}

/// Records referenced by `obj` values.
#[derive(Clone, Debug, Default)]
pub struct Heap {
    objects: Vec<AHashMap<SmolStr, Data>>,
}

impl Heap {
    pub fn alloc(&mut self, fields: &[(&str, Data)]) -> Data {
        let handle = self.objects.len() as u32;
        self.objects.push(fields.iter().map(|(name, val)| (SmolStr::from(*name), *val)).collect());
        Data::Obj(handle)
    }

    pub fn load(&self, obj: u32, field: &str) -> Result<Data, InterpretError> {
        let record = self.objects.get(obj as usize).ok_or(InterpretError::InvalidObject(obj))?;
        record
            .get(field)
            .copied()
            .ok_or_else(|| InterpretError::UnknownField { field: field.into() })
    }

    pub fn store(&mut self, obj: u32, field: &SmolStr, val: Data) -> Result<(), InterpretError> {
        let record = self.objects.get_mut(obj as usize).ok_or(InterpretError::InvalidObject(obj))?;
        record.insert(field.clone(), val);
        Ok(())
    }
}
