//! FFI schemas - the value model's view of C types
//!
//! A schema is the per-argument (or return) description compiled from the
//! routine spec. Conversion is two one-way trips: `arg_to_ffi` writes a
//! cell into the C argument store with range checks *before* the foreign
//! call is made, and `ffi_to_value` reads returned bytes back into a
//! cell.

use crate::error::{ErrorId, Raised, fail};
use libffi::low;
use reval_core::cell::{Cell, Kind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
    Float32,
    Float64,
    Pointer,
    /// Pass a pointer to the cell itself (for re-entrant embeddings).
    RebVal,
    Void,
}

impl FfiType {
    pub fn from_name(name: &[u8]) -> Option<FfiType> {
        Some(match name {
            b"uint8" => FfiType::UInt8,
            b"int8" | b"char" => FfiType::Int8,
            b"uint16" => FfiType::UInt16,
            b"int16" => FfiType::Int16,
            b"uint32" => FfiType::UInt32,
            b"int32" => FfiType::Int32,
            b"uint64" => FfiType::UInt64,
            b"int64" => FfiType::Int64,
            b"float" => FfiType::Float32,
            b"double" => FfiType::Float64,
            b"pointer" => FfiType::Pointer,
            b"rebval" => FfiType::RebVal,
            b"void" => FfiType::Void,
            _ => return None,
        })
    }

    /// C ABI footprint in the argument store.
    pub fn size(self) -> usize {
        match self {
            FfiType::UInt8 | FfiType::Int8 => 1,
            FfiType::UInt16 | FfiType::Int16 => 2,
            FfiType::UInt32 | FfiType::Int32 | FfiType::Float32 => 4,
            FfiType::UInt64 | FfiType::Int64 | FfiType::Float64 => 8,
            FfiType::Pointer | FfiType::RebVal => core::mem::size_of::<usize>(),
            FfiType::Void => 0,
        }
    }

    /// Alignment equals size for every primitive the trampoline carries.
    pub fn align(self) -> usize {
        self.size().max(1)
    }

    /// The libffi type descriptor.
    pub fn libffi_type(self) -> *mut low::ffi_type {
        unsafe {
            match self {
                FfiType::UInt8 => core::ptr::addr_of_mut!(low::types::uint8),
                FfiType::Int8 => core::ptr::addr_of_mut!(low::types::sint8),
                FfiType::UInt16 => core::ptr::addr_of_mut!(low::types::uint16),
                FfiType::Int16 => core::ptr::addr_of_mut!(low::types::sint16),
                FfiType::UInt32 => core::ptr::addr_of_mut!(low::types::uint32),
                FfiType::Int32 => core::ptr::addr_of_mut!(low::types::sint32),
                FfiType::UInt64 => core::ptr::addr_of_mut!(low::types::uint64),
                FfiType::Int64 => core::ptr::addr_of_mut!(low::types::sint64),
                FfiType::Float32 => core::ptr::addr_of_mut!(low::types::float),
                FfiType::Float64 => core::ptr::addr_of_mut!(low::types::double),
                FfiType::Pointer | FfiType::RebVal => {
                    core::ptr::addr_of_mut!(low::types::pointer)
                }
                FfiType::Void => core::ptr::addr_of_mut!(low::types::void),
            }
        }
    }
}

fn int_in_range(label: &str, value: i64, min: i64, max: i64) -> Result<i64, Raised> {
    if value < min || value > max {
        return fail(ErrorId::OutOfRange, &[&format!("{value} for {label}")]);
    }
    Ok(value)
}

fn expect_int(schema: FfiType, cell: &Cell) -> Result<i64, Raised> {
    match cell.kind_checked() {
        Kind::Integer => Ok(cell.int64()),
        Kind::Char => Ok(cell.character() as i64),
        Kind::Logic => Ok(cell.logic() as i64),
        k => fail(ErrorId::ArgType, &["routine", k.name(), type_label(schema)]),
    }
}

fn type_label(schema: FfiType) -> &'static str {
    match schema {
        FfiType::UInt8 => "uint8",
        FfiType::Int8 => "int8",
        FfiType::UInt16 => "uint16",
        FfiType::Int16 => "int16",
        FfiType::UInt32 => "uint32",
        FfiType::Int32 => "int32",
        FfiType::UInt64 => "uint64",
        FfiType::Int64 => "int64",
        FfiType::Float32 => "float",
        FfiType::Float64 => "double",
        FfiType::Pointer => "pointer",
        FfiType::RebVal => "rebval",
        FfiType::Void => "void",
    }
}

/// Convert one argument cell into its C representation, appended to the
/// store at the schema's alignment. Returns the offset the value landed
/// at (pointers into the store are rebased only after every argument is
/// in, since pushes may reallocate it).
pub fn arg_to_ffi(store: &mut Vec<u8>, schema: FfiType, cell: &Cell) -> Result<usize, Raised> {
    let align = schema.align();
    while store.len() % align != 0 {
        store.push(0);
    }
    let offset = store.len();

    match schema {
        FfiType::UInt8 => {
            let v = int_in_range("uint8", expect_int(schema, cell)?, 0, u8::MAX as i64)?;
            store.push(v as u8);
        }
        FfiType::Int8 => {
            let v = int_in_range("int8", expect_int(schema, cell)?, i8::MIN as i64, i8::MAX as i64)?;
            store.extend_from_slice(&(v as i8).to_ne_bytes());
        }
        FfiType::UInt16 => {
            let v = int_in_range("uint16", expect_int(schema, cell)?, 0, u16::MAX as i64)?;
            store.extend_from_slice(&(v as u16).to_ne_bytes());
        }
        FfiType::Int16 => {
            let v = int_in_range(
                "int16",
                expect_int(schema, cell)?,
                i16::MIN as i64,
                i16::MAX as i64,
            )?;
            store.extend_from_slice(&(v as i16).to_ne_bytes());
        }
        FfiType::UInt32 => {
            let v = int_in_range("uint32", expect_int(schema, cell)?, 0, u32::MAX as i64)?;
            store.extend_from_slice(&(v as u32).to_ne_bytes());
        }
        FfiType::Int32 => {
            let v = int_in_range(
                "int32",
                expect_int(schema, cell)?,
                i32::MIN as i64,
                i32::MAX as i64,
            )?;
            store.extend_from_slice(&(v as i32).to_ne_bytes());
        }
        FfiType::UInt64 | FfiType::Int64 => {
            let v = expect_int(schema, cell)?;
            store.extend_from_slice(&v.to_ne_bytes());
        }
        FfiType::Float32 => {
            let v = match cell.kind_checked() {
                Kind::Decimal | Kind::Percent => cell.decimal() as f32,
                Kind::Integer => cell.int64() as f32,
                k => return fail(ErrorId::ArgType, &["routine", k.name(), "float"]),
            };
            store.extend_from_slice(&v.to_ne_bytes());
        }
        FfiType::Float64 => {
            let v = match cell.kind_checked() {
                Kind::Decimal | Kind::Percent => cell.decimal(),
                Kind::Integer => cell.int64() as f64,
                k => return fail(ErrorId::ArgType, &["routine", k.name(), "double"]),
            };
            store.extend_from_slice(&v.to_ne_bytes());
        }
        FfiType::Pointer => {
            let ptr: usize = match cell.kind_checked() {
                Kind::Integer => cell.int64() as usize,
                Kind::Blank => 0,
                Kind::String | Kind::Binary => unsafe { (*cell.series()).data() as usize },
                Kind::Handle => cell.handle_pointer() as usize,
                Kind::Function => {
                    // Only callback-thunked functions have a C face.
                    match super::callback::callback_thunk(cell) {
                        Some(code) => code as usize,
                        None => return fail(ErrorId::OnlyCallbackPtr, &[]),
                    }
                }
                k => return fail(ErrorId::ArgType, &["routine", k.name(), "pointer"]),
            };
            store.extend_from_slice(&ptr.to_ne_bytes());
        }
        FfiType::RebVal => {
            let ptr = cell as *const Cell as usize;
            store.extend_from_slice(&ptr.to_ne_bytes());
        }
        FfiType::Void => {
            return fail(ErrorId::InvalidArg, &["void argument"]);
        }
    }
    Ok(offset)
}

/// Convert returned C bytes back into a cell.
pub fn ffi_to_value(out: &mut Cell, schema: FfiType, bytes: *const u8) -> Result<(), Raised> {
    unsafe {
        match schema {
            FfiType::Void => out.set_end(),
            FfiType::UInt8 => {
                out.init_integer(*bytes as i64);
            }
            FfiType::Int8 => {
                out.init_integer(*(bytes as *const i8) as i64);
            }
            FfiType::UInt16 => {
                out.init_integer(*(bytes as *const u16) as i64);
            }
            FfiType::Int16 => {
                out.init_integer(*(bytes as *const i16) as i64);
            }
            FfiType::UInt32 => {
                out.init_integer(*(bytes as *const u32) as i64);
            }
            FfiType::Int32 => {
                out.init_integer(*(bytes as *const i32) as i64);
            }
            FfiType::UInt64 | FfiType::Int64 => {
                out.init_integer(*(bytes as *const i64));
            }
            FfiType::Float32 => {
                out.init_decimal(*(bytes as *const f32) as f64);
            }
            FfiType::Float64 => {
                out.init_decimal(*(bytes as *const f64));
            }
            FfiType::Pointer | FfiType::RebVal => {
                out.init_integer(*(bytes as *const usize) as i64);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RuntimeGuard;

    #[test]
    fn int32_range_checked_before_call() {
        let _rt = RuntimeGuard::new();
        let mut store = Vec::new();
        let mut cell = Cell::zeroed();

        cell.init_integer(i32::MAX as i64);
        assert!(arg_to_ffi(&mut store, FfiType::Int32, &cell).is_ok());

        cell.init_integer(i32::MAX as i64 + 1);
        let err = arg_to_ffi(&mut store, FfiType::Int32, &cell).unwrap_err();
        assert_eq!(crate::error::error_id_name(err.0), "out-of-range");
    }

    #[test]
    fn store_alignment() {
        let _rt = RuntimeGuard::new();
        let mut store = Vec::new();
        let mut cell = Cell::zeroed();
        cell.init_integer(1);
        arg_to_ffi(&mut store, FfiType::Int8, &cell).unwrap();
        let off = arg_to_ffi(&mut store, FfiType::Int64, &cell).unwrap();
        assert_eq!(off % 8, 0);
    }

    #[test]
    fn round_trip_scalars() {
        let _rt = RuntimeGuard::new();
        let value = 0x1234_5678u32;
        let bytes = value.to_ne_bytes();
        let mut out = Cell::zeroed();
        ffi_to_value(&mut out, FfiType::UInt32, bytes.as_ptr()).unwrap();
        assert_eq!(out.int64(), value as i64);

        let d = 2.5f64.to_ne_bytes();
        ffi_to_value(&mut out, FfiType::Float64, d.as_ptr()).unwrap();
        assert_eq!(out.decimal(), 2.5);
    }
}
