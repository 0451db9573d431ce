use std::cell::{Ref, RefCell};
use std::ffi::c_void;
use std::fmt::{self, Debug, Formatter};
use std::mem::size_of;
use std::rc::Rc;

use super::BufferValue;
use crate::error::{Error, Result};
use crate::types::{CType, SqlDate, SqlNumeric, SqlSsTime2, SqlTime, SqlTimestamp};

/// The native representation backing one column.
///
/// Each variant owns its payload. Scalars and structs live inline; character and binary data
/// live in a boxed slice whose address does not change for the lifetime of the variant, which
/// is what allows handing it to the driver.
#[derive(Clone, PartialEq)]
pub enum BufferStorage {
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Double(f64),
    /// Narrow characters including room for the terminator.
    Char(Box<[u8]>),
    /// UTF-16 code units including room for the terminator.
    WChar(Box<[u16]>),
    Date(SqlDate),
    Time(SqlTime),
    Time2(SqlSsTime2),
    Timestamp(SqlTimestamp),
    Numeric(SqlNumeric),
    Binary(Box<[u8]>),
}

impl BufferStorage {
    /// Allocates zeroed storage of native type `c_type`.
    ///
    /// `byte_len` is only consulted for the variable length types; for wide characters it must
    /// be a multiple of two. `column` names the column in the error on allocation failure.
    pub fn allocate(c_type: CType, byte_len: usize, column: &str) -> Result<Self> {
        Ok(match c_type {
            CType::SSHORT => Self::SmallInt(0),
            CType::SLONG => Self::Int(0),
            CType::SBIGINT => Self::BigInt(0),
            CType::DOUBLE => Self::Double(0.0),
            CType::TYPE_DATE => Self::Date(SqlDate::default()),
            CType::TYPE_TIME => Self::Time(SqlTime::default()),
            CType::SS_TIME2 => Self::Time2(SqlSsTime2::default()),
            CType::TYPE_TIMESTAMP => Self::Timestamp(SqlTimestamp::default()),
            CType::NUMERIC => Self::Numeric(SqlNumeric::default()),
            CType::CHAR => Self::Char(zeroed(byte_len, byte_len, column)?),
            CType::BINARY => Self::Binary(zeroed(byte_len, byte_len, column)?),
            CType::WCHAR => {
                if byte_len % size_of::<u16>() != 0 {
                    return Err(Error::precondition(format!(
                        "column {:?}: wide character buffer of odd byte length {}",
                        column, byte_len
                    )));
                }
                Self::WChar(zeroed(byte_len / size_of::<u16>(), byte_len, column)?)
            }
            other => {
                return Err(Error::NotSupported(
                    format!("column {:?}: no storage for {}", column, other).into(),
                ))
            }
        })
    }

    pub fn c_type(&self) -> CType {
        match self {
            Self::SmallInt(_) => CType::SSHORT,
            Self::Int(_) => CType::SLONG,
            Self::BigInt(_) => CType::SBIGINT,
            Self::Double(_) => CType::DOUBLE,
            Self::Char(_) => CType::CHAR,
            Self::WChar(_) => CType::WCHAR,
            Self::Date(_) => CType::TYPE_DATE,
            Self::Time(_) => CType::TYPE_TIME,
            Self::Time2(_) => CType::SS_TIME2,
            Self::Timestamp(_) => CType::TYPE_TIMESTAMP,
            Self::Numeric(_) => CType::NUMERIC,
            Self::Binary(_) => CType::BINARY,
        }
    }

    /// Size of the storage in bytes, as reported to the driver.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Char(b) | Self::Binary(b) => b.len(),
            Self::WChar(w) => w.len() * size_of::<u16>(),
            _ => self.c_type().fixed_size().unwrap_or_default(),
        }
    }

    /// Capacity in characters for text storage, `None` otherwise.
    pub fn char_capacity(&self) -> Option<usize> {
        match self {
            Self::Char(b) => Some(b.len()),
            Self::WChar(w) => Some(w.len()),
            _ => None,
        }
    }

    /// Resets the payload to zero without changing its size.
    pub fn clear(&mut self) {
        match self {
            Self::SmallInt(v) => *v = 0,
            Self::Int(v) => *v = 0,
            Self::BigInt(v) => *v = 0,
            Self::Double(v) => *v = 0.0,
            Self::Char(b) | Self::Binary(b) => b.fill(0),
            Self::WChar(w) => w.fill(0),
            Self::Date(d) => *d = SqlDate::default(),
            Self::Time(t) => *t = SqlTime::default(),
            Self::Time2(t) => *t = SqlSsTime2::default(),
            Self::Timestamp(ts) => *ts = SqlTimestamp::default(),
            Self::Numeric(n) => *n = SqlNumeric::default(),
        }
    }

    /// Address of the payload, to be handed to the driver.
    pub fn data_ptr(&mut self) -> *mut c_void {
        match self {
            Self::SmallInt(v) => v as *mut i16 as *mut c_void,
            Self::Int(v) => v as *mut i32 as *mut c_void,
            Self::BigInt(v) => v as *mut i64 as *mut c_void,
            Self::Double(v) => v as *mut f64 as *mut c_void,
            Self::Char(b) | Self::Binary(b) => b.as_mut_ptr() as *mut c_void,
            Self::WChar(w) => w.as_mut_ptr() as *mut c_void,
            Self::Date(d) => d as *mut SqlDate as *mut c_void,
            Self::Time(t) => t as *mut SqlTime as *mut c_void,
            Self::Time2(t) => t as *mut SqlSsTime2 as *mut c_void,
            Self::Timestamp(ts) => ts as *mut SqlTimestamp as *mut c_void,
            Self::Numeric(n) => n as *mut SqlNumeric as *mut c_void,
        }
    }
}

fn zeroed<T: Copy + Default>(len: usize, bytes: usize, column: &str) -> Result<Box<[T]>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|source| Error::OutOfMemory {
            column: column.to_owned(),
            bytes,
            source,
        })?;
    v.resize(len, T::default());
    Ok(v.into_boxed_slice())
}

impl Debug for BufferStorage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallInt(v) => f.debug_tuple("SmallInt").field(v).finish(),
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::BigInt(v) => f.debug_tuple("BigInt").field(v).finish(),
            Self::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Self::Char(b) => f
                .debug_tuple("Char")
                .field(&String::from_utf8_lossy(until_nul(b)))
                .finish(),
            Self::WChar(w) => f
                .debug_tuple("WChar")
                .field(&String::from_utf16_lossy(until_nul(w)))
                .finish(),
            Self::Date(d) => f.debug_tuple("Date").field(d).finish(),
            Self::Time(t) => f.debug_tuple("Time").field(t).finish(),
            Self::Time2(t) => f.debug_tuple("Time2").field(t).finish(),
            Self::Timestamp(ts) => f.debug_tuple("Timestamp").field(ts).finish(),
            Self::Numeric(n) => f.debug_tuple("Numeric").field(n).finish(),
            Self::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
        }
    }
}

/// The prefix of `units` before the first zero unit.
pub(crate) fn until_nul<T: Copy + Default + PartialEq>(units: &[T]) -> &[T] {
    let zero = T::default();
    let end = units.iter().position(|u| *u == zero).unwrap_or(units.len());
    &units[..end]
}

/// Storage supplied by the caller.
///
/// A column buffer created from an `ExternalBuffer` reads and writes through it but never
/// releases it; the storage lives as long as any clone of this handle does.
#[derive(Clone)]
pub struct ExternalBuffer(Rc<RefCell<BufferStorage>>);

impl ExternalBuffer {
    pub fn new(storage: BufferStorage) -> Self {
        ExternalBuffer(Rc::new(RefCell::new(storage)))
    }

    pub fn allocate(c_type: CType, byte_len: usize) -> Result<Self> {
        Ok(Self::new(BufferStorage::allocate(c_type, byte_len, "<external>")?))
    }

    pub fn c_type(&self) -> CType {
        self.0.borrow().c_type()
    }

    pub fn byte_len(&self) -> usize {
        self.0.borrow().byte_len()
    }

    pub fn borrow(&self) -> Ref<'_, BufferStorage> {
        self.0.borrow()
    }

    /// Writes `value` in place. The native type and length of the storage never change, so
    /// columns bound over it stay valid; a value of another shape is a cast error.
    pub fn store(&self, value: impl Into<BufferValue>) -> Result<()> {
        self.0.borrow_mut().store(&value.into()).map(drop)
    }

    /// Resets the payload to zero without changing its size.
    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub(crate) fn cell(&self) -> &RefCell<BufferStorage> {
        &self.0
    }

    /// Whether `self` and `other` refer to the same storage.
    pub fn ptr_eq(&self, other: &ExternalBuffer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for ExternalBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(storage) => f.debug_tuple("ExternalBuffer").field(&*storage).finish(),
            Err(_) => f.write_str("ExternalBuffer(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_sizes_follow_the_native_type() {
        let s = BufferStorage::allocate(CType::SLONG, 0, "a").unwrap();
        assert_eq!(s.byte_len(), 4);
        let s = BufferStorage::allocate(CType::CHAR, 11, "b").unwrap();
        assert_eq!((s.byte_len(), s.char_capacity()), (11, Some(11)));
        let s = BufferStorage::allocate(CType::WCHAR, 22, "c").unwrap();
        assert_eq!((s.byte_len(), s.char_capacity()), (22, Some(11)));
        let s = BufferStorage::allocate(CType::NUMERIC, 0, "d").unwrap();
        assert_eq!(s.byte_len(), 19);
    }

    #[test]
    fn odd_wide_lengths_and_unknown_types_are_rejected() {
        assert!(BufferStorage::allocate(CType::WCHAR, 7, "w")
            .unwrap_err()
            .is_precondition());
        assert!(matches!(
            BufferStorage::allocate(CType(99), 8, "x"),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn huge_allocations_fail_with_out_of_memory() {
        let err = BufferStorage::allocate(CType::BINARY, usize::MAX, "blob").unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { ref column, .. } if column == "blob"));
    }

    #[test]
    fn external_writes_keep_the_bound_address() {
        let external = ExternalBuffer::allocate(CType::CHAR, 8).unwrap();
        let before = external.cell().borrow_mut().data_ptr();
        external.store("abc").unwrap();
        assert!(external.store(17i32).is_err());
        assert!(external.store("far too long").unwrap_err().is_precondition());
        external.store("xyz").unwrap();
        assert_eq!(external.cell().borrow_mut().data_ptr(), before);
        assert_eq!((external.c_type(), external.byte_len()), (CType::CHAR, 8));
        assert_eq!(external.borrow().to_utf8().unwrap(), "xyz");
        external.clear();
        assert_eq!(external.borrow().to_utf8().unwrap(), "");
    }

    #[test]
    fn data_pointer_is_stable_for_slices() {
        let mut s = BufferStorage::allocate(CType::CHAR, 8, "a").unwrap();
        let p = s.data_ptr();
        let mut moved = s;
        assert_eq!(moved.data_ptr(), p);
    }
}
