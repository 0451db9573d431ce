//! Column buffers: typed storage for one column and its bindings to statement handles.
//!
//! A [`ColumnBuffer`] owns (or borrows from the caller, see [`ExternalBuffer`]) exactly one
//! [`BufferStorage`] plus the length/indicator the driver reads and writes alongside it. It can
//! be bound once as a result column and any number of times as an input parameter; binding
//! hands the storage address to the driver, so the storage never moves while a buffer exists.
//!
//! Fixed-point `NUMERIC` storage is never bound with `SQLBindCol`. Its descriptor record is
//! populated field by field instead (type, precision, scale, then the pointers), which is the
//! only way to make drivers honour precision and scale on fetch.

mod binding;
mod cast;
mod flags;
mod storage;
mod value;

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::convert::TryFrom;
use std::ffi::c_void;
use std::fmt::{self, Debug, Formatter};
use std::rc::{Rc, Weak};

use widestring::U16String;

pub use flags::ColumnFlags;
pub use storage::{BufferStorage, ExternalBuffer};
pub use value::BufferValue;

use self::binding::{BindState, Bound};
use self::storage::until_nul;
use crate::catalog::{ColumnInfo, Nullability};
use crate::driver::{BindTarget, DescField, Descriptor, ParameterTarget};
use crate::error::{Error, Result};
use crate::handle::{HandleObserver, SharedStatement, StatementHandle};
use crate::types::{
    CType, SqlDate, SqlNumeric, SqlSsTime2, SqlTime, SqlTimestamp, SqlType, TypeMap, NO_TOTAL,
    NTS, NULL_DATA,
};

enum Storage {
    Owned(Box<RefCell<BufferStorage>>),
    External(ExternalBuffer),
}

impl Storage {
    fn cell(&self) -> &RefCell<BufferStorage> {
        match self {
            Storage::Owned(cell) => cell,
            Storage::External(buffer) => buffer.cell(),
        }
    }
}

/// Everything the driver needs to address a buffer.
struct RawParts {
    c_type: CType,
    value: *mut c_void,
    byte_len: usize,
    indicator: *mut isize,
}

pub struct ColumnBuffer {
    query_name: String,
    sql_type: SqlType,
    column_size: Option<u32>,
    decimal_digits: Option<i16>,
    flags: ColumnFlags,
    storage: Storage,
    indicator: Box<Cell<isize>>,
    binding: Rc<BindState>,
}

impl ColumnBuffer {
    /// Creates a buffer for a column described by the catalog, with the native type chosen by
    /// `type_map`. `NULLABLE` is taken from the column's nullability.
    pub fn from_column_info(
        info: &ColumnInfo,
        type_map: &TypeMap,
        mut flags: ColumnFlags,
    ) -> Result<Self> {
        let c_type = type_map
            .buffer_type(info.sql_type)
            .map_err(|_| Error::UnsupportedType {
                column: info.name.clone(),
                sql_type: info.sql_type,
            })?;
        flags.set(ColumnFlags::NULLABLE, info.nullable != Nullability::NoNulls);
        Self::with_c_type(
            info.name.clone(),
            info.sql_type,
            c_type,
            info.column_size,
            info.decimal_digits,
            flags,
        )
    }

    /// Creates a buffer of native type `c_type` sized for a column of `sql_type`.
    pub fn with_c_type(
        query_name: impl Into<String>,
        sql_type: SqlType,
        c_type: CType,
        column_size: Option<u32>,
        decimal_digits: Option<i16>,
        flags: ColumnFlags,
    ) -> Result<Self> {
        let query_name = query_name.into();
        check_flags(&query_name, flags)?;
        if !c_type.is_supported() {
            return Err(Error::UnsupportedType {
                column: query_name,
                sql_type,
            });
        }
        let byte_len =
            required_byte_len(&query_name, sql_type, c_type, column_size, decimal_digits)?;
        let storage = BufferStorage::allocate(c_type, byte_len, &query_name)?;
        Ok(Self::new(
            query_name,
            sql_type,
            column_size,
            decimal_digits,
            flags,
            Storage::Owned(Box::new(RefCell::new(storage))),
        ))
    }

    /// Creates a buffer reading and writing through caller supplied storage. The storage is
    /// never released by the buffer.
    pub fn from_external(
        query_name: impl Into<String>,
        buffer: ExternalBuffer,
        sql_type: SqlType,
        column_size: Option<u32>,
        decimal_digits: Option<i16>,
        flags: ColumnFlags,
    ) -> Result<Self> {
        let query_name = query_name.into();
        check_flags(&query_name, flags)?;
        Ok(Self::new(
            query_name,
            sql_type,
            column_size,
            decimal_digits,
            flags,
            Storage::External(buffer),
        ))
    }

    fn new(
        query_name: String,
        sql_type: SqlType,
        column_size: Option<u32>,
        decimal_digits: Option<i16>,
        flags: ColumnFlags,
        storage: Storage,
    ) -> Self {
        Self {
            query_name,
            sql_type,
            column_size,
            decimal_digits,
            flags,
            storage,
            indicator: Box::new(Cell::new(NULL_DATA)),
            binding: Rc::new(BindState::default()),
        }
    }

    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    pub fn c_type(&self) -> CType {
        self.storage.cell().borrow().c_type()
    }

    pub fn byte_len(&self) -> usize {
        self.storage.cell().borrow().byte_len()
    }

    pub fn column_size(&self) -> Option<u32> {
        self.column_size
    }

    pub fn decimal_digits(&self) -> Option<i16> {
        self.decimal_digits
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    pub fn has_flags(&self, flags: ColumnFlags) -> bool {
        self.flags.contains(flags)
    }

    pub fn is_nullable(&self) -> bool {
        self.flags.contains(ColumnFlags::NULLABLE)
    }

    pub fn is_primary_key(&self) -> bool {
        self.flags.contains(ColumnFlags::PRIMARY_KEY)
    }

    /// Replaces the role flags. The primary key role cannot change while the buffer is bound
    /// as a parameter.
    pub fn set_flags(&mut self, flags: ColumnFlags) -> Result<()> {
        check_flags(&self.query_name, flags)?;
        let pk_changes = (self.flags ^ flags).contains(ColumnFlags::PRIMARY_KEY);
        if pk_changes && self.binding.parameter_count() > 0 {
            return Err(Error::precondition(format!(
                "column {:?}: primary key flag changed while bound as parameter",
                self.query_name
            )));
        }
        self.flags = flags;
        Ok(())
    }

    /// `true` if the storage was supplied by the caller.
    pub fn is_external(&self) -> bool {
        matches!(self.storage, Storage::External(_))
    }

    pub fn external_buffer(&self) -> Option<&ExternalBuffer> {
        match &self.storage {
            Storage::External(buffer) => Some(buffer),
            Storage::Owned(_) => None,
        }
    }

    pub fn storage(&self) -> Ref<'_, BufferStorage> {
        self.storage.cell().borrow()
    }

    fn storage_mut(&self) -> RefMut<'_, BufferStorage> {
        self.storage.cell().borrow_mut()
    }

    /// The length/indicator as last written by the driver or the caller.
    pub fn indicator(&self) -> isize {
        self.indicator.get()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.column().is_some()
    }

    /// Column number this buffer is bound to, if any.
    pub fn bound_column(&self) -> Option<u16> {
        self.binding.column().map(|b| b.number)
    }

    pub fn is_bound_parameter(&self, handle: &SharedStatement, parameter: u16) -> bool {
        self.binding.has_parameter(handle.borrow().id(), parameter)
    }

    pub fn parameter_binding_count(&self) -> usize {
        self.binding.parameter_count()
    }

    fn raw_parts(&self) -> RawParts {
        let mut storage = self.storage_mut();
        RawParts {
            c_type: storage.c_type(),
            value: storage.data_ptr(),
            byte_len: storage.byte_len(),
            indicator: self.indicator.as_ptr(),
        }
    }

    fn observer(&self) -> Weak<dyn HandleObserver> {
        let observer: Rc<dyn HandleObserver> = self.binding.clone();
        Rc::downgrade(&observer)
    }

    /// Binds the buffer as result column `column` (1-based) of `handle`.
    ///
    /// After binding the buffer reads as NULL until a row is fetched.
    pub fn bind(&mut self, handle: &SharedStatement, column: u16) -> Result<()> {
        if let Some(bound) = self.binding.column() {
            return Err(Error::precondition(format!(
                "column {:?} is already bound as column {}",
                self.query_name, bound.number
            )));
        }
        let raw = self.raw_parts();
        if raw.byte_len == 0 {
            return Err(Error::precondition(format!(
                "column {:?} has no storage to bind",
                self.query_name
            )));
        }

        let mut stmt = borrow_statement(handle)?;
        // SAFETY: storage and indicator are heap allocated and stay in place until the binding
        // is released by `unbind`, a handle event, or `Drop`.
        unsafe {
            if raw.c_type == CType::NUMERIC {
                self.set_numeric_fields(&mut stmt, Descriptor::Row, column, &raw)?;
            } else {
                stmt.bind_col(
                    column,
                    BindTarget {
                        c_type: raw.c_type,
                        value: raw.value,
                        buffer_len: raw.byte_len as isize,
                        indicator: raw.indicator,
                    },
                )?;
            }
        }
        stmt.subscribe(self.observer());
        self.binding
            .set_column(Some(Bound::new(handle, stmt.id(), column)));
        self.indicator.set(NULL_DATA);
        Ok(())
    }

    /// Releases the result column binding.
    pub fn unbind(&mut self) -> Result<()> {
        let bound = self.binding.column().ok_or_else(|| {
            Error::precondition(format!("column {:?} is not bound", self.query_name))
        })?;
        if let Some(handle) = bound.upgrade() {
            let mut stmt = borrow_statement(&handle)?;
            let c_type = self.c_type();
            // SAFETY: null pointers release the driver's reference to the storage.
            unsafe {
                if c_type == CType::NUMERIC {
                    clear_pointer_fields(&mut stmt, Descriptor::Row, bound.number)?;
                } else {
                    stmt.bind_col(bound.number, BindTarget::null(c_type))?;
                }
            }
        }
        self.binding.set_column(None);
        Ok(())
    }

    /// Binds the buffer as input parameter `parameter` (1-based) of `handle`. The same buffer
    /// may be bound as parameter of several statements at once.
    pub fn bind_parameter(&mut self, handle: &SharedStatement, parameter: u16) -> Result<()> {
        let mut stmt = borrow_statement(handle)?;
        if self.binding.has_parameter(stmt.id(), parameter) {
            return Err(Error::precondition(format!(
                "column {:?} is already bound as parameter {} of the {} statement",
                self.query_name,
                parameter,
                stmt.name()
            )));
        }
        let raw = self.raw_parts();
        if raw.byte_len == 0 {
            return Err(Error::precondition(format!(
                "column {:?} has no storage to bind",
                self.query_name
            )));
        }

        let target = ParameterTarget {
            c_type: raw.c_type,
            sql_type: self.parameter_sql_type(raw.c_type),
            column_size: self.parameter_column_size(),
            decimal_digits: self.decimal_digits.unwrap_or(0),
            value: raw.value,
            buffer_len: raw.byte_len as isize,
            indicator: raw.indicator,
        };
        // SAFETY: see `bind`.
        unsafe {
            stmt.bind_parameter(parameter, target)?;
            if raw.c_type == CType::NUMERIC {
                self.set_numeric_fields(&mut stmt, Descriptor::Parameter, parameter, &raw)?;
            }
        }
        stmt.subscribe(self.observer());
        self.binding
            .add_parameter(Bound::new(handle, stmt.id(), parameter));
        Ok(())
    }

    /// Releases the binding as parameter `parameter` of `handle`.
    pub fn unbind_parameter(&mut self, handle: &SharedStatement, parameter: u16) -> Result<()> {
        let mut stmt = borrow_statement(handle)?;
        let id = stmt.id();
        if !self.binding.has_parameter(id, parameter) {
            return Err(Error::precondition(format!(
                "column {:?} is not bound as parameter {} of the {} statement",
                self.query_name,
                parameter,
                stmt.name()
            )));
        }
        self.release_parameter(&mut stmt, parameter)?;
        self.binding.remove_parameter(id, parameter);
        Ok(())
    }

    /// Releases every parameter binding of this buffer.
    pub fn unbind_parameters(&mut self) -> Result<()> {
        for bound in self.binding.parameters() {
            if let Some(handle) = bound.upgrade() {
                let mut stmt = borrow_statement(&handle)?;
                self.release_parameter(&mut stmt, bound.number)?;
            }
            self.binding.remove_parameter(bound.id, bound.number);
        }
        Ok(())
    }

    fn release_parameter(&self, stmt: &mut StatementHandle, parameter: u16) -> Result<()> {
        let c_type = self.c_type();
        // SAFETY: null pointers release the driver's reference to the storage.
        unsafe {
            if c_type == CType::NUMERIC {
                clear_pointer_fields(stmt, Descriptor::Parameter, parameter)
            } else {
                stmt.bind_parameter(parameter, ParameterTarget::null(c_type, self.sql_type))
            }
        }
    }

    /// Populates a `NUMERIC` descriptor record. Drivers validate the record when the data
    /// pointer is set, so type, precision and scale go first.
    unsafe fn set_numeric_fields(
        &self,
        stmt: &mut StatementHandle,
        descriptor: Descriptor,
        record: u16,
        raw: &RawParts,
    ) -> Result<()> {
        let precision = self
            .column_size
            .filter(|p| *p > 0)
            .ok_or_else(|| {
                Error::precondition(format!(
                    "numeric column {:?} has no precision",
                    self.query_name
                ))
            })?;
        let precision = i16::try_from(precision).map_err(|_| {
            Error::precondition(format!(
                "numeric column {:?}: precision {} is out of range",
                self.query_name, precision
            ))
        })?;
        let fields = [
            DescField::Type(CType::NUMERIC),
            DescField::Precision(precision),
            DescField::Scale(self.decimal_digits.unwrap_or(0)),
            DescField::DataPtr(raw.value),
            DescField::IndicatorPtr(raw.indicator),
            DescField::OctetLengthPtr(raw.indicator),
        ];
        for field in fields {
            stmt.set_desc_field(descriptor, record, field)?;
        }
        Ok(())
    }

    fn parameter_sql_type(&self, c_type: CType) -> SqlType {
        if self.sql_type == SqlType::UNKNOWN {
            SqlType::for_c_type(c_type)
        } else {
            self.sql_type
        }
    }

    fn parameter_column_size(&self) -> usize {
        match self.column_size {
            Some(size) => size as usize,
            None => {
                let storage = self.storage();
                match &*storage {
                    BufferStorage::Char(_) | BufferStorage::WChar(_) => {
                        storage.char_capacity().unwrap_or(1).saturating_sub(1)
                    }
                    BufferStorage::Binary(b) => b.len(),
                    _ => 0,
                }
            }
        }
    }

    /// Writes `value` into the buffer and clears the NULL indicator.
    ///
    /// Text must leave room for a terminator; oversized text is rejected after the buffer was
    /// zeroed.
    pub fn set_value(&mut self, value: impl Into<BufferValue>) -> Result<()> {
        let indicator = self.storage_mut().store(&value.into())?;
        self.indicator.set(indicator);
        Ok(())
    }

    /// Reads the stored value, ignoring the NULL indicator.
    pub fn value(&self) -> Result<BufferValue> {
        self.storage().load()
    }

    /// Reads the stored value, `None` if it is NULL.
    pub fn nullable_value(&self) -> Result<Option<BufferValue>> {
        if self.is_null() {
            return Ok(None);
        }
        self.value().map(Some)
    }

    /// Marks the value as NULL. The column must be nullable and bound.
    pub fn set_null(&mut self) -> Result<()> {
        if !self.is_nullable() {
            return Err(Error::precondition(format!(
                "column {:?} is not nullable",
                self.query_name
            )));
        }
        if !self.is_bound() && self.binding.parameter_count() == 0 {
            return Err(Error::precondition(format!(
                "column {:?} is not bound",
                self.query_name
            )));
        }
        self.indicator.set(NULL_DATA);
        Ok(())
    }

    pub fn is_null(&self) -> bool {
        self.indicator.get() == NULL_DATA
    }

    /// Marks the value as NULL without the checks of [`set_null`](Self::set_null). Used when a
    /// new result set is opened and no row has been fetched yet.
    pub(crate) fn reset_indicator(&self) {
        self.indicator.set(NULL_DATA);
    }

    /// Copies raw bytes into a binary or narrow character buffer.
    pub fn set_binary_value(&mut self, bytes: &[u8]) -> Result<()> {
        let mut storage = self.storage_mut();
        let c_type = storage.c_type();
        let (BufferStorage::Binary(dst) | BufferStorage::Char(dst)) = &mut *storage else {
            return Err(crate::error::CastError::new(c_type, CType::BINARY).into());
        };
        if bytes.len() > dst.len() {
            return Err(Error::precondition(format!(
                "column {:?}: {} bytes exceed the buffer length of {}",
                self.query_name,
                bytes.len(),
                dst.len()
            )));
        }
        dst.fill(0);
        dst[..bytes.len()].copy_from_slice(bytes);
        self.indicator.set(bytes.len() as isize);
        Ok(())
    }

    /// Copies the bytes of a binary or narrow character buffer, `None` if the value is NULL.
    ///
    /// The length comes from the indicator, clamped to the buffer length when the driver
    /// reported a truncated or undeterminable length.
    pub fn binary_value(&self) -> Result<Option<Vec<u8>>> {
        if self.is_null() {
            return Ok(None);
        }
        let storage = self.storage();
        let (BufferStorage::Binary(src) | BufferStorage::Char(src)) = &*storage else {
            return Err(crate::error::CastError::new(storage.c_type(), CType::BINARY).into());
        };
        let bytes = match self.indicator.get() {
            NTS => until_nul(src),
            NO_TOTAL => src,
            len if len >= 0 => &src[..(len as usize).min(src.len())],
            _ => src,
        };
        Ok(Some(bytes.to_vec()))
    }

    pub fn as_i16(&self) -> Result<i16> {
        Ok(self.storage().to_i16()?)
    }

    pub fn as_i32(&self) -> Result<i32> {
        Ok(self.storage().to_i32()?)
    }

    pub fn as_i64(&self) -> Result<i64> {
        Ok(self.storage().to_i64()?)
    }

    pub fn as_f64(&self) -> Result<f64> {
        Ok(self.storage().to_f64()?)
    }

    pub fn as_string(&self) -> Result<String> {
        Ok(self.storage().to_utf8()?)
    }

    pub fn as_u16_string(&self) -> Result<U16String> {
        Ok(self.storage().to_utf16()?)
    }

    pub fn as_date(&self) -> Result<SqlDate> {
        Ok(self.storage().to_date()?)
    }

    pub fn as_time(&self) -> Result<SqlTime> {
        Ok(self.storage().to_time()?)
    }

    pub fn as_time2(&self) -> Result<SqlSsTime2> {
        Ok(self.storage().to_time2()?)
    }

    pub fn as_timestamp(&self) -> Result<SqlTimestamp> {
        Ok(self.storage().to_timestamp()?)
    }

    pub fn as_numeric(&self) -> Result<SqlNumeric> {
        Ok(self.storage().to_numeric()?)
    }
}

macro_rules! impl_try_from {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl TryFrom<&ColumnBuffer> for $ty {
                type Error = Error;

                fn try_from(buffer: &ColumnBuffer) -> Result<Self> {
                    buffer.$method()
                }
            }
        )*
    };
}

impl_try_from!(
    i16 => as_i16,
    i32 => as_i32,
    i64 => as_i64,
    f64 => as_f64,
    String => as_string,
    U16String => as_u16_string,
    SqlDate => as_date,
    SqlTime => as_time,
    SqlSsTime2 => as_time2,
    SqlTimestamp => as_timestamp,
    SqlNumeric => as_numeric,
);

impl Drop for ColumnBuffer {
    fn drop(&mut self) {
        if self.is_bound() {
            if let Err(e) = self.unbind() {
                log::warn!("failed to unbind column {:?}: {}", self.query_name, e);
            }
        }
        if self.binding.parameter_count() > 0 {
            if let Err(e) = self.unbind_parameters() {
                log::warn!(
                    "failed to unbind parameters of column {:?}: {}",
                    self.query_name,
                    e
                );
            }
        }
    }
}

impl Debug for ColumnBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnBuffer")
            .field("query_name", &self.query_name)
            .field("sql_type", &self.sql_type)
            .field("c_type", &self.c_type())
            .field("byte_len", &self.byte_len())
            .field("flags", &self.flags)
            .field("external", &self.is_external())
            .field("bound_column", &self.bound_column())
            .field("parameters", &self.binding.parameter_count())
            .field("indicator", &self.indicator.get())
            .finish()
    }
}

fn borrow_statement(handle: &SharedStatement) -> Result<RefMut<'_, StatementHandle>> {
    handle
        .try_borrow_mut()
        .map_err(|_| Error::precondition("statement handle is already in use"))
}

unsafe fn clear_pointer_fields(
    stmt: &mut StatementHandle,
    descriptor: Descriptor,
    record: u16,
) -> Result<()> {
    for field in [
        DescField::DataPtr(std::ptr::null_mut()),
        DescField::IndicatorPtr(std::ptr::null_mut()),
        DescField::OctetLengthPtr(std::ptr::null_mut()),
    ] {
        stmt.set_desc_field(descriptor, record, field)?;
    }
    Ok(())
}

fn check_flags(column: &str, flags: ColumnFlags) -> Result<()> {
    if flags.is_consistent() {
        Ok(())
    } else {
        Err(Error::precondition(format!(
            "column {:?}: write roles without SELECT in {:?}",
            column, flags
        )))
    }
}

/// Typical display width of numeric and temporal SQL types, used when the catalog reports no
/// column size for a column bound as text.
fn display_size(sql_type: SqlType) -> Option<u32> {
    Some(match sql_type {
        SqlType::BIT => 1,
        SqlType::TINYINT => 3,
        SqlType::SMALLINT => 5,
        SqlType::INTEGER => 10,
        SqlType::BIGINT => 19,
        SqlType::REAL => 7,
        SqlType::FLOAT | SqlType::DOUBLE => 15,
        SqlType::TYPE_DATE => 10,
        SqlType::TYPE_TIME => 8,
        SqlType::SS_TIME2 => 16,
        SqlType::TYPE_TIMESTAMP => 29,
        _ => return None,
    })
}

/// Bytes needed to hold a column of `sql_type` as native type `c_type`.
///
/// Numeric columns bound as text get room for sign and terminator, plus a decimal point when
/// they have a scale. Other text gets room for the terminator.
pub fn required_byte_len(
    column: &str,
    sql_type: SqlType,
    c_type: CType,
    column_size: Option<u32>,
    decimal_digits: Option<i16>,
) -> Result<usize> {
    let unsupported = || Error::UnsupportedType {
        column: column.to_owned(),
        sql_type,
    };
    if let Some(size) = c_type.fixed_size() {
        return Ok(size);
    }
    match c_type {
        CType::CHAR | CType::WCHAR => {
            let size = column_size
                .filter(|s| *s > 0)
                .or_else(|| display_size(sql_type))
                .ok_or_else(unsupported)? as usize;
            let chars = if sql_type.is_numeric() {
                size + if decimal_digits.unwrap_or(0) > 0 { 3 } else { 2 }
            } else {
                size + 1
            };
            Ok(if c_type == CType::WCHAR {
                chars * std::mem::size_of::<u16>()
            } else {
                chars
            })
        }
        CType::BINARY => column_size
            .filter(|s| *s > 0)
            .map(|s| s as usize)
            .ok_or_else(unsupported),
        _ => Err(unsupported()),
    }
}
