use exodbc::buffer::{BufferStorage, ExternalBuffer};
use exodbc::catalog::ColumnInfo;
use exodbc::handle::StatementHandle;
use exodbc::mem::{MemColumn, MemConnection, MemTableDef};
use exodbc::{BufferValue, CType, ColumnBuffer, ColumnFlags, Connection, Error, SqlType, TypeMap};

fn setup() -> anyhow::Result<MemConnection> {
    let _ = env_logger::builder().is_test(true).try_init();
    let conn = MemConnection::new();
    conn.create_table(
        MemTableDef::new("t")
            .column(MemColumn::new("id", SqlType::INTEGER).primary_key())
            .column(MemColumn::new("big", SqlType::BIGINT)),
    )?;
    conn.execute("INSERT INTO t (id, big) VALUES (1, 5)")?;
    Ok(conn)
}

#[test]
fn it_refuses_narrowing_casts_even_for_small_values() -> anyhow::Result<()> {
    let conn = setup()?;
    let handle = StatementHandle::shared(conn.allocate_statement()?, "select");
    let mut big = ColumnBuffer::from_column_info(
        &ColumnInfo::new("big", SqlType::BIGINT),
        &TypeMap::standard(),
        ColumnFlags::SELECT,
    )?;
    big.bind(&handle, 1)?;
    handle.borrow_mut().exec_direct("SELECT big FROM t", true)?;
    assert!(handle
        .borrow_mut()
        .fetch(exodbc::driver::FetchOrientation::Next)?);

    assert_eq!(big.as_i64()?, 5);
    assert_eq!(big.as_string()?, "5");
    assert!(matches!(big.as_i16().unwrap_err(), Error::Cast(_)));
    assert!(matches!(big.as_i32().unwrap_err(), Error::Cast(_)));
    Ok(())
}

#[test]
fn it_sizes_buffers_from_the_column_definition() -> anyhow::Result<()> {
    let flags = ColumnFlags::SELECT;
    let text = ColumnInfo::new("name", SqlType::VARCHAR).size(20);
    let narrow = ColumnBuffer::from_column_info(&text, &TypeMap::standard(), flags)?;
    assert_eq!(narrow.c_type(), CType::CHAR);
    assert_eq!(narrow.byte_len(), 21);

    let wide = ColumnBuffer::from_column_info(&text, &TypeMap::char_as_wchar(), flags)?;
    assert_eq!(wide.c_type(), CType::WCHAR);
    assert_eq!(wide.byte_len(), 42);

    let int = ColumnBuffer::from_column_info(
        &ColumnInfo::new("n", SqlType::INTEGER),
        &TypeMap::standard(),
        flags,
    )?;
    assert_eq!(int.byte_len(), 4);

    let stamp = ColumnBuffer::from_column_info(
        &ColumnInfo::new("at", SqlType::TYPE_TIMESTAMP),
        &TypeMap::standard(),
        flags,
    )?;
    assert_eq!(stamp.byte_len(), 16);

    let r#unsized = ColumnInfo::new("raw", SqlType::VARBINARY);
    assert!(matches!(
        ColumnBuffer::from_column_info(&r#unsized, &TypeMap::standard(), flags).unwrap_err(),
        Error::UnsupportedType { .. }
    ));
    Ok(())
}

#[test]
fn it_leaves_external_storage_to_its_owner() -> anyhow::Result<()> {
    let external = ExternalBuffer::new(BufferStorage::Int(0));
    {
        let mut column = ColumnBuffer::from_external(
            "id",
            external.clone(),
            SqlType::INTEGER,
            None,
            None,
            ColumnFlags::SELECT,
        )?;
        assert!(column.is_external());
        column.set_value(17i32)?;
        assert_eq!(column.value()?, BufferValue::Int(17));
    }
    assert!(matches!(*external.borrow(), BufferStorage::Int(17)));
    Ok(())
}

#[test]
fn it_rebinds_after_unbinding() -> anyhow::Result<()> {
    let conn = setup()?;
    let handle = StatementHandle::shared(conn.allocate_statement()?, "select");
    let mut id = ColumnBuffer::with_c_type(
        "id",
        SqlType::INTEGER,
        CType::SLONG,
        None,
        None,
        ColumnFlags::SELECT,
    )?;
    id.bind(&handle, 1)?;
    assert!(id.bind(&handle, 1).unwrap_err().is_precondition());
    id.unbind()?;
    assert!(!id.is_bound());
    id.bind(&handle, 1)?;
    assert_eq!(id.bound_column(), Some(1));

    handle.borrow_mut().exec_direct("SELECT id FROM t", true)?;
    assert!(handle
        .borrow_mut()
        .fetch(exodbc::driver::FetchOrientation::Next)?);
    assert_eq!(id.as_i32()?, 1);
    Ok(())
}
