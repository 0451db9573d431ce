use std::rc::Rc;

use exodbc::buffer::ExternalBuffer;
use exodbc::catalog::TablePrivileges;
use exodbc::mem::{MemColumn, MemConnection, MemTableDef};
use exodbc::table::NoRowsPolicy;
use exodbc::{
    AccessFlags, CType, ColumnFlags, Error, OpenFlags, SqlType, Table, TableLookup, TableOptions,
};

fn setup() -> anyhow::Result<MemConnection> {
    let _ = env_logger::builder().is_test(true).try_init();
    let conn = MemConnection::new();
    conn.create_table(
        MemTableDef::new("IntTypes")
            .schema("exodbc")
            .column(MemColumn::new("idintegertypes", SqlType::INTEGER).primary_key())
            .column(MemColumn::new("tsmallint", SqlType::SMALLINT))
            .column(MemColumn::new("tint", SqlType::INTEGER))
            .column(MemColumn::new("tbigint", SqlType::BIGINT)),
    )?;
    conn.create_table(
        MemTableDef::new("NoKeys")
            .column(MemColumn::new("a", SqlType::INTEGER))
            .column(MemColumn::new("b", SqlType::VARCHAR).size(10)),
    )?;
    Ok(conn)
}

fn open(conn: &MemConnection, name: &str, access: AccessFlags) -> anyhow::Result<Table> {
    let mut table = Table::new(Rc::new(conn.clone()), TableLookup::new(name), access)?;
    table.open()?;
    Ok(table)
}

fn seed(conn: &MemConnection, rows: i32) -> anyhow::Result<()> {
    for id in 1..=rows {
        conn.execute(&format!(
            "INSERT INTO exodbc.IntTypes (idintegertypes, tsmallint, tint, tbigint) \
             VALUES ({}, {}, {}, {})",
            id,
            id * 10,
            id * 100,
            id * 1000
        ))?;
    }
    Ok(())
}

#[test]
fn it_inserts_and_reads_back_through_a_second_table() -> anyhow::Result<()> {
    let conn = setup()?;
    let mut writer = open(&conn, "IntTypes", AccessFlags::READ | AccessFlags::WRITE)?;
    writer.set_column_value(0, 101i32)?;
    writer.set_column_value(1, 102i16)?;
    writer.set_column_value(2, 103i32)?;
    writer.set_column_value(3, 104i64)?;
    writer.insert()?;
    writer.commit()?;

    let mut reader = open(&conn, "IntTypes", AccessFlags::READ)?;
    reader.select("")?;
    assert!(reader.select_next()?);
    assert_eq!(reader.column(0)?.as_i32()?, 101);
    assert_eq!(reader.column(1)?.as_i16()?, 102);
    assert_eq!(reader.column(2)?.as_i32()?, 103);
    assert_eq!(reader.column(3)?.as_i64()?, 104);
    assert!(!reader.select_next()?);
    Ok(())
}

#[test]
fn it_counts_rows_and_reports_bad_syntax() -> anyhow::Result<()> {
    let conn = setup()?;
    let mut table = open(&conn, "IntTypes", AccessFlags::READ)?;
    assert_eq!(table.count("")?, 0);

    seed(&conn, 10)?;
    assert_eq!(table.count("")?, 10);
    assert_eq!(table.count("tint = 300")?, 1);

    let err = table.count("bogus syntax").unwrap_err();
    assert!(matches!(err, Error::Driver(_)), "{:?}", err);

    // a failed count leaves the table usable
    assert_eq!(table.count("")?, 10);
    Ok(())
}

#[test]
fn it_scrolls_an_ordered_result() -> anyhow::Result<()> {
    let conn = setup()?;
    seed(&conn, 5)?;
    let mut table = open(&conn, "IntTypes", AccessFlags::READ)?;
    table.select_ordered("", "idintegertypes")?;

    assert!(table.select_absolute(3)?);
    assert_eq!(table.column(0)?.as_i32()?, 3);
    assert!(table.select_relative(-1)?);
    assert_eq!(table.column(0)?.as_i32()?, 2);
    assert!(table.select_last()?);
    assert_eq!(table.column(0)?.as_i32()?, 5);
    assert!(table.select_prev()?);
    assert_eq!(table.column(0)?.as_i32()?, 4);
    assert!(table.select_first()?);
    assert_eq!(table.column(0)?.as_i32()?, 1);
    assert!(!table.select_absolute(6)?);

    table.select_close()?;
    assert!(!table.is_select_open());
    Ok(())
}

#[test]
fn it_updates_and_deletes_using_the_resident_values() -> anyhow::Result<()> {
    let conn = setup()?;
    seed(&conn, 3)?;
    let mut table = open(&conn, "IntTypes", AccessFlags::READ | AccessFlags::WRITE)?;

    table.select("idintegertypes = 2")?;
    assert!(table.select_next()?);
    table.select_close()?;
    table.set_column_value(2, -1i32)?;
    assert_eq!(table.update()?, 1);
    assert_eq!(table.count("tint = -1")?, 1);
    assert_eq!(table.count("tsmallint = 20 AND tbigint = 2000")?, 1);

    table.set_column_value(0, 42i32)?;
    assert!(matches!(
        table.update().unwrap_err(),
        Error::NoRowsAffected { .. }
    ));
    assert_eq!(table.update_with(NoRowsPolicy::Tolerate)?, 0);

    assert_eq!(table.update_where("tint > 0")?, 2);
    assert_eq!(table.count("tint = -1")?, 3);

    table.set_column_value(0, 1i32)?;
    assert_eq!(table.delete()?, 1);
    assert_eq!(table.delete_with(NoRowsPolicy::Tolerate)?, 0);
    assert_eq!(table.delete_where("idintegertypes > 0")?, 2);
    assert_eq!(table.count("")?, 0);
    Ok(())
}

#[test]
fn it_updates_from_resident_values_without_a_select() -> anyhow::Result<()> {
    let conn = setup()?;
    seed(&conn, 2)?;
    let mut table = open(&conn, "IntTypes", AccessFlags::READ | AccessFlags::WRITE)?;

    // nothing fetched or set yet: the resident values are all NULL and match no key
    assert!(matches!(
        table.update().unwrap_err(),
        Error::NoRowsAffected { .. }
    ));
    assert_eq!(table.count("tint IS NULL")?, 0);

    table.set_column_value(0, 3i32)?;
    table.set_column_value(1, 30i16)?;
    table.set_column_value(2, 300i32)?;
    table.set_column_value(3, 3000i64)?;
    table.insert()?;
    conn.execute("UPDATE exodbc.IntTypes SET tint = 0, tbigint = 0 WHERE idintegertypes = 3")?;

    // the buffers still hold what was inserted
    assert_eq!(table.update()?, 1);
    assert_eq!(
        table.count("idintegertypes = 3 AND tsmallint = 30 AND tint = 300 AND tbigint = 3000")?,
        1
    );
    assert_eq!(table.count("")?, 3);
    Ok(())
}

#[test]
fn it_requires_every_write_privilege_for_any_write() -> anyhow::Result<()> {
    let conn = setup()?;
    conn.create_table(
        MemTableDef::new("AppendOnly")
            .column(MemColumn::new("id", SqlType::INTEGER).primary_key())
            .grant(TablePrivileges::SELECT | TablePrivileges::INSERT),
    )?;
    let mut table = Table::new(
        Rc::new(conn.clone()),
        TableLookup::new("AppendOnly"),
        AccessFlags::READ | AccessFlags::INSERT,
    )?;
    let err = table.open_with(OpenFlags::CHECK_PRIVILEGES).unwrap_err();
    assert!(
        matches!(err, Error::MissingPrivilege { missing, .. }
            if missing == TablePrivileges::UPDATE | TablePrivileges::DELETE),
        "{:?}",
        err
    );
    assert!(!table.is_open());

    // without the check the grant is left to the database
    table.open()?;
    assert!(table.is_open());
    Ok(())
}

#[test]
fn it_writes_external_storage_in_place_while_bound() -> anyhow::Result<()> {
    let conn = setup()?;
    conn.execute("INSERT INTO NoKeys (a, b) VALUES (1, 'fetched')")?;
    let label = ExternalBuffer::allocate(CType::CHAR, 31)?;
    let mut table = Table::new(
        Rc::new(conn.clone()),
        TableLookup::new("NoKeys"),
        AccessFlags::READ,
    )?;
    table.set_column(0, "b", label.clone(), SqlType::VARCHAR, Some(30), None, ColumnFlags::SELECT)?;
    table.open()?;
    assert!(table.column(0)?.is_bound());

    // the owner may overwrite the value but never the bound allocation
    label.store("replaced by the owner")?;
    assert!(label.store(5i32).is_err());
    assert!(label.store("x".repeat(31)).unwrap_err().is_precondition());
    assert_eq!((label.c_type(), label.byte_len()), (CType::CHAR, 31));

    table.select("")?;
    assert!(table.select_next()?);
    assert_eq!(label.borrow().to_utf8()?, "fetched");
    assert_eq!(table.column(0)?.as_string()?, "fetched");
    assert!(!table.select_next()?);
    Ok(())
}

#[test]
fn it_rolls_back_without_auto_commit() -> anyhow::Result<()> {
    let conn = setup()?;
    conn.set_auto_commit(false);
    let mut table = open(&conn, "IntTypes", AccessFlags::READ | AccessFlags::INSERT)?;
    table.set_column_value(0, 7i32)?;
    for index in 1..4 {
        table.set_column_null(index)?;
    }
    table.insert()?;
    assert_eq!(table.count("")?, 1);
    table.rollback()?;
    assert_eq!(table.count("")?, 0);
    Ok(())
}

#[test]
fn it_needs_a_primary_key_only_for_writes() -> anyhow::Result<()> {
    let conn = setup()?;
    let mut table = Table::new(
        Rc::new(conn.clone()),
        TableLookup::new("NoKeys"),
        AccessFlags::READ | AccessFlags::WRITE,
    )?;
    assert!(matches!(
        table.open().unwrap_err(),
        Error::MissingPrimaryKey { .. }
    ));
    assert!(!table.is_open());

    table.set_access_flags(AccessFlags::READ)?;
    table.open()?;
    assert_eq!(table.column_count(), 2);
    Ok(())
}

#[test]
fn it_rejects_missing_and_unknown_tables() -> anyhow::Result<()> {
    let conn = setup()?;
    let mut table = Table::new(
        Rc::new(conn.clone()),
        TableLookup::new("Missing"),
        AccessFlags::READ,
    )?;
    assert!(matches!(
        table.open().unwrap_err(),
        Error::TableNotFound { .. }
    ));

    let mut table = Table::new(
        Rc::new(conn.clone()),
        TableLookup::new("IntTypes").schema("other"),
        AccessFlags::READ,
    )?;
    assert!(table.open().is_err());
    Ok(())
}

#[test]
fn it_reads_numbers_as_text_with_a_char_type_map() -> anyhow::Result<()> {
    let conn = setup()?;
    seed(&conn, 1)?;
    let mut table = Table::new(
        Rc::new(conn.clone()),
        TableLookup::new("IntTypes"),
        AccessFlags::READ,
    )?;
    let mut options = TableOptions::new();
    options
        .type_map(exodbc::TypeMap::force_char())
        .open_flags(OpenFlags::DO_NOT_QUERY_PRIMARY_KEYS);
    table.set_options(options)?;
    table.open()?;
    assert_eq!(table.column(3)?.c_type(), exodbc::CType::CHAR);

    table.select("")?;
    assert!(table.select_next()?);
    assert_eq!(table.column(3)?.as_string()?, "1000");
    assert_eq!(table.column(1)?.as_string()?, "10");
    Ok(())
}
