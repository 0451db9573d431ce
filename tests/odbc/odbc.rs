//! Runs against the data source named by `DATABASE_URL`, e.g.
//! `odbc:Driver={ODBC Driver 18 for SQL Server};Server=localhost;UID=sa;PWD=...`.

use std::rc::Rc;

use exodbc::driver::Statement;
use exodbc::odbc::{OdbcConnectOptions, OdbcConnection};
use exodbc::{AccessFlags, Connection, Table, TableLookup};

fn connect() -> anyhow::Result<Rc<OdbcConnection>> {
    let _ = env_logger::builder().is_test(true).try_init();
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL")?;
    let options: OdbcConnectOptions = url.parse()?;
    Ok(Rc::new(OdbcConnection::establish(&options)?))
}

fn create(conn: &OdbcConnection, name: &str) -> anyhow::Result<()> {
    let mut stmt = conn.allocate_statement()?;
    let _ = stmt.exec_direct(&format!("DROP TABLE {}", name));
    stmt.exec_direct(&format!(
        "CREATE TABLE {} (id INTEGER NOT NULL PRIMARY KEY, tsmallint SMALLINT, \
         tbigint BIGINT, label VARCHAR(20))",
        name
    ))?;
    Ok(())
}

#[test]
fn it_connects() -> anyhow::Result<()> {
    let conn = connect()?;
    assert!(!conn.info().dbms_name.is_empty());
    Ok(())
}

#[test]
fn it_writes_and_reads_through_a_table() -> anyhow::Result<()> {
    let conn = connect()?;
    create(&conn, "exodbc_rw")?;

    let mut table = Table::new(
        conn.clone(),
        TableLookup::new("exodbc_rw"),
        AccessFlags::READ | AccessFlags::WRITE,
    )?;
    table.open()?;
    for id in 1..=3i32 {
        table.set_column_value(0, id)?;
        table.set_column_value(1, id as i16 * 10)?;
        table.set_column_value(2, i64::from(id) * 1000)?;
        table.set_column_value(3, format!("row {}", id))?;
        table.insert()?;
    }
    assert_eq!(table.count("")?, 3);

    table.select_ordered("", "id")?;
    assert!(table.select_next()?);
    assert_eq!(table.column(3)?.as_string()?, "row 1");
    table.select_close()?;

    table.set_column_value(0, 2i32)?;
    table.set_column_value(3, "changed")?;
    assert_eq!(table.update()?, 1);
    assert_eq!(table.count("label = 'changed'")?, 1);

    assert_eq!(table.delete_where("id > 1")?, 2);
    assert_eq!(table.count("")?, 1);
    table.close()?;
    Ok(())
}
