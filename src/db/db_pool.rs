use duckdb::Connection;
use r2d2::ManageConnection;

/// Macros installed on every pooled connection so repaired BigQuery-flavoured
/// statements run unchanged against DuckDB.
const COMPAT_MACROS: &str = "
    CREATE OR REPLACE TEMP MACRO parse_date(fmt, value) AS CAST(strptime(value, fmt) AS DATE);
";

pub struct DuckDBConnectionManager {
    connection_string: String,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String) -> Self {
        Self { connection_string }
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let conn = if self.connection_string == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(&self.connection_string)?
        };
        conn.execute_batch(COMPAT_MACROS)?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
