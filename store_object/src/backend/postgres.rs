//! PostgreSQL backend on sqlx.
//!
//! Calls are rendered with named argument notation, so the order in which
//! parameters were bound does not have to match the declared order:
//!
//! ```sql
//! SELECT * FROM "dbo"."GetOrder"("OrderId" => $1)
//! CALL "dbo"."InsertOrder"("OrderId" => NULL::INTEGER, "Name" => $1)
//! ```
//!
//! Result-set procedures are invoked as set-returning functions; the rest
//! are invoked with `CALL`, whose single result row carries the output
//! parameters.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, PgConnection, Postgres, Row, TypeInfo};
use type_mapping::{pg_type_name, pg_type_to_sql_type, SqlType, SqlValue};

use super::{ConnectionTarget, Connector, ProcedureConnection};
use crate::command::{DataRow, ProcedureCall, SqlParameter};
use crate::errors::StoreError;
use crate::validation::ValidatedParamName;

/// Opens sqlx `PgConnection`s
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl PgConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgProcedureConnection;

    async fn connect(&self, target: &ConnectionTarget) -> Result<Self::Connection, StoreError> {
        let mut conn = tokio::time::timeout(
            target.connect_timeout(),
            PgConnection::connect(target.connection_string()),
        )
        .await
        .map_err(|_| StoreError::ConnectTimeout {
            target: target.display_string().to_string(),
            timeout: target.connect_timeout(),
        })??;

        let statement_timeout = format!(
            "SET statement_timeout = {}",
            target.command_timeout().as_millis()
        );
        sqlx::Executor::execute(&mut conn, sqlx::raw_sql(&statement_timeout)).await?;

        tracing::debug!(connection = %target, "opened PostgreSQL connection");
        Ok(PgProcedureConnection {
            conn,
            schema: target.schema().map(str::to_string),
        })
    }
}

/// One PostgreSQL connection running stored procedures
pub struct PgProcedureConnection {
    conn: PgConnection,
    schema: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallStyle {
    /// `SELECT * FROM proc(...)`, output parameters omitted
    Query,
    /// `CALL proc(...)`, output parameters passed as typed NULLs
    Call,
}

/// Render `call` to SQL; returns the text and the parameters to bind, in
/// placeholder order
fn render_call<'c>(
    call: &'c ProcedureCall,
    schema: Option<&str>,
    style: CallStyle,
) -> Result<(String, Vec<&'c SqlParameter>), StoreError> {
    let procedure = call.validate()?;
    let mut arguments = Vec::with_capacity(call.parameters().len());
    let mut bound = Vec::new();

    for parameter in call.parameters() {
        let name = ValidatedParamName::new(parameter.name())?;
        if parameter.direction().is_input() {
            bound.push(parameter);
            arguments.push(format!("{} => ${}", name.quoted(), bound.len()));
        } else if style == CallStyle::Call {
            arguments.push(format!(
                "{} => NULL::{}",
                name.quoted(),
                pg_type_name(parameter.sql_type())
            ));
        }
    }

    let target = procedure.quoted(schema);
    let sql = match style {
        CallStyle::Query => format!("SELECT * FROM {}({})", target, arguments.join(", ")),
        CallStyle::Call => format!("CALL {}({})", target, arguments.join(", ")),
    };
    Ok((sql, bound))
}

/// Bind by declared wire type; NULL binds as a typed `None`
fn bind_parameter<'q>(
    query: Query<'q, Postgres, PgArguments>,
    parameter: &SqlParameter,
) -> Query<'q, Postgres, PgArguments> {
    let value = parameter.value();
    match parameter.sql_type() {
        SqlType::Int => query.bind(value.as_i32()),
        SqlType::TinyInt => query.bind(value.as_u8().map(i16::from)),
        SqlType::VarChar => query.bind(value.as_str().map(str::to_string)),
        SqlType::Money => query.bind(value.as_decimal()),
        SqlType::DateTime => query.bind(value.as_datetime()),
    }
}

fn unsupported(column: &str, type_name: &str) -> StoreError {
    StoreError::UnsupportedColumnType {
        column: column.to_string(),
        type_name: type_name.to_string(),
    }
}

fn decode_row(row: &PgRow) -> Result<DataRow, StoreError> {
    let mut data = DataRow::with_capacity(row.len());
    for column in row.columns() {
        let name = column.name();
        let index = column.ordinal();
        let type_name = column.type_info().name();
        let sql_type = pg_type_to_sql_type(type_name).ok_or_else(|| unsupported(name, type_name))?;

        let value = match (sql_type, type_name) {
            (SqlType::Int, "INT8") => match row.try_get::<Option<i64>, _>(index)? {
                Some(v) => SqlValue::Int(i32::try_from(v).map_err(|_| StoreError::ColumnType {
                    column: name.to_string(),
                    expected: SqlType::Int,
                    found: format!("INT8 value {}", v),
                })?),
                None => SqlValue::Null,
            },
            (SqlType::Int, _) => row.try_get::<Option<i32>, _>(index)?.into(),
            (SqlType::TinyInt, "BOOL") => row.try_get::<Option<bool>, _>(index)?.into(),
            (SqlType::TinyInt, _) => match row.try_get::<Option<i16>, _>(index)? {
                Some(v) => u8::try_from(v).map_or(SqlValue::Int(i32::from(v)), SqlValue::TinyInt),
                None => SqlValue::Null,
            },
            (SqlType::VarChar, _) => row.try_get::<Option<String>, _>(index)?.into(),
            (SqlType::Money, _) => row.try_get::<Option<Decimal>, _>(index)?.into(),
            (SqlType::DateTime, "TIMESTAMP") => row
                .try_get::<Option<NaiveDateTime>, _>(index)?
                .map(|v| v.and_utc())
                .into(),
            (SqlType::DateTime, _) => row.try_get::<Option<DateTime<Utc>>, _>(index)?.into(),
        };
        data.push(name, value);
    }
    Ok(data)
}

impl PgProcedureConnection {
    async fn run(
        &mut self,
        call: &ProcedureCall,
        style: CallStyle,
    ) -> Result<Vec<DataRow>, StoreError> {
        let (sql, bound) = render_call(call, self.schema.as_deref(), style)?;
        tracing::trace!(procedure = call.procedure(), sql = %sql, "running procedure");

        let query = bound
            .into_iter()
            .fold(sqlx::query(&sql), |query, parameter| bind_parameter(query, parameter));
        let rows = query.fetch_all(&mut self.conn).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn control(&mut self, statement: &str) -> Result<(), StoreError> {
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(statement)).await?;
        Ok(())
    }
}

/// Transaction identifiers are generated internally; quote them anyway
fn gid_literal(gid: &str) -> String {
    format!("'{}'", gid.replace('\'', "''"))
}

#[async_trait]
impl ProcedureConnection for PgProcedureConnection {
    async fn query(&mut self, call: &ProcedureCall) -> Result<Vec<DataRow>, StoreError> {
        self.run(call, CallStyle::Query).await
    }

    async fn execute(&mut self, call: &mut ProcedureCall) -> Result<(), StoreError> {
        let rows = self.run(call, CallStyle::Call).await?;
        if let Some(outputs) = rows.first() {
            for (column, value) in outputs.columns() {
                call.set_output(column, value.clone());
            }
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        self.control("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.control("ROLLBACK").await
    }

    async fn prepare(&mut self, gid: &str) -> Result<(), StoreError> {
        self.control(&format!("PREPARE TRANSACTION {}", gid_literal(gid)))
            .await
    }

    async fn commit_prepared(&mut self, gid: &str) -> Result<(), StoreError> {
        self.control(&format!("COMMIT PREPARED {}", gid_literal(gid)))
            .await
    }

    async fn rollback_prepared(&mut self, gid: &str) -> Result<(), StoreError> {
        self.control(&format!("ROLLBACK PREPARED {}", gid_literal(gid)))
            .await
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}
