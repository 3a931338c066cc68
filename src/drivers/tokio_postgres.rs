use std::error::Error as StdError;
use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use tokio::task::JoinHandle;
use tokio_postgres::types::{to_sql_checked, Format, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, Column, NoTls, Row};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{PgDalError, Result};
use crate::traits::DatabaseDriver;
use crate::types::{BoundParams, Cell, RawQueryResult, ResultSet};

type BoxError = Box<dyn StdError + Sync + Send>;

/// PostgreSQL driver implementation using tokio-postgres.
///
/// The socket is non-blocking: a background task on the current tokio
/// runtime drives it, and `Client` hands requests to that task. Dropping
/// the driver drops the `Client`, which ends the session.
///
/// The driver is not `Clone`: a live session belongs to
/// exactly one `Database`.
pub struct TokioPostgresDriver {
    client: Client,
    connection_task: JoinHandle<()>,
}

impl TokioPostgresDriver {
    /// Connect to a PostgreSQL database.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        Self::connect_with(&Config::new(connection_string)).await
    }

    /// Connect using a full [`Config`].
    pub async fn connect_with(config: &Config) -> Result<Self> {
        let pg_config = config.to_pg_config()?;

        // The connection task needs a runtime; without one the session
        // can't run in non-blocking mode.
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PgDalError::ModeConfigurationFailed(e.to_string()))?;

        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| PgDalError::ConnectionFailed(error_chain(&e)))?;

        // Spawn the connection handler
        let connection_task = runtime.spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %error_chain(&e), "PostgreSQL connection error");
            }
        });

        let driver = Self {
            client,
            connection_task,
        };
        driver.ready().await?;
        Ok(driver)
    }
}

#[async_trait]
impl DatabaseDriver for TokioPostgresDriver {
    async fn ready(&self) -> Result<()> {
        if self.client.is_closed() || self.connection_task.is_finished() {
            return Err(PgDalError::ModeConfigurationFailed(
                "connection task exited before the session was ready".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, sql: &str, params: &BoundParams) -> Result<RawQueryResult> {
        let statement = self.client.prepare(sql).await.map_err(query_failed)?;

        let expected = statement.params().len();
        if expected != params.len() {
            return Err(PgDalError::QueryFailed(format!(
                "statement expects {} parameters, got {}",
                expected,
                params.len()
            )));
        }

        // Parameters go out in text format; the server parses each one into
        // the type it inferred.
        let text_params: Vec<TextParam<'_>> = params.iter().map(TextParam).collect();
        let param_refs: Vec<&(dyn ToSql + Sync)> = text_params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();

        if statement.columns().is_empty() {
            if !returns_rows(sql) {
                let rows_affected = self
                    .client
                    .execute(&statement, &param_refs)
                    .await
                    .map_err(query_failed)?;
                return Ok(RawQueryResult::command(rows_affected));
            }

            // `SELECT FROM t` still yields a tuple set, just without columns.
            let rows = self
                .client
                .query(&statement, &param_refs)
                .await
                .map_err(query_failed)?;
            return ResultSet::new(Vec::new(), vec![Vec::new(); rows.len()])
                .map(RawQueryResult::Rows);
        }

        let rows = self
            .client
            .query(&statement, &param_refs)
            .await
            .map_err(query_failed)?;

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();

        let cells = rows
            .iter()
            .map(|row| row_to_cells(row, statement.columns()))
            .collect();

        ResultSet::from_cells(columns, cells).map(RawQueryResult::Rows)
    }
}

fn query_failed(e: tokio_postgres::Error) -> PgDalError {
    match e.as_db_error() {
        Some(db) => PgDalError::QueryFailed(db.to_string()),
        None => PgDalError::QueryFailed(error_chain(&e)),
    }
}

/// Formats an error followed by every cause in its source chain that the
/// message does not already include.
fn error_chain(e: &(dyn StdError + 'static)) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Whether a statement that describes no columns still answers with a
/// tuple set, judged by its leading keyword.
fn returns_rows(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.find('\n').map_or("", |end| &comment[end..]);
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.find("*/").map_or("", |end| &comment[end + 2..]);
        } else {
            break;
        }
    }

    let keyword: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    matches!(
        keyword.as_str(),
        "SELECT" | "VALUES" | "TABLE" | "SHOW" | "FETCH" | "EXPLAIN"
    )
}

/// A bound parameter sent in PostgreSQL's text format.
#[derive(Debug)]
struct TextParam<'a>(&'a str);

impl ToSql for TextParam<'_> {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// The undecoded bytes of one cell; `None` is NULL.
struct RawCell<'a>(Option<&'a [u8]>);

impl<'a> FromSql<'a> for RawCell<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(RawCell(Some(raw)))
    }

    fn from_sql_null(_ty: &Type) -> std::result::Result<Self, BoxError> {
        Ok(RawCell(None))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Renders one row in PostgreSQL's text output format. A value without a
/// text rendering becomes an unreadable cell instead of failing the row.
fn row_to_cells(row: &Row, columns: &[Column]) -> Vec<Cell> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, col)| match row.try_get::<_, RawCell<'_>>(idx) {
            Ok(RawCell(None)) => Cell::Null,
            Ok(RawCell(Some(raw))) => match render(col.type_(), raw) {
                Ok(text) => Cell::Text(text),
                Err(e) => Cell::Unreadable(e.to_string()),
            },
            Err(e) => Cell::Unreadable(error_chain(&e)),
        })
        .collect()
}

fn render(ty: &Type, raw: &[u8]) -> std::result::Result<String, BoxError> {
    let text = match *ty {
        Type::BOOL => match bool::from_sql(ty, raw)? {
            true => "t".to_string(),
            false => "f".to_string(),
        },
        Type::INT2 => i16::from_sql(ty, raw)?.to_string(),
        Type::INT4 => i32::from_sql(ty, raw)?.to_string(),
        Type::INT8 => i64::from_sql(ty, raw)?.to_string(),
        Type::OID => u32::from_sql(ty, raw)?.to_string(),
        Type::CHAR => char_to_text(i8::from_sql(ty, raw)?),
        Type::FLOAT4 => {
            let x = f32::from_sql(ty, raw)?;
            match x.is_finite() {
                true => x.to_string(),
                false => float_to_text(f64::from(x)),
            }
        }
        Type::FLOAT8 => float_to_text(f64::from_sql(ty, raw)?),
        Type::NUMERIC => numeric_to_text(raw)?,
        Type::BYTEA => bytea_to_text(raw),
        Type::INET | Type::CIDR => inet_to_text(raw)?,
        Type::UUID => Uuid::from_sql(ty, raw)?.to_string(),
        Type::JSON => std::str::from_utf8(raw)?.to_string(),
        Type::JSONB => match raw.split_first() {
            Some((1, body)) => std::str::from_utf8(body)?.to_string(),
            _ => return Err("unsupported jsonb version".into()),
        },
        Type::DATE => match i32::from_sql(ty, raw)? {
            i32::MAX => "infinity".to_string(),
            i32::MIN => "-infinity".to_string(),
            _ => NaiveDate::from_sql(ty, raw)?.format("%Y-%m-%d").to_string(),
        },
        Type::TIMESTAMP => match i64::from_sql(ty, raw)? {
            i64::MAX => "infinity".to_string(),
            i64::MIN => "-infinity".to_string(),
            _ => timestamp_to_text(&NaiveDateTime::from_sql(ty, raw)?),
        },
        Type::TIMESTAMPTZ => match i64::from_sql(ty, raw)? {
            i64::MAX => "infinity".to_string(),
            i64::MIN => "-infinity".to_string(),
            _ => {
                let at = DateTime::<Utc>::from_sql(ty, raw)?;
                format!("{}+00", timestamp_to_text(&at.naive_utc()))
            }
        },
        Type::TIME => {
            let t = NaiveTime::from_sql(ty, raw)?;
            format!("{}{}", t.format("%H:%M:%S"), fraction(t.nanosecond() / 1_000))
        }
        _ => match ty.kind() {
            Kind::Domain(inner) => render(inner, raw)?,
            Kind::Enum(_) => std::str::from_utf8(raw)?.to_string(),
            _ if <&str as FromSql>::accepts(ty) => <&str as FromSql>::from_sql(ty, raw)?.to_string(),
            _ => return Err(format!("no text rendering for type {}", ty).into()),
        },
    };
    Ok(text)
}

fn float_to_text(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_string()
    } else if x == f64::INFINITY {
        "Infinity".to_string()
    } else if x == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        x.to_string()
    }
}

/// `"char"` prints printable bytes as-is and others as octal escapes.
fn char_to_text(c: i8) -> String {
    let byte = c as u8;
    match byte {
        0 => String::new(),
        0x80..=0xff => format!("\\{:03o}", byte),
        _ => char::from(byte).to_string(),
    }
}

fn bytea_to_text(raw: &[u8]) -> String {
    let mut out = String::with_capacity(2 + raw.len() * 2);
    out.push_str("\\x");
    for byte in raw {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn timestamp_to_text(at: &NaiveDateTime) -> String {
    format!(
        "{}{}",
        at.format("%Y-%m-%d %H:%M:%S"),
        fraction(at.nanosecond() / 1_000)
    )
}

/// Microseconds as `.ffffff` with trailing zeros dropped; empty when zero.
fn fraction(micros: u32) -> String {
    if micros == 0 {
        return String::new();
    }
    let digits = format!("{:06}", micros);
    format!(".{}", digits.trim_end_matches('0'))
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decodes the binary `numeric` layout: digit count, weight, sign and
/// display scale, then base-10000 digits.
fn numeric_to_text(raw: &[u8]) -> std::result::Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let read = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);
    let ndigits = usize::from(read(0));
    let weight = i32::from(read(2) as i16);
    let sign = read(4);
    let dscale = usize::from(read(6));

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        0 | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign {:#06x}", other).into()),
    }

    let body = &raw[8..];
    if body.len() != ndigits * 2 {
        return Err("numeric digit count does not match payload".into());
    }
    let digits: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let digit = |i: i32| -> u16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

fn inet_to_text(raw: &[u8]) -> std::result::Result<String, BoxError> {
    let (header, addr) = raw.split_at(raw.len().min(4));
    let [family, bits, is_cidr, len] = <[u8; 4]>::try_from(header)
        .map_err(|_| "inet value too short")?;
    if usize::from(len) != addr.len() {
        return Err("inet address length does not match payload".into());
    }

    let (text, max_bits) = match family {
        PGSQL_AF_INET => {
            let octets = <[u8; 4]>::try_from(addr).map_err(|_| "invalid IPv4 address")?;
            (Ipv4Addr::from(octets).to_string(), 32)
        }
        PGSQL_AF_INET6 => {
            let octets = <[u8; 16]>::try_from(addr).map_err(|_| "invalid IPv6 address")?;
            (Ipv6Addr::from(octets).to_string(), 128)
        }
        other => return Err(format!("unknown inet family {}", other).into()),
    };

    if is_cidr != 0 || bits != max_bits {
        Ok(format!("{}/{}", text, bits))
    } else {
        Ok(text)
    }
}
