use std::collections::HashSet;

use sqlparser::ast::{
    self, Assignment, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, TableWithJoins, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::notify::{ALL_BOOKINGS_CHANNEL, room_channel};

/// Column order assumed by an INSERT without a column list.
pub const ROOM_COLUMNS: [&str; 7] = [
    "name",
    "color",
    "capacity",
    "slot_duration",
    "available_from",
    "available_to",
    "id",
];

pub const BOOKING_COLUMNS: [&str; 9] = [
    "room_id",
    "name",
    "email",
    "phone",
    "title",
    "start_at",
    "end_at",
    "attendees",
    "id",
];

/// Parsed command from SQL input. `returning` asks for the affected row back.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Option<Ulid>,
        draft: RoomDraft,
        returning: bool,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
        returning: bool,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms,
    InsertBooking {
        id: Option<Ulid>,
        request: BookingRequest,
        returning: bool,
    },
    EndBooking {
        id: Ulid,
        returning: bool,
    },
    ExtendBooking {
        id: Ulid,
        minutes: i64,
        returning: bool,
    },
    CancelBooking {
        id: Ulid,
        returning: bool,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectBookingsByEmail {
        email: String,
    },
    SelectRoomSlots {
        room_id: Ulid,
        day: Option<Ms>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if let Some(rest) = strip_keyword(trimmed, "LISTEN") {
        return Ok(Command::Listen {
            channel: canonical_channel(rest)?,
        });
    }
    if let Some(rest) = strip_keyword(trimmed, "UNLISTEN") {
        if rest == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten {
            channel: canonical_channel(rest)?,
        });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => parse_update(table, assignments, selection.as_ref(), returning.is_some()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// `rest` of `sql` after a leading keyword (any case) and whitespace.
fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    let rest = &sql[keyword.len()..];
    (head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace))
        .then(|| rest.trim())
}

/// Normalise a channel name: `bookings`, or `room_<ULID>` with the id in
/// canonical form.
fn canonical_channel(raw: &str) -> Result<String, SqlError> {
    let name = raw.trim_matches('"');
    if name.eq_ignore_ascii_case(ALL_BOOKINGS_CHANNEL) {
        return Ok(ALL_BOOKINGS_CHANNEL.to_string());
    }
    let id = name
        .get(..5)
        .filter(|p| p.eq_ignore_ascii_case("room_"))
        .and_then(|_| Ulid::from_string(&name[5..]).ok())
        .ok_or_else(|| SqlError::BadChannel(name.to_string()))?;
    Ok(room_channel(&id))
}

// ── INSERT ───────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "rooms" => {
            let mut id = None;
            let mut draft = RoomDraft::default();
            for (column, expr) in insert_cells(insert, "rooms", &ROOM_COLUMNS)? {
                match column.as_str() {
                    "id" => id = parse_ulid_or_null(expr)?,
                    "name" => draft.name = parse_text_or_null(expr)?,
                    "color" => draft.color = parse_text_or_null(expr)?,
                    "capacity" => draft.capacity = parse_u32_or_null(expr)?,
                    "slot_duration" => draft.slot_duration = parse_u32_or_null(expr)?,
                    "available_from" => draft.available_from = parse_u32_or_null(expr)?,
                    "available_to" => draft.available_to = parse_u32_or_null(expr)?,
                    _ => return Err(SqlError::UnknownColumn("rooms", column)),
                }
            }
            Ok(Command::InsertRoom {
                id,
                draft,
                returning,
            })
        }
        "bookings" => {
            let mut id = None;
            let mut request = BookingRequest::default();
            for (column, expr) in insert_cells(insert, "bookings", &BOOKING_COLUMNS)? {
                match column.as_str() {
                    "id" => id = parse_ulid_or_null(expr)?,
                    "room_id" => request.room_id = parse_ulid_or_null(expr)?,
                    "name" => request.name = parse_text_or_null(expr)?,
                    "email" => request.email = parse_text_or_null(expr)?,
                    "phone" => request.phone = parse_text_or_null(expr)?,
                    "title" => request.title = parse_text_or_null(expr)?,
                    "start_at" => request.start_at = parse_i64_or_null(expr)?,
                    "end_at" => request.end_at = parse_i64_or_null(expr)?,
                    "attendees" => request.attendees = parse_u32_or_null(expr)?,
                    _ => return Err(SqlError::UnknownColumn("bookings", column)),
                }
            }
            Ok(Command::InsertBooking {
                id,
                request,
                returning,
            })
        }
        "room_slots" => Err(SqlError::Unsupported("room_slots is read-only".into())),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Pair each VALUES cell with its column, from the column list or, when the
/// statement has none, from `default_columns` in order.
fn insert_cells<'a>(
    insert: &'a ast::Insert,
    table: &'static str,
    default_columns: &[&str],
) -> Result<Vec<(String, &'a Expr)>, SqlError> {
    let rows = insert_rows(insert)?;
    let values = match rows {
        [row] => row,
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        default_columns.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let arity_ok = if insert.columns.is_empty() {
        values.len() <= columns.len()
    } else {
        values.len() == columns.len()
    };
    if !arity_ok {
        return Err(SqlError::WrongArity(table, columns.len(), values.len()));
    }

    let mut seen = HashSet::new();
    let mut cells = Vec::with_capacity(values.len());
    for (column, expr) in columns.into_iter().zip(values) {
        if !seen.insert(column.clone()) {
            return Err(SqlError::Parse(format!("column {column} specified more than once")));
        }
        cells.push((column, expr));
    }
    Ok(cells)
}

fn insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if !values.rows.is_empty() => Ok(values.rows.as_slice()),
        SetExpr::Values(_) => Err(SqlError::Parse("empty VALUES".into())),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

// ── UPDATE ───────────────────────────────────────────────────

fn parse_update(
    table: &TableWithJoins,
    assignments: &[Assignment],
    selection: Option<&Expr>,
    returning: bool,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if !matches!(table.as_str(), "rooms" | "bookings") {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    if table == "rooms" {
        let mut patch = RoomPatch::default();
        for a in assignments {
            let column = assignment_column(a)?;
            let value = &a.value;
            match column.as_str() {
                "name" => patch.name = Some(parse_text(value)?),
                "color" => patch.color = Some(parse_text(value)?),
                "capacity" => patch.capacity = Some(parse_u32(value)?),
                "slot_duration" => patch.slot_duration = Some(parse_u32(value)?),
                "available_from" => patch.available_from = Some(parse_u32(value)?),
                "available_to" => patch.available_to = Some(parse_u32(value)?),
                "id" => return Err(SqlError::Unsupported("room id cannot change".into())),
                _ => return Err(SqlError::UnknownColumn("rooms", column)),
            }
        }
        return Ok(Command::UpdateRoom {
            id,
            patch,
            returning,
        });
    }

    let [assignment] = assignments else {
        return Err(SqlError::Unsupported(
            "bookings: set exactly one of status, extend_minutes".into(),
        ));
    };
    let column = assignment_column(assignment)?;
    match column.as_str() {
        "status" => {
            let text = parse_text(&assignment.value)?;
            match BookingStatus::parse(&text) {
                Some(BookingStatus::Ended) => Ok(Command::EndBooking { id, returning }),
                Some(BookingStatus::Cancelled) => Ok(Command::CancelBooking { id, returning }),
                Some(other) => Err(SqlError::Unsupported(format!(
                    "status {other} is set by the scheduler"
                ))),
                None => Err(SqlError::BadValue(format!("unknown status {text:?}"))),
            }
        }
        "extend_minutes" => Ok(Command::ExtendBooking {
            id,
            minutes: parse_i64(&assignment.value)?,
            returning,
        }),
        c if BOOKING_COLUMNS.contains(&c) => Err(SqlError::Unsupported(format!(
            "bookings.{c} cannot be updated"
        ))),
        _ => Err(SqlError::UnknownColumn("bookings", column)),
    }
}

fn assignment_column(a: &Assignment) -> Result<String, SqlError> {
    match &a.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Unsupported("tuple assignment".into())),
    }
}

// ── DELETE ───────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom {
            id: extract_where_id(delete.selection.as_ref())?,
        }),
        "bookings" => Ok(Command::CancelBooking {
            id: extract_where_id(delete.selection.as_ref())?,
            returning: delete.returning.is_some(),
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Filters {
    room_id: Option<Ulid>,
    email: Option<String>,
    from: Option<Ms>,
    to: Option<Ms>,
    day: Option<Ms>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut f = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut f)?;
    }

    match table.as_str() {
        "rooms" => {
            if select.selection.is_some() {
                return Err(SqlError::Unsupported("filters on rooms".into()));
            }
            Ok(Command::SelectRooms)
        }
        "bookings" => {
            if f.day.is_some() {
                return Err(SqlError::Unsupported("day filter on bookings".into()));
            }
            if let Some(email) = f.email {
                if f.room_id.is_some() || f.from.is_some() || f.to.is_some() {
                    return Err(SqlError::Unsupported(
                        "email cannot be combined with other filters".into(),
                    ));
                }
                return Ok(Command::SelectBookingsByEmail { email });
            }
            Ok(Command::SelectBookings {
                filter: BookingFilter {
                    from: f.from,
                    to: f.to,
                    room_id: f.room_id,
                },
            })
        }
        "room_slots" => {
            if f.email.is_some() || f.from.is_some() || f.to.is_some() {
                return Err(SqlError::Unsupported(
                    "room_slots filters are room_id and day".into(),
                ));
            }
            Ok(Command::SelectRoomSlots {
                room_id: f.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
                day: f.day,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Walk a conjunction of `column op literal` comparisons.
fn collect_filters(expr: &Expr, f: &mut Filters) -> Result<(), SqlError> {
    let unsupported = || SqlError::Unsupported(format!("filter {expr}"));
    match expr {
        Expr::Nested(inner) => collect_filters(inner, f),
        Expr::BinaryOp { left, op, right } => {
            if *op == ast::BinaryOperator::And {
                collect_filters(left, f)?;
                return collect_filters(right, f);
            }
            let column = expr_column_name(left).ok_or_else(unsupported)?;
            match (column.as_str(), op) {
                ("room_id", ast::BinaryOperator::Eq) => f.room_id = Some(parse_ulid(right)?),
                ("email", ast::BinaryOperator::Eq) => f.email = Some(parse_text(right)?),
                ("day", ast::BinaryOperator::Eq) => f.day = Some(parse_i64(right)?),
                ("start_at", ast::BinaryOperator::GtEq) => f.from = Some(parse_i64(right)?),
                ("end_at", ast::BinaryOperator::LtEq) => f.to = Some(parse_i64(right)?),
                _ => return Err(unsupported()),
            }
            Ok(())
        }
        _ => Err(unsupported()),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_where_id(selection: Option<&Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        Some(Expr::Nested(inner)) => extract_where_id(Some(inner.as_ref())),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::BadValue(format!("bad ULID {s:?}: {e}")))
        }
        _ => Err(SqlError::BadValue(format!("expected ULID string, got {expr}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_ulid(expr).map(Some)
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::DollarQuotedString(ast::DollarQuotedString { value: s, .. })) => {
            Ok(s.clone())
        }
        // Bare numbers are accepted for phone-like fields
        Some(Value::Number(s, _)) => Ok(s.clone()),
        _ => Err(SqlError::BadValue(format!("expected string, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(expr).map(Some)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        return parse_i64(inner).map(|v| -v);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .trim()
            .parse()
            .map_err(|e| SqlError::BadValue(format!("bad integer {s:?}: {e}"))),
        _ => Err(SqlError::BadValue(format!("expected integer, got {expr}"))),
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_i64(expr).map(Some)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::BadValue(format!("{v} out of range")))
}

fn parse_u32_or_null(expr: &Expr) -> Result<Option<u32>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_u32(expr).map(Some)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    BadValue(String),
    BadChannel(String),
}

impl SqlError {
    /// SQLSTATE reported to the client.
    pub fn code(&self) -> &'static str {
        match self {
            SqlError::Parse(_) | SqlError::Empty | SqlError::WrongArity(..) | SqlError::MissingFilter(_) => {
                "42601"
            }
            SqlError::Unsupported(_) => "0A000",
            SqlError::UnknownTable(_) => "42P01",
            SqlError::UnknownColumn(..) => "42703",
            SqlError::BadValue(_) => "22P02",
            SqlError::BadChannel(_) => "42000",
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {t}.{c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::BadValue(s) => write!(f, "invalid value: {s}"),
            SqlError::BadChannel(c) => {
                write!(f, "invalid channel: {c} (expected bookings or room_{{id}})")
            }
        }
    }
}

impl std::error::Error for SqlError {}
