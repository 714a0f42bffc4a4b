use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::auth::RoomBookAuthSource;
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::notify::Notice;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

type Listens = HashMap<String, broadcast::Receiver<Notice>>;

/// One handler per connection. It owns the connection's LISTEN subscriptions;
/// pending notices are written to the client after each statement it runs.
pub struct RoomBookHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RoomBookQueryParser>,
    listens: Mutex<Listens>,
    pid: i32,
}

impl RoomBookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoomBookQueryParser),
            listens: Mutex::new(HashMap::new()),
            pid: std::process::id() as i32,
        }
    }

    fn listens(&self) -> std::sync::MutexGuard<'_, Listens> {
        self.listens.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drain every subscribed channel without waiting. Channels whose sender
    /// is gone (the room was deleted) are dropped from the subscription set.
    fn pending_notices(&self) -> Vec<(String, Notice)> {
        let mut listens = self.listens();
        let mut out = Vec::new();
        let mut closed = Vec::new();
        for (channel, rx) in listens.iter_mut() {
            loop {
                match rx.try_recv() {
                    Ok(notice) => out.push((channel.clone(), notice)),
                    Err(TryRecvError::Lagged(missed)) => {
                        warn!(channel = %channel, missed, "listener lagged, notices dropped");
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Closed) => {
                        closed.push(channel.clone());
                        break;
                    }
                }
            }
        }
        for channel in closed {
            listens.remove(&channel);
        }
        out
    }

    async fn flush_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        for (channel, notice) in self.pending_notices() {
            client
                .send(PgWireBackendMessage::NotificationResponse(
                    NotificationResponse::new(self.pid, channel, notice.payload()),
                ))
                .await?;
        }
        Ok(())
    }

    /// Parse, execute and account for one statement, then flush notices.
    async fn run_statement<C>(
        &self,
        client: &mut C,
        query: &str,
        format: &Format,
    ) -> PgWireResult<Response>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let started = Instant::now();
        let (label, result) = match sql::parse_sql(query) {
            Ok(cmd) => {
                let label = command_label(&cmd);
                (label, self.execute_command(cmd, format).await)
            }
            Err(e) => ("invalid", Err(sql_err(e))),
        };
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(command = label, "statement failed: {e:?}");
        }

        self.flush_notifications(client).await?;
        result
    }

    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertRoom {
                id,
                draft,
                returning,
            } => {
                let room = engine
                    .create_room(id.unwrap_or_else(Ulid::new), draft)
                    .await
                    .map_err(engine_err)?;
                Ok(room_outcome(
                    "INSERT",
                    RoomInfo {
                        room,
                        booking_count: 0,
                    },
                    returning,
                    format,
                ))
            }
            Command::UpdateRoom {
                id,
                patch,
                returning,
            } => {
                let room = engine.update_room(id, patch).await.map_err(engine_err)?;
                let info = match engine.room_info(id).await {
                    Some(info) => info,
                    None => RoomInfo {
                        room,
                        booking_count: 0,
                    },
                };
                Ok(room_outcome("UPDATE", info, returning, format))
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms => Ok(rooms_response(engine.list_rooms().await, format)),
            Command::InsertBooking {
                id,
                request,
                returning,
            } => {
                let booking = engine
                    .create_booking(id.unwrap_or_else(Ulid::new), request)
                    .await
                    .map_err(engine_err)?;
                Ok(self.booking_outcome("INSERT", booking, returning, format).await)
            }
            Command::EndBooking { id, returning } => {
                let booking = engine.end_booking(id).await.map_err(engine_err)?;
                Ok(self.booking_outcome("UPDATE", booking, returning, format).await)
            }
            Command::ExtendBooking {
                id,
                minutes,
                returning,
            } => {
                let booking = engine
                    .extend_booking(id, minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(self.booking_outcome("UPDATE", booking, returning, format).await)
            }
            Command::CancelBooking { id, returning } => {
                let booking = engine.cancel_booking(id).await.map_err(engine_err)?;
                Ok(self.booking_outcome("DELETE", booking, returning, format).await)
            }
            Command::SelectBookings { filter } => {
                Ok(bookings_response(engine.list_bookings(&filter).await, format))
            }
            Command::SelectBookingsByEmail { email } => {
                Ok(bookings_response(
                engine.list_bookings_by_email(&email).await,
                format,
            ))
            }
            Command::SelectRoomSlots { room_id, day } => {
                let now = now_ms();
                let slots = engine
                    .room_slots_for(room_id, day.unwrap_or(now), now)
                    .await
                    .map_err(engine_err)?;
                Ok(slots_response(room_id, slots, format))
            }
            Command::Listen { channel } => {
                if let Some(room_id) = channel
                    .strip_prefix("room_")
                    .and_then(|s| Ulid::from_string(s).ok())
                {
                    if engine.get_room(room_id).await.is_none() {
                        return Err(engine_err(EngineError::RoomNotFound(room_id)));
                    }
                }
                let mut listens = self.listens();
                if !listens.contains_key(&channel) {
                    let rx = engine.notify.subscribe(&channel);
                    listens.insert(channel, rx);
                }
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                self.listens().remove(&channel);
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.listens().clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }

    /// A booking mutation answers with either a command tag or, with
    /// RETURNING, the booking as it was written.
    async fn booking_outcome(
        &self,
        tag: &str,
        booking: Booking,
        returning: bool,
        format: &Format,
    ) -> Response {
        if !returning {
            return Response::Execution(Tag::new(tag).with_rows(1));
        }
        let rows = match self.engine.get_room(booking.room_id).await {
            Some(room) => vec![BookingDetail { booking, room }],
            None => vec![],
        };
        bookings_response(rows, format)
    }
}

fn room_outcome(tag: &str, info: RoomInfo, returning: bool, format: &Format) -> Response {
    if returning {
        rooms_response(vec![info], format)
    } else {
        Response::Execution(Tag::new(tag).with_rows(1))
    }
}

// ── Result sets ───────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("color", Type::VARCHAR),
        field("capacity", Type::INT4),
        field("slot_duration", Type::INT4),
        field("available_from", Type::INT4),
        field("available_to", Type::INT4),
        field("booking_count", Type::INT8),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("room_name", Type::VARCHAR),
        field("room_color", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("phone", Type::VARCHAR),
        field("title", Type::VARCHAR),
        field("start_at", Type::INT8),
        field("end_at", Type::INT8),
        field("attendees", Type::INT4),
        field("slots", Type::INT4),
        field("status", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("start_at", Type::INT8),
        field("end_at", Type::INT8),
        field("state", Type::VARCHAR),
    ]
}

/// Row description for a statement, guessed from its text. Only SELECTs and
/// RETURNING statements produce rows.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") && !upper.contains("RETURNING") {
        return vec![];
    }
    if upper.contains("ROOM_SLOTS") {
        slots_schema()
    } else if upper.contains("BOOKINGS") {
        bookings_schema()
    } else if upper.contains("ROOMS") {
        rooms_schema()
    } else {
        vec![]
    }
}

/// Apply the client's requested result formats column by column.
fn with_format(schema: Vec<FieldInfo>, format: &Format) -> Vec<FieldInfo> {
    schema
        .into_iter()
        .enumerate()
        .map(|(idx, f)| {
            FieldInfo::new(
                f.name().to_string(),
                None,
                None,
                f.datatype().clone(),
                format.format_for(idx),
            )
        })
        .collect()
}

fn int4(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

fn int8(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    format: &Format,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(with_format(schema, format));
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn rooms_response(rooms: Vec<RoomInfo>, format: &Format) -> Response {
    query_response(rooms_schema(), format, rooms, |enc, info| {
        let r = &info.room;
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.name)?;
        enc.encode_field(&r.color)?;
        enc.encode_field(&int4(r.capacity))?;
        enc.encode_field(&int4(r.slot_duration))?;
        enc.encode_field(&int4(r.available_from))?;
        enc.encode_field(&int4(r.available_to))?;
        enc.encode_field(&int8(info.booking_count))
    })
}

fn bookings_response(bookings: Vec<BookingDetail>, format: &Format) -> Response {
    query_response(bookings_schema(), format, bookings, |enc, detail| {
        let b = &detail.booking;
        enc.encode_field(&b.id.to_string())?;
        enc.encode_field(&b.room_id.to_string())?;
        enc.encode_field(&detail.room.name)?;
        enc.encode_field(&detail.room.color)?;
        enc.encode_field(&b.name)?;
        enc.encode_field(&b.email)?;
        enc.encode_field(&b.phone)?;
        enc.encode_field(&b.title)?;
        enc.encode_field(&b.start_at)?;
        enc.encode_field(&b.end_at)?;
        enc.encode_field(&int4(b.attendees))?;
        enc.encode_field(&int4(b.slots))?;
        enc.encode_field(&b.status.as_str().to_string())?;
        enc.encode_field(&b.created_at)
    })
}

fn slots_response(room_id: Ulid, slots: Vec<SlotInfo>, format: &Format) -> Response {
    let rid = room_id.to_string();
    query_response(slots_schema(), format, slots, |enc, slot| {
        enc.encode_field(&rid)?;
        enc.encode_field(&slot.span.start)?;
        enc.encode_field(&slot.span.end)?;
        enc.encode_field(&slot.state.as_str().to_string())
    })
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for RoomBookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![
            self.run_statement(client, query, &Format::UnifiedText)
                .await?,
        ])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomBookQueryParser;

#[async_trait]
impl QueryParser for RoomBookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        let schema = result_schema(stmt);
        Ok(match column_format {
            Some(format) => with_format(schema, format),
            None => schema,
        })
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomBookHandler {
    type Statement = String;
    type QueryParser = RoomBookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run_statement(client, &sql, &portal.result_column_format)
            .await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(with_format(
            result_schema(&target.statement.statement),
            &target.result_column_format,
        )))
    }
}

/// Byte ranges and numbers of the `$N` placeholders outside quoted literals
/// and quoted identifiers, in statement order.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            // A doubled quote closes and reopens, which leaves us inside.
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => {
                quote = Some(b);
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[start + 1..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Inline bound parameters (text format) as quoted literals in one pass over
/// the original statement. Inserted values are never rescanned, so a `$1`
/// inside a value stays literal text.
fn inline_params(sql: &str, params: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        match param {
            Some(value) => {
                out.push('\'');
                out.push_str(&value.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|b| String::from_utf8_lossy(b).into_owned()))
        .collect();
    inline_params(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomBookFactory {
    handler: Arc<RoomBookHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoomBookAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomBookFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(RoomBookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                RoomBookAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomBookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes. Each connection gets its own
/// handler, so LISTEN subscriptions never leak between sessions.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(RoomBookFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::AlreadyExists(_) => "23505",
        EngineError::RoomInUse { .. } => "23503",
        _ => match e.kind() {
            ErrorKind::Validation => "22023",
            ErrorKind::NotFound => "P0002",
            ErrorKind::Capacity => "23514",
            ErrorKind::Conflict => "23P01",
            ErrorKind::State => "55000",
            ErrorKind::Unexpected => "XX000",
        },
    }
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(e.code(), e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(schema: &[FieldInfo]) -> Vec<&str> {
        schema.iter().map(|f| f.name()).collect()
    }

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM bookings WHERE email = $1"), 1);
        assert_eq!(
            count_params("INSERT INTO bookings (room_id, name) VALUES ($2, $12)"),
            12
        );
        assert_eq!(count_params("SELECT '$' FROM rooms"), 0);
        assert_eq!(count_params("SELECT * FROM bookings WHERE title = '$4'"), 0);
    }

    #[test]
    fn inlined_values_are_not_rescanned() {
        let sql = "INSERT INTO bookings (title, email) VALUES ($2, $1)";
        let params = vec![Some("ada@example.com".to_string()), Some("Budget $1M review".to_string())];
        assert_eq!(
            inline_params(sql, &params),
            "INSERT INTO bookings (title, email) VALUES ('Budget $1M review', 'ada@example.com')"
        );
    }

    #[test]
    fn inlined_values_are_quoted() {
        let params = vec![Some("x' OR '1'='1".to_string()), None];
        assert_eq!(
            inline_params("SELECT * FROM bookings WHERE email = $1 AND '$1' = $2", &params),
            "SELECT * FROM bookings WHERE email = 'x'' OR ''1''=''1' AND '$1' = NULL"
        );
    }

    #[test]
    fn schema_follows_table() {
        assert_eq!(names(&result_schema("select * from rooms")).len(), 8);
        assert_eq!(
            names(&result_schema("SELECT * FROM bookings WHERE email = 'a@b.c'"))[2],
            "room_name"
        );
        assert_eq!(
            names(&result_schema("SELECT * FROM room_slots WHERE room_id = 'x'")),
            vec!["room_id", "start_at", "end_at", "state"]
        );
    }

    #[test]
    fn only_row_returning_statements_have_schema() {
        assert!(result_schema("DELETE FROM rooms WHERE id = 'x'").is_empty());
        assert!(result_schema("LISTEN bookings").is_empty());
        assert_eq!(
            names(&result_schema(
                "UPDATE bookings SET status = 'ENDED' WHERE id = 'x' RETURNING *"
            ))[0],
            "id"
        );
        assert_eq!(
            names(&result_schema("INSERT INTO rooms (name) VALUES ('A') RETURNING *"))
                .last()
                .copied(),
            Some("booking_count")
        );
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        let id = Ulid::new();
        assert_eq!(sqlstate(&EngineError::MissingField("name")), "22023");
        assert_eq!(sqlstate(&EngineError::RoomNotFound(id)), "P0002");
        assert_eq!(
            sqlstate(&EngineError::CapacityExceeded {
                requested: 9,
                capacity: 4
            }),
            "23514"
        );
        assert_eq!(sqlstate(&EngineError::Conflict(id)), "23P01");
        assert_eq!(sqlstate(&EngineError::AlreadyExists(id)), "23505");
        assert_eq!(
            sqlstate(&EngineError::RoomInUse {
                room_id: id,
                upcoming: 1
            }),
            "23503"
        );
        assert_eq!(
            sqlstate(&EngineError::InvalidState {
                id,
                status: BookingStatus::Ended
            }),
            "55000"
        );
        assert_eq!(sqlstate(&EngineError::WalError("disk".into())), "XX000");
    }
}
