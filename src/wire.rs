use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::RackAuthSource;
use crate::model::*;
use crate::observability;
use crate::placement::DropDecision;
use crate::property::PropertyManager;
use crate::rack::{Rack, RackError};
use crate::sql::{self, Command};

pub struct RackHandler {
    properties: Arc<PropertyManager>,
    query_parser: Arc<RackQueryParser>,
}

impl RackHandler {
    pub fn new(properties: Arc<PropertyManager>) -> Self {
        Self {
            properties,
            query_parser: Arc::new(RackQueryParser),
        }
    }

    fn resolve_rack<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Rack>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.properties.get_or_open(&db).map_err(|e| {
            user_error("08006", format!("property error: {e}"))
        })
    }

    /// Run one command, recording RED metrics around it.
    async fn execute(&self, rack: &Rack, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(rack, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::debug!("{label} failed: {e}");
        }
        result
    }

    async fn execute_command(&self, rack: &Rack, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertRoom {
                id,
                number,
                room_type,
                floor,
                status,
            } => {
                rack.create_room(Room {
                    id,
                    number,
                    room_type,
                    floor,
                    status,
                })
                .await
                .map_err(rack_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SetRoomStatus { room_id, status } => {
                rack.set_room_status(room_id, status).await.map_err(rack_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRoom { id } => {
                rack.delete_room(id).await.map_err(rack_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertReservation {
                id,
                room_id,
                guest_name,
                start,
                end,
            } => {
                let nights = Nights::try_new(start, end).ok_or_else(|| {
                    user_error("22007", format!("stay must end after it starts: {start} .. {end}"))
                })?;
                rack.create_reservation(id, room_id, guest_name, nights)
                    .await
                    .map_err(rack_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::CancelReservation { id } => {
                rack.cancel_reservation(id).await.map_err(rack_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::Move { moves } => {
                let count = moves.len();
                rack.apply_moves(moves).await.map_err(rack_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::CheckIn {
                reservation_id,
                today,
            } => {
                rack.check_in(reservation_id, today).await.map_err(rack_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::CheckOut { reservation_id } => {
                rack.check_out(reservation_id).await.map_err(rack_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectRooms => {
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<DataRow>> = rack
                    .list_rooms()
                    .await
                    .iter()
                    .map(|room| encode_room(&schema, room, None))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectReservations { start, end } => {
                let window = match (start, end) {
                    (None, None) => None,
                    (Some(start), Some(end)) => Some(Nights::try_new(start, end).ok_or_else(
                        || user_error("22007", format!("empty window: {start} .. {end}")),
                    )?),
                    _ => {
                        return Err(user_error(
                            "42601",
                            "filter on both start and \"end\", or neither".to_string(),
                        ));
                    }
                };
                let snapshot = rack.snapshot(window).await.map_err(rack_err)?;

                let schema = Arc::new(reservations_schema());
                let rows: Vec<PgWireResult<DataRow>> = snapshot
                    .reservations
                    .iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.room_id.map(|id| id.to_string()))?;
                        encoder.encode_field(&r.guest_name)?;
                        encoder.encode_field(&r.nights.start.to_string())?;
                        encoder.encode_field(&r.nights.end.to_string())?;
                        encoder.encode_field(&r.status.as_str())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectDropCheck {
                reservation_id,
                room_id,
                today,
            } => {
                let decision = rack
                    .check_drop(reservation_id, room_id, today)
                    .await
                    .map_err(rack_err)?;
                let schema = Arc::new(drop_check_schema());
                let rows = encode_decision(&schema, &decision)?;
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectAlternatives {
                reservation_id,
                room_id,
                max_results,
            } => {
                let mut rooms = rack
                    .alternatives(reservation_id, room_id)
                    .await
                    .map_err(rack_err)?;
                if let Some(n) = max_results {
                    rooms.truncate(n);
                }
                let schema = Arc::new(alternatives_schema());
                let rows: Vec<PgWireResult<DataRow>> = rooms
                    .iter()
                    .enumerate()
                    .map(|(rank, room)| encode_room(&schema, room, Some(rank as i64 + 1)))
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    ["id", "number", "type", "floor", "status"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn alternatives_schema() -> Vec<FieldInfo> {
    let mut schema = rooms_schema();
    schema.push(FieldInfo::new("rank".into(), None, None, Type::INT8, FieldFormat::Text));
    schema
}

fn reservations_schema() -> Vec<FieldInfo> {
    ["id", "room_id", "guest_name", "start", "end", "status"]
        .into_iter()
        .map(text_field)
        .collect()
}

/// One row per conflicting reservation, or a single row with empty conflict
/// columns when there is nothing to list. `decision` carries the JSON form.
fn drop_check_schema() -> Vec<FieldInfo> {
    let mut schema = vec![FieldInfo::new("ok".into(), None, None, Type::BOOL, FieldFormat::Text)];
    schema.extend(
        [
            "outcome",
            "reason",
            "conflict_id",
            "conflict_guest",
            "conflict_start",
            "conflict_end",
            "conflict_status",
            "decision",
        ]
        .into_iter()
        .map(text_field),
    );
    schema
}

fn encode_room(
    schema: &Arc<Vec<FieldInfo>>,
    room: &Room,
    rank: Option<i64>,
) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&room.id.to_string())?;
    encoder.encode_field(&room.number)?;
    encoder.encode_field(&room.room_type)?;
    encoder.encode_field(&room.floor)?;
    encoder.encode_field(&room.status.as_str())?;
    if let Some(rank) = rank {
        encoder.encode_field(&rank)?;
    }
    Ok(encoder.take_row())
}

fn encode_decision(
    schema: &Arc<Vec<FieldInfo>>,
    decision: &DropDecision,
) -> PgWireResult<Vec<PgWireResult<DataRow>>> {
    let json = serde_json::to_string(decision)
        .map_err(|e| user_error("XX000", format!("cannot encode decision: {e}")))?;
    let reason = decision.reason().map(|r| r.as_str());

    let row = |conflict: Option<&Reservation>| -> PgWireResult<DataRow> {
        let mut encoder = DataRowEncoder::new(schema.clone());
        encoder.encode_field(&decision.is_ok())?;
        encoder.encode_field(&decision.outcome())?;
        encoder.encode_field(&reason)?;
        encoder.encode_field(&conflict.map(|r| r.id.to_string()))?;
        encoder.encode_field(&conflict.map(|r| r.guest_name.as_str()))?;
        encoder.encode_field(&conflict.map(|r| r.nights.start.to_string()))?;
        encoder.encode_field(&conflict.map(|r| r.nights.end.to_string()))?;
        encoder.encode_field(&conflict.map(|r| r.status.as_str()))?;
        encoder.encode_field(&json)?;
        Ok(encoder.take_row())
    };

    let conflicts = decision.conflicts();
    if conflicts.is_empty() {
        Ok(vec![row(None)])
    } else {
        Ok(conflicts.iter().map(|r| row(Some(r))).collect())
    }
}

/// Result columns for a statement, judged from its text alone: extended
/// protocol statements still hold `$N` placeholders at describe time.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.trim_start().starts_with("SELECT") {
        return vec![];
    }
    if upper.contains("DROP_CHECK") {
        drop_check_schema()
    } else if upper.contains("ALTERNATIVES") {
        alternatives_schema()
    } else if upper.contains("RESERVATIONS") {
        reservations_schema()
    } else if upper.contains("ROOMS") {
        rooms_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for RackHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let rack = self.resolve_rack(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute(&rack, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RackQueryParser;

#[async_trait]
impl QueryParser for RackQueryParser {
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RackHandler {
    type Statement = String;
    type QueryParser = RackQueryParser;

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
        let rack = self.resolve_rack(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.execute(&rack, cmd)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "command produced no response".to_string()))
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Replace `$1, $2, ...` with bound parameters as quoted text. Highest index
/// first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RackFactory {
    handler: Arc<RackHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<RackAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RackFactory {
    pub fn new(properties: Arc<PropertyManager>, password: String) -> Self {
        Self {
            handler: Arc::new(RackHandler::new(properties)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                RackAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RackFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    properties: Arc<PropertyManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(RackFactory::new(properties, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for a rack error. Overlaps map to exclusion_violation so clients
/// can tell a double booking apart from other failures.
fn rack_sqlstate(e: &RackError) -> &'static str {
    match e {
        RackError::Conflict(_) => "23P01",
        RackError::NotFound(_) => "P0002",
        RackError::AlreadyExists(_) | RackError::DuplicateRoomNumber(_) => "23505",
        RackError::Stale(_) => "40001",
        RackError::LimitExceeded(_) => "54000",
        _ => "P0001",
    }
}

fn rack_err(e: RackError) -> PgWireError {
    user_error(rack_sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM rooms"), 0);
        assert_eq!(
            count_params("SELECT * FROM drop_check WHERE reservation_id = $1 AND room_id = $2 AND today = $3"),
            3
        );
        assert_eq!(count_params("INSERT INTO moves VALUES ($2, $10)"), 10);
    }

    #[test]
    fn schema_follows_target_table() {
        let names = |sql: &str| -> Vec<String> {
            result_schema(sql).iter().map(|f| f.name().to_string()).collect()
        };
        assert_eq!(names("SELECT * FROM rooms"), vec!["id", "number", "type", "floor", "status"]);
        assert_eq!(names("select * from alternatives where room_id = $1").last().unwrap(), "rank");
        assert_eq!(names("SELECT * FROM drop_check WHERE today = $3")[0], "ok");
        assert!(names("INSERT INTO rooms (id, number, type) VALUES ($1, $2, $3)").is_empty());
    }

    #[test]
    fn conflicts_map_to_exclusion_violation() {
        assert_eq!(rack_sqlstate(&RackError::Conflict(vec![Ulid::new()])), "23P01");
        assert_eq!(rack_sqlstate(&RackError::SameRoom(Ulid::new())), "P0001");
    }
}
