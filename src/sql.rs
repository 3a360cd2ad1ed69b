use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Ulid,
        number: String,
        room_type: String,
        floor: Option<String>,
        status: RoomStatus,
    },
    SetRoomStatus {
        room_id: Ulid,
        status: RoomStatus,
    },
    DeleteRoom {
        id: Ulid,
    },
    InsertReservation {
        id: Ulid,
        room_id: Option<Ulid>,
        guest_name: String,
        start: Day,
        end: Day,
    },
    CancelReservation {
        id: Ulid,
    },
    /// One row moves one reservation; several rows commit atomically.
    Move {
        moves: Vec<(Ulid, Ulid)>, // (reservation_id, room_id)
    },
    CheckIn {
        reservation_id: Ulid,
        today: Day,
    },
    CheckOut {
        reservation_id: Ulid,
    },
    SelectRooms,
    SelectReservations {
        start: Option<Day>,
        end: Option<Day>,
    },
    SelectDropCheck {
        reservation_id: Ulid,
        room_id: Ulid,
        today: Day,
    },
    SelectAlternatives {
        reservation_id: Ulid,
        room_id: Ulid,
        max_results: Option<usize>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => {
            return Err(SqlError::Unsupported(format!(
                "{} statements in one query",
                stmts.len()
            )));
        }
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    if rows.len() > 1 && table != "moves" {
        return Err(SqlError::Unsupported(format!(
            "multi-row INSERT into {table}"
        )));
    }
    let values = &rows[0];

    match table.as_str() {
        "rooms" => {
            require("rooms", values, 3)?;
            Ok(Command::InsertRoom {
                id: parse_ulid(&values[0])?,
                number: parse_string(&values[1])?,
                room_type: parse_string(&values[2])?,
                floor: values.get(3).map(parse_string_or_null).transpose()?.flatten(),
                status: match values.get(4) {
                    Some(v) => parse_room_status(v)?,
                    None => RoomStatus::Clean,
                },
            })
        }
        "room_status" => {
            require("room_status", values, 2)?;
            Ok(Command::SetRoomStatus {
                room_id: parse_ulid(&values[0])?,
                status: parse_room_status(&values[1])?,
            })
        }
        "reservations" => {
            require("reservations", values, 5)?;
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                room_id: parse_ulid_or_null(&values[1])?,
                guest_name: parse_string(&values[2])?,
                start: parse_date(&values[3])?,
                end: parse_date(&values[4])?,
            })
        }
        "moves" => {
            let mut moves = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                require("moves row", row, 2)?;
                let at_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
                moves.push((
                    parse_ulid(&row[0]).map_err(at_row)?,
                    parse_ulid(&row[1]).map_err(at_row)?,
                ));
            }
            Ok(Command::Move { moves })
        }
        "checkins" => {
            require("checkins", values, 2)?;
            Ok(Command::CheckIn {
                reservation_id: parse_ulid(&values[0])?,
                today: parse_date(&values[1])?,
            })
        }
        "checkouts" => {
            require("checkouts", values, 1)?;
            Ok(Command::CheckOut {
                reservation_id: parse_ulid(&values[0])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "reservations" => Ok(Command::CancelReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Equality and range filters collected from a `WHERE a AND b AND ...` chain.
#[derive(Default)]
struct Filters {
    reservation_id: Option<Ulid>,
    room_id: Option<Ulid>,
    today: Option<Day>,
    max_results: Option<usize>,
    start: Option<Day>,
    end: Option<Day>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms),
        "reservations" => Ok(Command::SelectReservations {
            start: filters.start,
            end: filters.end,
        }),
        "drop_check" => Ok(Command::SelectDropCheck {
            reservation_id: filters
                .reservation_id
                .ok_or(SqlError::MissingFilter("reservation_id"))?,
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            today: filters.today.ok_or(SqlError::MissingFilter("today"))?,
        }),
        "alternatives" => Ok(Command::SelectAlternatives {
            reservation_id: filters
                .reservation_id
                .ok_or(SqlError::MissingFilter("reservation_id"))?,
            room_id: filters.room_id.ok_or(SqlError::MissingFilter("room_id"))?,
            max_results: filters.max_results,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    let Expr::BinaryOp { left, op, right } = expr else {
        return Ok(());
    };
    let col = expr_column_name(left);
    match (op, col.as_deref()) {
        (ast::BinaryOperator::And, _) => {
            extract_filters(left, filters)?;
            extract_filters(right, filters)?;
        }
        (ast::BinaryOperator::Eq, Some("reservation_id")) => {
            filters.reservation_id = Some(parse_ulid(right)?);
        }
        (ast::BinaryOperator::Eq, Some("room_id")) => filters.room_id = Some(parse_ulid(right)?),
        (ast::BinaryOperator::Eq, Some("today")) => filters.today = Some(parse_date(right)?),
        (ast::BinaryOperator::Eq, Some("max_results")) => {
            let n = parse_i64_expr(right)?;
            let n = usize::try_from(n)
                .map_err(|_| SqlError::Parse(format!("{n} is not a valid max_results")))?;
            filters.max_results = Some(n);
        }
        (ast::BinaryOperator::GtEq, Some("start")) => filters.start = Some(parse_date(right)?),
        (ast::BinaryOperator::LtEq, Some("end")) => filters.end = Some(parse_date(right)?),
        _ => {}
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn require(table: &'static str, values: &[Expr], expected: usize) -> Result<(), SqlError> {
    if values.len() < expected {
        return Err(SqlError::WrongArity(table, expected, values.len()));
    }
    Ok(())
}

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

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(values.rows.clone()),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_date(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_string(expr)?;
    parse_day(&s).map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_room_status(expr: &Expr) -> Result<RoomStatus, SqlError> {
    let s = parse_string(expr)?;
    s.parse().map_err(|e: UnknownStatus| SqlError::Parse(e.to_string()))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn day(s: &str) -> Day {
        parse_day(s).unwrap()
    }

    #[test]
    fn parse_insert_room() {
        let sql = format!("INSERT INTO rooms (id, number, type, floor, status) VALUES ('{A}', '101', 'Deluxe', '1', 'dirty')");
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { id, number, room_type, floor, status } => {
                assert_eq!(id.to_string(), A);
                assert_eq!(number, "101");
                assert_eq!(room_type, "Deluxe");
                assert_eq!(floor.as_deref(), Some("1"));
                assert_eq!(status, RoomStatus::Dirty);
            }
            cmd => panic!("expected InsertRoom, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_room_defaults() {
        let sql = format!("INSERT INTO rooms (id, number, type) VALUES ('{A}', 101, 'Suite')");
        match parse_sql(&sql).unwrap() {
            Command::InsertRoom { number, floor, status, .. } => {
                assert_eq!(number, "101");
                assert_eq!(floor, None);
                assert_eq!(status, RoomStatus::Clean);
            }
            cmd => panic!("expected InsertRoom, got {cmd:?}"),
        }

        let sql = format!("INSERT INTO rooms (id, number, type, floor) VALUES ('{A}', '7', 'Suite', NULL)");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertRoom { floor: None, .. }));
    }

    #[test]
    fn parse_room_status_change() {
        let sql = format!("INSERT INTO room_status (room_id, status) VALUES ('{A}', 'out_of_order')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SetRoomStatus {
                room_id: Ulid::from_string(A).unwrap(),
                status: RoomStatus::OutOfOrder,
            }
        );

        let sql = format!("INSERT INTO room_status (room_id, status) VALUES ('{A}', 'haunted')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!(
            r#"INSERT INTO reservations (id, room_id, guest_name, start, "end") VALUES ('{A}', '{B}', 'Grace Hopper', '2025-08-13', '2025-08-15')"#
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation {
                id: Ulid::from_string(A).unwrap(),
                room_id: Some(Ulid::from_string(B).unwrap()),
                guest_name: "Grace Hopper".into(),
                start: day("2025-08-13"),
                end: day("2025-08-15"),
            }
        );
    }

    #[test]
    fn parse_unassigned_reservation() {
        let sql = format!(
            r#"INSERT INTO reservations (id, room_id, guest_name, start, "end") VALUES ('{A}', NULL, 'Guest', '2025-08-13', '2025-08-15')"#
        );
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation { room_id: None, .. }
        ));
    }

    #[test]
    fn parse_bad_date_errors() {
        let sql = format!(
            r#"INSERT INTO reservations (id, room_id, guest_name, start, "end") VALUES ('{A}', NULL, 'Guest', '2025-13-01', '2025-08-15')"#
        );
        let err = parse_sql(&sql).unwrap_err();
        assert!(err.to_string().contains("bad date"), "{err}");
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM rooms WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteRoom { .. }));
        let sql = format!("DELETE FROM reservations WHERE id = '{A}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::CancelReservation { .. }));
        assert!(matches!(
            parse_sql("DELETE FROM reservations WHERE guest_name = 'x'"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_moves() {
        let sql = format!("INSERT INTO moves (reservation_id, room_id) VALUES ('{A}', '{B}')");
        match parse_sql(&sql).unwrap() {
            Command::Move { moves } => assert_eq!(moves.len(), 1),
            cmd => panic!("expected Move, got {cmd:?}"),
        }

        let sql = format!("INSERT INTO moves (reservation_id, room_id) VALUES ('{A}', '{B}'), ('{B}', '{A}')");
        match parse_sql(&sql).unwrap() {
            Command::Move { moves } => {
                assert_eq!(moves.len(), 2);
                assert_eq!(moves[1].0.to_string(), B);
                assert_eq!(moves[1].1.to_string(), A);
            }
            cmd => panic!("expected Move, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_check_in_and_out() {
        let sql = format!("INSERT INTO checkins (reservation_id, today) VALUES ('{A}', '2025-08-14')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::CheckIn {
                reservation_id: Ulid::from_string(A).unwrap(),
                today: day("2025-08-14"),
            }
        );
        let sql = format!("INSERT INTO checkouts (reservation_id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::CheckOut { .. }));
    }

    #[test]
    fn parse_select_reservations_window() {
        assert_eq!(
            parse_sql("SELECT * FROM reservations").unwrap(),
            Command::SelectReservations { start: None, end: None }
        );
        let sql = r#"SELECT * FROM reservations WHERE start >= '2025-08-01' AND "end" <= '2025-09-01'"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectReservations {
                start: Some(day("2025-08-01")),
                end: Some(day("2025-09-01")),
            }
        );
    }

    #[test]
    fn parse_select_drop_check() {
        let sql = format!(
            "SELECT * FROM drop_check WHERE reservation_id = '{A}' AND room_id = '{B}' AND today = '2025-08-14'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectDropCheck {
                reservation_id: Ulid::from_string(A).unwrap(),
                room_id: Ulid::from_string(B).unwrap(),
                today: day("2025-08-14"),
            }
        );

        let sql = format!("SELECT * FROM drop_check WHERE reservation_id = '{A}' AND room_id = '{B}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("today"))));
    }

    #[test]
    fn parse_select_alternatives() {
        let sql = format!(
            "SELECT * FROM alternatives WHERE reservation_id = '{A}' AND room_id = '{B}' AND max_results = 3"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectAlternatives { max_results, .. } => assert_eq!(max_results, Some(3)),
            cmd => panic!("expected SelectAlternatives, got {cmd:?}"),
        }

        let sql = format!(
            "SELECT * FROM alternatives WHERE reservation_id = '{A}' AND room_id = '{B}' AND max_results = -1"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_select_rooms() {
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms);
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO bookings (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_wrong_arity_errors() {
        let sql = format!("INSERT INTO moves (reservation_id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("moves row", 2, 1))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn multi_row_insert_only_for_moves() {
        let sql = format!(
            r#"INSERT INTO reservations (id, room_id, guest_name, start, "end") VALUES ('{A}', NULL, 'A', '2025-08-13', '2025-08-15'), ('{B}', NULL, 'B', '2025-08-13', '2025-08-15')"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));

        let others = [
            format!("INSERT INTO rooms (id, number, type) VALUES ('{A}', '101', 'X'), ('{B}', '102', 'X')"),
            format!("INSERT INTO room_status (room_id, status) VALUES ('{A}', 'clean'), ('{B}', 'dirty')"),
            format!("INSERT INTO checkins (reservation_id, today) VALUES ('{A}', '2025-08-13'), ('{B}', '2025-08-13')"),
            format!("INSERT INTO checkouts (reservation_id) VALUES ('{A}'), ('{B}')"),
        ];
        for sql in others {
            assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))), "{sql}");
        }
    }

    #[test]
    fn several_statements_are_rejected() {
        let sql = format!(
            "INSERT INTO checkouts (reservation_id) VALUES ('{A}'); DELETE FROM rooms WHERE id = '{B}'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
        assert_eq!(parse_sql("SELECT * FROM rooms;").unwrap(), Command::SelectRooms);
    }
}
