use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Client, Config, NoTls};
use ulid::Ulid;

const FLOORS: usize = 5;
const ROOMS_PER_FLOOR: usize = 20;

async fn connect(host: &str, port: u16) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("rackd")
        .password("rackd");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn base_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
}

fn day(offset: usize) -> NaiveDate {
    base_day() + Days::new(offset as u64)
}

/// Build a property of `FLOORS * ROOMS_PER_FLOOR` clean Deluxe rooms.
async fn setup_rooms(client: &Client) -> Vec<Ulid> {
    let mut rooms = Vec::with_capacity(FLOORS * ROOMS_PER_FLOOR);
    for floor in 1..=FLOORS {
        for n in 1..=ROOMS_PER_FLOOR {
            let id = Ulid::new();
            let number = floor * 100 + n;
            client
                .batch_execute(&format!(
                    "INSERT INTO rooms (id, number, type, floor, status) VALUES ('{id}', '{number}', 'Deluxe', '{floor}', 'clean')"
                ))
                .await
                .unwrap();
            rooms.push(id);
        }
    }
    rooms
}

async fn reserve(client: &Client, room: Option<Ulid>, start: usize, nights: usize) -> Ulid {
    let id = Ulid::new();
    let room = room.map_or("NULL".to_string(), |r| format!("'{r}'"));
    let (s, e) = (day(start), day(start + nights));
    client
        .batch_execute(&format!(
            r#"INSERT INTO reservations (id, room_id, guest_name, start, "end") VALUES ('{id}', {room}, 'Bench Guest', '{s}', '{e}')"#
        ))
        .await
        .unwrap();
    id
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let rooms = setup_rooms(&client).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    // Two-night stays marching through every room back to back.
    for i in 0..n {
        let room = rooms[i % rooms.len()];
        let offset = (i / rooms.len()) * 2;
        let t = Instant::now();
        reserve(&client, Some(room), offset, 2).await;
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_drop_checks_under_moves(host: &str, port: u16) {
    let setup_client = connect(host, port).await;
    let rooms = setup_rooms(&setup_client).await;
    for (i, room) in rooms.iter().enumerate() {
        for week in 0..20 {
            reserve(&setup_client, Some(*room), week * 7 + i % 3, 3).await;
        }
    }
    let probe = reserve(&setup_client, None, 30, 4).await;
    println!("  populated {} rooms with 20 stays each", rooms.len());

    let today = day(31);
    let n_checks = 1000;
    let mut latencies = Vec::with_capacity(n_checks);

    let writer_rooms = rooms.clone();
    let writer_client = setup_client;
    let writer = tokio::spawn(async move {
        let mut moved = 0usize;
        let mut rejected = 0usize;
        for i in 0..500 {
            let waiting = reserve(&writer_client, None, 200 + (i % 50) * 3, 2).await;
            let target = writer_rooms[i % writer_rooms.len()];
            let result = writer_client
                .batch_execute(&format!(
                    "INSERT INTO moves (reservation_id, room_id) VALUES ('{waiting}', '{target}')"
                ))
                .await;
            match result {
                Ok(()) => moved += 1,
                Err(_) => rejected += 1,
            }
        }
        (moved, rejected, writer_client)
    });

    // A second property measures read latency while the writer runs.
    let reader = connect(host, port).await;
    let reader_rooms = setup_rooms(&reader).await;
    let reader_probe = reserve(&reader, None, 30, 4).await;
    for i in 0..n_checks {
        let room = reader_rooms[i % reader_rooms.len()];
        let t = Instant::now();
        reader
            .simple_query(&format!(
                "SELECT * FROM drop_check WHERE reservation_id = '{reader_probe}' AND room_id = '{room}' AND today = '{today}'"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("drop check latency (idle property)", &mut latencies);

    let (moved, rejected, client) = writer.await.unwrap();
    println!("  writer: {moved} moves committed, {rejected} rejected");

    let mut latencies = Vec::with_capacity(n_checks);
    for i in 0..n_checks {
        let room = rooms[i % rooms.len()];
        let t = Instant::now();
        client
            .simple_query(&format!(
                "SELECT * FROM drop_check WHERE reservation_id = '{probe}' AND room_id = '{room}' AND today = '{today}'"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("drop check latency (populated property)", &mut latencies);

    let mut latencies = Vec::with_capacity(100);
    for i in 0..100 {
        let room = rooms[i % rooms.len()];
        let t = Instant::now();
        client
            .simple_query(&format!(
                "SELECT * FROM alternatives WHERE reservation_id = '{probe}' AND room_id = '{room}' AND max_results = 5"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("alternatives latency", &mut latencies);
}

async fn phase3_contended_moves(host: &str, port: u16) {
    let client = connect(host, port).await;
    let rooms = setup_rooms(&client).await;
    let target = rooms[0];

    // Every waiting stay overlaps every other; exactly one move may win.
    let n_tasks = 20;
    let mut waiting = Vec::with_capacity(n_tasks);
    for _ in 0..n_tasks {
        waiting.push(reserve(&client, None, 10, 3).await);
    }

    let client = std::sync::Arc::new(client);
    let start = Instant::now();
    let mut handles = Vec::new();
    for id in waiting {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .batch_execute(&format!(
                    "INSERT INTO moves (reservation_id, room_id) VALUES ('{id}', '{target}')"
                ))
                .await
                .is_ok()
        }));
    }

    let mut wins = 0;
    for h in handles {
        if h.await.unwrap() {
            wins += 1;
        }
    }
    println!(
        "  {n_tasks} racing moves into one room: {wins} committed in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    assert_eq!(wins, 1, "double booking under contention");
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let room = Ulid::new();
            client
                .batch_execute(&format!(
                    "INSERT INTO rooms (id, number, type) VALUES ('{room}', '101', 'Deluxe')"
                ))
                .await
                .unwrap();

            for i in 0..ops_per_conn {
                reserve(&client, Some(room), i * 2, 2).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("RACKD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("RACKD_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid RACKD_PORT");

    println!("=== rackd stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own property (unique dbname) to avoid interference

    println!("[phase 1] sequential reservation throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] drop check and alternatives latency");
    phase2_drop_checks_under_moves(&host, port).await;

    println!("\n[phase 3] contended moves");
    phase3_contended_moves(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
