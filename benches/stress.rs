use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;
const DAY: i64 = 24 * HOUR;
/// 2030-01-07 00:00 UTC, far enough out that nothing starts mid-run.
const DAY0: i64 = 1_893_974_400_000;

async fn connect(host: &str, port: u16, password: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("roombook")
        .user("bench")
        .password(password);

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
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Start of the `n`th one-hour meeting that fits the default 08:00-20:00
/// window, twelve per day.
fn meeting_start(n: i64) -> i64 {
    DAY0 + (n / 12) * DAY + 8 * HOUR + (n % 12) * HOUR
}

async fn create_room(client: &tokio_postgres::Client, name: &str, capacity: u32) -> Ulid {
    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, name, color, capacity) VALUES ('{rid}', '{name}', '#808080', {capacity})"
        ))
        .await
        .unwrap();
    rid
}

async fn book(
    client: &tokio_postgres::Client,
    rid: Ulid,
    email: &str,
    start: i64,
) -> Result<u64, tokio_postgres::Error> {
    client
        .execute(
            &format!(
                "INSERT INTO bookings (room_id, name, email, phone, title, start_at, end_at, attendees) \
                 VALUES ('{rid}', 'Bench', '{email}', '555-0000', 'Load', {start}, {}, 2)",
                start + HOUR
            ),
            &[],
        )
        .await
}

async fn phase1_sequential(client: &tokio_postgres::Client) {
    let rid = create_room(client, "Sequential", 10).await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        book(client, rid, "seq@bench.test", meeting_start(i as i64))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16, password: &str) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tasks {
        let host = host.to_string();
        let password = password.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &password).await;
            let rid = create_room(&client, &format!("Parallel {t}"), 10).await;
            for j in 0..n_per_task {
                book(&client, rid, "par@bench.test", meeting_start(j)).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task as usize;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} rooms x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

/// Every task races for the same slots in one room; exactly one writer may
/// win each slot.
async fn phase3_contention(host: &str, port: u16, password: &str) {
    let client = connect(host, port, password).await;
    let rid = create_room(&client, "Contended", 10).await;

    let n_tasks = 8;
    let n_slots = 100;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let password = password.to_string();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &password).await;
            for slot in 0..n_slots {
                match book(&client, rid, "race@bench.test", meeting_start(slot)).await {
                    Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                    Err(_) => lost.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots: {won} won, {lost} rejected in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, n_slots as usize, "each slot must be won exactly once");
}

async fn phase4_read_under_load(host: &str, port: u16, password: &str) {
    let stop = Arc::new(AtomicBool::new(false));

    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let host = host.to_string();
        let password = password.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &password).await;
            let rid = create_room(&client, &format!("Writer {w}"), 10).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = book(&client, rid, "writer@bench.test", meeting_start(i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let password = password.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &password).await;
            let rid = create_room(&client, &format!("Reader {r}"), 10).await;
            let email = format!("reader{r}@bench.test");
            for i in 0..50 {
                book(&client, rid, &email, meeting_start(i)).await.unwrap();
            }

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let sql = if i % 2 == 0 {
                    format!("SELECT * FROM bookings WHERE email = '{email}'")
                } else {
                    format!("SELECT * FROM room_slots WHERE room_id = '{rid}' AND day = {DAY0}")
                };
                let t = Instant::now();
                client.simple_query(&sql).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("read latency (by email / room slots)", &mut all_latencies);
}

async fn phase5_connection_storm(host: &str, port: u16, password: &str) {
    let n_conns = 50;
    let ops_per_conn = 10;
    let success = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for c in 0..n_conns {
        let host = host.to_string();
        let password = password.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &password).await;
            let rid = create_room(&client, &format!("Storm {c}"), 10).await;
            for i in 0..ops_per_conn {
                book(&client, rid, "storm@bench.test", meeting_start(i)).await.unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ROOMBOOK_PORT");
    let password = std::env::var("ROOMBOOK_PASSWORD").unwrap_or_else(|_| "roombook".into());

    println!("=== roombook stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential write throughput");
    let client = connect(&host, port, &password).await;
    phase1_sequential(&client).await;
    drop(client);

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent(&host, port, &password).await;

    println!("\n[phase 3] overlapping writers");
    phase3_contention(&host, port, &password).await;

    println!("\n[phase 4] read latency under write load");
    phase4_read_under_load(&host, port, &password).await;

    println!("\n[phase 5] connection storm");
    phase5_connection_storm(&host, port, &password).await;

    println!("\n=== done ===");
}
